// ABOUTME: Error taxonomy shared by the reader, evaluator, and heap

use thiserror::Error;

/// Every failure the interpreter can report. All variants are synchronous
/// and propagate to the REPL boundary; `HeapExhausted` is the only one the
/// driver treats as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unbound symbol: {0}")]
    UnboundSymbol(String),

    #[error("bad special form: {0}")]
    BadForm(String),

    #[error("bad application: {0}")]
    BadApply(String),

    #[error("division by zero")]
    DivByZero,

    #[error("heap exhausted")]
    HeapExhausted,
}

impl Error {
    /// Shorthand for the common "wrong number of arguments" complaints.
    pub fn arity(what: &str, expected: &str) -> Self {
        Error::BadApply(format!("{what}: expected {expected} arguments"))
    }
}
