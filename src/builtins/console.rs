//! Console I/O operations: print, println, print-to-string, read
//!
//! - `print`: Output display forms, space-separated, without newline
//! - `println`: Same with a trailing newline
//! - `print-to-string`: The readable form of one value, as a string
//! - `read`: One expression from standard input
//!
//! `print` and `println` return nil.

use crate::env::FrameRef;
use crate::error::Error;
use crate::eval::Interp;
use crate::reader::{is_balanced, parse_one};
use crate::value::{display, readable, Value};
use std::io::{BufRead, Write};

fn print_args(interp: &Interp, args: &[Value]) -> String {
    let mut out = String::new();
    for (i, &arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&display(&interp.heap, arg));
    }
    out
}

/// Prints display forms to stdout without a newline. Returns nil.
pub fn builtin_print(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    print!("{}", print_args(interp, args));
    let _ = std::io::stdout().flush();
    Ok(interp.nil())
}

/// Prints display forms to stdout with a trailing newline. Returns nil.
pub fn builtin_println(
    interp: &mut Interp,
    _frame: FrameRef,
    args: &[Value],
) -> Result<Value, Error> {
    println!("{}", print_args(interp, args));
    Ok(interp.nil())
}

/// The readable print of one value, so the result re-reads as the same
/// structure.
pub fn builtin_print_to_string(
    interp: &mut Interp,
    _frame: FrameRef,
    args: &[Value],
) -> Result<Value, Error> {
    match args {
        [v] => {
            let text = readable(&interp.heap, *v);
            interp.make_string(&text)
        }
        _ => Err(Error::arity("print-to-string", "1")),
    }
}

/// Reads exactly one expression from standard input, buffering leftovers
/// for the next call. Lines accumulate until they balance.
pub fn builtin_read(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    if !args.is_empty() {
        return Err(Error::arity("read", "0"));
    }
    let stdin = std::io::stdin();
    loop {
        if !interp.stdin_pending.trim().is_empty() && is_balanced(&interp.stdin_pending) {
            let parsed = match parse_one(&interp.stdin_pending) {
                Ok(p) => p,
                Err(e) => {
                    // Drop the malformed text so the next read starts clean.
                    interp.stdin_pending.clear();
                    return Err(e);
                }
            };
            match parsed {
                Some((sexp, rest)) => {
                    let consumed = interp.stdin_pending.len() - rest.len();
                    interp.stdin_pending.drain(..consumed);
                    return interp.lower(&sexp);
                }
                None => interp.stdin_pending.clear(),
            }
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return Err(Error::Parse("unexpected end of input".to_string())),
            Ok(_) => interp.stdin_pending.push_str(&line),
            Err(e) => return Err(Error::Parse(e.to_string())),
        }
    }
}

/// Register all console builtins in the global frame.
pub fn register(interp: &mut Interp) -> Result<(), Error> {
    super::install(interp, "print", builtin_print)?;
    super::install(interp, "println", builtin_println)?;
    super::install(interp, "print-to-string", builtin_print_to_string)?;
    super::install(interp, "read", builtin_read)?;
    Ok(())
}
