// ABOUTME: REPL line helper keeping input open until expressions balance

use crate::reader::is_balanced;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline_derive::{Completer, Helper, Highlighter, Hinter};

/// Editor helper for the prompt. Validation is the only customization:
/// a line with open parens or an open string keeps the editor reading
/// continuation lines instead of submitting.
#[derive(Completer, Helper, Highlighter, Hinter)]
pub struct ReplHelper;

impl Validator for ReplHelper {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        if is_balanced(ctx.input()) {
            Ok(ValidationResult::Valid(None))
        } else {
            Ok(ValidationResult::Incomplete)
        }
    }
}
