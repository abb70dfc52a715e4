//! # Built-in Functions Module
//!
//! Native procedures for the interpreter, organized by category:
//!
//! - **[arithmetic]** (7): +, -, *, /, mod, =, < - Integer operations
//! - **[lists]** (4): car, cdr, cons, eq? - Structure and identity
//! - **[types]** (8): nil?, cons?, list?, symbol?, int?, string?, proc?, bound? - Predicates
//! - **[console]** (4): print, println, print-to-string, read - I/O
//! - **[meta]** (5): eval, macroexpand-all, gensym, load, get-time - Reflection
//!
//! Every builtin receives the interpreter, the calling frame, and its
//! evaluated argument vector; the caller keeps the arguments rooted for
//! the duration of the call.

use crate::error::Error;
use crate::eval::{BuiltinFn, Interp};
use crate::value::{Builtin, Value};

pub mod arithmetic;
pub mod console;
pub mod lists;
pub mod meta;
pub mod types;

/// Bind one native procedure in the global frame.
pub(crate) fn install(interp: &mut Interp, name: &'static str, func: BuiltinFn) -> Result<(), Error> {
    let sym = interp.symbols.intern(&mut interp.heap, name)?;
    let cell = interp.heap.alloc_builtin(Builtin { name, func })?;
    interp.heap.bind(interp.globals, sym, Value::Builtin(cell));
    Ok(())
}

/// Register every builtin category in the global frame.
pub fn register(interp: &mut Interp) -> Result<(), Error> {
    arithmetic::register(interp)?;
    lists::register(interp)?;
    types::register(interp)?;
    console::register(interp)?;
    meta::register(interp)?;
    Ok(())
}
