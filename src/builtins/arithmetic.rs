//! Arithmetic and comparison on integers: +, -, *, /, mod, =, <
//!
//! All operations demand `Int` arguments and are variadic where that is
//! natural.
//!
//! - `+`: Sum of all arguments (identity: 0)
//! - `-`: Subtract subsequent args from the first, or negate a single arg
//! - `*`: Product of all arguments (identity: 1)
//! - `/`: Divide the first arg by the rest, or `(/ x)` = 1/x
//! - `mod`: Remainder, exactly 2 args
//! - `=`, `<`: Chain over consecutive pairs, at least 1 arg

use crate::env::FrameRef;
use crate::error::Error;
use crate::eval::Interp;
use crate::value::Value;

/// Unwrap every argument as an integer or fail with the offending type.
fn int_args(interp: &Interp, name: &str, args: &[Value]) -> Result<Vec<i64>, Error> {
    args.iter()
        .map(|&v| match v {
            Value::Int(r) => Ok(*interp.heap.int(r)),
            other => Err(Error::BadApply(format!(
                "{name}: expected int, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

pub fn builtin_add(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let ints = int_args(interp, "+", args)?;
    interp.make_int(ints.iter().sum())
}

/// With one argument, negates. Otherwise subtracts the rest from the first.
pub fn builtin_sub(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let ints = int_args(interp, "-", args)?;
    let Some((&first, rest)) = ints.split_first() else {
        return Err(Error::arity("-", "at least 1"));
    };
    if rest.is_empty() {
        return interp.make_int(-first);
    }
    interp.make_int(rest.iter().fold(first, |acc, &n| acc - n))
}

pub fn builtin_mul(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let ints = int_args(interp, "*", args)?;
    interp.make_int(ints.iter().product())
}

/// With one argument, divides one by it. Division is truncating; a zero
/// divisor is an error.
pub fn builtin_div(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let ints = int_args(interp, "/", args)?;
    let Some((&first, rest)) = ints.split_first() else {
        return Err(Error::arity("/", "at least 1"));
    };
    if rest.is_empty() {
        if first == 0 {
            return Err(Error::DivByZero);
        }
        return interp.make_int(1 / first);
    }
    let mut acc = first;
    for &n in rest {
        if n == 0 {
            return Err(Error::DivByZero);
        }
        acc /= n;
    }
    interp.make_int(acc)
}

pub fn builtin_mod(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let ints = int_args(interp, "mod", args)?;
    if ints.len() != 2 {
        return Err(Error::arity("mod", "2"));
    }
    if ints[1] == 0 {
        return Err(Error::DivByZero);
    }
    interp.make_int(ints[0] % ints[1])
}

pub fn builtin_num_eq(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let ints = int_args(interp, "=", args)?;
    if ints.is_empty() {
        return Err(Error::arity("=", "at least 1"));
    }
    Ok(interp.bool_value(ints.windows(2).all(|w| w[0] == w[1])))
}

pub fn builtin_num_lt(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let ints = int_args(interp, "<", args)?;
    if ints.is_empty() {
        return Err(Error::arity("<", "at least 1"));
    }
    Ok(interp.bool_value(ints.windows(2).all(|w| w[0] < w[1])))
}

/// Register all arithmetic builtins in the global frame.
pub fn register(interp: &mut Interp) -> Result<(), Error> {
    super::install(interp, "+", builtin_add)?;
    super::install(interp, "-", builtin_sub)?;
    super::install(interp, "*", builtin_mul)?;
    super::install(interp, "/", builtin_div)?;
    super::install(interp, "mod", builtin_mod)?;
    super::install(interp, "=", builtin_num_eq)?;
    super::install(interp, "<", builtin_num_lt)?;
    Ok(())
}
