//! Structural operations: car, cdr, cons, eq?
//!
//! `car` and `cdr` demand a cons cell; taking the head of `nil` is an
//! error, as in the traditional strict reading.

use crate::env::FrameRef;
use crate::error::Error;
use crate::eval::Interp;
use crate::value::{ConsRef, Value};

fn one_cons(name: &str, args: &[Value]) -> Result<ConsRef, Error> {
    if args.len() != 1 {
        return Err(Error::arity(name, "1"));
    }
    match args[0] {
        Value::Cons(c) => Ok(c),
        other => Err(Error::BadApply(format!(
            "{name}: expected cons, got {}",
            other.type_name()
        ))),
    }
}

pub fn builtin_car(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let c = one_cons("car", args)?;
    Ok(interp.heap.cons(c).car)
}

pub fn builtin_cdr(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let c = one_cons("cdr", args)?;
    Ok(interp.heap.cons(c).cdr)
}

pub fn builtin_cons(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    if args.len() != 2 {
        return Err(Error::arity("cons", "2"));
    }
    interp.cons_value(args[0], args[1])
}

/// Identity comparison: handles for most variants, by value for ints and
/// strings.
pub fn builtin_eq(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    if args.len() != 2 {
        return Err(Error::arity("eq?", "2"));
    }
    Ok(interp.bool_value(interp.heap.eq_values(args[0], args[1])))
}

/// Register all structural builtins in the global frame.
pub fn register(interp: &mut Interp) -> Result<(), Error> {
    super::install(interp, "car", builtin_car)?;
    super::install(interp, "cdr", builtin_cdr)?;
    super::install(interp, "cons", builtin_cons)?;
    super::install(interp, "eq?", builtin_eq)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::display;

    fn run(interp: &mut Interp, src: &str) -> String {
        let v = interp.eval_source(src).expect("evaluation should succeed");
        display(&interp.heap, v)
    }

    #[test]
    fn test_car_cdr() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(car (quote (1 2 3)))"), "1");
        assert_eq!(run(&mut interp, "(cdr (quote (1 2 3)))"), "(2 3)");
        assert_eq!(run(&mut interp, "(cdr (quote (1)))"), "nil");
    }

    #[test]
    fn test_car_of_nil_is_error() {
        let mut interp = Interp::new().unwrap();
        assert!(matches!(
            interp.eval_source("(car nil)"),
            Err(Error::BadApply(_))
        ));
        assert!(matches!(
            interp.eval_source("(cdr 5)"),
            Err(Error::BadApply(_))
        ));
    }

    #[test]
    fn test_cons_builds_pairs() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(cons 1 2)"), "(1 . 2)");
        assert_eq!(run(&mut interp, "(cons 1 (cons 2 nil))"), "(1 2)");
    }

    #[test]
    fn test_eq_identity() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(eq? (quote a) (quote a))"), "t");
        assert_eq!(run(&mut interp, "(eq? (quote a) (quote b))"), "nil");
        assert_eq!(run(&mut interp, "(eq? 3 3)"), "t");
        assert_eq!(run(&mut interp, "(eq? \"s\" \"s\")"), "t");
        // Two conses with equal content are still different cells.
        assert_eq!(run(&mut interp, "(eq? (cons 1 2) (cons 1 2))"), "nil");
        assert_eq!(
            run(&mut interp, "(let ((c (cons 1 2))) (eq? c c))"),
            "t"
        );
    }
}
