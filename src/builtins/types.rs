//! Type predicates: nil?, cons?, list?, symbol?, int?, string?, proc?, bound?
//!
//! All take one argument and answer `t` or `nil`.
//!
//! - `list?` accepts proper lists only, `nil` included
//! - `proc?` accepts interpreted procedures and builtins alike
//! - `bound?` asks whether a symbol resolves in the calling frame

use crate::env::FrameRef;
use crate::error::Error;
use crate::eval::Interp;
use crate::value::Value;

fn one_arg(name: &str, args: &[Value]) -> Result<Value, Error> {
    match args {
        [v] => Ok(*v),
        _ => Err(Error::arity(name, "1")),
    }
}

pub fn builtin_nil_p(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let v = one_arg("nil?", args)?;
    Ok(interp.bool_value(interp.heap.is_nil(v)))
}

pub fn builtin_cons_p(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let v = one_arg("cons?", args)?;
    Ok(interp.bool_value(matches!(v, Value::Cons(_))))
}

pub fn builtin_list_p(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let v = one_arg("list?", args)?;
    Ok(interp.bool_value(interp.heap.is_proper_list(v)))
}

pub fn builtin_symbol_p(
    interp: &mut Interp,
    _frame: FrameRef,
    args: &[Value],
) -> Result<Value, Error> {
    let v = one_arg("symbol?", args)?;
    Ok(interp.bool_value(matches!(v, Value::Symbol(_))))
}

pub fn builtin_int_p(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let v = one_arg("int?", args)?;
    Ok(interp.bool_value(matches!(v, Value::Int(_))))
}

pub fn builtin_string_p(
    interp: &mut Interp,
    _frame: FrameRef,
    args: &[Value],
) -> Result<Value, Error> {
    let v = one_arg("string?", args)?;
    Ok(interp.bool_value(matches!(v, Value::Str(_))))
}

pub fn builtin_proc_p(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let v = one_arg("proc?", args)?;
    Ok(interp.bool_value(matches!(v, Value::Proc(_) | Value::Builtin(_))))
}

/// True when the symbol resolves from the calling frame, via whichever
/// lookup rule applies to it.
pub fn builtin_bound_p(interp: &mut Interp, frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let v = one_arg("bound?", args)?;
    let Value::Symbol(s) = v else {
        return Err(Error::BadApply(format!(
            "bound?: expected symbol, got {}",
            v.type_name()
        )));
    };
    Ok(interp.bool_value(interp.heap.resolve(frame, s).is_some()))
}

/// Register all type predicates in the global frame.
pub fn register(interp: &mut Interp) -> Result<(), Error> {
    super::install(interp, "nil?", builtin_nil_p)?;
    super::install(interp, "cons?", builtin_cons_p)?;
    super::install(interp, "list?", builtin_list_p)?;
    super::install(interp, "symbol?", builtin_symbol_p)?;
    super::install(interp, "int?", builtin_int_p)?;
    super::install(interp, "string?", builtin_string_p)?;
    super::install(interp, "proc?", builtin_proc_p)?;
    super::install(interp, "bound?", builtin_bound_p)?;
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
    fn test_nil_p() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(nil? nil)"), "t");
        assert_eq!(run(&mut interp, "(nil? (quote ()))"), "t");
        assert_eq!(run(&mut interp, "(nil? 0)"), "nil");
    }

    #[test]
    fn test_cons_and_list_p() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(cons? (cons 1 2))"), "t");
        assert_eq!(run(&mut interp, "(cons? nil)"), "nil");
        assert_eq!(run(&mut interp, "(list? (quote (1 2)))"), "t");
        assert_eq!(run(&mut interp, "(list? nil)"), "t");
        assert_eq!(run(&mut interp, "(list? (cons 1 2))"), "nil");
    }

    #[test]
    fn test_atom_predicates() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(symbol? (quote a))"), "t");
        assert_eq!(run(&mut interp, "(symbol? \"a\")"), "nil");
        assert_eq!(run(&mut interp, "(int? 3)"), "t");
        assert_eq!(run(&mut interp, "(int? \"3\")"), "nil");
        assert_eq!(run(&mut interp, "(string? \"3\")"), "t");
    }

    #[test]
    fn test_proc_p() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(proc? car)"), "t");
        assert_eq!(run(&mut interp, "(proc? (\\ (x) x))"), "t");
        assert_eq!(run(&mut interp, "(proc? 3)"), "nil");
    }

    #[test]
    fn test_bound_p() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(bound? (quote car))"), "t");
        assert_eq!(run(&mut interp, "(bound? (quote zzz))"), "nil");
        assert_eq!(
            run(&mut interp, "(let ((local 1)) (bound? (quote local)))"),
            "t"
        );
        assert!(interp.eval_source("(bound? 3)").is_err());
    }
}
