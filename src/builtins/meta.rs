//! Reflection and environment builtins: eval, macroexpand-all, gensym,
//! load, get-time
//!
//! `load` reads a whole file up front (closing the handle before any
//! evaluation), then expands and evaluates every form. Failures of any
//! kind are caught, reported as `Load failed.`, and turned into `nil`;
//! only heap exhaustion propagates.

use crate::env::FrameRef;
use crate::error::Error;
use crate::eval::Interp;
use crate::value::Value;

/// Evaluates its argument in the calling frame.
pub fn builtin_eval(interp: &mut Interp, frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    match args {
        [form] => interp.eval(*form, frame, false),
        _ => Err(Error::arity("eval", "1")),
    }
}

/// Expands every macro application in its argument, in the calling frame.
pub fn builtin_macroexpand_all(
    interp: &mut Interp,
    frame: FrameRef,
    args: &[Value],
) -> Result<Value, Error> {
    match args {
        [form] => interp.macroexpand_all(*form, frame),
        _ => Err(Error::arity("macroexpand-all", "1")),
    }
}

/// A fresh symbol, optionally with a string prefix.
pub fn builtin_gensym(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    match args {
        [] => interp.gensym("g"),
        [Value::Str(r)] => {
            let prefix = interp.heap.string(*r).clone();
            interp.gensym(&prefix)
        }
        [other] => Err(Error::BadApply(format!(
            "gensym: expected string prefix, got {}",
            other.type_name()
        ))),
        _ => Err(Error::arity("gensym", "0-1")),
    }
}

/// Reads and evaluates all forms of a file. `t` on success; on any
/// failure prints `Load failed.` and answers `nil`.
pub fn builtin_load(interp: &mut Interp, _frame: FrameRef, args: &[Value]) -> Result<Value, Error> {
    let path = match args {
        [Value::Str(r)] => interp.heap.string(*r).clone(),
        [other] => {
            return Err(Error::BadApply(format!(
                "load: expected string path, got {}",
                other.type_name()
            )))
        }
        _ => return Err(Error::arity("load", "1")),
    };
    match load_file(interp, &path) {
        Ok(()) => Ok(interp.t()),
        Err(Error::HeapExhausted) => Err(Error::HeapExhausted),
        Err(_) => {
            println!("Load failed.");
            Ok(interp.nil())
        }
    }
}

fn load_file(interp: &mut Interp, path: &str) -> Result<(), Error> {
    let source =
        std::fs::read_to_string(path).map_err(|e| Error::Parse(format!("{path}: {e}")))?;
    interp.eval_source(&source)?;
    Ok(())
}

/// Milliseconds on the interpreter's monotonic clock.
pub fn builtin_get_time(
    interp: &mut Interp,
    _frame: FrameRef,
    args: &[Value],
) -> Result<Value, Error> {
    if !args.is_empty() {
        return Err(Error::arity("get-time", "0"));
    }
    let millis = interp.elapsed_millis();
    interp.make_int(millis)
}

/// Register all meta builtins in the global frame.
pub fn register(interp: &mut Interp) -> Result<(), Error> {
    super::install(interp, "eval", builtin_eval)?;
    super::install(interp, "macroexpand-all", builtin_macroexpand_all)?;
    super::install(interp, "gensym", builtin_gensym)?;
    super::install(interp, "load", builtin_load)?;
    super::install(interp, "get-time", builtin_get_time)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::display;
    use std::io::Write;

    fn run(interp: &mut Interp, src: &str) -> String {
        let v = interp.eval_source(src).expect("evaluation should succeed");
        display(&interp.heap, v)
    }

    #[test]
    fn test_eval_builtin() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(eval (quote (+ 1 2)))"), "3");
        assert_eq!(run(&mut interp, "(eval 5)"), "5");
    }

    #[test]
    fn test_eval_sees_calling_frame() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(
            run(&mut interp, "(let ((x 9)) (eval (quote x)))"),
            "9"
        );
    }

    #[test]
    fn test_macroexpand_all_builtin() {
        let mut interp = Interp::new().unwrap();
        run(
            &mut interp,
            "(def twice (macro (x) (cons (quote +) (cons x (cons x (quote ()))))))",
        );
        assert_eq!(
            run(&mut interp, "(macroexpand-all (quote (twice 4)))"),
            "(+ 4 4)"
        );
    }

    #[test]
    fn test_gensym_unique_and_prefixed() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(eq? (gensym) (gensym))"), "nil");
        let name = run(&mut interp, "(gensym \"tmp\")");
        assert!(name.starts_with("tmp"), "got {name}");
        assert!(interp.eval_source("(gensym 3)").is_err());
    }

    #[test]
    fn test_load_evaluates_file() {
        let mut interp = Interp::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.lisp");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "(def loaded-value 41)").unwrap();
        writeln!(f, "(def bump (\\ (n) (+ n 1)))").unwrap();
        drop(f);

        let src = format!("(load \"{}\")", path.display());
        assert_eq!(run(&mut interp, &src), "t");
        assert_eq!(run(&mut interp, "(bump loaded-value)"), "42");
    }

    #[test]
    fn test_load_missing_file_returns_nil() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(run(&mut interp, "(load \"no/such/file.lisp\")"), "nil");
    }

    #[test]
    fn test_load_failure_leaves_interp_usable() {
        let mut interp = Interp::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.lisp");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "(def ok 1)").unwrap();
        writeln!(f, "(this-is-unbound)").unwrap();
        drop(f);

        let src = format!("(load \"{}\")", path.display());
        assert_eq!(run(&mut interp, &src), "nil");
        // Forms before the failure took effect and the session goes on.
        assert_eq!(run(&mut interp, "ok"), "1");
        assert_eq!(run(&mut interp, "(+ 1 1)"), "2");
    }

    #[test]
    fn test_get_time_monotonic() {
        let mut interp = Interp::new().unwrap();
        let a = run(&mut interp, "(get-time)").parse::<i64>().unwrap();
        let b = run(&mut interp, "(get-time)").parse::<i64>().unwrap();
        assert!(b >= a);
        assert!(a >= 0);
    }
}
