// ABOUTME: Evaluator module executing expanded forms with tail-call reuse
//
// `eval` is a trampoline. Special-form hooks and procedure application
// return either a finished value or a `(form, frame, tail)` continuation
// the loop re-enters, so tail calls run in constant host-stack depth.
// Argument evaluation and non-tail sub-forms recurse normally.

use crate::config::HeapConfig;
use crate::env::{Frame, FrameRef};
use crate::error::Error;
use crate::heap::Heap;
use crate::symbol::SymbolTable;
use crate::value::{Closure, Cons, MacroRef, ProcRef, Special, SymbolRef, Value};
use std::time::Instant;

/// Native procedure hook: called with the evaluated argument vector. The
/// arguments are rooted by the caller for the duration of the call.
pub type BuiltinFn = fn(&mut Interp, FrameRef, &[Value]) -> Result<Value, Error>;

/// Special form hook: called with the raw argument list and the tail flag.
pub type SpecialFn = fn(&mut Interp, Value, FrameRef, bool) -> Result<Flow, Error>;

/// What a dispatch step produced: a value, or the next trampoline state.
pub enum Flow {
    Done(Value),
    Tail {
        form: Value,
        frame: FrameRef,
        tail: bool,
    },
}

pub(crate) fn unallocated_builtin(
    _: &mut Interp,
    _: FrameRef,
    _: &[Value],
) -> Result<Value, Error> {
    Err(Error::BadApply("unallocated builtin cell".to_string()))
}

pub(crate) fn unallocated_special(
    _: &mut Interp,
    _: Value,
    _: FrameRef,
    _: bool,
) -> Result<Flow, Error> {
    Err(Error::BadForm("unallocated special form cell".to_string()))
}

/// The interpreter: heap, symbol table, and the global frame, plus the
/// few counters the builtins need. Everything is per-instance; two
/// interpreters never share state.
pub struct Interp {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub globals: FrameRef,
    sym_nil: SymbolRef,
    sym_t: SymbolRef,
    sym_do: SymbolRef,
    sym_quote: SymbolRef,
    sym_exit: SymbolRef,
    gensym_counter: u64,
    start: Instant,
    pub(crate) stdin_pending: String,
}

impl Interp {
    pub fn new() -> Result<Self, Error> {
        Self::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> Result<Self, Error> {
        let mut heap = Heap::new(config);
        let mut symbols = SymbolTable::new();

        // nil must land in symbol slot 0: default-initialized cells point
        // there and the printer treats it as the empty list.
        let sym_nil = symbols.intern(&mut heap, "nil")?;
        debug_assert_eq!(sym_nil.index(), 0);
        let sym_t = symbols.intern(&mut heap, "t")?;
        let sym_do = symbols.intern(&mut heap, "do")?;
        let sym_quote = symbols.intern(&mut heap, "quote")?;
        let sym_exit = symbols.intern(&mut heap, "exit")?;

        let globals = heap.alloc_frame(Frame::default())?;
        heap.globals = Some(globals);

        let mut interp = Interp {
            heap,
            symbols,
            globals,
            sym_nil,
            sym_t,
            sym_do,
            sym_quote,
            sym_exit,
            gensym_counter: 0,
            start: Instant::now(),
            stdin_pending: String::new(),
        };

        // Self-evaluating globals, special forms, then the builtins.
        interp.heap.bind(globals, sym_nil, Value::Symbol(sym_nil));
        interp.heap.bind(globals, sym_t, Value::Symbol(sym_t));
        interp.heap.bind(globals, sym_exit, Value::Symbol(sym_exit));
        interp.install_special_forms()?;
        crate::builtins::register(&mut interp)?;

        Ok(interp)
    }

    // ========================================================================
    // Small constructors and helpers
    // ========================================================================

    pub fn nil(&self) -> Value {
        Value::Symbol(self.sym_nil)
    }

    pub fn t(&self) -> Value {
        Value::Symbol(self.sym_t)
    }

    pub fn bool_value(&self, b: bool) -> Value {
        if b {
            self.t()
        } else {
            self.nil()
        }
    }

    pub fn is_exit(&self, v: Value) -> bool {
        v == Value::Symbol(self.sym_exit)
    }

    pub fn intern(&mut self, name: &str) -> Result<Value, Error> {
        Ok(Value::Symbol(self.symbols.intern(&mut self.heap, name)?))
    }

    pub fn make_int(&mut self, n: i64) -> Result<Value, Error> {
        Ok(Value::Int(self.heap.alloc_int(n)?))
    }

    pub fn make_string(&mut self, s: &str) -> Result<Value, Error> {
        Ok(Value::Str(self.heap.alloc_string(s.to_string())?))
    }

    pub fn cons_value(&mut self, car: Value, cdr: Value) -> Result<Value, Error> {
        Ok(Value::Cons(self.heap.alloc_cons(Cons { car, cdr })?))
    }

    pub fn new_frame(
        &mut self,
        outer: Option<FrameRef>,
        lex: Option<FrameRef>,
    ) -> Result<FrameRef, Error> {
        self.heap.alloc_frame(Frame {
            outer,
            lex,
            ..Frame::default()
        })
    }

    /// Fresh symbol from a monotone counter. The name is interned like any
    /// other, so collisions with source symbols are possible in principle
    /// and unheard of in practice.
    pub fn gensym(&mut self, prefix: &str) -> Result<Value, Error> {
        self.gensym_counter += 1;
        let name = format!("{prefix}#{}", self.gensym_counter);
        self.intern(&name)
    }

    pub fn elapsed_millis(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }

    pub(crate) fn quote_symbol(&self) -> SymbolRef {
        self.sym_quote
    }

    /// Remaining evaluated arguments rebuilt as a proper list.
    pub fn list_from_slice(&mut self, items: &[Value]) -> Result<Value, Error> {
        let mut acc = self.nil();
        self.heap.root(acc);
        for &item in items.iter().rev() {
            match self.heap.alloc_cons(Cons { car: item, cdr: acc }) {
                Ok(c) => {
                    let next = Value::Cons(c);
                    self.heap.root(next);
                    self.heap.unroot(acc);
                    acc = next;
                }
                Err(e) => {
                    self.heap.unroot(acc);
                    return Err(e);
                }
            }
        }
        self.heap.unroot(acc);
        Ok(acc)
    }

    // ========================================================================
    // The trampoline
    // ========================================================================

    /// Evaluate `form` in `frame`. `tail` marks whether the form sits in
    /// tail position of an enclosing application, which is what licenses
    /// frame reuse.
    pub fn eval(&mut self, form: Value, frame: FrameRef, tail: bool) -> Result<Value, Error> {
        let mut state = (form, frame, tail);
        self.heap.root(state.0);
        self.heap.root_frame(state.1);
        let result = self.eval_loop(&mut state);
        self.heap.unroot(state.0);
        self.heap.unroot_frame(state.1);
        result
    }

    fn eval_loop(&mut self, state: &mut (Value, FrameRef, bool)) -> Result<Value, Error> {
        loop {
            let (form, frame, tail) = *state;
            match form {
                Value::Int(_) | Value::Str(_) => return Ok(form),
                Value::Symbol(s) => {
                    return self
                        .heap
                        .resolve(frame, s)
                        .ok_or_else(|| Error::UnboundSymbol(self.heap.symbol(s).name.clone()));
                }
                Value::Cons(c) => {
                    let head = self.heap.cons(c).car;
                    if let Value::Symbol(s) = head {
                        if let Some(Value::SpecialForm(sf)) = self.heap.resolve(frame, s) {
                            let args = self.heap.cons(c).cdr;
                            let hook = self.heap.special(sf).func;
                            match hook(self, args, frame, tail)? {
                                Flow::Done(v) => return Ok(v),
                                Flow::Tail { form, frame, tail } => {
                                    self.shift(state, form, frame, tail);
                                    continue;
                                }
                            }
                        }
                    }
                    let op = self.eval(head, frame, false)?;
                    self.heap.root(op);
                    let argforms = self.heap.cons(c).cdr;
                    let step = self.apply(op, argforms, frame, tail);
                    self.heap.unroot(op);
                    match step? {
                        Flow::Done(v) => return Ok(v),
                        Flow::Tail { form, frame, tail } => self.shift(state, form, frame, tail),
                    }
                }
                // Procedures, macros, builtins, and special forms
                // evaluate to themselves.
                _ => return Ok(form),
            }
        }
    }

    /// Swap the trampoline state, keeping the new form and frame rooted
    /// before the old ones are released.
    fn shift(&mut self, state: &mut (Value, FrameRef, bool), form: Value, frame: FrameRef, tail: bool) {
        self.heap.root(form);
        self.heap.root_frame(frame);
        self.heap.unroot(state.0);
        self.heap.unroot_frame(state.1);
        *state = (form, frame, tail);
    }

    fn apply(
        &mut self,
        op: Value,
        argforms: Value,
        frame: FrameRef,
        tail: bool,
    ) -> Result<Flow, Error> {
        match op {
            Value::Proc(p) => {
                let args = self.eval_args(argforms, frame)?;
                let result = self.apply_proc(p, &args, frame, tail);
                self.unroot_all(&args);
                result
            }
            Value::Builtin(b) => {
                let args = self.eval_args(argforms, frame)?;
                let func = self.heap.builtin(b).func;
                let result = func(self, frame, &args);
                self.unroot_all(&args);
                result.map(Flow::Done)
            }
            other => Err(Error::BadApply(format!(
                "cannot apply a {}",
                other.type_name()
            ))),
        }
    }

    /// Left-to-right evaluation of a proper argument list. Every result is
    /// rooted; the caller unroots via `unroot_all` on every path.
    fn eval_args(&mut self, argforms: Value, frame: FrameRef) -> Result<Vec<Value>, Error> {
        let mut args = Vec::new();
        let mut rest = argforms;
        loop {
            match rest {
                Value::Cons(c) => {
                    let Cons { car, cdr } = *self.heap.cons(c);
                    match self.eval(car, frame, false) {
                        Ok(v) => {
                            self.heap.root(v);
                            args.push(v);
                            rest = cdr;
                        }
                        Err(e) => {
                            self.unroot_all(&args);
                            return Err(e);
                        }
                    }
                }
                _ if self.heap.is_nil(rest) => return Ok(args),
                _ => {
                    self.unroot_all(&args);
                    return Err(Error::BadApply("improper argument list".to_string()));
                }
            }
        }
    }

    fn unroot_all(&mut self, values: &[Value]) {
        for &v in values {
            self.heap.unroot(v);
        }
    }

    fn apply_proc(
        &mut self,
        p: ProcRef,
        args: &[Value],
        frame: FrameRef,
        tail: bool,
    ) -> Result<Flow, Error> {
        let Closure { params, body, env } = *self.heap.proc(p);
        let nf = self.heap.alloc_frame(Frame {
            outer: Some(frame),
            lex: Some(env),
            ..Frame::default()
        })?;
        self.heap.root_frame(nf);
        if let Err(e) = self.bind_evaluated_params(nf, params, args) {
            self.heap.unroot_frame(nf);
            return Err(e);
        }
        // The returned state is unrooted only across the allocation-free
        // gap until `shift` re-roots it.
        if tail && !self.heap.frame(frame).closed {
            self.heap.merge_frames(frame, nf);
            self.heap.unroot_frame(nf);
            Ok(Flow::Tail {
                form: body,
                frame,
                tail: true,
            })
        } else {
            self.heap.unroot_frame(nf);
            Ok(Flow::Tail {
                form: body,
                frame: nf,
                tail: true,
            })
        }
    }

    /// Lockstep walk of the parameter list against evaluated arguments. A
    /// trailing non-nil symbol takes the leftovers as a fresh list;
    /// leftovers without one are ignored.
    fn bind_evaluated_params(
        &mut self,
        nf: FrameRef,
        params: Value,
        args: &[Value],
    ) -> Result<(), Error> {
        let mut params = params;
        let mut next = 0;
        loop {
            match params {
                Value::Cons(c) => {
                    let Cons { car, cdr } = *self.heap.cons(c);
                    let Value::Symbol(s) = car else {
                        return Err(Error::BadApply("parameter is not a symbol".to_string()));
                    };
                    if next >= args.len() {
                        return Err(Error::BadApply("too few arguments".to_string()));
                    }
                    self.heap.bind(nf, s, args[next]);
                    next += 1;
                    params = cdr;
                }
                Value::Symbol(s) if !self.heap.is_nil(params) => {
                    let rest = self.list_from_slice(&args[next..])?;
                    self.heap.bind(nf, s, rest);
                    return Ok(());
                }
                _ if self.heap.is_nil(params) => return Ok(()),
                _ => return Err(Error::BadApply("malformed parameter list".to_string())),
            }
        }
    }

    /// Macro application: parameters bind the raw argument forms, a
    /// trailing symbol binds the raw tail, and the body runs in a frame
    /// whose lexical parent is the macro's definition site.
    pub(crate) fn apply_macro(
        &mut self,
        m: MacroRef,
        argforms: Value,
        frame: FrameRef,
    ) -> Result<Value, Error> {
        let Closure { params, body, env } = *self.heap.mac(m);
        let nf = self.heap.alloc_frame(Frame {
            outer: Some(frame),
            lex: Some(env),
            ..Frame::default()
        })?;
        self.heap.root_frame(nf);
        let result = match self.bind_raw_params(nf, params, argforms) {
            Ok(()) => self.eval(body, nf, true),
            Err(e) => Err(e),
        };
        self.heap.unroot_frame(nf);
        result
    }

    fn bind_raw_params(&mut self, nf: FrameRef, params: Value, args: Value) -> Result<(), Error> {
        let mut params = params;
        let mut args = args;
        loop {
            match params {
                Value::Cons(c) => {
                    let Cons { car, cdr } = *self.heap.cons(c);
                    let Value::Symbol(s) = car else {
                        return Err(Error::BadApply("parameter is not a symbol".to_string()));
                    };
                    let Value::Cons(ac) = args else {
                        return Err(if self.heap.is_nil(args) {
                            Error::BadApply("too few arguments".to_string())
                        } else {
                            Error::BadApply("improper argument list".to_string())
                        });
                    };
                    let Cons {
                        car: value,
                        cdr: arest,
                    } = *self.heap.cons(ac);
                    self.heap.bind(nf, s, value);
                    params = cdr;
                    args = arest;
                }
                Value::Symbol(s) if !self.heap.is_nil(params) => {
                    self.heap.bind(nf, s, args);
                    return Ok(());
                }
                _ if self.heap.is_nil(params) => return Ok(()),
                _ => return Err(Error::BadApply("malformed parameter list".to_string())),
            }
        }
    }

    // ========================================================================
    // Driver entry points
    // ========================================================================

    /// Lower, macro-expand, and evaluate one parsed expression at the
    /// global frame.
    pub fn run_form(&mut self, sexp: &crate::reader::Sexp) -> Result<Value, Error> {
        let form = self.lower(sexp)?;
        self.heap.root(form);
        let expanded = self.macroexpand_all(form, self.globals);
        self.heap.unroot(form);
        let expanded = expanded?;
        self.heap.root(expanded);
        let result = self.eval(expanded, self.globals, false);
        self.heap.unroot(expanded);
        result
    }

    /// Evaluate every expression in `src`, returning the last value (or
    /// `nil` for empty input).
    pub fn eval_source(&mut self, src: &str) -> Result<Value, Error> {
        let mut last = self.nil();
        self.heap.root(last);
        let mut rest = src;
        let out = loop {
            match crate::reader::parse_one(rest) {
                Ok(Some((sexp, after))) => {
                    rest = after;
                    match self.run_form(&sexp) {
                        Ok(v) => {
                            self.heap.root(v);
                            self.heap.unroot(last);
                            last = v;
                        }
                        Err(e) => break Err(e),
                    }
                }
                Ok(None) => break Ok(last),
                Err(e) => break Err(e),
            }
        };
        self.heap.unroot(last);
        out
    }

    // ========================================================================
    // Special forms
    // ========================================================================

    fn install_special_forms(&mut self) -> Result<(), Error> {
        self.install_special("if", sf_if)?;
        self.install_special("quote", sf_quote)?;
        self.install_special("do", sf_do)?;
        self.install_special("def", sf_def)?;
        self.install_special("set!", sf_set)?;
        self.install_special("let", sf_let)?;
        self.install_special("let*", sf_let_star)?;
        self.install_special("\\", sf_lambda)?;
        self.install_special("macro", sf_macro)?;
        Ok(())
    }

    fn install_special(&mut self, name: &'static str, func: SpecialFn) -> Result<(), Error> {
        let sym = self.symbols.intern(&mut self.heap, name)?;
        let cell = self.heap.alloc_special(Special { name, func })?;
        self.heap.bind(self.globals, sym, Value::SpecialForm(cell));
        Ok(())
    }

    fn special_args(&self, name: &str, args: Value) -> Result<Vec<Value>, Error> {
        self.heap
            .list_to_vec(args)
            .ok_or_else(|| Error::BadForm(format!("{name}: improper argument list")))
    }

    /// Build a closure cell for `\` or `macro` and latch the frame closed.
    fn make_closure(
        &mut self,
        name: &str,
        args: Value,
        frame: FrameRef,
        as_macro: bool,
    ) -> Result<Value, Error> {
        let Value::Cons(c) = args else {
            return Err(Error::BadForm(format!("{name}: expected a parameter list")));
        };
        let Cons {
            car: params,
            cdr: body,
        } = *self.heap.cons(c);
        match params {
            Value::Cons(_) | Value::Symbol(_) => {}
            _ => {
                return Err(Error::BadForm(format!(
                    "{name}: parameter list must be a list or symbol"
                )))
            }
        }
        let do_form = self.cons_value(Value::Symbol(self.sym_do), body)?;
        self.heap.root(do_form);
        let closure = Closure {
            params,
            body: do_form,
            env: frame,
        };
        let cell = if as_macro {
            self.heap.alloc_macro(closure).map(Value::Macro)
        } else {
            self.heap.alloc_proc(closure).map(Value::Proc)
        };
        self.heap.unroot(do_form);
        let value = cell?;
        self.heap.close_frame(frame);
        Ok(value)
    }
}

fn sf_if(interp: &mut Interp, args: Value, frame: FrameRef, tail: bool) -> Result<Flow, Error> {
    let items = interp.special_args("if", args)?;
    if items.len() != 2 && items.len() != 3 {
        return Err(Error::BadForm("if: expected 2 or 3 arguments".to_string()));
    }
    let cond = interp.eval(items[0], frame, false)?;
    if !interp.heap.is_nil(cond) {
        Ok(Flow::Tail {
            form: items[1],
            frame,
            tail,
        })
    } else if items.len() == 3 {
        Ok(Flow::Tail {
            form: items[2],
            frame,
            tail,
        })
    } else {
        Ok(Flow::Done(interp.nil()))
    }
}

fn sf_quote(interp: &mut Interp, args: Value, _frame: FrameRef, _tail: bool) -> Result<Flow, Error> {
    let items = interp.special_args("quote", args)?;
    if items.len() != 1 {
        return Err(Error::BadForm("quote: expected 1 argument".to_string()));
    }
    Ok(Flow::Done(items[0]))
}

fn sf_do(interp: &mut Interp, args: Value, frame: FrameRef, tail: bool) -> Result<Flow, Error> {
    let items = interp.special_args("do", args)?;
    let Some((&last, init)) = items.split_last() else {
        return Ok(Flow::Done(interp.nil()));
    };
    for &form in init {
        interp.eval(form, frame, false)?;
    }
    Ok(Flow::Tail {
        form: last,
        frame,
        tail,
    })
}

/// `def` always binds in the global frame, making the symbol a special
/// variable from then on.
fn sf_def(interp: &mut Interp, args: Value, frame: FrameRef, _tail: bool) -> Result<Flow, Error> {
    let items = interp.special_args("def", args)?;
    if items.len() != 2 {
        return Err(Error::BadForm("def: expected 2 arguments".to_string()));
    }
    let Value::Symbol(s) = items[0] else {
        return Err(Error::BadForm(
            "def: first argument must be a symbol".to_string(),
        ));
    };
    let value = interp.eval(items[1], frame, false)?;
    let globals = interp.globals;
    interp.heap.bind(globals, s, value);
    Ok(Flow::Done(Value::Symbol(s)))
}

/// `set!` stores where the symbol already resolves, or in the global
/// frame when it does not resolve at all.
fn sf_set(interp: &mut Interp, args: Value, frame: FrameRef, _tail: bool) -> Result<Flow, Error> {
    let items = interp.special_args("set!", args)?;
    if items.len() != 2 {
        return Err(Error::BadForm("set!: expected 2 arguments".to_string()));
    }
    let Value::Symbol(s) = items[0] else {
        return Err(Error::BadForm(
            "set!: first argument must be a symbol".to_string(),
        ));
    };
    let value = interp.eval(items[1], frame, false)?;
    let target = interp.heap.resolve_env(frame, s).unwrap_or(interp.globals);
    interp.heap.bind(target, s, value);
    Ok(Flow::Done(value))
}

fn sf_let(interp: &mut Interp, args: Value, frame: FrameRef, tail: bool) -> Result<Flow, Error> {
    let (pairs, body) = let_parts(interp, "let", args)?;

    // All binding values are evaluated in the current frame before any of
    // them becomes visible.
    let mut bound: Vec<(SymbolRef, Value)> = Vec::with_capacity(pairs.len());
    for (sym, form) in pairs {
        match interp.eval(form, frame, false) {
            Ok(v) => {
                interp.heap.root(v);
                bound.push((sym, v));
            }
            Err(e) => {
                for (_, v) in bound {
                    interp.heap.unroot(v);
                }
                return Err(e);
            }
        }
    }
    let nf = match interp.new_frame(Some(frame), Some(frame)) {
        Ok(f) => f,
        Err(e) => {
            for (_, v) in bound {
                interp.heap.unroot(v);
            }
            return Err(e);
        }
    };
    interp.heap.root_frame(nf);
    for (sym, v) in bound {
        interp.heap.bind(nf, sym, v);
        interp.heap.unroot(v);
    }
    finish_let(interp, nf, body, frame, tail)
}

fn sf_let_star(
    interp: &mut Interp,
    args: Value,
    frame: FrameRef,
    tail: bool,
) -> Result<Flow, Error> {
    let (pairs, body) = let_parts(interp, "let*", args)?;

    // Each value sees the bindings before it: evaluate inside the new
    // frame as it grows.
    let nf = interp.new_frame(Some(frame), Some(frame))?;
    interp.heap.root_frame(nf);
    for (sym, form) in pairs {
        match interp.eval(form, nf, false) {
            Ok(v) => interp.heap.bind(nf, sym, v),
            Err(e) => {
                interp.heap.unroot_frame(nf);
                return Err(e);
            }
        }
    }
    finish_let(interp, nf, body, frame, tail)
}

/// Split `((k1 v1) ... (kn vn)) body...` into checked pairs and the body.
fn let_parts(
    interp: &Interp,
    name: &str,
    args: Value,
) -> Result<(Vec<(SymbolRef, Value)>, Value), Error> {
    let Value::Cons(c) = args else {
        return Err(Error::BadForm(format!("{name}: expected a binding list")));
    };
    let Cons {
        car: bindings,
        cdr: body,
    } = *interp.heap.cons(c);
    let binding_forms = interp
        .heap
        .list_to_vec(bindings)
        .ok_or_else(|| Error::BadForm(format!("{name}: bindings must be a proper list")))?;
    let mut pairs = Vec::with_capacity(binding_forms.len());
    for form in binding_forms {
        let pair = interp
            .heap
            .list_to_vec(form)
            .filter(|p| p.len() == 2)
            .ok_or_else(|| Error::BadForm(format!("{name}: binding must be (symbol value)")))?;
        let Value::Symbol(s) = pair[0] else {
            return Err(Error::BadForm(format!(
                "{name}: binding name must be a symbol"
            )));
        };
        pairs.push((s, pair[1]));
    }
    Ok((pairs, body))
}

/// Shared tail of `let`/`let*`: pick the frame (folding the bindings into
/// a non-closed caller under TCO), run all but the last body form, and
/// hand the last to the trampoline. `nf` arrives rooted and leaves
/// unrooted.
fn finish_let(
    interp: &mut Interp,
    nf: FrameRef,
    body: Value,
    frame: FrameRef,
    tail: bool,
) -> Result<Flow, Error> {
    let target = if tail && !interp.heap.frame(frame).closed {
        // Bindings only: the let introduces no new lexical parent, and
        // the caller's must stay intact for its free variables.
        interp.heap.merge_bindings(frame, nf);
        frame
    } else {
        nf
    };
    let items = match interp.heap.list_to_vec(body) {
        Some(items) => items,
        None => {
            interp.heap.unroot_frame(nf);
            return Err(Error::BadForm("let: improper body".to_string()));
        }
    };
    let Some((&last, init)) = items.split_last() else {
        interp.heap.unroot_frame(nf);
        return Ok(Flow::Done(interp.nil()));
    };
    for &form in init {
        if let Err(e) = interp.eval(form, target, false) {
            interp.heap.unroot_frame(nf);
            return Err(e);
        }
    }
    interp.heap.unroot_frame(nf);
    Ok(Flow::Tail {
        form: last,
        frame: target,
        tail,
    })
}

fn sf_lambda(interp: &mut Interp, args: Value, frame: FrameRef, _tail: bool) -> Result<Flow, Error> {
    interp.make_closure("\\", args, frame, false).map(Flow::Done)
}

fn sf_macro(interp: &mut Interp, args: Value, frame: FrameRef, _tail: bool) -> Result<Flow, Error> {
    interp.make_closure("macro", args, frame, true).map(Flow::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::display;

    fn setup() -> Interp {
        Interp::new().expect("interpreter should boot")
    }

    fn run(interp: &mut Interp, src: &str) -> String {
        let v = interp.eval_source(src).expect("evaluation should succeed");
        display(&interp.heap, v)
    }

    fn run_err(interp: &mut Interp, src: &str) -> Error {
        interp
            .eval_source(src)
            .expect_err("evaluation should fail")
    }

    #[test]
    fn test_self_evaluating_atoms() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "42"), "42");
        assert_eq!(run(&mut interp, "-3"), "-3");
        assert_eq!(run(&mut interp, "\"hi\""), "hi");
    }

    #[test]
    fn test_symbol_resolution() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "t"), "t");
        assert_eq!(run(&mut interp, "nil"), "nil");
    }

    #[test]
    fn test_unbound_symbol() {
        let mut interp = setup();
        assert_eq!(
            run_err(&mut interp, "no-such-thing"),
            Error::UnboundSymbol("no-such-thing".to_string())
        );
    }

    #[test]
    fn test_quote_returns_form_unevaluated() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "(quote (1 2 3))"), "(1 2 3)");
        assert_eq!(run(&mut interp, "(quote no-such-thing)"), "no-such-thing");
    }

    #[test]
    fn test_quote_arity() {
        let mut interp = setup();
        assert!(matches!(
            run_err(&mut interp, "(quote 1 2)"),
            Error::BadForm(_)
        ));
    }

    #[test]
    fn test_if_branches() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "(if t 1 2)"), "1");
        assert_eq!(run(&mut interp, "(if nil 1 2)"), "2");
        assert_eq!(run(&mut interp, "(if nil 1)"), "nil");
        // Anything non-nil is true, including 0.
        assert_eq!(run(&mut interp, "(if 0 1 2)"), "1");
    }

    #[test]
    fn test_do_sequences_and_returns_last() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "(do 1 2 3)"), "3");
        assert_eq!(run(&mut interp, "(do)"), "nil");
        assert_eq!(run(&mut interp, "(do (def seq-x 5) seq-x)"), "5");
    }

    #[test]
    fn test_def_binds_globally_and_returns_symbol() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "(def answer 42)"), "answer");
        assert_eq!(run(&mut interp, "answer"), "42");
    }

    #[test]
    fn test_def_inside_frame_still_binds_globally() {
        let mut interp = setup();
        run(&mut interp, "(let ((x 1)) (def leaked 9))");
        assert_eq!(run(&mut interp, "leaked"), "9");
    }

    #[test]
    fn test_def_wants_symbol() {
        let mut interp = setup();
        assert!(matches!(run_err(&mut interp, "(def 3 x)"), Error::BadForm(_)));
    }

    #[test]
    fn test_set_updates_defining_frame() {
        let mut interp = setup();
        run(&mut interp, "(def counter 0)");
        assert_eq!(run(&mut interp, "(set! counter 5)"), "5");
        assert_eq!(run(&mut interp, "counter"), "5");
    }

    #[test]
    fn test_set_unresolved_defaults_to_global() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "(set! fresh-var 1)"), "1");
        assert_eq!(run(&mut interp, "fresh-var"), "1");
    }

    #[test]
    fn test_let_simultaneous_visibility() {
        let mut interp = setup();
        run(&mut interp, "(def lx 10)");
        // The second binding sees the outer lx, not the first binding.
        assert_eq!(
            run(&mut interp, "(let ((lx 1) (ly (+ lx 1))) ly)"),
            "11"
        );
    }

    #[test]
    fn test_let_star_sequential_visibility() {
        let mut interp = setup();
        assert_eq!(
            run(&mut interp, "(let* ((a 1) (b (+ a 1)) (c (+ b 1))) c)"),
            "3"
        );
    }

    #[test]
    fn test_let_shadowing_is_scoped() {
        let mut interp = setup();
        run(&mut interp, "(def sx 100)");
        assert_eq!(run(&mut interp, "(let ((sx 1)) sx)"), "1");
        assert_eq!(run(&mut interp, "sx"), "100");
    }

    #[test]
    fn test_let_malformed_bindings() {
        let mut interp = setup();
        assert!(matches!(
            run_err(&mut interp, "(let (x) x)"),
            Error::BadForm(_)
        ));
        assert!(matches!(
            run_err(&mut interp, "(let ((1 2)) 3)"),
            Error::BadForm(_)
        ));
    }

    #[test]
    fn test_lambda_application() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "((\\ (x) x) 42)"), "42");
        assert_eq!(run(&mut interp, "((\\ (a b) (+ a b)) 1 2)"), "3");
    }

    #[test]
    fn test_lambda_body_is_implicit_do() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "((\\ (x) 1 2 x) 7)"), "7");
        assert_eq!(run(&mut interp, "((\\ ()))"), "nil");
    }

    #[test]
    fn test_too_few_arguments() {
        let mut interp = setup();
        assert!(matches!(
            run_err(&mut interp, "((\\ (a b) a) 1)"),
            Error::BadApply(_)
        ));
    }

    #[test]
    fn test_surplus_arguments_ignored() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "((\\ (a) a) 1 2 3)"), "1");
    }

    #[test]
    fn test_rest_parameter_collects_list() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "((\\ (a . rest) rest) 1 2 3)"), "(2 3)");
        assert_eq!(run(&mut interp, "((\\ (a . rest) rest) 1)"), "nil");
        assert_eq!(run(&mut interp, "((\\ all all) 1 2)"), "(1 2)");
    }

    #[test]
    fn test_apply_non_callable() {
        let mut interp = setup();
        assert!(matches!(run_err(&mut interp, "(1 2 3)"), Error::BadApply(_)));
        assert!(matches!(
            run_err(&mut interp, "(\"s\" 1)"),
            Error::BadApply(_)
        ));
    }

    #[test]
    fn test_closure_captures_definition_frame() {
        let mut interp = setup();
        run(
            &mut interp,
            "(def make-adder (\\ (x) (\\ (y) (+ x y))))",
        );
        run(&mut interp, "(def add3 (make-adder 3))");
        assert_eq!(run(&mut interp, "(add3 4)"), "7");
        // The captured frame survives further calls.
        run(&mut interp, "(def add10 (make-adder 10))");
        assert_eq!(run(&mut interp, "(add3 1)"), "4");
        assert_eq!(run(&mut interp, "(add10 1)"), "11");
    }

    #[test]
    fn test_lexical_capture_beats_caller_bindings() {
        let mut interp = setup();
        assert_eq!(
            run(
                &mut interp,
                "(let ((x 10)) (let ((f (\\ () x))) (let ((x 20)) (f))))"
            ),
            "10"
        );
    }

    #[test]
    fn test_dynamic_variable_override() {
        let mut interp = setup();
        run(&mut interp, "(def depth 1)");
        run(&mut interp, "(def probe (\\ () depth))");
        assert_eq!(run(&mut interp, "(probe)"), "1");
        assert_eq!(run(&mut interp, "(let ((depth 2)) (probe))"), "2");
        assert_eq!(run(&mut interp, "(probe)"), "1");
    }

    #[test]
    fn test_deep_tail_recursion_is_constant_stack() {
        let mut interp = setup();
        run(
            &mut interp,
            "(def accum (\\ (n s) (if (= n 0) s (accum (- n 1) (+ s n)))))",
        );
        assert_eq!(run(&mut interp, "(accum 100000 0)"), "5000050000");
    }

    #[test]
    fn test_tail_call_through_do_and_let() {
        let mut interp = setup();
        run(
            &mut interp,
            "(def spin (\\ (n) (do (let ((m (- n 1))) (if (= m 0) (quote done) (spin m))))))",
        );
        assert_eq!(run(&mut interp, "(spin 50000)"), "done");
    }

    #[test]
    fn test_mutual_tail_recursion() {
        let mut interp = setup();
        run(&mut interp, "(def even? (\\ (n) (if (= n 0) t (odd? (- n 1)))))");
        run(&mut interp, "(def odd? (\\ (n) (if (= n 0) nil (even? (- n 1)))))");
        assert_eq!(run(&mut interp, "(even? 30000)"), "t");
        assert_eq!(run(&mut interp, "(odd? 30001)"), "t");
    }

    #[test]
    fn test_tail_let_keeps_lexical_parent() {
        let mut interp = setup();
        // The let sits in tail position of the inner procedure, whose
        // frame reaches the free `x` through its lexical parent. Folding
        // the let's bindings in must not touch that chain.
        assert_eq!(
            run(&mut interp, "(((\\ (x) (\\ (n) (let ((m n)) x))) 42) 7)"),
            "42"
        );
    }

    #[test]
    fn test_tail_call_into_closure_sees_captured_bindings() {
        let mut interp = setup();
        run(&mut interp, "(def g (\\ (z) (\\ () z)))");
        run(&mut interp, "(def h (g 5))");
        // The tail call reuses lp's frame; lp's own z must not linger
        // and shadow the z that h closed over.
        run(&mut interp, "(def lp (\\ (z dummy) (h)))");
        assert_eq!(run(&mut interp, "(lp 1 2)"), "5");
    }

    #[test]
    fn test_closed_frame_not_merged_over() {
        let mut interp = setup();
        // The inner lambda closes over its frame; the tail call must not
        // clobber the captured binding.
        run(
            &mut interp,
            "(def spin2 (\\ (n acc)
               (if (= n 0)
                   acc
                   (let ((grab (\\ () n)))
                     (spin2 (- n 1) (grab))))))",
        );
        assert_eq!(run(&mut interp, "(spin2 5 99)"), "1");
    }

    #[test]
    fn test_special_form_values_self_evaluate() {
        let mut interp = setup();
        assert_eq!(run(&mut interp, "if"), "#<special if>");
        assert_eq!(run(&mut interp, "(eval if)"), "#<special if>");
    }

    #[test]
    fn test_gensym_distinct() {
        let mut interp = setup();
        let a = interp.gensym("g").unwrap();
        let b = interp.gensym("g").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_roots_balanced_after_run() {
        let mut interp = setup();
        let before = interp.heap.root_count();
        run(&mut interp, "(def f (\\ (n) (if (= n 0) 0 (f (- n 1))))) (f 500)");
        let after = interp.heap.root_count();
        // Only the permanently rooted symbols interned by the run remain.
        let interned_delta = after - before;
        run(&mut interp, "(f 500)");
        assert_eq!(interp.heap.root_count(), before + interned_delta);
    }
}
