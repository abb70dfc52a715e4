// ABOUTME: Value types representing Lisp data structures and expressions

use crate::env::FrameRef;
use crate::eval::{BuiltinFn, SpecialFn};
use crate::heap::Heap;

macro_rules! handle_types {
    ($($name:ident),* $(,)?) => {
        $(
            /// Index of a cell inside its pool. Copying the handle never
            /// copies the cell; equality is cell identity.
            #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
            pub struct $name(pub(crate) u32);

            impl $name {
                pub(crate) fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

handle_types!(
    ConsRef, SymbolRef, IntRef, StrRef, SpecialRef, ProcRef, BuiltinRef, MacroRef,
);

/// A runtime datum: a typed handle into one of the heap pools.
///
/// Derived equality is handle identity, which matches `eq?` for every
/// variant except `Int` and `Str` (those compare by value; see
/// [`Heap::eq_values`]).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Value {
    Cons(ConsRef),
    Symbol(SymbolRef),
    Int(IntRef),
    Str(StrRef),
    SpecialForm(SpecialRef),
    Proc(ProcRef),
    Builtin(BuiltinRef),
    Macro(MacroRef),
}

impl Value {
    /// Tag name used in diagnostics.
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Cons(_) => "cons",
            Value::Symbol(_) => "symbol",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::SpecialForm(_) => "special form",
            Value::Proc(_) => "procedure",
            Value::Builtin(_) => "builtin",
            Value::Macro(_) => "macro",
        }
    }
}

impl Default for Value {
    /// Symbol slot 0 is always the interned `nil`; see `Interp::new`.
    /// Unallocated cells carry this default and are never traced.
    fn default() -> Self {
        Value::Symbol(SymbolRef(0))
    }
}

/// The two-field record backing every list.
#[derive(Copy, Clone, Default, Debug)]
pub struct Cons {
    pub car: Value,
    pub cdr: Value,
}

/// An interned identifier. The name is immutable once allocated.
#[derive(Clone, Default, Debug)]
pub struct Symbol {
    pub name: String,
}

/// Shared payload of `Proc` and `Macro` cells: a parameter list form, a
/// body form (always `(do ...)`), and the frame captured at construction.
#[derive(Copy, Clone, Debug)]
pub struct Closure {
    pub params: Value,
    pub body: Value,
    pub env: FrameRef,
}

impl Default for Closure {
    fn default() -> Self {
        Closure {
            params: Value::default(),
            body: Value::default(),
            // Frame slot 0 is the global frame; unallocated cells are
            // never traced, so this placeholder is inert.
            env: FrameRef(0),
        }
    }
}

/// A native procedure applied to an evaluated argument vector.
#[derive(Copy, Clone, Debug)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl Default for Builtin {
    fn default() -> Self {
        Builtin {
            name: "",
            func: crate::eval::unallocated_builtin,
        }
    }
}

/// An evaluator hook receiving its argument forms unevaluated.
#[derive(Copy, Clone, Debug)]
pub struct Special {
    pub name: &'static str,
    pub func: SpecialFn,
}

impl Default for Special {
    fn default() -> Self {
        Special {
            name: "",
            func: crate::eval::unallocated_special,
        }
    }
}

/// The union of everything the collector traces: the eight value variants
/// plus environment frames, which are heap cells but not first-class values.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum GcRef {
    Cons(ConsRef),
    Symbol(SymbolRef),
    Int(IntRef),
    Str(StrRef),
    SpecialForm(SpecialRef),
    Proc(ProcRef),
    Builtin(BuiltinRef),
    Macro(MacroRef),
    Frame(FrameRef),
}

impl From<Value> for GcRef {
    fn from(v: Value) -> Self {
        match v {
            Value::Cons(r) => GcRef::Cons(r),
            Value::Symbol(r) => GcRef::Symbol(r),
            Value::Int(r) => GcRef::Int(r),
            Value::Str(r) => GcRef::Str(r),
            Value::SpecialForm(r) => GcRef::SpecialForm(r),
            Value::Proc(r) => GcRef::Proc(r),
            Value::Builtin(r) => GcRef::Builtin(r),
            Value::Macro(r) => GcRef::Macro(r),
        }
    }
}

// ============================================================================
// Value inspection helpers
// ============================================================================

impl Heap {
    /// The `nil` symbol doubles as the empty list and as false.
    pub fn is_nil(&self, v: Value) -> bool {
        matches!(v, Value::Symbol(s) if self.symbol(s).name == "nil")
    }

    /// A proper list is a cons chain terminated by `nil`. `nil` itself
    /// qualifies.
    pub fn is_proper_list(&self, v: Value) -> bool {
        let mut cur = v;
        loop {
            match cur {
                Value::Cons(c) => cur = self.cons(c).cdr,
                _ => return self.is_nil(cur),
            }
        }
    }

    /// Collect the elements of a proper list. `None` for improper lists.
    pub fn list_to_vec(&self, v: Value) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cur = v;
        loop {
            match cur {
                Value::Cons(c) => {
                    let cell = *self.cons(c);
                    items.push(cell.car);
                    cur = cell.cdr;
                }
                _ if self.is_nil(cur) => return Some(items),
                _ => return None,
            }
        }
    }

    /// `eq?`: handle identity, except ints and strings which compare by
    /// value.
    pub fn eq_values(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => self.int(x) == self.int(y),
            (Value::Str(x), Value::Str(y)) => self.string(x) == self.string(y),
            _ => a == b,
        }
    }

    /// Structural equality: recurses through conses, bottoms out at `eq?`.
    #[allow(dead_code)]
    pub fn equal_values(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Cons(x), Value::Cons(y)) => {
                let (x, y) = (*self.cons(x), *self.cons(y));
                self.equal_values(x.car, y.car) && self.equal_values(x.cdr, y.cdr)
            }
            _ => self.eq_values(a, b),
        }
    }
}

// ============================================================================
// Printing
// ============================================================================

/// User-facing print: strings appear raw.
pub fn display(heap: &Heap, v: Value) -> String {
    let mut out = String::new();
    write_value(heap, v, false, &mut out);
    out
}

/// Round-trippable print: strings are quoted with their escapes restored.
pub fn readable(heap: &Heap, v: Value) -> String {
    let mut out = String::new();
    write_value(heap, v, true, &mut out);
    out
}

fn write_value(heap: &Heap, v: Value, readable: bool, out: &mut String) {
    match v {
        Value::Int(r) => out.push_str(&heap.int(r).to_string()),
        Value::Symbol(r) => out.push_str(&heap.symbol(r).name),
        Value::Str(r) => {
            if readable {
                write_quoted(heap.string(r), out);
            } else {
                out.push_str(heap.string(r));
            }
        }
        Value::Cons(r) => {
            out.push('(');
            let cell = *heap.cons(r);
            write_value(heap, cell.car, readable, out);
            let mut rest = cell.cdr;
            loop {
                match rest {
                    Value::Cons(c) => {
                        let cell = *heap.cons(c);
                        out.push(' ');
                        write_value(heap, cell.car, readable, out);
                        rest = cell.cdr;
                    }
                    _ if heap.is_nil(rest) => break,
                    _ => {
                        out.push_str(" . ");
                        write_value(heap, rest, readable, out);
                        break;
                    }
                }
            }
            out.push(')');
        }
        Value::Proc(_) => out.push_str("#<proc>"),
        Value::Macro(_) => out.push_str("#<macro>"),
        Value::Builtin(r) => {
            out.push_str("#<builtin ");
            out.push_str(heap.builtin(r).name);
            out.push('>');
        }
        Value::SpecialForm(r) => {
            out.push_str("#<special ");
            out.push_str(heap.special(r).name);
            out.push('>');
        }
    }
}

fn write_quoted(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{8}' => out.push_str("\\b"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
}
