// ABOUTME: Macro expansion pass rewriting forms before evaluation
//
// Expansion is bottom-up and runs to fixpoint: a head that resolves to a
// macro is applied to its raw argument forms and the result re-expanded,
// then the children of whatever remains are expanded in turn. `quote`
// forms are opaque.

use crate::env::FrameRef;
use crate::error::Error;
use crate::eval::Interp;
use crate::value::{Cons, Value};

impl Interp {
    /// Rewrite `form` with every reachable macro application expanded.
    /// Returns the input unchanged (same cells) when nothing expands.
    pub fn macroexpand_all(&mut self, form: Value, frame: FrameRef) -> Result<Value, Error> {
        let Value::Cons(c) = form else {
            return Ok(form);
        };
        let head = self.heap.cons(c).car;
        if head == Value::Symbol(self.quote_symbol()) {
            return Ok(form);
        }
        if let Value::Symbol(s) = head {
            if let Some(Value::Macro(m)) = self.heap.resolve(frame, s) {
                let args = self.heap.cons(c).cdr;
                let expansion = self.apply_macro(m, args, frame)?;
                self.heap.root(expansion);
                let result = self.macroexpand_all(expansion, frame);
                self.heap.unroot(expansion);
                return result;
            }
        }
        self.expand_elements(form, frame)
    }

    /// Expand every element of a (possibly improper) list, rebuilding the
    /// spine. Atom tails pass through untouched.
    fn expand_elements(&mut self, form: Value, frame: FrameRef) -> Result<Value, Error> {
        let Value::Cons(c) = form else {
            return Ok(form);
        };
        let Cons { car, cdr } = *self.heap.cons(c);
        let new_car = self.macroexpand_all(car, frame)?;
        self.heap.root(new_car);
        let new_cdr = match self.expand_elements(cdr, frame) {
            Ok(v) => v,
            Err(e) => {
                self.heap.unroot(new_car);
                return Err(e);
            }
        };
        self.heap.root(new_cdr);
        let cell = self.heap.alloc_cons(Cons {
            car: new_car,
            cdr: new_cdr,
        });
        self.heap.unroot(new_cdr);
        self.heap.unroot(new_car);
        Ok(Value::Cons(cell?))
    }
}
