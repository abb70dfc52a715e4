// ABOUTME: Environment module for managing variable bindings and scopes

use crate::heap::Heap;
use crate::value::{SymbolRef, Value};
use indexmap::IndexMap;

/// Index of a frame cell in the frame pool. Frames are garbage collected
/// like values but are not first-class: programs only reach them through
/// closures.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FrameRef(pub(crate) u32);

impl FrameRef {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One binding frame.
///
/// `outer` is the dynamic (caller) chain; `lex` the lexical (definition
/// site) chain. `closed` latches when a closure captures the frame, after
/// which the frame must never be merged over.
#[derive(Clone, Default, Debug)]
pub struct Frame {
    pub bindings: IndexMap<SymbolRef, Value>,
    pub outer: Option<FrameRef>,
    pub lex: Option<FrameRef>,
    pub closed: bool,
}

impl Heap {
    /// Installs or overwrites a binding in this frame.
    pub fn bind(&mut self, frame: FrameRef, sym: SymbolRef, value: Value) {
        self.frame_mut(frame).bindings.insert(sym, value);
    }

    /// A symbol is a special (dynamic) variable iff it is currently bound
    /// in the global frame. Checked anew at every resolution.
    pub fn is_special_var(&self, sym: SymbolRef) -> bool {
        match self.globals {
            Some(g) => self.frame(g).bindings.contains_key(&sym),
            None => false,
        }
    }

    /// The frame that defines `sym` as seen from `frame`, or `None`.
    /// Special variables resolve dynamically, everything else lexically.
    pub fn resolve_env(&self, frame: FrameRef, sym: SymbolRef) -> Option<FrameRef> {
        if self.is_special_var(sym) {
            self.resolve_dynamic(frame, sym)
        } else {
            self.resolve_lexical(frame, sym)
        }
    }

    /// The value bound to `sym` as seen from `frame`, or `None`.
    pub fn resolve(&self, frame: FrameRef, sym: SymbolRef) -> Option<Value> {
        self.resolve_env(frame, sym)
            .and_then(|f| self.frame(f).bindings.get(&sym).copied())
    }

    /// Walks the caller chain only: this frame, its outer, and so on.
    fn resolve_dynamic(&self, frame: FrameRef, sym: SymbolRef) -> Option<FrameRef> {
        let mut cur = Some(frame);
        while let Some(f) = cur {
            if self.frame(f).bindings.contains_key(&sym) {
                return Some(f);
            }
            cur = self.frame(f).outer;
        }
        None
    }

    /// Checks own bindings, then prefers the lexical parent, falling back
    /// to the outer chain where no lexical parent exists. Closures thereby
    /// see their definition site while still inheriting globals.
    fn resolve_lexical(&self, frame: FrameRef, sym: SymbolRef) -> Option<FrameRef> {
        let mut cur = Some(frame);
        while let Some(f) = cur {
            let cell = self.frame(f);
            if cell.bindings.contains_key(&sym) {
                return Some(f);
            }
            cur = cell.lex.or(cell.outer);
        }
        None
    }

    /// Reuse `dst` as the activation described by `src`: `src`'s bindings
    /// replace `dst`'s wholesale and its lexical parent is adopted. The
    /// tail-call path uses this, and only on frames that are not `closed`.
    /// Stale caller bindings must not survive, or they would shadow the
    /// callee's captured variables.
    pub fn merge_frames(&mut self, dst: FrameRef, src: FrameRef) {
        let (entries, lex) = {
            let s = self.frame(src);
            (s.bindings.clone(), s.lex)
        };
        let d = self.frame_mut(dst);
        d.bindings = entries;
        if lex.is_some() {
            d.lex = lex;
        }
    }

    /// Fold a tail-position `let` frame into its caller: the bindings are
    /// copied over and nothing else changes. The let frame's parents both
    /// point back at `dst` itself, so adopting its lexical parent would
    /// sever `dst`'s own lexical chain behind a self-loop.
    pub fn merge_bindings(&mut self, dst: FrameRef, src: FrameRef) {
        let entries = self.frame(src).bindings.clone();
        let d = self.frame_mut(dst);
        for (sym, value) in entries {
            d.bindings.insert(sym, value);
        }
    }

    /// One-way latch set when a procedure or macro captures `frame`.
    pub fn close_frame(&mut self, frame: FrameRef) {
        self.frame_mut(frame).closed = true;
    }
}
