// ABOUTME: Paged pool heap with precise mark-and-sweep garbage collection
//
// Every runtime datum lives in a per-variant pool carved into fixed-size
// pages. Cells carry an `allocated` and a `marked` bit. Collection is
// stop-the-world and non-moving: marking walks an explicit worklist seeded
// from the global frame and the counted root list, sweeping returns
// unmarked cells to each pool's free list.
//
// The one rule callers must respect: a value that is not yet reachable from
// the global frame or a root must be rooted before the next allocation and
// unrooted on every exit path. Collection can only trigger inside the
// `alloc_*` methods, so the audit is bounded to allocation points.

use crate::config::{HeapConfig, PAGE_CELLS};
use crate::env::{Frame, FrameRef};
use crate::error::Error;
use crate::value::{
    Builtin, BuiltinRef, Closure, Cons, ConsRef, GcRef, IntRef, MacroRef, ProcRef, Special,
    SpecialRef, StrRef, Symbol, SymbolRef, Value,
};
use std::collections::HashMap;

#[derive(Clone, Copy, Default)]
struct CellMeta {
    allocated: bool,
    marked: bool,
}

/// One fixed-size page of cells plus their metadata bits.
struct Page<T> {
    cells: Vec<T>,
    meta: Vec<CellMeta>,
}

impl<T: Default> Page<T> {
    fn new() -> Self {
        Page {
            cells: (0..PAGE_CELLS).map(|_| T::default()).collect(),
            meta: vec![CellMeta::default(); PAGE_CELLS],
        }
    }
}

/// A growable set of pages for one cell type, with a free list of cell
/// indices. Indices are global across pages: `page * PAGE_CELLS + slot`.
struct Pool<T> {
    pages: Vec<Page<T>>,
    free: Vec<u32>,
}

impl<T: Default> Pool<T> {
    fn new() -> Self {
        Pool {
            pages: Vec::new(),
            free: Vec::new(),
        }
    }

    fn page_bytes(&self) -> usize {
        PAGE_CELLS * std::mem::size_of::<T>()
    }

    fn total_bytes(&self) -> usize {
        self.pages.len() * self.page_bytes()
    }

    fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    fn add_page(&mut self) {
        let base = (self.pages.len() * PAGE_CELLS) as u32;
        self.pages.push(Page::new());
        for slot in (0..PAGE_CELLS as u32).rev() {
            self.free.push(base + slot);
        }
    }

    /// Takes a free cell, marking it allocated and unmarked. The pool must
    /// have a free cell; `Heap` guarantees that before calling.
    fn take(&mut self) -> u32 {
        let idx = self.free.pop().expect("pool free list exhausted");
        let meta = &mut self.pages[idx as usize / PAGE_CELLS].meta[idx as usize % PAGE_CELLS];
        meta.allocated = true;
        meta.marked = false;
        idx
    }

    fn get(&self, idx: usize) -> &T {
        &self.pages[idx / PAGE_CELLS].cells[idx % PAGE_CELLS]
    }

    fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.pages[idx / PAGE_CELLS].cells[idx % PAGE_CELLS]
    }

    fn mark(&mut self, idx: usize) {
        self.pages[idx / PAGE_CELLS].meta[idx % PAGE_CELLS].marked = true;
    }

    fn is_marked(&self, idx: usize) -> bool {
        self.pages[idx / PAGE_CELLS].meta[idx % PAGE_CELLS].marked
    }

    fn is_allocated(&self, idx: usize) -> bool {
        self.pages[idx / PAGE_CELLS].meta[idx % PAGE_CELLS].allocated
    }

    /// Returns unmarked-but-allocated cells to the free list in address
    /// order, resets their payloads, and clears every mark bit. Reports
    /// bytes reclaimed.
    fn sweep(&mut self) -> usize {
        let cell_size = std::mem::size_of::<T>();
        let mut reclaimed = 0;
        for (page_idx, page) in self.pages.iter_mut().enumerate() {
            for slot in 0..PAGE_CELLS {
                let meta = &mut page.meta[slot];
                if meta.allocated && !meta.marked {
                    meta.allocated = false;
                    page.cells[slot] = T::default();
                    self.free.push((page_idx * PAGE_CELLS + slot) as u32);
                    reclaimed += cell_size;
                }
                meta.marked = false;
            }
        }
        reclaimed
    }

    fn allocated_count(&self) -> usize {
        self.pages.len() * PAGE_CELLS - self.free.len()
    }
}

/// The interpreter heap: nine pools, the counted root list, and the global
/// frame the collector always starts from.
pub struct Heap {
    conses: Pool<Cons>,
    symbols: Pool<Symbol>,
    ints: Pool<i64>,
    strings: Pool<String>,
    specials: Pool<Special>,
    procs: Pool<Closure>,
    builtins: Pool<Builtin>,
    macros: Pool<Closure>,
    frames: Pool<Frame>,

    roots: HashMap<GcRef, usize>,
    pub(crate) globals: Option<FrameRef>,

    watermark: usize,
    ceiling: usize,
    collections: usize,
}

macro_rules! alloc_method {
    ($fname:ident, $pool:ident, $payload:ty, $refname:ident) => {
        pub(crate) fn $fname(&mut self, payload: $payload) -> Result<$refname, Error> {
            if !self.$pool.has_free() {
                let page = self.$pool.page_bytes();
                let above = self.total_bytes() + page > self.watermark;
                if above {
                    self.collect();
                }
                if !self.$pool.has_free() {
                    if self.total_bytes() + page > self.ceiling {
                        return Err(Error::HeapExhausted);
                    }
                    self.$pool.add_page();
                    if above {
                        self.watermark += page;
                    }
                }
            }
            let idx = self.$pool.take();
            *self.$pool.get_mut(idx as usize) = payload;
            Ok($refname(idx))
        }
    };
}

macro_rules! accessors {
    ($get:ident, $get_mut:ident, $pool:ident, $payload:ty, $refname:ident) => {
        pub fn $get(&self, r: $refname) -> &$payload {
            self.$pool.get(r.index())
        }

        #[allow(dead_code)]
        pub fn $get_mut(&mut self, r: $refname) -> &mut $payload {
            self.$pool.get_mut(r.index())
        }
    };
}

impl Heap {
    pub fn new(config: HeapConfig) -> Self {
        Heap {
            conses: Pool::new(),
            symbols: Pool::new(),
            ints: Pool::new(),
            strings: Pool::new(),
            specials: Pool::new(),
            procs: Pool::new(),
            builtins: Pool::new(),
            macros: Pool::new(),
            frames: Pool::new(),
            roots: HashMap::new(),
            globals: None,
            watermark: config.watermark,
            ceiling: config.ceiling,
            collections: 0,
        }
    }

    alloc_method!(alloc_cons, conses, Cons, ConsRef);
    alloc_method!(alloc_symbol, symbols, Symbol, SymbolRef);
    alloc_method!(alloc_int, ints, i64, IntRef);
    alloc_method!(alloc_string, strings, String, StrRef);
    alloc_method!(alloc_special, specials, Special, SpecialRef);
    alloc_method!(alloc_proc, procs, Closure, ProcRef);
    alloc_method!(alloc_builtin, builtins, Builtin, BuiltinRef);
    alloc_method!(alloc_macro, macros, Closure, MacroRef);
    alloc_method!(alloc_frame, frames, Frame, FrameRef);

    accessors!(cons, cons_mut, conses, Cons, ConsRef);
    accessors!(symbol, symbol_mut, symbols, Symbol, SymbolRef);
    accessors!(int, int_mut, ints, i64, IntRef);
    accessors!(string, string_mut, strings, String, StrRef);
    accessors!(special, special_mut, specials, Special, SpecialRef);
    accessors!(proc, proc_mut, procs, Closure, ProcRef);
    accessors!(builtin, builtin_mut, builtins, Builtin, BuiltinRef);
    accessors!(mac, mac_mut, macros, Closure, MacroRef);
    accessors!(frame, frame_mut, frames, Frame, FrameRef);

    pub fn total_bytes(&self) -> usize {
        self.conses.total_bytes()
            + self.symbols.total_bytes()
            + self.ints.total_bytes()
            + self.strings.total_bytes()
            + self.specials.total_bytes()
            + self.procs.total_bytes()
            + self.builtins.total_bytes()
            + self.macros.total_bytes()
            + self.frames.total_bytes()
    }

    /// Total allocated cells across all pools. Diagnostic only.
    #[allow(dead_code)]
    pub fn allocated_cells(&self) -> usize {
        self.conses.allocated_count()
            + self.symbols.allocated_count()
            + self.ints.allocated_count()
            + self.strings.allocated_count()
            + self.specials.allocated_count()
            + self.procs.allocated_count()
            + self.builtins.allocated_count()
            + self.macros.allocated_count()
            + self.frames.allocated_count()
    }

    #[allow(dead_code)]
    pub fn collections(&self) -> usize {
        self.collections
    }

    // ========================================================================
    // Rooting
    // ========================================================================

    /// Adds a counted root. Every call must be paired with `unroot`.
    pub fn root(&mut self, v: Value) {
        self.root_ref(GcRef::from(v));
    }

    pub fn unroot(&mut self, v: Value) {
        self.unroot_ref(GcRef::from(v));
    }

    pub fn root_frame(&mut self, f: FrameRef) {
        self.root_ref(GcRef::Frame(f));
    }

    pub fn unroot_frame(&mut self, f: FrameRef) {
        self.unroot_ref(GcRef::Frame(f));
    }

    pub fn root_ref(&mut self, r: GcRef) {
        *self.roots.entry(r).or_insert(0) += 1;
    }

    pub fn unroot_ref(&mut self, r: GcRef) {
        match self.roots.get_mut(&r) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.roots.remove(&r);
            }
            None => debug_assert!(false, "unroot without matching root: {r:?}"),
        }
    }

    /// Root-list entries, counting multiplicity once. Diagnostic only.
    #[allow(dead_code)]
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Mark from the global frame and the root list, then sweep every pool.
    /// Returns bytes reclaimed.
    pub fn collect(&mut self) -> usize {
        self.collections += 1;

        let mut pending: Vec<GcRef> = Vec::with_capacity(self.roots.len() + 1);
        if let Some(g) = self.globals {
            pending.push(GcRef::Frame(g));
        }
        pending.extend(self.roots.keys().copied());

        while let Some(r) = pending.pop() {
            if self.is_marked(r) {
                continue;
            }
            self.set_marked(r);
            self.push_children(r, &mut pending);
        }

        self.conses.sweep()
            + self.symbols.sweep()
            + self.ints.sweep()
            + self.strings.sweep()
            + self.specials.sweep()
            + self.procs.sweep()
            + self.builtins.sweep()
            + self.macros.sweep()
            + self.frames.sweep()
    }

    /// True while the cell behind `r` is allocated. Diagnostic only.
    #[allow(dead_code)]
    pub fn is_allocated(&self, r: GcRef) -> bool {
        match r {
            GcRef::Cons(x) => self.conses.is_allocated(x.index()),
            GcRef::Symbol(x) => self.symbols.is_allocated(x.index()),
            GcRef::Int(x) => self.ints.is_allocated(x.index()),
            GcRef::Str(x) => self.strings.is_allocated(x.index()),
            GcRef::SpecialForm(x) => self.specials.is_allocated(x.index()),
            GcRef::Proc(x) => self.procs.is_allocated(x.index()),
            GcRef::Builtin(x) => self.builtins.is_allocated(x.index()),
            GcRef::Macro(x) => self.macros.is_allocated(x.index()),
            GcRef::Frame(x) => self.frames.is_allocated(x.index()),
        }
    }

    fn is_marked(&self, r: GcRef) -> bool {
        match r {
            GcRef::Cons(x) => self.conses.is_marked(x.index()),
            GcRef::Symbol(x) => self.symbols.is_marked(x.index()),
            GcRef::Int(x) => self.ints.is_marked(x.index()),
            GcRef::Str(x) => self.strings.is_marked(x.index()),
            GcRef::SpecialForm(x) => self.specials.is_marked(x.index()),
            GcRef::Proc(x) => self.procs.is_marked(x.index()),
            GcRef::Builtin(x) => self.builtins.is_marked(x.index()),
            GcRef::Macro(x) => self.macros.is_marked(x.index()),
            GcRef::Frame(x) => self.frames.is_marked(x.index()),
        }
    }

    fn set_marked(&mut self, r: GcRef) {
        match r {
            GcRef::Cons(x) => self.conses.mark(x.index()),
            GcRef::Symbol(x) => self.symbols.mark(x.index()),
            GcRef::Int(x) => self.ints.mark(x.index()),
            GcRef::Str(x) => self.strings.mark(x.index()),
            GcRef::SpecialForm(x) => self.specials.mark(x.index()),
            GcRef::Proc(x) => self.procs.mark(x.index()),
            GcRef::Builtin(x) => self.builtins.mark(x.index()),
            GcRef::Macro(x) => self.macros.mark(x.index()),
            GcRef::Frame(x) => self.frames.mark(x.index()),
        }
    }

    /// Pushes the outgoing edges of `r` onto the worklist. Symbols, ints,
    /// strings, builtins, and special forms are leaves.
    fn push_children(&self, r: GcRef, pending: &mut Vec<GcRef>) {
        match r {
            GcRef::Cons(x) => {
                let cell = self.cons(x);
                pending.push(cell.car.into());
                pending.push(cell.cdr.into());
            }
            GcRef::Proc(x) => {
                let c = self.proc(x);
                pending.push(c.params.into());
                pending.push(c.body.into());
                pending.push(GcRef::Frame(c.env));
            }
            GcRef::Macro(x) => {
                let c = self.mac(x);
                pending.push(c.params.into());
                pending.push(c.body.into());
                pending.push(GcRef::Frame(c.env));
            }
            GcRef::Frame(x) => {
                let f = self.frame(x);
                if let Some(outer) = f.outer {
                    pending.push(GcRef::Frame(outer));
                }
                if let Some(lex) = f.lex {
                    pending.push(GcRef::Frame(lex));
                }
                for (sym, value) in &f.bindings {
                    pending.push(GcRef::Symbol(*sym));
                    pending.push((*value).into());
                }
            }
            GcRef::Symbol(_)
            | GcRef::Int(_)
            | GcRef::Str(_)
            | GcRef::SpecialForm(_)
            | GcRef::Builtin(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Heap {
        Heap::new(HeapConfig {
            watermark: PAGE_CELLS * std::mem::size_of::<Cons>(),
            ceiling: 1 << 20,
        })
    }

    /// Default cell payloads reference symbol slot 0; tests that trace
    /// such cells must make that slot real first, as `Interp::new` does.
    fn seed_nil(heap: &mut Heap) {
        let s = heap
            .alloc_symbol(Symbol {
                name: "nil".to_string(),
            })
            .unwrap();
        assert_eq!(s.index(), 0);
        heap.root(Value::Symbol(s));
    }

    #[test]
    fn test_allocate_returns_distinct_cells() {
        let mut heap = Heap::new(HeapConfig::default());
        let a = heap.alloc_int(1).unwrap();
        let b = heap.alloc_int(2).unwrap();
        assert_ne!(a, b);
        assert_eq!(*heap.int(a), 1);
        assert_eq!(*heap.int(b), 2);
    }

    #[test]
    fn test_collect_reclaims_unrooted() {
        let mut heap = Heap::new(HeapConfig::default());
        let a = heap.alloc_int(1).unwrap();
        let reclaimed = heap.collect();
        assert!(reclaimed >= std::mem::size_of::<i64>());
        assert!(!heap.is_allocated(GcRef::Int(a)));
    }

    #[test]
    fn test_rooted_value_survives_collection() {
        let mut heap = Heap::new(HeapConfig::default());
        let a = heap.alloc_int(7).unwrap();
        heap.root(Value::Int(a));
        heap.collect();
        assert!(heap.is_allocated(GcRef::Int(a)));
        assert_eq!(*heap.int(a), 7);
        heap.unroot(Value::Int(a));
        heap.collect();
        assert!(!heap.is_allocated(GcRef::Int(a)));
    }

    #[test]
    fn test_root_counts_pair() {
        let mut heap = Heap::new(HeapConfig::default());
        let a = heap.alloc_int(7).unwrap();
        heap.root(Value::Int(a));
        heap.root(Value::Int(a));
        heap.unroot(Value::Int(a));
        heap.collect();
        assert!(heap.is_allocated(GcRef::Int(a)));
        heap.unroot(Value::Int(a));
        heap.collect();
        assert!(!heap.is_allocated(GcRef::Int(a)));
    }

    #[test]
    fn test_marking_follows_cons_edges() {
        let mut heap = Heap::new(HeapConfig::default());
        let a = heap.alloc_int(1).unwrap();
        heap.root(Value::Int(a));
        let b = heap.alloc_int(2).unwrap();
        heap.root(Value::Int(b));
        let c = heap
            .alloc_cons(Cons {
                car: Value::Int(a),
                cdr: Value::Int(b),
            })
            .unwrap();
        heap.root(Value::Cons(c));
        heap.unroot(Value::Int(a));
        heap.unroot(Value::Int(b));

        heap.collect();
        assert!(heap.is_allocated(GcRef::Int(a)));
        assert!(heap.is_allocated(GcRef::Int(b)));

        heap.unroot(Value::Cons(c));
        heap.collect();
        assert!(!heap.is_allocated(GcRef::Cons(c)));
        assert!(!heap.is_allocated(GcRef::Int(a)));
    }

    #[test]
    fn test_marking_survives_cycles() {
        let mut heap = Heap::new(HeapConfig::default());
        seed_nil(&mut heap);
        let a = heap
            .alloc_cons(Cons {
                car: Value::default(),
                cdr: Value::default(),
            })
            .unwrap();
        heap.root(Value::Cons(a));
        let b = heap
            .alloc_cons(Cons {
                car: Value::Cons(a),
                cdr: Value::Cons(a),
            })
            .unwrap();
        heap.cons_mut(a).cdr = Value::Cons(b);
        heap.collect();
        assert!(heap.is_allocated(GcRef::Cons(a)));
        assert!(heap.is_allocated(GcRef::Cons(b)));
        heap.unroot(Value::Cons(a));
    }

    #[test]
    fn test_watermark_triggers_collection_before_extension() {
        let mut heap = small_heap();
        // Fill the first cons page with garbage; the next allocation would
        // extend past the watermark and must collect instead of growing.
        for _ in 0..PAGE_CELLS + 8 {
            heap.alloc_cons(Cons::default()).unwrap();
        }
        assert!(heap.collections() >= 1);
        assert_eq!(heap.conses.pages.len(), 1);
    }

    #[test]
    fn test_page_extends_when_live_data_fills_page() {
        let mut heap = small_heap();
        seed_nil(&mut heap);
        let mut keep = Vec::new();
        for i in 0..PAGE_CELLS + 8 {
            let c = heap.alloc_cons(Cons::default()).unwrap();
            heap.root(Value::Cons(c));
            keep.push((i, c));
        }
        assert!(heap.conses.pages.len() >= 2);
        for (_, c) in keep {
            heap.unroot(Value::Cons(c));
        }
    }

    #[test]
    fn test_heap_exhausted_at_ceiling() {
        let mut heap = Heap::new(HeapConfig {
            watermark: PAGE_CELLS * std::mem::size_of::<i64>(),
            ceiling: PAGE_CELLS * std::mem::size_of::<i64>(),
        });
        let mut result = Ok(());
        for _ in 0..PAGE_CELLS + 1 {
            match heap.alloc_int(0) {
                Ok(r) => heap.root(Value::Int(r)),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        assert_eq!(result, Err(Error::HeapExhausted));
    }

    #[test]
    fn test_sweep_resets_payloads() {
        let mut heap = Heap::new(HeapConfig::default());
        let s = heap.alloc_string("temporary".to_string()).unwrap();
        heap.collect();
        assert!(!heap.is_allocated(GcRef::Str(s)));
        // The reclaimed slot is handed out fresh.
        let s2 = heap.alloc_string(String::new()).unwrap();
        assert_eq!(heap.string(s2), "");
    }
}
