// ABOUTME: Symbol interning table mapping names to permanently rooted symbols

use crate::error::Error;
use crate::heap::Heap;
use crate::value::{GcRef, Symbol, SymbolRef};
use std::collections::HashMap;

/// Map from name to symbol cell. Interned symbols are rooted for the life
/// of the interpreter, so handle identity is name identity.
#[derive(Default)]
pub struct SymbolTable {
    names: HashMap<String, SymbolRef>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing symbol for `name`, or allocates one, roots it
    /// permanently, and installs it.
    pub fn intern(&mut self, heap: &mut Heap, name: &str) -> Result<SymbolRef, Error> {
        if let Some(&sym) = self.names.get(name) {
            return Ok(sym);
        }
        let sym = heap.alloc_symbol(Symbol {
            name: name.to_string(),
        })?;
        heap.root_ref(GcRef::Symbol(sym));
        self.names.insert(name.to_string(), sym);
        Ok(sym)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.names.len()
    }
}
