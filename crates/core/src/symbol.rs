//! Symbol interning and the lexical-environment association list.

use crate::cell::{CellRef, Slot};
use crate::context::Context;
use crate::error::CoreResult;
use crate::string_builder::string_chain_equals;

impl Context {
    /// Intern `name`, returning the existing symbol cell if one with
    /// this exact byte sequence already exists, otherwise allocating
    /// one and pushing it onto the head of the symbol list.
    pub fn make_symbol(&mut self, name: &[u8]) -> CoreResult<CellRef> {
        let mut node = self.symbol_list;
        while !node.is_nil() {
            let (sym, rest) = self.pair_unchecked(node);
            let name_cell = self.symbol_name_cell(sym);
            if string_chain_equals(self, name_cell, name) {
                return Ok(sym);
            }
            node = rest;
        }

        let name_str = self.make_string(name)?;
        let binding = self.cons(name_str, CellRef::NIL)?;
        let sym = self.alloc(Slot::Symbol { cdr: binding })?;
        let new_head = self.cons(sym, self.symbol_list)?;
        self.symbol_list = new_head;
        Ok(sym)
    }

    /// The `(name-string . global-value)` pair referenced by a symbol's
    /// `cdr`. Panics (via `unreachable!`) if `sym` is not a Symbol —
    /// callers must type-check first, matching how the original never
    /// guards this internal helper either.
    pub(crate) fn symbol_binding_pair(&self, sym: CellRef) -> CellRef {
        match &self.arena.get(sym).slot {
            Slot::Symbol { cdr } => *cdr,
            _ => unreachable!("symbol_binding_pair called on a non-symbol cell"),
        }
    }

    fn symbol_name_cell(&self, sym: CellRef) -> CellRef {
        let binding = self.symbol_binding_pair(sym);
        self.pair_unchecked(binding).0
    }

    /// Find the binding pair for `sym` in `env`, falling back to the
    /// symbol's own global slot when `env` has no entry for it. The
    /// caller may mutate the returned pair's `cdr` to assign.
    pub(crate) fn get_bound(&self, sym: CellRef, env: CellRef) -> CellRef {
        let mut node = env;
        while !node.is_nil() {
            let (entry, rest) = self.pair_unchecked(node);
            let (entry_sym, _) = self.pair_unchecked(entry);
            if entry_sym == sym {
                return entry;
            }
            node = rest;
        }
        self.symbol_binding_pair(sym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn interning_returns_the_same_cell_for_the_same_name() {
        let mut ctx = Context::open(256);
        let a = ctx.make_symbol(b"foo").unwrap();
        let b = ctx.make_symbol(b"foo").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_intern_to_distinct_cells() {
        let mut ctx = Context::open(256);
        let a = ctx.make_symbol(b"foo").unwrap();
        let b = ctx.make_symbol(b"bar").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unbound_symbol_falls_back_to_the_global_slot() {
        let mut ctx = Context::open(256);
        let sym = ctx.make_symbol(b"x").unwrap();
        let bound = ctx.get_bound(sym, CellRef::NIL);
        assert_eq!(bound, ctx.symbol_binding_pair(sym));
    }
}
