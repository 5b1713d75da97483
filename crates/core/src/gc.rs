//! GC root stack and mark-and-sweep.
//!
//! Mark must not recurse along the native call stack following `cdr`
//! chains (spec.md: "the mark phase must handle deeply nested pairs
//! without unbounded native recursion"). We reproduce the original's
//! `goto begin` tail loop with an explicit `Vec<CellRef>` work-list for
//! the one place a real branch happens (`Pair`'s `car`), and a plain
//! `while` loop for the `cdr` chain all composite kinds share.

use crate::arena::Arena;
use crate::cell::{CellRef, Slot};
use crate::error::{CoreError, CoreResult};

/// A bounded stack of cells kept reachable across allocations. The idiom
/// used throughout the evaluator is save/push-transients/restore; the
/// final result is re-pushed by the caller.
pub(crate) struct RootStack {
    stack: Vec<CellRef>,
    capacity: usize,
}

impl RootStack {
    pub(crate) fn new(capacity: usize) -> RootStack {
        RootStack {
            stack: Vec::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, cell: CellRef) -> CoreResult<()> {
        if self.stack.len() >= self.capacity {
            return Err(CoreError::GcStackOverflow);
        }
        self.stack.push(cell);
        Ok(())
    }

    pub(crate) fn save(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn restore(&mut self, index: usize) {
        self.stack.truncate(index);
    }

    pub(crate) fn roots(&self) -> &[CellRef] {
        &self.stack
    }

    pub(crate) fn clear(&mut self) {
        self.stack.clear();
    }
}

/// Mark-hook hint passed to the embedder's `Ptr` mark callback: lets it
/// enqueue additional arena cells as reachable without exposing the rest
/// of `Context`.
pub struct MarkScope<'a> {
    arena: &'a mut Arena,
}

impl<'a> MarkScope<'a> {
    pub fn mark(&mut self, cell: CellRef) {
        mark_one(self.arena, cell, &mut None::<&mut dyn FnMut(&mut MarkScope, CellRef)>);
    }
}

/// Mark every cell reachable from `root`, iteratively.
pub(crate) fn mark_one(
    arena: &mut Arena,
    root: CellRef,
    hook: &mut Option<&mut dyn FnMut(&mut MarkScope, CellRef)>,
) {
    let mut worklist = vec![root];
    while let Some(mut obj) = worklist.pop() {
        loop {
            if obj.is_nil() || arena.get(obj).marked {
                break;
            }
            arena.get_mut(obj).marked = true;
            match &arena.get(obj).slot {
                Slot::Pair { car, cdr } => {
                    let car = *car;
                    let cdr = *cdr;
                    worklist.push(car);
                    obj = cdr;
                }
                Slot::Symbol { cdr } | Slot::Closure { cdr, .. } => {
                    obj = *cdr;
                }
                Slot::StringChunk { next, .. } => {
                    obj = *next;
                }
                Slot::Ptr { .. } => {
                    if let Some(cb) = hook.as_deref_mut() {
                        let mut scope = MarkScope { arena };
                        cb(&mut scope, obj);
                    }
                    break;
                }
                _ => break,
            }
        }
    }
}

/// Run one mark-and-sweep cycle. `roots` is every explicit root (the GC
/// stack, the symbol list head, and every call-list frame); `finalize`
/// fires for unreachable `Ptr` cells before they are reclaimed.
pub(crate) fn collect(
    arena: &mut Arena,
    roots: &[CellRef],
    mark_hook: &mut Option<&mut dyn FnMut(&mut MarkScope, CellRef)>,
    mut finalize_hook: Option<&mut dyn FnMut(CellRef, &mut dyn std::any::Any, i32)>,
) {
    for &r in roots {
        mark_one(arena, r, mark_hook);
    }

    for i in 1..arena.len() {
        let r = CellRef(i as u32);
        if arena.is_free(r) {
            continue;
        }
        let marked = arena.get(r).marked;
        if !marked {
            if let Slot::Ptr { value, subkind } = &mut arena.get_mut(r).slot {
                if let Some(cb) = finalize_hook.as_deref_mut() {
                    cb(r, value.as_mut(), *subkind);
                }
            }
            arena.reclaim(r);
        } else {
            arena.get_mut(r).marked = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(arena: &mut Arena, car: CellRef, cdr: CellRef) -> CellRef {
        let r = arena.try_alloc().unwrap();
        arena.set_slot(r, Slot::Pair { car, cdr });
        r
    }

    #[test]
    fn unreachable_cells_become_free_after_collect() {
        let mut arena = Arena::open(8);
        let kept = pair(&mut arena, CellRef::NIL, CellRef::NIL);
        let _dropped = pair(&mut arena, CellRef::NIL, CellRef::NIL);

        collect(&mut arena, &[kept], &mut None, None);

        assert!(!arena.is_free(kept));
        // every other non-nil cell should have gone back to the free list
        let mut free_count = 0;
        for i in 1..arena.len() {
            if arena.is_free(CellRef(i as u32)) {
                free_count += 1;
            }
        }
        assert_eq!(free_count, 7);
    }

    #[test]
    fn mark_follows_long_cdr_chains_without_native_recursion() {
        let mut arena = Arena::open(5000);
        let mut tail = CellRef::NIL;
        for _ in 0..4000 {
            tail = pair(&mut arena, CellRef::NIL, tail);
        }
        // Would stack-overflow a naive recursive mark; must not panic.
        collect(&mut arena, &[tail], &mut None, None);
        assert!(!arena.is_free(tail));
    }

    #[test]
    fn restore_gc_undoes_pushes_to_the_opening_index() {
        let mut roots = RootStack::new(8);
        let idx = roots.save();
        roots.push(CellRef(1)).unwrap();
        roots.push(CellRef(2)).unwrap();
        roots.restore(idx);
        assert_eq!(roots.roots(), &[] as &[CellRef]);
    }

    #[test]
    fn push_past_capacity_overflows() {
        let mut roots = RootStack::new(1);
        roots.push(CellRef(1)).unwrap();
        assert_eq!(roots.push(CellRef(2)), Err(CoreError::GcStackOverflow));
    }
}
