//! Packed character-chain string builder.
//!
//! A string is a chain of `StringChunk` cells; it is well-formed once
//! either a chunk is only partially full (so it stops before its
//! capacity) or its `next` is nil. `build_string` keeps at most one
//! transient chunk rooted on the GC stack: extending the chain pops the
//! predecessor as soon as a new chunk replaces it as the tail.

use crate::cell::{CellRef, Slot, STRING_CHUNK_CAP};
use crate::context::Context;
use crate::error::CoreResult;

impl Context {
    /// Allocate a fresh, empty string chunk — the start of a new chain.
    pub(crate) fn string_start(&mut self) -> CoreResult<CellRef> {
        self.alloc(Slot::StringChunk {
            bytes: [0; STRING_CHUNK_CAP],
            len: 0,
            next: CellRef::NIL,
        })
    }

    /// Append one byte to the string chain whose current tail is
    /// `tail`. Returns the (possibly new) tail cell.
    pub(crate) fn build_string(&mut self, tail: CellRef, byte: u8) -> CoreResult<CellRef> {
        let full = matches!(&self.arena.get(tail).slot,
            Slot::StringChunk { len, .. } if *len as usize == STRING_CHUNK_CAP);

        let tail = if full {
            let new_chunk = self.string_start()?;
            if let Slot::StringChunk { next, .. } = &mut self.arena.get_mut(tail).slot {
                *next = new_chunk;
            }
            // `new_chunk` is reachable via `tail` now; drop the
            // transient root pushed when `new_chunk` was allocated for
            // its predecessor, per the single-transient-root invariant.
            let save = self.roots.save();
            self.roots.restore(save - 1);
            new_chunk
        } else {
            tail
        };

        if let Slot::StringChunk { bytes, len, .. } = &mut self.arena.get_mut(tail).slot {
            bytes[*len as usize] = byte;
            *len += 1;
        }
        Ok(tail)
    }

    /// Build a complete string cell from a Rust byte slice.
    pub fn make_string(&mut self, bytes: &[u8]) -> CoreResult<CellRef> {
        let head = self.string_start()?;
        let mut tail = head;
        for &b in bytes {
            tail = self.build_string(tail, b)?;
        }
        Ok(head)
    }
}

/// Byte-wise compare a string cell chain against a Rust byte slice.
pub(crate) fn string_chain_equals(ctx: &Context, s: CellRef, target: &[u8]) -> bool {
    string_chain_bytes(ctx, s) == target
}

/// Byte-wise compare two string cell chains for equality.
pub(crate) fn string_chains_equal(ctx: &Context, a: CellRef, b: CellRef) -> bool {
    string_chain_bytes(ctx, a) == string_chain_bytes(ctx, b)
}

/// Copy a string cell chain out into an owned byte buffer.
pub(crate) fn string_chain_bytes(ctx: &Context, mut s: CellRef) -> Vec<u8> {
    let mut out = Vec::new();
    while !s.is_nil() {
        match &ctx.arena.get(s).slot {
            Slot::StringChunk { bytes, len, next } => {
                out.extend_from_slice(&bytes[..*len as usize]);
                s = *next;
            }
            _ => unreachable!("non-string cell in string chain"),
        }
    }
    out
}
