//! An embeddable tree-walking Lisp core.
//!
//! A `Context` owns a fixed-size arena of two-word cells, a bounded GC
//! root stack, a symbol table, and a call-list traceback. Cells are
//! referenced by `CellRef`, a plain arena index — never a native
//! pointer — so the whole data model is ordinary owned Rust state
//! rather than anything `unsafe`.
//!
//! Typical use:
//!
//! ```
//! use fe_core::Context;
//!
//! let mut ctx = Context::open(4096);
//! let mut src = "(+ 1 2 3)".bytes().map(Some);
//! let mut source = move || src.next().flatten();
//! let result = ctx.run(&mut source).unwrap();
//! assert_eq!(ctx.get_number(result).unwrap(), 6.0);
//! ```

mod arena;
mod cell;
mod context;
mod error;
mod eval;
mod gc;
mod reader;
mod string_builder;
mod symbol;
mod writer;

pub use cell::{CellRef, Kind, NativeFn, Primitive};
pub use context::{Context, CoreConfig, Handlers};
pub use error::{CoreError, CoreResult};
pub use gc::MarkScope;
pub use reader::{ByteSource, ReadState};
