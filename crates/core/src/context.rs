//! The per-embedding context: arena, root stack, symbol list, call list,
//! handlers, and the public surface spec.md §6 lists.
//!
//! Rust rendering of `open-context(region, size)`: rather than carve a
//! context record and a cell array out of a caller-supplied byte region,
//! the embedder gives a cell *count* (and, optionally, a full
//! `CoreConfig`) and `Context` owns its own `Vec<Cell>`. This is the
//! "ownership-typed target language" path spec.md §9 calls out, and it
//! sidesteps the original's `size < sizeof(context record)` failure mode
//! entirely — there is no separately-sized header to under-allocate.

use crate::arena::Arena;
use crate::cell::{CellRef, Kind, NativeFn, Primitive, Slot, check_type};
use crate::error::{CoreError, CoreResult};
use crate::gc::{self, MarkScope, RootStack};

/// Tunable sizes an embedder can choose at `Context::open` time. Kept as
/// a plain builder struct (no `serde`), matching how
/// `seq-compiler::config::CompilerConfig` is configured purely in code
/// rather than from a file.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Number of allocatable cells in the arena (excludes the nil slot).
    pub cell_capacity: usize,
    /// Depth of the GC root stack. Fixed per context, not dynamically
    /// growable — growing it would change "gc stack overflow"
    /// observability, which spec.md treats as part of the contract.
    pub root_stack_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            cell_capacity: 65_536,
            root_stack_capacity: 512,
        }
    }
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cell_capacity(mut self, cell_capacity: usize) -> Self {
        self.cell_capacity = cell_capacity;
        self
    }

    pub fn with_root_stack_capacity(mut self, root_stack_capacity: usize) -> Self {
        self.root_stack_capacity = root_stack_capacity;
        self
    }
}

/// The three embedder capability slots spec.md §6 calls "handlers."
///
/// `error` receives the failing message and a snapshot of the call-list
/// traceback; `mark` lets a `Ptr` cell enqueue additional reachable
/// cells during GC; `finalize` runs once, during sweep, for each
/// unreachable `Ptr` cell, keyed by its embedder-assigned sub-kind.
#[derive(Default)]
pub struct Handlers {
    pub error: Option<Box<dyn FnMut(&mut Context, &str, &[CellRef])>>,
    pub mark: Option<Box<dyn FnMut(&mut MarkScope, CellRef)>>,
    pub finalize: Option<Box<dyn FnMut(CellRef, &mut dyn std::any::Any, i32)>>,
}

pub struct Context {
    pub(crate) arena: Arena,
    pub(crate) roots: RootStack,
    pub(crate) symbol_list: CellRef,
    pub(crate) call_list: Vec<CellRef>,
    pub(crate) handlers: Handlers,
    pub(crate) t_symbol: CellRef,
    /// Where `print` writes. Defaults to real stdout; an embedder (or a
    /// test) can swap in any `Write` sink via `set_stdout`.
    pub(crate) stdout: Box<dyn std::io::Write>,
    /// Where the fatal-error traceback in `fail` is written. Defaults to
    /// real stderr.
    pub(crate) stderr: Box<dyn std::io::Write>,
}

impl Context {
    /// Open a context with `cell_capacity` allocatable cells and the
    /// default root-stack bound.
    pub fn open(cell_capacity: usize) -> Context {
        Self::with_config(CoreConfig::new().with_cell_capacity(cell_capacity))
    }

    pub fn with_config(config: CoreConfig) -> Context {
        let mut ctx = Context {
            arena: Arena::open(config.cell_capacity),
            roots: RootStack::new(config.root_stack_capacity),
            symbol_list: CellRef::NIL,
            call_list: Vec::new(),
            handlers: Handlers::default(),
            t_symbol: CellRef::NIL,
            stdout: Box::new(std::io::stdout()),
            stderr: Box::new(std::io::stderr()),
        };

        // `t` is bound to itself, matching the original's bootstrap.
        let t = ctx
            .make_symbol(b"t")
            .expect("bootstrapping `t` cannot fail on a freshly opened arena");
        ctx.set_global(t, t);
        ctx.t_symbol = t;

        let save = ctx.roots.save();
        for prim in Primitive::ALL {
            let v = ctx
                .alloc(Slot::Primitive(prim))
                .expect("bootstrapping primitives cannot fail on a freshly opened arena");
            let sym = ctx
                .make_symbol(prim.name().as_bytes())
                .expect("bootstrapping primitive names cannot fail on a freshly opened arena");
            ctx.set_global(sym, v);
            ctx.roots.restore(save);
        }

        ctx
    }

    /// The symbol bound to itself; the conventional "true" value.
    pub fn t(&self) -> CellRef {
        self.t_symbol
    }

    /// `get-handlers(context) -> handlers`: a mutable view of the three
    /// embedder capability slots (`error`, `mark`, `finalize`) so a host
    /// can install or replace any of them after `open`.
    pub fn handlers(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    /// Redirect `print` output. Tests typically install an in-memory
    /// buffer here to assert on printed text without touching real stdout.
    pub fn set_stdout(&mut self, sink: Box<dyn std::io::Write>) {
        self.stdout = sink;
    }

    /// Redirect the fatal-error traceback `fail` writes.
    pub fn set_stderr(&mut self, sink: Box<dyn std::io::Write>) {
        self.stderr = sink;
    }

    /// Clear the root stack and symbol list (making everything but
    /// embedder-held references unreachable) and sweep once, firing
    /// `finalize` for any `Ptr` cells still outstanding.
    pub fn close(&mut self) {
        self.roots.clear();
        self.symbol_list = CellRef::NIL;
        self.call_list.clear();
        self.collect_garbage();
    }

    // ---- allocation & GC --------------------------------------------

    pub(crate) fn alloc(&mut self, slot: Slot) -> CoreResult<CellRef> {
        let r = match self.arena.try_alloc() {
            Some(r) => r,
            None => {
                self.collect_garbage();
                self.arena.try_alloc().ok_or(CoreError::OutOfMemory)?
            }
        };
        self.arena.set_slot(r, slot);
        self.roots.push(r)?;
        Ok(r)
    }

    pub(crate) fn collect_garbage(&mut self) {
        let mut mark_hook = self.handlers.mark.take();
        let mut finalize_hook = self.handlers.finalize.take();

        let mut roots: Vec<CellRef> = self.roots.roots().to_vec();
        roots.push(self.symbol_list);
        roots.extend_from_slice(&self.call_list);

        {
            let mut mark_ref = mark_hook.as_deref_mut();
            gc::collect(
                &mut self.arena,
                &roots,
                &mut mark_ref,
                finalize_hook.as_deref_mut(),
            );
        }

        self.handlers.mark = mark_hook;
        self.handlers.finalize = finalize_hook;
    }

    /// Root `cell` across further allocations (`push-gc`).
    pub fn push_gc(&mut self, cell: CellRef) -> CoreResult<()> {
        self.roots.push(cell)
    }

    /// Snapshot the root-stack depth (`save-gc`).
    pub fn save_gc(&self) -> usize {
        self.roots.save()
    }

    /// Pop the root stack back to a depth from `save_gc` (`restore-gc`).
    pub fn restore_gc(&mut self, index: usize) {
        self.roots.restore(index);
    }

    /// Mark `cell` and everything reachable from it, outside a full
    /// collection — the entry point custom `mark` handlers call to
    /// enqueue extra roots found via an embedder's own structures.
    pub fn mark(&mut self, cell: CellRef) {
        let mut mark_hook = self.handlers.mark.take();
        {
            let mut mark_ref = mark_hook.as_deref_mut();
            gc::mark_one(&mut self.arena, cell, &mut mark_ref);
        }
        self.handlers.mark = mark_hook;
    }

    // ---- kind & accessors --------------------------------------------

    pub fn kind(&self, r: CellRef) -> Kind {
        self.arena.get(r).kind()
    }

    pub fn is_nil(&self, r: CellRef) -> bool {
        r.is_nil()
    }

    pub(crate) fn check(&self, r: CellRef, expected: Kind) -> CoreResult<()> {
        check_type(self.kind(r), expected)
    }

    pub(crate) fn pair_unchecked(&self, r: CellRef) -> (CellRef, CellRef) {
        match &self.arena.get(r).slot {
            Slot::Pair { car, cdr } => (*car, *cdr),
            _ => unreachable!("pair_unchecked called on a non-pair cell"),
        }
    }

    /// `car`/`cdr` of `nil` is `nil`; otherwise the cell must be a pair.
    pub fn car(&self, r: CellRef) -> CoreResult<CellRef> {
        if r.is_nil() {
            return Ok(r);
        }
        self.check(r, Kind::Pair)?;
        Ok(self.pair_unchecked(r).0)
    }

    pub fn cdr(&self, r: CellRef) -> CoreResult<CellRef> {
        if r.is_nil() {
            return Ok(r);
        }
        self.check(r, Kind::Pair)?;
        Ok(self.pair_unchecked(r).1)
    }

    pub fn set_car(&mut self, pair: CellRef, value: CellRef) -> CoreResult<()> {
        self.check(pair, Kind::Pair)?;
        if let Slot::Pair { car, .. } = &mut self.arena.get_mut(pair).slot {
            *car = value;
        }
        Ok(())
    }

    pub fn set_cdr(&mut self, pair: CellRef, value: CellRef) -> CoreResult<()> {
        self.check(pair, Kind::Pair)?;
        if let Slot::Pair { cdr, .. } = &mut self.arena.get_mut(pair).slot {
            *cdr = value;
        }
        Ok(())
    }

    pub fn get_number(&self, r: CellRef) -> CoreResult<f64> {
        self.check(r, Kind::Number)?;
        match &self.arena.get(r).slot {
            Slot::Number(n) => Ok(*n),
            _ => unreachable!(),
        }
    }

    pub fn get_native(&self, r: CellRef) -> CoreResult<NativeFn> {
        self.check(r, Kind::Native)?;
        match &self.arena.get(r).slot {
            Slot::Native(f) => Ok(*f),
            _ => unreachable!(),
        }
    }

    pub fn get_primitive_op(&self, r: CellRef) -> CoreResult<Primitive> {
        self.check(r, Kind::Primitive)?;
        match &self.arena.get(r).slot {
            Slot::Primitive(p) => Ok(*p),
            _ => unreachable!(),
        }
    }

    /// The raw bytes held in one string chunk cell (not the whole
    /// chain — see `to_string` for that).
    pub fn string_bytes(&self, chunk: CellRef) -> CoreResult<&[u8]> {
        self.check(chunk, Kind::String)?;
        match &self.arena.get(chunk).slot {
            Slot::StringChunk { bytes, len, .. } => Ok(&bytes[..*len as usize]),
            _ => unreachable!(),
        }
    }

    pub(crate) fn string_next_chunk(&self, chunk: CellRef) -> CellRef {
        match &self.arena.get(chunk).slot {
            Slot::StringChunk { next, .. } => *next,
            _ => unreachable!("string_next_chunk called on a non-string cell"),
        }
    }

    pub(crate) fn closure_parts(&self, r: CellRef) -> (bool, CellRef) {
        match &self.arena.get(r).slot {
            Slot::Closure { is_macro, cdr } => (*is_macro, *cdr),
            _ => unreachable!("closure_parts called on a non-closure cell"),
        }
    }

    // ---- constructors --------------------------------------------------

    pub fn cons(&mut self, car: CellRef, cdr: CellRef) -> CoreResult<CellRef> {
        self.alloc(Slot::Pair { car, cdr })
    }

    pub fn make_bool(&self, value: bool) -> CellRef {
        if value { self.t_symbol } else { CellRef::NIL }
    }

    pub fn make_number(&mut self, n: f64) -> CoreResult<CellRef> {
        self.alloc(Slot::Number(n))
    }

    pub fn make_native(&mut self, f: NativeFn) -> CoreResult<CellRef> {
        self.alloc(Slot::Native(f))
    }

    pub fn make_ptr(&mut self, value: Box<dyn std::any::Any>, subkind: i32) -> CoreResult<CellRef> {
        self.alloc(Slot::Ptr { value, subkind })
    }

    pub fn to_ptr<T: 'static>(&self, r: CellRef) -> CoreResult<&T> {
        self.check(r, Kind::Ptr)?;
        match &self.arena.get(r).slot {
            Slot::Ptr { value, .. } => value
                .downcast_ref::<T>()
                .ok_or_else(|| CoreError::Custom("ptr downcast failed".to_string())),
            _ => unreachable!(),
        }
    }

    pub fn ptr_subkind(&self, r: CellRef) -> CoreResult<i32> {
        self.check(r, Kind::Ptr)?;
        match &self.arena.get(r).slot {
            Slot::Ptr { subkind, .. } => Ok(*subkind),
            _ => unreachable!(),
        }
    }

    /// Build a proper list from a Rust slice, right to left.
    pub fn make_list(&mut self, items: &[CellRef]) -> CoreResult<CellRef> {
        let mut res = CellRef::NIL;
        for &item in items.iter().rev() {
            res = self.cons(item, res)?;
        }
        Ok(res)
    }

    // ---- mutation --------------------------------------------------

    /// Set `sym`'s *global* binding, bypassing any lexical environment.
    pub fn set_global(&mut self, sym: CellRef, value: CellRef) {
        let binding = self.symbol_binding_pair(sym);
        // `binding` is `(name-string . global-value)`; only the cdr
        // changes, and `Slot::Pair`'s fields let us do that in place
        // without re-checking kinds sym-side (the binding pair is
        // always a Pair by construction in `make_symbol`).
        if let Slot::Pair { cdr, .. } = &mut self.arena.get_mut(binding).slot {
            *cdr = value;
        }
    }

    // ---- error boundary --------------------------------------------

    /// Invoke the error handler (if any), clear the call-list, and —
    /// unless the handler itself diverges — write the traceback to
    /// `stderr` and terminate the process. This is the literal
    /// translation of spec.md's `handle-error(context, message) ->
    /// never-returns`; see SPEC_FULL.md §4.9 for why only this boundary
    /// (and not every fallible internal call) behaves this way.
    pub fn fail(&mut self, err: CoreError) -> ! {
        let message = err.to_string();
        let frames = std::mem::take(&mut self.call_list);

        if let Some(mut cb) = self.handlers.error.take() {
            cb(self, &message, &frames);
            self.handlers.error = Some(cb);
        }

        let _ = writeln!(self.stderr, "error: {message}");
        for &frame in &frames {
            let mut buf = String::new();
            let _ = self.write_to_string(frame, &mut buf, false);
            if buf.len() > 64 {
                buf.truncate(64);
            }
            let _ = writeln!(self.stderr, "=> {buf}");
        }
        std::process::exit(1);
    }
}
