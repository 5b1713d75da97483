//! The tree-walking evaluator: symbol lookup, special-form dispatch,
//! closures, and destructively-expanded macros.
//!
//! `eval`'s `newenv` parameter is the Rust rendering of the original's
//! `FeObject** newenv` out-parameter: only `do_list` (the body of a
//! function, `while`, or top-level `do`) ever passes one, and only the
//! `let` special form ever writes through it. Every other call site
//! (argument evaluation, conditions, nested expressions) passes `None`,
//! which is why a bare `(let x 1)` evaluated outside a body silently
//! computes and discards its value — the same as the original.

use crate::cell::{CellRef, Kind, Primitive, Slot};
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::reader::ByteSource;

impl Context {
    /// `evaluate(context, cell) -> cell`. Clears the call-list before
    /// returning an error: spec.md §7 requires the traceback to start
    /// clean on the next evaluation, and since every `?` between here
    /// and the frame pushed in `eval` skips that frame's own pop, this
    /// is the one place that's guaranteed to run on every path out.
    pub fn evaluate(&mut self, obj: CellRef) -> CoreResult<CellRef> {
        let result = self.eval(obj, CellRef::NIL, None);
        if result.is_err() {
            self.call_list.clear();
        }
        result
    }

    /// Read and evaluate every form a byte source yields, in sequence,
    /// returning the last value. Implicit top-level `do` semantics.
    ///
    /// Mirrors `examples/original_source/main.c`'s `ReadEvaluatePrint`
    /// loop: `FeSaveGC` once before the loop, `FeRestoreGC` at the top
    /// of every iteration. Without this, each top-level form nets one
    /// extra permanent root (the result `eval` pushes before returning),
    /// so a long enough input overflows the GC stack on otherwise valid
    /// programs.
    pub fn run(&mut self, source: &mut dyn ByteSource) -> CoreResult<CellRef> {
        let mut state = crate::reader::ReadState::default();
        let mut res = CellRef::NIL;
        let gc = self.save_gc();
        loop {
            self.restore_gc(gc);
            self.push_gc(res)?;
            let expr = match self.read(source, &mut state) {
                Ok(Some(expr)) => expr,
                Ok(None) => break,
                Err(err) => {
                    self.call_list.clear();
                    return Err(err);
                }
            };
            res = self.evaluate(expr)?;
        }
        Ok(res)
    }

    fn eval(
        &mut self,
        obj: CellRef,
        env: CellRef,
        newenv: Option<&mut CellRef>,
    ) -> CoreResult<CellRef> {
        if self.kind(obj) == Kind::Symbol {
            let binding = self.get_bound(obj, env);
            return Ok(self.pair_unchecked(binding).1);
        }
        if self.kind(obj) != Kind::Pair {
            return Ok(obj);
        }

        self.call_list.push(obj);
        let save = self.save_gc();

        let (head, mut arg) = self.pair_unchecked(obj);
        let fn_val = self.eval(head, env, None)?;
        let mut res = CellRef::NIL;

        match self.kind(fn_val) {
            Kind::Primitive => {
                let op = self.get_primitive_op(fn_val)?;
                res = self.eval_primitive(op, &mut arg, env, newenv)?;
            }
            Kind::Native => {
                let f = self.get_native(fn_val)?;
                let args = self.evaluate_list(arg, env)?;
                res = f(self, args)?;
            }
            Kind::Function => {
                let (_, cdr) = self.closure_parts(fn_val);
                let (closure_env, rest) = self.pair_unchecked(cdr);
                let (params, body) = self.pair_unchecked(rest);
                let evaluated_args = self.evaluate_list(arg, env)?;
                let call_env = self.args_to_env(params, evaluated_args, closure_env)?;
                res = self.do_list(body, call_env)?;
            }
            Kind::Macro => {
                let (_, cdr) = self.closure_parts(fn_val);
                let (closure_env, rest) = self.pair_unchecked(cdr);
                let (params, body) = self.pair_unchecked(rest);
                let call_env = self.args_to_env(params, arg, closure_env)?;
                let expansion = self.do_list(body, call_env)?;
                self.overwrite_with(obj, expansion)?;
                self.restore_gc(save);
                self.call_list.pop();
                return self.eval(obj, env, None);
            }
            _ => return Err(CoreError::NonCallable),
        }

        self.restore_gc(save);
        self.push_gc(res)?;
        self.call_list.pop();
        Ok(res)
    }

    fn eval_primitive(
        &mut self,
        op: Primitive,
        arg: &mut CellRef,
        env: CellRef,
        mut newenv: Option<&mut CellRef>,
    ) -> CoreResult<CellRef> {
        let mut res = CellRef::NIL;

        match op {
            Primitive::Let => {
                let sym = self.next_arg(arg)?;
                self.check(sym, Kind::Symbol)?;
                if let Some(slot) = newenv.as_deref_mut() {
                    let value = self.eval_arg(arg, env)?;
                    let pair = self.cons(sym, value)?;
                    *slot = self.cons(pair, env)?;
                }
            }

            Primitive::Set => {
                let sym = self.next_arg(arg)?;
                self.check(sym, Kind::Symbol)?;
                let binding = self.get_bound(sym, env);
                let value = self.eval_arg(arg, env)?;
                self.set_cdr(binding, value)?;
            }

            Primitive::If => {
                while !arg.is_nil() {
                    let cond = self.eval_arg(arg, env)?;
                    if !cond.is_nil() {
                        res = if arg.is_nil() {
                            cond
                        } else {
                            self.eval_arg(arg, env)?
                        };
                        break;
                    }
                    if arg.is_nil() {
                        break;
                    }
                    *arg = self.pair_unchecked(*arg).1;
                }
            }

            Primitive::Fn | Primitive::Macro => {
                let closure_cdr = self.cons(env, *arg)?;
                self.next_arg(arg)?; // validate a params list is present
                let is_macro = op == Primitive::Macro;
                res = self.alloc(Slot::Closure {
                    is_macro,
                    cdr: closure_cdr,
                })?;
            }

            Primitive::While => {
                let cond_expr = self.next_arg(arg)?;
                let n = self.save_gc();
                loop {
                    let cond = self.eval(cond_expr, env, None)?;
                    if cond.is_nil() {
                        break;
                    }
                    self.do_list(*arg, env)?;
                    self.restore_gc(n);
                }
            }

            Primitive::Quote => {
                res = self.next_arg(arg)?;
            }

            Primitive::And => {
                while !arg.is_nil() {
                    res = self.eval_arg(arg, env)?;
                    if res.is_nil() {
                        break;
                    }
                }
            }

            Primitive::Or => {
                while !arg.is_nil() {
                    res = self.eval_arg(arg, env)?;
                    if !res.is_nil() {
                        break;
                    }
                }
            }

            Primitive::Do => {
                res = self.do_list(*arg, env)?;
            }

            Primitive::Cons => {
                let a = self.eval_arg(arg, env)?;
                let b = self.eval_arg(arg, env)?;
                res = self.cons(a, b)?;
            }

            Primitive::Car => {
                let v = self.eval_arg(arg, env)?;
                res = self.car(v)?;
            }

            Primitive::Cdr => {
                let v = self.eval_arg(arg, env)?;
                res = self.cdr(v)?;
            }

            Primitive::SetCar => {
                let pair = self.eval_arg(arg, env)?;
                self.check(pair, Kind::Pair)?;
                let value = self.eval_arg(arg, env)?;
                self.set_car(pair, value)?;
            }

            Primitive::SetCdr => {
                let pair = self.eval_arg(arg, env)?;
                self.check(pair, Kind::Pair)?;
                let value = self.eval_arg(arg, env)?;
                self.set_cdr(pair, value)?;
            }

            Primitive::List => {
                res = self.evaluate_list(*arg, env)?;
            }

            Primitive::Not => {
                let v = self.eval_arg(arg, env)?;
                res = self.make_bool(v.is_nil());
            }

            Primitive::Is => {
                let a = self.eval_arg(arg, env)?;
                let b = self.eval_arg(arg, env)?;
                res = self.make_bool(self.is_equal(a, b));
            }

            Primitive::Atom => {
                let v = self.eval_arg(arg, env)?;
                res = self.make_bool(self.kind(v) != Kind::Pair);
            }

            Primitive::Print => {
                use std::io::Write as _;
                while !arg.is_nil() {
                    let v = self.eval_arg(arg, env)?;
                    let mut buf = String::new();
                    self.write_to_string(v, &mut buf, false)?;
                    let _ = write!(self.stdout, "{buf}");
                    if !arg.is_nil() {
                        let _ = write!(self.stdout, " ");
                    }
                }
                let _ = writeln!(self.stdout);
            }

            Primitive::Less => {
                let a = self.eval_arg(arg, env)?;
                self.check(a, Kind::Number)?;
                let b = self.eval_arg(arg, env)?;
                self.check(b, Kind::Number)?;
                res = self.make_bool(self.get_number(a)? < self.get_number(b)?);
            }

            Primitive::LessEqual => {
                let a = self.eval_arg(arg, env)?;
                self.check(a, Kind::Number)?;
                let b = self.eval_arg(arg, env)?;
                self.check(b, Kind::Number)?;
                res = self.make_bool(self.get_number(a)? <= self.get_number(b)?);
            }

            Primitive::Add => {
                let x = self.arith_op(arg, env, |a, b| a + b)?;
                res = self.make_number(x)?;
            }
            Primitive::Sub => {
                let x = self.arith_op(arg, env, |a, b| a - b)?;
                res = self.make_number(x)?;
            }
            Primitive::Mul => {
                let x = self.arith_op(arg, env, |a, b| a * b)?;
                res = self.make_number(x)?;
            }
            Primitive::Div => {
                let x = self.arith_op(arg, env, |a, b| a / b)?;
                res = self.make_number(x)?;
            }
        }

        Ok(res)
    }

    fn arith_op(
        &mut self,
        arg: &mut CellRef,
        env: CellRef,
        op: fn(f64, f64) -> f64,
    ) -> CoreResult<f64> {
        let first = self.eval_arg(arg, env)?;
        let mut x = self.get_number(first)?;
        while !arg.is_nil() {
            let next = self.eval_arg(arg, env)?;
            x = op(x, self.get_number(next)?);
        }
        Ok(x)
    }

    /// `next-arg(arg-cursor) -> cell`: pop one item off an argument
    /// cursor, erroring if the cursor ran out (`too few arguments`) or
    /// isn't a proper list (`dotted pair in argument list`). Exposed
    /// publicly (spec.md §6) so a `Native` callable can walk its
    /// argument list the same way the evaluator walks special-form
    /// arguments.
    pub fn next_arg(&self, arg: &mut CellRef) -> CoreResult<CellRef> {
        if self.kind(*arg) != Kind::Pair {
            if arg.is_nil() {
                return Err(CoreError::TooFewArguments);
            }
            return Err(CoreError::DottedPairInArgumentList);
        }
        let (car, cdr) = self.pair_unchecked(*arg);
        *arg = cdr;
        Ok(car)
    }

    fn eval_arg(&mut self, arg: &mut CellRef, env: CellRef) -> CoreResult<CellRef> {
        let a = self.next_arg(arg)?;
        self.eval(a, env, None)
    }

    fn evaluate_list(&mut self, mut lst: CellRef, env: CellRef) -> CoreResult<CellRef> {
        let mut head = CellRef::NIL;
        let mut tail: Option<CellRef> = None;
        while !lst.is_nil() {
            let item = self.next_arg(&mut lst)?;
            let v = self.eval(item, env, None)?;
            let cell = self.cons(v, CellRef::NIL)?;
            match tail {
                Some(t) => self.set_cdr(t, cell)?,
                None => head = cell,
            }
            tail = Some(cell);
        }
        Ok(head)
    }

    fn do_list(&mut self, mut lst: CellRef, mut env: CellRef) -> CoreResult<CellRef> {
        let mut res = CellRef::NIL;
        let save = self.save_gc();
        while !lst.is_nil() {
            self.restore_gc(save);
            self.push_gc(lst)?;
            self.push_gc(env)?;
            let next = self.next_arg(&mut lst)?;
            res = self.eval(next, env, Some(&mut env))?;
        }
        Ok(res)
    }

    fn args_to_env(
        &mut self,
        mut params: CellRef,
        mut args: CellRef,
        mut env: CellRef,
    ) -> CoreResult<CellRef> {
        while !params.is_nil() {
            if self.kind(params) != Kind::Pair {
                let pair = self.cons(params, args)?;
                env = self.cons(pair, env)?;
                break;
            }
            let (p_car, p_cdr) = self.pair_unchecked(params);
            let a_car = self.car(args)?;
            let pair = self.cons(p_car, a_car)?;
            env = self.cons(pair, env)?;
            params = p_cdr;
            args = self.cdr(args)?;
        }
        Ok(env)
    }

    /// Overwrite `dst`'s slot in place with a shallow copy of `src`'s,
    /// preserving `dst`'s `CellRef` identity — the Rust rendering of the
    /// original's `*obj = *DoList(...)` destructive macro rewrite.
    fn overwrite_with(&mut self, dst: CellRef, src: CellRef) -> CoreResult<()> {
        let copied = match &self.arena.get(src).slot {
            Slot::Free { next } => Slot::Free { next: *next },
            Slot::Nil => Slot::Nil,
            Slot::Pair { car, cdr } => Slot::Pair {
                car: *car,
                cdr: *cdr,
            },
            Slot::Number(n) => Slot::Number(*n),
            Slot::Symbol { cdr } => Slot::Symbol { cdr: *cdr },
            Slot::StringChunk { bytes, len, next } => Slot::StringChunk {
                bytes: *bytes,
                len: *len,
                next: *next,
            },
            Slot::Closure { is_macro, cdr } => Slot::Closure {
                is_macro: *is_macro,
                cdr: *cdr,
            },
            Slot::Primitive(p) => Slot::Primitive(*p),
            Slot::Native(f) => Slot::Native(*f),
            Slot::Ptr { .. } => {
                return Err(CoreError::Custom(
                    "macro expanded to an opaque ptr value, which cannot be rewritten in place"
                        .to_string(),
                ));
            }
        };
        self.arena.set_slot(dst, copied);
        Ok(())
    }

    /// `is`: identity, or value equality for numbers (within floating
    /// point tolerance) and strings (byte-sequence content).
    pub fn is_equal(&self, a: CellRef, b: CellRef) -> bool {
        if a == b {
            return true;
        }
        let ka = self.kind(a);
        if ka != self.kind(b) {
            return false;
        }
        match ka {
            Kind::Number => {
                let (Ok(x), Ok(y)) = (self.get_number(a), self.get_number(b)) else {
                    return false;
                };
                is_nearly_equal(x, y, f64::EPSILON)
            }
            Kind::String => crate::string_builder::string_chains_equal(self, a, b),
            _ => false,
        }
    }
}

/// Ported from <https://floating-point-gui.de/errors/comparison/>.
fn is_nearly_equal(a: f64, b: f64, epsilon: f64) -> bool {
    if a == b {
        return true;
    }
    let abs_a = a.abs();
    let abs_b = b.abs();
    let diff = (a - b).abs();
    if a == 0.0 || b == 0.0 || (abs_a + abs_b) < f64::MIN_POSITIVE {
        diff < epsilon * f64::MIN_POSITIVE
    } else {
        diff / (abs_a + abs_b).min(f64::MAX) < epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(ctx: &mut Context, src: &str) -> CellRef {
        let bytes: Vec<u8> = src.bytes().collect();
        let mut idx = 0usize;
        let mut source = move || {
            if idx < bytes.len() {
                let b = bytes[idx];
                idx += 1;
                Some(b)
            } else {
                None
            }
        };
        ctx.run(&mut source).unwrap()
    }

    #[test]
    fn arithmetic_sums_left_to_right() {
        let mut ctx = Context::open(1024);
        let r = eval_str(&mut ctx, "(+ 1 2 3)");
        assert_eq!(ctx.get_number(r).unwrap(), 6.0);
    }

    #[test]
    fn print_writes_space_separated_values_to_the_configured_sink() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct SharedBuf(Rc<RefCell<Vec<u8>>>);
        impl std::io::Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut ctx = Context::open(256);
        let buf = Rc::new(RefCell::new(Vec::new()));
        ctx.set_stdout(Box::new(SharedBuf(buf.clone())));
        eval_str(&mut ctx, "(print 1 2 3)");
        assert_eq!(buf.borrow().as_slice(), b"1 2 3\n");
    }

    #[test]
    fn factorial_recurses_via_a_named_function() {
        let mut ctx = Context::open(4096);
        let r = eval_str(
            &mut ctx,
            "(do (= fact (fn (n) (if (<= n 1) 1 (* n (fact (- n 1)))))) (fact 5))",
        );
        assert_eq!(ctx.get_number(r).unwrap(), 120.0);
    }

    #[test]
    fn macro_expands_and_is_cached_in_place() {
        let mut ctx = Context::open(4096);
        let r = eval_str(&mut ctx, "(do (= sq (mac (x) (list '* x x))) (sq 5))");
        assert_eq!(ctx.get_number(r).unwrap(), 25.0);
    }

    #[test]
    fn setcar_mutates_in_place() {
        let mut ctx = Context::open(1024);
        let r = eval_str(&mut ctx, "(do (= p (cons 1 2)) (setcar p 9) p)");
        assert_eq!(ctx.write_bytes(r, false).unwrap(), b"(9 . 2)");
    }

    #[test]
    fn car_and_cdr_of_nil_are_nil() {
        let mut ctx = Context::open(256);
        let r = eval_str(&mut ctx, "(car nil)");
        assert!(r.is_nil());
        let r = eval_str(&mut ctx, "(cdr nil)");
        assert!(r.is_nil());
    }

    #[test]
    fn is_uses_near_equality_for_numbers() {
        let mut ctx = Context::open(256);
        let r = eval_str(&mut ctx, "(is (+ 0.1 0.2) 0.3)");
        assert_eq!(r, ctx.t());
    }

    #[test]
    fn too_few_arguments_is_an_error() {
        let mut ctx = Context::open(256);
        let bytes: Vec<u8> = "(+)".bytes().collect();
        let mut idx = 0usize;
        let mut source = move || {
            if idx < bytes.len() {
                let b = bytes[idx];
                idx += 1;
                Some(b)
            } else {
                None
            }
        };
        assert_eq!(ctx.run(&mut source), Err(CoreError::TooFewArguments));
    }

    #[test]
    fn run_does_not_leak_a_root_per_top_level_form() {
        let mut ctx = Context::with_config(
            crate::context::CoreConfig::new()
                .with_cell_capacity(65_536)
                .with_root_stack_capacity(8),
        );
        let src = "(+ 1 1) ".repeat(100);
        let r = eval_str(&mut ctx, &src);
        assert_eq!(ctx.get_number(r).unwrap(), 2.0);
    }

    #[test]
    fn an_evaluation_error_clears_the_call_list_traceback() {
        let mut ctx = Context::open(1024);
        assert!(eval_str_result(&mut ctx, "(car 1)").is_err());
        assert!(ctx.call_list.is_empty(), "call_list was not cleared after an error");

        let r = eval_str(&mut ctx, "(+ 1 2)");
        assert_eq!(ctx.get_number(r).unwrap(), 3.0);
    }

    fn eval_str_result(ctx: &mut Context, src: &str) -> CoreResult<CellRef> {
        let bytes: Vec<u8> = src.bytes().collect();
        let mut idx = 0usize;
        let mut source = move || {
            if idx < bytes.len() {
                let b = bytes[idx];
                idx += 1;
                Some(b)
            } else {
                None
            }
        };
        ctx.run(&mut source)
    }
}
