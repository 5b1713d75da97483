//! Tokenless recursive-descent reader.
//!
//! One byte of lookahead is enough: every production is decided by the
//! character that starts it, and the default (symbol/number/`nil`)
//! branch accumulates into a fixed-size buffer until it hits whitespace,
//! a delimiter, or EOF. `)` doesn't error out of the whole read; it
//! returns a private sentinel (`RightParen`) that only the `(` and
//! top-level cases are allowed to see, matching the original's
//! `static FeObject rparen` trick without needing a second arena slot
//! for it.

use crate::cell::CellRef;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};

const SYMBOL_BUF_CAP: usize = 64;
const DELIMITERS: &[u8] = b" \n\t\r();";

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\n' | b'\t' | b'\r')
}

fn is_delimiter(b: u8) -> bool {
    DELIMITERS.contains(&b)
}

/// What one call to the low-level reader produced.
enum Read {
    Eof,
    RightParen,
    Value(CellRef),
}

/// A byte source: returns `None` at end of input. Mirrors spec.md's
/// `byte-source` abstraction (the original's `FeReadFn`).
pub trait ByteSource {
    fn next_byte(&mut self) -> Option<u8>;
}

impl<F: FnMut() -> Option<u8>> ByteSource for F {
    fn next_byte(&mut self) -> Option<u8> {
        self()
    }
}

/// Reader-local lookahead state threaded across recursive `read` calls
/// within one top-level `Context::read`, mirroring `ctx->nextchr`.
#[derive(Default)]
pub struct ReadState {
    pending: Option<u8>,
}

impl Context {
    /// `read(context, byte-source, state) -> cell-or-null`.
    ///
    /// Returns `Ok(None)` at end of input, `Ok(Some(cell))` for a
    /// complete datum, or `Err` for a malformed read (including a
    /// top-level stray `)`).
    pub fn read(
        &mut self,
        source: &mut dyn ByteSource,
        state: &mut ReadState,
    ) -> CoreResult<Option<CellRef>> {
        match self.read_one(source, state)? {
            Read::Eof => Ok(None),
            Read::RightParen => Err(CoreError::StrayParen),
            Read::Value(v) => Ok(Some(v)),
        }
    }

    fn next_byte(&self, source: &mut dyn ByteSource, state: &mut ReadState) -> Option<u8> {
        state.pending.take().or_else(|| source.next_byte())
    }

    fn read_one(&mut self, source: &mut dyn ByteSource, state: &mut ReadState) -> CoreResult<Read> {
        let mut chr = self.next_byte(source, state);

        while let Some(b) = chr {
            if !is_whitespace(b) {
                break;
            }
            chr = source.next_byte();
        }

        let chr = match chr {
            None => return Ok(Read::Eof),
            Some(b) => b,
        };

        match chr {
            b';' => {
                let mut c = Some(chr);
                while let Some(b) = c {
                    if b == b'\n' {
                        break;
                    }
                    c = source.next_byte();
                }
                self.read_one(source, state)
            }
            b')' => Ok(Read::RightParen),
            b'(' => self.read_list(source, state).map(Read::Value),
            b'\'' => {
                let inner = match self.read_one(source, state)? {
                    Read::Value(v) => v,
                    _ => return Err(CoreError::StrayQuote),
                };
                // No explicit save/restore here: `inner` (and every cell
                // built below) stays rooted because `alloc` pushes each
                // freshly made cell onto the GC stack and nothing pops it
                // until the enclosing `read_list` batches its restores.
                let quote = self.make_symbol(b"quote")?;
                let pair = self.cons(inner, CellRef::NIL)?;
                self.cons(quote, pair).map(Read::Value)
            }
            b'"' => self.read_string(source, state).map(Read::Value),
            _ => self.read_atom(chr, source, state).map(Read::Value),
        }
    }

    fn read_list(&mut self, source: &mut dyn ByteSource, state: &mut ReadState) -> CoreResult<CellRef> {
        let mut result = CellRef::NIL;
        let mut tail: Option<CellRef> = None;
        let save = self.save_gc();
        self.push_gc(result)?;

        loop {
            let v = match self.read_one(source, state)? {
                Read::RightParen => break,
                Read::Eof => return Err(CoreError::UnclosedList),
                Read::Value(v) => v,
            };

            if self.is_dot_symbol(v) {
                let rest = self
                    .read(source, state)?
                    .ok_or(CoreError::UnclosedList)?;
                match tail {
                    Some(t) => self.set_cdr(t, rest)?,
                    None => result = rest,
                }
            } else {
                let cell = self.cons(v, CellRef::NIL)?;
                match tail {
                    Some(t) => self.set_cdr(t, cell)?,
                    None => result = cell,
                }
                tail = Some(cell);
            }

            self.restore_gc(save);
            self.push_gc(result)?;
        }

        self.restore_gc(save);
        Ok(result)
    }

    fn is_dot_symbol(&self, v: CellRef) -> bool {
        if self.kind(v) != crate::cell::Kind::Symbol {
            return false;
        }
        let binding = self.symbol_binding_pair(v);
        let (name, _) = self.pair_unchecked(binding);
        crate::string_builder::string_chain_equals(self, name, b".")
    }

    fn read_string(&mut self, source: &mut dyn ByteSource, state: &mut ReadState) -> CoreResult<CellRef> {
        let head = self.string_start()?;
        let mut tail = head;
        let mut chr = self.next_byte(source, state).ok_or(CoreError::UnclosedString)?;

        while chr != b'"' {
            if chr == b'\\' {
                chr = self.next_byte(source, state).ok_or(CoreError::UnclosedString)?;
                chr = match chr {
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    other => other,
                };
            }
            tail = self.build_string(tail, chr)?;
            chr = self.next_byte(source, state).ok_or(CoreError::UnclosedString)?;
        }
        Ok(head)
    }

    fn read_atom(&mut self, first: u8, source: &mut dyn ByteSource, state: &mut ReadState) -> CoreResult<CellRef> {
        let mut buf = [0u8; SYMBOL_BUF_CAP];
        let mut len = 0usize;
        let mut chr = Some(first);

        loop {
            let b = match chr {
                Some(b) if !is_delimiter(b) => b,
                _ => break,
            };
            // The original reserves the buffer's last byte for a NUL
            // terminator it never needs here, so the accepted token length
            // tops out one short of the buffer's own capacity: a token
            // exactly `SYMBOL_BUF_CAP` bytes long is what first trips this.
            if len == buf.len() - 1 {
                return Err(CoreError::SymbolTooLong);
            }
            buf[len] = b;
            len += 1;
            chr = source.next_byte();
        }
        state.pending = chr;

        let token = &buf[..len];
        if let Some(n) = parse_number(token) {
            return self.make_number(n);
        }
        if token == b"nil" {
            return Ok(CellRef::NIL);
        }
        self.make_symbol(token)
    }
}

/// Parse a `strtod`-then-delimiter-check token: the whole token must
/// parse (Rust's `f64::from_str` already rejects trailing garbage,
/// unlike `strtod`, so this is simpler than the original's
/// "did strtod's endptr land on a delimiter" check). Falls back to a
/// C99 hex-float parse (`strtod` accepts `0x1.8p3`-style tokens; Rust's
/// `f64::from_str` does not) so exotic literals the original reader
/// would accept still parse as numbers here.
fn parse_number(token: &[u8]) -> Option<f64> {
    if token.is_empty() {
        return None;
    }
    let s = std::str::from_utf8(token).ok()?;
    s.parse::<f64>().ok().or_else(|| parse_hex_float(s))
}

/// `[sign] "0x" hexdigits ["." hexdigits] ("p"|"P") [sign] decdigits`,
/// the C99 hex-float grammar `strtod` accepts. The binary exponent is
/// mandatory here, matching `strtod`: without it the token isn't a
/// valid hex float and falls through to being read as a symbol.
fn parse_hex_float(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let neg = match bytes.first() {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };

    if bytes.len() < i + 2 || bytes[i] != b'0' || (bytes[i + 1] != b'x' && bytes[i + 1] != b'X') {
        return None;
    }
    i += 2;

    let mut mantissa = 0f64;
    let mut any_digits = false;
    while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
        mantissa = mantissa * 16.0 + hex_digit_value(bytes[i]) as f64;
        any_digits = true;
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let mut scale = 1.0 / 16.0;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            mantissa += hex_digit_value(bytes[i]) as f64 * scale;
            scale /= 16.0;
            any_digits = true;
            i += 1;
        }
    }
    if !any_digits || i >= bytes.len() || (bytes[i] != b'p' && bytes[i] != b'P') {
        return None;
    }
    i += 1;

    let exp_neg = match bytes.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };
    let exp_start = i;
    let mut exponent = 0i32;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        exponent = exponent * 10 + (bytes[i] - b'0') as i32;
        i += 1;
    }
    if i == exp_start || i != bytes.len() {
        return None;
    }
    if exp_neg {
        exponent = -exponent;
    }

    let value = mantissa * 2f64.powi(exponent);
    Some(if neg { -value } else { value })
}

fn hex_digit_value(b: u8) -> u32 {
    match b {
        b'0'..=b'9' => (b - b'0') as u32,
        b'a'..=b'f' => (b - b'a' + 10) as u32,
        b'A'..=b'F' => (b - b'A' + 10) as u32,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(ctx: &mut Context, src: &str) -> Vec<CellRef> {
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
        let mut state = ReadState::default();
        let mut out = Vec::new();
        while let Some(v) = ctx.read(&mut source, &mut state).unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn reads_a_hex_float_literal() {
        let mut ctx = Context::open(256);
        let vs = read_all(&mut ctx, "0x1.8p3");
        assert_eq!(ctx.get_number(vs[0]).unwrap(), 12.0);
        let vs = read_all(&mut ctx, "-0x1p-1");
        assert_eq!(ctx.get_number(vs[0]).unwrap(), -0.5);
    }

    #[test]
    fn reads_a_number() {
        let mut ctx = Context::open(256);
        let vs = read_all(&mut ctx, "42");
        assert_eq!(ctx.get_number(vs[0]).unwrap(), 42.0);
    }

    #[test]
    fn reads_nil_and_symbols() {
        let mut ctx = Context::open(256);
        let vs = read_all(&mut ctx, "nil foo");
        assert!(vs[0].is_nil());
        assert_eq!(ctx.kind(vs[1]), crate::cell::Kind::Symbol);
    }

    #[test]
    fn reads_a_proper_list() {
        let mut ctx = Context::open(256);
        let vs = read_all(&mut ctx, "(1 2 3)");
        assert_eq!(ctx.write_bytes(vs[0], false).unwrap(), b"(1 2 3)");
    }

    #[test]
    fn reads_a_dotted_pair() {
        let mut ctx = Context::open(256);
        let vs = read_all(&mut ctx, "(1 . 2)");
        assert_eq!(ctx.write_bytes(vs[0], false).unwrap(), b"(1 . 2)");
    }

    #[test]
    fn quote_shorthand_expands() {
        let mut ctx = Context::open(256);
        let vs = read_all(&mut ctx, "'x");
        assert_eq!(ctx.write_bytes(vs[0], false).unwrap(), b"(quote x)");
    }

    #[test]
    fn strings_support_escapes() {
        let mut ctx = Context::open(256);
        let vs = read_all(&mut ctx, "\"a\\nb\"");
        assert_eq!(ctx.write_bytes(vs[0], false).unwrap(), b"a\nb");
    }

    #[test]
    fn unclosed_list_is_an_error() {
        let mut ctx = Context::open(256);
        let bytes = b"(1 2";
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
        let mut state = ReadState::default();
        assert_eq!(ctx.read(&mut source, &mut state), Err(CoreError::UnclosedList));
    }

    #[test]
    fn stray_right_paren_is_an_error() {
        let mut ctx = Context::open(256);
        let bytes = b")";
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
        let mut state = ReadState::default();
        assert_eq!(ctx.read(&mut source, &mut state), Err(CoreError::StrayParen));
    }

    #[test]
    fn symbol_too_long_is_rejected() {
        let mut ctx = Context::open(256);
        let long = "x".repeat(SYMBOL_BUF_CAP + 1);
        let bytes: Vec<u8> = long.bytes().collect();
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
        let mut state = ReadState::default();
        assert_eq!(ctx.read(&mut source, &mut state), Err(CoreError::SymbolTooLong));
    }
}
