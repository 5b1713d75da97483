//! Printer/writer shared by `print`, by `to_string`/`Display`-style
//! introspection, and by the fatal-error traceback path.
//!
//! Strings are byte sequences (spec.md's explicit non-goal: no
//! Unicode-aware handling), so the primitive operation here is "write
//! bytes to a sink." Rust's `String` demands valid UTF-8, so the
//! higher-level `to_string`/`write_to_string` helpers are the one place
//! that boundary is crossed, via a lossy conversion — exactly the
//! "observable contract is byte-sequence equality and printed form"
//! clause in spec.md §9's string-representation note.

use crate::cell::{CellRef, Kind};
use crate::context::Context;
use crate::error::CoreResult;

impl Context {
    /// `write(cell, sink, quote-strings?)`.
    pub fn write(
        &self,
        cell: CellRef,
        sink: &mut dyn FnMut(u8),
        quote_strings: bool,
    ) -> CoreResult<()> {
        match self.kind(cell) {
            Kind::Nil => {
                write_str(sink, "nil");
                Ok(())
            }
            Kind::Number => {
                let n = self.get_number(cell)?;
                write_str(sink, &format_number(n));
                Ok(())
            }
            Kind::Pair => self.write_pair(cell, sink, quote_strings),
            Kind::Symbol => {
                let name = self.symbol_name_bytes(cell);
                for b in name {
                    sink(b);
                }
                Ok(())
            }
            Kind::String => {
                self.write_string_chain(cell, sink, quote_strings);
                Ok(())
            }
            other => {
                write_str(sink, &format!("[{other} {}]", cell.debug_id()));
                Ok(())
            }
        }
    }

    fn write_pair(
        &self,
        mut obj: CellRef,
        sink: &mut dyn FnMut(u8),
        quote_strings: bool,
    ) -> CoreResult<()> {
        sink(b'(');
        loop {
            let (car, cdr) = self.pair_unchecked(obj);
            self.write(car, sink, true)?;
            if self.kind(cdr) != Kind::Pair {
                if !cdr.is_nil() {
                    write_str(sink, " . ");
                    self.write(cdr, sink, true)?;
                }
                break;
            }
            sink(b' ');
            obj = cdr;
        }
        sink(b')');
        let _ = quote_strings; // inner elements are always written quoted, per spec.md §4.7
        Ok(())
    }

    fn write_string_chain(&self, mut s: CellRef, sink: &mut dyn FnMut(u8), quote_strings: bool) {
        if quote_strings {
            sink(b'"');
        }
        while !s.is_nil() {
            for &b in self.string_bytes(s).expect("string_bytes on a string cell") {
                if quote_strings && b == b'"' {
                    sink(b'\\');
                }
                sink(b);
            }
            s = self.string_next_chunk(s);
        }
        if quote_strings {
            sink(b'"');
        }
    }

    fn symbol_name_bytes(&self, sym: CellRef) -> Vec<u8> {
        let binding = self.symbol_binding_pair(sym);
        let (name, _) = self.pair_unchecked(binding);
        crate::string_builder::string_chain_bytes(self, name)
    }

    /// Write into an in-memory byte buffer rather than a sink closure.
    pub fn write_bytes(&self, cell: CellRef, quote_strings: bool) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write(cell, &mut |b| out.push(b), quote_strings)?;
        Ok(out)
    }

    /// `to-string(cell, buffer, size) -> bytes-written`. Writes at most
    /// `dst.len() - 1` bytes into `dst`, NUL-terminates the written
    /// portion, and returns the number of bytes written (excluding the
    /// terminator) — a direct port of `FeToString`'s `CharPtrInt`
    /// truncating sink, which always calls the writer with
    /// `quote-strings? = false`.
    pub fn to_string_bounded(&self, cell: CellRef, dst: &mut [u8]) -> CoreResult<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let capacity = dst.len() - 1;
        let mut written = 0usize;
        self.write(
            cell,
            &mut |b| {
                if written < capacity {
                    dst[written] = b;
                    written += 1;
                }
            },
            false,
        )?;
        dst[written] = 0;
        Ok(written)
    }

    pub(crate) fn write_to_string(
        &self,
        cell: CellRef,
        out: &mut String,
        quote_strings: bool,
    ) -> CoreResult<()> {
        let bytes = self.write_bytes(cell, quote_strings)?;
        out.push_str(&String::from_utf8_lossy(&bytes));
        Ok(())
    }
}

impl CellRef {
    fn debug_id(self) -> u32 {
        self.0
    }
}

fn write_str(sink: &mut dyn FnMut(u8), s: &str) {
    for b in s.bytes() {
        sink(b);
    }
}

/// `%.7g` formatting, matching the original's `Format(buf, "%.7g", n)`.
fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if !n.is_finite() {
        return if n.is_nan() {
            "nan".to_string()
        } else if n > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }

    let precision = 7usize;
    let exponent = n.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= precision as i32 {
        let mut s = format!("{:.*e}", precision.saturating_sub(1), n);
        // Rust renders `1e2` as `1e2`; `%g` wants `1e+02`-style two-digit
        // exponents with an explicit sign, and trims trailing zeros in
        // the mantissa.
        if let Some(epos) = s.find('e') {
            let (mantissa, exp) = s.split_at(epos);
            let exp_val: i32 = exp[1..].parse().unwrap_or(0);
            let mantissa = trim_trailing_zeros(mantissa);
            s = format!("{mantissa}e{}{:02}", if exp_val < 0 { "-" } else { "+" }, exp_val.abs());
        }
        s
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        let s = format!("{n:.decimals$}");
        trim_trailing_zeros(&s).to_string()
    }
}

fn trim_trailing_zeros(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    let trimmed = s.trim_end_matches('0');
    trimmed.strip_suffix('.').unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn nil_prints_as_nil() {
        let ctx = Context::open(256);
        assert_eq!(ctx.write_bytes(CellRef::NIL, false).unwrap(), b"nil");
    }

    #[test]
    fn numbers_use_seven_significant_digits() {
        let mut ctx = Context::open(256);
        let n = ctx.make_number(1.0 / 3.0).unwrap();
        assert_eq!(ctx.write_bytes(n, false).unwrap(), b"0.3333333");
        let whole = ctx.make_number(120.0).unwrap();
        assert_eq!(ctx.write_bytes(whole, false).unwrap(), b"120");
    }

    #[test]
    fn lists_print_with_dotted_tail_when_improper() {
        let mut ctx = Context::open(256);
        let one = ctx.make_number(1.0).unwrap();
        let two = ctx.make_number(2.0).unwrap();
        let rest = ctx.cons(two, CellRef::NIL).unwrap();
        let proper = ctx.cons(one, rest).unwrap();
        assert_eq!(ctx.write_bytes(proper, false).unwrap(), b"(1 2)");

        let dotted = ctx.cons(one, two).unwrap();
        assert_eq!(ctx.write_bytes(dotted, false).unwrap(), b"(1 . 2)");
    }

    #[test]
    fn strings_escape_embedded_quotes_only_when_quoting() {
        let mut ctx = Context::open(256);
        let s = ctx.make_string(b"a\"b").unwrap();
        assert_eq!(ctx.write_bytes(s, false).unwrap(), b"a\"b");
        assert_eq!(ctx.write_bytes(s, true).unwrap(), b"\"a\\\"b\"");
    }

    #[test]
    fn to_string_bounded_truncates_and_nul_terminates() {
        let mut ctx = Context::open(256);
        let s = ctx.make_string(b"hello world").unwrap();

        let mut full = [0u8; 32];
        let written = ctx.to_string_bounded(s, &mut full).unwrap();
        assert_eq!(written, 11);
        assert_eq!(&full[..written], b"hello world");
        assert_eq!(full[written], 0);

        let mut small = [0u8; 6];
        let written = ctx.to_string_bounded(s, &mut small).unwrap();
        assert_eq!(written, 5);
        assert_eq!(&small[..written], b"hello");
        assert_eq!(small[written], 0);
    }
}
