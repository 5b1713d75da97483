//! Core error type.
//!
//! Hand-rolled rather than built on `thiserror`/`anyhow`: this mirrors how
//! the rest of this workspace's core-tier crates report failures (see
//! `seq-compiler`'s `codegen::error::CodeGenError`), reserving heavier
//! error-handling dependencies for the outer, host-facing layers.

use std::fmt;

use crate::cell::Kind;

/// Every failure this core can raise, matching the wording the embedder
/// sees in a traceback line for line.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// `expected <kind>, got <kind>`
    TypeError { expected: Kind, actual: Kind },
    /// A list opened with `(` ran out of input before its `)`.
    UnclosedList,
    /// A string literal ran out of input before its closing `"`.
    UnclosedString,
    /// `'` at end of input with no following form.
    StrayQuote,
    /// `)` with no matching `(` at the top of `read`.
    StrayParen,
    /// A token exceeded the reader's fixed token-buffer capacity.
    SymbolTooLong,
    /// An argument cursor ran out of pairs before the callee needed one.
    TooFewArguments,
    /// An argument list ended in a non-nil atom instead of a proper list.
    DottedPairInArgumentList,
    /// The head of a call form evaluated to something uncallable.
    NonCallable,
    /// `push` onto a full root stack.
    GcStackOverflow,
    /// Allocation failed even after a collection.
    OutOfMemory,
    /// Anything else a host or primitive wants to report (`assert`, etc).
    Custom(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::TypeError { expected, actual } => {
                write!(f, "expected {expected}, got {actual}")
            }
            CoreError::UnclosedList => write!(f, "unclosed list"),
            CoreError::UnclosedString => write!(f, "unclosed string"),
            CoreError::StrayQuote => write!(f, "stray '''"),
            CoreError::StrayParen => write!(f, "stray ')'"),
            CoreError::SymbolTooLong => write!(f, "symbol too long"),
            CoreError::TooFewArguments => write!(f, "too few arguments"),
            CoreError::DottedPairInArgumentList => {
                write!(f, "dotted pair in argument list")
            }
            CoreError::NonCallable => write!(f, "tried to call non-callable value"),
            CoreError::GcStackOverflow => write!(f, "gc stack overflow"),
            CoreError::OutOfMemory => write!(f, "out of memory"),
            CoreError::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<String> for CoreError {
    fn from(msg: String) -> Self {
        CoreError::Custom(msg)
    }
}

impl From<&str> for CoreError {
    fn from(msg: &str) -> Self {
        CoreError::Custom(msg.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
