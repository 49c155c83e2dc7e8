use thiserror::Error;

/// Errors produced while encoding or decoding record fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The input ended before a field could be read.
    #[error("truncated input at byte {offset}: need {needed} more bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 in string field at byte {offset}")]
    InvalidUtf8 { offset: usize },

    /// Bytes were left over after the record was fully decoded.
    #[error("{remaining} trailing bytes after record")]
    TrailingBytes { remaining: usize },
}

/// Convenience alias for codec results.
pub type TypeResult<T> = Result<T, TypeError>;
