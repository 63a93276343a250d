//! Parse errors for scale data.

use thiserror::Error;

/// Errors that can occur when parsing raw scale payloads.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Payload was shorter than the format requires.
    #[error("payload requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Minimum number of bytes the format requires.
        expected: usize,
        /// Number of bytes actually received.
        actual: usize,
    },

    /// A field held a value outside its valid range.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;
