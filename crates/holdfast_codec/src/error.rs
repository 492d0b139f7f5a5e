//! Error types for codec operations.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding entity blobs.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input ended before the value was complete.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Offset where more bytes were expected.
        offset: usize,
    },

    /// A length prefix exceeded the allowed maximum.
    #[error("length {claimed} exceeds maximum {max_allowed}")]
    LengthOverflow {
        /// The length claimed by the prefix.
        claimed: u64,
        /// The maximum allowed length.
        max_allowed: u64,
    },

    /// An unknown wire tag was encountered.
    #[error("unknown wire tag {tag:#04x} at offset {offset}")]
    BadTag {
        /// The offending tag byte.
        tag: u8,
        /// Offset of the tag byte.
        offset: usize,
    },

    /// A text value was not valid UTF-8.
    #[error("invalid UTF-8 in text value")]
    InvalidUtf8,

    /// Bytes remained after the top-level value was decoded.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        remaining: usize,
    },

    /// The blob structure is invalid.
    #[error("invalid blob structure: {message}")]
    InvalidStructure {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
