//! Codec error types.

use fission_common::EngineError;
use thiserror::Error;

/// Result type alias for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors produced while reading or writing framed byte buffers.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A read ran past the end of the buffer.
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    BufferUnderflow {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A write would exceed the buffer's capacity.
    #[error("buffer overflow: capacity {capacity}, attempted {attempted}")]
    BufferOverflow {
        /// The buffer's fixed capacity.
        capacity: usize,
        /// Total bytes the write would have required.
        attempted: usize,
    },

    /// A payload checksum did not match its body.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried by the payload.
        expected: u32,
        /// Checksum computed over the body.
        actual: u32,
    },

    /// The payload was structurally invalid.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<CodecError> for EngineError {
    fn from(err: CodecError) -> Self {
        EngineError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fission_common::ErrorCode;

    #[test]
    fn test_converts_to_serialization_error() {
        let err: EngineError = CodecError::Malformed("truncated frame".to_string()).into();
        assert_eq!(err.code(), ErrorCode::Serialization);
    }
}
