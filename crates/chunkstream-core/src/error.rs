//! Error types for chunkstream core primitives.

use thiserror::Error;

/// Errors raised while interpreting core protocol values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("hash buffer length {0} is not a multiple of the hash size")]
    InvalidHashBuffer(usize),

    #[error("invalid hash length: expected 32 bytes, got {0}")]
    InvalidHashLength(usize),

    #[error("want mask too short: {len} bytes cannot address {count} hashes")]
    MaskTooShort { len: usize, count: usize },

    #[error("want mask index {index} out of bounds for {count} hashes")]
    MaskIndexOutOfBounds { index: usize, count: usize },

    #[error("unknown priority level: {0}")]
    UnknownPriority(u8),
}
