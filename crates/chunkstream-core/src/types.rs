//! Strong type definitions for chunk addressing.
//!
//! Chunks are identified by fixed-size content hashes. Batches of hashes
//! travel on the wire as one flat buffer, so this module also owns the
//! helpers for slicing such buffers.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Byte length of one chunk hash.
pub const HASH_SIZE: usize = 32;

/// A 32-byte chunk address.
///
/// Two chunks with the same content have the same `ChunkHash`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkHash(pub [u8; HASH_SIZE]);

impl ChunkHash {
    /// Create a new ChunkHash from raw bytes.
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Compute the content address of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for ChunkHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_SIZE]> for ChunkHash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for ChunkHash {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; HASH_SIZE] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidHashLength(slice.len()))?;
        Ok(Self(arr))
    }
}

/// Number of hashes in a flat hash buffer.
pub fn hash_count(buffer: &[u8]) -> Result<usize, CoreError> {
    if buffer.len() % HASH_SIZE != 0 {
        return Err(CoreError::InvalidHashBuffer(buffer.len()));
    }
    Ok(buffer.len() / HASH_SIZE)
}

/// Split a flat hash buffer into hashes, in buffer order.
pub fn split_hashes(buffer: &[u8]) -> Result<Vec<ChunkHash>, CoreError> {
    hash_count(buffer)?;
    buffer
        .chunks_exact(HASH_SIZE)
        .map(ChunkHash::try_from)
        .collect()
}

/// Concatenate hashes into the flat wire buffer.
pub fn join_hashes<'a, I>(hashes: I) -> Bytes
where
    I: IntoIterator<Item = &'a ChunkHash>,
{
    let mut buf = BytesMut::new();
    for hash in hashes {
        buf.put_slice(&hash.0);
    }
    buf.freeze()
}
