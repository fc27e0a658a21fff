//! Want-mask: which hashes of an offered batch the client still needs.
//!
//! Encoding: one bit per offered hash. Hash `i` lives in byte `i / 8` at bit
//! `i % 8`, least-significant bit first, so a three-hash offer wanting the
//! first and last hash encodes as `[0x05]`. A mask is `ceil(n / 8)` bytes;
//! bits past `n` are ignored on decode.

use bytes::Bytes;

use crate::error::CoreError;

/// Bit vector over the positions of one offered batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantMask {
    bits: Vec<u8>,
    len: usize,
}

/// Bytes needed to address `count` positions.
pub const fn mask_len(count: usize) -> usize {
    (count + 7) / 8
}

impl WantMask {
    /// An empty mask over `len` positions.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; mask_len(len)],
            len,
        }
    }

    /// Decode a mask received for an offer of `len` hashes.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Result<Self, CoreError> {
        let needed = mask_len(len);
        if bytes.len() < needed {
            return Err(CoreError::MaskTooShort {
                len: bytes.len(),
                count: len,
            });
        }
        let mut bits = bytes[..needed].to_vec();
        let tail = len % 8;
        if tail != 0 {
            if let Some(last) = bits.last_mut() {
                *last &= (1u8 << tail) - 1;
            }
        }
        Ok(Self { bits, len })
    }

    /// Number of addressable positions.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mark position `index` as wanted.
    pub fn set(&mut self, index: usize) -> Result<(), CoreError> {
        if index >= self.len {
            return Err(CoreError::MaskIndexOutOfBounds {
                index,
                count: self.len,
            });
        }
        self.bits[index / 8] |= 1 << (index % 8);
        Ok(())
    }

    /// Whether position `index` is wanted. Out-of-range positions are not.
    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    /// Wanted positions in ascending order.
    pub fn wanted(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&i| self.get(i))
    }

    /// Number of wanted positions.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// The wire encoding.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }
}
