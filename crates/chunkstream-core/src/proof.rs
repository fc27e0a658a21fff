//! Handover and takeover proofs.
//!
//! Both are produced and checked outside this workspace; the protocol only
//! carries them verbatim between the two ends of a subscription.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Attestation by the offering side that a batch was handed over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverProof(pub Bytes);

/// Attestation by the requesting side that a batch was received in full.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverProof(pub Bytes);

impl HandoverProof {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TakeoverProof {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
