//! Stream protocol message types.
//!
//! Every message carries a numeric code. On the wire a frame is the code
//! byte followed by the CBOR encoding of the message body.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use chunkstream_core::{ChunkHash, HandoverProof, Priority, Range, StreamId, TakeoverProof};

use crate::error::{Result, SyncError};

/// Unique identifier for a peer in the network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random peer ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Message codes.
pub mod codes {
    pub const UNSUBSCRIBE: u8 = 0;
    pub const OFFERED_HASHES: u8 = 1;
    pub const WANTED_HASHES: u8 = 2;
    pub const TAKEOVER_PROOF: u8 = 3;
    pub const SUBSCRIBE: u8 = 4;
    pub const CHUNK_DELIVERY: u8 = 6;
    pub const SUBSCRIBE_ERROR: u8 = 7;
}

/// Message size limits.
pub mod limits {
    /// Default max hashes in one OfferedHashes batch.
    pub const MAX_HASHES_PER_OFFER: usize = 1024;
    /// Max chunk payload in one ChunkDelivery.
    pub const MAX_CHUNK_SIZE: usize = 1 << 20;
    /// Max length of a SubscribeError text.
    pub const MAX_ERROR_LEN: usize = 1024;
}

/// Request to start serving a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeMsg {
    pub stream: StreamId,
    /// Historical slice to serve in addition to (or instead of) the live tail.
    pub history: Option<Range>,
    pub priority: Priority,
}

/// Request to tear down a stream in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeMsg {
    pub stream: StreamId,
}

/// One batch offered by the serving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferedHashesMsg {
    pub stream: StreamId,
    pub from: u64,
    pub to: u64,
    /// Concatenated hashes, `HASH_SIZE` bytes each.
    pub hashes: Bytes,
    pub handover_proof: HandoverProof,
}

/// The requesting side's answer to an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantedHashesMsg {
    pub stream: StreamId,
    /// Want-mask over the offered hashes.
    pub want: Bytes,
    /// Next range to serve; `to == 0` leaves the bound to the server.
    pub from: u64,
    pub to: u64,
}

/// Proof that a batch was received in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverProofMsg {
    pub stream: StreamId,
    pub proof: TakeoverProof,
}

/// Chunk data pushed for a wanted hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDeliveryMsg {
    pub hash: ChunkHash,
    pub data: Bytes,
}

/// Refusal of a Subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeErrorMsg {
    pub error: String,
}

/// Stream protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Unsubscribe(UnsubscribeMsg),
    OfferedHashes(OfferedHashesMsg),
    WantedHashes(WantedHashesMsg),
    TakeoverProof(TakeoverProofMsg),
    Subscribe(SubscribeMsg),
    ChunkDelivery(ChunkDeliveryMsg),
    SubscribeError(SubscribeErrorMsg),
}

impl StreamMessage {
    /// Numeric wire code.
    pub fn code(&self) -> u8 {
        match self {
            StreamMessage::Unsubscribe(_) => codes::UNSUBSCRIBE,
            StreamMessage::OfferedHashes(_) => codes::OFFERED_HASHES,
            StreamMessage::WantedHashes(_) => codes::WANTED_HASHES,
            StreamMessage::TakeoverProof(_) => codes::TAKEOVER_PROOF,
            StreamMessage::Subscribe(_) => codes::SUBSCRIBE,
            StreamMessage::ChunkDelivery(_) => codes::CHUNK_DELIVERY,
            StreamMessage::SubscribeError(_) => codes::SUBSCRIBE_ERROR,
        }
    }

    /// The stream this message is routed by, if any.
    pub fn stream(&self) -> Option<&StreamId> {
        match self {
            StreamMessage::Unsubscribe(m) => Some(&m.stream),
            StreamMessage::OfferedHashes(m) => Some(&m.stream),
            StreamMessage::WantedHashes(m) => Some(&m.stream),
            StreamMessage::TakeoverProof(m) => Some(&m.stream),
            StreamMessage::Subscribe(m) => Some(&m.stream),
            StreamMessage::ChunkDelivery(_) | StreamMessage::SubscribeError(_) => None,
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            StreamMessage::OfferedHashes(m) => {
                if m.hashes.len() / chunkstream_core::HASH_SIZE > limits::MAX_HASHES_PER_OFFER {
                    return Err("too many offered hashes");
                }
            }
            StreamMessage::WantedHashes(m) => {
                if m.want.len() > chunkstream_core::mask_len(limits::MAX_HASHES_PER_OFFER) {
                    return Err("want mask too long");
                }
            }
            StreamMessage::ChunkDelivery(m) => {
                if m.data.len() > limits::MAX_CHUNK_SIZE {
                    return Err("chunk too large");
                }
            }
            StreamMessage::SubscribeError(m) => {
                if m.error.len() > limits::MAX_ERROR_LEN {
                    return Err("error text too long");
                }
            }
            StreamMessage::Unsubscribe(_)
            | StreamMessage::TakeoverProof(_)
            | StreamMessage::Subscribe(_) => {}
        }
        Ok(())
    }

    /// Encode into a wire frame: code byte followed by the CBOR body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![self.code()];
        let written = match self {
            StreamMessage::Unsubscribe(m) => ciborium::into_writer(m, &mut buf),
            StreamMessage::OfferedHashes(m) => ciborium::into_writer(m, &mut buf),
            StreamMessage::WantedHashes(m) => ciborium::into_writer(m, &mut buf),
            StreamMessage::TakeoverProof(m) => ciborium::into_writer(m, &mut buf),
            StreamMessage::Subscribe(m) => ciborium::into_writer(m, &mut buf),
            StreamMessage::ChunkDelivery(m) => ciborium::into_writer(m, &mut buf),
            StreamMessage::SubscribeError(m) => ciborium::into_writer(m, &mut buf),
        };
        written.map_err(|e| SyncError::Codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a wire frame produced by [`StreamMessage::encode`].
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (&code, body) = frame
            .split_first()
            .ok_or_else(|| SyncError::Codec("empty frame".into()))?;

        let message = match code {
            codes::UNSUBSCRIBE => StreamMessage::Unsubscribe(decode_body(body)?),
            codes::OFFERED_HASHES => StreamMessage::OfferedHashes(decode_body(body)?),
            codes::WANTED_HASHES => StreamMessage::WantedHashes(decode_body(body)?),
            codes::TAKEOVER_PROOF => StreamMessage::TakeoverProof(decode_body(body)?),
            codes::SUBSCRIBE => StreamMessage::Subscribe(decode_body(body)?),
            codes::CHUNK_DELIVERY => StreamMessage::ChunkDelivery(decode_body(body)?),
            codes::SUBSCRIBE_ERROR => StreamMessage::SubscribeError(decode_body(body)?),
            other => return Err(SyncError::Codec(format!("unknown message code {}", other))),
        };
        Ok(message)
    }
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    ciborium::from_reader(body).map_err(|e| SyncError::Codec(e.to_string()))
}

macro_rules! impl_from_msg {
    ($($msg:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$msg> for StreamMessage {
                fn from(m: $msg) -> Self {
                    StreamMessage::$variant(m)
                }
            }
        )*
    };
}

impl_from_msg! {
    UnsubscribeMsg => Unsubscribe,
    OfferedHashesMsg => OfferedHashes,
    WantedHashesMsg => WantedHashes,
    TakeoverProofMsg => TakeoverProof,
    SubscribeMsg => Subscribe,
    ChunkDeliveryMsg => ChunkDelivery,
    SubscribeErrorMsg => SubscribeError,
}
