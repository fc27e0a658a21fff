//! Proptest generators for property-based testing.

use proptest::prelude::*;

use chunkstream_core::{ChunkHash, Priority, Range, StreamId};

/// Generate a random ChunkHash.
pub fn chunk_hash() -> impl Strategy<Value = ChunkHash> {
    any::<[u8; 32]>().prop_map(ChunkHash::from_bytes)
}

/// Generate a stream kind name.
pub fn stream_name() -> impl Strategy<Value = String> {
    "[A-Z][A-Z0-9_]{0,15}".prop_map(String::from)
}

/// Generate a StreamId, keyed or not, live or historical.
pub fn stream_id() -> impl Strategy<Value = StreamId> {
    (
        stream_name(),
        prop::option::of(prop::collection::vec(any::<u8>(), 1..=16)),
        any::<bool>(),
    )
        .prop_map(|(name, key, live)| match key {
            Some(key) => StreamId::with_key(name, key, live),
            None => StreamId::new(name, live),
        })
}

/// Generate a bounded range with `0 < from <= to`.
pub fn bounded_range() -> impl Strategy<Value = Range> {
    (1u64..=1_000_000, 0u64..=1_000).prop_map(|(from, len)| Range::new(from, from + len))
}

/// Generate any range, including the open-ended `to == 0`.
pub fn range() -> impl Strategy<Value = Range> {
    prop_oneof![
        bounded_range(),
        (0u64..=1_000_000).prop_map(Range::after),
    ]
}

pub fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Mid),
        Just(Priority::High),
        Just(Priority::Top),
    ]
}

/// Generate up to `max` distinct hashes.
pub fn hash_set(max: usize) -> impl Strategy<Value = Vec<ChunkHash>> {
    prop::collection::hash_set(chunk_hash(), 0..=max).prop_map(|set| set.into_iter().collect())
}

/// Generate an offer buffer and the wanted subset of its positions.
pub fn offer_with_wants(max: usize) -> impl Strategy<Value = (Vec<ChunkHash>, Vec<bool>)> {
    hash_set(max).prop_flat_map(|hashes| {
        let n = hashes.len();
        (Just(hashes), prop::collection::vec(any::<bool>(), n))
    })
}

/// Parameters of one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionParams {
    pub stream: StreamId,
    pub history: Option<Range>,
    pub priority: Priority,
}

impl Arbitrary for SubscriptionParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (stream_id(), prop::option::of(bounded_range()), priority())
            .prop_map(|(stream, history, priority)| SubscriptionParams {
                stream,
                history,
                priority,
            })
            .boxed()
    }
}
