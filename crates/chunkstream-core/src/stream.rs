//! Stream identity, cursor ranges and delivery priorities.
//!
//! A stream is named by its kind, optionally narrowed by an opaque key, and
//! is either live (an open-ended tail) or historical (a bounded slice).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Identifier of a subscribable stream.
///
/// Equality is by value: a live and a historical stream with the same name
/// and key are distinct identifiers and can be subscribed side by side.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    name: String,
    key: Option<Bytes>,
    live: bool,
}

impl StreamId {
    /// Create a stream identifier without a key.
    pub fn new(name: impl Into<String>, live: bool) -> Self {
        Self {
            name: name.into(),
            key: None,
            live,
        }
    }

    /// Create a stream identifier narrowed by `key`.
    pub fn with_key(name: impl Into<String>, key: impl Into<Bytes>, live: bool) -> Self {
        Self {
            name: name.into(),
            key: Some(key.into()),
            live,
        }
    }

    /// The stream kind, used to resolve registered factories.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The discriminating key, if any.
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Whether this is the live tail of the stream.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// The historical counterpart of this stream (same name and key).
    pub fn history(&self) -> Self {
        Self {
            name: self.name.clone(),
            key: self.key.clone(),
            live: false,
        }
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.key.as_deref().map(hex::encode).unwrap_or_default();
        write!(f, "{}|{}|{}", self.name, key, self.live)
    }
}

/// A cursor over a stream's sequence space.
///
/// `to == 0` is the open-ended sentinel: serve until the server decides
/// where the batch ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub from: u64,
    pub to: u64,
}

impl Range {
    pub const fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// The open-ended range starting right after a served slice ending at `to`.
    pub const fn after(to: u64) -> Self {
        Self { from: to, to: 0 }
    }

    /// Whether the upper bound is left to the server.
    pub const fn is_open(&self) -> bool {
        self.to == 0
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open() {
            write!(f, "[{}..)", self.from)
        } else {
            write!(f, "[{}..{}]", self.from, self.to)
        }
    }
}

/// Number of outgoing queues per peer.
pub const PRIORITY_LEVELS: usize = 4;

/// Delivery priority of outgoing messages.
///
/// Control traffic rides on `Top` so it overtakes bulk offers queued on
/// lower levels. Only ordering within one level is preserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    #[default]
    Mid = 1,
    High = 2,
    Top = 3,
}

impl Priority {
    /// All levels, highest first.
    pub const DESCENDING: [Priority; PRIORITY_LEVELS] =
        [Priority::Top, Priority::High, Priority::Mid, Priority::Low];

    /// Queue index of this level.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Mid),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Top),
            other => Err(CoreError::UnknownPriority(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_live_and_history_are_distinct_keys() {
        let live = StreamId::new("foo", true);
        let history = live.history();

        assert_ne!(live, history);
        assert_eq!(history.name(), "foo");
        assert!(!history.is_live());

        let mut map = HashMap::new();
        map.insert(live.clone(), 1);
        map.insert(history.clone(), 2);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_stream_equality_by_value() {
        let a = StreamId::with_key("SYNC", vec![1u8, 2], true);
        let b = StreamId::with_key("SYNC", vec![1u8, 2], true);
        let c = StreamId::with_key("SYNC", vec![1u8, 3], true);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_stream_display() {
        assert_eq!(StreamId::new("foo", true).to_string(), "foo||true");
        assert_eq!(
            StreamId::with_key("foo", vec![0xabu8], false).to_string(),
            "foo|ab|false"
        );
    }

    #[test]
    fn test_range_after_is_open() {
        let next = Range::after(8);
        assert_eq!(next, Range::new(8, 0));
        assert!(next.is_open());
        assert!(!Range::new(5, 8).is_open());
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Top > Priority::High);
        assert!(Priority::High > Priority::Mid);
        assert!(Priority::Mid > Priority::Low);
        assert_eq!(Priority::DESCENDING[0], Priority::Top);
        assert_eq!(Priority::try_from(3).unwrap(), Priority::Top);
        assert_eq!(Priority::try_from(9), Err(CoreError::UnknownPriority(9)));
    }
}
