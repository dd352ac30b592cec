//! Type-safe identities for the subscription coordination layer.
//!
//! These types name the things the release protocol coordinates over:
//! partitions, cursor positions, sessions, and the distributed assignment
//! record. They carry no behavior beyond identity, ordering, and the raw
//! cursor codec used at the store boundary.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Identity of one partition of one event stream.
///
/// Used as a map key throughout the protocol; equality and hashing are
/// structural over both components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    /// Name of the event stream (event type) the partition belongs to.
    pub stream: String,
    /// Partition number within the stream.
    pub partition: u32,
}

impl PartitionKey {
    pub fn new(stream: impl Into<String>, partition: u32) -> Self {
        PartitionKey {
            stream: stream.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stream, self.partition)
    }
}

/// Ordered marker of progress within one partition's event sequence.
///
/// Positions are only comparable within a single partition key; comparing
/// positions of different partitions has no meaning. The release protocol
/// asks a single question of two positions: has the committed one caught up
/// to a previously recorded one? That is [`Position::is_before`] negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position(pub i64);

impl Position {
    #[inline]
    pub const fn new(value: i64) -> Self {
        Position(value)
    }

    #[inline]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// True if `self` is strictly earlier than `other` in the partition's
    /// event sequence.
    #[inline]
    pub const fn is_before(self, other: Position) -> bool {
        self.0 < other.0
    }

    /// Encode as the 8-byte big-endian payload the coordination store keeps
    /// per partition.
    pub fn encode(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_i64(self.0);
        buf.freeze()
    }

    /// Decode the stored payload. Returns `None` if the payload is not a
    /// well-formed cursor.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = data.try_into().ok()?;
        Some(Position(i64::from_be_bytes(raw)))
    }
}

impl From<i64> for Position {
    fn from(value: i64) -> Self {
        Position(value)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one consumer session within a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assignment state of a partition in the distributed topology record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentState {
    /// The partition is assigned to its owning session and streaming.
    Assigned,
    /// The partition is being handed off to another session.
    Reassigning,
}

impl AssignmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentState::Assigned => "assigned",
            AssignmentState::Reassigning => "reassigning",
        }
    }
}

/// One entry of the distributed topology record: which session owns which
/// partition, and whether it is being handed off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEntry {
    pub key: PartitionKey,
    pub state: AssignmentState,
    pub session: SessionId,
}

impl TopologyEntry {
    pub fn new(key: PartitionKey, state: AssignmentState, session: SessionId) -> Self {
        TopologyEntry {
            key,
            state,
            session,
        }
    }

    /// True if the entry is owned by the given session.
    pub fn owned_by(&self, session: &SessionId) -> bool {
        self.session == *session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partition_key_equality_is_structural() {
        let a = PartitionKey::new("orders", 3);
        let b = PartitionKey::new("orders", 3);
        let c = PartitionKey::new("orders", 4);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_partition_key_display() {
        let key = PartitionKey::new("orders", 7);
        assert_eq!(key.to_string(), "orders:7");
    }

    #[test]
    fn test_position_ordering() {
        assert!(Position::new(10).is_before(Position::new(20)));
        assert!(!Position::new(20).is_before(Position::new(20)));
        assert!(!Position::new(25).is_before(Position::new(20)));
    }

    #[test]
    fn test_position_codec() {
        let pos = Position::new(123_456_789);
        let encoded = pos.encode();
        assert_eq!(encoded.len(), 8);
        assert_eq!(Position::decode(&encoded), Some(pos));
    }

    #[test]
    fn test_position_decode_rejects_bad_payload() {
        assert_eq!(Position::decode(b"short"), None);
        assert_eq!(Position::decode(b"way too long payload"), None);
        assert_eq!(Position::decode(&[]), None);
    }

    #[test]
    fn test_assignment_state_names() {
        assert_eq!(AssignmentState::Assigned.as_str(), "assigned");
        assert_eq!(AssignmentState::Reassigning.as_str(), "reassigning");
    }

    #[test]
    fn test_topology_entry_ownership() {
        let entry = TopologyEntry::new(
            PartitionKey::new("orders", 0),
            AssignmentState::Assigned,
            SessionId::new("s1"),
        );
        assert!(entry.owned_by(&SessionId::new("s1")));
        assert!(!entry.owned_by(&SessionId::new("s2")));
    }
}
