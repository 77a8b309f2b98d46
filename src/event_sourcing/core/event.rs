use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Event - the unit of persistence
// ============================================================================
//
// An event belongs to exactly one aggregate and carries two positions:
// - `version`: 1-based, contiguous within the aggregate's history
// - `global_version`: store-wide sequence number, assigned at persist time
//
// `data` and `metadata` are opaque to the store and passed through unchanged.
//
// ============================================================================

/// Position of an event, either within an aggregate or across the store.
pub type Version = u64;

/// Reserved aggregate identity of the global sequence counter record.
/// The counter lives at `(GLOBAL_COUNTER_ID, COUNTER_VERSION)`.
pub const GLOBAL_COUNTER_ID: &str = "GlobalVersionCounter";

/// Sentinel version of the counter record. Real events start at 1.
pub const COUNTER_VERSION: Version = 0;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: Version,

    /// Zero until the event has been committed.
    pub global_version: Version,

    pub timestamp: DateTime<Utc>,

    /// Event type tag, e.g. "OrderCreated".
    pub reason: String,

    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl Event {
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        version: Version,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            version,
            global_version: 0,
            timestamp: Utc::now(),
            reason: String::new(),
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// True once a global version has been assigned by a successful save.
    pub fn is_committed(&self) -> bool {
        self.global_version != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_uncommitted() {
        let event = Event::new("order-1", "Order", 1, b"payload".to_vec());

        assert_eq!(event.aggregate_id, "order-1");
        assert_eq!(event.aggregate_type, "Order");
        assert_eq!(event.version, 1);
        assert_eq!(event.global_version, 0);
        assert!(!event.is_committed());
        assert!(event.reason.is_empty());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_builder_helpers() {
        let event = Event::new("order-1", "Order", 3, "x")
            .with_reason("OrderShipped")
            .with_metadata(r#"{"user":"u-1"}"#);

        assert_eq!(event.reason, "OrderShipped");
        assert_eq!(event.data, b"x".to_vec());
        assert_eq!(event.metadata, br#"{"user":"u-1"}"#.to_vec());
    }
}
