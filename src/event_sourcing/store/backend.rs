use async_trait::async_trait;

use crate::event_sourcing::core::{BackendError, Item, Version};

// ============================================================================
// Storage Backend Contract
// ============================================================================
//
// The store never reimplements storage primitives. It consumes:
// 1. Atomic increment-with-default on a single keyed record
// 2. Conditional writes composed into one all-or-nothing batch
// 3. Range queries over one aggregate, ordered by version
//
// ============================================================================

/// Primary identity of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub aggregate_id: String,
    pub version: Version,
}

impl RecordKey {
    pub fn new(aggregate_id: impl Into<String>, version: Version) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Accept the write only if no record exists under the key.
    NotExists,
}

#[derive(Debug, Clone)]
pub struct ConditionalPut {
    pub key: RecordKey,
    pub item: Item,
    pub condition: PutCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    #[default]
    Forward,
    Backward,
}

/// Opaque resume token handed out by a backend when a page is truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation(pub Vec<u8>);

#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    pub aggregate_id: String,
    /// Exclusive lower bound on `Version`.
    pub after_version: Option<Version>,
    pub direction: ScanDirection,
    /// Cap on the total number of records returned.
    pub limit: Option<u32>,
    /// Records per round trip.
    pub page_size: Option<u32>,
    pub continuation: Option<Continuation>,
}

impl RangeQuery {
    pub fn new(aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            ..Default::default()
        }
    }

    pub fn after(mut self, version: Version) -> Self {
        self.after_version = Some(version);
        self
    }

    pub fn backward(mut self) -> Self {
        self.direction = ScanDirection::Backward;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn resume(mut self, continuation: Continuation) -> Self {
        self.continuation = Some(continuation);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Present when more matching records exist beyond this page.
    pub continuation: Option<Continuation>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Atomically add one to `attribute` of the record at `key`, treating a
    /// missing record or attribute as 0. Returns the updated attributes.
    async fn increment(&self, key: &RecordKey, attribute: &str) -> Result<Item, BackendError>;

    /// Apply every put or none. A failed condition must be reported as
    /// `BackendError::ConditionFailed`.
    async fn transact_write(&self, puts: Vec<ConditionalPut>) -> Result<(), BackendError>;

    /// Fetch one page of records for `query.aggregate_id`.
    async fn query(&self, query: &RangeQuery) -> Result<QueryPage, BackendError>;
}
