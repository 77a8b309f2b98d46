use super::event::Version;

// ============================================================================
// Error Taxonomy
// ============================================================================
//
// - Concurrency:   expected version mismatch or a guard condition aborted the batch
// - Backend:       any other storage fault, surfaced verbatim, never retried here
// - Serialization: a record could not be encoded or decoded
// - OutOfBounds:   iterator read outside its valid range
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("concurrency conflict on aggregate {aggregate_id}: {detail}")]
    Concurrency { aggregate_id: String, detail: String },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    #[error("iterator out of bounds")]
    OutOfBounds,

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    Timeout,
}

impl EventStoreError {
    pub(crate) fn version_mismatch(aggregate_id: &str, last: Version, first: Version) -> Self {
        EventStoreError::Concurrency {
            aggregate_id: aggregate_id.to_string(),
            detail: format!("last persisted version is {last}, batch starts at {first}"),
        }
    }

    pub(crate) fn batch_rejected(aggregate_id: &str) -> Self {
        EventStoreError::Concurrency {
            aggregate_id: aggregate_id.to_string(),
            detail: "transaction cancelled by a failed write condition".to_string(),
        }
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, EventStoreError::Concurrency { .. })
    }
}

/// Failure reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The transactional batch was aborted because a guard condition did not hold.
    #[error("transaction cancelled: write condition failed")]
    ConditionFailed,

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

/// Checked decoding failure of a single record attribute.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("missing attribute {0}")]
    MissingAttribute(String),

    #[error("attribute {attribute}: expected {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("attribute {attribute}: value {value} out of range")]
    OutOfRange { attribute: String, value: String },

    #[error("attribute {attribute}: invalid timestamp {value:?}")]
    InvalidTimestamp { attribute: String, value: String },
}

pub type Result<T> = std::result::Result<T, EventStoreError>;
