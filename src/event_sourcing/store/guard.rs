use crate::event_sourcing::core::{Event, EventStoreError, Result, Version, GLOBAL_COUNTER_ID};

/// Versions are stored as signed 64-bit numbers.
pub const MAX_VERSION: Version = i64::MAX as Version;

/// Optimistic concurrency pre-check for an append.
///
/// This runs before any write and is not atomic with the commit. The commit's
/// per-record `NotExists` condition is what settles a race between writers.
pub struct ConcurrencyGuard;

impl ConcurrencyGuard {
    /// The counter record shares the event table and is never an aggregate.
    pub fn reject_reserved(aggregate_id: &str) -> Result<()> {
        if aggregate_id == GLOBAL_COUNTER_ID {
            return Err(EventStoreError::InvalidBatch(format!(
                "aggregate id {GLOBAL_COUNTER_ID} is reserved"
            )));
        }
        Ok(())
    }

    /// Reject batches that cannot form a valid contiguous append.
    pub fn validate_batch(events: &[Event]) -> Result<()> {
        let Some(first) = events.first() else {
            return Ok(());
        };

        Self::reject_reserved(&first.aggregate_id)?;
        if first.version == 0 {
            return Err(EventStoreError::InvalidBatch(
                "versions start at 1".to_string(),
            ));
        }

        for (offset, event) in events.iter().enumerate() {
            if event.aggregate_id != first.aggregate_id {
                return Err(EventStoreError::InvalidBatch(format!(
                    "mixed aggregates in one batch: {} and {}",
                    first.aggregate_id, event.aggregate_id
                )));
            }
            let expected = first.version.checked_add(offset as Version).ok_or_else(|| {
                EventStoreError::InvalidBatch(format!(
                    "version overflow after {} at offset {offset}",
                    first.version
                ))
            })?;
            if expected > MAX_VERSION {
                return Err(EventStoreError::InvalidBatch(format!(
                    "version {expected} exceeds the storable maximum {MAX_VERSION}"
                )));
            }
            if event.version != expected {
                return Err(EventStoreError::InvalidBatch(format!(
                    "non-contiguous versions: expected {expected}, found {}",
                    event.version
                )));
            }
        }
        Ok(())
    }

    /// The batch must start exactly one past the last persisted version.
    pub fn check(aggregate_id: &str, last_version: Version, first_version: Version) -> Result<()> {
        if last_version.checked_add(1) != Some(first_version) {
            tracing::warn!(
                aggregate_id = %aggregate_id,
                last_version,
                first_version,
                "Concurrency conflict detected before write"
            );
            return Err(EventStoreError::version_mismatch(
                aggregate_id,
                last_version,
                first_version,
            ));
        }
        Ok(())
    }
}
