use std::sync::Arc;

use super::backend::{ConditionalPut, PutCondition, RecordKey, StorageBackend};
use crate::event_sourcing::core::{
    encode_event, BackendError, Event, EventStoreError, RequestContext, Result,
};

/// Commits a batch of events as one all-or-nothing conditional transaction.
///
/// Each record is guarded by `NotExists` on its own `(AggregateID, Version)` key.
/// History is immutable, so a writer working from a stale last version always
/// targets a key that already exists and the whole batch aborts.
pub struct BatchedAppendWriter<B: StorageBackend> {
    backend: Arc<B>,
}

impl<B: StorageBackend> BatchedAppendWriter<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn build(events: &[Event]) -> Result<Vec<ConditionalPut>> {
        events
            .iter()
            .map(|event| {
                Ok(ConditionalPut {
                    key: RecordKey::new(event.aggregate_id.clone(), event.version),
                    item: encode_event(event)?,
                    condition: PutCondition::NotExists,
                })
            })
            .collect()
    }

    pub async fn commit(
        &self,
        ctx: &RequestContext,
        aggregate_id: &str,
        puts: Vec<ConditionalPut>,
    ) -> Result<()> {
        let count = puts.len();

        ctx.run(async {
            self.backend
                .transact_write(puts)
                .await
                .map_err(|err| match err {
                    BackendError::ConditionFailed => {
                        tracing::warn!(aggregate_id = %aggregate_id, "Batch rejected by write condition");
                        EventStoreError::batch_rejected(aggregate_id)
                    }
                    other => EventStoreError::Backend(other),
                })
        })
        .await?;

        tracing::debug!(aggregate_id = %aggregate_id, record_count = count, "Batch committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::backends::InMemoryBackend;
    use crate::event_sourcing::core::attr;

    #[test]
    fn test_build_one_guarded_put_per_event() {
        let events = vec![
            Event::new("A1", "T", 1, "a"),
            Event::new("A1", "T", 2, "b"),
        ];
        let puts = BatchedAppendWriter::<InMemoryBackend>::build(&events).unwrap();

        assert_eq!(puts.len(), 2);
        assert_eq!(puts[1].key, RecordKey::new("A1", 2));
        assert_eq!(puts[1].condition, PutCondition::NotExists);
        assert!(puts[0].item.contains_key(attr::DATA));
    }

    #[tokio::test]
    async fn test_condition_failure_maps_to_concurrency() {
        let backend = Arc::new(InMemoryBackend::new());
        let writer = BatchedAppendWriter::new(backend.clone());
        let ctx = RequestContext::new();

        let first = BatchedAppendWriter::<InMemoryBackend>::build(&[Event::new("A1", "T", 1, "x")]).unwrap();
        writer.commit(&ctx, "A1", first).await.unwrap();

        let again = BatchedAppendWriter::<InMemoryBackend>::build(&[
            Event::new("A1", "T", 1, "y"),
            Event::new("A1", "T", 2, "z"),
        ])
        .unwrap();
        let err = writer.commit(&ctx, "A1", again).await.unwrap_err();

        assert!(err.is_concurrency());
        // Version 2 must not have been written alongside the rejected version 1.
        assert_eq!(backend.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_other_faults_pass_through() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_next_commit("throttled").await;
        let writer = BatchedAppendWriter::new(backend.clone());

        let puts = BatchedAppendWriter::<InMemoryBackend>::build(&[Event::new("A1", "T", 1, "x")]).unwrap();
        let err = writer.commit(&RequestContext::new(), "A1", puts).await.unwrap_err();

        match err {
            EventStoreError::Backend(BackendError::Other(inner)) => {
                assert_eq!(inner.to_string(), "throttled");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.record_count().await, 0);
    }
}
