use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use scylla_event_store::event_sourcing::core::{attr, AttributeValue, Item};
use scylla_event_store::event_sourcing::store::{
    ConditionalPut, QueryPage, RangeQuery, RecordKey,
};
use scylla_event_store::{
    BackendError, Event, EventStore, EventStoreError, InMemoryBackend, RequestContext,
    StorageBackend, Version,
};

// ============================================================================
// Event store behaviour against the in-memory backend
// ============================================================================

fn store() -> EventStore<InMemoryBackend> {
    EventStore::new(Arc::new(InMemoryBackend::new()))
}

fn batch(aggregate_id: &str, versions: std::ops::RangeInclusive<Version>) -> Vec<Event> {
    versions
        .map(|v| Event::new(aggregate_id, "Order", v, format!("payload-{v}")))
        .collect()
}

async fn history(store: &EventStore<InMemoryBackend>, id: &str, after: Version) -> Vec<Event> {
    store
        .get(&RequestContext::new(), id, "Order", after)
        .await
        .unwrap()
        .collect_events()
        .unwrap()
}

#[tokio::test]
async fn test_save_conflict_then_continue_scenario() {
    let store = store();
    let ctx = RequestContext::new();

    let mut first = vec![Event::new("A1", "Order", 1, "x")];
    store.save(&ctx, &mut first).await.unwrap();
    assert_eq!(first[0].global_version, 1);

    let mut duplicate = vec![Event::new("A1", "Order", 1, "y")];
    let err = store.save(&ctx, &mut duplicate).await.unwrap_err();
    assert!(err.is_concurrency());
    assert_eq!(duplicate[0].global_version, 0);
    assert_eq!(store.backend().record_count().await, 1);

    let mut second = vec![Event::new("A1", "Order", 2, "z")];
    store.save(&ctx, &mut second).await.unwrap();
    assert_eq!(second[0].global_version, 2);

    let events = history(&store, "A1", 0).await;
    assert_eq!(events.len(), 2);
    assert_eq!((events[0].version, events[0].data.as_slice()), (1, b"x".as_slice()));
    assert_eq!((events[1].version, events[1].data.as_slice()), (2, b"z".as_slice()));
}

#[tokio::test]
async fn test_skipping_ahead_is_a_conflict_and_writes_nothing() {
    let store = store();
    let ctx = RequestContext::new();
    store.save(&ctx, &mut batch("A1", 1..=2)).await.unwrap();

    let err = store.save(&ctx, &mut batch("A1", 4..=5)).await.unwrap_err();

    assert!(err.is_concurrency());
    assert_eq!(store.last_version(&ctx, "A1").await.unwrap(), 2);
    assert_eq!(store.backend().record_count().await, 2);
}

#[tokio::test]
async fn test_global_versions_increase_across_aggregates() {
    let store = store();
    let ctx = RequestContext::new();
    let mut previous = 0;

    for (aggregate_id, versions) in [("A1", 1..=2), ("B7", 1..=3), ("A1", 3..=3), ("C2", 1..=1)] {
        let mut events = batch(aggregate_id, versions);
        store.save(&ctx, &mut events).await.unwrap();
        for event in &events {
            assert!(event.global_version > previous);
            previous = event.global_version;
        }
    }
    assert_eq!(previous, 7);
}

#[tokio::test]
async fn test_get_returns_only_versions_after_bound_in_order() {
    let store = store();
    store
        .save(&RequestContext::new(), &mut batch("A1", 1..=5))
        .await
        .unwrap();

    let versions: Vec<_> = history(&store, "A1", 2).await.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![3, 4, 5]);

    assert!(history(&store, "A1", 5).await.is_empty());
}

#[tokio::test]
async fn test_unknown_aggregate_yields_exhausted_iterator() {
    let store = store();
    let mut it = store
        .get(&RequestContext::new(), "missing", "Order", 0)
        .await
        .unwrap();

    assert!(!it.next());
    assert!(matches!(it.value(), Err(EventStoreError::OutOfBounds)));
    it.close();
    it.close();
}

#[tokio::test]
async fn test_get_follows_pages_to_the_end_of_history() {
    let store = EventStore::new(Arc::new(InMemoryBackend::new())).with_page_size(2);
    let ctx = RequestContext::new();
    store.save(&ctx, &mut batch("A1", 1..=4)).await.unwrap();
    store.save(&ctx, &mut batch("A1", 5..=7)).await.unwrap();

    let versions: Vec<_> = history(&store, "A1", 0).await.iter().map(|e| e.version).collect();
    assert_eq!(versions, (1..=7).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_saved_events_read_back_unchanged() {
    let store = store();
    let mut events = vec![
        Event::new("A1", "Order", 1, br#"{"total":10}"#.to_vec())
            .with_reason("OrderCreated")
            .with_metadata(br#"{"user":"u-9"}"#.to_vec()),
    ];
    store.save(&RequestContext::new(), &mut events).await.unwrap();

    assert_eq!(history(&store, "A1", 0).await, events);
}

#[tokio::test]
async fn test_aborted_commit_leaves_a_permanent_gap() {
    let store = store();
    let ctx = RequestContext::new();

    store.backend().fail_next_commit("throttled").await;
    let err = store.save(&ctx, &mut batch("A1", 1..=2)).await.unwrap_err();
    assert!(matches!(err, EventStoreError::Backend(BackendError::Other(_))));
    assert_eq!(store.backend().record_count().await, 0);

    let mut retry = batch("A1", 1..=2);
    store.save(&ctx, &mut retry).await.unwrap();
    assert_eq!(retry[0].global_version, 3);
    assert_eq!(retry[1].global_version, 4);
}

#[tokio::test]
async fn test_invalid_batch_consumes_no_global_versions() {
    let store = store();
    let ctx = RequestContext::new();

    let mut mixed = batch("A1", 1..=1);
    mixed.push(Event::new("B1", "Order", 2, "b"));
    let err = store.save(&ctx, &mut mixed).await.unwrap_err();
    assert!(matches!(err, EventStoreError::InvalidBatch(_)));

    let mut valid = batch("A1", 1..=1);
    store.save(&ctx, &mut valid).await.unwrap();
    assert_eq!(valid[0].global_version, 1);
}

#[tokio::test]
async fn test_racing_writers_on_one_aggregate_have_a_single_winner() {
    let store = Arc::new(EventStore::new(Arc::new(
        InMemoryBackend::new().with_latency(Duration::from_millis(2)),
    )));
    store
        .save(&RequestContext::new(), &mut batch("A1", 1..=1))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for writer in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut events = vec![
                Event::new("A1", "Order", 2, format!("writer-{writer}")),
                Event::new("A1", "Order", 3, format!("writer-{writer}")),
            ];
            store.save(&RequestContext::new(), &mut events).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(e) => assert!(e.is_concurrency(), "unexpected error: {e}"),
        }
    }

    assert_eq!(winners, 1);
    let events = history(&store, "A1", 0).await;
    assert_eq!(events.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(events[1].data, events[2].data);
}

#[tokio::test]
async fn test_parallel_writers_on_distinct_aggregates_all_commit() {
    let store = Arc::new(store());

    let mut handles = Vec::new();
    for n in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut events = batch(&format!("agg-{n}"), 1..=3);
            store.save(&RequestContext::new(), &mut events).await.unwrap();
            events
        }));
    }

    let mut globals = HashSet::new();
    for handle in handles {
        for event in handle.await.unwrap() {
            assert!(globals.insert(event.global_version));
        }
    }
    assert_eq!(globals.len(), 30);
}

#[tokio::test]
async fn test_cancelled_context_fails_before_any_write() {
    let store = store();
    let ctx = RequestContext::new();
    ctx.cancel();

    let err = store.save(&ctx, &mut batch("A1", 1..=1)).await.unwrap_err();
    assert!(matches!(err, EventStoreError::Cancelled));
    assert_eq!(store.backend().record_count().await, 0);

    let err = store.get(&ctx, "A1", "Order", 0).await.unwrap_err();
    assert!(matches!(err, EventStoreError::Cancelled));
}

#[tokio::test]
async fn test_deadline_applies_to_backend_requests() {
    let store = EventStore::new(Arc::new(
        InMemoryBackend::new().with_latency(Duration::from_millis(200)),
    ));
    let ctx = RequestContext::new().with_timeout(Duration::from_millis(20));

    let err = store.save(&ctx, &mut batch("A1", 1..=1)).await.unwrap_err();
    assert!(matches!(err, EventStoreError::Timeout));
}

/// Cancels the caller's token as soon as the first global version is issued.
struct CancelAfterFirstAllocation {
    inner: InMemoryBackend,
    token: CancellationToken,
    increments: AtomicU32,
    commits: AtomicU32,
}

#[async_trait]
impl StorageBackend for CancelAfterFirstAllocation {
    async fn increment(&self, key: &RecordKey, attribute: &str) -> Result<Item, BackendError> {
        self.increments.fetch_add(1, Ordering::SeqCst);
        let item = self.inner.increment(key, attribute).await?;
        self.token.cancel();
        Ok(item)
    }

    async fn transact_write(&self, puts: Vec<ConditionalPut>) -> Result<(), BackendError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.transact_write(puts).await
    }

    async fn query(&self, query: &RangeQuery) -> Result<QueryPage, BackendError> {
        self.inner.query(query).await
    }
}

#[tokio::test]
async fn test_cancellation_reaches_allocator_calls_inside_save() {
    let token = CancellationToken::new();
    let backend = Arc::new(CancelAfterFirstAllocation {
        inner: InMemoryBackend::new(),
        token: token.clone(),
        increments: AtomicU32::new(0),
        commits: AtomicU32::new(0),
    });
    let store = EventStore::new(backend.clone());
    let ctx = RequestContext::new().with_cancellation(token);

    let mut events = batch("A1", 1..=3);
    let err = store.save(&ctx, &mut events).await.unwrap_err();

    assert!(matches!(err, EventStoreError::Cancelled));
    assert_eq!(backend.increments.load(Ordering::SeqCst), 1);
    assert_eq!(backend.commits.load(Ordering::SeqCst), 0);
    assert!(events.iter().all(|e| e.global_version == 0));
}

/// Applies the batch, then stalls before acknowledging it.
struct StallAfterCommit {
    inner: InMemoryBackend,
    stall: Duration,
}

#[async_trait]
impl StorageBackend for StallAfterCommit {
    async fn increment(&self, key: &RecordKey, attribute: &str) -> Result<Item, BackendError> {
        self.inner.increment(key, attribute).await
    }

    async fn transact_write(&self, puts: Vec<ConditionalPut>) -> Result<(), BackendError> {
        self.inner.transact_write(puts).await?;
        tokio::time::sleep(self.stall).await;
        Ok(())
    }

    async fn query(&self, query: &RangeQuery) -> Result<QueryPage, BackendError> {
        self.inner.query(query).await
    }
}

#[tokio::test]
async fn test_timeout_during_commit_leaves_outcome_to_be_re_read() {
    let store = EventStore::new(Arc::new(StallAfterCommit {
        inner: InMemoryBackend::new(),
        stall: Duration::from_millis(200),
    }));
    let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));

    let mut events = batch("A1", 1..=2);
    let err = store.save(&ctx, &mut events).await.unwrap_err();

    assert!(matches!(err, EventStoreError::Timeout));
    assert!(events.iter().all(|e| e.global_version == 0));

    // The batch landed anyway; a retry without re-reading would conflict.
    let fresh = RequestContext::new();
    assert_eq!(store.last_version(&fresh, "A1").await.unwrap(), 2);
    let err = store.save(&fresh, &mut batch("A1", 1..=2)).await.unwrap_err();
    assert!(err.is_concurrency());
}

#[tokio::test]
async fn test_corrupt_global_version_surfaces_as_serialization_error() {
    let store = store();
    store
        .save(&RequestContext::new(), &mut batch("A1", 1..=1))
        .await
        .unwrap();
    store
        .backend()
        .overwrite_attribute(
            &RecordKey::new("A1", 1),
            attr::GLOBAL_VERSION,
            AttributeValue::Text("1".into()),
        )
        .await;

    let mut it = store
        .get(&RequestContext::new(), "A1", "Order", 0)
        .await
        .unwrap();
    assert!(it.next());
    assert!(matches!(it.value(), Err(EventStoreError::Serialization(_))));
}
