use std::sync::Arc;
use std::time::Instant;

use super::allocator::GlobalVersionAllocator;
use super::backend::{RangeQuery, StorageBackend};
use super::guard::ConcurrencyGuard;
use super::iterator::ResultIterator;
use super::version_reader::AggregateVersionReader;
use super::writer::BatchedAppendWriter;
use crate::event_sourcing::core::{attr, codec, Event, Item, RequestContext, Result, Version};
use crate::metrics::Metrics;

// ============================================================================
// Event Store - append-only persistence with optimistic concurrency
// ============================================================================
//
// Save:
// 1. Validate the batch shape (one aggregate, contiguous versions)
// 2. Pre-check the first version against the last persisted version
// 3. Allocate one global version per event, in input order
// 4. Commit every event in one conditional transaction
// 5. Reflect the assigned global versions back to the caller
//
// Global versions allocated in step 3 stay consumed if step 4 aborts.
// The caller's events are only updated after a successful commit.
//
// Get:
// Range query for `Version > after`, following continuation tokens until the
// backend reports no more data. Decoding is deferred to the iterator.
//
// ============================================================================

pub const DEFAULT_PAGE_SIZE: u32 = 1000;

pub struct EventStore<B: StorageBackend> {
    backend: Arc<B>,
    allocator: GlobalVersionAllocator<B>,
    reader: AggregateVersionReader<B>,
    writer: BatchedAppendWriter<B>,
    page_size: u32,
    metrics: Option<Arc<Metrics>>,
}

impl<B: StorageBackend> EventStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            allocator: GlobalVersionAllocator::new(backend.clone()),
            reader: AggregateVersionReader::new(backend.clone()),
            writer: BatchedAppendWriter::new(backend.clone()),
            backend,
            page_size: DEFAULT_PAGE_SIZE,
            metrics: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Append events to one aggregate's history.
    ///
    /// On success every event's `global_version` is set. On failure the
    /// events are left untouched.
    ///
    /// A `Cancelled` or `Timeout` raised while the commit request is in flight
    /// leaves the outcome unknown: the backend may already have applied the
    /// batch. Re-read the aggregate with `last_version` or `get` before
    /// retrying. Any other failure means nothing was written.
    pub async fn save(&self, ctx: &RequestContext, events: &mut [Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        ConcurrencyGuard::validate_batch(events)?;

        let started = Instant::now();
        let result = self.append(ctx, events).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_save(
                &events[0].aggregate_type,
                events.len(),
                started.elapsed().as_secs_f64(),
                &result,
            );
        }
        result
    }

    async fn append(&self, ctx: &RequestContext, events: &mut [Event]) -> Result<()> {
        let aggregate_id = events[0].aggregate_id.clone();

        let last_version = self.reader.last_version(ctx, &aggregate_id).await?;
        ConcurrencyGuard::check(&aggregate_id, last_version, events[0].version)?;

        let mut staged = events.to_vec();
        for event in staged.iter_mut() {
            event.global_version = self.allocator.next(ctx).await?;
            if let Some(metrics) = &self.metrics {
                metrics.record_global_version(event.global_version);
            }
        }

        let puts = BatchedAppendWriter::<B>::build(&staged)?;
        self.writer.commit(ctx, &aggregate_id, puts).await?;

        for (event, committed) in events.iter_mut().zip(&staged) {
            event.global_version = committed.global_version;
        }

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = %events[0].aggregate_type,
            first_version = events[0].version,
            last_version = events[events.len() - 1].version,
            first_global_version = staged[0].global_version,
            event_count = events.len(),
            "✅ Appended events to event store"
        );
        Ok(())
    }

    /// Events of `id` with `Version > after_version`, ascending.
    ///
    /// An empty `aggregate_type` matches any type. An unknown aggregate yields
    /// an empty iterator. The reserved counter identity is rejected.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        id: &str,
        aggregate_type: &str,
        after_version: Version,
    ) -> Result<ResultIterator> {
        ConcurrencyGuard::reject_reserved(id)?;

        let mut query = RangeQuery::new(id)
            .after(after_version)
            .page_size(self.page_size);
        let mut items = Vec::new();
        let mut pages = 0u32;

        loop {
            let page = ctx.run(self.backend.query(&query)).await?;
            pages += 1;

            if let Some(metrics) = &self.metrics {
                metrics.record_query_page(page.items.len());
            }

            items.extend(
                page.items
                    .into_iter()
                    .filter(|item| type_matches(item, aggregate_type)),
            );

            match page.continuation {
                Some(continuation) => query = query.resume(continuation),
                None => break,
            }
        }

        tracing::debug!(
            aggregate_id = %id,
            aggregate_type = %aggregate_type,
            after_version,
            record_count = items.len(),
            pages,
            "Loaded events"
        );

        Ok(ResultIterator::new(items))
    }

    pub async fn last_version(&self, ctx: &RequestContext, id: &str) -> Result<Version> {
        self.reader.last_version(ctx, id).await
    }
}

/// Records whose type attribute cannot be read are kept so the iterator
/// reports the decode failure instead of silently dropping history.
fn type_matches(item: &Item, aggregate_type: &str) -> bool {
    if aggregate_type.is_empty() {
        return true;
    }
    match codec::read_text(item, attr::AGGREGATE_TYPE) {
        Ok(stored) => stored == aggregate_type,
        Err(_) => true,
    }
}
