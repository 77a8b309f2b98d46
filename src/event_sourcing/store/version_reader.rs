use std::sync::Arc;

use super::backend::{RangeQuery, StorageBackend};
use crate::event_sourcing::core::{attr, codec, RequestContext, Result, Version};

/// Resolves the last persisted version of an aggregate (0 when it has no history).
pub struct AggregateVersionReader<B: StorageBackend> {
    backend: Arc<B>,
}

impl<B: StorageBackend> AggregateVersionReader<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub async fn last_version(&self, ctx: &RequestContext, aggregate_id: &str) -> Result<Version> {
        let query = RangeQuery::new(aggregate_id).backward().limit(1).page_size(1);
        let page = ctx.run(self.backend.query(&query)).await?;

        let version = match page.items.first() {
            Some(item) => codec::read_u64(item, attr::VERSION)?,
            None => 0,
        };

        tracing::debug!(aggregate_id = %aggregate_id, last_version = version, "Resolved last version");
        Ok(version)
    }
}
