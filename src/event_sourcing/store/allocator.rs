use std::sync::Arc;

use super::backend::{RecordKey, StorageBackend};
use crate::event_sourcing::core::{
    attr, codec, RequestContext, Result, Version, COUNTER_VERSION, GLOBAL_COUNTER_ID,
};

/// Issues store-wide sequence numbers from a single counter record.
///
/// Each call is one round trip. Values are never handed out twice, but a
/// value consumed by a save that later aborts is gone for good.
pub struct GlobalVersionAllocator<B: StorageBackend> {
    backend: Arc<B>,
    key: RecordKey,
}

impl<B: StorageBackend> GlobalVersionAllocator<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            key: RecordKey::new(GLOBAL_COUNTER_ID, COUNTER_VERSION),
        }
    }

    pub async fn next(&self, ctx: &RequestContext) -> Result<Version> {
        let item = ctx
            .run(self.backend.increment(&self.key, attr::GLOBAL_VERSION))
            .await?;

        let global_version = codec::read_u64(&item, attr::GLOBAL_VERSION)?;

        tracing::trace!(global_version, "Allocated global version");
        Ok(global_version)
    }
}
