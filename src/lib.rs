// ============================================================================
// ScyllaDB Event Store
// ============================================================================
//
// Append-only event store with per-aggregate optimistic concurrency and a
// store-wide, strictly increasing global version.
//
// ============================================================================

pub mod config;
pub mod event_sourcing;
pub mod metrics;
pub mod utils;

pub use config::StoreConfig;
pub use event_sourcing::backends::{InMemoryBackend, ScyllaBackend};
pub use event_sourcing::core::{
    BackendError, CodecError, Event, EventStoreError, RequestContext, Version,
};
pub use event_sourcing::store::{EventStore, ResultIterator, StorageBackend};
