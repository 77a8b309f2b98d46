// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// The store is generic over a `StorageBackend`. Components, leaves first:
// - allocator:      global sequence numbers from a counter record
// - version_reader: last persisted version of an aggregate
// - guard:          batch validation and expected-version pre-check
// - writer:         conditional all-or-nothing batch commit
// - event_store:    the `EventStore` facade (save / get)
// - iterator:       forward-only cursor over query results
//
// ============================================================================

pub mod allocator;
pub mod backend;
pub mod event_store;
pub mod guard;
pub mod iterator;
pub mod version_reader;
pub mod writer;

pub use allocator::GlobalVersionAllocator;
pub use backend::{
    ConditionalPut, Continuation, PutCondition, QueryPage, RangeQuery, RecordKey, ScanDirection,
    StorageBackend,
};
pub use event_store::{EventStore, DEFAULT_PAGE_SIZE};
pub use guard::{ConcurrencyGuard, MAX_VERSION};
pub use iterator::ResultIterator;
pub use version_reader::AggregateVersionReader;
pub use writer::BatchedAppendWriter;
