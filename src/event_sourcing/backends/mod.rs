// ============================================================================
// Storage Backends
// ============================================================================
//
// - memory: process-local backend for tests and embedding
// - scylla: ScyllaDB backend built on lightweight transactions
//
// ============================================================================

pub mod memory;
pub mod scylla;

pub use self::memory::InMemoryBackend;
pub use self::scylla::ScyllaBackend;
