// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Append-only event storage with per-aggregate optimistic concurrency and a
// store-wide global ordering.
//
// ============================================================================

pub mod backends;
pub mod core;
pub mod store;

pub use self::core::*;
pub use self::store::*;
