// ============================================================================
// Event Sourcing Core - types shared by the store and its backends
// ============================================================================
//
// - event:   the persisted unit and its versions
// - codec:   checked encode/decode between events and stored records
// - error:   error taxonomy surfaced to callers
// - context: cancellation/deadline threaded through every request
//
// ============================================================================

pub mod codec;
pub mod context;
pub mod error;
pub mod event;

pub use codec::{attr, decode_event, encode_event, AttributeValue, Item};
pub use context::RequestContext;
pub use error::{BackendError, CodecError, EventStoreError, Result};
pub use event::{Event, Version, COUNTER_VERSION, GLOBAL_COUNTER_ID};
