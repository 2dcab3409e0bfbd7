//! Cache Module
//!
//! Key-value cache kept in one fixed-capacity segment shared by every
//! process on the host, with lazy TTL expiration and overflow recovery.

mod clock;
pub mod codec;
mod entry;
mod lock;
mod segment;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CacheMap, CodecError};
pub use entry::{Entry, Payload};
pub use lock::{LockCoordinator, LockGuard, LockKey};
pub use segment::{SegmentHandle, SegmentKey, SharedSegment, NAMESPACE, PAGE_SIZE};
pub use stats::{CacheStats, StoreStats};
pub use store::{CacheStore, WriteOutcome};
