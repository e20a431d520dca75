//! Local TTL cache over a persistent key-value store.
//!
//! Values are stored as `{"timestamp": <epoch millis>, "data": <value>}` under
//! typed keys (see [`CacheKey`]). An entry is stale once more than the
//! caller's TTL has elapsed since it was written. Nothing is evicted
//! automatically; entries are overwritten on refresh or removed explicitly.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{KeyValueStore, NoopStore, SqliteStore};
pub use traits::{CacheKey, CacheSource, ResourceKind};

#[cfg(test)]
pub use storage::MemoryStore;
#[cfg(test)]
pub use traits::CacheEntry;
