//! Durable state for the barrier-trigger engine
//!
//! Everything authoritative lives behind [`StoreBackend`]: a sorted set for the
//! price index and hashes for instrument partitions. Redis is the production
//! backend, [`MemoryBackend`] backs tests and dry runs.

pub mod instrument_store;
pub mod memory;
pub mod price_index;
pub mod redis;

use async_trait::async_trait;

use crate::Result;

pub use self::redis::RedisBackend;
pub use instrument_store::InstrumentStore;
pub use memory::MemoryBackend;
pub use price_index::PriceIndex;

/// Ordered index + hash-map operations the engine needs from its store
///
/// Every call is a single atomic backend command. Failures surface as
/// [`crate::Error::TransientBackend`].
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Add `member` with `score` to the sorted set (`ZADD NX`). Returns true if
    /// the member is new; an existing member keeps its score.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<bool>;

    /// Members with `min <= score <= max`, ascending by score then member
    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>>;

    /// Highest score in the sorted set
    async fn zmax_score(&self, key: &str) -> Result<Option<i64>>;

    async fn zcard(&self, key: &str) -> Result<usize>;

    /// Drop a whole key (sorted set or hash)
    async fn delete(&self, key: &str) -> Result<()>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Returns true if the field existed
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;

    async fn hvals(&self, key: &str) -> Result<Vec<String>>;
}
