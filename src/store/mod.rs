//! Storage boundaries
//!
//! Three loosely coupled stores back the news service:
//! - [`PrimaryStore`]: the durable source of truth for full records
//! - [`SearchIndex`]: slim `{id, created}` projections for filter/order/paginate
//! - [`CacheStore`]: ephemeral TTL key-value pages
//!
//! Each boundary is an async trait so a backend can be swapped without
//! touching the pipeline.

pub mod cache;
pub mod index;
pub mod primary;
pub mod rocks;

pub use cache::{namespace_prefix, page_key, MemoryCacheStore};
pub use index::MemorySearchIndex;
pub use primary::MemoryPrimaryStore;
pub use rocks::RocksPrimaryStore;

use crate::common::Result;
use crate::model::{IndexEntry, QuerySpec, Record, RecordPatch};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Point lookup. `Ok(None)` when the id is unknown.
    async fn get(&self, id: i64) -> Result<Option<Record>>;

    /// Upsert. Re-inserting an identical record is a no-op.
    async fn insert(&self, record: &Record) -> Result<()>;

    /// Apply a partial update, returning the stored result.
    async fn update(&self, id: i64, patch: &RecordPatch) -> Result<Record>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Every stored record, in id order.
    async fn scan(&self) -> Result<Vec<Record>>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Filtered, ordered, paginated entries.
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<IndexEntry>>;

    async fn upsert(&self, entry: IndexEntry) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;

    async fn len(&self) -> Result<usize>;
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`. Returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}
