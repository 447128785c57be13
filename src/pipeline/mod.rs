//! Ingestion pipeline and cache-aside read path
//!
//! ```text
//! write:  WriteProducer → MessageChannel → IngestConsumer → PrimaryStore, SearchIndex
//! read:   ReadCoordinator → CacheStore | SearchIndex → HydrationPool → PrimaryStore
//! ```

pub mod coordinator;
pub mod hydrate;
pub mod ingest;
pub mod producer;

pub use coordinator::ReadCoordinator;
pub use hydrate::{Hydrated, HydrationPool};
pub use ingest::{ConsumerHandle, ConsumerState, IngestConsumer};
pub use producer::WriteProducer;
