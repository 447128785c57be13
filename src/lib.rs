//! # newsfeed
//!
//! A news service that keeps three loosely coupled stores in step:
//! - a durable primary record store (source of truth)
//! - a search index of slim `{id, created}` projections for ordering and paging
//! - an ephemeral TTL cache of result pages
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!  POST /news                                GET /news, POST /news/query
//!      │                                              │
//! ┌────▼──────────┐                          ┌────────▼─────────┐  hit
//! │ WriteProducer │                          │ ReadCoordinator  ├──────► Cache
//! └────┬──────────┘                          └────────┬─────────┘
//!      │ publish                                miss  │ query
//! ┌────▼───────────┐                         ┌────────▼─────────┐
//! │ MessageChannel │                         │   SearchIndex    │
//! └────┬───────────┘                         └────────┬─────────┘
//!      │ receive / commit                       ids   │
//! ┌────▼───────────┐  insert   ┌─────────┐   ┌────────▼─────────┐
//! │ IngestConsumer ├──────────►│ Primary │◄──┤  HydrationPool   │
//! └────┬───────────┘           └─────────┘get└──────────────────┘
//!      │ upsert
//!      ▼
//!  SearchIndex
//! ```
//!
//! A created record is durable on the channel when the write returns and
//! becomes readable once the consumer has ingested it. Updates and deletes
//! go straight to the primary store and invalidate cached pages.
//!
//! ## Usage
//!
//! ```bash
//! newsfeed serve --bind 0.0.0.0:8000 --data-dir ./newsfeed-data
//! newsfeed verify --data-dir ./newsfeed-data
//! newsfeed reindex --data-dir ./newsfeed-data
//! ```

pub mod channel;
pub mod common;
pub mod model;
pub mod news;
pub mod ops;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use common::{Config, Error, ErrorKind, Result};
pub use model::{IndexEntry, QuerySpec, Record, RecordDraft, RecordPatch};
pub use news::{NewsServer, NewsService};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
