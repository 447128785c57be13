//! Common utilities and types shared across newsfeed

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{
    CacheConfig, ChannelBackend, Config, HydrationConfig, IngestConfig, PrimaryBackend,
    ServerConfig, StorageConfig, SyncPolicy,
};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use metrics::PipelineMetrics;
pub use utils::{crc32, retry_with_backoff, timestamp_now_millis};
