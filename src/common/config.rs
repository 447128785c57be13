//! Configuration for newsfeed components
//!
//! A single [`Config`] is built once at startup and handed to each component.
//! Sources are layered: defaults, then an optional TOML file, then
//! `NEWSFEED__SECTION__FIELD` environment variables.

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub hydration: HydrationConfig,
    pub ingest: IngestConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            hydration: HydrationConfig::default(),
            ingest: IngestConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration, reading `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("NEWSFEED")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.hydration.workers == 0 {
            return Err(crate::Error::InvalidConfig(
                "hydration.workers must be at least 1".into(),
            ));
        }
        if self.hydration.queue_capacity == 0 {
            return Err(crate::Error::InvalidConfig(
                "hydration.queue_capacity must be at least 1".into(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "cache.ttl_secs must be at least 1".into(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "cache.sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.cache.namespace.is_empty() || self.cache.namespace.contains(':') {
            return Err(crate::Error::InvalidConfig(
                "cache.namespace must be non-empty and must not contain ':'".into(),
            ));
        }
        if self.storage.primary == PrimaryBackend::Memory
            && self.storage.channel == ChannelBackend::Log
        {
            return Err(crate::Error::InvalidConfig(
                "storage.channel = \"log\" needs storage.primary = \"rocksdb\": \
                 a restart resumes the log past records the memory store has lost"
                    .into(),
            ));
        }
        if self.ingest.max_attempts == 0 {
            return Err(crate::Error::InvalidConfig(
                "ingest.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for HTTP API
    pub bind_addr: SocketAddr,

    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryBackend {
    Memory,
    RocksDb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelBackend {
    Memory,
    Log,
}

/// When the topic log is flushed to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// fsync after every append
    Always,
    /// fsync at most once a second
    Interval,
    /// Flush to the OS only
    Never,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for RocksDB, the topic log and the index snapshot
    pub data_dir: PathBuf,

    pub primary: PrimaryBackend,

    pub channel: ChannelBackend,

    pub sync_policy: SyncPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./newsfeed-data"),
            primary: PrimaryBackend::RocksDb,
            channel: ChannelBackend::Log,
            sync_policy: SyncPolicy::Always,
        }
    }
}

impl StorageConfig {
    pub fn primary_path(&self) -> PathBuf {
        self.data_dir.join("primary")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("channel")
    }

    pub fn index_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("index.snap")
    }
}

/// Cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Key prefix for every cached page
    pub namespace: String,

    /// Expiry set on every cache write
    pub ttl_secs: u64,

    /// How often expired entries are swept
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "news".to_string(),
            ttl_secs: 10,
            sweep_interval_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Hydration worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    /// Number of concurrent lookup workers
    pub workers: usize,

    /// Pending lookups admitted before submitters wait
    pub queue_capacity: usize,

    /// Timeout for a single primary store lookup
    pub lookup_timeout_ms: u64,

    /// Deadline for a whole batch
    pub batch_timeout_ms: u64,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 256,
            lookup_timeout_ms: 2_000,
            batch_timeout_ms: 5_000,
        }
    }
}

impl HydrationConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

/// Ingestion consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Attempts per store write before the message is dropped
    pub max_attempts: usize,

    /// First retry delay; doubles on each attempt
    pub retry_backoff_ms: u64,

    /// Cap for the delay between failed channel reads
    pub read_backoff_max_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 50,
            read_backoff_max_ms: 5_000,
        }
    }
}

impl IngestConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn read_backoff_max(&self) -> Duration {
        Duration::from_millis(self.read_backoff_max_ms)
    }
}
