//! News server

use super::http::{create_router, AppState};
use super::service::NewsService;
use crate::channel::{LogChannel, MemoryChannel, MessageChannel};
use crate::common::{
    ChannelBackend, Config, Error, PipelineMetrics, PrimaryBackend, Result, ResultExt,
    SyncPolicy,
};
use crate::ops;
use crate::pipeline::{ConsumerHandle, HydrationPool, IngestConsumer, ReadCoordinator, WriteProducer};
use crate::store::{
    CacheStore, MemoryCacheStore, MemoryPrimaryStore, MemorySearchIndex, PrimaryStore,
    RocksPrimaryStore, SearchIndex,
};
use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct NewsServer {
    config: Config,
}

impl NewsServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Open the stores and start the background tasks. No socket is bound.
    pub async fn start(&self) -> Result<RunningServer> {
        let config = &self.config;
        config.validate()?;
        let storage = &config.storage;
        tracing::info!("Starting newsfeed {}", crate::VERSION);
        tracing::info!("  HTTP API: {}", config.server.bind_addr);
        tracing::info!("  Data dir: {}", storage.data_dir.display());
        tracing::info!("  Primary: {:?}, channel: {:?}", storage.primary, storage.channel);

        let metrics = Arc::new(PipelineMetrics::new());

        let durable = storage.primary == PrimaryBackend::RocksDb;
        let primary: Arc<dyn PrimaryStore> = match storage.primary {
            PrimaryBackend::Memory => Arc::new(MemoryPrimaryStore::new()),
            PrimaryBackend::RocksDb => Arc::new(
                RocksPrimaryStore::open(
                    storage.primary_path(),
                    storage.sync_policy == SyncPolicy::Always,
                )
                .context("startup.primary.open")?,
            ),
        };
        primary.ping().await.context("startup.primary.ping")?;

        let cache = Arc::new(MemoryCacheStore::new());
        cache.ping().await.context("startup.cache.ping")?;

        let channel: Arc<dyn MessageChannel> = match storage.channel {
            ChannelBackend::Memory => Arc::new(MemoryChannel::new()),
            ChannelBackend::Log => Arc::new(
                LogChannel::open(storage.log_dir(), storage.sync_policy)
                    .context("startup.channel.open")?,
            ),
        };

        let snapshot_path = durable.then(|| storage.index_snapshot_path());
        let index = Arc::new(open_index(primary.as_ref(), snapshot_path.as_deref()).await?);

        let pool = Arc::new(HydrationPool::start(
            primary.clone(),
            &config.hydration,
            metrics.clone(),
        ));

        let consumer = IngestConsumer::new(
            channel.clone(),
            primary.clone(),
            index.clone(),
            config.ingest.clone(),
            metrics.clone(),
        )
        .spawn();

        let sweeper = spawn_cache_sweeper(cache.clone(), config.cache.sweep_interval());

        let reader = ReadCoordinator::new(
            cache,
            index.clone(),
            pool.clone(),
            &config.cache,
            metrics.clone(),
        );
        let producer = WriteProducer::new(channel, metrics.clone());
        let service = Arc::new(NewsService::new(
            primary,
            index.clone(),
            producer,
            reader,
        ));

        let router = create_router(
            AppState {
                service: service.clone(),
                index: index.clone(),
                metrics: metrics.clone(),
                consumer: consumer.state_watch(),
            },
            config.server.max_body_bytes,
        );

        Ok(RunningServer {
            router,
            service,
            metrics,
            consumer,
            pool,
            index,
            sweeper,
            snapshot_path,
        })
    }

    /// Serve HTTP until Ctrl-C, then shut everything down.
    pub async fn serve(self) -> Result<()> {
        let running = self.start().await?;

        let listener = tokio::net::TcpListener::bind(self.config.server.bind_addr).await?;
        tracing::info!("✓ newsfeed ready on {}", self.config.server.bind_addr);

        let served = axum::serve(listener, running.router())
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Err(e) = &served {
            tracing::error!("HTTP server error: {}", e);
        }

        running.shutdown().await?;
        served.map_err(Error::from)
    }
}

/// A started server: its router plus handles to the background tasks.
pub struct RunningServer {
    router: Router,
    service: Arc<NewsService>,
    metrics: Arc<PipelineMetrics>,
    consumer: ConsumerHandle,
    pool: Arc<HydrationPool>,
    index: Arc<MemorySearchIndex>,
    sweeper: JoinHandle<()>,
    snapshot_path: Option<PathBuf>,
}

impl RunningServer {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn service(&self) -> Arc<NewsService> {
        self.service.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn consumer(&self) -> &ConsumerHandle {
        &self.consumer
    }

    /// Stop the consumer and the pool, then persist the index snapshot.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Shutting down");
        self.sweeper.abort();
        self.consumer.shutdown().await?;
        self.pool.shutdown().await?;

        if let Some(path) = &self.snapshot_path {
            let entries = self
                .index
                .save_snapshot(path)
                .await
                .context("shutdown.index.snapshot")?;
            tracing::info!(entries, path = %path.display(), "Index snapshot saved");
        }
        Ok(())
    }
}

/// Load the snapshot left by a clean shutdown, or rebuild from the primary
/// store. The snapshot is removed once loaded so a crash before the next
/// clean shutdown forces a rebuild.
async fn open_index(
    primary: &dyn PrimaryStore,
    snapshot_path: Option<&Path>,
) -> Result<MemorySearchIndex> {
    if let Some(path) = snapshot_path.filter(|p| p.exists()) {
        match MemorySearchIndex::load_snapshot(path) {
            Ok(index) => {
                std::fs::remove_file(path)?;
                let entries = index.len().await?;
                tracing::info!(
                    entries,
                    path = %path.display(),
                    "Index snapshot loaded"
                );
                return Ok(index);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Index snapshot unreadable, rebuilding");
            }
        }
    }

    let index = MemorySearchIndex::new();
    ops::reindex(primary, &index)
        .await
        .context("startup.index.reindex")?;
    Ok(index)
}

fn spawn_cache_sweeper(cache: Arc<MemoryCacheStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "Expired cache pages swept");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
