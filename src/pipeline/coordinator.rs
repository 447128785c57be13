//! Cache-aside read coordinator
//!
//! cache → search index → hydration → cache write-back → response.
//!
//! The cache is an optimization only: read errors count as misses and
//! write-back errors never fail the read.

use super::hydrate::HydrationPool;
use crate::common::{CacheConfig, PipelineMetrics, Result, ResultExt};
use crate::model::{QuerySpec, Record};
use crate::store::{namespace_prefix, page_key, CacheStore, SearchIndex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct ReadCoordinator {
    cache: Arc<dyn CacheStore>,
    index: Arc<dyn SearchIndex>,
    pool: Arc<HydrationPool>,
    namespace: String,
    ttl: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl ReadCoordinator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        index: Arc<dyn SearchIndex>,
        pool: Arc<HydrationPool>,
        config: &CacheConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            cache,
            index,
            pool,
            namespace: config.namespace.clone(),
            ttl: config.ttl(),
            metrics,
        }
    }

    /// Records for `spec`, in index order.
    pub async fn get_all(&self, spec: &QuerySpec) -> Result<Vec<Record>> {
        spec.compile()?;
        let start = Instant::now();
        let result = self.read(spec).await;
        self.metrics.read_latency.observe_duration(start.elapsed());
        result
    }

    async fn read(&self, spec: &QuerySpec) -> Result<Vec<Record>> {
        let key = page_key(&self.namespace, spec);

        if let Some(records) = self.cached_page(&key).await {
            self.metrics.cache_hits.inc();
            debug!(key = %key, count = records.len(), "Cache hit");
            return Ok(records);
        }
        self.metrics.cache_misses.inc();

        let entries = self
            .index
            .query(spec)
            .await
            .context("coordinator.index.query")?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        let hydrated = self.pool.hydrate(&ids).await?;

        if !hydrated.missing.is_empty() {
            self.metrics
                .dangling_entries
                .add(hydrated.missing.len() as u64);
            debug!(ids = ?hydrated.missing, "Filtered dangling index entries");
        }
        for (id, e) in &hydrated.errors {
            warn!(id, error = %e, "Omitting record that failed to hydrate");
        }
        let complete = hydrated.errors.is_empty();

        let records = hydrated.into_ordered(&ids);
        // Only complete, non-empty pages are cached.
        if complete && !records.is_empty() {
            self.write_back(&key, &records).await;
        }
        Ok(records)
    }

    async fn cached_page(&self, key: &str) -> Option<Vec<Record>> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.metrics.cache_errors.inc();
                warn!(key, error = %e, "Cache read failed, falling back to index");
                return None;
            }
        };

        match serde_json::from_slice::<Vec<Record>>(&bytes) {
            Ok(records) if records.is_empty() => None,
            Ok(records) => Some(records),
            Err(e) => {
                self.metrics.cache_errors.inc();
                warn!(key, error = %e, "Undecodable cache page, treating as miss");
                None
            }
        }
    }

    async fn write_back(&self, key: &str, records: &[Record]) {
        let bytes = match serde_json::to_vec(records) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache page");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, bytes, self.ttl).await {
            self.metrics.cache_errors.inc();
            warn!(key, error = %e, "Cache write-back failed");
        }
    }

    /// Drop every cached page in this coordinator's namespace.
    pub async fn invalidate(&self) -> Result<usize> {
        let removed = self
            .cache
            .delete_prefix(&namespace_prefix(&self.namespace))
            .await
            .context("coordinator.cache.invalidate")?;
        debug!(removed, "Invalidated cached pages");
        Ok(removed)
    }
}
