//! Hydration worker pool
//!
//! A fixed set of long-lived workers turns index ids back into full records
//! by point lookups against the primary store. Every batch fans its ids out
//! over a bounded job queue and collects exactly one outcome per id on a
//! reply channel sized to the batch, so a worker never blocks on a reply.
//! The batch waits for all outcomes or its deadline, whichever comes first.

use crate::common::{Error, HydrationConfig, PipelineMetrics, Result, ResultExt};
use crate::model::Record;
use crate::store::PrimaryStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct Job {
    slot: usize,
    id: i64,
    reply: mpsc::Sender<(usize, Result<Option<Record>>)>,
}

/// Outcome of one hydration batch.
#[derive(Debug, Default)]
pub struct Hydrated {
    pub records: HashMap<i64, Record>,
    /// Ids with no record in the primary store.
    pub missing: Vec<i64>,
    /// Ids whose lookup failed or did not finish in time.
    pub errors: Vec<(i64, Error)>,
}

impl Hydrated {
    /// Records in the order of `ids`, skipping ids that did not hydrate.
    pub fn into_ordered(mut self, ids: &[i64]) -> Vec<Record> {
        ids.iter()
            .filter_map(|id| self.records.remove(id))
            .collect()
    }
}

pub struct HydrationPool {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    batch_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl HydrationPool {
    /// Spawn `config.workers` workers on the current runtime.
    pub fn start(
        primary: Arc<dyn PrimaryStore>,
        config: &HydrationConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let lookup_timeout = config.lookup_timeout();

        let workers = (0..config.workers.max(1))
            .map(|n| {
                tokio::spawn(worker(
                    n,
                    rx.clone(),
                    primary.clone(),
                    lookup_timeout,
                    metrics.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Hydration pool started"
        );

        Self {
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            batch_timeout: config.batch_timeout(),
            metrics,
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Job>> {
        self.jobs
            .lock()
            .map_err(|_| Error::Internal("hydration pool lock poisoned".into()))?
            .clone()
            .ok_or_else(|| Error::Unavailable("hydration pool is shut down".into()))
    }

    /// Look up every id in `ids`.
    pub async fn hydrate(&self, ids: &[i64]) -> Result<Hydrated> {
        if ids.is_empty() {
            return Ok(Hydrated::default());
        }

        let jobs = self.sender()?;
        let deadline = Instant::now() + self.batch_timeout;
        let (reply_tx, mut reply_rx) = mpsc::channel(ids.len());
        let mut outcomes: Vec<Option<Result<Option<Record>>>> =
            (0..ids.len()).map(|_| None).collect();

        let mut admitted = 0;
        for (slot, &id) in ids.iter().enumerate() {
            let job = Job {
                slot,
                id,
                reply: reply_tx.clone(),
            };
            match tokio::time::timeout_at(deadline, jobs.send(job)).await {
                Ok(Ok(())) => admitted += 1,
                Ok(Err(_)) => return Err(Error::Unavailable("hydration pool is shut down".into())),
                Err(_) => break,
            }
        }
        drop(reply_tx);
        drop(jobs);

        let mut received = 0;
        while received < admitted {
            match tokio::time::timeout_at(deadline, reply_rx.recv()).await {
                Ok(Some((slot, outcome))) => {
                    outcomes[slot] = Some(outcome);
                    received += 1;
                }
                Ok(None) | Err(_) => break,
            }
        }

        let mut hydrated = Hydrated::default();
        for (slot, outcome) in outcomes.into_iter().enumerate() {
            let id = ids[slot];
            match outcome {
                Some(Ok(Some(record))) => {
                    hydrated.records.insert(id, record);
                }
                Some(Ok(None)) => hydrated.missing.push(id),
                Some(Err(e)) => {
                    self.metrics.hydration_failures.inc();
                    hydrated.errors.push((id, e));
                }
                None => {
                    self.metrics.hydration_failures.inc();
                    hydrated.errors.push((
                        id,
                        Error::Timeout(format!(
                            "hydration batch deadline of {:?} passed",
                            self.batch_timeout
                        )),
                    ));
                }
            }
        }

        debug!(
            requested = ids.len(),
            hydrated = hydrated.records.len(),
            missing = hydrated.missing.len(),
            failed = hydrated.errors.len(),
            "Hydration batch finished"
        );
        Ok(hydrated)
    }

    /// Close the job queue and wait for the workers to drain it.
    pub async fn shutdown(&self) -> Result<()> {
        let handles = {
            let mut jobs = self
                .jobs
                .lock()
                .map_err(|_| Error::Internal("hydration pool lock poisoned".into()))?;
            jobs.take();
            let mut workers = self
                .workers
                .lock()
                .map_err(|_| Error::Internal("hydration pool lock poisoned".into()))?;
            std::mem::take(&mut *workers)
        };

        for handle in handles {
            handle
                .await
                .map_err(|e| Error::Internal(format!("hydration worker failed: {}", e)))?;
        }
        info!("Hydration pool stopped");
        Ok(())
    }
}

async fn worker(
    n: usize,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    primary: Arc<dyn PrimaryStore>,
    lookup_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };
        if job.reply.is_closed() {
            debug!(worker = n, id = job.id, "Skipping lookup for abandoned batch");
            continue;
        }

        metrics.hydration_lookups.inc();
        let outcome = match tokio::time::timeout(lookup_timeout, primary.get(job.id)).await {
            Ok(result) => result.context("hydrate.primary.get"),
            Err(_) => Err(Error::Timeout(format!(
                "lookup of news {} exceeded {:?}",
                job.id, lookup_timeout
            ))),
        };

        if let Err(e) = &outcome {
            warn!(worker = n, id = job.id, error = %e, "Hydration lookup failed");
        }
        // The reply buffer holds one slot per job; a full or closed buffer
        // means the batch already gave up.
        if job.reply.try_send((job.slot, outcome)).is_err() {
            debug!(worker = n, id = job.id, "Dropping late hydration result");
        }
    }
    debug!(worker = n, "Hydration worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;
    use crate::model::RecordPatch;
    use crate::store::MemoryPrimaryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    struct SlowStore {
        inner: MemoryPrimaryStore,
        slow_id: i64,
        delay: Duration,
    }

    #[async_trait]
    impl PrimaryStore for SlowStore {
        async fn get(&self, id: i64) -> Result<Option<Record>> {
            if id == self.slow_id {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.get(id).await
        }
        async fn insert(&self, record: &Record) -> Result<()> {
            self.inner.insert(record).await
        }
        async fn update(&self, id: i64, patch: &RecordPatch) -> Result<Record> {
            self.inner.update(id, patch).await
        }
        async fn delete(&self, id: i64) -> Result<()> {
            self.inner.delete(id).await
        }
        async fn scan(&self) -> Result<Vec<Record>> {
            self.inner.scan().await
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    async fn seeded(ids: &[i64]) -> MemoryPrimaryStore {
        let store = MemoryPrimaryStore::new();
        for &id in ids {
            store
                .insert(&Record::new(id, "Alex", format!("n{}", id), Utc::now()))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_hydrate_preserves_order_and_skips_missing() {
        let primary = Arc::new(seeded(&[1, 2, 3]).await);
        let pool = HydrationPool::start(
            primary,
            &HydrationConfig::default(),
            Arc::new(PipelineMetrics::new()),
        );

        let ids = [3, 99, 1, 2];
        let hydrated = pool.hydrate(&ids).await.unwrap();
        assert_eq!(hydrated.missing, vec![99]);
        assert!(hydrated.errors.is_empty());

        let ordered: Vec<i64> = hydrated.into_ordered(&ids).iter().map(|r| r.id).collect();
        assert_eq!(ordered, vec![3, 1, 2]);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let pool = HydrationPool::start(
            Arc::new(MemoryPrimaryStore::new()),
            &HydrationConfig::default(),
            Arc::new(PipelineMetrics::new()),
        );
        let hydrated = pool.hydrate(&[]).await.unwrap();
        assert!(hydrated.records.is_empty());
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_timeout() {
        let primary = Arc::new(SlowStore {
            inner: seeded(&[1, 2]).await,
            slow_id: 2,
            delay: Duration::from_millis(500),
        });
        let config = HydrationConfig {
            lookup_timeout_ms: 20,
            ..Default::default()
        };
        let metrics = Arc::new(PipelineMetrics::new());
        let pool = HydrationPool::start(primary, &config, metrics.clone());

        let hydrated = pool.hydrate(&[1, 2]).await.unwrap();
        assert!(hydrated.records.contains_key(&1));
        assert_eq!(hydrated.errors.len(), 1);
        assert_eq!(hydrated.errors[0].0, 2);
        assert_eq!(hydrated.errors[0].1.kind(), ErrorKind::TransientIo);
        assert_eq!(metrics.hydration_failures.get(), 1);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_deadline() {
        let primary = Arc::new(SlowStore {
            inner: seeded(&[1, 2]).await,
            slow_id: 2,
            delay: Duration::from_millis(300),
        });
        let config = HydrationConfig {
            lookup_timeout_ms: 5_000,
            batch_timeout_ms: 30,
            ..Default::default()
        };
        let pool = HydrationPool::start(primary, &config, Arc::new(PipelineMetrics::new()));

        let hydrated = pool.hydrate(&[1, 2]).await.unwrap();
        assert!(hydrated.records.contains_key(&1));
        assert!(matches!(hydrated.errors[0].1, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_abandoned_batch_is_not_looked_up() {
        let primary = Arc::new(SlowStore {
            inner: seeded(&[1]).await,
            slow_id: 1,
            delay: Duration::from_millis(200),
        });
        let config = HydrationConfig {
            workers: 1,
            lookup_timeout_ms: 5_000,
            batch_timeout_ms: 10,
            ..Default::default()
        };
        let metrics = Arc::new(PipelineMetrics::new());
        let pool = HydrationPool::start(primary, &config, metrics.clone());

        let hydrated = pool.hydrate(&[1, 1, 1, 1, 1]).await.unwrap();
        assert_eq!(hydrated.errors.len(), 5);

        // The in-flight lookup finishes; the queued ones are skipped
        pool.shutdown().await.unwrap();
        assert!(metrics.hydration_lookups.get() <= 1);
    }

    #[tokio::test]
    async fn test_hydrate_after_shutdown() {
        let pool = HydrationPool::start(
            Arc::new(MemoryPrimaryStore::new()),
            &HydrationConfig::default(),
            Arc::new(PipelineMetrics::new()),
        );
        pool.shutdown().await.unwrap();

        let err = pool.hydrate(&[1]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
    }
}
