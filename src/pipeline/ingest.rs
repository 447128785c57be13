//! Ingestion consumer
//!
//! The single reader of the message channel. Each message is decoded into a
//! [`Record`], written to the primary store, then projected into the search
//! index. Failures only ever cost the message at hand:
//!
//! - undecodable payloads are counted and committed
//! - retryable store failures are retried with doubling backoff, then the
//!   message is counted as dropped and committed
//! - channel read failures back off (capped) and the loop carries on
//!
//! The loop ends only when the shutdown flag is raised.

use crate::channel::{Message, MessageChannel};
use crate::common::{
    retry_with_backoff, Error, IngestConfig, PipelineMetrics, Result, ResultExt,
};
use crate::model::Record;
use crate::store::{PrimaryStore, SearchIndex};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Idle,
    Receiving,
    Decoding,
    WritingPrimary,
    WritingIndex,
    Stopped,
}

pub struct IngestConsumer {
    channel: Arc<dyn MessageChannel>,
    primary: Arc<dyn PrimaryStore>,
    index: Arc<dyn SearchIndex>,
    config: IngestConfig,
    metrics: Arc<PipelineMetrics>,
    state: watch::Sender<ConsumerState>,
    handled: watch::Sender<u64>,
}

impl IngestConsumer {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        primary: Arc<dyn PrimaryStore>,
        index: Arc<dyn SearchIndex>,
        config: IngestConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        let (handled, _) = watch::channel(0);
        Self {
            channel,
            primary,
            index,
            config,
            metrics,
            state,
            handled,
        }
    }

    /// Start the consumer loop on the runtime.
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = self.state.subscribe();
        let handled = self.handled.subscribe();
        let task = tokio::spawn(self.run(shutdown_rx));

        ConsumerHandle {
            state,
            handled,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Ingestion consumer started");
        let initial_backoff = self.config.retry_backoff();
        let mut read_backoff = initial_backoff;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConsumerState::Receiving);
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                r = self.channel.receive() => r,
            };

            match received {
                Ok(message) => {
                    read_backoff = initial_backoff;
                    self.process(message).await;
                    self.set_state(ConsumerState::Idle);
                }
                Err(e) => {
                    self.metrics.channel_read_errors.inc();
                    warn!(error = %e, backoff_ms = read_backoff.as_millis() as u64, "Channel read failed");
                    self.set_state(ConsumerState::Idle);

                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(read_backoff) => {}
                    }
                    read_backoff = (read_backoff * 2).min(self.config.read_backoff_max());
                }
            }
        }

        self.set_state(ConsumerState::Stopped);
        info!(handled = *self.handled.borrow(), "Ingestion consumer stopped");
    }

    async fn process(&self, message: Message) {
        let offset = message.offset;

        self.set_state(ConsumerState::Decoding);
        let record = match decode(&message.payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(offset, error = %e, "Dropping undecodable message");
                self.metrics.decode_failures.inc();
                self.metrics.messages_dropped.inc();
                self.finish(offset).await;
                return;
            }
        };

        match self.materialize(&record).await {
            Ok(()) => {
                self.metrics.messages_ingested.inc();
                debug!(offset, id = record.id, "Message ingested");
            }
            Err(e) => {
                error!(offset, id = record.id, error = %e, "Dropping message after store failure");
                self.metrics.messages_dropped.inc();
            }
        }
        self.finish(offset).await;
    }

    /// Primary store first, then the index projection.
    async fn materialize(&self, record: &Record) -> Result<()> {
        let attempts = self.config.max_attempts;
        let backoff = self.config.retry_backoff();

        self.set_state(ConsumerState::WritingPrimary);
        retry_with_backoff(
            || self.primary.insert(record),
            attempts,
            backoff,
            |_, _| self.metrics.ingest_retries.inc(),
        )
        .await
        .context("ingest.primary.insert")?;

        self.set_state(ConsumerState::WritingIndex);
        let entry = record.index_entry();
        retry_with_backoff(
            || self.index.upsert(entry),
            attempts,
            backoff,
            |_, _| self.metrics.ingest_retries.inc(),
        )
        .await
        .context("ingest.index.upsert")?;

        Ok(())
    }

    async fn finish(&self, offset: u64) {
        if let Err(e) = self.channel.commit(offset).await {
            warn!(offset, error = %e, "Failed to commit offset");
        }
        self.handled.send_modify(|n| *n += 1);
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}

fn decode(payload: &[u8]) -> Result<Record> {
    let record = Record::from_payload(payload)?;
    record
        .validate()
        .map_err(|e| Error::Decode(format!("payload failed validation: {}", e)))?;
    Ok(record)
}

/// Control and observation handle for a running consumer.
pub struct ConsumerHandle {
    state: watch::Receiver<ConsumerState>,
    handled: watch::Receiver<u64>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// Messages handled so far, whether ingested or dropped.
    pub fn handled(&self) -> u64 {
        *self.handled.borrow()
    }

    /// Wait until at least `count` messages have been handled.
    pub async fn wait_for_handled(&self, count: u64, timeout: Duration) -> Result<()> {
        let mut handled = self.handled.clone();
        let waited = tokio::time::timeout(timeout, handled.wait_for(|n| *n >= count))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Unavailable("ingestion consumer is gone".into())),
            Err(_) => Err(Error::Timeout(format!(
                "{} of {} messages handled after {:?}",
                *self.handled.borrow(),
                count,
                timeout
            ))),
        }
    }

    /// Raise the shutdown flag and wait for the loop to finish its
    /// in-flight message.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| Error::Internal(format!("consumer task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::model::QuerySpec;
    use crate::store::{MemoryPrimaryStore, MemorySearchIndex};
    use chrono::Utc;

    struct Fixture {
        channel: Arc<MemoryChannel>,
        primary: Arc<MemoryPrimaryStore>,
        index: Arc<MemorySearchIndex>,
        metrics: Arc<PipelineMetrics>,
    }

    fn fixture() -> Fixture {
        Fixture {
            channel: Arc::new(MemoryChannel::new()),
            primary: Arc::new(MemoryPrimaryStore::new()),
            index: Arc::new(MemorySearchIndex::new()),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    fn consumer(f: &Fixture) -> ConsumerHandle {
        IngestConsumer::new(
            f.channel.clone(),
            f.primary.clone(),
            f.index.clone(),
            IngestConfig::default(),
            f.metrics.clone(),
        )
        .spawn()
    }

    #[tokio::test]
    async fn test_ingests_into_both_stores() {
        let f = fixture();
        let handle = consumer(&f);

        let record = Record::new(1, "Alex", "Hello", Utc::now());
        f.channel.publish(record.to_payload().unwrap()).await.unwrap();
        handle
            .wait_for_handled(1, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(f.primary.get(1).await.unwrap(), Some(record));
        let page = f.index.query(&QuerySpec::default()).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(f.metrics.messages_ingested.get(), 1);
        assert_eq!(f.channel.committed(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_payload_is_dropped_and_loop_continues() {
        let f = fixture();
        let handle = consumer(&f);

        f.channel.publish(b"not json".to_vec()).await.unwrap();
        let invalid = Record::new(2, "", "no author", Utc::now());
        f.channel.publish(invalid.to_payload().unwrap()).await.unwrap();
        let good = Record::new(3, "Bacca", "Hi", Utc::now());
        f.channel.publish(good.to_payload().unwrap()).await.unwrap();

        handle
            .wait_for_handled(3, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(f.metrics.decode_failures.get(), 2);
        assert_eq!(f.metrics.messages_dropped.get(), 2);
        assert!(f.primary.get(3).await.unwrap().is_some());
        assert!(f.primary.get(2).await.unwrap().is_none());
        assert_eq!(f.channel.committed(), 3);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_handled_times_out() {
        let f = fixture();
        let handle = consumer(&f);

        let err = handle
            .wait_for_handled(1, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(handle.handled(), 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let f = fixture();
        let handle = consumer(&f);
        let state = handle.state_watch();

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await.unwrap();
        assert_eq!(*state.borrow(), ConsumerState::Stopped);
    }
}
