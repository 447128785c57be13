//! Write path producer

use crate::channel::MessageChannel;
use crate::common::{PipelineMetrics, Result, ResultExt};
use crate::model::Record;
use std::sync::Arc;

/// Serializes accepted records onto the message channel. A record is
/// accepted once `publish` returns; it becomes readable only after the
/// ingestion consumer has materialized it.
pub struct WriteProducer {
    channel: Arc<dyn MessageChannel>,
    metrics: Arc<PipelineMetrics>,
}

impl WriteProducer {
    pub fn new(channel: Arc<dyn MessageChannel>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { channel, metrics }
    }

    /// Validate and publish, returning the channel offset.
    pub async fn publish(&self, record: &Record) -> Result<u64> {
        record.validate()?;
        let payload = record.to_payload()?;
        let offset = self
            .channel
            .publish(payload)
            .await
            .context("producer.channel.publish")?;

        self.metrics.messages_published.inc();
        tracing::debug!(id = record.id, offset, "Record published");
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::common::ErrorKind;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_validates() {
        let channel = Arc::new(MemoryChannel::new());
        let producer = WriteProducer::new(channel.clone(), Arc::new(PipelineMetrics::new()));

        let bad = Record::new(1, "", "body", Utc::now());
        let err = producer.publish(&bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let good = Record::new(1, "Alex", "body", Utc::now());
        assert_eq!(producer.publish(&good).await.unwrap(), 0);

        let message = channel.receive().await.unwrap();
        assert_eq!(Record::from_payload(&message.payload).unwrap(), good);
    }

    #[tokio::test]
    async fn test_unstorable_created_never_reaches_channel() {
        let channel = Arc::new(MemoryChannel::new());
        let producer = WriteProducer::new(channel.clone(), Arc::new(PipelineMetrics::new()));

        let created = chrono::DateTime::parse_from_rfc3339("1500-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let ancient = Record::new(7, "Alex", "body", created);
        let err = producer.publish(&ancient).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        // Nothing was appended, so the next publish takes offset 0
        let good = Record::new(8, "Alex", "body", Utc::now());
        assert_eq!(producer.publish(&good).await.unwrap(), 0);
    }
}
