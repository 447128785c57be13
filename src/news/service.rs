//! News read/write service
//!
//! Creates go through the message channel and become readable once
//! ingested. Updates and deletes apply directly to the primary store and
//! drop the cached pages.

use crate::common::{Error, ErrorKind, Result, ResultExt};
use crate::model::{QuerySpec, Record, RecordDraft, RecordPatch};
use crate::pipeline::{ReadCoordinator, WriteProducer};
use crate::store::{PrimaryStore, SearchIndex};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct NewsService {
    primary: Arc<dyn PrimaryStore>,
    index: Arc<dyn SearchIndex>,
    producer: WriteProducer,
    reader: ReadCoordinator,
}

impl NewsService {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        index: Arc<dyn SearchIndex>,
        producer: WriteProducer,
        reader: ReadCoordinator,
    ) -> Self {
        Self {
            primary,
            index,
            producer,
            reader,
        }
    }

    /// Accept a new record. It is durable on the channel when this returns.
    pub async fn publish(&self, draft: RecordDraft) -> Result<Record> {
        let record = draft.into_record(Utc::now());
        let offset = self.producer.publish(&record).await?;
        info!(id = record.id, offset, "News accepted");
        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Record> {
        self.primary
            .get(id)
            .await
            .context("repository.news.get")?
            .ok_or_else(|| Error::NotFound(format!("news {}", id)))
    }

    pub async fn get_all(&self, spec: &QuerySpec) -> Result<Vec<Record>> {
        self.reader.get_all(spec).await
    }

    pub async fn update(&self, id: i64, patch: RecordPatch) -> Result<Record> {
        patch.validate()?;
        let record = self
            .primary
            .update(id, &patch)
            .await
            .context("repository.news.update")?;
        self.invalidate_cache(id).await;
        info!(id, "News updated");
        Ok(record)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        self.primary
            .delete(id)
            .await
            .context("repository.news.delete")?;

        match self.index.delete(id).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(id, "No index entry to remove");
            }
            // The read path filters the dangling entry.
            Err(e) => warn!(id, error = %e, "Failed to remove index entry"),
        }

        self.invalidate_cache(id).await;
        info!(id, "News deleted");
        Ok(())
    }

    async fn invalidate_cache(&self, id: i64) {
        if let Err(e) = self.reader.invalidate().await {
            warn!(id, error = %e, "Cache invalidation failed, pages expire on TTL");
        }
    }
}
