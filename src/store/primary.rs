//! In-process primary store

use super::PrimaryStore;
use crate::common::{Error, Result};
use crate::model::{Record, RecordPatch};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Records held in a `BTreeMap` keyed by id. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPrimaryStore {
    records: RwLock<BTreeMap<i64, Record>>,
}

impl MemoryPrimaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    async fn get(&self, id: i64) -> Result<Option<Record>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn insert(&self, record: &Record) -> Result<()> {
        self.records.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, id: i64, patch: &RecordPatch) -> Result<Record> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("news {}", id)))?;
        record.apply(patch);
        Ok(record.clone())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.records.write().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("news {}", id))),
        }
    }

    async fn scan(&self) -> Result<Vec<Record>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;
    use chrono::Utc;

    #[tokio::test]
    async fn test_crud() {
        let store = MemoryPrimaryStore::new();
        let record = Record::new(1, "Alex", "Hello", Utc::now());

        assert!(store.get(1).await.unwrap().is_none());

        store.insert(&record).await.unwrap();
        store.insert(&record).await.unwrap();
        assert_eq!(store.scan().await.unwrap().len(), 1);

        let updated = store
            .update(1, &RecordPatch::default().body("Edited"))
            .await
            .unwrap();
        assert_eq!(updated.body, "Edited");
        assert_eq!(store.get(1).await.unwrap().unwrap().body, "Edited");

        store.delete(1).await.unwrap();
        assert!(store.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_ids() {
        let store = MemoryPrimaryStore::new();
        let patch = RecordPatch::default().author("Nobody");

        let err = store.update(-9999, &patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = store.delete(-9999).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
