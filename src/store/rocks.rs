//! Primary store on RocksDB
//!
//! Records live in the `news` column family, keyed by the big-endian id so
//! iteration returns them in id order. Values are bincode-encoded.

use super::PrimaryStore;
use crate::common::{Error, Result};
use crate::model::{Record, RecordPatch};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, IteratorMode, Options, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

const CF_NEWS: &str = "news";

/// Stored form. `created` is kept as nanoseconds so bincode stays compact.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    author: String,
    body: String,
    created_nanos: i64,
}

impl StoredRecord {
    fn from_record(record: &Record) -> Result<Self> {
        let created_nanos = record.created.timestamp_nanos_opt().ok_or_else(|| {
            Error::Invalid(format!("created out of range for news {}", record.id))
        })?;
        Ok(Self {
            author: record.author.clone(),
            body: record.body.clone(),
            created_nanos,
        })
    }

    fn into_record(self, id: i64) -> Record {
        Record {
            id,
            author: self.author,
            body: self.body,
            created: chrono::DateTime::from_timestamp_nanos(self.created_nanos),
        }
    }
}

pub struct RocksPrimaryStore {
    db: DB,
    sync_writes: bool,
    // Serializes read-modify-write in `update`.
    write_lock: Mutex<()>,
}

impl RocksPrimaryStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_NEWS])?;

        Ok(Self {
            db,
            sync_writes,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_NEWS)
            .ok_or_else(|| Error::Internal(format!("missing column family {}", CF_NEWS)))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    fn read(&self, id: i64) -> Result<Option<Record>> {
        match self.db.get_cf(self.cf()?, id.to_be_bytes())? {
            Some(bytes) => {
                let stored: StoredRecord = bincode::deserialize(&bytes)?;
                Ok(Some(stored.into_record(id)))
            }
            None => Ok(None),
        }
    }

    fn write(&self, record: &Record) -> Result<()> {
        let value = bincode::serialize(&StoredRecord::from_record(record)?)
            .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;
        self.db
            .put_cf_opt(self.cf()?, record.id.to_be_bytes(), value, &self.write_opts())?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Internal("primary store lock poisoned".into()))
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush_cf(self.cf()?)?;
        Ok(())
    }
}

#[async_trait]
impl PrimaryStore for RocksPrimaryStore {
    async fn get(&self, id: i64) -> Result<Option<Record>> {
        self.read(id)
    }

    async fn insert(&self, record: &Record) -> Result<()> {
        let _guard = self.lock()?;
        self.write(record)
    }

    async fn update(&self, id: i64, patch: &RecordPatch) -> Result<Record> {
        let _guard = self.lock()?;
        let mut record = self
            .read(id)?
            .ok_or_else(|| Error::NotFound(format!("news {}", id)))?;
        record.apply(patch);
        self.write(&record)?;
        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let _guard = self.lock()?;
        if self.read(id)?.is_none() {
            return Err(Error::NotFound(format!("news {}", id)));
        }
        self.db
            .delete_cf_opt(self.cf()?, id.to_be_bytes(), &self.write_opts())?;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for item in self.db.iterator_cf(self.cf()?, IteratorMode::Start) {
            let (key, value) = item?;
            let key: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| Error::Corrupted(format!("bad key length {}", key.len())))?;
            let stored: StoredRecord = bincode::deserialize(&value)?;
            records.push(stored.into_record(i64::from_be_bytes(key)));
        }
        Ok(records)
    }

    async fn ping(&self) -> Result<()> {
        self.cf().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(id: i64) -> Record {
        Record::new(
            id,
            "Bacca",
            format!("story {}", id),
            Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, id as u32).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_rocks_store() {
        let dir = tempdir().unwrap();
        let store = RocksPrimaryStore::open(dir.path().join("primary"), false).unwrap();
        store.ping().await.unwrap();

        store.insert(&record(2)).await.unwrap();
        store.insert(&record(1)).await.unwrap();
        assert_eq!(store.get(2).await.unwrap(), Some(record(2)));

        let ids: Vec<i64> = store.scan().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let updated = store
            .update(1, &RecordPatch::default().author("Bacca UPDATED"))
            .await
            .unwrap();
        assert_eq!(updated.author, "Bacca UPDATED");
        assert_eq!(updated.created, record(1).created);

        store.delete(2).await.unwrap();
        let err = store.delete(2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_rocks_store_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("primary");

        {
            let store = RocksPrimaryStore::open(&path, true).unwrap();
            store.insert(&record(7)).await.unwrap();
            store.flush().unwrap();
        }

        let store = RocksPrimaryStore::open(&path, true).unwrap();
        assert_eq!(store.get(7).await.unwrap(), Some(record(7)));
    }
}
