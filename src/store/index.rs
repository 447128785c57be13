//! In-memory search index over `{id, created}` projections
//!
//! Queries are answered by filtering and sorting the whole entry set, which
//! is fine for the slim projections the index holds. The index can be
//! written to a snapshot file and loaded back so a restart does not need a
//! full reindex from the primary store.

use super::SearchIndex;
use crate::common::{Error, Result};
use crate::model::{IndexEntry, QuerySpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tokio::sync::RwLock;

const SNAPSHOT_MAGIC: &[u8; 8] = b"NEWSIDX1";

#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    entries: RwLock<HashMap<i64, DateTime<Utc>>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().map(|e| (e.id, e.created)).collect()),
        }
    }

    pub async fn contains(&self, id: i64) -> bool {
        self.entries.read().await.contains_key(&id)
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Save the current entries as a snapshot file.
    ///
    /// Layout: magic, entry count (u64), then per entry the id (i64) and
    /// `created` in nanoseconds (i64), all little-endian.
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<usize> {
        let entries: Vec<(i64, DateTime<Utc>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, created)| (*id, *created))
            .collect();

        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);

            writer.write_all(SNAPSHOT_MAGIC)?;
            writer.write_all(&(entries.len() as u64).to_le_bytes())?;

            for (id, created) in &entries {
                let nanos = created.timestamp_nanos_opt().ok_or_else(|| {
                    Error::Invalid(format!("created out of range for news {}", id))
                })?;
                writer.write_all(&id.to_le_bytes())?;
                writer.write_all(&nanos.to_le_bytes())?;
            }

            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, path)?;

        Ok(entries.len())
    }

    /// Load an index snapshot from file.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(Error::Corrupted("Invalid snapshot magic".into()));
        }

        let mut count_bytes = [0u8; 8];
        reader.read_exact(&mut count_bytes)?;
        let count = u64::from_le_bytes(count_bytes);

        let mut entries = HashMap::new();
        for _ in 0..count {
            let mut id_bytes = [0u8; 8];
            reader.read_exact(&mut id_bytes)?;
            let mut nanos_bytes = [0u8; 8];
            reader.read_exact(&mut nanos_bytes)?;

            entries.insert(
                i64::from_le_bytes(id_bytes),
                DateTime::from_timestamp_nanos(i64::from_le_bytes(nanos_bytes)),
            );
        }

        Ok(Self {
            entries: RwLock::new(entries),
        })
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<IndexEntry>> {
        let compiled = spec.compile()?;
        let entries = self.entries.read().await;
        let projected: Vec<IndexEntry> = entries
            .iter()
            .map(|(id, created)| IndexEntry {
                id: *id,
                created: *created,
            })
            .collect();
        Ok(compiled.apply(&projected))
    }

    async fn upsert(&self, entry: IndexEntry) -> Result<()> {
        self.entries.write().await.insert(entry.id, entry.created);
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.entries.write().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("index entry {}", id))),
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    async fn seeded() -> MemorySearchIndex {
        let index = MemorySearchIndex::new();
        for (id, secs) in [(1, 0), (2, 3), (3, 5)] {
            index
                .upsert(IndexEntry {
                    id,
                    created: t0() + Duration::seconds(secs),
                })
                .await
                .unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_query_orders_newest_first() {
        let index = seeded().await;
        let page = index.query(&QuerySpec::default()).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let index = seeded().await;
        index
            .upsert(IndexEntry {
                id: 1,
                created: t0() + Duration::seconds(10),
            })
            .await
            .unwrap();
        assert_eq!(index.len().await.unwrap(), 3);

        let page = index.query(&QuerySpec::page(0, 1)).await.unwrap();
        assert_eq!(page[0].id, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let index = seeded().await;
        index.delete(2).await.unwrap();
        assert!(!index.contains(2).await);

        let err = index.delete(2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty_page() {
        let index = MemorySearchIndex::new();
        assert!(index.query(&QuerySpec::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.snap");

        let index = seeded().await;
        assert_eq!(index.save_snapshot(&path).await.unwrap(), 3);

        let loaded = MemorySearchIndex::load_snapshot(&path).unwrap();
        assert_eq!(loaded.len().await.unwrap(), 3);
        assert_eq!(
            loaded.query(&QuerySpec::default()).await.unwrap(),
            index.query(&QuerySpec::default()).await.unwrap()
        );
    }

    #[test]
    fn test_snapshot_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.snap");
        std::fs::write(&path, b"KVINDEX3\0\0\0\0\0\0\0\0").unwrap();

        let err = MemorySearchIndex::load_snapshot(&path).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }
}
