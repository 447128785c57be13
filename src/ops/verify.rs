//! Consistency check between the primary store and the search index

use crate::common::{Result, ResultExt};
use crate::model::QuerySpec;
use crate::store::{PrimaryStore, SearchIndex};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// What `verify` found. Unindexed records are invisible to list reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub records: usize,
    pub index_entries: usize,
    /// Index ids with no primary record.
    pub dangling: Vec<i64>,
    /// Primary ids with no index entry.
    pub unindexed: Vec<i64>,
    /// Ids whose indexed `created` differs from the record's.
    pub stale: Vec<i64>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.dangling.is_empty() && self.unindexed.is_empty() && self.stale.is_empty()
    }
}

pub async fn verify(primary: &dyn PrimaryStore, index: &dyn SearchIndex) -> Result<VerifyReport> {
    tracing::info!("Verifying search index against primary store");

    let records = primary.scan().await.context("verify.primary.scan")?;
    let total = index.len().await.context("verify.index.len")?;

    let mut indexed = BTreeMap::new();
    if total > 0 {
        let all = QuerySpec::page(0, total).order_by("id", true);
        for entry in index.query(&all).await.context("verify.index.query")? {
            indexed.insert(entry.id, entry.created);
        }
    }

    let mut report = VerifyReport {
        records: records.len(),
        index_entries: indexed.len(),
        ..Default::default()
    };

    let mut seen = BTreeSet::new();
    for record in &records {
        seen.insert(record.id);
        match indexed.get(&record.id) {
            None => report.unindexed.push(record.id),
            Some(created) if *created != record.created => report.stale.push(record.id),
            Some(_) => {}
        }
    }
    report.dangling = indexed.keys().filter(|id| !seen.contains(id)).copied().collect();

    tracing::info!(
        records = report.records,
        index_entries = report.index_entries,
        dangling = report.dangling.len(),
        unindexed = report.unindexed.len(),
        stale = report.stale.len(),
        "Verification finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IndexEntry, Record};
    use crate::store::{MemoryPrimaryStore, MemorySearchIndex};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_verify_finds_drift() {
        let now = Utc::now();
        let primary = MemoryPrimaryStore::new();
        let index = MemorySearchIndex::new();

        let kept = Record::new(1, "Alex", "a", now);
        primary.insert(&kept).await.unwrap();
        index.upsert(kept.index_entry()).await.unwrap();

        primary
            .insert(&Record::new(2, "Alex", "b", now))
            .await
            .unwrap();

        let moved = Record::new(3, "Alex", "c", now);
        primary.insert(&moved).await.unwrap();
        index
            .upsert(IndexEntry {
                id: 3,
                created: now + Duration::seconds(1),
            })
            .await
            .unwrap();

        index
            .upsert(IndexEntry { id: 9, created: now })
            .await
            .unwrap();

        let report = verify(&primary, &index).await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.dangling, vec![9]);
        assert_eq!(report.unindexed, vec![2]);
        assert_eq!(report.stale, vec![3]);
    }

    #[tokio::test]
    async fn test_verify_empty() {
        let report = verify(&MemoryPrimaryStore::new(), &MemorySearchIndex::new())
            .await
            .unwrap();
        assert!(report.is_consistent());
    }
}
