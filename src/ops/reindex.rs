//! Rebuild the search index from the primary store

use crate::common::{Result, ResultExt};
use crate::store::{PrimaryStore, SearchIndex};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexReport {
    pub records: usize,
    pub elapsed_ms: u64,
}

/// Upsert an index entry for every record in `primary`. Entries already in
/// `index` are overwritten; stale ones are left for the read path to filter.
pub async fn reindex(primary: &dyn PrimaryStore, index: &dyn SearchIndex) -> Result<ReindexReport> {
    let start = Instant::now();
    tracing::info!("Rebuilding search index from primary store");

    let records = primary.scan().await.context("reindex.primary.scan")?;
    for record in &records {
        index
            .upsert(record.index_entry())
            .await
            .context("reindex.index.upsert")?;
    }

    let report = ReindexReport {
        records: records.len(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    tracing::info!(
        records = report.records,
        elapsed_ms = report.elapsed_ms,
        "Search index rebuilt"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuerySpec, Record};
    use crate::store::{MemoryPrimaryStore, MemorySearchIndex};
    use chrono::Utc;

    #[tokio::test]
    async fn test_reindex() {
        let primary = MemoryPrimaryStore::new();
        for id in 1..=4 {
            primary
                .insert(&Record::new(id, "Alex", "body", Utc::now()))
                .await
                .unwrap();
        }
        let index = MemorySearchIndex::new();

        let report = reindex(&primary, &index).await.unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(index.len().await.unwrap(), 4);

        let page = index.query(&QuerySpec::page(0, 2)).await.unwrap();
        assert_eq!(page.len(), 2);
    }
}
