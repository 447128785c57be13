//! Query specification for filtered, ordered, paginated reads
//!
//! A [`QuerySpec`] is what clients send; [`CompiledQuery`] is the validated
//! form the search index evaluates. Only the indexed fields (`id`,
//! `created`) may be filtered or ordered on.

use super::record::IndexEntry;
use crate::common::{crc32, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DEFAULT_LIMIT: usize = 10;

/// `{filter, offset, limit, order}` as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    /// Field → value equality terms.
    pub filter: BTreeMap<String, Value>,
    pub offset: usize,
    pub limit: usize,
    /// Field → ascending. Empty means newest-created first.
    pub order: BTreeMap<String, bool>,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            filter: BTreeMap::new(),
            offset: 0,
            limit: DEFAULT_LIMIT,
            order: BTreeMap::new(),
        }
    }
}

impl QuerySpec {
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.order.insert(field.into(), ascending);
        self
    }

    /// Ordering actually applied, with the default filled in.
    pub fn effective_order(&self) -> BTreeMap<String, bool> {
        if self.order.is_empty() {
            let mut order = BTreeMap::new();
            order.insert(SortField::Created.name().to_string(), false);
            order
        } else {
            self.order.clone()
        }
    }

    /// Stable hash of filter and ordering. Two specs with the same
    /// fingerprint, offset and limit select the same page.
    pub fn fingerprint(&self) -> u32 {
        let canonical = serde_json::json!({
            "filter": self.filter,
            "order": self.effective_order(),
        });
        crc32(canonical.to_string().as_bytes())
    }

    pub fn compile(&self) -> Result<CompiledQuery> {
        if self.limit == 0 {
            return Err(Error::Invalid("limit must be greater than zero".into()));
        }

        let mut id_eq = None;
        let mut created_eq = None;
        for (field, value) in &self.filter {
            match SortField::parse(field)? {
                SortField::Id => {
                    let id = value.as_i64().ok_or_else(|| {
                        Error::Invalid(format!("filter on id expects an integer, got {}", value))
                    })?;
                    id_eq = Some(id);
                }
                SortField::Created => {
                    let raw = value.as_str().ok_or_else(|| {
                        Error::Invalid(format!(
                            "filter on created expects a timestamp string, got {}",
                            value
                        ))
                    })?;
                    let ts = DateTime::parse_from_rfc3339(raw)
                        .map_err(|e| Error::Invalid(format!("bad created filter {:?}: {}", raw, e)))?;
                    created_eq = Some(ts.with_timezone(&Utc));
                }
            }
        }

        // BTreeMap iteration puts `created` ahead of `id`.
        let mut order = Vec::new();
        for (field, ascending) in self.effective_order() {
            order.push((SortField::parse(&field)?, ascending));
        }

        Ok(CompiledQuery {
            id_eq,
            created_eq,
            order,
            offset: self.offset,
            limit: self.limit,
        })
    }
}

/// Indexed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Created,
}

impl SortField {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "id" => Ok(SortField::Id),
            "created" => Ok(SortField::Created),
            other => Err(Error::Invalid(format!("field {:?} is not indexed", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Created => "created",
        }
    }
}

/// Validated [`QuerySpec`].
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    id_eq: Option<i64>,
    created_eq: Option<DateTime<Utc>>,
    order: Vec<(SortField, bool)>,
    pub offset: usize,
    pub limit: usize,
}

impl CompiledQuery {
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        self.id_eq.map_or(true, |id| entry.id == id)
            && self.created_eq.map_or(true, |ts| entry.created == ts)
    }

    /// Requested ordering, ties broken by ascending id.
    pub fn compare(&self, a: &IndexEntry, b: &IndexEntry) -> Ordering {
        for (field, ascending) in &self.order {
            let ord = match field {
                SortField::Id => a.id.cmp(&b.id),
                SortField::Created => a.created.cmp(&b.created),
            };
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }

    /// Filter, sort and cut one page out of `entries`.
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a IndexEntry>) -> Vec<IndexEntry> {
        let mut matched: Vec<IndexEntry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .copied()
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));
        matched
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}
