//! Records, index projections and query specifications

pub mod query;
pub mod record;

pub use query::{CompiledQuery, QuerySpec, SortField, DEFAULT_LIMIT};
pub use record::{IndexEntry, Record, RecordDraft, RecordPatch};
