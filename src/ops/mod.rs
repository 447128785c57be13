//! Maintenance operations over the stores

pub mod reindex;
pub mod verify;

pub use reindex::{reindex, ReindexReport};
pub use verify::{verify, VerifyReport};
