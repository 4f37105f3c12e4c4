//! Storage backends for attribution records
//!
//! Persistence goes through the `TraceStore` trait. The primary
//! implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    CommitRangeRow, IngestOutcome, OpenStore, StorageError, StorageResult, Totals, TraceStore,
};
