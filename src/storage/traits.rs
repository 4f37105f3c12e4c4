//! Storage trait definitions

use crate::record::{AttributionRecord, ContributorType, RangeEvidence};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage connection lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What `ingest_record` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Rows were written (or a partial earlier write was completed).
    Written,
    /// The record id was already fully ingested; nothing was written.
    AlreadyIngested,
}

/// One persisted range joined with its file, as used for commit aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRangeRow {
    pub path: String,
    pub conversation_id: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub contributor_type: ContributorType,
    pub model_id: Option<String>,
}

/// Distinct conversation and range counts for a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub conversations: i64,
    pub ranges: i64,
}

impl std::ops::AddAssign for Totals {
    fn add_assign(&mut self, other: Self) {
        self.conversations += other.conversations;
        self.ranges += other.ranges;
    }
}

/// Trait for attribution storage backends
///
/// Writes are insert-or-ignore at the row level: re-running an ingestion
/// that crashed halfway completes it without duplicating rows. Reads return
/// rows in insertion order so aggregation is reproducible.
pub trait TraceStore: Send + Sync {
    // === Write ===

    /// Persist a record and its nested files, conversations and ranges.
    ///
    /// Returns `AlreadyIngested` without writing when the record id is
    /// already stored completely.
    fn ingest_record(&self, repo_id: i64, record: &AttributionRecord)
        -> StorageResult<IngestOutcome>;

    /// True if a record with this id has been fully ingested.
    fn has_record(&self, record_id: &str) -> StorageResult<bool>;

    // === Read ===

    /// All ranges attributed to a commit, with file path and the effective
    /// contributor.
    fn ranges_for_commit(&self, repo_id: i64, commit_sha: &str)
        -> StorageResult<Vec<CommitRangeRow>>;

    /// Ranges for one file of a commit, for diff overlays.
    fn ranges_for_commit_file(
        &self,
        repo_id: i64,
        commit_sha: &str,
        path: &str,
    ) -> StorageResult<Vec<RangeEvidence>>;

    /// Distinct conversations and ranges for a commit.
    fn totals_for_commit(&self, repo_id: i64, commit_sha: &str) -> StorageResult<Totals>;

    /// Distinct non-null tool names of a commit's records, sorted.
    fn tool_names_for_commit(&self, repo_id: i64, commit_sha: &str)
        -> StorageResult<Vec<String>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: TraceStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
