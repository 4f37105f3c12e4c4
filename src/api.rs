//! Transport-independent API layer.
//!
//! `TraceApi` is the single entry point for consumer-facing operations.
//! The CLI (and any UI bridge) calls `TraceApi` methods; they never reach
//! into the store, the producers or the orchestrator directly.

use std::path::Path;
use std::sync::Arc;

use crate::aggregate::{self, AttributionCoverage, CoverageError, TraceSummary};
use crate::config::TraceConfig;
use crate::ingest::{CancellationToken, CollectorStatus, IngestError, IngestOrchestrator, RefreshReport};
use crate::producer::{self, GitCli, ImportError, ImportOutcome, OtelConverter, Redactor, SecretRedactor};
use crate::record::RangeEvidence;
use crate::storage::{OpenStore, SqliteStore, StorageResult, TraceStore};

/// Single entry point for all consumer-facing operations.
#[derive(Clone)]
pub struct TraceApi {
    orchestrator: Arc<IngestOrchestrator>,
    redactor: Arc<dyn Redactor>,
}

impl TraceApi {
    pub fn new(orchestrator: Arc<IngestOrchestrator>) -> Self {
        Self {
            orchestrator,
            redactor: Arc::new(SecretRedactor),
        }
    }

    pub fn with_redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redactor = redactor;
        self
    }

    /// Wire the production stack: SQLite at `config.db_path`, the `git`
    /// executable, and the telemetry converter.
    pub fn open(config: TraceConfig) -> StorageResult<Self> {
        let store: Arc<dyn TraceStore> = Arc::new(SqliteStore::open(&config.db_path)?);
        let diff = Arc::new(GitCli::new());
        let converter = Arc::new(OtelConverter::new(diff.clone()));
        Ok(Self::new(Arc::new(IngestOrchestrator::new(
            store, diff, converter, config,
        ))))
    }

    fn store(&self) -> &dyn TraceStore {
        self.orchestrator.store().as_ref()
    }

    // --- Write ---

    /// Refresh all evidence for a repository and summarize `commit_shas`.
    pub async fn scan(
        &self,
        repo_root: &Path,
        repo_id: i64,
        commit_shas: &[String],
        cancel: &CancellationToken,
    ) -> Result<RefreshReport, IngestError> {
        self.orchestrator
            .refresh(repo_root, repo_id, commit_shas, cancel)
            .await
    }

    /// Import one trace file from anywhere on disk.
    pub async fn import_trace_file(
        &self,
        repo_root: &Path,
        repo_id: i64,
        source: &Path,
    ) -> Result<ImportOutcome, ImportError> {
        let files = self.orchestrator.trace_files(repo_root);
        let config = self.orchestrator.config();
        files
            .ensure_dirs(&config.trace_dir, &config.generated_dir)
            .await?;
        producer::import_trace_file(
            &files,
            self.store(),
            self.redactor.as_ref(),
            repo_id,
            source,
            &config.trace_dir,
        )
        .await
    }

    // --- Read ---

    /// Ranges for one file of a commit, in insertion order.
    pub fn ranges_for_commit_file(
        &self,
        repo_id: i64,
        commit_sha: &str,
        path: &str,
    ) -> StorageResult<Vec<RangeEvidence>> {
        self.store().ranges_for_commit_file(repo_id, commit_sha, path)
    }

    /// Summary of one commit from already-ingested evidence.
    pub fn summarize_commit(
        &self,
        repo_id: i64,
        commit_sha: &str,
    ) -> StorageResult<Option<TraceSummary>> {
        aggregate::summarize_commit(self.store(), repo_id, commit_sha)
    }

    /// Share of a commit's added lines that carry attribution.
    pub async fn coverage(
        &self,
        repo_root: &Path,
        repo_id: i64,
        commit_sha: &str,
    ) -> Result<Option<AttributionCoverage>, CoverageError> {
        aggregate::attribution_coverage(
            self.store(),
            self.orchestrator.diff().as_ref(),
            repo_root,
            repo_id,
            commit_sha,
        )
        .await
    }

    pub fn collector_status(&self, repo_id: i64) -> CollectorStatus {
        self.orchestrator.collector_status(repo_id)
    }
}
