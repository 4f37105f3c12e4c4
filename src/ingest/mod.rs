//! Refresh orchestration
//!
//! One refresh pass for a repository:
//! 1. ingest every trace file under the trace directory
//! 2. convert the telemetry event log, store and ingest the results
//! 3. optionally derive fallback records for commits with no evidence
//! 4. aggregate the requested commits
//!
//! A bad evidence file or a failed producer never aborts the pass; they end
//! up in `RefreshReport::errors` or the collector status. Only an
//! unreachable store during aggregation is a hard failure. Refreshes for the
//! same repository run one at a time.

mod cancel;
mod status;

pub use cancel::CancellationToken;
pub use status::{CollectorState, CollectorStatus};

use crate::aggregate::{summarize_commits, ScanSummary};
use crate::config::TraceConfig;
use crate::producer::manual::write_record;
use crate::producer::telemetry::parse_event_log;
use crate::producer::{
    derive_fallback_record, DiffSource, FsTraceFiles, ProducerError, TelemetryConverter,
    TraceFiles,
};
use crate::record::parse::validate_record;
use crate::record::AttributionRecord;
use crate::storage::{IngestOutcome, StorageError, TraceStore};
use dashmap::DashMap;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("refresh cancelled")]
    Cancelled,
}

/// Evidence counts for one refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    /// Records newly written.
    pub ingested: usize,
    /// Records already present.
    pub skipped: usize,
    /// Files that could not be read or were not valid records.
    pub rejected: usize,
}

impl IngestStats {
    fn count(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Written => self.ingested += 1,
            IngestOutcome::AlreadyIngested => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    #[serde(flatten)]
    pub summary: ScanSummary,
    pub ingest: IngestStats,
    pub collector: CollectorStatus,
    /// Per-item storage and producer failures.
    pub errors: Vec<String>,
}

/// Drives refresh passes and remembers each repository's collector status.
pub struct IngestOrchestrator {
    store: Arc<dyn TraceStore>,
    diff: Arc<dyn DiffSource>,
    converter: Arc<dyn TelemetryConverter>,
    config: TraceConfig,
    flights: DashMap<i64, Arc<Mutex<()>>>,
    statuses: DashMap<i64, CollectorStatus>,
}

impl IngestOrchestrator {
    pub fn new(
        store: Arc<dyn TraceStore>,
        diff: Arc<dyn DiffSource>,
        converter: Arc<dyn TelemetryConverter>,
        config: TraceConfig,
    ) -> Self {
        Self {
            store,
            diff,
            converter,
            config,
            flights: DashMap::new(),
            statuses: DashMap::new(),
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }

    pub fn diff(&self) -> &Arc<dyn DiffSource> {
        &self.diff
    }

    /// Evidence directory accessor for a repository.
    pub fn trace_files(&self, repo_root: &Path) -> FsTraceFiles {
        FsTraceFiles::new(
            self.config.evidence_root(repo_root),
            self.config.max_trace_bytes,
        )
    }

    /// Last collector status computed for a repository.
    pub fn collector_status(&self, repo_id: i64) -> CollectorStatus {
        self.statuses
            .get(&repo_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Refresh a repository using its on-disk evidence directory.
    pub async fn refresh(
        &self,
        repo_root: &Path,
        repo_id: i64,
        commit_shas: &[String],
        cancel: &CancellationToken,
    ) -> Result<RefreshReport, IngestError> {
        let files = self.trace_files(repo_root);
        self.refresh_with(&files, repo_root, repo_id, commit_shas, cancel)
            .await
    }

    /// Refresh with an explicit evidence accessor.
    pub async fn refresh_with(
        &self,
        files: &dyn TraceFiles,
        repo_root: &Path,
        repo_id: i64,
        commit_shas: &[String],
        cancel: &CancellationToken,
    ) -> Result<RefreshReport, IngestError> {
        let flight = self.flights.entry(repo_id).or_default().clone();
        let _guard = flight.lock().await;

        let mut report = RefreshReport::default();

        self.ingest_trace_files(files, repo_id, &mut report, cancel)
            .await?;

        let collector = self
            .ingest_telemetry(files, repo_root, repo_id, &mut report, cancel)
            .await?;
        self.statuses.insert(repo_id, collector.clone());
        report.collector = collector;

        if self.config.diff_fallback {
            self.ingest_fallbacks(files, repo_root, repo_id, commit_shas, &mut report, cancel)
                .await?;
        }

        report.summary = summarize_commits(
            self.store.as_ref(),
            repo_id,
            commit_shas,
            self.config.yield_every,
            cancel,
        )
        .await?
        .ok_or(IngestError::Cancelled)?;

        info!(
            repo_id,
            commits = report.summary.by_commit.len(),
            ingested = report.ingest.ingested,
            skipped = report.ingest.skipped,
            rejected = report.ingest.rejected,
            errors = report.errors.len(),
            "refresh complete"
        );
        Ok(report)
    }

    async fn ingest_trace_files(
        &self,
        files: &dyn TraceFiles,
        repo_id: i64,
        report: &mut RefreshReport,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let paths = match files.list_files(&self.config.trace_dir).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "cannot list trace files");
                report.errors.push(format!("{}: {e}", self.config.trace_dir));
                return Ok(());
            }
        };

        for path in paths.iter().filter(|p| p.ends_with(".json")) {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let text = match files.read_text(path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping unreadable trace file");
                    report.ingest.rejected += 1;
                    continue;
                }
            };
            let record = match validate_record(&text) {
                Ok(record) => record,
                Err(reason) => {
                    debug!(path = %path, %reason, "skipping invalid trace file");
                    report.ingest.rejected += 1;
                    continue;
                }
            };
            self.ingest_one(repo_id, &record, path, report);
        }
        Ok(())
    }

    fn ingest_one(
        &self,
        repo_id: i64,
        record: &AttributionRecord,
        origin: &str,
        report: &mut RefreshReport,
    ) -> bool {
        match self.store.ingest_record(repo_id, record) {
            Ok(outcome) => {
                report.ingest.count(outcome);
                true
            }
            Err(e) => {
                warn!(record = %record.id, origin, error = %e, "ingest failed");
                report.errors.push(format!("{origin}: {e}"));
                false
            }
        }
    }

    async fn ingest_telemetry(
        &self,
        files: &dyn TraceFiles,
        repo_root: &Path,
        repo_id: i64,
        report: &mut RefreshReport,
        cancel: &CancellationToken,
    ) -> Result<CollectorStatus, IngestError> {
        let Some(log) = &self.config.telemetry_log else {
            return Ok(CollectorStatus::inactive("telemetry collection disabled"));
        };

        let text = match files.read_text(log).await {
            Ok(text) => text,
            Err(e) if e.is_not_found() => {
                return Ok(CollectorStatus::inactive("no telemetry log"));
            }
            Err(e) => {
                warn!(log = %log, error = %e, "cannot read telemetry log");
                return Ok(CollectorStatus::error(format!("cannot read telemetry log: {e}")));
            }
        };

        let (events, unreadable) = parse_event_log(&text);
        if events.is_empty() {
            if unreadable > 0 {
                return Ok(CollectorStatus::error(format!(
                    "telemetry log has {unreadable} unreadable line(s) and no events"
                )));
            }
            return Ok(CollectorStatus::inactive("no telemetry events"));
        }

        let output = self.converter.convert(repo_root, &events).await;
        let mut written = 0;
        let mut failures = Vec::new();

        for record in &output.records {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let stored = match write_record(files, &self.config.trace_dir, record).await {
                Ok(path) => path,
                Err(e) => {
                    warn!(record = %record.id, error = %e, "cannot write telemetry record");
                    failures.push(format!("{}: {e}", record.revision()));
                    continue;
                }
            };
            if self.ingest_one(repo_id, record, &stored, report) {
                written += 1;
            } else {
                failures.push(format!("{}: ingest failed", record.revision()));
            }
        }

        Ok(CollectorStatus::from_conversion(
            written,
            &output.errors,
            failures,
        ))
    }

    async fn ingest_fallbacks(
        &self,
        files: &dyn TraceFiles,
        repo_root: &Path,
        repo_id: i64,
        commit_shas: &[String],
        report: &mut RefreshReport,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        for sha in commit_shas {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            match self.store.ranges_for_commit(repo_id, sha) {
                Ok(rows) if !rows.is_empty() => continue,
                Ok(_) => {}
                Err(e) => {
                    report.errors.push(format!("{sha}: {e}"));
                    continue;
                }
            }

            let record = match derive_fallback_record(self.diff.as_ref(), repo_root, sha).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    self.fallback_failed(sha, e, report);
                    continue;
                }
            };
            match write_record(files, &self.config.generated_dir, &record).await {
                Ok(path) => {
                    self.ingest_one(repo_id, &record, &path, report);
                }
                Err(e) => self.fallback_failed(sha, e, report),
            }
        }
        Ok(())
    }

    fn fallback_failed(&self, sha: &str, error: ProducerError, report: &mut RefreshReport) {
        warn!(commit = sha, error = %error, "diff fallback failed");
        report.errors.push(format!("{sha}: diff fallback: {error}"));
    }
}
