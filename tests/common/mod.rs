//! Common test utilities for Tracewise scenario tests
//!
//! Provides throwaway repositories wired to a real SQLite store and a fixed
//! diff table, plus builders for trace files in both naming conventions.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracewise::ingest::IngestOrchestrator;
use tracewise::producer::{DiffSource, FsTraceFiles, OtelConverter, StaticDiff, TraceFiles};
use tracewise::storage::{OpenStore, SqliteStore, TraceStore};
use tracewise::{CancellationToken, RefreshReport, TraceApi, TraceConfig};

pub const REPO_ID: i64 = 1;

/// A temporary repository with its own database.
pub struct TestRepo {
    pub dir: TempDir,
    pub api: TraceApi,
    pub config: TraceConfig,
}

impl TestRepo {
    pub fn new(diff: StaticDiff) -> Self {
        Self::with_config(diff, |_| {})
    }

    pub fn with_config(diff: StaticDiff, tweak: impl FnOnce(&mut TraceConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = TraceConfig {
            db_path: dir.path().join("db").join("tracewise.db"),
            ..TraceConfig::default()
        };
        tweak(&mut config);
        let api = build_api(&config, diff);
        Self { dir, api, config }
    }

    /// A second API over the same database, as after a restart.
    pub fn reopen(&self, diff: StaticDiff) -> TraceApi {
        build_api(&self.config, diff)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn files(&self) -> FsTraceFiles {
        FsTraceFiles::new(self.config.evidence_root(self.root()), self.config.max_trace_bytes)
    }

    pub async fn write_evidence(&self, relative: &str, body: &str) {
        self.files()
            .write_text(relative, body)
            .await
            .expect("write evidence");
    }

    /// Write a file outside the evidence directory (for imports).
    pub fn write_outside(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root().join(name);
        std::fs::write(&path, body).expect("write file");
        path
    }

    pub async fn scan(&self, commits: &[&str]) -> RefreshReport {
        self.api
            .scan(self.root(), REPO_ID, &shas(commits), &CancellationToken::new())
            .await
            .expect("scan")
    }
}

fn build_api(config: &TraceConfig, diff: StaticDiff) -> TraceApi {
    let store: Arc<dyn TraceStore> =
        Arc::new(SqliteStore::open(&config.db_path).expect("open store"));
    let diff: Arc<dyn DiffSource> = Arc::new(diff);
    let converter = Arc::new(OtelConverter::new(diff.clone()));
    TraceApi::new(Arc::new(IngestOrchestrator::new(
        store,
        diff,
        converter,
        config.clone(),
    )))
}

pub fn shas(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// A range as `(start, end, contributor type)`.
pub type Span<'a> = (i64, i64, &'a str);

/// Trace file in the underscore convention, one file, one conversation,
/// each range carrying its own contributor.
pub fn snake_trace(id: &str, sha: &str, path: &str, spans: &[Span]) -> String {
    let ranges: Vec<Value> = spans
        .iter()
        .map(|(start, end, kind)| {
            json!({"start_line": start, "end_line": end, "contributor_type": kind})
        })
        .collect();
    json!({
        "id": id,
        "version": "0.1.0",
        "timestamp": "2024-05-01T10:00:00Z",
        "vcs_type": "git",
        "vcs_revision": sha,
        "tool_name": "claude-code",
        "files": [{"path": path, "conversations": [{"ranges": ranges}]}]
    })
    .to_string()
}

/// The same payload in the camelCase convention.
pub fn camel_trace(id: &str, sha: &str, path: &str, spans: &[Span]) -> String {
    let ranges: Vec<Value> = spans
        .iter()
        .map(|(start, end, kind)| {
            json!({"startLine": start, "endLine": end, "contributorType": kind})
        })
        .collect();
    json!({
        "id": id,
        "version": "0.1.0",
        "timestamp": "2024-05-01T10:00:00Z",
        "vcsType": "git",
        "vcsRevision": sha,
        "toolName": "claude-code",
        "files": [{"path": path, "conversations": [{"ranges": ranges}]}]
    })
    .to_string()
}

/// One telemetry log line.
pub fn otel_line(timestamp: &str, attributes: Value) -> String {
    json!({"timestamp": timestamp, "attributes": attributes}).to_string()
}
