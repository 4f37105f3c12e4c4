//! Manual trace-file import
//!
//! A user hands over a trace file from anywhere on disk. It is scrubbed,
//! validated, stamped with import provenance, written into the evidence
//! directory in canonical form, then ingested. Telemetry-derived records go
//! through `write_record` as well, so every stored trace file looks the same.

use super::files::TraceFiles;
use super::redact::Redactor;
use super::ProducerError;
use crate::record::parse::{validate_record, RecordRejection};
use crate::record::{AttributionRecord, Metadata, METADATA_NAMESPACE};
use crate::storage::{StorageError, TraceStore};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid trace file: {0}")]
    Rejected(#[from] RecordRejection),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a successful import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub record_id: String,
    /// Path relative to the evidence root.
    pub stored_path: String,
    pub redactions: usize,
}

/// Serialize `record` into `dir` under its canonical file name.
///
/// Returns the evidence-root-relative path written.
pub async fn write_record(
    files: &dyn TraceFiles,
    dir: &str,
    record: &AttributionRecord,
) -> Result<String, ProducerError> {
    let path = format!("{}/{}", dir.trim_end_matches('/'), record.trace_file_name());
    let body = serde_json::to_string_pretty(record)?;
    files.write_text(&path, &body).await?;
    Ok(path)
}

/// Merge `entries` into the record's `dev.narrative` metadata object.
pub fn stamp_provenance(record: &mut AttributionRecord, entries: Metadata) {
    let mut namespace = match record.metadata.remove(METADATA_NAMESPACE) {
        Some(Value::Object(existing)) => existing,
        _ => Metadata::new(),
    };
    namespace.extend(entries);
    let mut extra = Metadata::new();
    extra.insert(METADATA_NAMESPACE.to_string(), Value::Object(namespace));
    record.merge_metadata(extra);
}

/// Import one trace file from an arbitrary location.
pub async fn import_trace_file(
    files: &dyn TraceFiles,
    store: &dyn TraceStore,
    redactor: &dyn Redactor,
    repo_id: i64,
    source: &Path,
    trace_dir: &str,
) -> Result<ImportOutcome, ImportError> {
    let raw = tokio::fs::read_to_string(source)
        .await
        .map_err(|e| ImportError::Io {
            path: source.display().to_string(),
            source: e,
        })?;

    let (scrubbed, redactions) = redactor.redact(&raw);
    let mut record = validate_record(&scrubbed)?;

    let mut provenance = Metadata::new();
    provenance.insert(
        "importedFrom".to_string(),
        Value::String(source.display().to_string()),
    );
    provenance.insert("redactions".to_string(), Value::from(redactions));
    stamp_provenance(&mut record, provenance);

    let stored_path = write_record(files, trace_dir, &record).await?;
    store.ingest_record(repo_id, &record)?;

    info!(record = %record.id, path = %stored_path, redactions, "imported trace file");

    Ok(ImportOutcome {
        record_id: record.id,
        stored_path,
        redactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{FsTraceFiles, SecretRedactor};
    use crate::storage::{OpenStore, SqliteStore};

    const TRACE: &str = r#"{
        "id": "manual-1",
        "version": "0.1.0",
        "timestamp": "2024-05-01T10:00:00.123Z",
        "vcs": {"type": "git", "revision": "abc"},
        "files": [{
            "path": "src/lib.rs",
            "conversations": [{
                "url": "https://chat.example/sk-abcdefghijklmnopqrstuvwx",
                "contributor": {"type": "ai", "modelId": "gpt-5"},
                "ranges": [{"startLine": 1, "endLine": 4}]
            }]
        }],
        "metadata": {"dev.narrative": {"note": "kept"}}
    }"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        source: std::path::PathBuf,
        files: FsTraceFiles,
        store: SqliteStore,
    }

    fn fixture(body: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("incoming.json");
        std::fs::write(&source, body).unwrap();
        Fixture {
            files: FsTraceFiles::new(dir.path().join(".narrative"), 1 << 20),
            store: SqliteStore::open_in_memory().unwrap(),
            source,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn import_writes_canonical_file_and_ingests() {
        let fx = fixture(TRACE);
        let outcome = import_trace_file(&fx.files, &fx.store, &SecretRedactor, 1, &fx.source, "trace")
            .await
            .unwrap();

        assert_eq!(outcome.record_id, "manual-1");
        assert_eq!(
            outcome.stored_path,
            "trace/2024-05-01T10-00-00-123Z_manual-1.agent-trace.json"
        );
        assert_eq!(outcome.redactions, 1);
        assert!(fx.store.has_record("manual-1").unwrap());

        let stored = fx.files.read_text(&outcome.stored_path).await.unwrap();
        assert!(stored.contains("\"start_line\""));
        assert!(stored.contains("\"model_id\""));
        assert!(stored.contains("[REDACTED]"));

        let reparsed = validate_record(&stored).unwrap();
        let ns = reparsed.metadata[METADATA_NAMESPACE].as_object().unwrap();
        assert_eq!(ns["note"], "kept");
        assert_eq!(ns["redactions"], 1);
        assert!(ns["importedFrom"].as_str().unwrap().ends_with("incoming.json"));
    }

    // === Scenario: non-git trace file is refused ===
    #[tokio::test]
    async fn import_rejects_svn() {
        let fx = fixture(&TRACE.replace("\"git\"", "\"svn\""));
        let err = import_trace_file(&fx.files, &fx.store, &SecretRedactor, 1, &fx.source, "trace")
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Rejected(RecordRejection::UnsupportedVcs(_))));
        assert!(!fx.store.has_record("manual-1").unwrap());
        assert!(fx.files.list_files("trace").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_source_is_an_io_error() {
        let fx = fixture(TRACE);
        let err = import_trace_file(
            &fx.files,
            &fx.store,
            &SecretRedactor,
            1,
            Path::new("/nonexistent/trace.json"),
            "trace",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::Io { .. }));
    }
}
