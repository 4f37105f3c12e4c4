//! Record validation and parsing
//!
//! Malformed evidence is an expected case: a scan can race a producer that is
//! still writing, or pick up files that are not evidence at all. Parsing is
//! therefore pure and never panics; callers get a typed rejection or `None`.

use super::normalize::{self, pick_str, Object};
use super::{AttributionRecord, Metadata, Vcs};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Top-level keys interpreted by the parser. Anything else is opaque
/// metadata.
const KNOWN_KEYS: &[&str] = &[
    "id",
    "version",
    "timestamp",
    "vcs",
    "vcsType",
    "vcs_type",
    "vcsRevision",
    "vcs_revision",
    "tool",
    "toolName",
    "tool_name",
    "toolVersion",
    "tool_version",
    "toolNames",
    "tool_names",
    "files",
    "metadata",
];

/// Why a candidate record was rejected, in check order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordRejection {
    #[error("not valid JSON: {0}")]
    Malformed(String),
    #[error("top-level value is not an object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("unsupported VCS type '{0}' (only git is accepted)")]
    UnsupportedVcs(String),
    #[error("missing VCS revision")]
    MissingRevision,
    #[error("record has no files")]
    NoFiles,
    #[error("no file entry has a non-empty path")]
    NoValidFiles,
}

/// Parse evidence text into a record, or explain why it is not one.
pub fn validate_record(text: &str) -> Result<AttributionRecord, RecordRejection> {
    let text = text.trim_start_matches('\u{feff}');
    let value: Value =
        serde_json::from_str(text).map_err(|e| RecordRejection::Malformed(e.to_string()))?;
    let obj = value.as_object().ok_or(RecordRejection::NotAnObject)?;
    validate_object(obj)
}

/// Parse evidence text, discarding the rejection reason.
pub fn parse_record(text: &str) -> Option<AttributionRecord> {
    match validate_record(text) {
        Ok(record) => Some(record),
        Err(reason) => {
            debug!(%reason, "rejected attribution record");
            None
        }
    }
}

/// Validate an already-decoded payload.
pub fn validate_object(obj: &Object) -> Result<AttributionRecord, RecordRejection> {
    let id = required_str(obj, "id")?;
    let version = required_str(obj, "version")?;
    let timestamp = required_str(obj, "timestamp")?;
    let vcs = resolve_vcs(obj)?;

    let entries = obj
        .get("files")
        .and_then(Value::as_array)
        .filter(|files| !files.is_empty())
        .ok_or(RecordRejection::NoFiles)?;

    let files: Vec<_> = entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(normalize::normalize_file)
        .collect();
    if files.is_empty() {
        return Err(RecordRejection::NoValidFiles);
    }

    Ok(AttributionRecord {
        id,
        version,
        timestamp,
        vcs,
        tool: normalize::normalize_tool(obj),
        files,
        metadata: collect_metadata(obj),
    })
}

fn required_str(obj: &Object, key: &'static str) -> Result<String, RecordRejection> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(RecordRejection::MissingField(key))
}

/// `vcs: {type, revision}` or the flat `vcsType` / `vcsRevision` form.
fn resolve_vcs(obj: &Object) -> Result<Vcs, RecordRejection> {
    let (kind, revision) = match obj.get("vcs").and_then(Value::as_object) {
        Some(vcs) => (
            vcs.get("type")
                .or_else(|| vcs.get("kind"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string()),
            vcs.get("revision")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string()),
        ),
        None => (
            pick_str(obj, "vcsType", "vcs_type"),
            pick_str(obj, "vcsRevision", "vcs_revision"),
        ),
    };

    match kind.as_deref() {
        None | Some("") => return Err(RecordRejection::MissingField("vcs.type")),
        Some(kind) if !kind.eq_ignore_ascii_case("git") => {
            return Err(RecordRejection::UnsupportedVcs(kind.to_string()))
        }
        Some(_) => {}
    }

    revision
        .filter(|r| !r.is_empty())
        .map(Vcs::git)
        .ok_or(RecordRejection::MissingRevision)
}

/// The `metadata` object plus any unrecognized top-level keys. Explicit
/// metadata keys win.
fn collect_metadata(obj: &Object) -> Metadata {
    let mut metadata: Metadata = obj
        .iter()
        .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some(explicit) = obj.get("metadata").and_then(Value::as_object) {
        for (key, value) in explicit {
            metadata.insert(key.clone(), value.clone());
        }
    }
    metadata
}
