//! Telemetry event log → attribution records
//!
//! A coding agent's telemetry exporter appends one JSON object per line to
//! the event log: `{"timestamp": "...", "attributes": {...}}`. Events are
//! grouped by the commit they name, and each group becomes one derived
//! record covering the lines that commit added. Record ids are derived from
//! the commit and the first event timestamp in the group (or, when no event
//! has one, a hash of the events' attributes), so converting the same log
//! twice yields the same ids.

use super::diff::DiffSource;
use crate::record::{
    AttributionRecord, Contributor, ContributorType, ConversationEvidence, FileEvidence,
    RangeEvidence, METADATA_NAMESPACE,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const COMMIT_KEYS: &[&str] = &[
    "commit_sha",
    "commitSha",
    "git.commit",
    "git.commit.id",
    "git.commit.sha",
    "git.commit_hash",
    "git.revision",
    "git.rev",
    "git.sha",
    "revision",
    "vcs.commit",
    "vcs.commit.id",
    "vcs.commit.sha",
    "vcs.revision",
];
const MODEL_KEYS: &[&str] = &["model", "model_id", "codex.model", "openai.model"];
const CONVERSATION_KEYS: &[&str] = &["conversation_id", "codex.conversation_id", "conversation.id"];
/// Record timestamp used when no event in a group has one.
const UNTIMED_TIMESTAMP: &str = "1970-01-01T00:00:00Z";
const TOOL_VERSION_KEYS: &[&str] = &["app.version", "codex.version"];
const FILE_KEYS: &[&str] = &["file", "file_path", "path", "files", "file_paths"];

const TOOL_NAME: &str = "codex";
const SOURCE: &str = "otlp-log";

/// One telemetry event. Every attribute value is flattened to strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub timestamp: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl TelemetryEvent {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    /// First value of the first key present.
    fn pick_first(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|key| self.attributes.get(*key))
            .find_map(|values| values.first().cloned())
    }
}

/// Parse a JSON-lines event log. Blank lines are ignored; lines that are not
/// event objects are counted and skipped.
pub fn parse_event_log(text: &str) -> (Vec<TelemetryEvent>, usize) {
    let mut events = Vec::new();
    let mut bad = 0;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line).ok().as_ref().and_then(event_from_json) {
            Some(event) => events.push(event),
            None => {
                debug!(line, "skipping unreadable telemetry line");
                bad += 1;
            }
        }
    }

    (events, bad)
}

fn event_from_json(value: &Value) -> Option<TelemetryEvent> {
    let obj = value.as_object()?;
    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let attributes = match obj.get("attributes") {
        Some(Value::Object(attrs)) => attrs
            .iter()
            .map(|(k, v)| (k.clone(), value_strings(v)))
            .filter(|(_, v)| !v.is_empty())
            .collect(),
        None | Some(Value::Null) => HashMap::new(),
        Some(_) => return None,
    };
    Some(TelemetryEvent {
        timestamp,
        attributes,
    })
}

fn value_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Array(items) => items.iter().flat_map(value_strings).collect(),
        Value::Null | Value::Object(_) => Vec::new(),
    }
}

/// Kind of conversion problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionIssue {
    /// Events had no commit and were attributed to HEAD. Informational.
    HeadFallback,
    /// Events had no commit and HEAD is unknown; they were dropped.
    MissingCommit,
    /// A commit's record could not be built.
    Build,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    pub commit_sha: Option<String>,
    pub message: String,
    pub kind: ConversionIssue,
}

impl ConversionError {
    pub fn is_actionable(&self) -> bool {
        self.kind != ConversionIssue::HeadFallback
    }
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.commit_sha {
            Some(sha) => write!(f, "{sha}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversionOutput {
    pub records: Vec<AttributionRecord>,
    pub errors: Vec<ConversionError>,
}

/// Turns raw telemetry events into records.
#[async_trait]
pub trait TelemetryConverter: Send + Sync {
    async fn convert(&self, repo_root: &Path, events: &[TelemetryEvent]) -> ConversionOutput;
}

/// Converter for agent OpenTelemetry log events.
pub struct OtelConverter {
    diff: Arc<dyn DiffSource>,
}

impl OtelConverter {
    pub fn new(diff: Arc<dyn DiffSource>) -> Self {
        Self { diff }
    }

    async fn build_record(
        &self,
        repo_root: &Path,
        commit_sha: &str,
        events: &[&TelemetryEvent],
    ) -> Result<AttributionRecord, String> {
        let model_id = events.iter().find_map(|e| e.pick_first(MODEL_KEYS));
        let conversation_id = events.iter().find_map(|e| e.pick_first(CONVERSATION_KEYS));
        let tool_version = events.iter().find_map(|e| e.pick_first(TOOL_VERSION_KEYS));
        let hints = collect_file_hints(events);

        let contributor = match &model_id {
            Some(model) => Contributor::ai(Some(model.clone())),
            None => Contributor::new(ContributorType::Unknown),
        };

        let changed = self
            .diff
            .commit_files(repo_root, commit_sha)
            .await
            .map_err(|e| e.to_string())?;
        let added = self
            .diff
            .added_lines(repo_root, commit_sha)
            .await
            .map_err(|e| e.to_string())?;

        let hint_set: HashSet<&str> = hints.iter().map(String::as_str).collect();
        let mut files: Vec<FileEvidence> = changed
            .iter()
            .filter(|path| hint_set.is_empty() || hint_set.contains(path.as_str()))
            .filter_map(|path| {
                let spans = added.get(path).filter(|s| !s.is_empty())?;
                let ranges = spans
                    .iter()
                    .map(|(start, end)| {
                        RangeEvidence::new(*start, *end).with_contributor(contributor.clone())
                    })
                    .collect();
                Some(FileEvidence::new(path.clone()).with_conversation(ConversationEvidence {
                    url: None,
                    contributor: Some(contributor.clone()),
                    ranges,
                }))
            })
            .collect();

        if files.is_empty() {
            let path = hints.first().cloned().unwrap_or_else(|| "unknown".to_string());
            files.push(FileEvidence::new(path).with_conversation(ConversationEvidence {
                url: None,
                contributor: Some(contributor.clone()),
                ranges: vec![RangeEvidence::new(1, 1).with_contributor(contributor.clone())],
            }));
        }

        let (id, timestamp) = match events.iter().find(|e| !e.timestamp.is_empty()) {
            Some(event) => (
                format!("otlp-{}-{}", commit_sha, event.timestamp.replace([':', '.'], "-")),
                event.timestamp.clone(),
            ),
            None => (
                untimed_record_id(commit_sha, events),
                UNTIMED_TIMESTAMP.to_string(),
            ),
        };

        let mut record = AttributionRecord::new(id, timestamp, commit_sha)
            .with_tool(TOOL_NAME, tool_version);
        record.files = files;

        let mut provenance = Map::new();
        provenance.insert(
            METADATA_NAMESPACE.to_string(),
            json!({
                "derived": true,
                "source": SOURCE,
                "conversationId": conversation_id,
            }),
        );
        record.merge_metadata(provenance);

        Ok(record)
    }
}

/// Id for a group whose events carry no timestamp: a UUIDv5 over the commit
/// and the events' attributes in canonical order.
fn untimed_record_id(commit_sha: &str, events: &[&TelemetryEvent]) -> String {
    let canonical: Vec<BTreeMap<&String, &Vec<String>>> = events
        .iter()
        .map(|e| e.attributes.iter().collect())
        .collect();
    let key = format!("{commit_sha}\n{}", json!(canonical));
    format!(
        "otlp-{}-{}",
        commit_sha,
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
    )
}

fn collect_file_hints(events: &[&TelemetryEvent]) -> Vec<String> {
    let mut hints: Vec<String> = Vec::new();
    for event in events {
        for key in FILE_KEYS {
            for value in event.attributes.get(*key).into_iter().flatten() {
                let value = value.trim();
                if !value.is_empty() && !hints.iter().any(|h| h == value) {
                    hints.push(value.to_string());
                }
            }
        }
    }
    hints
}

#[async_trait]
impl TelemetryConverter for OtelConverter {
    async fn convert(&self, repo_root: &Path, events: &[TelemetryEvent]) -> ConversionOutput {
        let mut output = ConversionOutput::default();
        if events.is_empty() {
            return output;
        }

        let head = match self.diff.head_commit(repo_root).await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "could not resolve HEAD for telemetry fallback");
                None
            }
        };

        let mut grouped: BTreeMap<String, Vec<&TelemetryEvent>> = BTreeMap::new();
        let mut missing = 0usize;
        for event in events {
            match event.pick_first(COMMIT_KEYS) {
                Some(sha) => grouped.entry(sha).or_default().push(event),
                None => {
                    missing += 1;
                    if let Some(head) = &head {
                        grouped.entry(head.clone()).or_default().push(event);
                    }
                }
            }
        }

        if missing > 0 {
            output.errors.push(match &head {
                Some(head) => ConversionError {
                    commit_sha: Some(head.clone()),
                    message: format!(
                        "{missing} event(s) missing commit SHA; attributed to repo HEAD {head}"
                    ),
                    kind: ConversionIssue::HeadFallback,
                },
                None => ConversionError {
                    commit_sha: None,
                    message: format!("{missing} event(s) missing commit SHA"),
                    kind: ConversionIssue::MissingCommit,
                },
            });
        }

        for (sha, commit_events) in grouped {
            match self.build_record(repo_root, &sha, &commit_events).await {
                Ok(record) => output.records.push(record),
                Err(message) => output.errors.push(ConversionError {
                    commit_sha: Some(sha),
                    message,
                    kind: ConversionIssue::Build,
                }),
            }
        }

        output
    }
}
