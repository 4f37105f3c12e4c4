//! Attribution record model
//!
//! One `AttributionRecord` is one evidence submission: a commit, the files it
//! touched, and per-file conversations carrying attributed line ranges.
//! Records are built once by a producer, normalized once, and never mutated
//! after persistence.

pub mod normalize;
pub mod parse;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form producer metadata.
pub type Metadata = Map<String, Value>;

/// Metadata namespace used for provenance written by this crate.
pub const METADATA_NAMESPACE: &str = "dev.narrative";

/// Attribution category of a line range.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ContributorType {
    Human,
    Ai,
    Mixed,
    #[default]
    Unknown,
}

impl ContributorType {
    /// Parse a raw producer value. Anything unrecognized is `Unknown`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "human" => Self::Human,
            "ai" => Self::Ai,
            "mixed" => Self::Mixed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Ai => "ai",
            Self::Mixed => "mixed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ContributorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who authored a span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    #[serde(rename = "type")]
    pub kind: ContributorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl Contributor {
    pub fn new(kind: ContributorType) -> Self {
        Self { kind, model_id: None }
    }

    pub fn ai(model_id: Option<String>) -> Self {
        Self {
            kind: ContributorType::Ai,
            model_id,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

/// A 1-based inclusive line span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEvidence {
    pub start_line: i64,
    pub end_line: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Range-level override; `None` inherits the conversation default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributor: Option<Contributor>,
}

impl RangeEvidence {
    pub fn new(start_line: i64, end_line: i64) -> Self {
        Self {
            start_line,
            end_line,
            content_hash: None,
            contributor: None,
        }
    }

    pub fn with_contributor(mut self, contributor: Contributor) -> Self {
        self.contributor = Some(contributor);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Lines covered by this range. Degenerate ranges count zero.
    pub fn line_count(&self) -> u64 {
        line_count(self.start_line, self.end_line)
    }

    /// The contributor that applies to this range, falling back to `default`.
    pub fn effective_contributor<'a>(
        &'a self,
        default: Option<&'a Contributor>,
    ) -> Option<&'a Contributor> {
        self.contributor.as_ref().or(default)
    }
}

/// `max(0, end - start + 1)`.
pub fn line_count(start_line: i64, end_line: i64) -> u64 {
    let span = end_line.saturating_sub(start_line).saturating_add(1);
    if span > 0 {
        span as u64
    } else {
        0
    }
}

/// Ranges produced within one conversation (agent session, chat thread).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributor: Option<Contributor>,
    pub ranges: Vec<RangeEvidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvidence {
    pub path: String,
    pub conversations: Vec<ConversationEvidence>,
}

impl FileEvidence {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            conversations: Vec::new(),
        }
    }

    pub fn with_conversation(mut self, conversation: ConversationEvidence) -> Self {
        self.conversations.push(conversation);
        self
    }
}

/// Only git revisions are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    Git,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vcs {
    #[serde(rename = "type")]
    pub kind: VcsKind,
    pub revision: String,
}

impl Vcs {
    pub fn git(revision: impl Into<String>) -> Self {
        Self {
            kind: VcsKind::Git,
            revision: revision.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One evidence submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub id: String,
    pub version: String,
    pub timestamp: String,
    pub vcs: Vcs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolInfo>,
    pub files: Vec<FileEvidence>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
}

impl AttributionRecord {
    pub fn new(
        id: impl Into<String>,
        timestamp: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version: "0.1.0".to_string(),
            timestamp: timestamp.into(),
            vcs: Vcs::git(revision),
            tool: None,
            files: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, version: Option<String>) -> Self {
        self.tool = Some(ToolInfo {
            name: Some(name.into()),
            version,
        });
        self
    }

    pub fn with_file(mut self, file: FileEvidence) -> Self {
        self.files.push(file);
        self
    }

    pub fn revision(&self) -> &str {
        &self.vcs.revision
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.tool.as_ref().and_then(|t| t.name.as_deref())
    }

    /// Shallow merge: top-level keys of `extra` replace existing ones.
    pub fn merge_metadata(&mut self, extra: Metadata) {
        for (key, value) in extra {
            self.metadata.insert(key, value);
        }
    }

    /// `false` for placeholder evidence that declares
    /// `"groundTruth": false` under the metadata namespace.
    pub fn is_ground_truth(&self) -> bool {
        self.metadata
            .get(METADATA_NAMESPACE)
            .and_then(|ns| ns.get("groundTruth"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }

    /// File name for persisting this record as a trace file:
    /// `{timestamp with ':' and '.' as '-'}_{id}.agent-trace.json`.
    pub fn trace_file_name(&self) -> String {
        format!(
            "{}_{}{}",
            self.timestamp.replace([':', '.'], "-"),
            self.id,
            TRACE_EXTENSION
        )
    }

    pub fn range_count(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| f.conversations.iter())
            .map(|c| c.ranges.len())
            .sum()
    }
}

/// Suffix shared by all trace files.
pub const TRACE_EXTENSION: &str = ".agent-trace.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_count_is_inclusive() {
        assert_eq!(line_count(10, 20), 11);
        assert_eq!(line_count(21, 21), 1);
    }

    #[test]
    fn degenerate_range_counts_zero() {
        assert_eq!(line_count(20, 10), 0);
        assert_eq!(RangeEvidence::new(5, 4).line_count(), 0);
        assert_eq!(line_count(i64::MAX, i64::MIN), 0);
    }

    #[test]
    fn contributor_type_parses_case_insensitively() {
        assert_eq!(ContributorType::from_raw("AI"), ContributorType::Ai);
        assert_eq!(ContributorType::from_raw(" human "), ContributorType::Human);
        assert_eq!(ContributorType::from_raw("mixed"), ContributorType::Mixed);
        assert_eq!(ContributorType::from_raw("robot"), ContributorType::Unknown);
        assert_eq!(ContributorType::from_raw(""), ContributorType::Unknown);
    }

    #[test]
    fn range_override_wins_over_conversation_default() {
        let default = Contributor::new(ContributorType::Human);
        let plain = RangeEvidence::new(1, 2);
        let overridden = RangeEvidence::new(1, 2).with_contributor(Contributor::ai(None));

        assert_eq!(
            plain.effective_contributor(Some(&default)).map(|c| c.kind),
            Some(ContributorType::Human)
        );
        assert_eq!(
            overridden.effective_contributor(Some(&default)).map(|c| c.kind),
            Some(ContributorType::Ai)
        );
        assert!(plain.effective_contributor(None).is_none());
    }

    #[test]
    fn trace_file_name_replaces_colons_and_dots() {
        let record = AttributionRecord::new("rec-1", "2024-05-01T10:20:30.123Z", "abc");
        assert_eq!(
            record.trace_file_name(),
            "2024-05-01T10-20-30-123Z_rec-1.agent-trace.json"
        );
    }

    #[test]
    fn ground_truth_unless_marked_otherwise() {
        let mut record = AttributionRecord::new("rec-1", "t", "abc");
        assert!(record.is_ground_truth());
        record
            .metadata
            .insert(METADATA_NAMESPACE.into(), serde_json::json!({"groundTruth": false}));
        assert!(!record.is_ground_truth());
    }

    #[test]
    fn metadata_merge_is_shallow() {
        let mut record = AttributionRecord::new("rec-1", "t", "abc");
        record
            .metadata
            .insert("a".into(), serde_json::json!({"nested": 1, "keep": true}));
        record.metadata.insert("b".into(), serde_json::json!(1));

        let mut extra = Metadata::new();
        extra.insert("a".into(), serde_json::json!({"nested": 2}));
        record.merge_metadata(extra);

        assert_eq!(record.metadata["a"], serde_json::json!({"nested": 2}));
        assert_eq!(record.metadata["b"], serde_json::json!(1));
    }

    #[test]
    fn serializes_in_underscore_convention() {
        let record = AttributionRecord::new("rec-1", "t", "abc").with_file(
            FileEvidence::new("src/lib.rs").with_conversation(ConversationEvidence {
                url: None,
                contributor: Some(Contributor::ai(Some("gpt-5".into()))),
                ranges: vec![RangeEvidence::new(1, 3)],
            }),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["vcs"]["type"], "git");
        assert_eq!(json["files"][0]["conversations"][0]["contributor"]["model_id"], "gpt-5");
        assert_eq!(json["files"][0]["conversations"][0]["ranges"][0]["start_line"], 1);
        assert!(json.get("metadata").is_none());
    }
}
