//! Schema normalization for producer payloads
//!
//! Producer versions disagree on key naming: the same logical field arrives
//! as `startLine` or `start_line`, `modelId` or `model_id`. Every field is
//! resolved with one precedence rule:
//!
//! 1. the camel-cased key, if present and not `null`
//! 2. the underscore key, if present and not `null`
//! 3. the documented default
//!
//! | Field            | Default            |
//! |------------------|--------------------|
//! | contributor type | `unknown`          |
//! | model id         | absent             |
//! | tool names list  | empty              |
//! | start line       | `1`                |
//! | end line         | start line         |
//! | content hash     | absent             |
//!
//! Nothing here fails. Identity checks (record id, revision) belong to the
//! parser, which rejects the whole record instead of normalizing partial data.

use super::{
    Contributor, ContributorType, ConversationEvidence, FileEvidence, RangeEvidence, ToolInfo,
};
use serde_json::{Map, Value};

pub type Object = Map<String, Value>;

const DEFAULT_START_LINE: i64 = 1;

/// Resolve a field under either naming convention. `null` counts as absent.
pub fn pick<'a>(obj: &'a Object, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel)
        .filter(|v| !v.is_null())
        .or_else(|| obj.get(snake).filter(|v| !v.is_null()))
}

/// Resolve a non-empty string field.
pub fn pick_str(obj: &Object, camel: &str, snake: &str) -> Option<String> {
    pick(obj, camel, snake).and_then(non_empty_str)
}

/// Resolve a line number. Integral floats and numeric strings are accepted.
pub fn pick_line(obj: &Object, camel: &str, snake: &str) -> Option<i64> {
    pick(obj, camel, snake).and_then(as_line)
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn as_line(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn objects(value: Option<&Value>) -> impl Iterator<Item = &Object> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// Normalize a contributor given either as an object or a bare type string.
pub fn normalize_contributor(value: &Value) -> Contributor {
    match value {
        Value::String(kind) => Contributor::new(ContributorType::from_raw(kind)),
        Value::Object(obj) => Contributor {
            kind: obj
                .get("type")
                .filter(|v| !v.is_null())
                .or_else(|| pick(obj, "contributorType", "contributor_type"))
                .and_then(Value::as_str)
                .map(ContributorType::from_raw)
                .unwrap_or_default(),
            model_id: pick_str(obj, "modelId", "model_id"),
        },
        _ => Contributor::default(),
    }
}

/// Contributor carried by a range or conversation, either nested under
/// `contributor` or flattened as `contributorType` / `modelId`.
fn contributor_of(obj: &Object) -> Option<Contributor> {
    if let Some(nested) = obj.get("contributor").filter(|v| !v.is_null()) {
        return Some(normalize_contributor(nested));
    }
    pick(obj, "contributorType", "contributor_type").map(|kind| Contributor {
        kind: kind
            .as_str()
            .map(ContributorType::from_raw)
            .unwrap_or_default(),
        model_id: pick_str(obj, "modelId", "model_id"),
    })
}

pub fn normalize_range(obj: &Object) -> RangeEvidence {
    // Lines are 1-based; anything below is pulled up to the first line.
    let start_line = pick_line(obj, "startLine", "start_line")
        .unwrap_or(DEFAULT_START_LINE)
        .max(1);
    let end_line = pick_line(obj, "endLine", "end_line").unwrap_or(start_line);
    RangeEvidence {
        start_line,
        end_line,
        content_hash: pick_str(obj, "contentHash", "content_hash"),
        contributor: contributor_of(obj),
    }
}

pub fn normalize_conversation(obj: &Object) -> ConversationEvidence {
    ConversationEvidence {
        url: obj.get("url").and_then(non_empty_str),
        contributor: contributor_of(obj),
        ranges: objects(obj.get("ranges")).map(normalize_range).collect(),
    }
}

/// `None` when the entry lacks a non-empty path.
pub fn normalize_file(obj: &Object) -> Option<FileEvidence> {
    let path = obj.get("path").and_then(non_empty_str)?;
    Some(FileEvidence {
        path,
        conversations: objects(obj.get("conversations"))
            .map(normalize_conversation)
            .collect(),
    })
}

/// Tool names listed by the producer (`toolNames` / `tool_names`).
pub fn normalize_tool_names(obj: &Object) -> Vec<String> {
    pick(obj, "toolNames", "tool_names")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(non_empty_str).collect())
        .unwrap_or_default()
}

/// Resolve the producing tool from `tool` (object or string), then
/// `toolName`, then the first entry of the tool names list.
pub fn normalize_tool(obj: &Object) -> Option<ToolInfo> {
    let tool = match obj.get("tool") {
        Some(Value::Object(tool)) => ToolInfo {
            name: tool.get("name").and_then(non_empty_str),
            version: tool.get("version").and_then(non_empty_str),
        },
        Some(name @ Value::String(_)) => ToolInfo {
            name: non_empty_str(name),
            version: None,
        },
        _ => ToolInfo {
            name: pick_str(obj, "toolName", "tool_name")
                .or_else(|| normalize_tool_names(obj).into_iter().next()),
            version: pick_str(obj, "toolVersion", "tool_version"),
        },
    };
    (tool.name.is_some() || tool.version.is_some()).then_some(tool)
}
