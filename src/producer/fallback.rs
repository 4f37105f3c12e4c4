//! Diff-derived fallback records
//!
//! When a commit has no evidence at all, its added lines can be recorded as
//! `ai` so the timeline is not blank. This is a derivation, not ground
//! truth, and the record's metadata says so.

use super::diff::DiffSource;
use super::ProducerError;
use crate::record::{
    AttributionRecord, Contributor, ContributorType, ConversationEvidence, FileEvidence,
    RangeEvidence, METADATA_NAMESPACE,
};
use serde_json::{json, Map};
use std::path::Path;
use uuid::Uuid;

pub const FALLBACK_TOOL: &str = "diff-fallback";

/// Stable record id for a commit's fallback record.
pub fn fallback_record_id(commit_sha: &str) -> String {
    format!(
        "diff-{}",
        Uuid::new_v5(&Uuid::NAMESPACE_OID, commit_sha.as_bytes())
    )
}

/// Build the fallback record for a commit, or `None` if it added no lines.
pub async fn derive_fallback_record(
    diff: &dyn DiffSource,
    repo_root: &Path,
    commit_sha: &str,
) -> Result<Option<AttributionRecord>, ProducerError> {
    let added = diff.added_lines(repo_root, commit_sha).await?;
    let contributor = Contributor::new(ContributorType::Ai);

    let files: Vec<FileEvidence> = added
        .into_iter()
        .filter(|(_, spans)| !spans.is_empty())
        .map(|(path, spans)| {
            FileEvidence::new(path).with_conversation(ConversationEvidence {
                url: None,
                contributor: Some(contributor.clone()),
                ranges: spans
                    .into_iter()
                    .map(|(start, end)| RangeEvidence::new(start, end))
                    .collect(),
            })
        })
        .collect();

    if files.is_empty() {
        return Ok(None);
    }

    let mut record = AttributionRecord::new(
        fallback_record_id(commit_sha),
        chrono::Utc::now().to_rfc3339(),
        commit_sha,
    )
    .with_tool(FALLBACK_TOOL, None);
    record.files = files;

    let mut provenance = Map::new();
    provenance.insert(
        METADATA_NAMESPACE.to_string(),
        json!({
            "derived": true,
            "source": FALLBACK_TOOL,
            "groundTruth": false,
        }),
    );
    record.merge_metadata(provenance);

    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::StaticDiff;

    #[tokio::test]
    async fn derives_ai_ranges_labelled_as_derived() {
        let diff = StaticDiff::new()
            .with_file("abc", "a.rs", vec![(1, 3)])
            .with_file("abc", "b.rs", vec![]);
        let record = derive_fallback_record(&diff, Path::new("."), "abc")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.id, fallback_record_id("abc"));
        assert!(record.id.starts_with("diff-"));
        assert_eq!(record.files.len(), 1);
        assert_eq!(record.range_count(), 1);
        let ns = &record.metadata[METADATA_NAMESPACE];
        assert_eq!(ns["groundTruth"], false);
        assert_eq!(ns["derived"], true);
    }

    #[test]
    fn ids_are_stable_per_commit() {
        assert_eq!(fallback_record_id("abc"), fallback_record_id("abc"));
        assert_ne!(fallback_record_id("abc"), fallback_record_id("def"));
    }

    #[tokio::test]
    async fn nothing_added_yields_none() {
        let diff = StaticDiff::new();
        assert!(derive_fallback_record(&diff, Path::new("."), "abc")
            .await
            .unwrap()
            .is_none());
    }
}
