//! How much of a commit's added lines carry attribution.

use super::round_percent;
use crate::producer::{DiffSource, ProducerError};
use crate::record::line_count;
use crate::storage::{CommitRangeRow, StorageError, TraceStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Diff(#[from] ProducerError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionCoverage {
    pub total_changed_lines: u64,
    pub attributed_lines: u64,
    pub coverage_percent: u8,
}

/// Sort and merge overlapping or adjacent inclusive ranges. Degenerate
/// ranges (`end < start`) are dropped.
pub fn merge_ranges(mut ranges: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    ranges.retain(|(start, end)| end >= start);
    ranges.sort_unstable();

    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Lines shared by two merged, sorted range lists.
fn intersection_len(a: &[(i64, i64)], b: &[(i64, i64)]) -> u64 {
    let (mut i, mut j, mut shared) = (0, 0, 0u64);
    while i < a.len() && j < b.len() {
        let start = a[i].0.max(b[j].0);
        let end = a[i].1.min(b[j].1);
        shared = shared.saturating_add(line_count(start, end));
        if a[i].1 < b[j].1 {
            i += 1;
        } else {
            j += 1;
        }
    }
    shared
}

/// Compare the lines a commit added (per file) with the attributed ranges.
///
/// Attributed lines outside the added lines are ignored; overlapping
/// attributions count once.
pub fn compute_coverage(
    changed: &BTreeMap<String, Vec<(i64, i64)>>,
    attributed: &[CommitRangeRow],
) -> AttributionCoverage {
    let mut by_file: BTreeMap<&str, Vec<(i64, i64)>> = BTreeMap::new();
    for row in attributed {
        by_file
            .entry(row.path.as_str())
            .or_default()
            .push((row.start_line, row.end_line));
    }

    let mut total = 0u64;
    let mut covered = 0u64;
    for (path, ranges) in changed {
        let added = merge_ranges(ranges.clone());
        total = added
            .iter()
            .fold(total, |acc, (s, e)| acc.saturating_add(line_count(*s, *e)));
        if let Some(claimed) = by_file.remove(path.as_str()) {
            covered = covered.saturating_add(intersection_len(&added, &merge_ranges(claimed)));
        }
    }

    AttributionCoverage {
        total_changed_lines: total,
        attributed_lines: covered,
        coverage_percent: round_percent(covered, total),
    }
}

/// Coverage of one commit, or `None` when it added no lines.
pub async fn attribution_coverage(
    store: &dyn TraceStore,
    diff: &dyn DiffSource,
    repo_root: &Path,
    repo_id: i64,
    commit_sha: &str,
) -> Result<Option<AttributionCoverage>, CoverageError> {
    let changed = diff.added_lines(repo_root, commit_sha).await?;
    let rows = store.ranges_for_commit(repo_id, commit_sha)?;
    let coverage = compute_coverage(&changed, &rows);
    Ok((coverage.total_changed_lines > 0).then_some(coverage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ContributorType;

    fn row(path: &str, start: i64, end: i64) -> CommitRangeRow {
        CommitRangeRow {
            path: path.into(),
            conversation_id: 1,
            start_line: start,
            end_line: end,
            contributor_type: ContributorType::Ai,
            model_id: None,
        }
    }

    #[test]
    fn merges_overlapping_and_adjacent() {
        let merged = merge_ranges(vec![(10, 12), (1, 3), (4, 5), (11, 20), (30, 29)]);
        assert_eq!(merged, vec![(1, 5), (10, 20)]);
    }

    #[test]
    fn coverage_counts_only_added_lines_once() {
        let mut changed = BTreeMap::new();
        changed.insert("a.rs".to_string(), vec![(1, 10)]);
        changed.insert("b.rs".to_string(), vec![(5, 6)]);

        let rows = vec![
            row("a.rs", 1, 4),
            row("a.rs", 3, 5),
            row("a.rs", 50, 60),
            row("other.rs", 1, 100),
        ];
        let coverage = compute_coverage(&changed, &rows);

        assert_eq!(coverage.total_changed_lines, 12);
        assert_eq!(coverage.attributed_lines, 5);
        assert_eq!(coverage.coverage_percent, 42);
    }

    #[tokio::test]
    async fn coverage_reads_diff_and_store() {
        use crate::producer::StaticDiff;
        use crate::record::{AttributionRecord, Contributor, ConversationEvidence, FileEvidence, RangeEvidence};
        use crate::storage::{OpenStore, SqliteStore};

        let store = SqliteStore::open_in_memory().unwrap();
        let record = AttributionRecord::new("rec-1", "t", "abc").with_file(
            FileEvidence::new("a.rs").with_conversation(ConversationEvidence {
                url: None,
                contributor: Some(Contributor::ai(None)),
                ranges: vec![RangeEvidence::new(1, 2)],
            }),
        );
        store.ingest_record(1, &record).unwrap();
        let diff = StaticDiff::new().with_file("abc", "a.rs", vec![(1, 4)]);

        let coverage = attribution_coverage(&store, &diff, Path::new("."), 1, "abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(coverage.coverage_percent, 50);
        assert!(attribution_coverage(&store, &diff, Path::new("."), 1, "zzz")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn no_changed_lines_is_zero_percent() {
        let coverage = compute_coverage(&BTreeMap::new(), &[row("a.rs", 1, 2)]);
        assert_eq!(coverage, AttributionCoverage::default());
    }
}
