//! Commit and file aggregation over persisted ranges
//!
//! Summaries are derived, never stored: every query recomputes them from the
//! ranges in the store, so they are only ever as stale as the last
//! ingestion.

pub mod coverage;
mod types;

pub use coverage::{
    attribution_coverage, compute_coverage, merge_ranges, AttributionCoverage, CoverageError,
};
pub use types::{CommitSummary, FileSummary, ScanSummary, TraceSummary};

use crate::ingest::CancellationToken;
use crate::storage::{CommitRangeRow, StorageResult, Totals, TraceStore};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;
use types::LineTally;

/// `round(100 * part / whole)` with halves rounded up; `0` when `whole` is 0.
pub fn round_percent(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 0;
    }
    let part = u128::from(part.min(whole));
    let whole = u128::from(whole);
    ((200 * part + whole) / (2 * whole)) as u8
}

/// Share of attributed lines that are AI-authored, as an integer percent.
pub fn ai_percent(ai_lines: u64, total_lines: u64) -> u8 {
    round_percent(ai_lines, total_lines)
}

/// Summarize one commit.
///
/// `None` means the commit has no trace data at all. A commit whose ranges
/// are all `unknown` still yields a summary with zeroed ai/human/mixed
/// counts; consumers rely on that difference.
pub fn summarize_commit(
    store: &dyn TraceStore,
    repo_id: i64,
    commit_sha: &str,
) -> StorageResult<Option<TraceSummary>> {
    let rows = store.ranges_for_commit(repo_id, commit_sha)?;
    if rows.is_empty() {
        return Ok(None);
    }

    let (commit_tally, file_tallies, model_ids) = accumulate(&rows);

    let totals = store
        .totals_for_commit(repo_id, commit_sha)
        .unwrap_or_else(|e| {
            warn!(commit = commit_sha, error = %e, "totals query failed, counting rows");
            totals_from_rows(&rows)
        });

    let tool_names = store
        .tool_names_for_commit(repo_id, commit_sha)
        .unwrap_or_else(|e| {
            warn!(commit = commit_sha, error = %e, "tool name query failed");
            Vec::new()
        });

    let mut commit = commit_tally.into_commit(commit_sha);
    commit.model_ids = model_ids.into_iter().collect();
    commit.tool_names = tool_names;

    let files = file_tallies
        .into_iter()
        .map(|(path, tally)| (path.clone(), tally.into_file(path)))
        .collect();

    Ok(Some(TraceSummary {
        commit,
        files,
        totals,
    }))
}

/// Summarize several commits, yielding to the scheduler every
/// `yield_every` commits. Duplicate SHAs are summarized once.
///
/// `cancel` is checked before each commit; `Ok(None)` means the pass was
/// cancelled.
pub async fn summarize_commits(
    store: &dyn TraceStore,
    repo_id: i64,
    commit_shas: &[String],
    yield_every: usize,
    cancel: &CancellationToken,
) -> StorageResult<Option<ScanSummary>> {
    let mut scan = ScanSummary::default();
    let mut seen = HashSet::new();

    for (index, sha) in commit_shas.iter().enumerate() {
        if !seen.insert(sha.as_str()) {
            continue;
        }
        if yield_every > 0 && index > 0 && index % yield_every == 0 {
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some(summary) = summarize_commit(store, repo_id, sha)? {
            scan.insert(summary);
        }
    }

    Ok(Some(scan))
}

fn accumulate(
    rows: &[CommitRangeRow],
) -> (LineTally, BTreeMap<String, LineTally>, BTreeSet<String>) {
    let mut commit = LineTally::default();
    let mut files: BTreeMap<String, LineTally> = BTreeMap::new();
    let mut model_ids = BTreeSet::new();

    for row in rows {
        let lines = crate::record::line_count(row.start_line, row.end_line);
        commit.add(row.contributor_type, lines);
        files
            .entry(row.path.clone())
            .or_default()
            .add(row.contributor_type, lines);
        if let Some(model) = &row.model_id {
            model_ids.insert(model.clone());
        }
    }

    (commit, files, model_ids)
}

fn totals_from_rows(rows: &[CommitRangeRow]) -> Totals {
    let conversations: HashSet<i64> = rows.iter().map(|r| r.conversation_id).collect();
    Totals {
        conversations: conversations.len() as i64,
        ranges: rows.len() as i64,
    }
}
