//! Summary types returned to the presentation layer.

use crate::record::ContributorType;
use crate::storage::Totals;
use serde::Serialize;
use std::collections::BTreeMap;

/// Line totals for one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub commit_sha: String,
    pub ai_lines: u64,
    pub human_lines: u64,
    pub mixed_lines: u64,
    pub unknown_lines: u64,
    pub total_lines: u64,
    pub ai_percent: u8,
    pub model_ids: Vec<String>,
    pub tool_names: Vec<String>,
}

impl CommitSummary {
    /// True when every attributed line is `unknown`.
    pub fn is_unknown_only(&self) -> bool {
        self.ai_lines == 0 && self.human_lines == 0 && self.mixed_lines == 0
    }
}

/// Line totals for one file of a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub path: String,
    pub ai_lines: u64,
    pub human_lines: u64,
    pub mixed_lines: u64,
    pub unknown_lines: u64,
    pub total_lines: u64,
    pub ai_percent: u8,
}

/// Everything known about one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub commit: CommitSummary,
    /// Only files with at least one attributed range appear.
    pub files: BTreeMap<String, FileSummary>,
    pub totals: Totals,
}

/// Summaries for a set of commits. Commits without trace data are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub by_commit: BTreeMap<String, CommitSummary>,
    pub by_file_by_commit: BTreeMap<String, BTreeMap<String, FileSummary>>,
    pub totals: Totals,
}

impl ScanSummary {
    pub fn insert(&mut self, summary: TraceSummary) {
        let sha = summary.commit.commit_sha.clone();
        self.totals += summary.totals;
        self.by_file_by_commit.insert(sha.clone(), summary.files);
        self.by_commit.insert(sha, summary.commit);
    }
}

/// Per-contributor line accumulator. Sums saturate at `u64::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LineTally {
    pub ai: u64,
    pub human: u64,
    pub mixed: u64,
    pub unknown: u64,
}

impl LineTally {
    pub fn add(&mut self, kind: ContributorType, lines: u64) {
        match kind {
            ContributorType::Ai => self.ai = self.ai.saturating_add(lines),
            ContributorType::Human => self.human = self.human.saturating_add(lines),
            ContributorType::Mixed => self.mixed = self.mixed.saturating_add(lines),
            ContributorType::Unknown => self.unknown = self.unknown.saturating_add(lines),
        }
    }

    pub fn total(&self) -> u64 {
        self.ai
            .saturating_add(self.human)
            .saturating_add(self.mixed)
            .saturating_add(self.unknown)
    }

    pub fn into_commit(self, commit_sha: &str) -> CommitSummary {
        CommitSummary {
            commit_sha: commit_sha.to_string(),
            ai_lines: self.ai,
            human_lines: self.human,
            mixed_lines: self.mixed,
            unknown_lines: self.unknown,
            total_lines: self.total(),
            ai_percent: super::ai_percent(self.ai, self.total()),
            model_ids: Vec::new(),
            tool_names: Vec::new(),
        }
    }

    pub fn into_file(self, path: String) -> FileSummary {
        FileSummary {
            path,
            ai_lines: self.ai,
            human_lines: self.human,
            mixed_lines: self.mixed,
            unknown_lines: self.unknown,
            total_lines: self.total(),
            ai_percent: super::ai_percent(self.ai, self.total()),
        }
    }
}
