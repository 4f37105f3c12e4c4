//! Commit diffs
//!
//! The telemetry converter, the diff fallback and coverage all need the same
//! two facts about a commit: which files it touched and which lines it added.
//! `GitCli` answers them by shelling out to `git`; `StaticDiff` answers them
//! from a fixed table for tests.

use super::ProducerError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Inclusive 1-based `(start_line, end_line)` in the post-commit file.
pub type LineSpan = (i64, i64);

/// Source of per-commit diff facts.
#[async_trait]
pub trait DiffSource: Send + Sync {
    /// The repository's current HEAD, or `None` when it has none.
    async fn head_commit(&self, repo_root: &Path) -> Result<Option<String>, ProducerError>;

    /// Paths changed by the commit (excluding deletions), in diff order.
    async fn commit_files(&self, repo_root: &Path, sha: &str) -> Result<Vec<String>, ProducerError>;

    /// Added line spans per file.
    async fn added_lines(
        &self,
        repo_root: &Path,
        sha: &str,
    ) -> Result<BTreeMap<String, Vec<LineSpan>>, ProducerError>;
}

/// `DiffSource` backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, repo_root: &Path, args: &[&str]) -> Result<String, ProducerError> {
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(repo_root)
            .args(["-c", "core.quotePath=false"])
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ProducerError::Git {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

fn check_revision(sha: &str) -> Result<(), ProducerError> {
    if sha.is_empty() || sha.starts_with('-') {
        return Err(ProducerError::Git {
            args: sha.to_string(),
            stderr: "invalid revision".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl DiffSource for GitCli {
    async fn head_commit(&self, repo_root: &Path) -> Result<Option<String>, ProducerError> {
        match self.run(repo_root, &["rev-parse", "--verify", "HEAD"]).await {
            Ok(out) => {
                let sha = out.trim();
                Ok((!sha.is_empty()).then(|| sha.to_string()))
            }
            Err(ProducerError::Git { stderr, .. }) => {
                debug!(%stderr, "repository has no HEAD");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn commit_files(&self, repo_root: &Path, sha: &str) -> Result<Vec<String>, ProducerError> {
        check_revision(sha)?;
        let out = self
            .run(
                repo_root,
                &["show", "--format=", "--name-only", "--no-renames", "--diff-filter=d", sha],
            )
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn added_lines(
        &self,
        repo_root: &Path,
        sha: &str,
    ) -> Result<BTreeMap<String, Vec<LineSpan>>, ProducerError> {
        check_revision(sha)?;
        let patch = self
            .run(
                repo_root,
                &["show", "--format=", "--unified=0", "--no-color", "--no-renames", sha],
            )
            .await?;
        Ok(parse_added_lines(&patch))
    }
}

/// Collect the `+` side of every hunk in a zero-context patch.
pub fn parse_added_lines(patch: &str) -> BTreeMap<String, Vec<LineSpan>> {
    let mut spans: BTreeMap<String, Vec<LineSpan>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in patch.lines() {
        if let Some(target) = line.strip_prefix("+++ ") {
            current = match target {
                "/dev/null" => None,
                other => Some(other.strip_prefix("b/").unwrap_or(other).to_string()),
            };
            continue;
        }
        if !line.starts_with("@@") {
            continue;
        }
        let (Some(path), Some((start, count))) = (&current, parse_hunk_header(line)) else {
            continue;
        };
        if count > 0 {
            spans
                .entry(path.clone())
                .or_default()
                .push((start, start + count - 1));
        }
    }

    spans
}

/// `@@ -a,b +c,d @@` → `(c, d)`; `d` defaults to 1.
fn parse_hunk_header(line: &str) -> Option<(i64, i64)> {
    let added = line
        .split_whitespace()
        .skip(1)
        .find_map(|token| token.strip_prefix('+'))?;
    let mut parts = added.splitn(2, ',');
    let start = parts.next()?.parse().ok()?;
    let count = match parts.next() {
        Some(count) => count.parse().ok()?,
        None => 1,
    };
    Some((start, count))
}

/// Fixed diff table, for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDiff {
    head: Option<String>,
    commits: HashMap<String, BTreeMap<String, Vec<LineSpan>>>,
}

impl StaticDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_head(mut self, sha: impl Into<String>) -> Self {
        self.head = Some(sha.into());
        self
    }

    /// Register added spans for one file of a commit. An empty `spans`
    /// still marks the file as changed.
    pub fn with_file(
        mut self,
        sha: impl Into<String>,
        path: impl Into<String>,
        spans: Vec<LineSpan>,
    ) -> Self {
        self.commits
            .entry(sha.into())
            .or_default()
            .insert(path.into(), spans);
        self
    }
}

#[async_trait]
impl DiffSource for StaticDiff {
    async fn head_commit(&self, _repo_root: &Path) -> Result<Option<String>, ProducerError> {
        Ok(self.head.clone())
    }

    async fn commit_files(&self, _repo_root: &Path, sha: &str) -> Result<Vec<String>, ProducerError> {
        Ok(self
            .commits
            .get(sha)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn added_lines(
        &self,
        _repo_root: &Path,
        sha: &str,
    ) -> Result<BTreeMap<String, Vec<LineSpan>>, ProducerError> {
        Ok(self
            .commits
            .get(sha)
            .map(|files| {
                files
                    .iter()
                    .filter(|(_, spans)| !spans.is_empty())
                    .map(|(path, spans)| (path.clone(), spans.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
