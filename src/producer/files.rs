//! The evidence directory
//!
//! All evidence lives under `<repo>/<narrative_dir>`. Paths handed to
//! `TraceFiles` are relative to that root and `/`-separated; absolute paths
//! and `..` components are rejected before touching the filesystem.

use super::ProducerError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Read and write access to trace files.
#[async_trait]
pub trait TraceFiles: Send + Sync {
    /// Every file under `dir`, recursively, as root-relative paths sorted
    /// lexicographically. A missing directory yields an empty list.
    async fn list_files(&self, dir: &str) -> Result<Vec<String>, ProducerError>;

    async fn read_text(&self, path: &str) -> Result<String, ProducerError>;

    /// Write `contents`, creating parent directories as needed.
    async fn write_text(&self, path: &str, contents: &str) -> Result<(), ProducerError>;
}

/// `TraceFiles` over the local filesystem.
#[derive(Debug, Clone)]
pub struct FsTraceFiles {
    root: PathBuf,
    max_bytes: u64,
}

impl FsTraceFiles {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the trace and generated directories.
    pub async fn ensure_dirs(&self, trace_dir: &str, generated_dir: &str) -> Result<(), ProducerError> {
        tokio::fs::create_dir_all(self.resolve(trace_dir)?).await?;
        tokio::fs::create_dir_all(self.resolve(generated_dir)?).await?;
        Ok(())
    }

    /// Map a root-relative path onto the filesystem.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ProducerError> {
        let candidate = Path::new(relative);
        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ProducerError::InvalidPath(relative.to_string()));
                }
            }
        }
        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl TraceFiles for FsTraceFiles {
    async fn list_files(&self, dir: &str) -> Result<Vec<String>, ProducerError> {
        let start = self.resolve(dir)?;
        let mut pending = vec![start];
        let mut found = Vec::new();

        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Some(rel) = self.relative(&path) {
                        found.push(rel);
                    }
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn read_text(&self, path: &str) -> Result<String, ProducerError> {
        let full = self.resolve(path)?;
        let size = tokio::fs::metadata(&full).await?.len();
        if size > self.max_bytes {
            return Err(ProducerError::TooLarge {
                path: path.to_string(),
                size,
                limit: self.max_bytes,
            });
        }
        Ok(tokio::fs::read_to_string(&full).await?)
    }

    async fn write_text(&self, path: &str, contents: &str) -> Result<(), ProducerError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, contents).await?;
        Ok(())
    }
}
