//! Configuration
//!
//! Every key has a default, so an absent or partial `config.yaml` is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides `db_path`.
pub const DB_ENV: &str = "TRACEWISE_DB";

const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub db_path: PathBuf,
    /// Evidence root, relative to the repository.
    pub narrative_dir: String,
    /// Trace files, relative to the evidence root.
    pub trace_dir: String,
    /// Derived records, relative to the evidence root.
    pub generated_dir: String,
    /// Telemetry event log relative to the evidence root; `None` disables it.
    pub telemetry_log: Option<String>,
    pub max_trace_bytes: u64,
    pub diff_fallback: bool,
    pub yield_every: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            narrative_dir: ".narrative".to_string(),
            trace_dir: "trace".to_string(),
            generated_dir: "trace/generated".to_string(),
            telemetry_log: Some("otel/events.jsonl".to_string()),
            max_trace_bytes: 5 * 1024 * 1024,
            diff_fallback: false,
            yield_every: 16,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracewise")
        .join("tracewise.db")
}

impl TraceConfig {
    /// Read a YAML config file. The `TRACEWISE_DB` override is applied.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut config = Self::from_yaml(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.apply_env();
        Ok(config)
    }

    /// `<repo>/.narrative/config.yaml` if it exists, otherwise defaults.
    pub fn discover(repo_root: &Path) -> Result<Self, ConfigError> {
        let candidate = repo_root.join(".narrative").join(CONFIG_FILE);
        if candidate.is_file() {
            return Self::load(&candidate);
        }
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    fn apply_env(&mut self) {
        if let Some(db) = std::env::var_os(DB_ENV).filter(|v| !v.is_empty()) {
            self.db_path = PathBuf::from(db);
        }
    }

    pub fn evidence_root(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.narrative_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TraceConfig::default();
        assert_eq!(config.narrative_dir, ".narrative");
        assert_eq!(config.generated_dir, "trace/generated");
        assert_eq!(config.max_trace_bytes, 5 * 1024 * 1024);
        assert!(!config.diff_fallback);
        assert!(config.db_path.ends_with("tracewise/tracewise.db"));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = TraceConfig::from_yaml("diff_fallback: true\nyield_every: 4\n").unwrap();
        assert!(config.diff_fallback);
        assert_eq!(config.yield_every, 4);
        assert_eq!(config.trace_dir, "trace");
    }

    #[test]
    fn null_telemetry_log_disables_it() {
        let config = TraceConfig::from_yaml("telemetry_log: null").unwrap();
        assert!(config.telemetry_log.is_none());
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(TraceConfig::from_yaml("  \n").unwrap(), TraceConfig::default());
    }

    #[test]
    fn discover_reads_repo_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".narrative")).unwrap();
        std::fs::write(
            dir.path().join(".narrative/config.yaml"),
            "max_trace_bytes: 10\n",
        )
        .unwrap();

        let config = TraceConfig::discover(dir.path()).unwrap();
        assert_eq!(config.max_trace_bytes, 10);
    }

    #[test]
    fn invalid_yaml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "yield_every: [").unwrap();
        assert!(matches!(TraceConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
