//! Evidence producers
//!
//! Everything that turns raw inputs into `AttributionRecord`s or reads them
//! back from disk:
//! - `files`: the `.narrative` evidence directory (`TraceFiles`)
//! - `diff`: changed files and added line ranges of a commit (`DiffSource`)
//! - `manual`: user-supplied trace files, redacted on import
//! - `telemetry`: records converted from an agent's event log
//! - `fallback`: records derived from a diff when nothing else exists
//! - `redact`: secret scrubbing

pub mod diff;
pub mod fallback;
pub mod files;
pub mod manual;
pub mod redact;
pub mod telemetry;

pub use diff::{DiffSource, GitCli, LineSpan, StaticDiff};
pub use fallback::derive_fallback_record;
pub use files::{FsTraceFiles, TraceFiles};
pub use manual::{import_trace_file, ImportError, ImportOutcome};
pub use redact::{Redactor, SecretRedactor};
pub use telemetry::{
    ConversionError, ConversionIssue, ConversionOutput, OtelConverter, TelemetryConverter,
    TelemetryEvent,
};

use thiserror::Error;

/// Errors raised while reading or producing evidence.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid evidence path: {0}")]
    InvalidPath(String),

    #[error("evidence file too large: {path} ({size} bytes, limit {limit})")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProducerError {
    /// True for errors that mean "nothing there" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProducerError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
