//! Tracewise: line-level attribution for git history
//!
//! Collects attribution evidence (who wrote which lines of which commit:
//! a human, an AI agent, a mix, or unknown) from several producers,
//! normalizes it into one record schema, persists it idempotently and
//! aggregates it into per-commit and per-file statistics.
//!
//! # Core Concepts
//!
//! - **Records**: one evidence submission for one commit (`record`)
//! - **Producers**: trace files, telemetry logs, diff-derived fallbacks (`producer`)
//! - **Store**: idempotent persistence keyed by record id (`storage`)
//! - **Summaries**: derived on demand, never stored (`aggregate`)
//!
//! # Example
//!
//! ```
//! use tracewise::record::parse::parse_record;
//!
//! let text = r#"{"id": "r1", "version": "0.1.0", "timestamp": "2024-05-01T10:00:00Z",
//!     "vcs": {"type": "git", "revision": "abc"},
//!     "files": [{"path": "a.rs", "conversations": []}]}"#;
//! assert!(parse_record(text).is_some());
//! ```

pub mod aggregate;
pub mod api;
pub mod config;
pub mod ingest;
pub mod producer;
pub mod record;
pub mod storage;

pub use aggregate::{ai_percent, summarize_commit, CommitSummary, FileSummary, TraceSummary};
pub use api::TraceApi;
pub use config::TraceConfig;
pub use ingest::{CancellationToken, CollectorState, CollectorStatus, IngestOrchestrator, RefreshReport};
pub use record::{AttributionRecord, Contributor, ContributorType, RangeEvidence};
pub use storage::{OpenStore, SqliteStore, StorageError, StorageResult, TraceStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
