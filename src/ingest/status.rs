//! Collector status
//!
//! `inactive` → `active` → `partial` → `error`, recomputed on every refresh
//! from what the telemetry path saw. Staleness of `active` is left to the
//! consumer.

use crate::producer::ConversionError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorState {
    #[default]
    Inactive,
    Active,
    Partial,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub state: CollectorState,
    pub message: Option<String>,
    /// Actionable problems only; informational notes go in `message`.
    pub issues: Vec<String>,
    pub last_seen_at: Option<String>,
    pub records_written: usize,
}

impl CollectorStatus {
    pub fn inactive(message: impl Into<String>) -> Self {
        Self {
            state: CollectorState::Inactive,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: CollectorState::Error,
            message: Some(message.into()),
            last_seen_at: Some(now()),
            ..Self::default()
        }
    }

    /// Status after converting a non-empty event log.
    ///
    /// `write_failures` are records that converted but could not be stored.
    pub fn from_conversion(
        records_written: usize,
        conversion_errors: &[ConversionError],
        write_failures: Vec<String>,
    ) -> Self {
        let notes: Vec<String> = conversion_errors
            .iter()
            .filter(|e| !e.is_actionable())
            .map(|e| e.message.clone())
            .collect();
        let mut issues: Vec<String> = conversion_errors
            .iter()
            .filter(|e| e.is_actionable())
            .map(ToString::to_string)
            .collect();
        issues.extend(write_failures);

        let (state, mut message) = if issues.is_empty() {
            (
                CollectorState::Active,
                format!("telemetry ingest wrote {records_written} record(s)"),
            )
        } else if records_written > 0 {
            (
                CollectorState::Partial,
                format!("telemetry ingest completed with {} issue(s)", issues.len()),
            )
        } else {
            (
                CollectorState::Error,
                format!("telemetry ingest failed with {} issue(s)", issues.len()),
            )
        };
        for note in notes {
            message.push_str(". ");
            message.push_str(&note);
        }

        Self {
            state,
            message: Some(message),
            issues,
            last_seen_at: Some(now()),
            records_written,
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
