//! Error types for the adherence engine
//!
//! Two layers:
//! - [`DataQualityError`] describes a single bad input (event, day or window).
//!   It is recoverable: the stage records it in [`Diagnostics`](crate::types::Diagnostics)
//!   and carries on with the rest of the timeline.
//! - [`AdherenceError`] fails a whole call (bad time zone, bad config, bad JSON).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recoverable per-event, per-day or per-window data problems
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityError {
    #[error("Invalid usage event {}: {reason}", event_id.as_deref().unwrap_or("<unnamed>"))]
    InvalidEvent {
        event_id: Option<String>,
        reason: String,
    },

    #[error("Wear time on {date} sums to {raw_minutes:.1} minutes, clamped to {cap_minutes}")]
    DataIntegrity {
        date: NaiveDate,
        raw_minutes: f64,
        cap_minutes: f64,
    },

    #[error("No prescription target applies between {period_start} and {period_end}")]
    NoApplicableTarget {
        period_start: NaiveDate,
        period_end: NaiveDate,
    },
}

/// Errors that fail an engine call
#[derive(Debug, Error)]
pub enum AdherenceError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Score for {period_end} is not after the previous score ({previous_end})")]
    OutOfOrderScore {
        period_end: NaiveDate,
        previous_end: NaiveDate,
    },

    #[error("Score belongs to {actual}, analyzer tracks {expected}")]
    SubjectMismatch { expected: String, actual: String },

    #[error("Unknown subject: {0}")]
    UnknownSubject(String),
}
