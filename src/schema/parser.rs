//! JSON and NDJSON parsing for usage events and prescription targets

use crate::error::{AdherenceError, DataQualityError};
use crate::types::{PrescriptionTarget, UsageEvent};
use serde::de::DeserializeOwned;

/// Parser for input records
pub struct RecordParser;

impl RecordParser {
    /// Parse a JSON array of usage events
    pub fn events_from_array(json: &str) -> Result<Vec<UsageEvent>, AdherenceError> {
        parse_array(json)
    }

    /// Parse NDJSON usage events
    pub fn events_from_ndjson(ndjson: &str) -> Result<Vec<UsageEvent>, AdherenceError> {
        parse_ndjson(ndjson)
    }

    /// Parse a JSON array of prescription targets
    pub fn targets_from_array(json: &str) -> Result<Vec<PrescriptionTarget>, AdherenceError> {
        parse_array(json)
    }

    /// Parse NDJSON prescription targets
    pub fn targets_from_ndjson(ndjson: &str) -> Result<Vec<PrescriptionTarget>, AdherenceError> {
        parse_ndjson(ndjson)
    }

    /// Check every event and report the ones that would be skipped
    pub fn validate_events(events: &[UsageEvent]) -> Vec<ValidationResult> {
        events
            .iter()
            .enumerate()
            .filter_map(|(index, event)| {
                event.validate().err().map(|error| ValidationResult {
                    index,
                    event_id: event.event_id.clone(),
                    error,
                })
            })
            .collect()
    }
}

/// An event that failed validation
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub index: usize,
    pub event_id: Option<String>,
    pub error: DataQualityError,
}

fn parse_array<T: DeserializeOwned>(json: &str) -> Result<Vec<T>, AdherenceError> {
    Ok(serde_json::from_str(json)?)
}

fn parse_ndjson<T: DeserializeOwned>(ndjson: &str) -> Result<Vec<T>, AdherenceError> {
    let mut records = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                return Err(AdherenceError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(records)
}
