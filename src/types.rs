//! Core types for the adherence pipeline
//!
//! This module defines the records that flow through each stage:
//! usage events and prescription targets in, daily wear records, compliance
//! scores, trend points and alerts out. Field names are the stable contract any
//! serializer on the presentation side relies on.

use crate::error::DataQualityError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one patient wearing one device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    pub patient_id: String,
    pub device_id: String,
}

impl SubjectKey {
    pub fn new(patient_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Whether a record carrying these ids belongs to this subject
    pub fn matches(&self, patient_id: &str, device_id: &str) -> bool {
        self.patient_id == patient_id && self.device_id == device_id
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.patient_id, self.device_id)
    }
}

/// A wear interval reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Optional identifier, only used to point at bad events in diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub device_id: String,
    pub patient_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}

impl UsageEvent {
    /// Create a new event with a generated id
    pub fn new(subject: &SubjectKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            event_id: Some(uuid::Uuid::new_v4().to_string()),
            device_id: subject.device_id.clone(),
            patient_id: subject.patient_id.clone(),
            start_timestamp: start,
            end_timestamp: end,
        }
    }

    pub fn subject(&self) -> SubjectKey {
        SubjectKey::new(self.patient_id.clone(), self.device_id.clone())
    }

    /// Check the interval invariant (end strictly after start)
    pub fn validate(&self) -> Result<(), DataQualityError> {
        if self.end_timestamp <= self.start_timestamp {
            return Err(DataQualityError::InvalidEvent {
                event_id: self.event_id.clone(),
                reason: format!(
                    "end {} is not after start {}",
                    self.end_timestamp.to_rfc3339(),
                    self.start_timestamp.to_rfc3339()
                ),
            });
        }
        Ok(())
    }
}

/// Wear time for one local calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyWearRecord {
    pub patient_id: String,
    pub device_id: String,
    pub date: NaiveDate,
    /// Minutes worn, 0 to the day cap
    pub worn_minutes: f64,
    /// Raw sum exceeded the day cap and was clamped
    #[serde(default)]
    pub clamped: bool,
}

/// Prescribed daily wear for a subject over a date interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionTarget {
    pub patient_id: String,
    pub device_id: String,
    pub daily_target_minutes: f64,
    pub effective_from: NaiveDate,
    /// Inclusive end date; `None` means ongoing
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
}

impl PrescriptionTarget {
    pub fn subject(&self) -> SubjectKey {
        SubjectKey::new(self.patient_id.clone(), self.device_id.clone())
    }

    /// Whether this target is in force on `date`
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.daily_target_minutes > 0.0
            && self.effective_from <= date
            && self.effective_to.map_or(true, |to| date <= to)
    }
}

/// Adherence over one evaluation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceScore {
    pub patient_id: String,
    pub device_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub achieved_minutes: f64,
    pub target_minutes: f64,
    /// achieved / target, clamped to [0, ratio cap]
    pub ratio: f64,
    /// Days in the window that had a target in force
    pub covered_days: u32,
}

impl ComplianceScore {
    pub fn subject(&self) -> SubjectKey {
        SubjectKey::new(self.patient_id.clone(), self.device_id.clone())
    }
}

/// Direction of adherence at the end of one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub patient_id: String,
    pub device_id: String,
    pub period_end: NaiveDate,
    pub ratio: f64,
    pub slope_vs_previous: f64,
    /// Sustained drop well below the patient's own trailing average
    pub declining: bool,
    /// Consecutive negative slopes ending at this point
    pub negative_run: u32,
    /// Mean ratio over the trailing window, excluding this point
    pub trailing_average: Option<f64>,
}

/// Alert severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Notice,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actionable finding for clinicians
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub patient_id: String,
    pub device_id: String,
    pub severity: Severity,
    pub reason: String,
    pub triggered_at: DateTime<Utc>,
    /// End of the period whose score triggered the alert
    pub period_end: NaiveDate,
    pub ratio: f64,
}

/// Inclusive range of local calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Smallest range covering both
    pub fn union(&self, other: &DateRange) -> DateRange {
        DateRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Iterate every day in the range
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Recoverable problems seen during one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub invalid_events: usize,
    pub clamped_days: usize,
    pub skipped_windows: usize,
    pub issues: Vec<DataQualityError>,
}

impl Diagnostics {
    /// Count and keep a data-quality error
    pub fn record(&mut self, issue: DataQualityError) {
        match &issue {
            DataQualityError::InvalidEvent { .. } => self.invalid_events += 1,
            DataQualityError::DataIntegrity { .. } => self.clamped_days += 1,
            DataQualityError::NoApplicableTarget { .. } => self.skipped_windows += 1,
        }
        tracing::warn!("{}", issue);
        self.issues.push(issue);
    }

    /// Fold another pass's diagnostics into this one
    pub fn merge(&mut self, other: Diagnostics) {
        self.invalid_events += other.invalid_events;
        self.clamped_days += other.clamped_days;
        self.skipped_windows += other.skipped_windows;
        self.issues.extend(other.issues);
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Everything computed for one subject in one evaluation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherenceReport {
    pub patient_id: String,
    pub device_id: String,
    pub timezone: String,
    pub daily_records: Vec<DailyWearRecord>,
    pub scores: Vec<ComplianceScore>,
    pub trend: Vec<TrendPoint>,
    pub alert: Option<Alert>,
    pub diagnostics: Diagnostics,
}
