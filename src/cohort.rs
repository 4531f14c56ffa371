//! Cohort rollup over many subjects
//!
//! Evaluating a whole store gives one outcome per subject. Subjects that fail
//! (for example on an unknown device time zone) are listed next to the
//! reports of the ones that succeeded, and a summary counts alerts by
//! severity and totals the data-quality counters.

use crate::error::AdherenceError;
use crate::types::{AdherenceReport, Severity, SubjectKey};
use serde::{Deserialize, Serialize};

/// A subject whose evaluation failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectFailure {
    pub patient_id: String,
    pub device_id: String,
    pub error: String,
}

impl SubjectFailure {
    pub fn new(subject: &SubjectKey, error: &AdherenceError) -> Self {
        Self {
            patient_id: subject.patient_id.clone(),
            device_id: subject.device_id.clone(),
            error: error.to_string(),
        }
    }
}

/// Totals across every subject of one evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortSummary {
    pub subjects_evaluated: usize,
    pub subjects_failed: usize,
    pub critical_alerts: usize,
    pub warning_alerts: usize,
    pub notice_alerts: usize,
    pub subjects_without_alert: usize,
    pub invalid_events: usize,
    pub clamped_days: usize,
    pub skipped_windows: usize,
}

impl CohortSummary {
    pub fn add_report(&mut self, report: &AdherenceReport) {
        self.subjects_evaluated += 1;
        match report.alert.as_ref().map(|a| a.severity) {
            Some(Severity::Critical) => self.critical_alerts += 1,
            Some(Severity::Warning) => self.warning_alerts += 1,
            Some(Severity::Notice) => self.notice_alerts += 1,
            None => self.subjects_without_alert += 1,
        }
        self.invalid_events += report.diagnostics.invalid_events;
        self.clamped_days += report.diagnostics.clamped_days;
        self.skipped_windows += report.diagnostics.skipped_windows;
    }

    pub fn add_failure(&mut self) {
        self.subjects_failed += 1;
    }

    pub fn alerts(&self) -> usize {
        self.critical_alerts + self.warning_alerts + self.notice_alerts
    }
}

/// Reports, failures and summary for a set of subjects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortEvaluation {
    pub reports: Vec<AdherenceReport>,
    pub failures: Vec<SubjectFailure>,
    pub summary: CohortSummary,
}

impl CohortEvaluation {
    /// Record one subject's outcome
    pub fn push(&mut self, subject: &SubjectKey, outcome: Result<AdherenceReport, AdherenceError>) {
        match outcome {
            Ok(report) => {
                self.summary.add_report(&report);
                self.reports.push(report);
            }
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "subject evaluation failed");
                self.summary.add_failure();
                self.failures.push(SubjectFailure::new(subject, &e));
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alert, Diagnostics};
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn report(device: &str, severity: Option<Severity>, invalid_events: usize) -> AdherenceReport {
        let alert = severity.map(|severity| Alert {
            patient_id: "p1".to_string(),
            device_id: device.to_string(),
            severity,
            reason: "test".to_string(),
            triggered_at: Utc.with_ymd_and_hms(2024, 3, 8, 6, 0, 0).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
            ratio: 0.1,
        });
        AdherenceReport {
            patient_id: "p1".to_string(),
            device_id: device.to_string(),
            timezone: "UTC".to_string(),
            daily_records: vec![],
            scores: vec![],
            trend: vec![],
            alert,
            diagnostics: Diagnostics {
                invalid_events,
                clamped_days: 1,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_summary_counts_alerts_and_diagnostics() {
        let mut cohort = CohortEvaluation::default();
        cohort.push(
            &SubjectKey::new("p1", "a"),
            Ok(report("a", Some(Severity::Critical), 2)),
        );
        cohort.push(
            &SubjectKey::new("p1", "b"),
            Ok(report("b", Some(Severity::Notice), 0)),
        );
        cohort.push(&SubjectKey::new("p1", "c"), Ok(report("c", None, 1)));
        cohort.push(
            &SubjectKey::new("p1", "d"),
            Err(AdherenceError::InvalidTimezone("Bad/Zone".to_string())),
        );

        assert_eq!(
            cohort.summary,
            CohortSummary {
                subjects_evaluated: 3,
                subjects_failed: 1,
                critical_alerts: 1,
                warning_alerts: 0,
                notice_alerts: 1,
                subjects_without_alert: 1,
                invalid_events: 3,
                clamped_days: 3,
                skipped_windows: 0,
            }
        );
        assert_eq!(cohort.summary.alerts(), 2);
        assert_eq!(cohort.reports.len(), 3);
        assert_eq!(cohort.failures[0].device_id, "d");
        assert!(cohort.failures[0].error.contains("Bad/Zone"));
        assert!(!cohort.is_complete());
    }
}
