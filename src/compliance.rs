//! Rolling compliance scoring
//!
//! Scores adherence over fixed-length windows of daily wear records. The
//! window slides one step at a time and keeps a running aggregate, so each day
//! is added once and removed once regardless of history length.

use crate::config::{ComplianceConfig, MAX_WINDOW_DAYS};
use crate::error::DataQualityError;
use crate::types::{ComplianceScore, DailyWearRecord, Diagnostics, PrescriptionTarget, SubjectKey};
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, VecDeque};

/// Scores produced for one subject
#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceSeries {
    pub scores: Vec<ComplianceScore>,
    pub diagnostics: Diagnostics,
}

/// One day's share of a window
#[derive(Debug, Clone, Copy, Default)]
struct DayContribution {
    achieved: f64,
    target: f64,
    covered: bool,
}

/// Running sums over the days currently in the window
#[derive(Debug, Clone, Default)]
struct WindowAggregate {
    achieved: f64,
    target: f64,
    covered_days: u32,
}

impl WindowAggregate {
    fn add(&mut self, day: &DayContribution) {
        if day.covered {
            self.achieved += day.achieved;
            self.target += day.target;
            self.covered_days += 1;
        }
    }

    fn remove(&mut self, day: &DayContribution) {
        if day.covered {
            self.achieved -= day.achieved;
            self.target -= day.target;
            self.covered_days -= 1;
        }
        if self.covered_days == 0 {
            // Drop accumulated rounding once the window is empty
            self.achieved = 0.0;
            self.target = 0.0;
        }
    }
}

/// Calculator for rolling compliance windows
#[derive(Debug, Clone, Default)]
pub struct ComplianceCalculator {
    config: ComplianceConfig,
}

impl ComplianceCalculator {
    pub fn new(config: ComplianceConfig) -> Self {
        Self { config }
    }

    /// Score every full window over the subject's daily records.
    ///
    /// Records are expected for a single subject; others are ignored. Days
    /// missing from the timeline count as zero wear.
    pub fn rolling(
        &self,
        subject: &SubjectKey,
        records: &[DailyWearRecord],
        targets: &[PrescriptionTarget],
    ) -> ComplianceSeries {
        let mut diagnostics = Diagnostics::default();
        let mut scores = Vec::new();

        let worn_by_day = worn_by_day(subject, records);
        let (Some(first), Some(last)) = (
            worn_by_day.keys().next().copied(),
            worn_by_day.keys().next_back().copied(),
        ) else {
            return ComplianceSeries {
                scores,
                diagnostics,
            };
        };
        let targets = applicable_targets(subject, targets);

        let window_days = self.config.window_days;
        let mut window: VecDeque<DayContribution> =
            VecDeque::with_capacity(window_days.saturating_add(1).min(MAX_WINDOW_DAYS + 1));
        let mut aggregate = WindowAggregate::default();

        for (index, date) in first.iter_days().take_while(|d| *d <= last).enumerate() {
            let day = contribution(&targets, date, worn_by_day.get(&date).copied().unwrap_or(0.0));
            aggregate.add(&day);
            window.push_back(day);

            if window.len() > window_days {
                if let Some(oldest) = window.pop_front() {
                    aggregate.remove(&oldest);
                }
            }

            let full = window.len() == window_days;
            let on_step = full && (index + 1 - window_days) % self.config.step_days == 0;
            if !on_step {
                continue;
            }

            let period_start = window_start(date, window_days);
            match self.to_score(subject, &aggregate, period_start, date) {
                Ok(score) => scores.push(score),
                Err(issue) => diagnostics.record(issue),
            }
        }

        tracing::debug!(
            subject = %subject,
            scores = scores.len(),
            skipped_windows = diagnostics.skipped_windows,
            "computed rolling compliance"
        );

        ComplianceSeries {
            scores,
            diagnostics,
        }
    }

    /// Score the single window ending on `period_end`, from scratch
    pub fn score_window(
        &self,
        subject: &SubjectKey,
        records: &[DailyWearRecord],
        targets: &[PrescriptionTarget],
        period_end: NaiveDate,
    ) -> Result<ComplianceScore, DataQualityError> {
        let worn_by_day = worn_by_day(subject, records);
        let targets = applicable_targets(subject, targets);
        let period_start = window_start(period_end, self.config.window_days);

        let mut aggregate = WindowAggregate::default();
        for date in period_start.iter_days().take_while(|d| *d <= period_end) {
            let worn = worn_by_day.get(&date).copied().unwrap_or(0.0);
            aggregate.add(&contribution(&targets, date, worn));
        }

        self.to_score(subject, &aggregate, period_start, period_end)
    }

    fn to_score(
        &self,
        subject: &SubjectKey,
        aggregate: &WindowAggregate,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<ComplianceScore, DataQualityError> {
        if aggregate.covered_days == 0 || aggregate.target <= 0.0 {
            return Err(DataQualityError::NoApplicableTarget {
                period_start,
                period_end,
            });
        }

        let achieved = aggregate.achieved.max(0.0);
        let ratio = (achieved / aggregate.target).clamp(0.0, self.config.ratio_cap);

        Ok(ComplianceScore {
            patient_id: subject.patient_id.clone(),
            device_id: subject.device_id.clone(),
            period_start,
            period_end,
            achieved_minutes: achieved,
            target_minutes: aggregate.target,
            ratio,
            covered_days: aggregate.covered_days,
        })
    }
}

/// First day of the window ending on `period_end`.
///
/// A window reaching past the earliest representable date starts there.
fn window_start(period_end: NaiveDate, window_days: usize) -> NaiveDate {
    i64::try_from(window_days.saturating_sub(1))
        .ok()
        .and_then(Duration::try_days)
        .and_then(|span| period_end.checked_sub_signed(span))
        .unwrap_or(NaiveDate::MIN)
}

fn worn_by_day(subject: &SubjectKey, records: &[DailyWearRecord]) -> BTreeMap<NaiveDate, f64> {
    records
        .iter()
        .filter(|r| subject.matches(&r.patient_id, &r.device_id))
        .map(|r| (r.date, r.worn_minutes))
        .collect()
}

fn applicable_targets<'a>(
    subject: &SubjectKey,
    targets: &'a [PrescriptionTarget],
) -> Vec<&'a PrescriptionTarget> {
    targets
        .iter()
        .filter(|t| subject.matches(&t.patient_id, &t.device_id))
        .collect()
}

/// Daily target in force on `date`; the most recently started prescription wins
pub fn target_for_day(targets: &[&PrescriptionTarget], date: NaiveDate) -> Option<f64> {
    targets
        .iter()
        .filter(|t| t.applies_on(date))
        .max_by_key(|t| t.effective_from)
        .map(|t| t.daily_target_minutes)
}

fn contribution(targets: &[&PrescriptionTarget], date: NaiveDate, worn: f64) -> DayContribution {
    match target_for_day(targets, date) {
        Some(target) => DayContribution {
            achieved: worn,
            target,
            covered: true,
        },
        None => DayContribution::default(),
    }
}
