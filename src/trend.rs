//! Adherence trend analysis
//!
//! This module turns an ordered sequence of compliance scores into trend
//! points. The analyzer is a fold: it keeps the previous ratio, the current run
//! of negative slopes and a trailing sum of recent ratios, and each new score
//! produces only the newest point.

use crate::config::TrendConfig;
use crate::error::AdherenceError;
use crate::types::{ComplianceScore, SubjectKey, TrendPoint};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Incremental trend analyzer for one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalyzer {
    config: TrendConfig,
    subject: Option<SubjectKey>,
    /// Scores seen so far
    seen: usize,
    /// Period end and ratio of the last score
    previous: Option<(NaiveDate, f64)>,
    /// Consecutive negative slopes ending at the last score
    negative_run: u32,
    /// Ratios inside the trailing window, oldest first
    trailing: VecDeque<(NaiveDate, f64)>,
    trailing_sum: f64,
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendConfig::default())
    }
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            subject: None,
            seen: 0,
            previous: None,
            negative_run: 0,
            trailing: VecDeque::new(),
            trailing_sum: 0.0,
        }
    }

    /// Fold a full score sequence into trend points.
    ///
    /// Scores are sorted by period end first; duplicates of a period keep the
    /// last one given.
    pub fn analyze(
        config: &TrendConfig,
        scores: &[ComplianceScore],
    ) -> Result<Vec<TrendPoint>, AdherenceError> {
        let mut ordered: Vec<&ComplianceScore> = scores.iter().collect();
        ordered.sort_by_key(|s| s.period_end);
        // dedup_by keeps the first of a run; reverse to keep the last one given
        ordered.reverse();
        ordered.dedup_by_key(|s| s.period_end);
        ordered.reverse();

        let mut analyzer = TrendAnalyzer::new(config.clone());
        let mut points = Vec::new();
        for score in ordered {
            if let Some(point) = analyzer.push(score)? {
                points.push(point);
            }
        }
        Ok(points)
    }

    /// Feed the next score and get the newest trend point, if enough history exists
    pub fn push(&mut self, score: &ComplianceScore) -> Result<Option<TrendPoint>, AdherenceError> {
        let trailing_span = Duration::try_days(self.config.trailing_days).ok_or_else(|| {
            AdherenceError::InvalidConfig(format!(
                "trend.trailing_days out of range: {}",
                self.config.trailing_days
            ))
        })?;

        let subject = score.subject();
        match &self.subject {
            Some(expected) if *expected != subject => {
                return Err(AdherenceError::SubjectMismatch {
                    expected: expected.to_string(),
                    actual: subject.to_string(),
                });
            }
            Some(_) => {}
            None => self.subject = Some(subject),
        }

        if let Some((previous_end, _)) = self.previous {
            if score.period_end <= previous_end {
                return Err(AdherenceError::OutOfOrderScore {
                    period_end: score.period_end,
                    previous_end,
                });
            }
        }

        // Baseline is the history before this score
        // A cutoff before the earliest representable date keeps everything
        if let Some(cutoff) = score.period_end.checked_sub_signed(trailing_span) {
            self.evict_before(cutoff);
        }
        let trailing_average = self.trailing_average();

        let slope = self.previous.map(|(_, ratio)| score.ratio - ratio);
        match slope {
            Some(s) if s < 0.0 => self.negative_run += 1,
            _ => self.negative_run = 0,
        }

        self.seen += 1;
        self.previous = Some((score.period_end, score.ratio));
        self.trailing.push_back((score.period_end, score.ratio));
        self.trailing_sum += score.ratio;

        if self.seen < self.config.min_scores {
            return Ok(None);
        }

        let declining = self.negative_run >= self.config.declining_run
            && trailing_average.map_or(false, |avg| score.ratio < self.config.decline_fraction * avg);

        if declining {
            tracing::debug!(
                subject = %score.subject(),
                period_end = %score.period_end,
                ratio = score.ratio,
                "declining adherence trend"
            );
        }

        Ok(Some(TrendPoint {
            patient_id: score.patient_id.clone(),
            device_id: score.device_id.clone(),
            period_end: score.period_end,
            ratio: score.ratio,
            slope_vs_previous: slope.unwrap_or(0.0),
            declining,
            negative_run: self.negative_run,
            trailing_average,
        }))
    }

    /// Number of scores folded so far
    pub fn scores_seen(&self) -> usize {
        self.seen
    }

    /// Current trailing average over retained scores
    pub fn trailing_average(&self) -> Option<f64> {
        if self.trailing.is_empty() {
            return None;
        }
        Some(self.trailing_sum / self.trailing.len() as f64)
    }

    /// Drop retained ratios whose period ended on or before `cutoff`
    fn evict_before(&mut self, cutoff: NaiveDate) {
        while let Some((end, ratio)) = self.trailing.front().copied() {
            if end > cutoff {
                break;
            }
            self.trailing.pop_front();
            self.trailing_sum -= ratio;
        }
        if self.trailing.is_empty() {
            self.trailing_sum = 0.0;
        }
    }

    /// Load analyzer state from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize analyzer state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
