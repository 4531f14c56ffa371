//! Clinical alert rules
//!
//! Rules run in a fixed priority order and the first match wins, so at most
//! one alert comes out of an evaluation and the same inputs always give the
//! same alert.

use crate::config::AlertThresholds;
use crate::types::{Alert, ComplianceScore, Severity, TrendPoint};
use chrono::{DateTime, Utc};

/// Alert rules, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertRule {
    SevereNonAdherence,
    DecliningTrend,
    BelowTarget,
}

impl AlertRule {
    pub const PRIORITY: [AlertRule; 3] = [
        AlertRule::SevereNonAdherence,
        AlertRule::DecliningTrend,
        AlertRule::BelowTarget,
    ];

    pub fn severity(&self) -> Severity {
        match self {
            AlertRule::SevereNonAdherence => Severity::Critical,
            AlertRule::DecliningTrend => Severity::Warning,
            AlertRule::BelowTarget => Severity::Notice,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AlertRule::SevereNonAdherence => "severe non-adherence",
            AlertRule::DecliningTrend => "declining adherence trend",
            AlertRule::BelowTarget => "below target adherence",
        }
    }

    fn matches(
        &self,
        thresholds: &AlertThresholds,
        score: &ComplianceScore,
        trend: Option<&TrendPoint>,
    ) -> bool {
        match self {
            AlertRule::SevereNonAdherence => score.ratio < thresholds.critical_below,
            AlertRule::DecliningTrend => trend.map_or(false, |t| t.declining),
            AlertRule::BelowTarget => {
                score.ratio >= thresholds.critical_below && score.ratio < thresholds.notice_below
            }
        }
    }
}

/// Evaluator for the ordered alert rules
#[derive(Debug, Clone, Default)]
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate the latest score and its trend point.
    ///
    /// A trend point for a different subject or period is ignored.
    pub fn evaluate(
        &self,
        score: &ComplianceScore,
        trend: Option<&TrendPoint>,
        triggered_at: DateTime<Utc>,
    ) -> Option<Alert> {
        let trend = trend.filter(|t| {
            t.period_end == score.period_end
                && t.patient_id == score.patient_id
                && t.device_id == score.device_id
        });

        let rule = AlertRule::PRIORITY
            .iter()
            .find(|rule| rule.matches(&self.thresholds, score, trend))?;

        tracing::debug!(
            subject = %score.subject(),
            severity = %rule.severity(),
            ratio = score.ratio,
            "alert raised"
        );

        Some(Alert {
            patient_id: score.patient_id.clone(),
            device_id: score.device_id.clone(),
            severity: rule.severity(),
            reason: rule.reason().to_string(),
            triggered_at,
            period_end: score.period_end,
            ratio: score.ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 8, 6, 0, 0).unwrap()
    }

    fn score(ratio: f64) -> ComplianceScore {
        let period_end = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        ComplianceScore {
            patient_id: "patient-1".to_string(),
            device_id: "brace-1".to_string(),
            period_start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            period_end,
            achieved_minutes: ratio * 840.0,
            target_minutes: 840.0,
            ratio,
            covered_days: 7,
        }
    }

    fn trend(score: &ComplianceScore, declining: bool) -> TrendPoint {
        TrendPoint {
            patient_id: score.patient_id.clone(),
            device_id: score.device_id.clone(),
            period_end: score.period_end,
            ratio: score.ratio,
            slope_vs_previous: -0.1,
            declining,
            negative_run: 3,
            trailing_average: Some(0.9),
        }
    }

    #[test]
    fn test_severe_non_adherence() {
        let s = score(0.1);
        let alert = AlertEvaluator::default().evaluate(&s, None, now()).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.reason, "severe non-adherence");
        assert_eq!(alert.triggered_at, now());
    }

    #[test]
    fn test_critical_outranks_declining() {
        let s = score(0.2);
        let t = trend(&s, true);
        let alert = AlertEvaluator::default().evaluate(&s, Some(&t), now()).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[test]
    fn test_declining_outranks_below_target() {
        let s = score(0.4);
        let t = trend(&s, true);
        let alert = AlertEvaluator::default().evaluate(&s, Some(&t), now()).unwrap();
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.reason, "declining adherence trend");
    }

    #[test]
    fn test_below_target_bounds() {
        let evaluator = AlertEvaluator::default();
        let at_lower = evaluator.evaluate(&score(0.3), None, now()).unwrap();
        assert_eq!(at_lower.severity, Severity::Notice);

        let below_upper = evaluator.evaluate(&score(0.69), None, now()).unwrap();
        assert_eq!(below_upper.reason, "below target adherence");

        assert!(evaluator.evaluate(&score(0.7), None, now()).is_none());
        assert!(evaluator.evaluate(&score(1.4), None, now()).is_none());
    }

    #[test]
    fn test_stale_trend_is_ignored() {
        let s = score(0.9);
        let mut t = trend(&s, true);
        t.period_end = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        assert!(AlertEvaluator::default().evaluate(&s, Some(&t), now()).is_none());
    }

    #[test]
    fn test_custom_thresholds() {
        let evaluator = AlertEvaluator::new(AlertThresholds {
            critical_below: 0.5,
            notice_below: 0.9,
        });
        let alert = evaluator.evaluate(&score(0.45), None, now()).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        let alert = evaluator.evaluate(&score(0.8), None, now()).unwrap();
        assert_eq!(alert.severity, Severity::Notice);
    }
}
