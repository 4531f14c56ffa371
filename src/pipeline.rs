//! Pipeline orchestration
//!
//! This module provides the public API of the engine. For one subject it runs
//! the stages strictly in order:
//! 1. Normalizer - usage events to daily wear records
//! 2. ComplianceCalculator - rolling compliance scores
//! 3. TrendAnalyzer - trend points with declining detection
//! 4. AlertEvaluator - at most one alert for the latest period
//!
//! Subjects are independent of each other, so callers may evaluate them on as
//! many threads as they like.

use crate::adapters::EventStore;
use crate::alert::AlertEvaluator;
use crate::cohort::CohortEvaluation;
use crate::compliance::ComplianceCalculator;
use crate::config::EngineConfig;
use crate::error::AdherenceError;
use crate::normalizer::Normalizer;
use crate::trend::TrendAnalyzer;
use crate::types::{AdherenceReport, DateRange, PrescriptionTarget, SubjectKey, UsageEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the engine needs to evaluate one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectInput {
    pub patient_id: String,
    pub device_id: String,
    /// IANA time zone of the device
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub events: Vec<UsageEvent>,
    #[serde(default)]
    pub targets: Vec<PrescriptionTarget>,
    /// Days to cover even without events
    #[serde(default)]
    pub period: Option<DateRange>,
}

impl SubjectInput {
    pub fn subject(&self) -> SubjectKey {
        SubjectKey::new(self.patient_id.clone(), self.device_id.clone())
    }
}

/// A request as sent by the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    #[serde(flatten)]
    pub input: SubjectInput,
    /// Timestamp stamped on any alert raised
    pub evaluated_at: DateTime<Utc>,
    /// Overrides for the default engine configuration
    #[serde(default)]
    pub config: Option<EngineConfig>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Evaluate a JSON [`EvaluationRequest`] and return the report as JSON.
///
/// # Arguments
/// * `request_json` - Subject ids, time zone, events, targets and evaluation time
///
/// # Returns
/// The [`AdherenceReport`] serialized as JSON
///
/// # Example
/// ```ignore
/// let report_json = evaluate_request_json(r#"{
///     "patient_id": "p1", "device_id": "brace-1", "timezone": "Europe/Berlin",
///     "events": [], "targets": [], "evaluated_at": "2024-03-08T06:00:00Z"
/// }"#.to_string())?;
/// ```
pub fn evaluate_request_json(request_json: String) -> Result<String, AdherenceError> {
    let request: EvaluationRequest = serde_json::from_str(&request_json)?;
    let engine = match request.config {
        Some(config) => AdherenceEngine::new(config)?,
        None => AdherenceEngine::default(),
    };
    let report = engine.evaluate(&request.input, request.evaluated_at)?;
    Ok(serde_json::to_string(&report)?)
}

/// The four-stage adherence engine
#[derive(Debug, Clone, Default)]
pub struct AdherenceEngine {
    config: EngineConfig,
}

impl AdherenceEngine {
    /// Create an engine after validating the configuration
    pub fn new(config: EngineConfig) -> Result<Self, AdherenceError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full pipeline for one subject
    pub fn evaluate(
        &self,
        input: &SubjectInput,
        evaluated_at: DateTime<Utc>,
    ) -> Result<AdherenceReport, AdherenceError> {
        let subject = input.subject();

        // Stage 1: Normalize events into daily records
        let normalized = Normalizer::new(self.config.normalizer.clone()).normalize(
            &subject,
            &input.events,
            &input.timezone,
            input.period,
        )?;
        let mut diagnostics = normalized.diagnostics;

        // Stage 2: Rolling compliance
        let series = ComplianceCalculator::new(self.config.compliance.clone()).rolling(
            &subject,
            &normalized.records,
            &input.targets,
        );
        diagnostics.merge(series.diagnostics);

        // Stage 3: Trend points
        let trend = TrendAnalyzer::analyze(&self.config.trend, &series.scores)?;

        // Stage 4: Alert on the latest period
        let alert = series.scores.last().and_then(|latest| {
            AlertEvaluator::new(self.config.alerts.clone()).evaluate(
                latest,
                trend.last(),
                evaluated_at,
            )
        });

        tracing::info!(
            subject = %subject,
            days = normalized.records.len(),
            scores = series.scores.len(),
            trend_points = trend.len(),
            alert = alert.as_ref().map(|a| a.severity.as_str()).unwrap_or("none"),
            issues = diagnostics.issues.len(),
            "evaluated adherence"
        );

        Ok(AdherenceReport {
            patient_id: subject.patient_id,
            device_id: subject.device_id,
            timezone: input.timezone.clone(),
            daily_records: normalized.records,
            scores: series.scores,
            trend,
            alert,
            diagnostics,
        })
    }

    /// Pull one subject's data from a store and evaluate it
    pub fn evaluate_from_store(
        &self,
        store: &dyn EventStore,
        subject: &SubjectKey,
        period: Option<DateRange>,
        evaluated_at: DateTime<Utc>,
    ) -> Result<AdherenceReport, AdherenceError> {
        let input = SubjectInput {
            patient_id: subject.patient_id.clone(),
            device_id: subject.device_id.clone(),
            timezone: store.device_timezone(subject)?,
            events: store.usage_events(subject)?,
            targets: store.prescription_targets(subject)?,
            period,
        };
        self.evaluate(&input, evaluated_at)
    }

    /// Evaluate every subject in a store, in subject order.
    ///
    /// A subject that fails is listed in the result's failures; the others
    /// are still evaluated. Only failing to list subjects fails the call.
    pub fn evaluate_store(
        &self,
        store: &dyn EventStore,
        period: Option<DateRange>,
        evaluated_at: DateTime<Utc>,
    ) -> Result<CohortEvaluation, AdherenceError> {
        let mut cohort = CohortEvaluation::default();
        for subject in store.subjects()? {
            let outcome = self.evaluate_from_store(store, &subject, period, evaluated_at);
            cohort.push(&subject, outcome);
        }

        tracing::info!(
            evaluated = cohort.summary.subjects_evaluated,
            failed = cohort.summary.subjects_failed,
            alerts = cohort.summary.alerts(),
            "evaluated cohort"
        );

        Ok(cohort)
    }
}
