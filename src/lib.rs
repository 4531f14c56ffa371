//! Ortho Adherence - wear-time analytics engine for orthotic devices
//!
//! The engine turns raw device usage events into clinical adherence signals
//! through a deterministic pipeline: event normalization → rolling compliance
//! → trend analysis → alert evaluation.
//!
//! Whole stores are evaluated subject by subject into a [`CohortEvaluation`]
//! that keeps failures apart from reports and totals alerts by severity.
//!
//! Every stage is a pure function of its inputs. The engine keeps no state
//! between calls; storage, dispatch of alerts and rendering belong to the
//! caller.

pub mod adapters;
pub mod alert;
pub mod cohort;
pub mod compliance;
pub mod config;
pub mod error;
pub mod logging;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod trend;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use adapters::{EventStore, InMemoryEventStore};
pub use alert::AlertEvaluator;
pub use cohort::{CohortEvaluation, CohortSummary, SubjectFailure};
pub use compliance::ComplianceCalculator;
pub use config::EngineConfig;
pub use error::{AdherenceError, DataQualityError};
pub use normalizer::Normalizer;
pub use pipeline::{evaluate_request_json, AdherenceEngine, EvaluationRequest, SubjectInput};
pub use schema::RecordParser;
pub use trend::TrendAnalyzer;
pub use types::{
    AdherenceReport, Alert, ComplianceScore, DailyWearRecord, DateRange, Diagnostics,
    PrescriptionTarget, Severity, SubjectKey, TrendPoint, UsageEvent,
};

/// Engine version embedded in CLI reports
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for CLI reports
pub const PRODUCER_NAME: &str = "ortho-adherence";
