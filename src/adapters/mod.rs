//! Event store adapters
//!
//! The engine never reads storage itself. An [`EventStore`] hands it the slice
//! of usage events, prescription targets and the device time zone for one
//! subject at a time.

mod memory;

pub use memory::InMemoryEventStore;

use crate::error::AdherenceError;
use crate::types::{PrescriptionTarget, SubjectKey, UsageEvent};

/// Trait for sources of raw adherence data
pub trait EventStore {
    /// Subjects with any data in the store
    fn subjects(&self) -> Result<Vec<SubjectKey>, AdherenceError>;

    /// Usage events recorded for a subject, in any order
    fn usage_events(&self, subject: &SubjectKey) -> Result<Vec<UsageEvent>, AdherenceError>;

    /// Prescription targets for a subject
    fn prescription_targets(
        &self,
        subject: &SubjectKey,
    ) -> Result<Vec<PrescriptionTarget>, AdherenceError>;

    /// IANA time zone the device reports in
    fn device_timezone(&self, subject: &SubjectKey) -> Result<String, AdherenceError>;
}
