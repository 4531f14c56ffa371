//! In-memory event store built from parsed records

use super::EventStore;
use crate::error::AdherenceError;
use crate::types::{PrescriptionTarget, SubjectKey, UsageEvent};
use std::collections::{BTreeMap, HashMap};

/// Event store holding records grouped by subject
#[derive(Debug, Clone)]
pub struct InMemoryEventStore {
    events: BTreeMap<SubjectKey, Vec<UsageEvent>>,
    targets: BTreeMap<SubjectKey, Vec<PrescriptionTarget>>,
    /// Per-device zone overrides, keyed by device id
    device_timezones: HashMap<String, String>,
    default_timezone: String,
}

impl InMemoryEventStore {
    /// Group events and targets by subject; devices default to `default_timezone`
    pub fn new(
        events: Vec<UsageEvent>,
        targets: Vec<PrescriptionTarget>,
        default_timezone: impl Into<String>,
    ) -> Self {
        let mut by_subject_events: BTreeMap<SubjectKey, Vec<UsageEvent>> = BTreeMap::new();
        for event in events {
            by_subject_events.entry(event.subject()).or_default().push(event);
        }

        let mut by_subject_targets: BTreeMap<SubjectKey, Vec<PrescriptionTarget>> =
            BTreeMap::new();
        for target in targets {
            by_subject_targets.entry(target.subject()).or_default().push(target);
        }

        Self {
            events: by_subject_events,
            targets: by_subject_targets,
            device_timezones: HashMap::new(),
            default_timezone: default_timezone.into(),
        }
    }

    /// Set the time zone of one device
    pub fn with_device_timezone(
        mut self,
        device_id: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        self.device_timezones.insert(device_id.into(), timezone.into());
        self
    }
}

impl EventStore for InMemoryEventStore {
    fn subjects(&self) -> Result<Vec<SubjectKey>, AdherenceError> {
        let mut subjects: Vec<SubjectKey> = self
            .events
            .keys()
            .chain(self.targets.keys())
            .cloned()
            .collect();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    fn usage_events(&self, subject: &SubjectKey) -> Result<Vec<UsageEvent>, AdherenceError> {
        Ok(self.events.get(subject).cloned().unwrap_or_default())
    }

    fn prescription_targets(
        &self,
        subject: &SubjectKey,
    ) -> Result<Vec<PrescriptionTarget>, AdherenceError> {
        Ok(self.targets.get(subject).cloned().unwrap_or_default())
    }

    fn device_timezone(&self, subject: &SubjectKey) -> Result<String, AdherenceError> {
        if !self.events.contains_key(subject) && !self.targets.contains_key(subject) {
            return Err(AdherenceError::UnknownSubject(subject.to_string()));
        }
        Ok(self
            .device_timezones
            .get(&subject.device_id)
            .cloned()
            .unwrap_or_else(|| self.default_timezone.clone()))
    }
}
