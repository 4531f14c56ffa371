//! Daily wear normalization
//!
//! This module turns irregular usage events into one wear record per local
//! calendar day:
//! - Events crossing local midnight are split by overlap with each day
//! - Overlapping events are summed and clamped to the day cap
//! - Days without wear are emitted with zero minutes
//! - Malformed events are skipped and counted

use crate::config::NormalizerConfig;
use crate::error::{AdherenceError, DataQualityError};
use crate::types::{DailyWearRecord, DateRange, Diagnostics, SubjectKey, UsageEvent};
use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;

/// Result of normalizing one subject's events
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWear {
    pub records: Vec<DailyWearRecord>,
    pub diagnostics: Diagnostics,
}

/// Normalizer for converting usage events to daily wear records
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalize the events of one subject in the given IANA time zone.
    ///
    /// `period`, when given, widens the output so every day in it gets a
    /// record even if no event touched it.
    pub fn normalize(
        &self,
        subject: &SubjectKey,
        events: &[UsageEvent],
        timezone: &str,
        period: Option<DateRange>,
    ) -> Result<NormalizedWear, AdherenceError> {
        let tz = parse_timezone(timezone)?;
        let mut diagnostics = Diagnostics::default();
        let mut minutes_by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();

        // Summation order must not depend on input order
        let mut ordered: Vec<&UsageEvent> = events.iter().collect();
        ordered.sort_by(|a, b| {
            (a.start_timestamp, a.end_timestamp).cmp(&(b.start_timestamp, b.end_timestamp))
        });

        for event in ordered {
            if !subject.matches(&event.patient_id, &event.device_id) {
                diagnostics.record(DataQualityError::InvalidEvent {
                    event_id: event.event_id.clone(),
                    reason: format!(
                        "belongs to {}/{}, not {}",
                        event.patient_id, event.device_id, subject
                    ),
                });
                continue;
            }
            if let Err(issue) = event.validate() {
                diagnostics.record(issue);
                continue;
            }

            for (date, minutes) in split_by_local_day(event.start_timestamp, event.end_timestamp, &tz)
            {
                *minutes_by_day.entry(date).or_insert(0.0) += minutes;
            }
        }

        let touched = match (minutes_by_day.keys().next(), minutes_by_day.keys().next_back()) {
            (Some(first), Some(last)) => Some(DateRange::new(*first, *last)),
            _ => None,
        };
        let span = match (touched, period) {
            (Some(t), Some(p)) => Some(t.union(&p)),
            (t, p) => t.or(p),
        };

        let Some(span) = span else {
            tracing::debug!(subject = %subject, "no valid events and no period, nothing to normalize");
            return Ok(NormalizedWear {
                records: Vec::new(),
                diagnostics,
            });
        };

        let cap = self.config.day_cap_minutes;
        let records: Vec<DailyWearRecord> = span
            .days()
            .map(|date| {
                let raw = minutes_by_day.get(&date).copied().unwrap_or(0.0);
                let clamped = raw > cap;
                if clamped {
                    diagnostics.record(DataQualityError::DataIntegrity {
                        date,
                        raw_minutes: raw,
                        cap_minutes: cap,
                    });
                }
                DailyWearRecord {
                    patient_id: subject.patient_id.clone(),
                    device_id: subject.device_id.clone(),
                    date,
                    worn_minutes: raw.min(cap),
                    clamped,
                }
            })
            .collect();

        tracing::debug!(
            subject = %subject,
            days = records.len(),
            invalid_events = diagnostics.invalid_events,
            clamped_days = diagnostics.clamped_days,
            "normalized wear events"
        );

        Ok(NormalizedWear {
            records,
            diagnostics,
        })
    }
}

/// Parse an IANA time zone name
pub fn parse_timezone(timezone: &str) -> Result<Tz, AdherenceError> {
    timezone
        .parse::<Tz>()
        .map_err(|e| AdherenceError::InvalidTimezone(format!("{}: {}", timezone, e)))
}

/// Split `[start, end)` into minutes per local calendar day
fn split_by_local_day(start: DateTime<Utc>, end: DateTime<Utc>, tz: &Tz) -> Vec<(NaiveDate, f64)> {
    let mut parts = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let date = cursor.with_timezone(tz).date_naive();
        let next_day_start = date
            .succ_opt()
            .map(|next| start_of_local_day(tz, next))
            .unwrap_or(end);
        let segment_end = next_day_start.min(end);
        if segment_end <= cursor {
            break;
        }
        parts.push((date, minutes_between(cursor, segment_end)));
        cursor = segment_end;
    }

    parts
}

/// First instant of `date` in `tz`, stepping past a DST gap at midnight
fn start_of_local_day(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    for hours in 0..=3 {
        let candidate = midnight + Duration::hours(hours);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => continue,
        }
    }
    Utc.from_utc_datetime(&midnight)
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn subject() -> SubjectKey {
        SubjectKey::new("patient-1", "brace-1")
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(start: DateTime<Utc>, end: DateTime<Utc>) -> UsageEvent {
        UsageEvent::new(&subject(), start, end)
    }

    #[test]
    fn test_single_day_event() {
        let events = vec![event(utc(2024, 3, 1, 8, 0), utc(2024, 3, 1, 10, 30))];
        let out = Normalizer::default()
            .normalize(&subject(), &events, "UTC", None)
            .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].date, date(2024, 3, 1));
        assert!((out.records[0].worn_minutes - 150.0).abs() < 1e-9);
        assert!(out.diagnostics.is_clean());
    }

    #[test]
    fn test_midnight_split_is_proportional() {
        // 22:00 -> 02:00 UTC: 120 minutes on each side of midnight
        let events = vec![event(utc(2024, 3, 1, 22, 0), utc(2024, 3, 2, 2, 0))];
        let out = Normalizer::default()
            .normalize(&subject(), &events, "UTC", None)
            .unwrap();

        let minutes: Vec<_> = out.records.iter().map(|r| (r.date, r.worn_minutes)).collect();
        assert_eq!(
            minutes,
            vec![(date(2024, 3, 1), 120.0), (date(2024, 3, 2), 120.0)]
        );
    }

    #[test]
    fn test_local_timezone_day_boundaries() {
        // 03:00-05:00 UTC is 22:00-00:00 the previous evening in New York (EST)
        let events = vec![event(utc(2024, 1, 16, 3, 0), utc(2024, 1, 16, 5, 0))];
        let out = Normalizer::default()
            .normalize(&subject(), &events, "America/New_York", None)
            .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].date, date(2024, 1, 15));
        assert!((out.records[0].worn_minutes - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_overlapping_events_are_capped_and_flagged() {
        let events = vec![
            event(utc(2024, 3, 1, 0, 0), utc(2024, 3, 1, 23, 0)),
            event(utc(2024, 3, 1, 1, 0), utc(2024, 3, 1, 3, 0)),
        ];
        let out = Normalizer::default()
            .normalize(&subject(), &events, "UTC", None)
            .unwrap();

        assert_eq!(out.records.len(), 1);
        assert!((out.records[0].worn_minutes - 1440.0).abs() < 1e-9);
        assert!(out.records[0].clamped);
        assert_eq!(out.diagnostics.clamped_days, 1);
        assert!(matches!(
            out.diagnostics.issues[0],
            DataQualityError::DataIntegrity { raw_minutes, .. } if (raw_minutes - 1500.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_gap_days_are_zero_filled() {
        let events = vec![
            event(utc(2024, 3, 1, 8, 0), utc(2024, 3, 1, 9, 0)),
            event(utc(2024, 3, 4, 8, 0), utc(2024, 3, 4, 9, 0)),
        ];
        let out = Normalizer::default()
            .normalize(&subject(), &events, "UTC", None)
            .unwrap();

        let minutes: Vec<f64> = out.records.iter().map(|r| r.worn_minutes).collect();
        assert_eq!(minutes, vec![60.0, 0.0, 0.0, 60.0]);
    }

    #[test]
    fn test_invalid_events_are_skipped_and_counted() {
        crate::logging::init_test();
        let mut reversed = event(utc(2024, 3, 1, 9, 0), utc(2024, 3, 1, 8, 0));
        reversed.event_id = Some("reversed".to_string());
        let other = UsageEvent::new(
            &SubjectKey::new("patient-2", "brace-9"),
            utc(2024, 3, 1, 8, 0),
            utc(2024, 3, 1, 9, 0),
        );
        let events = vec![
            reversed,
            other,
            event(utc(2024, 3, 1, 10, 0), utc(2024, 3, 1, 10, 45)),
        ];

        let out = Normalizer::default()
            .normalize(&subject(), &events, "UTC", None)
            .unwrap();

        assert_eq!(out.diagnostics.invalid_events, 2);
        assert_eq!(out.records.len(), 1);
        assert!((out.records[0].worn_minutes - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_period_without_events_yields_zero_days() {
        let period = DateRange::new(date(2024, 3, 1), date(2024, 3, 7));
        let out = Normalizer::default()
            .normalize(&subject(), &[], "UTC", Some(period))
            .unwrap();

        assert_eq!(out.records.len(), 7);
        assert!(out.records.iter().all(|r| r.worn_minutes == 0.0 && !r.clamped));
    }

    #[test]
    fn test_no_events_no_period_is_empty() {
        let out = Normalizer::default()
            .normalize(&subject(), &[], "UTC", None)
            .unwrap();
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_normalize_is_idempotent_and_order_independent() {
        let events = vec![
            event(utc(2024, 3, 2, 20, 0), utc(2024, 3, 3, 4, 0)),
            event(utc(2024, 3, 1, 7, 15), utc(2024, 3, 1, 9, 40)),
            event(utc(2024, 3, 1, 8, 0), utc(2024, 3, 1, 12, 0)),
        ];
        let mut shuffled = events.clone();
        shuffled.reverse();

        let normalizer = Normalizer::default();
        let first = normalizer.normalize(&subject(), &events, "Europe/Berlin", None).unwrap();
        let second = normalizer.normalize(&subject(), &events, "Europe/Berlin", None).unwrap();
        let third = normalizer
            .normalize(&subject(), &shuffled, "Europe/Berlin", None)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_dst_spring_forward_day() {
        // 2024-03-10 in New York has 23 hours; a full-day event is 1380 minutes
        let tz = parse_timezone("America/New_York").unwrap();
        let start = start_of_local_day(&tz, date(2024, 3, 10));
        let end = start_of_local_day(&tz, date(2024, 3, 11));
        let events = vec![event(start, end)];

        let out = Normalizer::default()
            .normalize(&subject(), &events, "America/New_York", None)
            .unwrap();

        assert_eq!(out.records.len(), 1);
        assert!((out.records[0].worn_minutes - 1380.0).abs() < 1e-9);
    }

    #[test]
    fn test_dst_fall_back_day_hits_cap() {
        // 2024-11-03 in New York has 25 hours; one event covering it is 1500 minutes
        let tz = parse_timezone("America/New_York").unwrap();
        let start = start_of_local_day(&tz, date(2024, 11, 3));
        let end = start_of_local_day(&tz, date(2024, 11, 4));
        let events = vec![event(start, end)];

        let out = Normalizer::default()
            .normalize(&subject(), &events, "America/New_York", None)
            .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].worn_minutes, 1440.0);
        assert!(out.records[0].clamped);
        assert_eq!(out.diagnostics.clamped_days, 1);
    }

    #[test]
    fn test_unknown_timezone_fails_call() {
        let result = Normalizer::default().normalize(&subject(), &[], "Mars/Olympus", None);
        assert!(matches!(result, Err(AdherenceError::InvalidTimezone(_))));
    }
}
