//! Venue status watching: a venue flipping to closed becomes a `closure`
//! trigger for every remaining slot that visits it.

use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use detour_core::{TriggerContext, TriggerEvent, TriggerOrigin, TriggerSeverity, TripSchedule};

use crate::lookup::{local_now, remaining, today};
use crate::types::VenueStatus;

#[derive(Debug, Clone, Default)]
pub struct VenueWatcher {
    /// Lowercased venue names already reported closed.
    reported: HashSet<String>,
}

impl VenueWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, status: &VenueStatus, schedule: &TripSchedule) -> Result<Option<TriggerEvent>> {
        let key = status.venue.trim().to_lowercase();
        if status.open {
            if self.reported.remove(&key) {
                debug!(venue = %status.venue, "venue reopened");
            }
            return Ok(None);
        }
        if self.reported.contains(&key) {
            return Ok(None);
        }

        let local = local_now(schedule, status.observed_at)?;
        let Some(day) = today(schedule, local) else {
            return Ok(None);
        };
        let hits: Vec<_> = remaining(day, local)
            .filter(|s| s.activity.as_ref().is_some_and(|a| a.name.trim().to_lowercase() == key))
            .collect();
        if hits.is_empty() {
            debug!(venue = %status.venue, "closed venue is not on today's plan");
            return Ok(None);
        }

        let severity = if hits.iter().any(|s| s.booking.is_some()) {
            TriggerSeverity::High
        } else {
            TriggerSeverity::Medium
        };
        let trigger = TriggerEvent::new(
            TriggerContext::Closure {
                venue: status.venue.clone(),
                reason: status.reason.clone().unwrap_or_else(|| "closed".to_string()),
                reopens_at: status.reopens_at,
            },
            severity,
            TriggerOrigin::Venue,
            status.observed_at,
        )
        .with_slots(hits.iter().map(|s| s.id.as_str()));
        trigger.validate()?;

        self.reported.insert(key);
        Ok(Some(trigger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use detour_core::{Activity, ActivityCategory, Booking, DaySchedule, TimeSlot};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn schedule() -> TripSchedule {
        TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap()).with_slot(
                TimeSlot::new("lunch", t(12, 30), t(14, 0))
                    .with_activity(Activity::new("l", "Taberna da Rua", ActivityCategory::Restaurant, 90))
                    .with_booking(Booking::new("TAB-2291")),
            ),
        )
    }

    fn status(open: bool) -> VenueStatus {
        VenueStatus {
            observed_at: Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap(),
            venue: "taberna da rua".into(),
            open,
            reason: Some("kitchen fire".into()),
            reopens_at: None,
        }
    }

    #[test]
    fn test_closure_reported_once_until_reopened() {
        let sched = schedule();
        let mut watcher = VenueWatcher::new();

        let trigger = watcher.observe(&status(false), &sched).unwrap().unwrap();
        assert_eq!(trigger.affected_slot_ids, vec!["lunch"]);
        assert_eq!(trigger.severity, TriggerSeverity::High);
        assert!(watcher.observe(&status(false), &sched).unwrap().is_none());

        assert!(watcher.observe(&status(true), &sched).unwrap().is_none());
        assert!(watcher.observe(&status(false), &sched).unwrap().is_some());
    }

    #[test]
    fn test_unplanned_venue_is_ignored() {
        let mut s = status(false);
        s.venue = "Somewhere Else".into();
        assert!(VenueWatcher::new().observe(&s, &schedule()).unwrap().is_none());
    }
}
