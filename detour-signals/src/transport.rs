//! Transport estimation: a live travel time that runs over the planned
//! commute by at least the threshold becomes a `transport_delay` trigger.

use anyhow::Result;
use tracing::{debug, warn};

use detour_core::{TriggerContext, TriggerEvent, TriggerOrigin, TriggerSeverity, TripSchedule};

use crate::lookup::local_now;
use crate::types::TransportEstimate;

pub const DEFAULT_THRESHOLD_MINUTES: i32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct TransportEstimator {
    threshold_minutes: i32,
}

impl Default for TransportEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_MINUTES)
    }
}

impl TransportEstimator {
    pub fn new(threshold_minutes: i32) -> Self {
        Self {
            threshold_minutes: threshold_minutes.max(1),
        }
    }

    pub fn evaluate(&self, estimate: &TransportEstimate, schedule: &TripSchedule) -> Result<Option<TriggerEvent>> {
        let Some((day_number, slot)) = schedule.find_slot(&estimate.slot_id) else {
            warn!(slot = %estimate.slot_id, "transport estimate for unknown slot");
            return Ok(None);
        };

        let local = local_now(schedule, estimate.observed_at)?;
        let started = schedule
            .day(day_number)
            .is_some_and(|d| d.date < local.date() || (d.date == local.date() && slot.start <= local.time()));
        if started {
            debug!(slot = %slot.id, "commute already behind the traveller");
            return Ok(None);
        }

        let delay = estimate.estimated_minutes - slot.commute_minutes();
        if delay < self.threshold_minutes {
            return Ok(None);
        }

        let severity = match delay {
            d if d >= 60 => TriggerSeverity::High,
            d if d >= 30 => TriggerSeverity::Medium,
            _ => TriggerSeverity::Low,
        };
        let trigger = TriggerEvent::new(
            TriggerContext::TransportDelay {
                mode: estimate.mode,
                delay_minutes: delay,
                line: estimate.line.clone(),
            },
            severity,
            TriggerOrigin::Transport,
            estimate.observed_at,
        )
        .with_slot(slot.id.as_str());
        trigger.validate()?;
        Ok(Some(trigger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use detour_core::{Activity, ActivityCategory, Commute, CommuteMode, DaySchedule, TimeSlot, TriggerContext};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn schedule() -> TripSchedule {
        TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap()).with_slot(
                TimeSlot::new("belem", t(14, 0), t(16, 0))
                    .with_activity(Activity::new("b", "Belem Tower", ActivityCategory::Landmark, 120))
                    .with_commute(Commute::new(CommuteMode::Transit, 25)),
            ),
        )
    }

    fn estimate(minutes: i32, hour: u32) -> TransportEstimate {
        TransportEstimate {
            observed_at: Utc.with_ymd_and_hms(2026, 5, 2, hour - 1, 30, 0).unwrap(),
            slot_id: "belem".into(),
            mode: CommuteMode::Transit,
            estimated_minutes: minutes,
            line: Some("tram 15E".into()),
        }
    }

    #[test]
    fn test_overrun_beyond_threshold() {
        let trigger = TransportEstimator::default()
            .evaluate(&estimate(60, 13), &schedule())
            .unwrap()
            .unwrap();
        assert_eq!(trigger.affected_slot_ids, vec!["belem"]);
        assert_eq!(trigger.severity, TriggerSeverity::Medium);
        assert!(matches!(trigger.context, TriggerContext::TransportDelay { delay_minutes: 35, .. }));
    }

    #[test]
    fn test_small_overrun_and_past_commutes_ignored() {
        let est = TransportEstimator::default();
        assert!(est.evaluate(&estimate(28, 13), &schedule()).unwrap().is_none());
        assert!(est.evaluate(&estimate(60, 15), &schedule()).unwrap().is_none());
    }
}
