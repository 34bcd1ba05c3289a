//! Weather delta detection: compares consecutive snapshots and only speaks up
//! when conditions cross into (or escalate within) adverse territory.

use anyhow::Result;
use tracing::debug;

use detour_core::{TriggerContext, TriggerEvent, TriggerOrigin, TriggerSeverity, TripSchedule, WeatherSensitivity};

use crate::lookup::{local_now, remaining};
use crate::types::WeatherSnapshot;

#[derive(Debug, Clone)]
pub struct WeatherDeltaDetector {
    sensitivity: WeatherSensitivity,
    last: Option<WeatherSnapshot>,
}

impl WeatherDeltaDetector {
    pub fn new(sensitivity: WeatherSensitivity) -> Self {
        Self {
            sensitivity,
            last: None,
        }
    }

    pub fn last(&self) -> Option<&WeatherSnapshot> {
        self.last.as_ref()
    }

    fn is_adverse(&self, s: &WeatherSnapshot) -> bool {
        self.sensitivity
            .is_adverse(s.condition, s.precipitation_probability, s.temperature_c, s.wind_kph)
    }

    /// Feed the newest snapshot. Returns a `weather_change` trigger naming the
    /// outdoor slots still ahead on the affected day, or `None` when nothing
    /// crossed a threshold.
    pub fn observe(&mut self, snapshot: WeatherSnapshot, schedule: &TripSchedule) -> Result<Option<TriggerEvent>> {
        let was_adverse = self.last.as_ref().is_some_and(|s| self.is_adverse(s));
        let was_severe = self.last.as_ref().is_some_and(|s| s.condition.is_severe());
        let adverse = self.is_adverse(&snapshot);
        let severe = snapshot.condition.is_severe();
        self.last = Some(snapshot.clone());

        if !adverse {
            return Ok(None);
        }
        if was_adverse && (was_severe || !severe) {
            debug!(condition = ?snapshot.condition, "weather still adverse, already reported");
            return Ok(None);
        }

        let local = local_now(schedule, snapshot.observed_at)?;
        let day = match snapshot.day_number {
            Some(n) => schedule.day(n),
            None => schedule.day_for_date(local.date()),
        };
        let Some(day) = day else {
            debug!(day = ?snapshot.day_number, "forecast day not on the schedule");
            return Ok(None);
        };

        let outdoor: Vec<&str> = remaining(day, local)
            .filter(|s| s.is_outdoor())
            .map(|s| s.id.as_str())
            .collect();
        if outdoor.is_empty() {
            debug!(day = day.day_number, "no outdoor plans left to protect");
            return Ok(None);
        }

        let severity = if severe {
            TriggerSeverity::High
        } else {
            TriggerSeverity::Medium
        };
        let trigger = TriggerEvent::new(
            TriggerContext::WeatherChange {
                condition: snapshot.condition,
                precipitation_probability: snapshot.precipitation_probability,
                temperature_c: snapshot.temperature_c,
                wind_kph: snapshot.wind_kph,
                day_number: snapshot.day_number,
            },
            severity,
            TriggerOrigin::Weather,
            snapshot.observed_at,
        )
        .with_slots(outdoor);
        trigger.validate()?;
        Ok(Some(trigger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
    use detour_core::{Activity, ActivityCategory, DaySchedule, TimeSlot, WeatherCondition};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        // Lisbon, UTC+1 in May.
        Utc.with_ymd_and_hms(2026, 5, 2, h - 1, m, 0).unwrap()
    }

    fn schedule() -> TripSchedule {
        TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
                .with_slot(
                    TimeSlot::new("museum", t(9, 0), t(11, 0))
                        .with_activity(Activity::new("m", "Gulbenkian", ActivityCategory::Museum, 120)),
                )
                .with_slot(
                    TimeSlot::new("park", t(11, 30), t(12, 30))
                        .with_activity(Activity::new("p", "Estrela Garden", ActivityCategory::Park, 60)),
                )
                .with_slot(
                    TimeSlot::new("viewpoint", t(17, 0), t(18, 0))
                        .with_activity(Activity::new("v", "Miradouro", ActivityCategory::Viewpoint, 60)),
                ),
        )
    }

    fn snapshot(condition: WeatherCondition, rain: u8, observed_at: DateTime<Utc>) -> WeatherSnapshot {
        WeatherSnapshot {
            observed_at,
            condition,
            precipitation_probability: rain,
            temperature_c: 18.0,
            wind_kph: 10.0,
            day_number: None,
        }
    }

    #[test]
    fn test_crossing_into_rain_flags_outdoor_slots() {
        let sched = schedule();
        let mut detector = WeatherDeltaDetector::new(WeatherSensitivity::default());
        assert!(detector
            .observe(snapshot(WeatherCondition::Cloudy, 20, at(8, 0)), &sched)
            .unwrap()
            .is_none());

        let trigger = detector
            .observe(snapshot(WeatherCondition::Rain, 80, at(12, 0)), &sched)
            .unwrap()
            .unwrap();
        assert_eq!(trigger.severity, TriggerSeverity::Medium);
        // The park is already under way at noon; both outdoor slots are still ahead of their end.
        assert_eq!(trigger.affected_slot_ids, vec!["park", "viewpoint"]);
    }

    #[test]
    fn test_persisting_rain_is_reported_once() {
        let sched = schedule();
        let mut detector = WeatherDeltaDetector::new(WeatherSensitivity::default());
        assert!(detector
            .observe(snapshot(WeatherCondition::Rain, 80, at(9, 0)), &sched)
            .unwrap()
            .is_some());
        assert!(detector
            .observe(snapshot(WeatherCondition::Rain, 85, at(9, 15)), &sched)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_escalation_to_storm_is_reported() {
        let sched = schedule();
        let mut detector = WeatherDeltaDetector::new(WeatherSensitivity::default());
        detector
            .observe(snapshot(WeatherCondition::Rain, 80, at(9, 0)), &sched)
            .unwrap();
        let trigger = detector
            .observe(snapshot(WeatherCondition::Thunderstorm, 95, at(9, 30)), &sched)
            .unwrap()
            .unwrap();
        assert_eq!(trigger.severity, TriggerSeverity::High);
    }

    #[test]
    fn test_no_outdoor_plans_left() {
        let sched = schedule();
        let mut detector = WeatherDeltaDetector::new(WeatherSensitivity::default());
        assert!(detector
            .observe(snapshot(WeatherCondition::Rain, 80, at(19, 0)), &sched)
            .unwrap()
            .is_none());
        assert_eq!(detector.last().unwrap().precipitation_probability, 80);
    }
}
