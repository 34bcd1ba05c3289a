//! Per-category flexibility defaults and per-booking constraints.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::schedule::{ActivityCategory, TimeSlot, TripSchedule};
use crate::time::add_minutes;

/// How forgiving a category's typical reservation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingFlexibility {
    Flexible,
    FreeCancellation { hours_before: i64 },
    NonRefundable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFlexibility {
    pub can_shorten: bool,
    /// Minutes below which the activity stops being worth it.
    pub min_duration: i32,
    pub max_shorten_percent: i32,
    pub can_skip: bool,
    /// Lower is skipped first.
    pub skip_priority: u8,
    pub can_swap_with: Vec<ActivityCategory>,
    pub can_defer: bool,
    pub defer_days: u32,
    pub booking_flexibility: BookingFlexibility,
}

impl ActivityFlexibility {
    /// Minutes this activity can give up given its planned duration.
    pub fn max_shorten_minutes(&self, duration: i32) -> i32 {
        if !self.can_shorten || duration <= 0 {
            return 0;
        }
        let by_percent = duration * self.max_shorten_percent / 100;
        let by_floor = duration - self.min_duration;
        by_percent.min(by_floor).max(0)
    }

    pub fn swaps_with(&self, category: ActivityCategory) -> bool {
        self.can_swap_with.contains(&category)
    }

    pub fn defaults_for(category: ActivityCategory) -> Self {
        use ActivityCategory::*;

        let (can_shorten, min_duration, max_shorten_percent) = match category {
            Museum => (true, 60, 30),
            Landmark => (true, 30, 40),
            Park | Shopping | Market | Viewpoint | Cafe | Other => (true, 15, 50),
            Restaurant => (true, 45, 25),
            Nightlife => (true, 60, 40),
            Wellness => (true, 45, 30),
            Tour | Show => (false, 0, 0),
        };

        let (can_skip, skip_priority) = match category {
            Cafe | Shopping | Other => (true, 1),
            Park | Market | Viewpoint | Nightlife => (true, 2),
            Restaurant | Wellness => (true, 3),
            Landmark => (true, 4),
            Museum => (true, 5),
            Tour => (true, 6),
            Show => (false, 9),
        };

        let can_swap_with = match category {
            Museum => vec![Museum, Landmark, Shopping, Cafe],
            Landmark => vec![Landmark, Museum, Viewpoint, Park, Shopping],
            Park => vec![Park, Viewpoint, Market, Landmark],
            Restaurant => vec![Restaurant, Cafe],
            Cafe => vec![Cafe, Restaurant, Shopping, Market],
            Shopping => vec![Shopping, Market, Cafe, Museum, Landmark],
            Nightlife => vec![Nightlife, Restaurant],
            Market => vec![Market, Shopping, Park, Cafe],
            Viewpoint => vec![Viewpoint, Park, Landmark],
            Wellness => vec![Wellness, Cafe],
            Other => vec![Other, Cafe, Shopping],
            Tour | Show => vec![],
        };

        let (can_defer, defer_days) = match category {
            Park | Shopping | Market | Viewpoint => (true, 3),
            Museum | Landmark | Nightlife | Wellness => (true, 2),
            Tour | Other => (true, 1),
            Restaurant | Cafe | Show => (false, 0),
        };

        let booking_flexibility = match category {
            Tour | Show => BookingFlexibility::NonRefundable,
            Restaurant => BookingFlexibility::FreeCancellation { hours_before: 2 },
            Museum | Landmark | Wellness => BookingFlexibility::FreeCancellation { hours_before: 24 },
            _ => BookingFlexibility::Flexible,
        };

        Self {
            can_shorten,
            min_duration,
            max_shorten_percent,
            can_skip,
            skip_priority,
            can_swap_with,
            can_defer,
            defer_days,
            booking_flexibility,
        }
    }
}

/// Category defaults plus caller-supplied overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexibilityTable {
    #[serde(default)]
    overrides: HashMap<ActivityCategory, ActivityFlexibility>,
}

impl FlexibilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, category: ActivityCategory, flex: ActivityFlexibility) -> Self {
        self.overrides.insert(category, flex);
        self
    }

    pub fn for_category(&self, category: ActivityCategory) -> ActivityFlexibility {
        self.overrides
            .get(&category)
            .cloned()
            .unwrap_or_else(|| ActivityFlexibility::defaults_for(category))
    }

    /// Flexibility as it applies to a concrete slot: reservations and locks
    /// pin a slot to its day.
    pub fn for_slot(&self, slot: &TimeSlot) -> ActivityFlexibility {
        let mut flex = self.for_category(slot.category());
        if slot.booking.is_some() || slot.locked {
            flex.can_defer = false;
            flex.can_swap_with.clear();
        }
        if slot.booking.is_some() {
            flex.can_skip = false;
        }
        flex
    }
}

/// A reservation as the analyzer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConstraint {
    pub slot_id: String,
    pub day_number: u32,
    pub reference: String,
    pub activity_name: String,
    pub scheduled_start: NaiveTime,
    pub latest_arrival: NaiveTime,
    pub refundable: bool,
    pub cancellation_deadline: Option<NaiveDateTime>,
}

impl BookingConstraint {
    /// Collect every reservation in the trip, filling gaps from category defaults.
    pub fn from_schedule(schedule: &TripSchedule, table: &FlexibilityTable) -> Vec<BookingConstraint> {
        let mut out = Vec::new();
        for day in &schedule.days {
            for slot in &day.slots {
                let Some(booking) = slot.booking.as_ref() else { continue };
                let flex = table.for_category(slot.category());

                let latest_arrival = booking
                    .latest_arrival
                    .or_else(|| add_minutes(slot.start, booking.grace_minutes))
                    .unwrap_or(slot.start);

                let refundable = booking.refundable.unwrap_or(matches!(
                    flex.booking_flexibility,
                    BookingFlexibility::Flexible | BookingFlexibility::FreeCancellation { .. }
                ));

                let cancellation_deadline = booking.cancellation_deadline.or(match flex.booking_flexibility {
                    BookingFlexibility::FreeCancellation { hours_before } if refundable => {
                        Some(day.date.and_time(slot.start) - Duration::hours(hours_before))
                    }
                    _ => None,
                });

                out.push(BookingConstraint {
                    slot_id: slot.id.clone(),
                    day_number: day.day_number,
                    reference: booking.reference.clone(),
                    activity_name: slot.activity_name().to_string(),
                    scheduled_start: slot.start,
                    latest_arrival,
                    refundable,
                    cancellation_deadline,
                });
            }
        }
        out
    }

    /// Whether the booking can still be cancelled without penalty at `now`.
    pub fn can_cancel_free(&self, now: NaiveDateTime) -> bool {
        if !self.refundable {
            return false;
        }
        match self.cancellation_deadline {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Activity, Booking, DaySchedule};
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn museum_shortening_is_capped_by_percent() {
        let flex = ActivityFlexibility::defaults_for(ActivityCategory::Museum);
        assert_eq!(flex.max_shorten_minutes(120), 36);
        // Floor wins for short visits.
        assert_eq!(flex.max_shorten_minutes(75), 15);
        assert_eq!(flex.max_shorten_minutes(50), 0);
    }

    #[test]
    fn shows_cannot_be_shortened_or_skipped() {
        let flex = ActivityFlexibility::defaults_for(ActivityCategory::Show);
        assert_eq!(flex.max_shorten_minutes(120), 0);
        assert!(!flex.can_skip);
    }

    #[test]
    fn booked_slot_is_pinned() {
        let slot = TimeSlot::new("s1", t(19, 0), t(21, 0))
            .with_activity(Activity::new("r", "Dinner", ActivityCategory::Restaurant, 120))
            .with_booking(Booking::new("R-1"));
        let flex = FlexibilityTable::new().for_slot(&slot);
        assert!(!flex.can_skip);
        assert!(!flex.can_defer);
    }

    #[test]
    fn booking_constraints_derive_latest_arrival_and_deadline() {
        let date = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
        let sched = TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, date).with_slot(
                TimeSlot::new("s1", t(19, 0), t(21, 0))
                    .with_activity(Activity::new("r", "Dinner", ActivityCategory::Restaurant, 120))
                    .with_booking(Booking::new("R-1").with_grace(15)),
            ),
        );
        let constraints = BookingConstraint::from_schedule(&sched, &FlexibilityTable::new());
        assert_eq!(constraints.len(), 1);
        let c = &constraints[0];
        assert_eq!(c.latest_arrival, t(19, 15));
        assert!(c.refundable);
        assert_eq!(c.cancellation_deadline, Some(date.and_time(t(17, 0))));
        assert!(c.can_cancel_free(date.and_time(t(16, 0))));
        assert!(!c.can_cancel_free(date.and_time(t(18, 0))));
    }

    #[test]
    fn explicit_non_refundable_wins_over_category() {
        let date = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
        let sched = TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, date).with_slot(
                TimeSlot::new("s1", t(19, 0), t(21, 0))
                    .with_activity(Activity::new("r", "Dinner", ActivityCategory::Restaurant, 120))
                    .with_booking(Booking::new("R-1").non_refundable()),
            ),
        );
        let c = &BookingConstraint::from_schedule(&sched, &FlexibilityTable::new())[0];
        assert!(!c.refundable);
        assert_eq!(c.cancellation_deadline, None);
        assert!(!c.can_cancel_free(date.and_time(t(8, 0))));
    }
}
