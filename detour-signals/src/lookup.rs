//! Locating slots relative to the traveller's clock.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};

use detour_core::time::to_trip_local;
use detour_core::{DaySchedule, TimeSlot, TripSchedule};

pub(crate) fn local_now(schedule: &TripSchedule, now: DateTime<Utc>) -> Result<NaiveDateTime> {
    to_trip_local(now, &schedule.timezone)
}

pub(crate) fn today<'s>(schedule: &'s TripSchedule, local: NaiveDateTime) -> Option<&'s DaySchedule> {
    schedule.day_for_date(local.date())
}

/// Slots of `day` that have not finished yet.
pub(crate) fn remaining<'d>(day: &'d DaySchedule, local: NaiveDateTime) -> impl Iterator<Item = &'d TimeSlot> {
    let cutoff = (day.date == local.date()).then_some(local.time());
    day.slots
        .iter()
        .filter(move |s| day.date > local.date() || cutoff.is_some_and(|t| s.end > t))
}

/// The slot under way, or the next one if the traveller is between slots.
pub(crate) fn current_slot(day: &DaySchedule, local: NaiveDateTime) -> Option<&TimeSlot> {
    remaining(day, local).next()
}

/// First remaining slot whose activity name or category mentions `needle`.
pub(crate) fn slot_named<'d>(day: &'d DaySchedule, local: NaiveDateTime, needle: &str) -> Option<&'d TimeSlot> {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    remaining(day, local).filter(|s| s.activity.is_some()).find(|s| {
        let name = s.activity_name().to_lowercase();
        let category = s.category().as_str();
        name.contains(&needle) || needle.contains(&name) || needle.contains(category)
    })
}
