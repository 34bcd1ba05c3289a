//! Schedule model: the per-day plan of time slots the engine reads and rewrites.
//!
//! Days are held behind `Arc` so that cloning a [`TripSchedule`] is a cheap
//! value copy; writers go through [`TripSchedule::day_mut`], which copies a day
//! only when another snapshot still shares it.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::time::minutes_between;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    Museum,
    Landmark,
    Park,
    Restaurant,
    Cafe,
    Shopping,
    Tour,
    Show,
    Nightlife,
    Market,
    Viewpoint,
    Wellness,
    Other,
}

impl ActivityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityCategory::Museum => "museum",
            ActivityCategory::Landmark => "landmark",
            ActivityCategory::Park => "park",
            ActivityCategory::Restaurant => "restaurant",
            ActivityCategory::Cafe => "cafe",
            ActivityCategory::Shopping => "shopping",
            ActivityCategory::Tour => "tour",
            ActivityCategory::Show => "show",
            ActivityCategory::Nightlife => "nightlife",
            ActivityCategory::Market => "market",
            ActivityCategory::Viewpoint => "viewpoint",
            ActivityCategory::Wellness => "wellness",
            ActivityCategory::Other => "other",
        }
    }

    /// Categories that are exposed to the weather unless flagged otherwise.
    pub fn is_outdoor_by_default(&self) -> bool {
        matches!(
            self,
            ActivityCategory::Park
                | ActivityCategory::Tour
                | ActivityCategory::Market
                | ActivityCategory::Viewpoint
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub name: String,
    pub category: ActivityCategory,
    /// Planned minutes on site.
    pub duration_minutes: i32,
    #[serde(default)]
    pub must_see: bool,
    #[serde(default)]
    pub outdoor: bool,
    /// Generation-time score. Only compared, never decomposed.
    #[serde(default)]
    pub score: f64,
}

impl Activity {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: ActivityCategory,
        duration_minutes: i32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            duration_minutes,
            must_see: false,
            outdoor: category.is_outdoor_by_default(),
            score: 0.0,
        }
    }

    pub fn with_must_see(mut self) -> Self {
        self.must_see = true;
        self
    }

    pub fn with_outdoor(mut self, outdoor: bool) -> Self {
        self.outdoor = outdoor;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommuteMode {
    Walk,
    Transit,
    Taxi,
    Drive,
}

/// Travel from the previous slot's venue into this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commute {
    pub mode: CommuteMode,
    pub duration_minutes: i32,
    /// Fastest realistic travel time (e.g. switching to a taxi).
    #[serde(default)]
    pub min_duration_minutes: Option<i32>,
}

impl Commute {
    pub fn new(mode: CommuteMode, duration_minutes: i32) -> Self {
        Self {
            mode,
            duration_minutes,
            min_duration_minutes: None,
        }
    }

    pub fn with_min(mut self, minutes: i32) -> Self {
        self.min_duration_minutes = Some(minutes);
        self
    }

    /// Minutes that can be squeezed out of this leg.
    pub fn compressible_minutes(&self) -> i32 {
        let floor = self
            .min_duration_minutes
            .unwrap_or(self.duration_minutes * 3 / 4)
            .clamp(0, self.duration_minutes);
        self.duration_minutes - floor
    }
}

/// A fixed external reservation attached to a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub reference: String,
    /// Latest acceptable arrival; defaults to slot start plus `grace_minutes`.
    #[serde(default)]
    pub latest_arrival: Option<NaiveTime>,
    #[serde(default)]
    pub grace_minutes: i32,
    /// `None` falls back to the category's booking flexibility.
    #[serde(default)]
    pub refundable: Option<bool>,
    #[serde(default)]
    pub cancellation_deadline: Option<chrono::NaiveDateTime>,
    #[serde(default)]
    pub cost: Option<f64>,
}

impl Booking {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            latest_arrival: None,
            grace_minutes: 0,
            refundable: None,
            cancellation_deadline: None,
            cost: None,
        }
    }

    pub fn refundable(mut self) -> Self {
        self.refundable = Some(true);
        self
    }

    pub fn non_refundable(mut self) -> Self {
        self.refundable = Some(false);
        self
    }

    pub fn with_grace(mut self, minutes: i32) -> Self {
        self.grace_minutes = minutes;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub activity: Option<Activity>,
    /// Ranked alternatives captured at generation time.
    #[serde(default)]
    pub alternatives: Vec<Activity>,
    #[serde(default)]
    pub commute_from_previous: Option<Commute>,
    #[serde(default)]
    pub booking: Option<Booking>,
    /// Locked slots are never moved or dropped without confirmation.
    #[serde(default)]
    pub locked: bool,
}

impl TimeSlot {
    pub fn new(id: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            activity: None,
            alternatives: vec![],
            commute_from_previous: None,
            booking: None,
            locked: false,
        }
    }

    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn with_alternative(mut self, activity: Activity) -> Self {
        self.alternatives.push(activity);
        self
    }

    pub fn with_commute(mut self, commute: Commute) -> Self {
        self.commute_from_previous = Some(commute);
        self
    }

    pub fn with_booking(mut self, booking: Booking) -> Self {
        self.booking = Some(booking);
        self
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn duration_minutes(&self) -> i32 {
        minutes_between(self.start, self.end)
    }

    pub fn commute_minutes(&self) -> i32 {
        self.commute_from_previous
            .as_ref()
            .map(|c| c.duration_minutes)
            .unwrap_or(0)
    }

    pub fn activity_name(&self) -> &str {
        self.activity
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or("free time")
    }

    pub fn category(&self) -> ActivityCategory {
        self.activity
            .as_ref()
            .map(|a| a.category)
            .unwrap_or(ActivityCategory::Other)
    }

    pub fn is_must_see(&self) -> bool {
        self.locked || self.activity.as_ref().is_some_and(|a| a.must_see)
    }

    pub fn is_outdoor(&self) -> bool {
        self.activity.as_ref().is_some_and(|a| a.outdoor)
    }

    /// Half-open overlap test on `[start, end)`.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub day_number: u32,
    pub date: NaiveDate,
    pub slots: Vec<TimeSlot>,
}

impl DaySchedule {
    pub fn new(day_number: u32, date: NaiveDate) -> Self {
        Self {
            day_number,
            date,
            slots: vec![],
        }
    }

    pub fn with_slot(mut self, slot: TimeSlot) -> Self {
        self.slots.push(slot);
        self.sort_slots();
        self
    }

    pub fn sort_slots(&mut self) {
        self.slots.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn position(&self, slot_id: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.id == slot_id)
    }

    pub fn slot(&self, slot_id: &str) -> Option<&TimeSlot> {
        self.slots.iter().find(|s| s.id == slot_id)
    }

    /// Index of the first slot that has not finished by `now`.
    pub fn first_remaining(&self, now: NaiveTime) -> Option<usize> {
        self.slots.iter().position(|s| s.end > now)
    }
}

/// Something wrong (or suspicious) about a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleIssue {
    DuplicateSlot { slot_id: String },
    InvertedWindow { day_number: u32, slot_id: String },
    Overlap { day_number: u32, first: String, second: String },
    CommuteDoesNotFit { day_number: u32, slot_id: String, gap_minutes: i32, commute_minutes: i32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub errors: Vec<ScheduleIssue>,
    pub warnings: Vec<ScheduleIssue>,
}

impl ScheduleReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One city's multi-day itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSchedule {
    pub trip_id: String,
    pub city: String,
    /// IANA timezone of the destination.
    pub timezone: String,
    pub days: Vec<Arc<DaySchedule>>,
}

impl TripSchedule {
    pub fn new(trip_id: impl Into<String>, city: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            trip_id: trip_id.into(),
            city: city.into(),
            timezone: timezone.into(),
            days: vec![],
        }
    }

    pub fn with_day(mut self, day: DaySchedule) -> Self {
        self.days.push(Arc::new(day));
        self.days.sort_by_key(|d| d.day_number);
        self
    }

    pub fn day(&self, day_number: u32) -> Option<&DaySchedule> {
        self.days
            .iter()
            .find(|d| d.day_number == day_number)
            .map(|d| d.as_ref())
    }

    /// Copy-on-write access to one day.
    pub fn day_mut(&mut self, day_number: u32) -> Option<&mut DaySchedule> {
        self.days
            .iter_mut()
            .find(|d| d.day_number == day_number)
            .map(Arc::make_mut)
    }

    pub fn day_for_date(&self, date: NaiveDate) -> Option<&DaySchedule> {
        self.days.iter().find(|d| d.date == date).map(|d| d.as_ref())
    }

    pub fn last_day_number(&self) -> Option<u32> {
        self.days.iter().map(|d| d.day_number).max()
    }

    /// Locate a slot anywhere in the trip.
    pub fn find_slot(&self, slot_id: &str) -> Option<(u32, &TimeSlot)> {
        self.days
            .iter()
            .find_map(|d| d.slot(slot_id).map(|s| (d.day_number, s)))
    }

    pub fn slot_count(&self) -> usize {
        self.days.iter().map(|d| d.slots.len()).sum()
    }

    /// Structural checks: unique ids, sane windows, no overlap (errors) and
    /// commute legs that fit their gap (warnings).
    pub fn validate(&self) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for day in &self.days {
            for slot in &day.slots {
                if !seen.insert(slot.id.as_str()) {
                    report.errors.push(ScheduleIssue::DuplicateSlot {
                        slot_id: slot.id.clone(),
                    });
                }
                if slot.end <= slot.start {
                    report.errors.push(ScheduleIssue::InvertedWindow {
                        day_number: day.day_number,
                        slot_id: slot.id.clone(),
                    });
                }
            }

            let mut ordered: Vec<&TimeSlot> = day.slots.iter().collect();
            ordered.sort_by_key(|s| s.start);

            for pair in ordered.windows(2) {
                let (prev, next) = (pair[0], pair[1]);
                if prev.overlaps(next) {
                    report.errors.push(ScheduleIssue::Overlap {
                        day_number: day.day_number,
                        first: prev.id.clone(),
                        second: next.id.clone(),
                    });
                    continue;
                }
                let gap = minutes_between(prev.end, next.start);
                let commute = next.commute_minutes();
                if commute > gap {
                    report.warnings.push(ScheduleIssue::CommuteDoesNotFit {
                        day_number: day.day_number,
                        slot_id: next.id.clone(),
                        gap_minutes: gap,
                        commute_minutes: commute,
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> DaySchedule {
        DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
            .with_slot(
                TimeSlot::new("s1", t(9, 0), t(11, 0))
                    .with_activity(Activity::new("a1", "Gulbenkian", ActivityCategory::Museum, 120)),
            )
            .with_slot(
                TimeSlot::new("s2", t(11, 15), t(12, 30))
                    .with_activity(Activity::new("a2", "Lunch", ActivityCategory::Restaurant, 75))
                    .with_commute(Commute::new(CommuteMode::Transit, 25)),
            )
    }

    #[test]
    fn commute_that_overruns_gap_is_a_warning() {
        let sched = TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(day());
        let report = sched.validate();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.warnings[0],
            ScheduleIssue::CommuteDoesNotFit { gap_minutes: 15, commute_minutes: 25, .. }
        ));
    }

    #[test]
    fn overlap_and_duplicates_are_errors() {
        let mut d = day();
        d.slots.push(TimeSlot::new("s1", t(10, 30), t(11, 30)));
        let sched = TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(d);
        let report = sched.validate();
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| matches!(e, ScheduleIssue::DuplicateSlot { .. })));
        assert!(report.errors.iter().any(|e| matches!(e, ScheduleIssue::Overlap { .. })));
    }

    #[test]
    fn clone_shares_days_until_written() {
        let original = TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(day());
        let mut copy = original.clone();
        assert!(Arc::ptr_eq(&original.days[0], &copy.days[0]));

        copy.day_mut(1).unwrap().slots.remove(0);
        assert!(!Arc::ptr_eq(&original.days[0], &copy.days[0]));
        assert_eq!(original.day(1).unwrap().slots.len(), 2);
        assert_eq!(copy.day(1).unwrap().slots.len(), 1);
    }

    #[test]
    fn default_compression_is_a_quarter_of_the_leg() {
        assert_eq!(Commute::new(CommuteMode::Walk, 20).compressible_minutes(), 5);
        assert_eq!(Commute::new(CommuteMode::Transit, 30).with_min(10).compressible_minutes(), 20);
    }
}
