//! Schedule Mutator: replays a change list over a schedule snapshot.
//!
//! The caller's schedule is never touched; the result is a fresh value that
//! shares untouched days with its input.

use chrono::NaiveTime;
use tracing::{debug, warn};

use crate::error::MutationError;
use crate::reshuffle::{ChangeType, ScheduleChange};
use crate::schedule::{ScheduleIssue, TimeSlot, TripSchedule};
use crate::time::add_minutes;

#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub schedule: TripSchedule,
    /// Non-fatal findings, e.g. a commute that no longer fits its gap.
    pub warnings: Vec<ScheduleIssue>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleMutator;

impl ScheduleMutator {
    pub fn apply(&self, schedule: &TripSchedule, changes: &[ScheduleChange]) -> Result<MutationOutcome, MutationError> {
        let mut next = schedule.clone();
        for change in changes {
            apply_one(&mut next, change)?;
        }

        let report = next.validate();
        if !report.is_valid() {
            warn!(trip = %schedule.trip_id, errors = report.errors.len(), "mutation rejected");
            return Err(MutationError::Invalid(report.errors));
        }
        debug!(trip = %schedule.trip_id, changes = changes.len(), warnings = report.warnings.len(), "mutation applied");

        Ok(MutationOutcome {
            schedule: next,
            warnings: report.warnings,
        })
    }
}

fn unknown_slot(change: &ScheduleChange) -> MutationError {
    MutationError::UnknownSlot {
        change_id: change.id.clone(),
        slot_id: change.slot_id.clone(),
    }
}

fn missing(change: &ScheduleChange, field: &'static str) -> MutationError {
    MutationError::MissingField {
        change_id: change.id.clone(),
        field,
    }
}

fn locate(schedule: &TripSchedule, change: &ScheduleChange) -> Result<u32, MutationError> {
    schedule
        .find_slot(&change.slot_id)
        .map(|(day, _)| day)
        .ok_or_else(|| unknown_slot(change))
}

fn slot_mut<'s>(schedule: &'s mut TripSchedule, day: u32, change: &ScheduleChange) -> Result<&'s mut TimeSlot, MutationError> {
    schedule
        .day_mut(day)
        .and_then(|d| d.slots.iter_mut().find(|s| s.id == change.slot_id))
        .ok_or_else(|| unknown_slot(change))
}

/// Resolve the new window from `after`, keeping whatever it leaves unset.
fn new_window(change: &ScheduleChange, slot: &TimeSlot) -> Result<(NaiveTime, NaiveTime), MutationError> {
    let start = change.after.start_time.unwrap_or(slot.start);
    let end = match (change.after.end_time, change.after.duration) {
        (Some(end), _) => Some(end),
        (None, Some(duration)) => add_minutes(start, duration),
        (None, None) => add_minutes(start, slot.duration_minutes()),
    };
    let end = end.ok_or_else(|| MutationError::OutOfDay {
        change_id: change.id.clone(),
        slot_id: change.slot_id.clone(),
    })?;
    Ok((start, end))
}

fn apply_one(schedule: &mut TripSchedule, change: &ScheduleChange) -> Result<(), MutationError> {
    match change.change_type {
        ChangeType::TimeShift | ChangeType::DurationChange | ChangeType::OrderSwap => {
            if change.change_type == ChangeType::TimeShift && change.after.start_time.is_none() {
                return Err(missing(change, "after.start_time"));
            }
            if change.change_type == ChangeType::DurationChange
                && change.after.duration.is_none()
                && change.after.end_time.is_none()
            {
                return Err(missing(change, "after.duration"));
            }
            let day = locate(schedule, change)?;
            let slot = slot_mut(schedule, day, change)?;
            let (start, end) = new_window(change, slot)?;
            slot.start = start;
            slot.end = end;
            if let Some(activity) = slot.activity.as_mut() {
                activity.duration_minutes = crate::time::minutes_between(start, end);
            }
            if let Some(d) = schedule.day_mut(day) {
                d.sort_slots();
            }
        }
        ChangeType::ActivityRemoved => {
            let day = locate(schedule, change)?;
            if let Some(d) = schedule.day_mut(day) {
                d.slots.retain(|s| s.id != change.slot_id);
            }
        }
        ChangeType::ActivityAdded => {
            if schedule.find_slot(&change.slot_id).is_some() {
                return Err(MutationError::DuplicateSlot {
                    change_id: change.id.clone(),
                    slot_id: change.slot_id.clone(),
                });
            }
            let day_number = change.after.day_number.ok_or_else(|| missing(change, "after.day_number"))?;
            let start = change.after.start_time.ok_or_else(|| missing(change, "after.start_time"))?;
            let end = change.after.end_time.ok_or_else(|| missing(change, "after.end_time"))?;
            let mut slot = TimeSlot::new(change.slot_id.clone(), start, end);
            slot.activity = change.after.activity.clone();
            let day = schedule.day_mut(day_number).ok_or_else(|| MutationError::UnknownDay {
                change_id: change.id.clone(),
                day_number,
            })?;
            day.slots.push(slot);
            day.sort_slots();
        }
        ChangeType::ActivityReplaced => {
            let activity = change.after.activity.clone().ok_or_else(|| missing(change, "after.activity"))?;
            let day = locate(schedule, change)?;
            let slot = slot_mut(schedule, day, change)?;
            if change.after.start_time.is_some() || change.after.end_time.is_some() {
                let (start, end) = new_window(change, slot)?;
                slot.start = start;
                slot.end = end;
            }
            slot.activity = Some(activity);
            slot.booking = None;
            if let Some(d) = schedule.day_mut(day) {
                d.sort_slots();
            }
        }
        ChangeType::DayMoved => {
            let target = change.after.day_number.ok_or_else(|| missing(change, "after.day_number"))?;
            if schedule.day(target).is_none() {
                return Err(MutationError::UnknownDay {
                    change_id: change.id.clone(),
                    day_number: target,
                });
            }
            let source = locate(schedule, change)?;
            let mut slot = {
                let day = schedule.day_mut(source).ok_or_else(|| unknown_slot(change))?;
                let pos = day.position(&change.slot_id).ok_or_else(|| unknown_slot(change))?;
                day.slots.remove(pos)
            };
            let (start, end) = new_window(change, &slot)?;
            slot.start = start;
            slot.end = end;
            slot.commute_from_previous = None;
            let day = schedule.day_mut(target).ok_or_else(|| MutationError::UnknownDay {
                change_id: change.id.clone(),
                day_number: target,
            })?;
            day.slots.push(slot);
            day.sort_slots();
        }
    }
    Ok(())
}
