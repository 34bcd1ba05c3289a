//! Execution/History Controller: sole owner of the live schedule.
//!
//! Every command that changes what the traveller will do next bumps
//! `version`. The auto-apply countdown remembers the version it was started
//! under and only fires if nothing has happened since, so a user action always
//! wins a race with the timer.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ReshuffleConfig;
use crate::engine::CheckTriggersResponse;
use crate::error::{ControllerError, UndoFailure};
use crate::mutator::ScheduleMutator;
use crate::reshuffle::{ReshuffleResult, ReshuffleStrategy, ScheduleChange};
use crate::schedule::{Activity, TripSchedule};
use crate::status::ScheduleStatus;
use crate::trigger::{TriggerContext, TriggerEvent, TriggerOrigin, TriggerSeverity, UserRequestAction};

/// One applied reshuffle. Snapshots are full values; days are shared
/// copy-on-write so keeping them is cheap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReshuffleEvent {
    pub id: String,
    pub triggered_at: DateTime<Utc>,
    pub trigger: Option<TriggerEvent>,
    pub result_id: String,
    pub strategy_used: ReshuffleStrategy,
    pub changes_made: Vec<ScheduleChange>,
    pub previous_schedule: TripSchedule,
    pub new_schedule: TripSchedule,
    pub user_confirmed: bool,
    pub undo_available: bool,
    #[serde(default)]
    pub undone_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedActivity {
    pub slot_id: String,
    pub activity: Option<Activity>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub actual_duration_minutes: i64,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedActivity {
    pub slot_id: String,
    pub activity: Option<Activity>,
    pub skipped_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub deferred_to: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InProgressActivity {
    pub slot_id: String,
    pub activity: Option<Activity>,
    pub started_at: DateTime<Utc>,
    pub expected_end: DateTime<Utc>,
    #[serde(default)]
    pub extended_by: Option<i32>,
}

/// A countdown armed for the pending suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    pub version: u64,
    pub seconds: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSuggestion {
    pub result: ReshuffleResult,
    pub trigger: Option<TriggerEvent>,
    pub countdown: Option<Countdown>,
}

/// Proof that the caller holds the processing guard.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingTicket {
    pub version: u64,
    /// The schedule the check must run against.
    pub schedule: TripSchedule,
}

/// What a trigger check left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    NothingToDo,
    AwaitingConfirmation,
    CountdownStarted { version: u64, seconds: u64 },
}

/// Observer notifications, drained by the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControllerNotice {
    StatusChanged { from: ScheduleStatus, to: ScheduleStatus },
    SuggestionPending { result_id: String, requires_confirmation: bool },
    CountdownStarted { result_id: String, version: u64, seconds: u64 },
    CountdownCancelled { result_id: String },
    ReshuffleApplied { event_id: String, result_id: String, strategy: ReshuffleStrategy, user_confirmed: bool },
    ReshuffleRejected { result_id: String },
    ReshuffleUndone { event_id: String },
    UndoExpired { event_ids: Vec<String> },
    AutoApplyFailed { result_id: String, reason: String },
    ActivityStarted { slot_id: String },
    ActivityCompleted { slot_id: String },
    ActivitySkipped { slot_id: String },
    ActivityExtended { slot_id: String, minutes: i32 },
}

#[derive(Debug, Clone)]
struct UndoEntry {
    event_id: String,
    applied_at: DateTime<Utc>,
    previous_schedule: TripSchedule,
}

#[derive(Debug, Clone)]
pub struct ExecutionController {
    config: ReshuffleConfig,
    original: TripSchedule,
    current: TripSchedule,
    status: ScheduleStatus,
    delay_minutes: i32,
    active_triggers: Vec<TriggerEvent>,
    pending: Option<PendingSuggestion>,
    history: VecDeque<ReshuffleEvent>,
    undo_stack: VecDeque<UndoEntry>,
    in_progress: Option<InProgressActivity>,
    completed: Vec<CompletedActivity>,
    skipped: Vec<SkippedActivity>,
    version: u64,
    processing: bool,
    notices: Vec<ControllerNotice>,
}

impl ExecutionController {
    pub fn new(schedule: TripSchedule, config: ReshuffleConfig) -> Self {
        Self {
            config,
            original: schedule.clone(),
            current: schedule,
            status: ScheduleStatus::OnTrack,
            delay_minutes: 0,
            active_triggers: Vec::new(),
            pending: None,
            history: VecDeque::new(),
            undo_stack: VecDeque::new(),
            in_progress: None,
            completed: Vec::new(),
            skipped: Vec::new(),
            version: 0,
            processing: false,
            notices: Vec::new(),
        }
    }

    pub fn config(&self) -> &ReshuffleConfig {
        &self.config
    }

    pub fn current_schedule(&self) -> &TripSchedule {
        &self.current
    }

    pub fn original_schedule(&self) -> &TripSchedule {
        &self.original
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status
    }

    pub fn delay_minutes(&self) -> i32 {
        self.delay_minutes
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn pending(&self) -> Option<&PendingSuggestion> {
        self.pending.as_ref()
    }

    pub fn active_triggers(&self) -> &[TriggerEvent] {
        &self.active_triggers
    }

    pub fn history(&self) -> impl Iterator<Item = &ReshuffleEvent> {
        self.history.iter()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Event ids on the undo stack, oldest first.
    pub fn undo_event_ids(&self) -> Vec<&str> {
        self.undo_stack.iter().map(|e| e.event_id.as_str()).collect()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn in_progress(&self) -> Option<&InProgressActivity> {
        self.in_progress.as_ref()
    }

    pub fn completed(&self) -> &[CompletedActivity] {
        &self.completed
    }

    pub fn skipped(&self) -> &[SkippedActivity] {
        &self.skipped
    }

    pub fn drain_notices(&mut self) -> Vec<ControllerNotice> {
        std::mem::take(&mut self.notices)
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn set_status(&mut self, to: ScheduleStatus) {
        if to != self.status {
            info!(from = self.status.as_str(), to = to.as_str(), "schedule status changed");
            self.notices.push(ControllerNotice::StatusChanged { from: self.status, to });
            self.status = to;
        }
    }

    /// Drop the pending suggestion, announcing a cancelled countdown if one was armed.
    fn clear_pending(&mut self) -> Option<PendingSuggestion> {
        let pending = self.pending.take()?;
        if pending.countdown.is_some() {
            debug!(result = %pending.result.id, "countdown cancelled");
            self.notices.push(ControllerNotice::CountdownCancelled {
                result_id: pending.result.id.clone(),
            });
        }
        Some(pending)
    }

    fn resolve_trigger(&mut self, trigger_id: &str) {
        self.active_triggers.retain(|t| t.id != trigger_id);
    }

    // ----- trigger flow -----

    /// Take the processing guard for a check→analyze→propose cycle. Starting
    /// a new flow supersedes the pending suggestion and its countdown.
    pub fn begin_processing(&mut self) -> Result<ProcessingTicket, ControllerError> {
        if self.processing {
            return Err(ControllerError::Busy);
        }
        self.processing = true;
        if let Some(old) = self.clear_pending() {
            debug!(old = %old.result.id, "suggestion superseded by new check");
        }
        let version = self.bump();
        Ok(ProcessingTicket {
            version,
            schedule: self.current.clone(),
        })
    }

    /// Release the guard without recording anything, e.g. after a failed poll.
    pub fn abandon_processing(&mut self, ticket: ProcessingTicket) {
        if ticket.version != self.version {
            debug!(ticket = ticket.version, current = self.version, "stale ticket abandoned");
        }
        self.processing = false;
    }

    pub fn handle_trigger_check_response(
        &mut self,
        ticket: ProcessingTicket,
        response: CheckTriggersResponse,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, ControllerError> {
        self.processing = false;
        if ticket.version != self.version {
            warn!(ticket = ticket.version, current = self.version, "discarding check against stale schedule");
            return Err(ControllerError::StaleSnapshot {
                ticket: ticket.version,
                current: self.version,
            });
        }

        for trigger in &response.triggers_detected {
            if !self.active_triggers.iter().any(|t| t.id == trigger.id) {
                self.active_triggers.push(trigger.clone());
            }
        }
        self.set_status(response.schedule_status.max(ScheduleStatus::from_delay(
            self.delay_minutes,
            &self.config.status,
        )));

        let Some(top) = response.top_suggestion().cloned() else {
            return Ok(CheckOutcome::NothingToDo);
        };

        if let Some(old) = self.clear_pending() {
            debug!(old = %old.result.id, new = %top.id, "suggestion superseded");
        }
        let version = self.bump();
        let trigger = response
            .triggers_detected
            .iter()
            .find(|t| t.id == top.trigger_id)
            .cloned();

        self.notices.push(ControllerNotice::SuggestionPending {
            result_id: top.id.clone(),
            requires_confirmation: top.requires_confirmation,
        });

        let countdown = match top.auto_apply_in {
            Some(seconds) if top.auto_applicable() && self.config.auto_apply.enabled => Some(Countdown {
                version,
                seconds,
                started_at: now,
            }),
            _ => None,
        };
        let outcome = match countdown {
            Some(c) => {
                info!(result = %top.id, seconds = c.seconds, version, "auto-apply countdown started");
                self.notices.push(ControllerNotice::CountdownStarted {
                    result_id: top.id.clone(),
                    version,
                    seconds: c.seconds,
                });
                CheckOutcome::CountdownStarted {
                    version,
                    seconds: c.seconds,
                }
            }
            None => CheckOutcome::AwaitingConfirmation,
        };

        self.pending = Some(PendingSuggestion {
            result: top,
            trigger,
            countdown,
        });
        Ok(outcome)
    }

    /// Explicit confirmation of the pending suggestion.
    pub fn confirm_pending(&mut self, now: DateTime<Utc>) -> Result<ReshuffleEvent, ControllerError> {
        let result = self
            .pending
            .as_ref()
            .map(|p| p.result.clone())
            .ok_or(ControllerError::NoPendingSuggestion)?;
        self.apply_result(result, true, now)
    }

    /// Countdown callback. Applies only if nothing has happened since the
    /// countdown was armed.
    pub fn fire_auto_apply(&mut self, version: u64, now: DateTime<Utc>) -> Result<ReshuffleEvent, ControllerError> {
        if version != self.version {
            warn!(countdown = version, current = self.version, "countdown superseded");
            return Err(ControllerError::CountdownSuperseded {
                countdown: version,
                current: self.version,
            });
        }
        let pending = self.pending.as_ref().ok_or(ControllerError::NoPendingSuggestion)?;
        if pending.countdown.map(|c| c.version) != Some(version) {
            return Err(ControllerError::CountdownSuperseded {
                countdown: version,
                current: self.version,
            });
        }
        if pending.result.requires_confirmation {
            return Err(ControllerError::ConfirmationRequired(pending.result.id.clone()));
        }
        let result = pending.result.clone();
        self.apply_result(result, false, now)
    }

    fn apply_result(
        &mut self,
        result: ReshuffleResult,
        user_confirmed: bool,
        now: DateTime<Utc>,
    ) -> Result<ReshuffleEvent, ControllerError> {
        if self.processing {
            return Err(ControllerError::Busy);
        }
        match ScheduleMutator.apply(&self.current, &result.changes) {
            Ok(outcome) => self.apply_reshuffle(result, outcome.schedule, user_confirmed, now),
            Err(e) => {
                // Nothing was applied; the suggestion no longer fits.
                warn!(result = %result.id, error = %e, "discarding suggestion that no longer applies");
                self.clear_pending();
                self.bump();
                self.notices.push(ControllerNotice::AutoApplyFailed {
                    result_id: result.id,
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Record `new_schedule` as the outcome of `result`.
    pub fn apply_reshuffle(
        &mut self,
        result: ReshuffleResult,
        new_schedule: TripSchedule,
        user_confirmed: bool,
        now: DateTime<Utc>,
    ) -> Result<ReshuffleEvent, ControllerError> {
        if self.processing {
            return Err(ControllerError::Busy);
        }
        if result.requires_confirmation && !user_confirmed {
            return Err(ControllerError::ConfirmationRequired(result.id));
        }
        let report = new_schedule.validate();
        if !report.is_valid() {
            return Err(crate::error::MutationError::Invalid(report.errors).into());
        }

        self.expire_undo(now);
        let pending = self.clear_pending();
        let trigger = pending
            .and_then(|p| p.trigger)
            .filter(|t| t.id == result.trigger_id)
            .or_else(|| self.active_triggers.iter().find(|t| t.id == result.trigger_id).cloned());

        let undo_available = result.can_undo && self.config.undo.max_history_size > 0;
        let previous = std::mem::replace(&mut self.current, new_schedule);
        let event = ReshuffleEvent {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            triggered_at: now,
            trigger,
            result_id: result.id.clone(),
            strategy_used: result.strategy,
            changes_made: result.changes.clone(),
            previous_schedule: previous.clone(),
            new_schedule: self.current.clone(),
            user_confirmed,
            undo_available,
            undone_at: None,
        };

        if undo_available {
            self.undo_stack.push_back(UndoEntry {
                event_id: event.id.clone(),
                applied_at: now,
                previous_schedule: previous,
            });
            while self.undo_stack.len() > self.config.undo.max_history_size {
                if let Some(evicted) = self.undo_stack.pop_front() {
                    debug!(event = %evicted.event_id, "undo entry evicted");
                    self.mark_undo_unavailable(&evicted.event_id);
                }
            }
        }
        self.history.push_back(event.clone());
        while self.history.len() > self.config.undo.max_history_events.max(1) {
            self.history.pop_front();
        }

        self.resolve_trigger(&result.trigger_id);
        self.delay_minutes = (self.delay_minutes - result.time_saved_minutes).max(0);
        let status = ScheduleStatus::from_delay(self.delay_minutes, &self.config.status);
        self.set_status(status);
        self.bump();

        info!(
            event = %event.id,
            strategy = result.strategy.as_str(),
            changes = result.changes.len(),
            user_confirmed,
            "reshuffle applied"
        );
        self.notices.push(ControllerNotice::ReshuffleApplied {
            event_id: event.id.clone(),
            result_id: result.id,
            strategy: result.strategy,
            user_confirmed,
        });
        Ok(event)
    }

    /// Discard the pending suggestion without touching the schedule.
    pub fn reject_reshuffle(&mut self) -> Result<(), ControllerError> {
        let pending = self.clear_pending().ok_or(ControllerError::NoPendingSuggestion)?;
        self.resolve_trigger(&pending.result.trigger_id);
        self.bump();
        info!(result = %pending.result.id, "reshuffle rejected");
        self.notices.push(ControllerNotice::ReshuffleRejected {
            result_id: pending.result.id,
        });
        Ok(())
    }

    // ----- undo -----

    fn mark_undo_unavailable(&mut self, event_id: &str) {
        if let Some(event) = self.history.iter_mut().find(|e| e.id == event_id) {
            event.undo_available = false;
        }
    }

    /// Drop undo entries older than the expiry window. Returns how many went.
    pub fn expire_undo(&mut self, now: DateTime<Utc>) -> usize {
        let expiry = Duration::minutes(self.config.undo.expiry_minutes);
        let mut expired = Vec::new();
        while let Some(front) = self.undo_stack.front() {
            if now - front.applied_at <= expiry {
                break;
            }
            if let Some(entry) = self.undo_stack.pop_front() {
                expired.push(entry.event_id);
            }
        }
        for id in &expired {
            self.mark_undo_unavailable(id);
        }
        let count = expired.len();
        if count > 0 {
            debug!(count, "undo entries expired");
            self.notices.push(ControllerNotice::UndoExpired { event_ids: expired });
        }
        count
    }

    /// Restore the schedule from before the most recent undoable reshuffle.
    pub fn undo(&mut self, now: DateTime<Utc>) -> Result<ReshuffleEvent, UndoFailure> {
        let newest = self.undo_stack.back().map(|e| (e.event_id.clone(), e.applied_at));
        if self.expire_undo(now) > 0 && self.undo_stack.is_empty() {
            if let Some((event_id, applied_at)) = newest {
                let age_minutes = (now - applied_at).num_minutes();
                warn!(event = %event_id, age_minutes, "undo expired");
                return Err(UndoFailure::Expired { event_id, age_minutes });
            }
        }
        let entry = self.undo_stack.pop_back().ok_or(UndoFailure::Empty)?;

        self.clear_pending();
        self.current = entry.previous_schedule;
        self.bump();

        let event = self.history.iter_mut().find(|e| e.id == entry.event_id).map(|e| {
            e.undone_at = Some(now);
            e.undo_available = false;
            e.clone()
        });
        info!(event = %entry.event_id, "reshuffle undone");
        self.notices.push(ControllerNotice::ReshuffleUndone {
            event_id: entry.event_id.clone(),
        });

        // The audit entry may already have been evicted; rebuild what we know.
        Ok(event.unwrap_or_else(|| ReshuffleEvent {
            id: entry.event_id,
            triggered_at: entry.applied_at,
            trigger: None,
            result_id: String::new(),
            strategy_used: ReshuffleStrategy::NoAction,
            changes_made: vec![],
            previous_schedule: self.current.clone(),
            new_schedule: self.current.clone(),
            user_confirmed: false,
            undo_available: false,
            undone_at: Some(now),
        }))
    }

    // ----- delay reporting -----

    pub fn report_delay(&mut self, delay_minutes: i32) -> ScheduleStatus {
        self.delay_minutes = delay_minutes.max(0);
        let status = ScheduleStatus::from_delay(self.delay_minutes, &self.config.status);
        self.set_status(status);
        self.bump();
        status
    }

    // ----- activity lifecycle -----

    fn lifecycle_state(&self, slot_id: &str) -> Option<&'static str> {
        if self.in_progress.as_ref().is_some_and(|a| a.slot_id == slot_id) {
            Some("in progress")
        } else if self.completed.iter().any(|c| c.slot_id == slot_id) {
            Some("completed")
        } else if self.skipped.iter().any(|s| s.slot_id == slot_id) {
            Some("skipped")
        } else {
            None
        }
    }

    fn activity_at(&self, slot_id: &str) -> Result<(Option<Activity>, i32), ControllerError> {
        self.current
            .find_slot(slot_id)
            .map(|(_, s)| (s.activity.clone(), s.duration_minutes()))
            .ok_or_else(|| ControllerError::UnknownSlot(slot_id.to_string()))
    }

    pub fn start_activity(&mut self, slot_id: &str, now: DateTime<Utc>) -> Result<&InProgressActivity, ControllerError> {
        if let Some(state) = self.lifecycle_state(slot_id) {
            return Err(ControllerError::ActivityState {
                slot_id: slot_id.to_string(),
                state,
            });
        }
        if let Some(current) = self.in_progress.as_ref() {
            return Err(ControllerError::ActivityState {
                slot_id: current.slot_id.clone(),
                state: "still in progress",
            });
        }
        let (activity, duration) = self.activity_at(slot_id)?;
        self.notices.push(ControllerNotice::ActivityStarted {
            slot_id: slot_id.to_string(),
        });
        let started = self.in_progress.insert(InProgressActivity {
            slot_id: slot_id.to_string(),
            activity,
            started_at: now,
            expected_end: now + Duration::minutes(duration.into()),
            extended_by: None,
        });
        Ok(&*started)
    }

    pub fn complete_activity(
        &mut self,
        slot_id: &str,
        rating: Option<u8>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&CompletedActivity, ControllerError> {
        let (activity, started_at) = match self.in_progress.take() {
            Some(current) if current.slot_id == slot_id => (current.activity, current.started_at),
            other => {
                self.in_progress = other;
                if let Some(state) = self.lifecycle_state(slot_id) {
                    return Err(ControllerError::ActivityState {
                        slot_id: slot_id.to_string(),
                        state,
                    });
                }
                // Completed without an explicit start.
                (self.activity_at(slot_id)?.0, now)
            }
        };
        self.notices.push(ControllerNotice::ActivityCompleted {
            slot_id: slot_id.to_string(),
        });
        self.completed.push(CompletedActivity {
            slot_id: slot_id.to_string(),
            activity,
            started_at,
            completed_at: now,
            actual_duration_minutes: (now - started_at).num_minutes(),
            rating,
            notes,
        });
        Ok(&self.completed[self.completed.len() - 1])
    }

    /// Drop the slot from the live schedule and remember why.
    pub fn skip_activity(
        &mut self,
        slot_id: &str,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<&SkippedActivity, ControllerError> {
        if let Some(state) = self.lifecycle_state(slot_id).filter(|s| *s != "in progress") {
            return Err(ControllerError::ActivityState {
                slot_id: slot_id.to_string(),
                state,
            });
        }
        let (day_number, activity) = self
            .current
            .find_slot(slot_id)
            .map(|(d, s)| (d, s.activity.clone()))
            .ok_or_else(|| ControllerError::UnknownSlot(slot_id.to_string()))?;

        if self.in_progress.as_ref().is_some_and(|a| a.slot_id == slot_id) {
            self.in_progress = None;
        }
        if let Some(day) = self.current.day_mut(day_number) {
            day.slots.retain(|s| s.id != slot_id);
        }
        self.clear_pending();
        self.bump();

        info!(slot = %slot_id, day = day_number, "activity skipped");
        self.notices.push(ControllerNotice::ActivitySkipped {
            slot_id: slot_id.to_string(),
        });
        self.skipped.push(SkippedActivity {
            slot_id: slot_id.to_string(),
            activity,
            skipped_at: now,
            reason: reason.into(),
            deferred_to: None,
        });
        Ok(&self.skipped[self.skipped.len() - 1])
    }

    /// Stay longer at the current activity. Returns the trigger to feed the
    /// next check so the rest of the day can be re-timed.
    pub fn extend_current_activity(&mut self, minutes: i32, now: DateTime<Utc>) -> Result<TriggerEvent, ControllerError> {
        let current = self.in_progress.as_ref().ok_or(ControllerError::NothingInProgress)?;
        let trigger = TriggerEvent::new(
            TriggerContext::UserRequest {
                action: UserRequestAction::Extend { minutes },
                message: None,
            },
            TriggerSeverity::Low,
            TriggerOrigin::User,
            now,
        )
        .with_slot(current.slot_id.clone());
        trigger.validate()?;

        let slot_id = current.slot_id.clone();
        if let Some(current) = self.in_progress.as_mut() {
            current.expected_end += Duration::minutes(minutes.into());
            current.extended_by = Some(current.extended_by.unwrap_or(0) + minutes);
        }
        self.bump();
        self.notices.push(ControllerNotice::ActivityExtended { slot_id, minutes });
        Ok(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshuffle::{ChangeSnapshot, ChangeType};
    use crate::schedule::{ActivityCategory, DaySchedule, TimeSlot};
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap()
    }

    fn schedule() -> TripSchedule {
        TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
                .with_slot(
                    TimeSlot::new("museum", t(9, 0), t(11, 0))
                        .with_activity(Activity::new("a1", "Gulbenkian", ActivityCategory::Museum, 120)),
                )
                .with_slot(
                    TimeSlot::new("park", t(12, 0), t(13, 0))
                        .with_activity(Activity::new("a2", "Estrela Garden", ActivityCategory::Park, 60)),
                ),
        )
    }

    fn shift(trigger: &str, minutes: u32, confirm: bool) -> ReshuffleResult {
        let mut r = ReshuffleResult::no_action(trigger, "shift the park", 0.9);
        r.id = format!("rs-{trigger}");
        r.strategy = ReshuffleStrategy::CompressBuffer;
        r.changes = vec![ScheduleChange {
            id: format!("chg-{trigger}"),
            change_type: ChangeType::TimeShift,
            slot_id: "park".into(),
            activity_name: "Estrela Garden".into(),
            description: String::new(),
            before: ChangeSnapshot::default(),
            after: ChangeSnapshot {
                start_time: Some(t(12, minutes)),
                ..ChangeSnapshot::default()
            },
        }];
        r.requires_confirmation = confirm;
        r.auto_apply_in = (!confirm).then_some(20);
        r.can_undo = true;
        r
    }

    fn response(result: ReshuffleResult) -> CheckTriggersResponse {
        CheckTriggersResponse {
            triggers_detected: vec![],
            analyses: vec![],
            suggested_actions: vec![result],
            schedule_status: ScheduleStatus::MinorDelay,
            next_check_in_seconds: 900,
            summary: String::new(),
        }
    }

    fn suggest(ctl: &mut ExecutionController, result: ReshuffleResult) -> CheckOutcome {
        let ticket = ctl.begin_processing().unwrap();
        ctl.handle_trigger_check_response(ticket, response(result), now()).unwrap()
    }

    #[test]
    fn processing_guard_rejects_second_check() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        let ticket = ctl.begin_processing().unwrap();
        assert_eq!(ctl.begin_processing().unwrap_err(), ControllerError::Busy);
        assert_eq!(
            ctl.apply_reshuffle(shift("t1", 10, false), schedule(), true, now()).unwrap_err(),
            ControllerError::Busy
        );
        ctl.abandon_processing(ticket);
        assert!(ctl.begin_processing().is_ok());
    }

    #[test]
    fn stale_ticket_is_refused() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        let ticket = ctl.begin_processing().unwrap();
        ctl.report_delay(20);
        let err = ctl
            .handle_trigger_check_response(ticket, response(shift("t1", 10, false)), now())
            .unwrap_err();
        assert!(matches!(err, ControllerError::StaleSnapshot { .. }));
        assert!(!ctl.is_processing());
        assert!(ctl.pending().is_none());
    }

    #[test]
    fn countdown_fires_when_untouched() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        let CheckOutcome::CountdownStarted { version, seconds } = suggest(&mut ctl, shift("t1", 10, false)) else {
            panic!("expected countdown");
        };
        assert_eq!(seconds, 20);
        let event = ctl.fire_auto_apply(version, now()).unwrap();
        assert!(!event.user_confirmed);
        assert_eq!(ctl.current_schedule().find_slot("park").unwrap().1.start, t(12, 10));
        assert!(ctl.can_undo());
    }

    #[test]
    fn reject_beats_the_countdown() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        let CheckOutcome::CountdownStarted { version, .. } = suggest(&mut ctl, shift("t1", 10, false)) else {
            panic!("expected countdown");
        };
        ctl.reject_reshuffle().unwrap();
        let err = ctl.fire_auto_apply(version, now()).unwrap_err();
        assert!(matches!(err, ControllerError::CountdownSuperseded { .. }));
        assert_eq!(ctl.current_schedule(), &schedule());
        assert!(ctl.history().next().is_none());
    }

    #[test]
    fn confirmation_is_never_bypassed() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        let mut result = shift("t1", 10, true);
        result.auto_apply_in = Some(20);
        assert_eq!(suggest(&mut ctl, result.clone()), CheckOutcome::AwaitingConfirmation);
        let err = ctl.fire_auto_apply(ctl.version(), now()).unwrap_err();
        assert!(matches!(err, ControllerError::CountdownSuperseded { .. }));

        let err = ctl.apply_reshuffle(result, schedule(), false, now()).unwrap_err();
        assert!(matches!(err, ControllerError::ConfirmationRequired(_)));

        let event = ctl.confirm_pending(now()).unwrap();
        assert!(event.user_confirmed);
    }

    #[test]
    fn new_check_supersedes_pending_suggestion() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        let CheckOutcome::CountdownStarted { version: first, .. } = suggest(&mut ctl, shift("t1", 10, false)) else {
            panic!("expected countdown");
        };
        suggest(&mut ctl, shift("t2", 20, false));
        assert!(ctl.fire_auto_apply(first, now()).is_err());
        assert_eq!(ctl.pending().unwrap().result.trigger_id, "t2");
        ctl.drain_notices();
    }

    #[test]
    fn empty_check_leaves_no_orphaned_suggestion() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        let CheckOutcome::CountdownStarted { version, .. } = suggest(&mut ctl, shift("t1", 10, false)) else {
            panic!("expected countdown");
        };
        ctl.drain_notices();

        let ticket = ctl.begin_processing().unwrap();
        let mut quiet = response(shift("t2", 10, false));
        quiet.suggested_actions.clear();
        let outcome = ctl.handle_trigger_check_response(ticket, quiet, now()).unwrap();

        assert_eq!(outcome, CheckOutcome::NothingToDo);
        assert!(ctl.pending().is_none());
        assert!(ctl.fire_auto_apply(version, now()).is_err());
        assert!(
            ctl.drain_notices()
                .iter()
                .any(|n| matches!(n, ControllerNotice::CountdownCancelled { result_id } if result_id == "rs-t1"))
        );
    }

    #[test]
    fn undo_restores_previous_and_marks_history() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        suggest(&mut ctl, shift("t1", 10, true));
        let event = ctl.confirm_pending(now()).unwrap();
        let undone = ctl.undo(now() + Duration::minutes(5)).unwrap();
        assert_eq!(undone.id, event.id);
        assert!(undone.undone_at.is_some());
        assert_eq!(ctl.current_schedule(), &schedule());
        assert_eq!(ctl.undo(now()).unwrap_err(), UndoFailure::Empty);
    }

    #[test]
    fn expired_undo_is_a_reported_no_op() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        suggest(&mut ctl, shift("t1", 10, true));
        ctl.confirm_pending(now()).unwrap();
        let after = ctl.current_schedule().clone();

        let err = ctl.undo(now() + Duration::minutes(121)).unwrap_err();
        assert!(matches!(err, UndoFailure::Expired { age_minutes: 121, .. }));
        assert_eq!(ctl.current_schedule(), &after);
        assert!(!ctl.can_undo());
        assert!(!ctl.history().next().unwrap().undo_available);
    }

    #[test]
    fn lifecycle_states_are_exclusive() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        ctl.start_activity("museum", now()).unwrap();
        assert!(matches!(
            ctl.start_activity("park", now()),
            Err(ControllerError::ActivityState { .. })
        ));

        let trigger = ctl.extend_current_activity(15, now()).unwrap();
        assert_eq!(trigger.affected_slot_ids, vec!["museum".to_string()]);
        assert_eq!(ctl.in_progress().unwrap().extended_by, Some(15));

        let done = ctl
            .complete_activity("museum", Some(5), None, now() + Duration::minutes(135))
            .unwrap();
        assert_eq!(done.actual_duration_minutes, 135);
        assert!(matches!(
            ctl.skip_activity("museum", "changed mind", now()),
            Err(ControllerError::ActivityState { state: "completed", .. })
        ));

        ctl.skip_activity("park", "tired", now()).unwrap();
        assert!(ctl.current_schedule().find_slot("park").is_none());
        assert!(matches!(
            ctl.start_activity("park", now()),
            Err(ControllerError::ActivityState { state: "skipped", .. })
        ));
        assert_eq!(ctl.extend_current_activity(10, now()).unwrap_err(), ControllerError::NothingInProgress);
    }

    #[test]
    fn status_follows_reported_delay() {
        let mut ctl = ExecutionController::new(schedule(), ReshuffleConfig::default());
        assert_eq!(ctl.report_delay(25), ScheduleStatus::MinorDelay);
        assert_eq!(ctl.report_delay(75), ScheduleStatus::Critical);
        let notices = ctl.drain_notices();
        assert_eq!(notices.len(), 2);
        assert!(ctl.drain_notices().is_empty());
    }
}
