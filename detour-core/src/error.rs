//! Error taxonomy for the reshuffling engine.
//!
//! Analysis and strategy generation never fail; only trigger intake, the
//! mutator and the controller reject operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schedule::ScheduleIssue;

/// A trigger that cannot be analyzed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("trigger field `{0}` must be non-empty")]
    EmptyField(&'static str),

    #[error("trigger type {declared} does not match its {context} context")]
    ContextMismatch { declared: String, context: String },

    #[error("{0} trigger requires a positive delay")]
    NonPositiveDelay(String),

    #[error("{0} trigger must name at least one affected slot")]
    MissingSlots(String),

    #[error("invalid trigger context: {0}")]
    InvalidContext(String),
}

/// A change set that cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("change {change_id}: unknown slot {slot_id}")]
    UnknownSlot { change_id: String, slot_id: String },

    #[error("change {change_id}: unknown day {day_number}")]
    UnknownDay { change_id: String, day_number: u32 },

    #[error("change {change_id}: missing `{field}` for this change type")]
    MissingField { change_id: String, field: &'static str },

    #[error("change {change_id}: slot {slot_id} already exists")]
    DuplicateSlot { change_id: String, slot_id: String },

    #[error("change {change_id}: window for slot {slot_id} leaves the day")]
    OutOfDay { change_id: String, slot_id: String },

    #[error("resulting schedule is invalid: {0:?}")]
    Invalid(Vec<ScheduleIssue>),
}

/// Why an undo did nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UndoFailure {
    #[error("nothing to undo")]
    Empty,

    #[error("reshuffle {event_id} is {age_minutes} minutes old and can no longer be undone")]
    Expired { event_id: String, age_minutes: i64 },
}

/// Operations the execution controller refuses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("a trigger check is already in progress")]
    Busy,

    #[error("no suggestion is pending")]
    NoPendingSuggestion,

    #[error("reshuffle {0} requires explicit confirmation")]
    ConfirmationRequired(String),

    #[error("check started at version {ticket} but controller is at {current}")]
    StaleSnapshot { ticket: u64, current: u64 },

    #[error("countdown for version {countdown} superseded by version {current}")]
    CountdownSuperseded { countdown: u64, current: u64 },

    #[error("unknown slot {0}")]
    UnknownSlot(String),

    #[error("slot {slot_id} is {state}")]
    ActivityState { slot_id: String, state: &'static str },

    #[error("no activity is in progress")]
    NothingInProgress,

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Undo(#[from] UndoFailure),
}
