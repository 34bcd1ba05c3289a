//! detour-core: schedule model and reshuffling engine for trips in progress.

pub mod alternatives;
pub mod analyzer;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod flexibility;
pub mod impact;
pub mod mutator;
mod reflow;
pub mod reshuffle;
pub mod schedule;
pub mod status;
pub mod strategy;
pub mod time;
pub mod trigger;
pub mod trip;

pub use alternatives::{AlternativeActivity, AlternativeProvider, AlternativeReason, ScheduleFit, SlotAlternatives};
pub use analyzer::ImpactAnalyzer;
pub use config::{
    AutoApplyPolicy, BookingProtection, DayWindow, DelayThresholds, PollingIntervals, ReshuffleConfig, StatusThresholds,
    UndoPolicy, WeatherSensitivity,
};
pub use controller::{
    CheckOutcome, CompletedActivity, ControllerNotice, Countdown, ExecutionController, InProgressActivity,
    PendingSuggestion, ProcessingTicket, ReshuffleEvent, SkippedActivity,
};
pub use engine::{CheckTriggersResponse, ReshuffleEngine};
pub use error::{ControllerError, MutationError, TriggerError, UndoFailure};
pub use flexibility::{ActivityFlexibility, BookingConstraint, BookingFlexibility, FlexibilityTable};
pub use impact::{
    AffectedActivity, BookingRisk, CascadeEffect, ImpactAnalysis, ImpactType, RecoveryAction, RecoveryOption,
    RiskLevel, Urgency,
};
pub use mutator::{MutationOutcome, ScheduleMutator};
pub use reshuffle::{ChangeSnapshot, ChangeType, ReshuffleResult, ReshuffleStrategy, ScheduleChange};
pub use schedule::{
    Activity, ActivityCategory, Booking, Commute, CommuteMode, DaySchedule, ScheduleIssue, ScheduleReport, TimeSlot,
    TripSchedule,
};
pub use status::ScheduleStatus;
pub use strategy::StrategyEngine;
pub use trigger::{
    TriggerContext, TriggerEvent, TriggerOrigin, TriggerSeverity, TriggerType, UserCondition, UserRequestAction,
    WeatherCondition,
};
pub use trip::{CityId, Trip};
