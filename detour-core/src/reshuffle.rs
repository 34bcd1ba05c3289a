//! Reshuffle results and the atomic schedule changes they carry.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::schedule::Activity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    TimeShift,
    DurationChange,
    ActivityRemoved,
    ActivityAdded,
    ActivityReplaced,
    OrderSwap,
    DayMoved,
}

/// The parts of a slot a change reads or writes. Only the fields relevant to
/// the change type are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_number: Option<u32>,
    /// Full activity value for additions and replacements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

impl ChangeSnapshot {
    pub fn window(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start_time: Some(start),
            end_time: Some(end),
            duration: Some(crate::time::minutes_between(start, end)),
            ..Self::default()
        }
    }

    pub fn with_day(mut self, day_number: u32) -> Self {
        self.day_number = Some(day_number);
        self
    }

    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activity_id = Some(activity.id.clone());
        self.activity = Some(activity);
        self
    }

    pub fn with_activity_id(mut self, id: impl Into<String>) -> Self {
        self.activity_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleChange {
    pub id: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub slot_id: String,
    pub activity_name: String,
    pub description: String,
    #[serde(default)]
    pub before: ChangeSnapshot,
    #[serde(default)]
    pub after: ChangeSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReshuffleStrategy {
    CompressBuffer,
    ShortenActivity,
    SkipActivity,
    SwapOrder,
    ReplaceActivity,
    SplitGroup,
    DeferToTomorrow,
    CancelGracefully,
    EmergencyReroute,
    NoAction,
}

impl ReshuffleStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReshuffleStrategy::CompressBuffer => "compress_buffer",
            ReshuffleStrategy::ShortenActivity => "shorten_activity",
            ReshuffleStrategy::SkipActivity => "skip_activity",
            ReshuffleStrategy::SwapOrder => "swap_order",
            ReshuffleStrategy::ReplaceActivity => "replace_activity",
            ReshuffleStrategy::SplitGroup => "split_group",
            ReshuffleStrategy::DeferToTomorrow => "defer_to_tomorrow",
            ReshuffleStrategy::CancelGracefully => "cancel_gracefully",
            ReshuffleStrategy::EmergencyReroute => "emergency_reroute",
            ReshuffleStrategy::NoAction => "no_action",
        }
    }
}

/// A proposed fix for one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReshuffleResult {
    pub id: String,
    pub trigger_id: String,
    pub strategy: ReshuffleStrategy,
    pub changes: Vec<ScheduleChange>,
    pub explanation: String,
    /// 0.0..=1.0.
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<ReshuffleResult>,
    pub requires_confirmation: bool,
    /// Seconds until silent application, when eligible.
    #[serde(default)]
    pub auto_apply_in: Option<u64>,
    pub time_saved_minutes: i32,
    pub bookings_protected: u32,
    pub activities_affected: u32,
    pub undo_token: String,
    pub can_undo: bool,
}

impl ReshuffleResult {
    pub fn no_action(trigger_id: &str, explanation: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: result_id(trigger_id, ReshuffleStrategy::NoAction),
            trigger_id: trigger_id.to_string(),
            strategy: ReshuffleStrategy::NoAction,
            changes: vec![],
            explanation: explanation.into(),
            confidence: confidence.clamp(0.0, 1.0),
            alternatives: vec![],
            requires_confirmation: false,
            auto_apply_in: None,
            time_saved_minutes: 0,
            bookings_protected: 0,
            activities_affected: 0,
            undo_token: undo_token(trigger_id, ReshuffleStrategy::NoAction),
            can_undo: false,
        }
    }

    pub fn is_no_action(&self) -> bool {
        self.strategy == ReshuffleStrategy::NoAction
    }

    /// Eligible for the countdown: nothing needs confirming and a timeout is set.
    pub fn auto_applicable(&self) -> bool {
        !self.requires_confirmation && self.auto_apply_in.is_some() && !self.changes.is_empty()
    }
}

pub(crate) fn result_id(trigger_id: &str, strategy: ReshuffleStrategy) -> String {
    format!("rs-{trigger_id}-{}", strategy.as_str())
}

pub(crate) fn change_id(trigger_id: &str, strategy: ReshuffleStrategy, index: usize) -> String {
    format!("chg-{trigger_id}-{}-{index}", strategy.as_str())
}

pub(crate) fn undo_token(trigger_id: &str, strategy: ReshuffleStrategy) -> String {
    format!("undo-{trigger_id}-{}", strategy.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_wire_shape() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        let change = ScheduleChange {
            id: "chg-1".into(),
            change_type: ChangeType::DurationChange,
            slot_id: "s1".into(),
            activity_name: "Gulbenkian".into(),
            description: "Shorten visit".into(),
            before: ChangeSnapshot::window(t(9, 0), t(11, 0)),
            after: ChangeSnapshot::window(t(9, 45), t(11, 9)),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "duration_change");
        assert_eq!(json["after"]["duration"], 84);
        assert!(json["after"].get("day_number").is_none());
    }

    #[test]
    fn no_action_is_never_auto_applied() {
        let mut r = ReshuffleResult::no_action("trg", "all good", 0.9);
        r.auto_apply_in = Some(20);
        assert!(!r.auto_applicable());
        assert_eq!(r.id, "rs-trg-no_action");
    }
}
