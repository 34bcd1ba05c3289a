//! Impact analysis result types.

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trigger::{TriggerSeverity, TriggerType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    Delayed,
    Shortened,
    Impossible,
    Degraded,
    AtRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Compress,
    Skip,
    Swap,
    Defer,
    Shorten,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOption {
    pub action: RecoveryAction,
    pub description: String,
    pub time_saved_minutes: i32,
    pub tradeoff: String,
    pub can_recover: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedActivity {
    pub slot_id: String,
    pub day_number: u32,
    pub activity_name: String,
    pub impact_type: ImpactType,
    /// 0..=100.
    pub severity: u8,
    /// How late this slot would now start.
    pub delay_minutes: i32,
    pub recoverable: bool,
    pub recovery_options: Vec<RecoveryOption>,
}

/// Likelihood of missing a reservation. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Tight,
    AtRisk,
    WillMiss,
}

impl RiskLevel {
    /// Map the slack before a booking's latest arrival onto a risk level.
    ///
    /// Monotonic: a smaller buffer never yields a less severe level.
    pub fn from_buffer(buffer_minutes: i32, safe_buffer: i32, tight_buffer: i32) -> RiskLevel {
        if buffer_minutes < 0 {
            RiskLevel::WillMiss
        } else if buffer_minutes < tight_buffer {
            RiskLevel::AtRisk
        } else if buffer_minutes < safe_buffer {
            RiskLevel::Tight
        } else {
            RiskLevel::Safe
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRisk {
    pub slot_id: String,
    pub reference: String,
    pub activity_name: String,
    pub latest_arrival: NaiveTime,
    /// Projected arrival, in minutes after local midnight.
    pub current_eta_minute: i32,
    pub buffer_minutes: i32,
    pub risk_level: RiskLevel,
    pub refundable: bool,
    pub cancellation_deadline: Option<NaiveDateTime>,
    pub can_cancel_free: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeEffect {
    Isolated,
    PartialDay,
    RestOfDay,
    MultiDay,
}

/// Ordered from most to least pressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Immediate,
    WithinHour,
    Today,
    Future,
}

/// Where a delay enters the day: the traveller is free to move on at
/// `free_at_minute` and heads for `slot_id` next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayOrigin {
    pub slot_id: String,
    pub free_at_minute: i32,
    /// Slot the traveller asked to stay longer at, if that is the cause.
    #[serde(default)]
    pub extended_slot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub trigger_id: String,
    pub trigger_type: TriggerType,
    pub trigger_severity: TriggerSeverity,
    pub analyzed_at: DateTime<Utc>,
    /// Trip-local wall clock at detection.
    pub local_time: NaiveDateTime,
    pub day_number: Option<u32>,
    pub delay_origin: Option<DelayOrigin>,
    pub affected_activities: Vec<AffectedActivity>,
    pub bookings_at_risk: Vec<BookingRisk>,
    pub cascade_effect: CascadeEffect,
    pub urgency: Urgency,
    pub total_delay_minutes: i32,
    pub can_auto_resolve: bool,
    pub summary: String,
}

impl ImpactAnalysis {
    pub fn max_severity(&self) -> u8 {
        self.affected_activities
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(0)
    }

    pub fn total_severity(&self) -> u32 {
        self.affected_activities.iter().map(|a| a.severity as u32).sum()
    }

    pub fn worst_booking_risk(&self) -> Option<RiskLevel> {
        self.bookings_at_risk.iter().map(|b| b.risk_level).max()
    }

    pub fn affected(&self, slot_id: &str) -> Option<&AffectedActivity> {
        self.affected_activities.iter().find(|a| a.slot_id == slot_id)
    }

    pub fn booking_risk(&self, slot_id: &str) -> Option<&BookingRisk> {
        self.bookings_at_risk.iter().find(|b| b.slot_id == slot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_thresholds_partition_the_buffer() {
        assert_eq!(RiskLevel::from_buffer(45, 30, 10), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_buffer(30, 30, 10), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_buffer(29, 30, 10), RiskLevel::Tight);
        assert_eq!(RiskLevel::from_buffer(10, 30, 10), RiskLevel::Tight);
        assert_eq!(RiskLevel::from_buffer(9, 30, 10), RiskLevel::AtRisk);
        assert_eq!(RiskLevel::from_buffer(0, 30, 10), RiskLevel::AtRisk);
        assert_eq!(RiskLevel::from_buffer(-1, 30, 10), RiskLevel::WillMiss);
    }

    #[test]
    fn urgency_orders_most_pressing_first() {
        assert!(Urgency::Immediate < Urgency::WithinHour);
        assert!(Urgency::Today < Urgency::Future);
    }
}
