//! Per-day schedule status driven by accumulated delay.

use serde::{Deserialize, Serialize};

use crate::config::StatusThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    #[default]
    OnTrack,
    MinorDelay,
    NeedsAttention,
    Critical,
}

impl ScheduleStatus {
    pub fn from_delay(delay_minutes: i32, thresholds: &StatusThresholds) -> ScheduleStatus {
        if delay_minutes <= thresholds.on_track_max {
            ScheduleStatus::OnTrack
        } else if delay_minutes <= thresholds.minor_delay_max {
            ScheduleStatus::MinorDelay
        } else if delay_minutes <= thresholds.needs_attention_max {
            ScheduleStatus::NeedsAttention
        } else {
            ScheduleStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::OnTrack => "on_track",
            ScheduleStatus::MinorDelay => "minor_delay",
            ScheduleStatus::NeedsAttention => "needs_attention",
            ScheduleStatus::Critical => "critical",
        }
    }

    /// Seconds until the next trigger check; tighter when things are going wrong.
    pub fn next_check_in_seconds(&self) -> u64 {
        match self {
            ScheduleStatus::Critical => 60,
            ScheduleStatus::NeedsAttention => 300,
            ScheduleStatus::MinorDelay => 900,
            ScheduleStatus::OnTrack => 1800,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_inclusive_upper_bounds() {
        let th = StatusThresholds::default();
        assert_eq!(ScheduleStatus::from_delay(0, &th), ScheduleStatus::OnTrack);
        assert_eq!(ScheduleStatus::from_delay(10, &th), ScheduleStatus::OnTrack);
        assert_eq!(ScheduleStatus::from_delay(11, &th), ScheduleStatus::MinorDelay);
        assert_eq!(ScheduleStatus::from_delay(30, &th), ScheduleStatus::MinorDelay);
        assert_eq!(ScheduleStatus::from_delay(60, &th), ScheduleStatus::NeedsAttention);
        assert_eq!(ScheduleStatus::from_delay(61, &th), ScheduleStatus::Critical);
    }

    #[test]
    fn worse_status_checks_sooner() {
        assert!(ScheduleStatus::Critical.next_check_in_seconds() < ScheduleStatus::OnTrack.next_check_in_seconds());
    }
}
