//! Reshuffle configuration. Every field has a default so partial TOML/JSON
//! documents deserialize cleanly.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::trigger::WeatherCondition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReshuffleConfig {
    pub thresholds: DelayThresholds,
    pub status: StatusThresholds,
    pub booking_protection: BookingProtection,
    pub weather: WeatherSensitivity,
    pub auto_apply: AutoApplyPolicy,
    pub undo: UndoPolicy,
    pub polling: PollingIntervals,
    pub day_window: DayWindow,
}

/// Delay bands, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayThresholds {
    /// At or below this, absorb silently.
    pub silent_buffer: i32,
    pub notify_user: i32,
    pub suggest_reshuffle: i32,
    pub auto_reshuffle: i32,
}

impl Default for DelayThresholds {
    fn default() -> Self {
        Self {
            silent_buffer: 10,
            notify_user: 15,
            suggest_reshuffle: 30,
            auto_reshuffle: 60,
        }
    }
}

/// Upper bounds (inclusive) of each schedule status, in minutes of delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusThresholds {
    pub on_track_max: i32,
    pub minor_delay_max: i32,
    pub needs_attention_max: i32,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            on_track_max: 10,
            minor_delay_max: 30,
            needs_attention_max: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingProtection {
    pub enabled: bool,
    /// Minimum slack a strategy must leave before a reservation.
    pub min_buffer_minutes: i32,
    /// Buffer at or above which a booking is safe.
    pub safe_buffer: i32,
    /// Buffer at or above which a booking is merely tight.
    pub tight_buffer: i32,
}

impl Default for BookingProtection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_buffer_minutes: 10,
            safe_buffer: 30,
            tight_buffer: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSensitivity {
    pub rain_probability: u8,
    pub max_wind_kph: f64,
    pub max_temperature_c: f64,
    pub min_temperature_c: f64,
}

impl WeatherSensitivity {
    /// Whether conditions rule out outdoor plans.
    pub fn is_adverse(&self, condition: WeatherCondition, precipitation: u8, temperature: f64, wind: f64) -> bool {
        condition.is_severe()
            || precipitation >= self.rain_probability
            || wind > self.max_wind_kph
            || temperature > self.max_temperature_c
            || temperature < self.min_temperature_c
    }
}

impl Default for WeatherSensitivity {
    fn default() -> Self {
        Self {
            rain_probability: 60,
            max_wind_kph: 40.0,
            max_temperature_c: 35.0,
            min_temperature_c: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApplyPolicy {
    pub enabled: bool,
    pub timeout_seconds: u64,
    /// Only auto-apply when the analysis says the impact can auto-resolve.
    pub low_impact_only: bool,
    /// Below this confidence a result always needs confirmation.
    pub min_confidence: f64,
}

impl Default for AutoApplyPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: 20,
            low_impact_only: true,
            min_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoPolicy {
    pub max_history_size: usize,
    pub expiry_minutes: i64,
    /// Cap on the full audit history (applied and undone events).
    pub max_history_events: usize,
}

impl Default for UndoPolicy {
    fn default() -> Self {
        Self {
            max_history_size: 10,
            expiry_minutes: 120,
            max_history_events: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingIntervals {
    pub weather_seconds: u64,
    pub venue_seconds: u64,
    pub transport_seconds: u64,
}

impl Default for PollingIntervals {
    fn default() -> Self {
        Self {
            weather_seconds: 900,
            venue_seconds: 1800,
            transport_seconds: 120,
        }
    }
}

/// Waking hours used when a deferred activity needs a new home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for DayWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ReshuffleConfig::default();
        assert_eq!(cfg.thresholds.silent_buffer, 10);
        assert_eq!(cfg.thresholds.notify_user, 15);
        assert_eq!(cfg.thresholds.suggest_reshuffle, 30);
        assert_eq!(cfg.thresholds.auto_reshuffle, 60);
        assert_eq!(cfg.undo.max_history_size, 10);
        assert_eq!(cfg.undo.expiry_minutes, 120);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ReshuffleConfig =
            serde_json::from_str(r#"{"undo":{"max_history_size":3},"auto_apply":{"enabled":false}}"#).unwrap();
        assert_eq!(cfg.undo.max_history_size, 3);
        assert_eq!(cfg.undo.expiry_minutes, 120);
        assert!(!cfg.auto_apply.enabled);
        assert_eq!(cfg.auto_apply.timeout_seconds, 20);
        assert_eq!(cfg.thresholds.silent_buffer, 10);
    }
}
