//! Trigger event contract: the uniform shape every disruption signal takes
//! before it reaches the analyzer.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TriggerError;
use crate::schedule::CommuteMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    RunningLate,
    WeatherChange,
    Closure,
    TransportDelay,
    UserState,
    UserRequest,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::RunningLate => "running_late",
            TriggerType::WeatherChange => "weather_change",
            TriggerType::Closure => "closure",
            TriggerType::TransportDelay => "transport_delay",
            TriggerType::UserState => "user_state",
            TriggerType::UserRequest => "user_request",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Where a trigger came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOrigin {
    Weather,
    Venue,
    Transport,
    User,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Clear,
    Cloudy,
    Rain,
    HeavyRain,
    Thunderstorm,
    Snow,
    Heat,
    Wind,
}

impl WeatherCondition {
    /// Conditions under which outdoor plans cannot go ahead at all.
    pub fn is_severe(&self) -> bool {
        matches!(
            self,
            WeatherCondition::HeavyRain | WeatherCondition::Thunderstorm | WeatherCondition::Snow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserCondition {
    Tired,
    Hungry,
    Unwell,
    Energized,
}

impl UserCondition {
    /// Break the traveller needs before continuing, absent an explicit figure.
    pub fn default_break_minutes(&self) -> i32 {
        match self {
            UserCondition::Tired => 30,
            UserCondition::Hungry => 45,
            UserCondition::Unwell => 120,
            UserCondition::Energized => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserRequestAction {
    Skip,
    Replace,
    Extend { minutes: i32 },
    SlowDown { minutes: i32 },
}

/// Type-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerContext {
    RunningLate {
        delay_minutes: i32,
        #[serde(default)]
        reason: Option<String>,
    },
    WeatherChange {
        condition: WeatherCondition,
        precipitation_probability: u8,
        temperature_c: f64,
        wind_kph: f64,
        /// Day the forecast concerns; `None` means the current day.
        #[serde(default)]
        day_number: Option<u32>,
    },
    Closure {
        venue: String,
        reason: String,
        #[serde(default)]
        reopens_at: Option<NaiveTime>,
    },
    TransportDelay {
        mode: CommuteMode,
        delay_minutes: i32,
        #[serde(default)]
        line: Option<String>,
    },
    UserState {
        condition: UserCondition,
        #[serde(default)]
        needs_break_minutes: Option<i32>,
    },
    UserRequest {
        #[serde(flatten)]
        action: UserRequestAction,
        #[serde(default)]
        message: Option<String>,
    },
}

impl TriggerContext {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerContext::RunningLate { .. } => TriggerType::RunningLate,
            TriggerContext::WeatherChange { .. } => TriggerType::WeatherChange,
            TriggerContext::Closure { .. } => TriggerType::Closure,
            TriggerContext::TransportDelay { .. } => TriggerType::TransportDelay,
            TriggerContext::UserState { .. } => TriggerType::UserState,
            TriggerContext::UserRequest { .. } => TriggerType::UserRequest,
        }
    }

    /// Minutes the traveller is pushed back by, for triggers that carry one.
    pub fn delay_minutes(&self) -> i32 {
        match self {
            TriggerContext::RunningLate { delay_minutes, .. }
            | TriggerContext::TransportDelay { delay_minutes, .. } => *delay_minutes,
            TriggerContext::UserState {
                condition,
                needs_break_minutes,
            } => needs_break_minutes.unwrap_or(condition.default_break_minutes()),
            TriggerContext::UserRequest { action, .. } => match action {
                UserRequestAction::Extend { minutes } | UserRequestAction::SlowDown { minutes } => *minutes,
                UserRequestAction::Skip | UserRequestAction::Replace => 0,
            },
            TriggerContext::WeatherChange { .. } | TriggerContext::Closure { .. } => 0,
        }
    }
}

/// An externally detected event indicating the plan may need adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub severity: TriggerSeverity,
    pub detected_at: DateTime<Utc>,
    pub source: TriggerOrigin,
    pub context: TriggerContext,
    #[serde(default)]
    pub affected_slot_ids: Vec<String>,
}

impl TriggerEvent {
    pub fn new(
        context: TriggerContext,
        severity: TriggerSeverity,
        source: TriggerOrigin,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("trg_{}", Uuid::new_v4().simple()),
            trigger_type: context.trigger_type(),
            severity,
            detected_at,
            source,
            context,
            affected_slot_ids: vec![],
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_slot(mut self, slot_id: impl Into<String>) -> Self {
        self.affected_slot_ids.push(slot_id.into());
        self
    }

    pub fn with_slots<I, S>(mut self, slot_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_slot_ids.extend(slot_ids.into_iter().map(Into::into));
        self
    }

    pub fn delay_minutes(&self) -> i32 {
        self.context.delay_minutes()
    }

    /// Minimal invariants for safe downstream processing.
    pub fn validate(&self) -> Result<(), TriggerError> {
        if self.id.trim().is_empty() {
            return Err(TriggerError::EmptyField("id"));
        }

        let context_type = self.context.trigger_type();
        if context_type != self.trigger_type {
            return Err(TriggerError::ContextMismatch {
                declared: self.trigger_type.as_str().to_string(),
                context: context_type.as_str().to_string(),
            });
        }

        if self.affected_slot_ids.iter().any(|s| s.trim().is_empty()) {
            return Err(TriggerError::EmptyField("affected_slot_ids"));
        }

        let kind = self.trigger_type.as_str().to_string();
        match &self.context {
            TriggerContext::RunningLate { delay_minutes, .. }
            | TriggerContext::TransportDelay { delay_minutes, .. } => {
                if *delay_minutes <= 0 {
                    return Err(TriggerError::NonPositiveDelay(kind));
                }
            }
            TriggerContext::WeatherChange {
                precipitation_probability,
                ..
            } => {
                if *precipitation_probability > 100 {
                    return Err(TriggerError::InvalidContext(format!(
                        "precipitation probability {precipitation_probability} exceeds 100"
                    )));
                }
            }
            TriggerContext::Closure { venue, .. } => {
                if venue.trim().is_empty() {
                    return Err(TriggerError::EmptyField("context.venue"));
                }
                if self.affected_slot_ids.is_empty() {
                    return Err(TriggerError::MissingSlots(kind));
                }
            }
            TriggerContext::UserState {
                needs_break_minutes, ..
            } => {
                if needs_break_minutes.is_some_and(|m| m < 0) {
                    return Err(TriggerError::InvalidContext("negative break".to_string()));
                }
            }
            TriggerContext::UserRequest { action, .. } => match action {
                UserRequestAction::Extend { minutes } | UserRequestAction::SlowDown { minutes } => {
                    if *minutes <= 0 {
                        return Err(TriggerError::NonPositiveDelay(kind));
                    }
                }
                UserRequestAction::Skip | UserRequestAction::Replace => {
                    if self.affected_slot_ids.is_empty() {
                        return Err(TriggerError::MissingSlots(kind));
                    }
                }
            },
        }

        Ok(())
    }
}
