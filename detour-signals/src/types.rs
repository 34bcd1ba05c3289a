//! Raw observations as the data-fetching collaborators hand them over.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use detour_core::{CommuteMode, PollingIntervals, WeatherCondition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub observed_at: DateTime<Utc>,
    pub condition: WeatherCondition,
    pub precipitation_probability: u8,
    pub temperature_c: f64,
    pub wind_kph: f64,
    /// Forecast day; `None` for current conditions.
    #[serde(default)]
    pub day_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueStatus {
    pub observed_at: DateTime<Utc>,
    pub venue: String,
    pub open: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reopens_at: Option<NaiveTime>,
}

/// Live travel-time estimate for the commute into `slot_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEstimate {
    pub observed_at: DateTime<Utc>,
    pub slot_id: String,
    pub mode: CommuteMode,
    pub estimated_minutes: i32,
    #[serde(default)]
    pub line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReport {
    pub observed_at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Weather,
    Venue,
    Transport,
    Report,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Weather => "weather",
            SignalKind::Venue => "venue",
            SignalKind::Transport => "transport",
            SignalKind::Report => "report",
        }
    }

    /// How often a live poller should look at this kind of signal.
    ///
    /// Traveller reports ride on the transport cadence, the shortest one.
    pub fn poll_seconds(&self, polling: &PollingIntervals) -> u64 {
        match self {
            SignalKind::Weather => polling.weather_seconds,
            SignalKind::Venue => polling.venue_seconds,
            SignalKind::Transport | SignalKind::Report => polling.transport_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Signal {
    Weather(WeatherSnapshot),
    Venue(VenueStatus),
    Transport(TransportEstimate),
    Report(UserReport),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Weather(_) => SignalKind::Weather,
            Signal::Venue(_) => SignalKind::Venue,
            Signal::Transport(_) => SignalKind::Transport,
            Signal::Report(_) => SignalKind::Report,
        }
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        match self {
            Signal::Weather(s) => s.observed_at,
            Signal::Venue(s) => s.observed_at,
            Signal::Transport(s) => s.observed_at,
            Signal::Report(s) => s.observed_at,
        }
    }
}
