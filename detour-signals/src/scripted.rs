//! Scripted signal feeds for simulations.
//!
//! Expected CSV (header row required, trailing columns optional):
//!   at,kind,subject,condition,precipitation,temperature_c,wind_kph,day,open,reopens_at,mode,minutes,text
//!   2026-05-02 09:40,weather,,rain,80,17,12,,,,,,
//!   2026-05-02 10:05,venue,Taberna da Rua,,,,,,false,15:00,,,
//!   2026-05-02 10:30,report,,,,,,,,,,,"running 20 min late"
//!
//! `at` is trip-local wall time.

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use detour_core::time::parse_local_to_utc;
use detour_core::{CommuteMode, ReshuffleConfig, TriggerEvent, TripSchedule, WeatherCondition};

use crate::source::{Adapters, TriggerSource};
use crate::types::{Signal, SignalKind, TransportEstimate, UserReport, VenueStatus, WeatherSnapshot};

#[derive(Debug, Deserialize)]
struct ScriptRow {
    at: String,
    kind: SignalKind,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    condition: Option<WeatherCondition>,
    #[serde(default)]
    precipitation: Option<u8>,
    #[serde(default)]
    temperature_c: Option<f64>,
    #[serde(default)]
    wind_kph: Option<f64>,
    #[serde(default)]
    day: Option<u32>,
    #[serde(default)]
    open: Option<bool>,
    #[serde(default)]
    reopens_at: Option<String>,
    #[serde(default)]
    mode: Option<CommuteMode>,
    #[serde(default)]
    minutes: Option<i32>,
    #[serde(default)]
    text: Option<String>,
}

impl ScriptRow {
    fn subject(&self) -> Result<String> {
        self.subject
            .clone()
            .filter(|s| !s.trim().is_empty())
            .with_context(|| format!("{} row needs a subject", self.kind.as_str()))
    }

    fn into_signal(self, timezone: &str) -> Result<Signal> {
        let observed_at = parse_local_to_utc(self.at.trim(), timezone)?;
        let signal = match self.kind {
            SignalKind::Weather => Signal::Weather(WeatherSnapshot {
                observed_at,
                condition: self.condition.context("weather row needs a condition")?,
                precipitation_probability: self.precipitation.unwrap_or(0),
                temperature_c: self.temperature_c.unwrap_or(20.0),
                wind_kph: self.wind_kph.unwrap_or(0.0),
                day_number: self.day,
            }),
            SignalKind::Venue => {
                let reopens_at = match self.reopens_at.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                    Some(s) => Some(
                        NaiveTime::parse_from_str(s, "%H:%M").with_context(|| format!("invalid reopens_at '{s}'"))?,
                    ),
                    None => None,
                };
                Signal::Venue(VenueStatus {
                    observed_at,
                    venue: self.subject()?,
                    open: self.open.unwrap_or(false),
                    reason: self.text.clone().filter(|s| !s.trim().is_empty()),
                    reopens_at,
                })
            }
            SignalKind::Transport => Signal::Transport(TransportEstimate {
                observed_at,
                slot_id: self.subject()?,
                mode: self.mode.unwrap_or(CommuteMode::Transit),
                estimated_minutes: self.minutes.context("transport row needs minutes")?,
                line: self.text.clone().filter(|s| !s.trim().is_empty()),
            }),
            SignalKind::Report => Signal::Report(UserReport {
                observed_at,
                text: self.text.clone().context("report row needs text")?,
            }),
        };
        Ok(signal)
    }
}

/// Parse a scripted feed, ordered by observation time.
pub fn parse_script<R: Read>(reader: R, timezone: &str) -> Result<Vec<Signal>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut out = Vec::new();
    for (idx, row) in rdr.deserialize::<ScriptRow>().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        let row = row.with_context(|| format!("reading script line {line}"))?;
        out.push(row.into_signal(timezone).with_context(|| format!("script line {line}"))?);
    }
    out.sort_by_key(Signal::observed_at);
    Ok(out)
}

pub fn load_script(path: &Path, timezone: &str) -> Result<Vec<Signal>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_script(file, timezone)
}

/// Replays recorded signals through the adapters as the clock passes them.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    name: String,
    poll_seconds: u64,
    pending: VecDeque<Signal>,
    adapters: Adapters,
}

impl ScriptedSource {
    pub fn new(name: impl Into<String>, mut signals: Vec<Signal>, poll_seconds: u64, config: &ReshuffleConfig) -> Self {
        signals.sort_by_key(Signal::observed_at);
        Self {
            name: name.into(),
            poll_seconds: poll_seconds.max(1),
            pending: signals.into(),
            adapters: Adapters::new(config),
        }
    }

    /// One source per signal kind, each on that kind's polling cadence.
    pub fn per_kind(signals: Vec<Signal>, config: &ReshuffleConfig) -> Vec<ScriptedSource> {
        let mut grouped: BTreeMap<SignalKind, Vec<Signal>> = BTreeMap::new();
        for signal in signals {
            grouped.entry(signal.kind()).or_default().push(signal);
        }
        grouped
            .into_iter()
            .map(|(kind, signals)| {
                ScriptedSource::new(kind.as_str(), signals, kind.poll_seconds(&config.polling), config)
            })
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_at(&self) -> Option<DateTime<Utc>> {
        self.pending.front().map(Signal::observed_at)
    }
}

impl TriggerSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_seconds(&self) -> u64 {
        self.poll_seconds
    }

    fn poll(&mut self, schedule: &TripSchedule, now: DateTime<Utc>) -> Result<Vec<TriggerEvent>> {
        let mut out = Vec::new();
        while self.pending.front().is_some_and(|s| s.observed_at() <= now) {
            let Some(signal) = self.pending.pop_front() else {
                break;
            };
            match self.adapters.route(&signal, schedule) {
                Ok(Some(trigger)) => {
                    debug!(source = %self.name, trigger = %trigger.id, kind = trigger.trigger_type.as_str(), "signal raised trigger");
                    out.push(trigger);
                }
                Ok(None) => {}
                Err(e) => warn!(source = %self.name, kind = signal.kind().as_str(), error = %e, "signal rejected"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use detour_core::{Activity, ActivityCategory, Booking, DaySchedule, TimeSlot, TriggerType};

    const SCRIPT: &str = "\
at,kind,subject,condition,precipitation,temperature_c,wind_kph,day,open,reopens_at,mode,minutes,text
2026-05-02 10:30,report,,,,,,,,,,,\"running 20 min late, sorry\"
2026-05-02 09:40,weather,,rain,80,17,12,,,,,,
2026-05-02 10:05,venue,Taberna da Rua,,,,,,false,15:00,,,kitchen fire
";

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn schedule() -> TripSchedule {
        TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
                .with_slot(
                    TimeSlot::new("museum", t(9, 0), t(11, 0))
                        .with_activity(Activity::new("m", "Gulbenkian", ActivityCategory::Museum, 120)),
                )
                .with_slot(
                    TimeSlot::new("park", t(11, 30), t(12, 30))
                        .with_activity(Activity::new("p", "Estrela Garden", ActivityCategory::Park, 60)),
                )
                .with_slot(
                    TimeSlot::new("lunch", t(13, 0), t(14, 30))
                        .with_activity(Activity::new("l", "Taberna da Rua", ActivityCategory::Restaurant, 90))
                        .with_booking(Booking::new("TAB-2291")),
                ),
        )
    }

    fn lisbon(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, h - 1, m, 0).unwrap()
    }

    #[test]
    fn test_parse_script_orders_rows() {
        let signals = parse_script(SCRIPT.as_bytes(), "Europe/Lisbon").unwrap();
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].kind(), SignalKind::Weather);
        assert_eq!(signals[0].observed_at(), lisbon(9, 40));
        match &signals[1] {
            Signal::Venue(v) => {
                assert!(!v.open);
                assert_eq!(v.reopens_at, Some(t(15, 0)));
                assert_eq!(v.reason.as_deref(), Some("kitchen fire"));
            }
            other => panic!("expected venue row, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_row_names_its_line() {
        let script = "at,kind,subject,condition\n2026-05-02 09:40,weather,,\n";
        let err = parse_script(script.as_bytes(), "Europe/Lisbon").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_replay_releases_signals_as_the_clock_passes() {
        let config = ReshuffleConfig::default();
        let signals = parse_script(SCRIPT.as_bytes(), "Europe/Lisbon").unwrap();
        let mut source = ScriptedSource::new("script", signals, 60, &config);
        let sched = schedule();

        assert!(source.poll(&sched, lisbon(9, 0)).unwrap().is_empty());
        assert_eq!(source.remaining(), 3);

        let first = source.poll(&sched, lisbon(10, 10)).unwrap();
        let kinds: Vec<_> = first.iter().map(|t| t.trigger_type).collect();
        assert_eq!(kinds, vec![TriggerType::WeatherChange, TriggerType::Closure]);

        let second = source.poll(&sched, lisbon(11, 0)).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].trigger_type, TriggerType::RunningLate);
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_per_kind_uses_polling_cadence() {
        let config = ReshuffleConfig::default();
        let signals = parse_script(SCRIPT.as_bytes(), "Europe/Lisbon").unwrap();
        let sources = ScriptedSource::per_kind(signals, &config);
        let cadence: Vec<_> = sources.iter().map(|s| (s.name().to_string(), s.poll_seconds())).collect();
        assert_eq!(
            cadence,
            vec![
                ("weather".to_string(), config.polling.weather_seconds),
                ("venue".to_string(), config.polling.venue_seconds),
                ("report".to_string(), config.polling.transport_seconds),
            ]
        );
    }
}
