//! Polling contract for trigger sources and the adapter set that turns raw
//! signals into triggers.

use anyhow::Result;
use chrono::{DateTime, Utc};

use detour_core::{ReshuffleConfig, TriggerEvent, TripSchedule};

use crate::report::parse_report;
use crate::transport::TransportEstimator;
use crate::types::Signal;
use crate::venue::VenueWatcher;
use crate::weather::WeatherDeltaDetector;

pub trait TriggerSource {
    fn name(&self) -> &str;

    /// Seconds between polls when driven by a live poller.
    fn poll_seconds(&self) -> u64;

    /// Everything this source has to report as of `now`.
    fn poll(&mut self, schedule: &TripSchedule, now: DateTime<Utc>) -> Result<Vec<TriggerEvent>>;
}

/// Stateful adapters, one per signal kind.
#[derive(Debug, Clone)]
pub struct Adapters {
    pub weather: WeatherDeltaDetector,
    pub venue: VenueWatcher,
    pub transport: TransportEstimator,
}

impl Adapters {
    pub fn new(config: &ReshuffleConfig) -> Self {
        Self {
            weather: WeatherDeltaDetector::new(config.weather),
            venue: VenueWatcher::new(),
            transport: TransportEstimator::default(),
        }
    }

    pub fn route(&mut self, signal: &Signal, schedule: &TripSchedule) -> Result<Option<TriggerEvent>> {
        match signal {
            Signal::Weather(snapshot) => self.weather.observe(snapshot.clone(), schedule),
            Signal::Venue(status) => self.venue.observe(status, schedule),
            Signal::Transport(estimate) => self.transport.evaluate(estimate, schedule),
            Signal::Report(report) => parse_report(&report.text, schedule, report.observed_at),
        }
    }
}
