//! detour-signals: adapters that turn raw observations (weather, venue status,
//! transit estimates, traveller messages) into validated trigger events.

mod lookup;
pub mod report;
pub mod scripted;
pub mod source;
pub mod transport;
pub mod types;
pub mod venue;
pub mod weather;

pub use report::parse_report;
pub use scripted::{load_script, parse_script, ScriptedSource};
pub use source::{Adapters, TriggerSource};
pub use transport::TransportEstimator;
pub use types::{Signal, SignalKind, TransportEstimate, UserReport, VenueStatus, WeatherSnapshot};
pub use venue::VenueWatcher;
pub use weather::WeatherDeltaDetector;
