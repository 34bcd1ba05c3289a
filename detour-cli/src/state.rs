use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use detour_core::{CityId, ReshuffleEvent, Trip, TriggerEvent, TripSchedule};

pub fn detour_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".detour"))
}

pub fn ensure_detour_home() -> Result<PathBuf> {
    let dir = detour_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn history_path() -> Result<PathBuf> {
    Ok(ensure_detour_home()?.join("history.jsonl"))
}

/// Load one itinerary and refuse it if it has hard schedule errors. The file
/// holds either a single itinerary or a multi-city trip; `city` picks from the
/// latter and may be omitted when it has only one city.
pub fn read_trip(path: &Path, city: Option<&str>) -> Result<TripSchedule> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
    let trip = if value.get("itineraries").is_some() {
        let bundle: Trip = serde_json::from_value(value).with_context(|| format!("parse {}", path.display()))?;
        pick_city(bundle, city).with_context(|| format!("load {}", path.display()))?
    } else {
        serde_json::from_value(value).with_context(|| format!("parse {}", path.display()))?
    };

    let report = trip.validate();
    for issue in &report.warnings {
        tracing::warn!(?issue, "schedule warning");
    }
    if !report.is_valid() {
        bail!("{} is not a valid schedule: {:?}", path.display(), report.errors);
    }
    Ok(trip)
}

fn pick_city(trip: Trip, city: Option<&str>) -> Result<TripSchedule> {
    let id = match city {
        Some(c) => CityId::new(c),
        None => match trip.cities() {
            [only] => only.clone(),
            cities => {
                let names: Vec<&str> = cities.iter().map(CityId::as_str).collect();
                bail!("trip {} has cities [{}]; pick one with --city", trip.id, names.join(", "))
            }
        },
    };
    trip.itinerary(&id)
        .cloned()
        .with_context(|| format!("trip {} has no city {id}", trip.id))
}

pub fn write_trip(path: &Path, trip: &TripSchedule) -> Result<()> {
    let json = serde_json::to_string_pretty(trip)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// A trigger file holds either one trigger object or an array of them.
pub fn read_triggers(path: &Path) -> Result<Vec<TriggerEvent>> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if s.trim_start().starts_with('[') {
        serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))
    } else {
        let one: TriggerEvent = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(vec![one])
    }
}

pub fn append_history(path: &Path, event: &ReshuffleEvent) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let line = serde_json::to_string(event)?;
    writeln!(file, "{line}").with_context(|| format!("append {}", path.display()))?;
    Ok(())
}
