//! Trip aggregate: owns one itinerary per city, addressed by a stable id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::schedule::TripSchedule;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CityId(pub String);

impl CityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "TripRecord")]
pub struct Trip {
    pub id: String,
    itineraries: Vec<TripSchedule>,
    #[serde(skip)]
    index: HashMap<CityId, usize>,
    order: Vec<CityId>,
}

/// Wire shape of a [`Trip`]; the lookup index is rebuilt on the way in.
#[derive(Deserialize)]
struct TripRecord {
    id: String,
    itineraries: Vec<TripSchedule>,
    order: Vec<CityId>,
}

impl TryFrom<TripRecord> for Trip {
    type Error = String;

    fn try_from(record: TripRecord) -> Result<Self, Self::Error> {
        if record.order.len() != record.itineraries.len() {
            return Err(format!(
                "trip {}: {} cities for {} itineraries",
                record.id,
                record.order.len(),
                record.itineraries.len()
            ));
        }
        let mut trip = Trip {
            id: record.id,
            itineraries: record.itineraries,
            index: HashMap::new(),
            order: record.order,
        };
        trip.reindex();
        if trip.index.len() != trip.order.len() {
            return Err(format!("trip {}: duplicate city id", trip.id));
        }
        Ok(trip)
    }
}

impl Trip {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Insert or replace the itinerary for `city`.
    pub fn upsert(&mut self, city: CityId, itinerary: TripSchedule) {
        if let Some(&slot) = self.index.get(&city) {
            self.itineraries[slot] = itinerary;
            return;
        }
        self.index.insert(city.clone(), self.itineraries.len());
        self.order.push(city);
        self.itineraries.push(itinerary);
    }

    pub fn itinerary(&self, city: &CityId) -> Option<&TripSchedule> {
        self.index.get(city).map(|&i| &self.itineraries[i])
    }

    pub fn itinerary_mut(&mut self, city: &CityId) -> Option<&mut TripSchedule> {
        self.index.get(city).map(|&i| &mut self.itineraries[i])
    }

    /// Cities in insertion order.
    pub fn cities(&self) -> &[CityId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.itineraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itineraries.is_empty()
    }

    fn reindex(&mut self) {
        self.index = self
            .order
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
    }
}
