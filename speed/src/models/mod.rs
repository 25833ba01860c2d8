use crate::{Day, MileMarker, PlateNumber, RecordedSpeed, RoadId, SpeedLimit, SpeedMph, Timestamp, DAY_IN_SECONDS};
use std::collections::BTreeSet;

pub mod io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Camera {
    pub road: RoadId,
    pub mile: MileMarker,
    pub limit: SpeedLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatcher {
    pub roads: BTreeSet<RoadId>,
}
impl Dispatcher {
    pub fn new(roads: impl IntoIterator<Item = RoadId>) -> Self {
        Self {
            roads: roads.into_iter().collect(),
        }
    }
}

/// What a connection has declared itself to be. Set once, never changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Unidentified,
    Camera(Camera),
    Dispatcher(Dispatcher),
}

/// A sighting of a plate at a mile marker, keyed elsewhere by plate and road.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub timestamp: Timestamp,
    pub mile: MileMarker,
}
impl Observation {
    /// Average speed between two sightings, regardless of which came first.
    /// `None` when both were taken at the same second.
    pub fn average_speed(&self, other: &Self) -> Option<SpeedMph> {
        let seconds = self.timestamp.abs_diff(other.timestamp);
        if seconds == 0 {
            return None;
        }
        let miles = self.mile.abs_diff(other.mile);
        Some(SpeedMph::from(miles) * 3600.0 / SpeedMph::from(seconds))
    }
}

pub fn day_of(timestamp: Timestamp) -> Day {
    timestamp / DAY_IN_SECONDS
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub plate: PlateNumber,
    pub road: RoadId,
    pub mile1: MileMarker,
    pub timestamp1: Timestamp,
    pub mile2: MileMarker,
    pub timestamp2: Timestamp,
    /// Hundredths of a mile per hour.
    pub speed: RecordedSpeed,
}
impl Ticket {
    pub fn from_observations(plate: PlateNumber, road: RoadId, a: Observation, b: Observation, speed: SpeedMph) -> Self {
        let (first, second) = if a.timestamp <= b.timestamp { (a, b) } else { (b, a) };
        Self {
            plate,
            road,
            mile1: first.mile,
            timestamp1: first.timestamp,
            mile2: second.mile,
            timestamp2: second.timestamp,
            // Float to int casts saturate, absurd speeds clamp to u16::MAX.
            speed: (speed * 100.0).round() as RecordedSpeed,
        }
    }

    /// The days the ticket starts and ends on; the same day twice if it doesn't cross midnight.
    pub fn days(&self) -> [Day; 2] {
        [day_of(self.timestamp1), day_of(self.timestamp2)]
    }
}
