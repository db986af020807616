//! How many stops separate a vehicle from the rider's stop.
//!
//! Without authoritative itineraries this is best effort: an ordered stop
//! sequence is used when the schedule feed links departures to stops, and a
//! straight-line heuristic otherwise. The method and confidence travel with
//! the count because ranking depends on them.

use serde::Serialize;
use std::collections::HashMap;

use super::Confidence;
use crate::config::EngineConfig;
use crate::feed::{ScheduleEntry, Stop};
use crate::geo::GeoPoint;
use crate::locator::{NearbyStop, nearest_stop};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCountMethod {
    NoNearbyTargetStop,
    VehicleNotNearStop,
    SameStop,
    LineSequence,
    DistanceEstimation,
}

impl StopCountMethod {
    pub fn describe(&self) -> &'static str {
        match self {
            StopCountMethod::NoNearbyTargetStop => "no nearby target stop",
            StopCountMethod::VehicleNotNearStop => "vehicle not near a stop",
            StopCountMethod::SameStop => "same stop",
            StopCountMethod::LineSequence => "line sequence",
            StopCountMethod::DistanceEstimation => "distance estimation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopsRemaining {
    /// `None` when the count cannot be determined.
    pub count: Option<u32>,
    pub confidence: Confidence,
    pub method: StopCountMethod,
    pub vehicle_stop_id: Option<String>,
    pub target_stop_id: Option<String>,
}

impl StopsRemaining {
    fn indeterminate(method: StopCountMethod, target_stop_id: Option<String>) -> Self {
        Self {
            count: None,
            confidence: Confidence::Low,
            method,
            vehicle_stop_id: None,
            target_stop_id,
        }
    }
}

/// Ordered stop ids per line, derived from schedule entries that carry a stop
/// id. Empty when the schedule feed has no such linkage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineSequences {
    by_line: HashMap<String, Vec<String>>,
}

impl LineSequences {
    /// Entries are ordered by direction then time; each stop keeps its first
    /// position, so the earliest trip of the day defines the order.
    pub fn from_schedule(entries: &[ScheduleEntry]) -> Self {
        let mut linked: Vec<&ScheduleEntry> = entries.iter().filter(|e| e.stop_id.is_some()).collect();
        linked.sort_by(|a, b| (&a.line, a.direction, a.time).cmp(&(&b.line, b.direction, b.time)));

        let mut by_line: HashMap<String, Vec<String>> = HashMap::new();
        for entry in linked {
            let Some(stop_id) = &entry.stop_id else {
                continue;
            };
            let sequence = by_line.entry(entry.line.clone()).or_default();
            if !sequence.contains(stop_id) {
                sequence.push(stop_id.clone());
            }
        }

        Self { by_line }
    }

    pub fn get(&self, line: &str) -> Option<&[String]> {
        self.by_line
            .get(line)
            .map(Vec::as_slice)
            .filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.by_line.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_line.len()
    }
}

/// Forward distance from `from` to `to` along `sequence`, wrapping around for
/// circular and round-trip lines.
pub fn sequence_distance(sequence: &[String], from: &str, to: &str) -> Option<u32> {
    let i = sequence.iter().position(|s| s == from)?;
    let j = sequence.iter().position(|s| s == to)?;
    let steps = if j >= i { j - i } else { sequence.len() - i + j };
    u32::try_from(steps).ok()
}

pub fn estimate_stops_remaining(
    vehicle: &GeoPoint,
    target: &GeoPoint,
    line: &str,
    stops: &[Stop],
    sequences: &LineSequences,
    config: &EngineConfig,
) -> StopsRemaining {
    let target_stop = nearest_target_stop(target, stops, config);
    estimate_stops_remaining_from(vehicle, target_stop, line, stops, sequences, config)
}

/// The stop a rider at `target` is taken to be waiting at.
pub fn nearest_target_stop<'a>(
    target: &GeoPoint,
    stops: &'a [Stop],
    config: &EngineConfig,
) -> Option<NearbyStop<'a>> {
    nearest_stop(target, config.target_stop_radius_m, stops, &config.bounding_box)
}

/// Same as [`estimate_stops_remaining`] with the target stop already resolved
/// through [`nearest_target_stop`], so a caller scanning many vehicles
/// resolves it once.
pub fn estimate_stops_remaining_from(
    vehicle: &GeoPoint,
    target_stop: Option<NearbyStop<'_>>,
    line: &str,
    stops: &[Stop],
    sequences: &LineSequences,
    config: &EngineConfig,
) -> StopsRemaining {
    let region = &config.bounding_box;

    let Some(target_stop) = target_stop else {
        return StopsRemaining::indeterminate(StopCountMethod::NoNearbyTargetStop, None);
    };
    let target_id = target_stop.stop.id.clone();

    let Some(vehicle_stop) = nearest_stop(vehicle, config.vehicle_stop_radius_m, stops, region) else {
        return StopsRemaining::indeterminate(StopCountMethod::VehicleNotNearStop, Some(target_id));
    };
    let vehicle_id = vehicle_stop.stop.id.clone();

    if vehicle_id == target_id {
        return StopsRemaining {
            count: Some(0),
            confidence: Confidence::High,
            method: StopCountMethod::SameStop,
            vehicle_stop_id: Some(vehicle_id),
            target_stop_id: Some(target_id),
        };
    }

    if let Some(count) = sequences
        .get(line)
        .and_then(|seq| sequence_distance(seq, &vehicle_id, &target_id))
    {
        return StopsRemaining {
            count: Some(count),
            confidence: Confidence::High,
            method: StopCountMethod::LineSequence,
            vehicle_stop_id: Some(vehicle_id),
            target_stop_id: Some(target_id),
        };
    }

    let gap_m = vehicle_stop.stop.position.distance_to(&target_stop.stop.position);
    let count = (gap_m / config.average_stop_spacing_m).round().max(1.0) as u32;

    StopsRemaining {
        count: Some(count),
        confidence: Confidence::Medium,
        method: StopCountMethod::DistanceEstimation,
        vehicle_stop_id: Some(vehicle_id),
        target_stop_id: Some(target_id),
    }
}
