//! Turns per-vehicle estimates into one row per line.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::estimate::{ArrivalEstimate, Confidence, StopsRemaining};

/// One vehicle evaluated against one reference point (a candidate stop, or
/// the rider when no stop is nearby).
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub line: String,
    pub device_id: String,
    pub arrival: ArrivalEstimate,
    pub stops_remaining: Option<StopsRemaining>,
    pub distance_to_rider_m: f64,
    pub distance_to_stop_m: Option<f64>,
    pub target_stop_id: Option<String>,
    pub target_stop_description: Option<String>,
}

impl Candidate {
    /// Distance from the vehicle to the point the estimate was made for.
    pub fn reference_distance_m(&self) -> f64 {
        self.arrival.distance_m
    }

    pub fn stops_count(&self) -> Option<u32> {
        self.stops_remaining.as_ref().and_then(|s| s.count)
    }

    /// The weaker of the arrival and stop-count confidences. An indeterminate
    /// stop count carries no information and does not pull the row down.
    pub fn confidence(&self) -> Confidence {
        match &self.stops_remaining {
            Some(s) if s.count.is_some() => self.arrival.confidence.min(s.confidence),
            _ => self.arrival.confidence,
        }
    }

    fn nearest_anchor_m(&self) -> f64 {
        match self.distance_to_stop_m {
            Some(d) => d.min(self.distance_to_rider_m),
            None => self.distance_to_rider_m,
        }
    }
}

/// Stops remaining first when known, otherwise distance; then distance to
/// whichever of rider or stop is nearer. The trailing keys only make the
/// order total.
pub fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    let primary = match (a.stops_count(), b.stops_count()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.reference_distance_m().total_cmp(&b.reference_distance_m()),
    };

    primary
        .then_with(|| a.nearest_anchor_m().total_cmp(&b.nearest_anchor_m()))
        .then_with(|| a.reference_distance_m().total_cmp(&b.reference_distance_m()))
        .then_with(|| a.line.cmp(&b.line))
        .then_with(|| a.device_id.cmp(&b.device_id))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RankedLines {
    pub rows: Vec<Candidate>,
    /// Lines that qualified but did not fit under `max_rows`.
    pub suppressed_lines: usize,
    pub dropped_low_confidence: usize,
}

pub fn rank(candidates: Vec<Candidate>, config: &EngineConfig) -> RankedLines {
    let mut dropped_low_confidence = 0;
    let mut best_by_line: BTreeMap<String, Candidate> = BTreeMap::new();

    for candidate in candidates {
        if candidate.confidence() == Confidence::Low
            && candidate.reference_distance_m() >= config.low_confidence_keep_m
        {
            dropped_low_confidence += 1;
            continue;
        }

        match best_by_line.get(&candidate.line) {
            Some(current) if rank_order(current, &candidate) != Ordering::Greater => {}
            _ => {
                best_by_line.insert(candidate.line.clone(), candidate);
            }
        }
    }

    let mut rows: Vec<Candidate> = best_by_line.into_values().collect();
    rows.sort_by(rank_order);

    let suppressed_lines = rows.len().saturating_sub(config.max_rows);
    rows.truncate(config.max_rows);

    RankedLines {
        rows,
        suppressed_lines,
        dropped_low_confidence,
    }
}
