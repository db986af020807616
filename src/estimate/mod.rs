//! Per-vehicle estimates: time to arrival and stops remaining.

pub mod arrival;
pub mod stops_remaining;

use serde::Serialize;
use std::fmt;

pub use arrival::{ArrivalEstimate, ArrivalFactors, ProximityAdjustment, SpeedSource, estimate_arrival};
pub use stops_remaining::{
    LineSequences, StopCountMethod, StopsRemaining, estimate_stops_remaining, estimate_stops_remaining_from,
    nearest_target_stop,
};

/// Coarse reliability label. Ordered so that `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        })
    }
}
