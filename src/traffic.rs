//! Static time-of-day / day-of-week congestion multiplier.
//!
//! No live traffic is measured. The factor divides the nominal speed, so
//! values above 1 lengthen an estimate and values below 1 shorten it.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};
use serde::Serialize;
use std::fmt;

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficPeriod {
    Weekend,
    Peak,
    Night,
    Regular,
}

impl fmt::Display for TrafficPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrafficPeriod::Weekend => "weekend",
            TrafficPeriod::Peak => "peak",
            TrafficPeriod::Night => "night",
            TrafficPeriod::Regular => "regular",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrafficFactor {
    pub period: TrafficPeriod,
    pub factor: f64,
}

/// Picks the first matching rule: weekend, then peak windows, then the night
/// window, then the default.
pub fn traffic_factor<Tz: TimeZone>(local: &DateTime<Tz>, config: &EngineConfig) -> TrafficFactor {
    let hour = local.hour();

    let (period, factor) = if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        (TrafficPeriod::Weekend, config.weekend_traffic_factor)
    } else if config.peak_windows.iter().any(|w| w.contains(hour)) {
        (TrafficPeriod::Peak, config.peak_traffic_factor)
    } else if config.night_window.contains(hour) {
        (TrafficPeriod::Night, config.night_traffic_factor)
    } else {
        (TrafficPeriod::Regular, config.default_traffic_factor)
    };

    TrafficFactor { period, factor }
}
