//! Tunables for the estimation engine and the feed plumbing around it.
//!
//! [`EngineConfig::default`] carries the production constants; a JSON file
//! loaded through [`AppConfig::load`] may override any subset of them.

use anyhow::{Result, bail};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::geo::{BoundingBox, UtmProjection};

/// Inclusive hour range. `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Oldest accepted observation, measured from ingestion time.
    pub max_data_age_secs: i64,
    pub min_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub default_speed_kmh: f64,

    pub near_distance_m: f64,
    pub near_speed_cap_kmh: f64,
    pub far_distance_m: f64,
    pub far_speed_cap_kmh: f64,
    pub high_confidence_max_m: f64,
    pub low_confidence_min_m: f64,
    pub acceleration_factor: f64,

    pub default_traffic_factor: f64,
    pub weekend_traffic_factor: f64,
    pub peak_traffic_factor: f64,
    pub night_traffic_factor: f64,
    pub peak_windows: Vec<HourWindow>,
    pub night_window: HourWindow,

    /// Radius around the rider in which candidate stops are looked up.
    pub stop_search_radius_m: f64,
    /// Radius around a candidate stop (or the rider) in which vehicles are considered.
    pub vehicle_search_radius_m: f64,
    pub max_candidate_stops: usize,
    pub target_stop_radius_m: f64,
    pub vehicle_stop_radius_m: f64,
    pub average_stop_spacing_m: f64,

    /// Low-confidence rows closer than this are still surfaced.
    pub low_confidence_keep_m: f64,
    pub max_rows: usize,
    pub max_upcoming_times: usize,

    pub bounding_box: BoundingBox,
    pub utm: UtmProjection,
    /// Offset applied to timestamps without one and to the traffic clock.
    pub utc_offset_hours: i32,
    /// Refuse to combine vehicle and stop snapshots fetched further apart than this.
    pub max_snapshot_skew_secs: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_data_age_secs: 15 * 60,
            min_speed_kmh: 0.0,
            max_speed_kmh: 60.0,
            default_speed_kmh: 15.0,

            near_distance_m: 500.0,
            near_speed_cap_kmh: 12.0,
            far_distance_m: 2000.0,
            far_speed_cap_kmh: 25.0,
            high_confidence_max_m: 2000.0,
            low_confidence_min_m: 3000.0,
            acceleration_factor: 1.2,

            default_traffic_factor: 1.3,
            weekend_traffic_factor: 1.1,
            peak_traffic_factor: 1.6,
            night_traffic_factor: 0.8,
            peak_windows: vec![HourWindow::new(7, 9), HourWindow::new(17, 19)],
            night_window: HourWindow::new(22, 6),

            stop_search_radius_m: 500.0,
            vehicle_search_radius_m: 5000.0,
            max_candidate_stops: 3,
            target_stop_radius_m: 500.0,
            vehicle_stop_radius_m: 300.0,
            average_stop_spacing_m: 400.0,

            low_confidence_keep_m: 1000.0,
            max_rows: 5,
            max_upcoming_times: 3,

            bounding_box: BoundingBox {
                min_lat: -23.1,
                max_lat: -22.7,
                min_lon: -43.8,
                max_lon: -43.1,
            },
            utm: UtmProjection::default(),
            utc_offset_hours: -3,
            max_snapshot_skew_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn max_data_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_data_age_secs)
    }

    /// Falls back to UTC if the configured offset is out of range; `validate`
    /// rejects such configs up front.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Reads a JSON file of overrides; missing fields keep their defaults.
    pub fn load(path: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_data_age_secs <= 0 {
            bail!("max_data_age_secs must be positive");
        }
        if self.min_speed_kmh < 0.0 || self.min_speed_kmh > self.max_speed_kmh {
            bail!(
                "speed range [{}, {}] is invalid",
                self.min_speed_kmh,
                self.max_speed_kmh
            );
        }
        for (name, value) in [
            ("default_speed_kmh", self.default_speed_kmh),
            ("near_speed_cap_kmh", self.near_speed_cap_kmh),
            ("far_speed_cap_kmh", self.far_speed_cap_kmh),
            ("stop_search_radius_m", self.stop_search_radius_m),
            ("vehicle_search_radius_m", self.vehicle_search_radius_m),
            ("target_stop_radius_m", self.target_stop_radius_m),
            ("vehicle_stop_radius_m", self.vehicle_stop_radius_m),
            ("average_stop_spacing_m", self.average_stop_spacing_m),
            ("acceleration_factor", self.acceleration_factor),
            ("default_traffic_factor", self.default_traffic_factor),
            ("weekend_traffic_factor", self.weekend_traffic_factor),
            ("peak_traffic_factor", self.peak_traffic_factor),
            ("night_traffic_factor", self.night_traffic_factor),
        ] {
            if !(value > 0.0) {
                bail!("{name} must be positive, got {value}");
            }
        }
        if self.near_distance_m >= self.far_distance_m {
            bail!("near_distance_m must be below far_distance_m");
        }
        for window in self.peak_windows.iter().chain(std::iter::once(&self.night_window)) {
            if window.start > 23 || window.end > 23 {
                bail!("hour window {}-{} is out of range", window.start, window.end);
            }
        }
        if !self.bounding_box.is_well_formed() {
            bail!("bounding box {:?} is malformed", self.bounding_box);
        }
        if !(1..=60).contains(&self.utm.zone) {
            bail!("UTM zone {} is out of range", self.utm.zone);
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            bail!("utc_offset_hours {} is out of range", self.utc_offset_hours);
        }
        if self.max_rows == 0 {
            bail!("max_rows must be at least 1");
        }
        Ok(())
    }
}

/// How a feed expects its API key, if any.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedAuth {
    #[default]
    None,
    Header { header_name: String, key: String },
    UrlParam { param_name: String, key: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSource {
    pub url: String,
    #[serde(default)]
    pub auth: FeedAuth,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSources {
    pub vehicles: FeedSource,
    pub stops: FeedSource,
    pub schedules: FeedSource,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub vehicles_every_secs: u64,
    pub stops_every_secs: u64,
    pub schedules_every_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            vehicles_every_secs: 30,
            stops_every_secs: 7 * 24 * 3600,
            schedules_every_secs: 7 * 24 * 3600,
            fetch_timeout_secs: 20,
        }
    }
}

impl RefreshConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Everything the long-running `watch` mode needs.
///
/// ```json
/// {
///   "feeds": {
///     "vehicles": { "url": "https://example.org/gps.json" },
///     "stops": { "url": "https://example.org/stops.json" },
///     "schedules": {
///       "url": "https://example.org/schedules.json",
///       "auth": { "type": "url_param", "param_name": "token", "key": "..." }
///     }
///   },
///   "refresh": { "vehicles_every_secs": 20 },
///   "engine": { "max_rows": 8 }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feeds: FeedSources,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(content)?;
        config.engine.validate()?;
        if config.refresh.fetch_timeout_secs == 0 {
            bail!("fetch_timeout_secs must be positive");
        }
        Ok(config)
    }
}
