//! GPS pings and the two validators every ping must pass.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{Feature, Loose};
use crate::config::EngineConfig;
use crate::geo::GeoPoint;

/// Vehicle properties as published upstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVehicle {
    #[serde(default)]
    pub device_id: Option<Loose>,
    #[serde(default)]
    pub local_timestamp: Option<Loose>,
    #[serde(default)]
    pub ingest_timestamp: Option<Loose>,
    #[serde(default)]
    pub speed: Option<Loose>,
    #[serde(default)]
    pub latitude: Option<Loose>,
    #[serde(default)]
    pub longitude: Option<Loose>,
    #[serde(default)]
    pub line: Option<Loose>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VehicleRejection {
    #[error("latitude or longitude missing or not numeric")]
    MissingCoordinates,

    #[error("position {lat},{lon} is outside the service region")]
    OutsideServiceRegion { lat: f64, lon: f64 },

    #[error("observation timestamp missing or unreadable")]
    MissingTimestamp,

    #[error("observation is {0}s newer than its ingestion time")]
    FromTheFuture(i64),

    #[error("observation is {0}s old")]
    Stale(i64),

    #[error("reported speed {0} km/h is implausible")]
    ImplausibleSpeed(f64),

    #[error("vehicle has no line assigned")]
    NotInOperation,
}

impl VehicleRejection {
    /// Stable key used in ingest statistics.
    pub fn code(&self) -> &'static str {
        match self {
            VehicleRejection::MissingCoordinates => "missing_coordinates",
            VehicleRejection::OutsideServiceRegion { .. } => "outside_region",
            VehicleRejection::MissingTimestamp => "missing_timestamp",
            VehicleRejection::FromTheFuture(_) => "future_timestamp",
            VehicleRejection::Stale(_) => "stale",
            VehicleRejection::ImplausibleSpeed(_) => "implausible_speed",
            VehicleRejection::NotInOperation => "not_in_operation",
        }
    }
}

/// A ping that passed validation. Fields are no longer optional except speed,
/// which upstream legitimately omits.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleObservation {
    pub device_id: String,
    pub line: String,
    pub position: GeoPoint,
    pub observed_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub speed_kmh: Option<f64>,
}

/// What the freshness/plausibility check extracts from a raw ping.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshPosition {
    pub position: GeoPoint,
    pub observed_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub speed_kmh: Option<f64>,
}

/// Coordinates, region, age and speed checks.
///
/// `fetched_at` stands in for the ingestion time when the record has none.
/// The age bound is inclusive: a ping exactly `max_data_age` old is kept.
pub fn check_freshness(
    raw: &RawVehicle,
    geometry_point: Option<(f64, f64)>,
    fetched_at: DateTime<Utc>,
    config: &EngineConfig,
) -> Result<FreshPosition, VehicleRejection> {
    let lat = raw.latitude.as_ref().and_then(Loose::as_f64);
    let lon = raw.longitude.as_ref().and_then(Loose::as_f64);
    // GeoJSON order is lon, lat
    let (lat, lon) = match (lat, lon, geometry_point) {
        (Some(lat), Some(lon), _) => (lat, lon),
        (_, _, Some((lon, lat))) => (lat, lon),
        _ => return Err(VehicleRejection::MissingCoordinates),
    };

    let position = GeoPoint::new(lat, lon);
    if !config.bounding_box.contains(&position) {
        return Err(VehicleRejection::OutsideServiceRegion { lat, lon });
    }

    let offset = config.local_offset();
    let observed_at = raw
        .local_timestamp
        .as_ref()
        .and_then(|t| t.as_timestamp(&offset))
        .ok_or(VehicleRejection::MissingTimestamp)?;
    let ingested_at = raw
        .ingest_timestamp
        .as_ref()
        .and_then(|t| t.as_timestamp(&offset))
        .unwrap_or(fetched_at);

    let age = ingested_at - observed_at;
    if age < chrono::Duration::zero() {
        return Err(VehicleRejection::FromTheFuture(-age.num_seconds()));
    }
    if age > config.max_data_age() {
        return Err(VehicleRejection::Stale(age.num_seconds()));
    }

    let speed_kmh = raw.speed.as_ref().and_then(Loose::as_f64);
    if let Some(speed) = speed_kmh {
        if speed < config.min_speed_kmh || speed > config.max_speed_kmh {
            return Err(VehicleRejection::ImplausibleSpeed(speed));
        }
    }

    Ok(FreshPosition {
        position,
        observed_at,
        ingested_at,
        speed_kmh,
    })
}

/// A vehicle is in operation when it carries a non-blank line.
pub fn check_in_operation(raw: &RawVehicle) -> Result<String, VehicleRejection> {
    raw.line
        .as_ref()
        .and_then(Loose::as_text)
        .ok_or(VehicleRejection::NotInOperation)
}

impl VehicleObservation {
    pub fn from_feature(
        feature: &Feature<RawVehicle>,
        fetched_at: DateTime<Utc>,
        config: &EngineConfig,
    ) -> Result<Self, VehicleRejection> {
        Self::from_raw(
            &feature.properties,
            feature.geometry.as_ref().and_then(|g| g.point()),
            fetched_at,
            config,
        )
    }

    pub fn from_raw(
        raw: &RawVehicle,
        geometry_point: Option<(f64, f64)>,
        fetched_at: DateTime<Utc>,
        config: &EngineConfig,
    ) -> Result<Self, VehicleRejection> {
        let fresh = check_freshness(raw, geometry_point, fetched_at, config)?;
        let line = check_in_operation(raw)?;

        Ok(Self {
            device_id: raw
                .device_id
                .as_ref()
                .and_then(Loose::as_text)
                .unwrap_or_default(),
            line,
            position: fresh.position,
            observed_at: fresh.observed_at,
            ingested_at: fresh.ingested_at,
            speed_kmh: fresh.speed_kmh,
        })
    }

    /// Reported speed when it carries information; zero means "unknown".
    pub fn usable_speed(&self) -> Option<f64> {
        self.speed_kmh.filter(|s| *s > 0.0)
    }
}
