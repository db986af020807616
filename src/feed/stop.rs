use serde::Deserialize;

use super::{Feature, Loose};
use crate::config::EngineConfig;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStop {
    #[serde(default)]
    pub stop_id: Option<Loose>,
    #[serde(default)]
    pub description: Option<Loose>,
    #[serde(default)]
    pub status: Option<Loose>,
    #[serde(default)]
    pub structure_type: Option<Loose>,
    #[serde(default)]
    pub category: Option<Loose>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    Active,
    Inactive,
}

impl StopStatus {
    /// Upstream writes `ATIVA` / `DESATIVADA`; anything else is treated as inactive.
    pub fn parse(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("ATIVA") => StopStatus::Active,
            _ => StopStatus::Inactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StopRejection {
    #[error("stop has no identifier")]
    MissingId,

    #[error("stop {0} has no point geometry")]
    MissingPosition(String),

    #[error("stop {id} converts to {lat},{lon}, outside the service region")]
    OutsideServiceRegion { id: String, lat: f64, lon: f64 },
}

impl StopRejection {
    pub fn code(&self) -> &'static str {
        match self {
            StopRejection::MissingId => "missing_id",
            StopRejection::MissingPosition(_) => "missing_position",
            StopRejection::OutsideServiceRegion { .. } => "outside_region",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub description: String,
    pub status: StopStatus,
    pub structure_type: Option<String>,
    pub category: Option<String>,
    pub position: GeoPoint,
}

impl Stop {
    /// Reads the grid position from the feature geometry and converts it.
    /// Stops that land outside the service region are unusable and dropped.
    pub fn from_feature(
        feature: &Feature<RawStop>,
        config: &EngineConfig,
    ) -> Result<Self, StopRejection> {
        let raw = &feature.properties;
        let id = raw
            .stop_id
            .as_ref()
            .and_then(Loose::as_text)
            .ok_or(StopRejection::MissingId)?;

        let (easting, northing) = feature
            .geometry
            .as_ref()
            .and_then(|g| g.point())
            .ok_or_else(|| StopRejection::MissingPosition(id.clone()))?;

        let position = config.utm.to_geographic(easting, northing);
        if !config.bounding_box.contains(&position) {
            return Err(StopRejection::OutsideServiceRegion {
                id,
                lat: position.lat,
                lon: position.lon,
            });
        }

        Ok(Self {
            id,
            description: raw
                .description
                .as_ref()
                .and_then(Loose::as_text)
                .unwrap_or_default(),
            status: StopStatus::parse(raw.status.as_ref().and_then(Loose::as_text).as_deref()),
            structure_type: raw.structure_type.as_ref().and_then(Loose::as_text),
            category: raw.category.as_ref().and_then(Loose::as_text),
            position,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == StopStatus::Active
    }
}
