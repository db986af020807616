//! Decoding of the upstream feeds into validated, immutable records.
//!
//! Upstream publishes loosely typed GeoJSON-like documents: numbers arrive as
//! strings (sometimes with a decimal comma), fields go missing, timestamps
//! come with or without an offset. The raw layer here tolerates all of that
//! and the per-feed parsers turn each record into either a typed value or a
//! rejection reason. Downstream code never sees a raw record.

pub mod schedule;
pub mod stats;
pub mod stop;
pub mod vehicle;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::debug;

pub use schedule::{Direction, ScheduleEntry, ScheduleRejection};
pub use stats::IngestStats;
pub use stop::{Stop, StopRejection, StopStatus};
pub use vehicle::{VehicleObservation, VehicleRejection};

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Vehicles,
    Stops,
    Schedules,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedKind::Vehicles => "vehicles",
            FeedKind::Stops => "stops",
            FeedKind::Schedules => "schedules",
        })
    }
}

/// A JSON scalar that may be a number or a string holding one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Loose {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl Loose {
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Loose::Number(n) => *n,
            Loose::Text(s) => s.trim().replace(',', ".").parse().ok()?,
            Loose::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Trimmed text form; blank strings count as absent.
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            Loose::Number(n) => n.to_string(),
            Loose::Text(s) => s.trim().to_string(),
            Loose::Other(_) => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    /// ISO 8601 text, with or without offset, or epoch seconds/milliseconds.
    /// Naive values are read in `offset`.
    pub fn as_timestamp(&self, offset: &FixedOffset) -> Option<DateTime<Utc>> {
        match self {
            Loose::Number(n) => epoch_to_utc(*n),
            Loose::Text(s) => parse_timestamp(s.trim(), offset),
            Loose::Other(_) => None,
        }
    }
}

fn epoch_to_utc(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    // Anything past ~1973 in milliseconds is larger than any plausible epoch second.
    let millis = if value > 1e11 { value } else { value * 1000.0 };
    DateTime::from_timestamp_millis(millis as i64)
}

pub fn parse_timestamp(text: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse::<f64>().ok().and_then(epoch_to_utc);
    }
    None
}

#[derive(Debug, Clone, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<Loose>,
}

impl Geometry {
    /// First two coordinates of a `Point`, in feed order.
    pub fn point(&self) -> Option<(f64, f64)> {
        if !self.kind.is_empty() && !self.kind.eq_ignore_ascii_case("point") {
            return None;
        }
        match self.coordinates.as_slice() {
            [x, y, ..] => Some((x.as_f64()?, y.as_f64()?)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feature<P: Default> {
    #[serde(default)]
    pub properties: P,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// Rejection key for a record whose JSON shape cannot be read at all.
pub const MALFORMED_RECORD: &str = "malformed_record";

/// Only the envelope is decoded strictly; each feature is decoded on its own
/// so one malformed record cannot sink the whole document.
#[derive(Debug, Deserialize)]
struct RawCollection {
    #[serde(default)]
    features: Vec<serde_json::Value>,
}

fn decode_each<T: DeserializeOwned>(values: Vec<serde_json::Value>, stats: &mut IngestStats) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(feed = %stats.feed, error = %e, "Malformed record skipped");
                stats.record_rejected(MALFORMED_RECORD);
                None
            }
        })
        .collect()
}

/// Parses a vehicle feed, keeping only records that pass both validators.
pub fn parse_vehicles(
    bytes: &[u8],
    fetched_at: DateTime<Utc>,
    config: &EngineConfig,
) -> Result<(Vec<VehicleObservation>, IngestStats)> {
    let collection: RawCollection = serde_json::from_slice(bytes)?;
    let mut stats = IngestStats::new(FeedKind::Vehicles);
    let features: Vec<Feature<vehicle::RawVehicle>> = decode_each(collection.features, &mut stats);
    let mut vehicles = Vec::with_capacity(features.len());

    for feature in &features {
        match VehicleObservation::from_feature(feature, fetched_at, config) {
            Ok(v) => {
                stats.record_accepted();
                vehicles.push(v);
            }
            Err(reason) => stats.record_rejected(reason.code()),
        }
    }

    Ok((vehicles, stats))
}

pub fn parse_stops(bytes: &[u8], config: &EngineConfig) -> Result<(Vec<Stop>, IngestStats)> {
    let collection: RawCollection = serde_json::from_slice(bytes)?;
    let mut stats = IngestStats::new(FeedKind::Stops);
    let features: Vec<Feature<stop::RawStop>> = decode_each(collection.features, &mut stats);
    let mut stops = Vec::with_capacity(features.len());

    for feature in &features {
        match Stop::from_feature(feature, config) {
            Ok(s) => {
                stats.record_accepted();
                stops.push(s);
            }
            Err(reason) => stats.record_rejected(reason.code()),
        }
    }

    Ok((stops, stats))
}

/// The schedule feed shows up both as a feature collection and as a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScheduleDocument {
    Records(Vec<serde_json::Value>),
    Collection(RawCollection),
}

pub fn parse_schedules(bytes: &[u8]) -> Result<(Vec<ScheduleEntry>, IngestStats)> {
    let mut stats = IngestStats::new(FeedKind::Schedules);
    let raw: Vec<schedule::RawSchedule> = match serde_json::from_slice(bytes)? {
        ScheduleDocument::Records(records) => decode_each(records, &mut stats),
        ScheduleDocument::Collection(c) => {
            let features: Vec<Feature<schedule::RawSchedule>> = decode_each(c.features, &mut stats);
            features.into_iter().map(|f| f.properties).collect()
        }
    };

    let mut entries = Vec::with_capacity(raw.len());

    for record in &raw {
        match ScheduleEntry::from_raw(record) {
            Ok(e) => {
                stats.record_accepted();
                entries.push(e);
            }
            Err(reason) => stats.record_rejected(reason.code()),
        }
    }

    Ok((entries, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    #[test]
    fn test_loose_number_accepts_decimal_comma() {
        assert_eq!(Loose::Text("-22,9068".into()).as_f64(), Some(-22.9068));
        assert_eq!(Loose::Text(" 12.5 ".into()).as_f64(), Some(12.5));
        assert_eq!(Loose::Number(3.0).as_f64(), Some(3.0));
        assert_eq!(Loose::Text("abc".into()).as_f64(), None);
        assert_eq!(Loose::Other(serde_json::Value::Bool(true)).as_f64(), None);
    }

    #[test]
    fn test_loose_text_treats_blank_as_absent() {
        assert_eq!(Loose::Text("   ".into()).as_text(), None);
        assert_eq!(Loose::Text(" 0.123 ".into()).as_text(), Some("0.123".to_string()));
        assert_eq!(Loose::Number(457.0).as_text(), Some("457".to_string()));
    }

    #[test]
    fn test_parse_timestamp_with_offset() {
        let ts = parse_timestamp("2024-05-06T10:00:00-03:00", &brt()).unwrap();
        assert_eq!(ts.hour(), 13);
    }

    #[test]
    fn test_parse_naive_timestamp_uses_local_offset() {
        let ts = parse_timestamp("2024-05-06T10:00:00.250", &brt()).unwrap();
        assert_eq!(ts.hour(), 13);
        assert_eq!(ts.timestamp_subsec_millis(), 250);

        let spaced = parse_timestamp("2024-05-06 10:00:00", &brt()).unwrap();
        assert_eq!(spaced.hour(), 13);
    }

    #[test]
    fn test_parse_epoch_timestamps() {
        let secs = Loose::Number(1_714_993_200.0).as_timestamp(&brt()).unwrap();
        let millis = Loose::Text("1714993200000".into()).as_timestamp(&brt()).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday", &brt()).is_none());
        assert!(parse_timestamp("", &brt()).is_none());
    }

    #[test]
    fn test_geometry_point() {
        let g: Geometry =
            serde_json::from_str(r#"{"type":"Point","coordinates":[683000.5,"7460000"]}"#).unwrap();
        assert_eq!(g.point(), Some((683000.5, 7460000.0)));

        let line: Geometry =
            serde_json::from_str(r#"{"type":"LineString","coordinates":[1,2]}"#).unwrap();
        assert_eq!(line.point(), None);
    }

    #[test]
    fn test_parse_vehicles_rejects_invalid_json() {
        let result = parse_vehicles(b"not json", Utc::now(), &EngineConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_schedules_accepts_both_shapes() {
        let array = br#"[{"line_code":"0.123","direction":"I","time":"7:05"}]"#;
        let (entries, _) = parse_schedules(array).unwrap();
        assert_eq!(entries.len(), 1);

        let collection = br#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"line_code":"0.123","direction":"V","time":"07:05"}},
            {"type":"Feature","properties":{"line_code":"0.123","direction":"V","time":"7:5"}}
        ]}"#;
        let (entries, stats) = parse_schedules(collection).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn test_mistyped_schedule_record_is_skipped() {
        let array = br#"[
            {"line_code":"0.123","direction":"I","time":"07:05"},
            {"line_code":"0.123","direction":"I","time":705},
            {"line_code":"0.123","direction":["I"],"time":{"h":7}},
            null
        ]"#;
        let (entries, stats) = parse_schedules(array).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(stats.received, 4);
        assert_eq!(stats.count_for("malformed_time"), 1);
        assert_eq!(stats.count_for("unknown_direction"), 1);
        assert_eq!(stats.count_for(MALFORMED_RECORD), 1);

        let collection = br#"{"features":[
            {"properties":{"line_code":"457","direction":"V","time":"18:30"}},
            {"properties":null}
        ]}"#;
        let (entries, stats) = parse_schedules(collection).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(stats.count_for(MALFORMED_RECORD), 1);
    }

    #[test]
    fn test_null_vehicle_properties_do_not_fail_the_feed() {
        let now = Utc::now();
        let observed = (now - chrono::Duration::minutes(1)).to_rfc3339();
        let body = format!(
            r#"{{"features":[
                {{"properties":{{"device_id":"B1","line":"0.123","latitude":-22.9,"longitude":-43.2,
                  "local_timestamp":"{observed}"}}}},
                {{"properties":null}},
                {{"properties":{{"device_id":"B3"}},"geometry":{{"type":7}}}},
                "garbage"
            ]}}"#
        );
        let (vehicles, stats) = parse_vehicles(body.as_bytes(), now, &EngineConfig::default()).unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].device_id, "B1");
        assert_eq!(stats.received, 4);
        assert_eq!(stats.count_for(MALFORMED_RECORD), 3);
    }

    #[test]
    fn test_numeric_stop_text_fields_are_read() {
        let config = EngineConfig::default();
        let (e, n) = config.utm.to_grid(&crate::geo::GeoPoint::new(-22.95, -43.2));
        let body = format!(
            r#"{{"features":[
                {{"properties":{{"stop_id":"1","description":"Rua A","status":"ATIVA"}},
                  "geometry":{{"type":"Point","coordinates":[{e},{n}]}}}},
                {{"properties":{{"stop_id":"2","description":1702,"status":"ATIVA","category":3}},
                  "geometry":{{"type":"Point","coordinates":[{e},{n}]}}}},
                {{"properties":null,"geometry":{{"type":"Point","coordinates":[{e},{n}]}}}}
            ]}}"#
        );
        let (stops, stats) = parse_stops(body.as_bytes(), &config).unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[1].description, "1702");
        assert_eq!(stops[1].category.as_deref(), Some("3"));
        assert_eq!(stats.count_for(MALFORMED_RECORD), 1);
    }

    #[test]
    fn test_broken_envelope_is_still_an_error() {
        assert!(parse_stops(br#"{"features":{}}"#, &EngineConfig::default()).is_err());
        assert!(parse_schedules(b"42").is_err());
    }
}
