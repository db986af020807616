//! One rider query against one store view.
//!
//! Synchronous and side-effect free: everything it reads comes from the
//! [`StoreView`] taken when the query started.

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::config::EngineConfig;
use crate::estimate::{
    Confidence, LineSequences, StopCountMethod, estimate_arrival, estimate_stops_remaining_from,
    nearest_target_stop,
};
use crate::feed::{Direction, ScheduleEntry, Stop, VehicleObservation};
use crate::geo::GeoPoint;
use crate::locator::stops_within;
use crate::ranking::{Candidate, rank};
use crate::store::StoreView;
use crate::traffic::{TrafficFactor, traffic_factor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionFilter {
    Outbound,
    Inbound,
    Both,
}

impl DirectionFilter {
    /// Circular departures serve either direction.
    pub fn accepts(&self, direction: Direction) -> bool {
        match self {
            DirectionFilter::Both => true,
            DirectionFilter::Outbound => matches!(direction, Direction::Outbound | Direction::Circular),
            DirectionFilter::Inbound => matches!(direction, Direction::Inbound | Direction::Circular),
        }
    }
}

impl FromStr for DirectionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outbound" | "ida" | "i" => Ok(DirectionFilter::Outbound),
            "inbound" | "volta" | "v" => Ok(DirectionFilter::Inbound),
            "both" | "all" | "" => Ok(DirectionFilter::Both),
            other => Err(format!("unknown direction {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LineFilter {
    All,
    Line(String),
}

impl LineFilter {
    pub fn accepts(&self, line: &str) -> bool {
        match self {
            LineFilter::All => true,
            LineFilter::Line(wanted) => wanted == line,
        }
    }
}

impl FromStr for LineFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            Ok(LineFilter::All)
        } else {
            Ok(LineFilter::Line(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiderQuery {
    pub location: GeoPoint,
    pub direction: DirectionFilter,
    pub line: LineFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Vehicles were evaluated against stops near the rider.
    ViaStops,
    /// No stop near the rider; vehicles were evaluated against the rider directly.
    Direct,
}

/// One row of the rider-facing list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineResult {
    pub line: String,
    pub device_id: String,
    pub distance_m: f64,
    pub stops_remaining: Option<u32>,
    pub stop_count_method: Option<StopCountMethod>,
    pub confidence: Confidence,
    pub minutes: u32,
    pub target_stop_id: Option<String>,
    pub target_stop: Option<String>,
    /// Next scheduled departures, `HH:MM`.
    pub upcoming: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchReport {
    pub generated_at: DateTime<Utc>,
    pub mode: SearchMode,
    pub traffic: TrafficFactor,
    pub rows: Vec<LineResult>,
    pub suppressed_lines: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum NotReadyReason {
    /// No vehicle snapshot has been loaded yet.
    NoVehicleSnapshot,
    /// Vehicle and stop snapshots are further apart than allowed.
    SnapshotSkew { skew_secs: i64 },
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReadyReason::NoVehicleSnapshot => f.write_str("vehicle positions not loaded yet"),
            NotReadyReason::SnapshotSkew { skew_secs } => {
                write!(f, "stop and vehicle data are {skew_secs}s apart")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SearchOutcome {
    NotReady(NotReadyReason),
    NoResults,
    Found(SearchReport),
}

pub fn search(
    view: &StoreView,
    query: &RiderQuery,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> SearchOutcome {
    let Some(vehicles) = view.vehicles.as_ref() else {
        return SearchOutcome::NotReady(NotReadyReason::NoVehicleSnapshot);
    };

    if let (Some(limit), Some(skew_secs)) = (config.max_snapshot_skew_secs, view.vehicle_stop_skew_secs()) {
        if skew_secs > limit {
            return SearchOutcome::NotReady(NotReadyReason::SnapshotSkew { skew_secs });
        }
    }

    let stops: &[Stop] = view
        .stops
        .as_ref()
        .map(|s| s.records.as_slice())
        .unwrap_or_default();
    let schedule: &[ScheduleEntry] = view
        .schedules
        .as_ref()
        .map(|s| s.entries.records.as_slice())
        .unwrap_or_default();
    let empty_sequences = LineSequences::default();
    let sequences = view
        .schedules
        .as_ref()
        .map_or(&empty_sequences, |s| &s.sequences);

    let local_now = now.with_timezone(&config.local_offset());
    let traffic = traffic_factor(&local_now, config);

    let eligible: Vec<&VehicleObservation> = vehicles
        .records
        .iter()
        .filter(|v| query.line.accepts(&v.line))
        .collect();

    let mut candidate_stops = stops_within(
        &query.location,
        config.stop_search_radius_m,
        stops,
        &config.bounding_box,
    );
    candidate_stops.truncate(config.max_candidate_stops);

    let mode = if candidate_stops.is_empty() {
        SearchMode::Direct
    } else {
        SearchMode::ViaStops
    };

    let mut candidates = Vec::new();
    match mode {
        SearchMode::Direct => {
            for vehicle in &eligible {
                let arrival = estimate_arrival(
                    &query.location,
                    &vehicle.position,
                    vehicle.speed_kmh,
                    traffic,
                    config,
                );
                if arrival.distance_m > config.vehicle_search_radius_m {
                    continue;
                }
                candidates.push(Candidate {
                    line: vehicle.line.clone(),
                    device_id: vehicle.device_id.clone(),
                    arrival,
                    stops_remaining: None,
                    distance_to_rider_m: arrival.distance_m,
                    distance_to_stop_m: None,
                    target_stop_id: None,
                    target_stop_description: None,
                });
            }
        }
        SearchMode::ViaStops => {
            for nearby in &candidate_stops {
                let stop = nearby.stop;
                let target_stop = nearest_target_stop(&stop.position, stops, config);
                for vehicle in &eligible {
                    let arrival =
                        estimate_arrival(&stop.position, &vehicle.position, vehicle.speed_kmh, traffic, config);
                    if arrival.distance_m > config.vehicle_search_radius_m {
                        continue;
                    }
                    let stops_remaining = estimate_stops_remaining_from(
                        &vehicle.position,
                        target_stop,
                        &vehicle.line,
                        stops,
                        sequences,
                        config,
                    );
                    candidates.push(Candidate {
                        line: vehicle.line.clone(),
                        device_id: vehicle.device_id.clone(),
                        arrival,
                        stops_remaining: Some(stops_remaining),
                        distance_to_rider_m: query.location.distance_to(&vehicle.position),
                        distance_to_stop_m: Some(arrival.distance_m),
                        target_stop_id: Some(stop.id.clone()),
                        target_stop_description: Some(stop.description.clone()),
                    });
                }
            }
        }
    }

    let evaluated = candidates.len();
    let ranked = rank(candidates, config);
    debug!(
        evaluated,
        lines = ranked.rows.len(),
        dropped_low_confidence = ranked.dropped_low_confidence,
        suppressed = ranked.suppressed_lines,
        "Candidates ranked"
    );
    if ranked.rows.is_empty() {
        return SearchOutcome::NoResults;
    }

    let rows = ranked
        .rows
        .into_iter()
        .map(|c| {
            let upcoming = upcoming_departures(
                schedule,
                &c.line,
                query.direction,
                local_now.time(),
                config.max_upcoming_times,
            );
            LineResult {
                distance_m: c.reference_distance_m(),
                stops_remaining: c.stops_count(),
                stop_count_method: c.stops_remaining.as_ref().map(|s| s.method),
                confidence: c.confidence(),
                minutes: c.arrival.minutes,
                line: c.line,
                device_id: c.device_id,
                target_stop_id: c.target_stop_id,
                target_stop: c.target_stop_description,
                upcoming,
            }
        })
        .collect();

    SearchOutcome::Found(SearchReport {
        generated_at: now,
        mode,
        traffic,
        rows,
        suppressed_lines: ranked.suppressed_lines,
    })
}

/// Scheduled times for `line` at or after `after`, same day, earliest first.
pub fn upcoming_departures(
    schedule: &[ScheduleEntry],
    line: &str,
    direction: DirectionFilter,
    after: NaiveTime,
    limit: usize,
) -> Vec<String> {
    let mut times: Vec<NaiveTime> = schedule
        .iter()
        .filter(|e| e.line == line && direction.accepts(e.direction) && e.time >= after)
        .map(|e| e.time)
        .collect();
    times.sort();
    times.dedup();

    times
        .into_iter()
        .take(limit)
        .map(|t| t.format("%H:%M").to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::StopStatus;
    use crate::store::{FeedSnapshot, ScheduleSnapshot};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    // Wednesday 2024-05-08 11:00 local (-03:00): regular traffic, factor 1.3
    fn midday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 8, 14, 0, 0).unwrap()
    }

    fn rider() -> GeoPoint {
        GeoPoint::new(-22.9, -43.2)
    }

    fn vehicle(device: &str, line: &str, lat: f64, lon: f64, speed: Option<f64>) -> VehicleObservation {
        VehicleObservation {
            device_id: device.to_string(),
            line: line.to_string(),
            position: GeoPoint::new(lat, lon),
            observed_at: midday() - Duration::minutes(2),
            ingested_at: midday(),
            speed_kmh: speed,
        }
    }

    fn stop(id: &str, lat: f64, lon: f64) -> Stop {
        Stop {
            id: id.to_string(),
            description: format!("Stop {id}"),
            status: StopStatus::Active,
            structure_type: None,
            category: None,
            position: GeoPoint::new(lat, lon),
        }
    }

    fn schedule(line: &str, direction: Direction, hh: u32, mm: u32) -> ScheduleEntry {
        ScheduleEntry {
            line: line.to_string(),
            direction,
            time: NaiveTime::from_hms_opt(hh, mm, 0).unwrap(),
            stop_id: None,
        }
    }

    fn view(vehicles: Vec<VehicleObservation>, stops: Vec<Stop>, entries: Vec<ScheduleEntry>) -> StoreView {
        StoreView {
            vehicles: Some(Arc::new(FeedSnapshot::new(vehicles, midday()))),
            stops: Some(Arc::new(FeedSnapshot::new(stops, midday()))),
            schedules: Some(Arc::new(ScheduleSnapshot::new(entries, midday()))),
        }
    }

    fn query(line: LineFilter) -> RiderQuery {
        RiderQuery {
            location: rider(),
            direction: DirectionFilter::Both,
            line,
        }
    }

    #[test]
    fn test_not_ready_without_vehicle_snapshot() {
        let outcome = search(&StoreView::default(), &query(LineFilter::All), midday(), &EngineConfig::default());
        assert_eq!(outcome, SearchOutcome::NotReady(NotReadyReason::NoVehicleSnapshot));
    }

    #[test]
    fn test_no_results_is_distinct_from_not_ready() {
        let v = view(vec![], vec![], vec![]);
        let outcome = search(&v, &query(LineFilter::All), midday(), &EngineConfig::default());
        assert_eq!(outcome, SearchOutcome::NoResults);
    }

    #[test]
    fn test_direct_mode_when_no_stop_nearby() {
        let v = view(vec![vehicle("B1", "0.123", -22.9036, -43.2, Some(0.0))], vec![], vec![]);
        let SearchOutcome::Found(report) = search(&v, &query(LineFilter::All), midday(), &EngineConfig::default())
        else {
            panic!("expected results");
        };

        assert_eq!(report.mode, SearchMode::Direct);
        assert_eq!(report.traffic.factor, 1.3);
        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.line, "0.123");
        assert_eq!(row.confidence, Confidence::Medium);
        assert_eq!(row.minutes, 3);
        assert_eq!(row.stops_remaining, None);
    }

    #[test]
    fn test_via_stops_counts_stops() {
        // Rider stands at S0; bus sits at S2, two stops (~890 m) away.
        let config = EngineConfig {
            max_candidate_stops: 1,
            ..EngineConfig::default()
        };
        let stops = vec![
            stop("S0", -22.9, -43.2),
            stop("S1", -22.904, -43.2),
            stop("S2", -22.908, -43.2),
        ];
        let v = view(
            vec![vehicle("B1", "0.123", -22.908, -43.2, Some(20.0))],
            stops,
            vec![],
        );
        let SearchOutcome::Found(report) = search(&v, &query(LineFilter::All), midday(), &config) else {
            panic!("expected results");
        };

        assert_eq!(report.mode, SearchMode::ViaStops);
        let row = &report.rows[0];
        assert_eq!(row.stops_remaining, Some(2));
        assert_eq!(row.stop_count_method, Some(StopCountMethod::DistanceEstimation));
        assert_eq!(row.target_stop_id.as_deref(), Some("S0"));
        assert_eq!(row.confidence, Confidence::Medium);
    }

    #[test]
    fn test_nearer_stop_in_stop_count_wins() {
        // With both stops in reach, waiting at S1 leaves the bus one stop out.
        let stops = vec![
            stop("S0", -22.9, -43.2),
            stop("S1", -22.904, -43.2),
            stop("S2", -22.908, -43.2),
        ];
        let v = view(
            vec![vehicle("B1", "0.123", -22.908, -43.2, Some(20.0))],
            stops,
            vec![],
        );
        let SearchOutcome::Found(report) = search(&v, &query(LineFilter::All), midday(), &EngineConfig::default())
        else {
            panic!("expected results");
        };

        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].stops_remaining, Some(1));
        assert_eq!(report.rows[0].target_stop_id.as_deref(), Some("S1"));
    }

    #[test]
    fn test_line_filter() {
        let v = view(
            vec![
                vehicle("B1", "0.123", -22.9036, -43.2, Some(20.0)),
                vehicle("B2", "457", -22.9020, -43.2, Some(20.0)),
            ],
            vec![],
            vec![],
        );
        let SearchOutcome::Found(report) = search(
            &v,
            &query(LineFilter::Line("457".to_string())),
            midday(),
            &EngineConfig::default(),
        ) else {
            panic!("expected results");
        };
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].line, "457");
    }

    #[test]
    fn test_vehicles_beyond_search_radius_are_ignored() {
        let config = EngineConfig {
            vehicle_search_radius_m: 300.0,
            ..EngineConfig::default()
        };
        let v = view(vec![vehicle("B1", "0.123", -22.9036, -43.2, Some(20.0))], vec![], vec![]);
        assert_eq!(search(&v, &query(LineFilter::All), midday(), &config), SearchOutcome::NoResults);
    }

    #[test]
    fn test_snapshot_skew_guard() {
        let config = EngineConfig {
            max_snapshot_skew_secs: Some(3600),
            ..EngineConfig::default()
        };
        let v = StoreView {
            vehicles: Some(Arc::new(FeedSnapshot::new(vec![], midday()))),
            stops: Some(Arc::new(FeedSnapshot::new(vec![], midday() - Duration::hours(3)))),
            schedules: None,
        };
        assert_eq!(
            search(&v, &query(LineFilter::All), midday(), &config),
            SearchOutcome::NotReady(NotReadyReason::SnapshotSkew { skew_secs: 10800 })
        );
    }

    #[test]
    fn test_upcoming_departures_respect_direction_and_limit() {
        let entries = vec![
            schedule("0.123", Direction::Outbound, 10, 45),
            schedule("0.123", Direction::Outbound, 11, 10),
            schedule("0.123", Direction::Inbound, 11, 5),
            schedule("0.123", Direction::Circular, 11, 30),
            schedule("0.123", Direction::Outbound, 11, 40),
            schedule("0.123", Direction::Outbound, 12, 0),
            schedule("457", Direction::Outbound, 11, 1),
        ];
        let after = NaiveTime::from_hms_opt(11, 0, 0).unwrap();

        assert_eq!(
            upcoming_departures(&entries, "0.123", DirectionFilter::Outbound, after, 3),
            vec!["11:10", "11:30", "11:40"]
        );
        assert_eq!(
            upcoming_departures(&entries, "0.123", DirectionFilter::Both, after, 2),
            vec!["11:05", "11:10"]
        );
    }

    #[test]
    fn test_filters_parse() {
        assert_eq!("all".parse::<LineFilter>(), Ok(LineFilter::All));
        assert_eq!(" 0.123 ".parse::<LineFilter>(), Ok(LineFilter::Line("0.123".to_string())));
        assert_eq!("IDA".parse::<DirectionFilter>(), Ok(DirectionFilter::Outbound));
        assert_eq!("both".parse::<DirectionFilter>(), Ok(DirectionFilter::Both));
        assert!("sideways".parse::<DirectionFilter>().is_err());
    }
}
