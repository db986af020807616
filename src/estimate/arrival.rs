//! Distance + speed + traffic turned into minutes and a confidence tag.

use serde::Serialize;

use super::Confidence;
use crate::config::EngineConfig;
use crate::geo::GeoPoint;
use crate::traffic::TrafficFactor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedSource {
    /// The vehicle reported a positive speed.
    Reported,
    /// The configured default was used.
    Assumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityAdjustment {
    None,
    /// Close to the reference point: buses slow down around stops.
    NearCap,
    /// Far away: cruising speed is bounded.
    FarCap,
}

/// Everything that went into an estimate, kept for display and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArrivalFactors {
    pub speed_source: SpeedSource,
    pub base_speed_kmh: f64,
    pub proximity: ProximityAdjustment,
    pub capped_speed_kmh: f64,
    pub traffic: TrafficFactor,
    pub effective_speed_kmh: f64,
    pub acceleration_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArrivalEstimate {
    pub distance_m: f64,
    pub seconds: f64,
    /// Rounded, never below 1.
    pub minutes: u32,
    pub confidence: Confidence,
    pub factors: ArrivalFactors,
}

/// Final confidence for an estimate.
///
/// Reported speed is only trusted at short range. Without it an estimate is
/// at best medium, and drops to low once it is no longer short range. Beyond
/// `low_confidence_min_m` everything is low.
pub fn classify_confidence(source: SpeedSource, distance_m: f64, config: &EngineConfig) -> Confidence {
    let short_range = distance_m < config.high_confidence_max_m;
    match source {
        _ if distance_m > config.low_confidence_min_m => Confidence::Low,
        SpeedSource::Reported if short_range => Confidence::High,
        SpeedSource::Reported => Confidence::Medium,
        SpeedSource::Assumed if short_range => Confidence::Medium,
        SpeedSource::Assumed => Confidence::Low,
    }
}

pub fn estimate_arrival(
    reference: &GeoPoint,
    vehicle: &GeoPoint,
    reported_speed_kmh: Option<f64>,
    traffic: TrafficFactor,
    config: &EngineConfig,
) -> ArrivalEstimate {
    estimate_from_distance(reference.distance_to(vehicle), reported_speed_kmh, traffic, config)
}

pub fn estimate_from_distance(
    distance_m: f64,
    reported_speed_kmh: Option<f64>,
    traffic: TrafficFactor,
    config: &EngineConfig,
) -> ArrivalEstimate {
    let (speed_source, base_speed_kmh) = match reported_speed_kmh.filter(|s| *s > 0.0) {
        Some(speed) => (SpeedSource::Reported, speed),
        None => (SpeedSource::Assumed, config.default_speed_kmh),
    };

    let (proximity, capped_speed_kmh) = if distance_m < config.near_distance_m {
        (ProximityAdjustment::NearCap, base_speed_kmh.min(config.near_speed_cap_kmh))
    } else if distance_m > config.far_distance_m {
        (ProximityAdjustment::FarCap, base_speed_kmh.min(config.far_speed_cap_kmh))
    } else {
        (ProximityAdjustment::None, base_speed_kmh)
    };

    let effective_speed_kmh = capped_speed_kmh / traffic.factor;
    let meters_per_second = effective_speed_kmh / 3.6;
    let seconds = distance_m / meters_per_second * config.acceleration_factor;
    let minutes = (seconds / 60.0).round().max(1.0) as u32;

    ArrivalEstimate {
        distance_m,
        seconds,
        minutes,
        confidence: classify_confidence(speed_source, distance_m, config),
        factors: ArrivalFactors {
            speed_source,
            base_speed_kmh,
            proximity,
            capped_speed_kmh,
            traffic,
            effective_speed_kmh,
            acceleration_factor: config.acceleration_factor,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::TrafficPeriod;

    fn traffic(factor: f64) -> TrafficFactor {
        TrafficFactor {
            period: TrafficPeriod::Regular,
            factor,
        }
    }

    #[test]
    fn test_assumed_speed_near_stop() {
        let config = EngineConfig::default();
        let e = estimate_from_distance(400.0, Some(0.0), traffic(1.3), &config);

        assert_eq!(e.factors.speed_source, SpeedSource::Assumed);
        assert_eq!(e.factors.proximity, ProximityAdjustment::NearCap);
        assert_eq!(e.factors.capped_speed_kmh, 12.0);
        // 400 m at 12/1.3 km/h, inflated by 1.2
        assert!((e.seconds - 187.2).abs() < 0.01);
        assert_eq!(e.minutes, 3);
        assert_eq!(e.confidence, Confidence::Medium);
    }

    #[test]
    fn test_night_traffic_shortens_estimate() {
        let e = estimate_from_distance(400.0, None, traffic(0.8), &EngineConfig::default());
        assert!((e.seconds - 115.2).abs() < 0.01);
        assert_eq!(e.minutes, 2);
    }

    #[test]
    fn test_reported_speed_mid_range_is_uncapped() {
        let e = estimate_from_distance(1500.0, Some(30.0), traffic(1.0), &EngineConfig::default());
        assert_eq!(e.factors.proximity, ProximityAdjustment::None);
        assert_eq!(e.factors.capped_speed_kmh, 30.0);
        assert!((e.seconds - 216.0).abs() < 0.01);
        assert_eq!(e.minutes, 4);
        assert_eq!(e.confidence, Confidence::High);
    }

    #[test]
    fn test_far_cap() {
        let e = estimate_from_distance(3000.0, Some(40.0), traffic(1.3), &EngineConfig::default());
        assert_eq!(e.factors.proximity, ProximityAdjustment::FarCap);
        assert_eq!(e.factors.capped_speed_kmh, 25.0);
        assert_eq!(e.minutes, 11);
        assert_eq!(e.confidence, Confidence::Medium);
    }

    #[test]
    fn test_minutes_never_below_one() {
        let config = EngineConfig::default();
        for distance in [0.0, 1.0, 10.0, 50.0] {
            let e = estimate_from_distance(distance, Some(60.0), traffic(0.8), &config);
            assert!(e.minutes >= 1);
        }
    }

    #[test]
    fn test_confidence_never_rises_with_distance() {
        let config = EngineConfig::default();
        let near = estimate_from_distance(1900.0, Some(20.0), traffic(1.3), &config);
        let far = estimate_from_distance(3100.0, Some(20.0), traffic(1.3), &config);

        assert_eq!(near.confidence, Confidence::High);
        assert_eq!(far.confidence, Confidence::Low);
        assert!(far.confidence <= near.confidence);
    }

    #[test]
    fn test_confidence_table() {
        let config = EngineConfig::default();
        let cases = [
            (SpeedSource::Reported, 1999.0, Confidence::High),
            (SpeedSource::Reported, 2000.0, Confidence::Medium),
            (SpeedSource::Reported, 3000.0, Confidence::Medium),
            (SpeedSource::Reported, 3000.5, Confidence::Low),
            (SpeedSource::Assumed, 100.0, Confidence::Medium),
            (SpeedSource::Assumed, 1999.0, Confidence::Medium),
            (SpeedSource::Assumed, 2500.0, Confidence::Low),
            (SpeedSource::Assumed, 5000.0, Confidence::Low),
        ];
        for (source, distance, expected) in cases {
            assert_eq!(classify_confidence(source, distance, &config), expected, "{source:?} at {distance}");
        }
    }

    #[test]
    fn test_estimate_between_points() {
        let rider = GeoPoint::new(-22.9, -43.2);
        let bus = GeoPoint::new(-22.9036, -43.2);
        let e = estimate_arrival(&rider, &bus, None, traffic(1.3), &EngineConfig::default());
        assert!((e.distance_m - 400.3).abs() < 1.0);
        assert_eq!(e.minutes, 3);
    }
}
