//! Proximity search over the stop snapshot.

use crate::feed::Stop;
use crate::geo::{BoundingBox, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyStop<'a> {
    pub stop: &'a Stop,
    pub distance_m: f64,
}

/// Active stops inside the service region and within `radius_m` of `center`,
/// nearest first. Equal distances keep their snapshot order.
///
/// An empty result is not an error; callers fall back to searching vehicles
/// around `center` directly.
pub fn stops_within<'a>(
    center: &GeoPoint,
    radius_m: f64,
    stops: &'a [Stop],
    region: &BoundingBox,
) -> Vec<NearbyStop<'a>> {
    let mut nearby: Vec<NearbyStop<'a>> = candidates(center, radius_m, stops, region).collect();
    nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    nearby
}

/// Single pass over the snapshot; on equal distances the earlier stop wins,
/// matching the head of [`stops_within`].
pub fn nearest_stop<'a>(
    center: &GeoPoint,
    radius_m: f64,
    stops: &'a [Stop],
    region: &BoundingBox,
) -> Option<NearbyStop<'a>> {
    candidates(center, radius_m, stops, region).min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
}

fn candidates<'a, 'b>(
    center: &'b GeoPoint,
    radius_m: f64,
    stops: &'a [Stop],
    region: &'b BoundingBox,
) -> impl Iterator<Item = NearbyStop<'a>> {
    stops
        .iter()
        .filter(move |stop| stop.is_active() && region.contains(&stop.position))
        .map(move |stop| NearbyStop {
            stop,
            distance_m: center.distance_to(&stop.position),
        })
        .filter(move |n| n.distance_m <= radius_m)
}
