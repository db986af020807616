//! Transverse Mercator conversion for the fixed UTM zone the stop feed is
//! published in.
//!
//! The inverse uses the classic series expansion (footpoint latitude from the
//! meridional arc, correction terms up to the 6th power of the normalised
//! easting). It is accurate to well under a meter inside a zone, which is more
//! than the bounding-box check and short-range distances need.

use serde::{Deserialize, Serialize};

use super::GeoPoint;

const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_223_563;
const SCALE_FACTOR: f64 = 0.9996;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    North,
    South,
}

/// One UTM zone with its false origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtmProjection {
    pub zone: u8,
    pub hemisphere: Hemisphere,
    #[serde(default = "default_false_easting")]
    pub false_easting: f64,
    #[serde(default = "default_false_northing")]
    pub false_northing: f64,
}

fn default_false_easting() -> f64 {
    500_000.0
}

fn default_false_northing() -> f64 {
    10_000_000.0
}

impl Default for UtmProjection {
    /// Zone 23 south, the grid used by the stop feed.
    fn default() -> Self {
        Self {
            zone: 23,
            hemisphere: Hemisphere::South,
            false_easting: default_false_easting(),
            false_northing: default_false_northing(),
        }
    }
}

impl UtmProjection {
    pub fn central_meridian(&self) -> f64 {
        f64::from(self.zone) * 6.0 - 183.0
    }

    fn northing_offset(&self) -> f64 {
        match self.hemisphere {
            Hemisphere::North => 0.0,
            Hemisphere::South => self.false_northing,
        }
    }

    /// Converts grid coordinates to latitude/longitude.
    ///
    /// Never fails: a point far outside the zone still yields numbers, and it
    /// is up to the caller to reject them against the service region.
    pub fn to_geographic(&self, easting: f64, northing: f64) -> GeoPoint {
        let e2 = FLATTENING * (2.0 - FLATTENING);
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let x = easting - self.false_easting;
        let y = northing - self.northing_offset();

        let arc = y / SCALE_FACTOR;
        let mu = arc / (SEMI_MAJOR_AXIS * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let root = (1.0 - e2).sqrt();
        let e1 = (1.0 - root) / (1.0 + root);
        let footpoint = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let sin_fp = footpoint.sin();
        let cos_fp = footpoint.cos();
        let tan_fp = footpoint.tan();

        let c1 = ep2 * cos_fp * cos_fp;
        let t1 = tan_fp * tan_fp;
        let denom = 1.0 - e2 * sin_fp * sin_fp;
        let n1 = SEMI_MAJOR_AXIS / denom.sqrt();
        let r1 = SEMI_MAJOR_AXIS * (1.0 - e2) / denom.powf(1.5);
        let d = x / (n1 * SCALE_FACTOR);

        let lat = footpoint
            - (n1 * tan_fp / r1)
                * (d.powi(2) / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);

        let lon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / cos_fp;

        GeoPoint::new(lat.to_degrees(), self.central_meridian() + lon.to_degrees())
    }

    /// Projects latitude/longitude onto the grid. Used to build stop fixtures
    /// and to report grid positions in diagnostics.
    pub fn to_grid(&self, point: &GeoPoint) -> (f64, f64) {
        let e2 = FLATTENING * (2.0 - FLATTENING);
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let phi = point.lat.to_radians();
        let sin_phi = phi.sin();
        let cos_phi = phi.cos();
        let tan_phi = phi.tan();

        let n = SEMI_MAJOR_AXIS / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = (point.lon - self.central_meridian()).to_radians() * cos_phi;

        let arc = SEMI_MAJOR_AXIS
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

        let x = SCALE_FACTOR
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);

        let y = SCALE_FACTOR
            * (arc
                + n * tan_phi
                    * (a * a / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

        (x + self.false_easting, y + self.northing_offset())
    }
}
