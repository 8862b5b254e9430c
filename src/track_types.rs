/// Point and feature types shared across the preprocessing pipeline.
///
/// A track flows GeoPoint -> PlanarPoint -> SegmentFeature; labels and
/// predictions are TripMetrics triples.

use serde::{Deserialize, Serialize};

/// Added to the horizontal distance before dividing, so flat-on-the-spot
/// segments still get a finite slope.
pub const SLOPE_EPSILON: f64 = 1e-6;

/// Number of per-segment features (dh, dz, slope).
pub const FEATURE_COUNT: usize = 3;

/// Number of predicted trip metrics (distance, gain, loss).
pub const TARGET_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        GeoPoint { latitude, longitude, altitude }
    }
}

/// UTM coordinates in meters. Every point of a track shares one zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPoint {
    pub easting: f64,
    pub northing: f64,
    pub altitude: f64,
}

impl PlanarPoint {
    pub fn new(easting: f64, northing: f64, altitude: f64) -> Self {
        PlanarPoint { easting, northing, altitude }
    }

    pub fn horizontal_distance(&self, other: &PlanarPoint) -> f64 {
        let de = other.easting - self.easting;
        let dn = other.northing - self.northing;
        (de * de + dn * dn).sqrt()
    }

    pub fn distance_3d(&self, other: &PlanarPoint) -> f64 {
        let dz = other.altitude - self.altitude;
        let dh = self.horizontal_distance(other);
        (dh * dh + dz * dz).sqrt()
    }

    /// Point at `ratio` of the way from `self` to `other` (0 = self, 1 = other).
    pub fn lerp(&self, other: &PlanarPoint, ratio: f64) -> PlanarPoint {
        PlanarPoint {
            easting: self.easting + ratio * (other.easting - self.easting),
            northing: self.northing + ratio * (other.northing - self.northing),
            altitude: self.altitude + ratio * (other.altitude - self.altitude),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentFeature {
    pub dh: f64,
    pub dz: f64,
    pub slope: f64,
}

impl SegmentFeature {
    pub fn new(dh: f64, dz: f64, slope: f64) -> Self {
        SegmentFeature { dh, dz, slope }
    }

    /// Builds a feature from a segment's deltas, deriving the slope.
    pub fn from_deltas(dh: f64, dz: f64) -> Self {
        SegmentFeature {
            dh,
            dz,
            slope: dz / (dh + SLOPE_EPSILON),
        }
    }

    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [self.dh, self.dz, self.slope]
    }

    pub fn from_array(values: [f64; FEATURE_COUNT]) -> Self {
        SegmentFeature::new(values[0], values[1], values[2])
    }
}

/// Distance, positive elevation and negative elevation of a trip, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TripMetrics {
    pub distance: f64,
    pub elevation_gain: f64,
    pub elevation_loss: f64,
}

impl TripMetrics {
    pub fn new(distance: f64, elevation_gain: f64, elevation_loss: f64) -> Self {
        TripMetrics { distance, elevation_gain, elevation_loss }
    }

    pub fn to_array(&self) -> [f64; TARGET_COUNT] {
        [self.distance, self.elevation_gain, self.elevation_loss]
    }

    pub fn from_array(values: [f64; TARGET_COUNT]) -> Self {
        TripMetrics::new(values[0], values[1], values[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distances() {
        let a = PlanarPoint::new(0.0, 0.0, 0.0);
        let b = PlanarPoint::new(3.0, 4.0, 12.0);
        assert!((a.horizontal_distance(&b) - 5.0).abs() < 1e-12);
        assert!((a.distance_3d(&b) - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_lerp_midpoint() {
        let a = PlanarPoint::new(0.0, 10.0, 100.0);
        let b = PlanarPoint::new(10.0, 20.0, 50.0);
        let mid = a.lerp(&b, 0.5);
        assert_eq!(mid, PlanarPoint::new(5.0, 15.0, 75.0));
    }

    #[test]
    fn test_slope_on_zero_distance_is_finite() {
        let f = SegmentFeature::from_deltas(0.0, 1.0);
        assert!(f.slope.is_finite());
        assert!((f.slope - 1e6).abs() < 1e-3);
    }
}
