/// Per-segment geometric features of a resampled track.

use crate::error::{Result, TrackError};
use crate::track_types::{PlanarPoint, SegmentFeature, TripMetrics};

/// One feature per consecutive pair: N points give N - 1 features.
pub fn compute_features(points: &[PlanarPoint]) -> Result<Vec<SegmentFeature>> {
    if points.len() < 2 {
        return Err(TrackError::validation(format!(
            "need at least 2 points to extract features, got {}",
            points.len()
        )));
    }

    Ok(points
        .windows(2)
        .map(|w| SegmentFeature::from_deltas(w[0].horizontal_distance(&w[1]), w[1].altitude - w[0].altitude))
        .collect())
}

/// Total horizontal distance, positive elevation and absolute negative
/// elevation of a feature sequence. Empty input gives all zeros.
pub fn trip_metrics(features: &[SegmentFeature]) -> TripMetrics {
    features.iter().fold(TripMetrics::default(), |mut acc, f| {
        acc.distance += f.dh;
        if f.dz > 0.0 {
            acc.elevation_gain += f.dz;
        } else if f.dz < 0.0 {
            acc.elevation_loss += -f.dz;
        }
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_count_is_points_minus_one() {
        let points: Vec<PlanarPoint> = (0..7)
            .map(|i| PlanarPoint::new(i as f64, 0.0, (i % 3) as f64))
            .collect();
        assert_eq!(compute_features(&points).unwrap().len(), 6);
    }

    #[test]
    fn test_feature_values() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 10.0),
            PlanarPoint::new(3.0, 4.0, 12.0),
        ];
        let features = compute_features(&points).unwrap();
        assert!((features[0].dh - 5.0).abs() < 1e-12);
        assert!((features[0].dz - 2.0).abs() < 1e-12);
        assert!((features[0].slope - 2.0 / (5.0 + 1e-6)).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_points() {
        assert!(compute_features(&[]).is_err());
        assert!(compute_features(&[PlanarPoint::new(0.0, 0.0, 0.0)]).is_err());
    }

    #[test]
    fn test_trip_metrics_sums() {
        let features = vec![
            SegmentFeature::from_deltas(50.0, 30.0),
            SegmentFeature::from_deltas(25.0, -15.0),
            SegmentFeature::from_deltas(25.0, 10.0),
        ];
        let metrics = trip_metrics(&features);
        assert_eq!(metrics, TripMetrics::new(100.0, 40.0, 15.0));
        assert_eq!(trip_metrics(&[]), TripMetrics::default());
    }
}
