/// 3D ARC-LENGTH RESAMPLER
///
/// Re-interpolates a projected track so consecutive points sit exactly `step`
/// meters apart along the 3D path (horizontal and vertical combined). This
/// removes the dependence on the GPS logging rate before features are built.

use crate::error::{Result, TrackError};
use crate::track_types::PlanarPoint;

/// Relative slack that keeps a point sitting on a step boundary.
const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// Emits the first point verbatim, then one interpolated point at every
/// multiple of `step` of cumulative 3D distance. The true endpoint is only part
/// of the output when it lands on a step boundary.
pub fn resample_by_arc_length_3d(points: &[PlanarPoint], step: f64) -> Result<Vec<PlanarPoint>> {
    if points.is_empty() {
        return Err(TrackError::validation("cannot resample an empty track"));
    }
    if !(step.is_finite() && step > 0.0) {
        return Err(TrackError::validation(format!(
            "resampling step must be positive, got {}",
            step
        )));
    }
    if points.len() == 1 {
        return Ok(points.to_vec());
    }

    let mut resampled = vec![points[0]];
    let mut cumulative = 0.0;
    let mut k = 1usize;
    let mut target = step;

    for pair in points.windows(2) {
        let (start, end) = (&pair[0], &pair[1]);
        let segment_length = start.distance_3d(end);
        let segment_end = cumulative + segment_length;

        // the k-th target is k * step, so rounding does not build up
        while target <= segment_end + BOUNDARY_TOLERANCE * step {
            let ratio = if segment_length > 0.0 {
                (target - cumulative) / segment_length
            } else {
                0.0
            };
            resampled.push(start.lerp(end, ratio.min(1.0)));
            k += 1;
            target = k as f64 * step;
        }

        cumulative = segment_end;
    }

    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_length_3d(points: &[PlanarPoint]) -> f64 {
        points.windows(2).map(|w| w[0].distance_3d(&w[1])).sum()
    }

    #[test]
    fn test_straight_line_exact_steps() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 0.0),
            PlanarPoint::new(10.0, 0.0, 0.0),
        ];
        let resampled = resample_by_arc_length_3d(&points, 2.5).unwrap();
        assert_eq!(resampled.len(), 5);
        for (i, p) in resampled.iter().enumerate() {
            assert!((p.easting - 2.5 * i as f64).abs() < 1e-9);
            assert_eq!(p.northing, 0.0);
            assert_eq!(p.altitude, 0.0);
        }
    }

    #[test]
    fn test_endpoint_not_forced() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 0.0),
            PlanarPoint::new(10.0, 0.0, 0.0),
        ];
        let resampled = resample_by_arc_length_3d(&points, 3.0).unwrap();
        assert_eq!(resampled.len(), 4);
        assert!((resampled[3].easting - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_endpoint_on_boundary_kept_despite_rounding() {
        // 0.1 summed three times is 0.30000000000000004
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 0.0),
            PlanarPoint::new(0.3, 0.0, 0.0),
        ];
        let resampled = resample_by_arc_length_3d(&points, 0.1).unwrap();
        assert_eq!(resampled.len(), 4);
        assert!((resampled[3].easting - 0.3).abs() < 1e-12);

        let long = vec![
            PlanarPoint::new(0.0, 0.0, 0.0),
            PlanarPoint::new(100.0, 0.0, 0.0),
        ];
        assert_eq!(resample_by_arc_length_3d(&long, 0.1).unwrap().len(), 1001);
    }

    #[test]
    fn test_uniform_spacing_on_polyline() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 100.0),
            PlanarPoint::new(3.0, 4.0, 100.0),
            PlanarPoint::new(3.0, 4.0, 107.0),
            PlanarPoint::new(10.0, 9.0, 95.0),
            PlanarPoint::new(11.5, 2.0, 96.0),
        ];
        let step = 1.0;
        let resampled = resample_by_arc_length_3d(&points, step).unwrap();
        assert_eq!(resampled[0], points[0]);

        // chords across a corner are shorter than the arc, so only check
        // gaps whose endpoints share a segment
        let gaps: Vec<f64> = resampled.windows(2).map(|w| w[0].distance_3d(&w[1])).collect();
        let exact = gaps.iter().filter(|g| (*g - step).abs() < 1e-9).count();
        assert!(exact + 4 >= gaps.len());
        assert!(gaps.iter().all(|g| *g <= step + 1e-9));
    }

    #[test]
    fn test_expected_point_count() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 0.0),
            PlanarPoint::new(30.0, 40.0, 0.0),
        ];
        let resampled = resample_by_arc_length_3d(&points, 1.0).unwrap();
        let expected = (path_length_3d(&points) / 1.0).floor() as usize + 1;
        assert_eq!(resampled.len(), expected);
    }

    #[test]
    fn test_vertical_distance_counts() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 0.0),
            PlanarPoint::new(0.0, 0.0, 4.0),
        ];
        let resampled = resample_by_arc_length_3d(&points, 1.0).unwrap();
        assert_eq!(resampled.len(), 5);
        assert!((resampled[2].altitude - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_points_are_skipped() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 0.0),
            PlanarPoint::new(0.0, 0.0, 0.0),
            PlanarPoint::new(2.0, 0.0, 0.0),
        ];
        let resampled = resample_by_arc_length_3d(&points, 1.0).unwrap();
        assert_eq!(resampled.len(), 3);
        assert!(resampled.iter().all(|p| p.easting.is_finite()));
    }

    #[test]
    fn test_single_point_unchanged() {
        let points = vec![PlanarPoint::new(1.0, 2.0, 3.0)];
        assert_eq!(resample_by_arc_length_3d(&points, 1.0).unwrap(), points);
    }

    #[test]
    fn test_invalid_input_rejected() {
        assert!(resample_by_arc_length_3d(&[], 1.0).is_err());
        let points = vec![PlanarPoint::new(0.0, 0.0, 0.0)];
        assert!(resample_by_arc_length_3d(&points, 0.0).is_err());
        assert!(resample_by_arc_length_3d(&points, -2.0).is_err());
        assert!(resample_by_arc_length_3d(&points, f64::NAN).is_err());
    }
}
