/// ALTITUDE SMOOTHING FILTERS
///
/// Denoise the altitude channel of a projected track before resampling.
/// Every filter returns a sequence of exactly the input length and is
/// deterministic for a given (sequence, parameters) pair.
///
/// - Median: edge-clamped sliding median, kills isolated GPS spikes
/// - Savitzky-Golay (local polynomial style): center-weighted moving average
/// - Butterworth: zero-phase second-order low-pass

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Q_BUTTERWORTH_F64};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::track_types::PlanarPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    None,
    Median { window: usize },
    SavitzkyGolay { window: usize, order: u32 },
    /// `cutoff` is a fraction of the Nyquist frequency, strictly between 0 and 1.
    Butterworth { cutoff: f64 },
}

impl Default for FilterKind {
    fn default() -> Self {
        FilterKind::None
    }
}

impl FilterKind {
    pub fn label(&self) -> String {
        match self {
            FilterKind::None => "none".to_string(),
            FilterKind::Median { window } => format!("median (window {})", window),
            FilterKind::SavitzkyGolay { window, order } => {
                format!("sgolay (window {}, order {})", window, order)
            }
            FilterKind::Butterworth { cutoff } => format!("butterworth (cutoff {:.2})", cutoff),
        }
    }

    /// Checks the parameters without touching any data.
    pub fn validate(&self) -> Result<()> {
        match *self {
            FilterKind::None => Ok(()),
            FilterKind::Median { window } => check_window(window),
            FilterKind::SavitzkyGolay { window, order } => {
                check_window(window)?;
                if order as usize >= window {
                    return Err(TrackError::validation(format!(
                        "polynomial order {} must be smaller than window {}",
                        order, window
                    )));
                }
                Ok(())
            }
            FilterKind::Butterworth { cutoff } => {
                if !(cutoff > 0.0 && cutoff < 1.0) {
                    return Err(TrackError::validation(format!(
                        "Butterworth cutoff {} must be in (0, 1) of Nyquist",
                        cutoff
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn apply(&self, data: &[f64]) -> Result<Vec<f64>> {
        match *self {
            FilterKind::None => Ok(data.to_vec()),
            FilterKind::Median { window } => median_filter(data, window),
            FilterKind::SavitzkyGolay { window, order } => savitzky_golay_smooth(data, window, order),
            FilterKind::Butterworth { cutoff } => butterworth_smooth(data, cutoff),
        }
    }
}

/// Sliding median of odd width; the window repeats the edge values at both ends.
pub fn median_filter(data: &[f64], window: usize) -> Result<Vec<f64>> {
    check_window(window)?;
    let half = window / 2;
    let mut window_data = Vec::with_capacity(window);

    let result = (0..data.len())
        .map(|i| {
            window_data.clear();
            window_data.extend((0..window).map(|k| data[clamped_index(i, k, half, data.len())]));
            window_data.sort_by(|a, b| a.total_cmp(b));
            window_data[half]
        })
        .collect();

    Ok(result)
}

/// Center-weighted moving average: weight `(1 - |j| / (half + 1))^order`.
/// Order 0 degrades to a plain moving average.
pub fn savitzky_golay_smooth(data: &[f64], window: usize, order: u32) -> Result<Vec<f64>> {
    FilterKind::SavitzkyGolay { window, order }.validate()?;
    let half = window / 2;

    let coeffs: Vec<f64> = (0..window)
        .map(|k| {
            let distance = (k as f64 - half as f64).abs();
            (1.0 - distance / (half as f64 + 1.0)).powi(order as i32)
        })
        .collect();
    let weight_sum: f64 = coeffs.iter().sum();

    let result = (0..data.len())
        .map(|i| {
            let smoothed: f64 = coeffs
                .iter()
                .enumerate()
                .map(|(k, c)| c * data[clamped_index(i, k, half, data.len())])
                .sum();
            smoothed / weight_sum
        })
        .collect();

    Ok(result)
}

/// Forward-backward Butterworth low-pass, so peaks are not shifted along the track.
pub fn butterworth_smooth(data: &[f64], cutoff: f64) -> Result<Vec<f64>> {
    FilterKind::Butterworth { cutoff }.validate()?;
    if data.len() < 3 {
        return Ok(data.to_vec());
    }

    let sample_rate = 1.0;
    let cutoff_hz = cutoff * sample_rate / 2.0;
    let coeffs = Coefficients::<f64>::from_params(
        biquad::Type::LowPass,
        sample_rate.hz(),
        cutoff_hz.hz(),
        Q_BUTTERWORTH_F64,
    )
    .map_err(|e| TrackError::validation(format!("Butterworth design failed: {:?}", e)))?;

    // Prime each pass with the edge value so the filter does not ramp up from zero
    let mut forward = DirectForm1::<f64>::new(coeffs);
    let first = data[0];
    for _ in 0..data.len().min(64) {
        forward.run(first);
    }
    let mut pass: Vec<f64> = data.iter().map(|&x| forward.run(x)).collect();

    pass.reverse();
    let mut backward = DirectForm1::<f64>::new(coeffs);
    let last = pass[0];
    for _ in 0..pass.len().min(64) {
        backward.run(last);
    }
    let mut smoothed: Vec<f64> = pass.iter().map(|&x| backward.run(x)).collect();
    smoothed.reverse();

    Ok(smoothed)
}

/// Runs `kind` over the altitude channel only; easting/northing are untouched.
pub fn apply_to_altitude(points: &[PlanarPoint], kind: &FilterKind) -> Result<Vec<PlanarPoint>> {
    if matches!(kind, FilterKind::None) {
        return Ok(points.to_vec());
    }

    let altitudes: Vec<f64> = points.iter().map(|p| p.altitude).collect();
    let filtered = kind.apply(&altitudes)?;

    Ok(points
        .iter()
        .zip(filtered)
        .map(|(p, z)| PlanarPoint::new(p.easting, p.northing, z))
        .collect())
}

fn check_window(window: usize) -> Result<()> {
    if window == 0 || window % 2 == 0 {
        return Err(TrackError::validation(format!(
            "window size must be positive and odd, got {}",
            window
        )));
    }
    Ok(())
}

fn clamped_index(center: usize, k: usize, half: usize, len: usize) -> usize {
    let idx = center as isize + k as isize - half as isize;
    idx.clamp(0, len as isize - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_removes_spike() {
        let data = vec![100.0, 100.0, 140.0, 100.0, 100.0];
        let filtered = median_filter(&data, 3).unwrap();
        assert_eq!(filtered, vec![100.0; 5]);
    }

    #[test]
    fn test_median_clamps_edges() {
        let data = vec![1.0, 5.0, 2.0];
        // positions see [1,1,5], [1,5,2], [5,2,2]
        assert_eq!(median_filter(&data, 3).unwrap(), vec![1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_even_or_zero_window_rejected() {
        assert!(median_filter(&[1.0, 2.0], 4).is_err());
        assert!(median_filter(&[1.0, 2.0], 0).is_err());
        assert!(savitzky_golay_smooth(&[1.0, 2.0], 2, 1).is_err());
    }

    #[test]
    fn test_sgolay_order_must_be_below_window() {
        assert!(savitzky_golay_smooth(&[1.0, 2.0, 3.0], 5, 5).is_err());
        assert!(savitzky_golay_smooth(&[1.0, 2.0, 3.0], 5, 4).is_ok());
    }

    #[test]
    fn test_sgolay_keeps_constant_and_length() {
        let data = vec![7.0; 9];
        let filtered = savitzky_golay_smooth(&data, 5, 2).unwrap();
        assert_eq!(filtered.len(), data.len());
        for v in filtered {
            assert!((v - 7.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sgolay_order_zero_is_moving_average() {
        let data = vec![0.0, 0.0, 3.0, 0.0, 0.0];
        let filtered = savitzky_golay_smooth(&data, 3, 0).unwrap();
        assert!((filtered[2] - 1.0).abs() < 1e-12);
        assert!((filtered[1] - 1.0).abs() < 1e-12);
        assert!(filtered[0].abs() < 1e-12);
    }

    #[test]
    fn test_sgolay_center_weighting() {
        // window 3, order 1: weights 0.5, 1, 0.5
        let data = vec![0.0, 4.0, 0.0];
        let filtered = savitzky_golay_smooth(&data, 3, 1).unwrap();
        assert!((filtered[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_butterworth_preserves_length_and_level() {
        let data: Vec<f64> = (0..200).map(|i| 50.0 + if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let smoothed = butterworth_smooth(&data, 0.2).unwrap();
        assert_eq!(smoothed.len(), data.len());
        // alternating noise sits at Nyquist and should be almost gone mid-track
        assert!((smoothed[100] - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_butterworth_cutoff_validated() {
        assert!(butterworth_smooth(&[1.0, 2.0, 3.0], 0.0).is_err());
        assert!(butterworth_smooth(&[1.0, 2.0, 3.0], 1.0).is_err());
    }

    #[test]
    fn test_apply_to_altitude_only_touches_z() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0, 10.0),
            PlanarPoint::new(1.0, 1.0, 50.0),
            PlanarPoint::new(2.0, 2.0, 10.0),
        ];
        let filtered = apply_to_altitude(&points, &FilterKind::Median { window: 3 }).unwrap();
        assert_eq!(filtered[1].easting, 1.0);
        assert_eq!(filtered[1].northing, 1.0);
        assert_eq!(filtered[1].altitude, 10.0);
    }

    #[test]
    fn test_filter_kind_serde_tag() {
        let kind: FilterKind =
            serde_json::from_str(r#"{"kind":"savitzky_golay","window":5,"order":2}"#).unwrap();
        assert_eq!(kind, FilterKind::SavitzkyGolay { window: 5, order: 2 });
        let none: FilterKind = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(none, FilterKind::None);
    }
}
