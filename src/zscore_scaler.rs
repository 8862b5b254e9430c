/// Z-SCORE NORMALIZATION STATISTICS
///
/// Fit once over the noisy tracks of every family, persisted next to the
/// preprocessed data and reused unchanged by training, every LOFO fold and
/// inference. A scaler is an immutable value; consumers borrow it.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::track_types::SegmentFeature;

/// Lower bound for every sigma so `transform` is always defined.
pub const SIGMA_FLOOR: f64 = 1e-8;

/// Scaler file name inside a preprocessed-data root.
pub const SCALER_FILE_NAME: &str = "mu_sigma.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZScoreScaler {
    pub mu_dh: f64,
    pub mu_dz: f64,
    pub mu_slope: f64,
    pub sigma_dh: f64,
    pub sigma_dz: f64,
    pub sigma_slope: f64,
}

impl ZScoreScaler {
    /// Mean and population standard deviation per dimension.
    pub fn fit(features: &[SegmentFeature]) -> Result<Self> {
        if features.is_empty() {
            return Err(TrackError::validation("cannot fit scaler on an empty feature list"));
        }

        let n = features.len() as f64;
        let mut mean = [0.0; 3];
        for f in features {
            for (m, v) in mean.iter_mut().zip(f.to_array()) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = [0.0; 3];
        for f in features {
            for ((var, v), m) in variance.iter_mut().zip(f.to_array()).zip(mean) {
                *var += (v - m).powi(2);
            }
        }
        let sigma = variance.map(|v| (v / n).sqrt().max(SIGMA_FLOOR));

        Ok(ZScoreScaler {
            mu_dh: mean[0],
            mu_dz: mean[1],
            mu_slope: mean[2],
            sigma_dh: sigma[0],
            sigma_dz: sigma[1],
            sigma_slope: sigma[2],
        })
    }

    pub fn transform(&self, feature: &SegmentFeature) -> SegmentFeature {
        SegmentFeature::new(
            (feature.dh - self.mu_dh) / self.sigma_dh,
            (feature.dz - self.mu_dz) / self.sigma_dz,
            (feature.slope - self.mu_slope) / self.sigma_slope,
        )
    }

    pub fn transform_all(&self, features: &[SegmentFeature]) -> Vec<SegmentFeature> {
        features.iter().map(|f| self.transform(f)).collect()
    }

    /// Maps a normalized feature back to physical units.
    pub fn inverse_transform(&self, feature: &SegmentFeature) -> SegmentFeature {
        SegmentFeature::new(
            feature.dh * self.sigma_dh + self.mu_dh,
            feature.dz * self.sigma_dz + self.mu_dz,
            feature.slope * self.sigma_slope + self.mu_slope,
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| TrackError::json(path, e))?;
        fs::write(path, json).map_err(|e| TrackError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| TrackError::io(path, e))?;
        let scaler: ZScoreScaler =
            serde_json::from_str(&content).map_err(|e| TrackError::json(path, e))?;
        scaler.check()?;
        Ok(scaler)
    }

    /// Rejects hand-edited files whose sigmas would break `transform`.
    fn check(&self) -> Result<()> {
        let values = [
            self.mu_dh,
            self.mu_dz,
            self.mu_slope,
            self.sigma_dh,
            self.sigma_dz,
            self.sigma_slope,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(TrackError::config("scaler contains non-finite values"));
        }
        if [self.sigma_dh, self.sigma_dz, self.sigma_slope]
            .iter()
            .any(|s| *s < SIGMA_FLOOR)
        {
            return Err(TrackError::config(format!(
                "scaler sigma below floor {:e}",
                SIGMA_FLOOR
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Vec<SegmentFeature> {
        vec![
            SegmentFeature::new(1.0, 2.0, 0.5),
            SegmentFeature::new(3.0, 4.0, 1.5),
            SegmentFeature::new(5.0, 6.0, 2.5),
        ]
    }

    #[test]
    fn test_fit_population_statistics() {
        let scaler = ZScoreScaler::fit(&sample()).unwrap();
        assert!((scaler.mu_dh - 3.0).abs() < 1e-12);
        assert!((scaler.mu_dz - 4.0).abs() < 1e-12);
        assert!((scaler.mu_slope - 1.5).abs() < 1e-12);
        assert!((scaler.sigma_dh - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((scaler.sigma_dz - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((scaler.sigma_slope - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_fit_empty_rejected() {
        assert!(matches!(ZScoreScaler::fit(&[]), Err(TrackError::Validation(_))));
    }

    #[test]
    fn test_constant_feature_sigma_floored() {
        let scaler = ZScoreScaler::fit(&[SegmentFeature::new(1.0, 0.0, 0.0); 4]).unwrap();
        assert_eq!(scaler.sigma_dh, SIGMA_FLOOR);
        let t = scaler.transform(&SegmentFeature::new(1.0, 0.0, 0.0));
        assert_eq!(t, SegmentFeature::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_mean_maps_to_origin() {
        let scaler = ZScoreScaler::fit(&sample()).unwrap();
        let t = scaler.transform(&SegmentFeature::new(3.0, 4.0, 1.5));
        assert!(t.dh.abs() < 1e-12 && t.dz.abs() < 1e-12 && t.slope.abs() < 1e-12);
    }

    #[test]
    fn test_inverse_transform() {
        let scaler = ZScoreScaler::fit(&sample()).unwrap();
        let original = SegmentFeature::new(4.2, -1.0, 0.3);
        let back = scaler.inverse_transform(&scaler.transform(&original));
        assert!((back.dh - original.dh).abs() < 1e-9);
        assert!((back.dz - original.dz).abs() < 1e-9);
        assert!((back.slope - original.slope).abs() < 1e-9);
    }

    #[test]
    fn test_save_load_keeps_transform() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SCALER_FILE_NAME);
        let scaler = ZScoreScaler::fit(&sample()).unwrap();
        scaler.save(&path).unwrap();

        let loaded = ZScoreScaler::load(&path).unwrap();
        assert!((loaded.sigma_dh - scaler.sigma_dh).abs() < 1e-12);
        assert!((loaded.sigma_slope - scaler.sigma_slope).abs() < 1e-12);
        assert_eq!(loaded.mu_dz, scaler.mu_dz);
        let f = SegmentFeature::new(2.0, 7.0, -0.4);
        let (a, b) = (loaded.transform(&f), scaler.transform(&f));
        assert!((a.dh - b.dh).abs() < 1e-9);
        assert!((a.dz - b.dz).abs() < 1e-9);
        assert!((a.slope - b.slope).abs() < 1e-9);
    }

    #[test]
    fn test_json_field_names() {
        let scaler = ZScoreScaler::fit(&sample()).unwrap();
        let json = serde_json::to_string(&scaler).unwrap();
        for key in ["muDh", "muDz", "muSlope", "sigmaDh", "sigmaDz", "sigmaSlope"] {
            assert!(json.contains(key), "missing {}", key);
        }
    }

    #[test]
    fn test_load_missing_or_malformed() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(ZScoreScaler::load(&missing).unwrap_err().is_io());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, r#"{"muDh": 1.0}"#).unwrap();
        assert!(matches!(ZScoreScaler::load(&broken), Err(TrackError::Json { .. })));

        let zero_sigma = dir.path().join("zero.json");
        fs::write(
            &zero_sigma,
            r#"{"muDh":0,"muDz":0,"muSlope":0,"sigmaDh":0,"sigmaDz":1,"sigmaSlope":1}"#,
        )
        .unwrap();
        assert!(matches!(ZScoreScaler::load(&zero_sigma), Err(TrackError::Config(_))));
    }
}
