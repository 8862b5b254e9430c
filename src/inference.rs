/// INFERENCE ON A SINGLE GPX TRACK
///
/// The track goes through the same preprocessing as the training data, is
/// normalized with the persisted scaler and fed to one or more saved models.
/// With several models the result is the ensemble mean plus the population
/// standard deviation of the member predictions.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::baseline::compute_baseline;
use crate::config::PreprocessConfig;
use crate::error::{Result, TrackError};
use crate::regressor::{load_regressor, TripRegressor};
use crate::sequence_dataset::{LoadedTrack, PaddedBatch};
use crate::track_preprocessor::process_gpx;
use crate::track_types::{TripMetrics, TARGET_COUNT};
use crate::zscore_scaler::ZScoreScaler;

#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    pub track: String,
    pub segments: usize,
    pub max_len: usize,
    /// One prediction per model, in model order.
    pub member_predictions: Vec<TripMetrics>,
    pub prediction: TripMetrics,
    /// Spread across ensemble members; `None` for a single model.
    pub uncertainty: Option<TripMetrics>,
    /// Raw geometric sums of the same track, for comparison.
    pub baseline: TripMetrics,
}

pub struct InferenceEngine {
    scaler: ZScoreScaler,
    models: Vec<Box<dyn TripRegressor>>,
    preprocess: PreprocessConfig,
    max_len: Option<usize>,
}

impl InferenceEngine {
    pub fn new(
        scaler: ZScoreScaler,
        models: Vec<Box<dyn TripRegressor>>,
        preprocess: PreprocessConfig,
        max_len: Option<usize>,
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(TrackError::config("at least one model is required for inference"));
        }
        preprocess.validate()?;
        if max_len == Some(0) {
            return Err(TrackError::validation("max_len must be positive"));
        }
        Ok(InferenceEngine {
            scaler,
            models,
            preprocess,
            max_len,
        })
    }

    /// Loads the scaler and every model file.
    pub fn from_files(
        scaler_path: &Path,
        model_paths: &[PathBuf],
        preprocess: PreprocessConfig,
        max_len: Option<usize>,
    ) -> Result<Self> {
        let scaler = ZScoreScaler::load(scaler_path)?;
        let models = model_paths
            .iter()
            .map(|p| load_regressor(p))
            .collect::<Result<Vec<_>>>()?;
        info!("loaded {} model(s)", models.len());
        Self::new(scaler, models, preprocess, max_len)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn infer(&self, gpx_path: &Path) -> Result<InferenceResult> {
        let track = process_gpx(gpx_path, &self.preprocess)?;
        let segments = track.features.len();

        let loaded = LoadedTrack {
            name: track.name.clone(),
            family: String::new(),
            features: self.scaler.transform_all(&track.features),
            raw_features: track.features.clone(),
            labels: TripMetrics::default(),
        };
        let batch = match self.max_len {
            Some(width) => PaddedBatch::with_width(vec![loaded], width)?,
            None => PaddedBatch::from_tracks(vec![loaded])?,
        };

        let mut member_predictions = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let predicted = model.predict(&batch)?;
            let first = predicted
                .into_iter()
                .next()
                .ok_or_else(|| TrackError::validation("model returned no prediction"))?;
            member_predictions.push(first);
        }

        let (prediction, uncertainty) = ensemble(&member_predictions);
        Ok(InferenceResult {
            track: track.name,
            segments,
            max_len: batch.max_len(),
            member_predictions,
            prediction,
            uncertainty,
            baseline: compute_baseline(&track.features),
        })
    }
}

/// Mean and population std per metric; the std is `None` below two members.
pub fn ensemble(predictions: &[TripMetrics]) -> (TripMetrics, Option<TripMetrics>) {
    if predictions.is_empty() {
        return (TripMetrics::default(), None);
    }

    let n = predictions.len() as f64;
    let mut mean = [0.0; TARGET_COUNT];
    for p in predictions {
        for (m, v) in mean.iter_mut().zip(p.to_array()) {
            *m += v / n;
        }
    }
    if predictions.len() == 1 {
        return (TripMetrics::from_array(mean), None);
    }

    let mut variance = [0.0; TARGET_COUNT];
    for p in predictions {
        for ((var, v), m) in variance.iter_mut().zip(p.to_array()).zip(mean) {
            *var += (v - m).powi(2) / n;
        }
    }
    (
        TripMetrics::from_array(mean),
        Some(TripMetrics::from_array(variance.map(f64::sqrt))),
    )
}

/// Values rounded to 0.1 m, under the keys downstream tools read.
#[derive(Debug, Serialize)]
struct InferenceJson {
    dist_total_m: f64,
    desnivel_pos_m: f64,
    desnivel_neg_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    uncertainty_sigma: Option<UncertaintyJson>,
}

#[derive(Debug, Serialize)]
struct UncertaintyJson {
    dist: f64,
    up: f64,
    down: f64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn result_json(result: &InferenceResult) -> Result<String> {
    let json = InferenceJson {
        dist_total_m: round1(result.prediction.distance),
        desnivel_pos_m: round1(result.prediction.elevation_gain),
        desnivel_neg_m: round1(result.prediction.elevation_loss),
        uncertainty_sigma: result.uncertainty.map(|u| UncertaintyJson {
            dist: round1(u.distance),
            up: round1(u.elevation_gain),
            down: round1(u.elevation_loss),
        }),
    };
    serde_json::to_string_pretty(&json).map_err(|e| TrackError::json("<inference result>", e))
}

pub fn save_result(path: &Path, result: &InferenceResult) -> Result<()> {
    let json = result_json(result)?;
    fs::write(path, json).map_err(|e| TrackError::io(path, e))
}
