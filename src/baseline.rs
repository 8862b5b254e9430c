/// NON-LEARNED BASELINE
///
/// Sums the geometry of a feature sequence directly: the same computation
/// that produces the pattern labels, applied to a noisy recording. Any
/// learned model has to beat this to be worth keeping.

use serde::{Deserialize, Serialize};

use crate::feature_extractor::trip_metrics;
use crate::sequence_dataset::PaddedBatch;
use crate::track_types::{SegmentFeature, TripMetrics, TARGET_COUNT};

/// Which copy of the test features the baseline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Physical units, directly comparable with the labels.
    Raw,
    /// The scaler-normalized tensor the regressor sees. Results are in
    /// normalized units; kept for comparison with older reports.
    Normalized,
}

impl Default for BaselineSource {
    fn default() -> Self {
        BaselineSource::Raw
    }
}

/// (Σdh, Σ positive dz, Σ|negative dz|). Empty input gives zeros.
pub fn compute_baseline(features: &[SegmentFeature]) -> TripMetrics {
    trip_metrics(features)
}

pub fn abs_error(prediction: &TripMetrics, expected: &TripMetrics) -> [f64; TARGET_COUNT] {
    let p = prediction.to_array();
    let e = expected.to_array();
    [(p[0] - e[0]).abs(), (p[1] - e[1]).abs(), (p[2] - e[2]).abs()]
}

pub fn overall_error(errors: &[f64; TARGET_COUNT]) -> f64 {
    errors.iter().sum::<f64>() / TARGET_COUNT as f64
}

/// Baseline predictions for every track of `batch`, index-aligned with it.
pub fn predict_batch(batch: &PaddedBatch, source: BaselineSource) -> Vec<TripMetrics> {
    (0..batch.batch_size())
        .map(|i| {
            let features = match source {
                BaselineSource::Raw => batch.raw_features(i).to_vec(),
                BaselineSource::Normalized => batch.unpadded_features(i),
            };
            compute_baseline(&features)
        })
        .collect()
}

/// Mean absolute error of the baseline over the batch, per metric.
pub fn evaluate_baseline(batch: &PaddedBatch, source: BaselineSource) -> [f64; TARGET_COUNT] {
    let predictions = predict_batch(batch, source);
    crate::lofo::compute_mae(&predictions, batch.labels())
}
