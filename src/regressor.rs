/// TRIP-METRICS REGRESSORS
///
/// The orchestrator only talks to [`TripRegressor`]: fit on a padded batch,
/// predict a padded batch, save to a file. [`PooledLinearRegressor`] is the
/// bundled implementation: masked pooling over the sequence followed by a
/// linear head, trained with SGD + momentum on an L1 loss under a cosine
/// learning-rate schedule.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::{Result, TrackError};
use crate::sequence_dataset::PaddedBatch;
use crate::track_types::{TripMetrics, FEATURE_COUNT, TARGET_COUNT};

/// Pooled descriptors per track: channel sums, channel means, positive and
/// negative dz sums, real length.
pub const DESCRIPTOR_COUNT: usize = 2 * FEATURE_COUNT + 3;

const DZ_CHANNEL: usize = 1;
const MOMENTUM: f64 = 0.9;
const MIN_LR_RATIO: f64 = 1e-3;
const STD_FLOOR: f64 = 1e-8;

/// What a training run did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    /// Mean absolute error over the three metrics before the first update.
    pub initial_mae: f64,
    pub final_mae: f64,
    pub stopped_early: bool,
}

pub trait TripRegressor: Send + Sync {
    /// Trains from scratch on `batch`; any previous fit is discarded.
    fn fit(&mut self, batch: &PaddedBatch, config: &TrainingConfig) -> Result<TrainingSummary>;

    /// One prediction per track of `batch`, in batch order.
    fn predict(&self, batch: &PaddedBatch) -> Result<Vec<TripMetrics>>;

    fn save(&self, path: &Path) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Creates a fresh, untrained regressor; called once per fold.
pub type RegressorFactory = dyn Fn() -> Box<dyn TripRegressor> + Sync;

pub fn default_factory() -> Box<dyn TripRegressor> {
    Box::new(PooledLinearRegressor::new())
}

/// Restores a regressor saved with [`TripRegressor::save`].
pub fn load_regressor(path: &Path) -> Result<Box<dyn TripRegressor>> {
    Ok(Box::new(PooledLinearRegressor::load(path)?))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PooledLinearRegressor {
    descriptor_mean: [f64; DESCRIPTOR_COUNT],
    descriptor_std: [f64; DESCRIPTOR_COUNT],
    target_mean: [f64; TARGET_COUNT],
    target_std: [f64; TARGET_COUNT],
    weights: [[f64; DESCRIPTOR_COUNT]; TARGET_COUNT],
    bias: [f64; TARGET_COUNT],
    trained: bool,
}

impl Default for PooledLinearRegressor {
    fn default() -> Self {
        Self::new()
    }
}

impl PooledLinearRegressor {
    pub fn new() -> Self {
        PooledLinearRegressor {
            descriptor_mean: [0.0; DESCRIPTOR_COUNT],
            descriptor_std: [1.0; DESCRIPTOR_COUNT],
            target_mean: [0.0; TARGET_COUNT],
            target_std: [1.0; TARGET_COUNT],
            weights: [[0.0; DESCRIPTOR_COUNT]; TARGET_COUNT],
            bias: [0.0; TARGET_COUNT],
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| TrackError::io(path, e))?;
        let model: PooledLinearRegressor =
            serde_json::from_str(&content).map_err(|e| TrackError::json(path, e))?;
        if !model.trained {
            return Err(TrackError::config(format!(
                "model in {} was saved before training",
                path.display()
            )));
        }
        Ok(model)
    }

    fn standardized_descriptors(&self, batch: &PaddedBatch) -> Vec<[f64; DESCRIPTOR_COUNT]> {
        (0..batch.batch_size())
            .map(|i| {
                let mut d = pooled_descriptors(batch, i);
                for (k, v) in d.iter_mut().enumerate() {
                    *v = (*v - self.descriptor_mean[k]) / self.descriptor_std[k];
                }
                d
            })
            .collect()
    }

    fn forward(&self, x: &[f64; DESCRIPTOR_COUNT]) -> [f64; TARGET_COUNT] {
        let mut out = self.bias;
        for (k, o) in out.iter_mut().enumerate() {
            *o += dot(&self.weights[k], x);
        }
        out
    }

    /// Mean absolute error in label units, averaged over the three metrics.
    fn label_mae(&self, xs: &[[f64; DESCRIPTOR_COUNT]], ys: &[[f64; TARGET_COUNT]]) -> f64 {
        let mut total = 0.0;
        for (x, y) in xs.iter().zip(ys) {
            let pred = self.forward(x);
            for k in 0..TARGET_COUNT {
                total += (pred[k] - y[k]).abs() * self.target_std[k];
            }
        }
        total / (xs.len() * TARGET_COUNT) as f64
    }
}

impl TripRegressor for PooledLinearRegressor {
    fn fit(&mut self, batch: &PaddedBatch, config: &TrainingConfig) -> Result<TrainingSummary> {
        config.validate()?;
        let n = batch.batch_size();
        if n == 0 {
            return Err(TrackError::validation("cannot train on an empty batch"));
        }

        *self = PooledLinearRegressor::new();

        let raw: Vec<[f64; DESCRIPTOR_COUNT]> = (0..n).map(|i| pooled_descriptors(batch, i)).collect();
        let targets: Vec<[f64; TARGET_COUNT]> = batch.labels().iter().map(|l| l.to_array()).collect();

        (self.descriptor_mean, self.descriptor_std) = column_stats(&raw);
        (self.target_mean, self.target_std) = column_stats(&targets);

        let xs: Vec<[f64; DESCRIPTOR_COUNT]> = raw
            .iter()
            .map(|d| std::array::from_fn(|k| (d[k] - self.descriptor_mean[k]) / self.descriptor_std[k]))
            .collect();
        let ys: Vec<[f64; TARGET_COUNT]> = targets
            .iter()
            .map(|t| std::array::from_fn(|k| (t[k] - self.target_mean[k]) / self.target_std[k]))
            .collect();

        let mut optimizer = MomentumSgd::new(config.learning_rate, MOMENTUM, TARGET_COUNT * (DESCRIPTOR_COUNT + 1));
        let schedule = CosineSchedule::new(config.learning_rate, config.learning_rate * MIN_LR_RATIO, config.epochs);

        let initial_mae = self.label_mae(&xs, &ys);
        let mut epochs_run = 0;
        let mut stopped_early = false;

        for epoch in 0..config.epochs {
            if config.early_stop_mae > 0.0 && self.label_mae(&xs, &ys) <= config.early_stop_mae {
                stopped_early = true;
                break;
            }

            // L1 subgradient, averaged over the batch
            let mut gradients = vec![0.0; TARGET_COUNT * (DESCRIPTOR_COUNT + 1)];
            for (x, y) in xs.iter().zip(&ys) {
                let pred = self.forward(x);
                for k in 0..TARGET_COUNT {
                    let direction = sign(pred[k] - y[k]);
                    let row = k * (DESCRIPTOR_COUNT + 1);
                    for (d, xd) in x.iter().enumerate() {
                        gradients[row + d] += direction * xd / n as f64;
                    }
                    gradients[row + DESCRIPTOR_COUNT] += direction / n as f64;
                }
            }

            optimizer.set_lr(schedule.lr_at(epoch));
            let mut params = self.flatten();
            optimizer.step(&mut params, &gradients);
            self.unflatten(&params);
            epochs_run = epoch + 1;

            if epoch % 50 == 0 {
                debug!("epoch {}: training MAE {:.3}", epoch, self.label_mae(&xs, &ys));
            }
        }

        self.trained = true;
        let final_mae = self.label_mae(&xs, &ys);
        info!(
            "trained on {} tracks for {} epochs, MAE {:.3} -> {:.3}",
            n, epochs_run, initial_mae, final_mae
        );

        Ok(TrainingSummary {
            epochs_run,
            initial_mae,
            final_mae,
            stopped_early,
        })
    }

    fn predict(&self, batch: &PaddedBatch) -> Result<Vec<TripMetrics>> {
        if !self.trained {
            return Err(TrackError::validation("regressor has not been trained"));
        }

        Ok(self
            .standardized_descriptors(batch)
            .iter()
            .map(|x| {
                let z = self.forward(x);
                TripMetrics::from_array(std::array::from_fn(|k| {
                    z[k] * self.target_std[k] + self.target_mean[k]
                }))
            })
            .collect())
    }

    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| TrackError::json(path, e))?;
        fs::write(path, json).map_err(|e| TrackError::io(path, e))
    }

    fn name(&self) -> &'static str {
        "pooled-linear"
    }
}

impl PooledLinearRegressor {
    fn flatten(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(TARGET_COUNT * (DESCRIPTOR_COUNT + 1));
        for k in 0..TARGET_COUNT {
            params.extend_from_slice(&self.weights[k]);
            params.push(self.bias[k]);
        }
        params
    }

    fn unflatten(&mut self, params: &[f64]) {
        for k in 0..TARGET_COUNT {
            let row = k * (DESCRIPTOR_COUNT + 1);
            self.weights[k].copy_from_slice(&params[row..row + DESCRIPTOR_COUNT]);
            self.bias[k] = params[row + DESCRIPTOR_COUNT];
        }
    }
}

/// Masked pooling of one track; padded positions never contribute.
pub fn pooled_descriptors(batch: &PaddedBatch, track: usize) -> [f64; DESCRIPTOR_COUNT] {
    let mask = batch.mask_row(track);
    let count: f64 = mask.iter().sum();

    let mut d = [0.0; DESCRIPTOR_COUNT];
    for c in 0..FEATURE_COUNT {
        d[c] = dot(batch.channel(track, c), mask);
        d[FEATURE_COUNT + c] = if count > 0.0 { d[c] / count } else { 0.0 };
    }
    for (x, m) in batch.channel(track, DZ_CHANNEL).iter().zip(mask) {
        d[2 * FEATURE_COUNT] += m * x.max(0.0);
        d[2 * FEATURE_COUNT + 1] += m * x.min(0.0);
    }
    d[2 * FEATURE_COUNT + 2] = count;
    d
}

/// SGD with momentum: `v = mu * v + g; p -= lr * v`.
struct MomentumSgd {
    lr: f64,
    momentum: f64,
    velocity: Vec<f64>,
}

impl MomentumSgd {
    fn new(lr: f64, momentum: f64, n_params: usize) -> Self {
        MomentumSgd {
            lr,
            momentum,
            velocity: vec![0.0; n_params],
        }
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn step(&mut self, params: &mut [f64], gradients: &[f64]) {
        for ((p, v), g) in params.iter_mut().zip(self.velocity.iter_mut()).zip(gradients) {
            *v = self.momentum * *v + g;
            *p -= self.lr * *v;
        }
    }
}

struct CosineSchedule {
    initial_lr: f64,
    min_lr: f64,
    total_steps: usize,
}

impl CosineSchedule {
    fn new(initial_lr: f64, min_lr: f64, total_steps: usize) -> Self {
        CosineSchedule { initial_lr, min_lr, total_steps }
    }

    fn lr_at(&self, step: usize) -> f64 {
        if self.total_steps == 0 {
            return self.initial_lr;
        }
        let progress = (step as f64 / self.total_steps as f64).min(1.0);
        self.min_lr + (self.initial_lr - self.min_lr) * (1.0 + (PI * progress).cos()) / 2.0
    }
}

/// Per-column mean and population std; near-constant columns get std 1.
fn column_stats<const N: usize>(rows: &[[f64; N]]) -> ([f64; N], [f64; N]) {
    let n = rows.len().max(1) as f64;
    let mean: [f64; N] = std::array::from_fn(|k| rows.iter().map(|r| r[k]).sum::<f64>() / n);
    let std: [f64; N] = std::array::from_fn(|k| {
        let var = rows.iter().map(|r| (r[k] - mean[k]).powi(2)).sum::<f64>() / n;
        let s = var.sqrt();
        if s < STD_FLOOR { 1.0 } else { s }
    });
    (mean, std)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}
