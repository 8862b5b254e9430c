/// LEAVE-ONE-FAMILY-OUT CROSS-VALIDATION
///
/// One fold per family: train a fresh regressor on every other family, test
/// on the held-out one, and score the non-learned baseline on the same test
/// tracks. The run moves through
/// `Initializing -> PerFoldLoop -> Aggregating -> Done`; the first error in
/// any fold aborts the whole run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{info, warn};
use rayon::prelude::*;

use crate::baseline::{evaluate_baseline, overall_error, BaselineSource};
use crate::config::TrainingConfig;
use crate::error::{Result, TrackError};
use crate::lofo_stats::{aggregate, LofoStatistics};
use crate::regressor::{RegressorFactory, TrainingSummary, TripRegressor};
use crate::sequence_dataset::{discover_families, load_batch, load_scaler, PaddedBatch};
use crate::track_types::{TripMetrics, TARGET_COUNT};
use crate::zscore_scaler::ZScoreScaler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LofoState {
    Initializing,
    /// `next_fold` is the zero-based index of the family tested next.
    PerFoldLoop { next_fold: usize },
    Aggregating,
    Done,
}

/// Everything one fold produced. Immutable once built.
pub struct FoldResult {
    /// One-based fold number, in family order.
    pub fold: usize,
    pub test_family: String,
    pub train_families: Vec<String>,
    pub model_mae: [f64; TARGET_COUNT],
    pub model_overall_mae: f64,
    pub baseline_mae: [f64; TARGET_COUNT],
    pub baseline_overall_mae: f64,
    pub training: TrainingSummary,
    pub model: Box<dyn TripRegressor>,
    /// Model predictions keyed by `family/track`.
    pub predictions: BTreeMap<String, TripMetrics>,
    pub expected: BTreeMap<String, TripMetrics>,
}

pub struct LofoOutcome {
    pub folds: Vec<FoldResult>,
    pub statistics: LofoStatistics,
}

#[derive(Debug, Clone)]
pub struct LofoOptions {
    pub training: TrainingConfig,
    pub baseline_source: BaselineSource,
    /// Run folds on a rayon pool instead of one after another.
    pub parallel: bool,
    pub workers: usize,
}

impl Default for LofoOptions {
    fn default() -> Self {
        LofoOptions {
            training: TrainingConfig::default(),
            baseline_source: BaselineSource::Raw,
            parallel: false,
            workers: num_cpus::get(),
        }
    }
}

pub struct LofoRunner<'a> {
    data_dir: PathBuf,
    options: LofoOptions,
    factory: &'a RegressorFactory,
    state: LofoState,
    scaler: Option<ZScoreScaler>,
    families: Vec<String>,
    folds: Vec<FoldResult>,
    statistics: Option<LofoStatistics>,
}

impl<'a> LofoRunner<'a> {
    pub fn new(data_dir: &Path, options: LofoOptions, factory: &'a RegressorFactory) -> Self {
        LofoRunner {
            data_dir: data_dir.to_path_buf(),
            options,
            factory,
            state: LofoState::Initializing,
            scaler: None,
            families: Vec::new(),
            folds: Vec::new(),
            statistics: None,
        }
    }

    pub fn state(&self) -> LofoState {
        self.state
    }

    pub fn families(&self) -> &[String] {
        &self.families
    }

    /// Performs one transition and returns the new state.
    pub fn advance(&mut self) -> Result<LofoState> {
        self.state = match self.state {
            LofoState::Initializing => {
                self.initialize()?;
                LofoState::PerFoldLoop { next_fold: 0 }
            }
            LofoState::PerFoldLoop { next_fold } if self.options.parallel => {
                self.run_remaining_parallel(next_fold)?;
                LofoState::Aggregating
            }
            LofoState::PerFoldLoop { next_fold } => {
                let result = self.run_fold(next_fold)?;
                self.folds.push(result);
                if next_fold + 1 < self.families.len() {
                    LofoState::PerFoldLoop { next_fold: next_fold + 1 }
                } else {
                    LofoState::Aggregating
                }
            }
            LofoState::Aggregating => {
                self.statistics = Some(aggregate(&self.folds));
                LofoState::Done
            }
            LofoState::Done => LofoState::Done,
        };
        Ok(self.state)
    }

    pub fn run(mut self) -> Result<LofoOutcome> {
        let start = Instant::now();
        while self.advance()? != LofoState::Done {}

        info!(
            "LOFO finished: {} folds in {:.1}s",
            self.folds.len(),
            start.elapsed().as_secs_f64()
        );

        let statistics = self
            .statistics
            .take()
            .unwrap_or_else(|| aggregate(&self.folds));
        Ok(LofoOutcome {
            folds: self.folds,
            statistics,
        })
    }

    fn initialize(&mut self) -> Result<()> {
        // one scaler for every fold, never refit per fold
        self.scaler = Some(load_scaler(&self.data_dir)?);
        self.families = discover_families(&self.data_dir)?;
        if self.families.is_empty() {
            return Err(TrackError::config(format!(
                "no families found under {}",
                self.data_dir.display()
            )));
        }
        if self.families.len() == 1 {
            warn!("only one family: its fold has no training data and will fail");
        }
        info!("LOFO over {} families: {:?}", self.families.len(), self.families);
        Ok(())
    }

    fn run_remaining_parallel(&mut self, first: usize) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .map_err(|e| TrackError::config(format!("cannot build worker pool: {}", e)))?;

        let total = self.families.len() - first;
        let completed = AtomicUsize::new(0);
        let this = &*self;

        let results: Vec<FoldResult> = pool.install(|| {
            (first..this.families.len())
                .into_par_iter()
                .map(|index| {
                    let result = this.run_fold(index);
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    info!("folds completed: {}/{}", done, total);
                    result
                })
                .collect::<Result<Vec<_>>>()
        })?;

        self.folds.extend(results);
        self.folds.sort_by_key(|f| f.fold);
        Ok(())
    }

    fn run_fold(&self, index: usize) -> Result<FoldResult> {
        let test_family = &self.families[index];
        self.evaluate_fold(index).map_err(|e| TrackError::Fold {
            fold: index + 1,
            family: test_family.clone(),
            source: Box::new(e),
        })
    }

    fn evaluate_fold(&self, index: usize) -> Result<FoldResult> {
        let scaler = self
            .scaler
            .as_ref()
            .ok_or_else(|| TrackError::config("scaler not loaded before the fold loop"))?;

        let test_family = self.families[index].clone();
        let train_families: Vec<String> = self
            .families
            .iter()
            .filter(|f| **f != test_family)
            .cloned()
            .collect();

        info!(
            "fold {}/{}: testing {} against {} training families",
            index + 1,
            self.families.len(),
            test_family,
            train_families.len()
        );

        let train_batch = load_batch(&self.data_dir, scaler, Some(train_families.as_slice()))?;
        let test_batch = load_batch(&self.data_dir, scaler, Some(std::slice::from_ref(&test_family)))?;
        info!(
            "training samples: {}, test samples: {}",
            train_batch.batch_size(),
            test_batch.batch_size()
        );

        let mut model = (self.factory)();
        let training = model.fit(&train_batch, &self.options.training)?;

        let predicted = model.predict(&test_batch)?;
        let model_mae = compute_mae(&predicted, test_batch.labels());
        let baseline_mae = evaluate_baseline(&test_batch, self.options.baseline_source);

        info!(
            "fold {} ({}): model MAE {:.3}, baseline MAE {:.3}",
            index + 1,
            test_family,
            overall_error(&model_mae),
            overall_error(&baseline_mae)
        );

        let (predictions, expected) = keyed_by_track(&test_batch, &predicted);

        Ok(FoldResult {
            fold: index + 1,
            test_family,
            train_families,
            model_mae,
            model_overall_mae: overall_error(&model_mae),
            baseline_mae,
            baseline_overall_mae: overall_error(&baseline_mae),
            training,
            model,
            predictions,
            expected,
        })
    }
}

/// Mean absolute error per metric over paired predictions and labels.
pub fn compute_mae(predictions: &[TripMetrics], labels: &[TripMetrics]) -> [f64; TARGET_COUNT] {
    let n = predictions.len().min(labels.len());
    if n == 0 {
        return [0.0; TARGET_COUNT];
    }

    let mut total = [0.0; TARGET_COUNT];
    for (p, l) in predictions.iter().zip(labels) {
        for (k, (pv, lv)) in p.to_array().iter().zip(l.to_array()).enumerate() {
            total[k] += (pv - lv).abs();
        }
    }
    total.map(|t| t / n as f64)
}

fn keyed_by_track(
    batch: &PaddedBatch,
    predicted: &[TripMetrics],
) -> (BTreeMap<String, TripMetrics>, BTreeMap<String, TripMetrics>) {
    let names = batch.track_names();
    let predictions = names.iter().cloned().zip(predicted.iter().copied()).collect();
    let expected = names.iter().cloned().zip(batch.labels().iter().copied()).collect();
    (predictions, expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_mae() {
        let predictions = vec![TripMetrics::new(10.0, 5.0, 5.0), TripMetrics::new(20.0, 5.0, 0.0)];
        let labels = vec![TripMetrics::new(12.0, 5.0, 4.0), TripMetrics::new(16.0, 3.0, 0.0)];
        assert_eq!(compute_mae(&predictions, &labels), [3.0, 1.0, 0.5]);
        assert_eq!(compute_mae(&[], &[]), [0.0; 3]);
    }

    #[test]
    fn test_missing_data_dir_fails_in_initializing() {
        let factory = crate::regressor::default_factory;
        let mut runner = LofoRunner::new(Path::new("/nonexistent/lofo"), LofoOptions::default(), &factory);
        assert_eq!(runner.state(), LofoState::Initializing);
        assert!(runner.advance().is_err());
        assert_eq!(runner.state(), LofoState::Initializing);
    }
}
