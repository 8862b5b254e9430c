/// Trains one regressor on every family and writes the deployable pair
/// `model.json` + `mu_sigma.json` into the output directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::info;

use crate::config::TrainingConfig;
use crate::error::{Result, TrackError};
use crate::regressor::{RegressorFactory, TrainingSummary};
use crate::sequence_dataset::{load_scaler, SequenceDataset};
use crate::zscore_scaler::SCALER_FILE_NAME;

pub const MODEL_FILE_NAME: &str = "model.json";

#[derive(Debug, Clone)]
pub struct FinalTrainingOutcome {
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub track_count: usize,
    pub max_len: usize,
    pub training: TrainingSummary,
}

pub fn train_final_model(
    data_dir: &Path,
    output_dir: &Path,
    config: &TrainingConfig,
    factory: &RegressorFactory,
) -> Result<FinalTrainingOutcome> {
    let start = Instant::now();
    let scaler = load_scaler(data_dir)?;
    fs::create_dir_all(output_dir).map_err(|e| TrackError::io(output_dir, e))?;

    let dataset = SequenceDataset::load(data_dir, &scaler, None)?;
    let track_count = dataset.len();
    let batch = dataset.into_batch()?;
    info!(
        "final training on {} tracks, max sequence length {}",
        track_count,
        batch.max_len()
    );

    let mut model = factory();
    let training = model.fit(&batch, config)?;

    let model_path = output_dir.join(MODEL_FILE_NAME);
    model.save(&model_path)?;

    let source = data_dir.join(SCALER_FILE_NAME);
    let scaler_path = output_dir.join(SCALER_FILE_NAME);
    if source != scaler_path {
        fs::copy(&source, &scaler_path).map_err(|e| TrackError::io(&scaler_path, e))?;
    }

    info!(
        "{} model saved to {} in {:.1}s",
        model.name(),
        model_path.display(),
        start.elapsed().as_secs_f64()
    );

    Ok(FinalTrainingOutcome {
        model_path,
        scaler_path,
        track_count,
        max_len: batch.max_len(),
        training,
    })
}
