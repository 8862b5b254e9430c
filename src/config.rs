use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::altitude_filters::FilterKind;
use crate::baseline::BaselineSource;
use crate::error::{Result, TrackError};

/// Full pipeline configuration. Every section falls back to its defaults, so
/// a config file only needs the values it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocess: PreprocessConfig,
    pub training: TrainingConfig,
    pub lofo: LofoConfig,
    pub inference: InferenceConfig,
    /// Worker threads for rayon pools; `None` uses every core.
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub step_meters: f64,
    pub filter: FilterKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Training stops early once the training MAE (in label units) drops to
    /// this value. Zero disables early stopping.
    pub early_stop_mae: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LofoConfig {
    pub output_dir: PathBuf,
    pub parallel_folds: bool,
    pub baseline_source: BaselineSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Fixed padded width; `None` pads to the track's own length.
    pub max_len: Option<usize>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        PreprocessConfig {
            step_meters: 1.0,
            filter: FilterKind::None,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 500,
            learning_rate: 0.01,
            early_stop_mae: 0.0,
        }
    }
}

impl Default for LofoConfig {
    fn default() -> Self {
        LofoConfig {
            output_dir: PathBuf::from("lofo_results"),
            parallel_folds: false,
            baseline_source: BaselineSource::Raw,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| TrackError::io(path, e))?;
        let config: PipelineConfig =
            serde_json::from_str(&data).map_err(|e| TrackError::json(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.preprocess.validate()?;
        self.training.validate()?;
        if self.workers == Some(0) {
            return Err(TrackError::config("workers must be at least 1"));
        }
        if self.inference.max_len == Some(0) {
            return Err(TrackError::config("inference max_len must be positive"));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.step_meters.is_finite() && self.step_meters > 0.0) {
            return Err(TrackError::validation(format!(
                "step size must be positive, got {}",
                self.step_meters
            )));
        }
        self.filter.validate()
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(TrackError::config("epochs must be at least 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrackError::config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.early_stop_mae >= 0.0) {
            return Err(TrackError::config("early_stop_mae must be non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.preprocess.step_meters, 1.0);
        assert_eq!(config.preprocess.filter, FilterKind::None);
        assert_eq!(config.training.epochs, 500);
        assert_eq!(config.lofo.baseline_source, BaselineSource::Raw);
        assert!(config.validate().is_ok());
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "preprocess": { "filter": { "kind": "median", "window": 5 } },
                "training": { "epochs": 20 },
                "workers": 2
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.preprocess.filter, FilterKind::Median { window: 5 });
        assert_eq!(config.preprocess.step_meters, 1.0);
        assert_eq!(config.training.epochs, 20);
        assert_eq!(config.training.learning_rate, 0.01);
        assert_eq!(config.worker_count(), 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PipelineConfig::default();
        config.preprocess.step_meters = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.preprocess.filter = FilterKind::Median { window: 4 };
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.workers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = PipelineConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_io());
        assert_eq!(PipelineConfig::load_or_default(None).unwrap(), PipelineConfig::default());
    }
}
