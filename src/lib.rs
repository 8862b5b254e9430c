pub mod altitude_filters;
pub mod arc_length_resampler;
pub mod baseline;
pub mod config;
pub mod dataset_io;
pub mod error;
pub mod feature_extractor;
pub mod final_training;
pub mod inference;
pub mod lofo;
pub mod lofo_report;
pub mod lofo_stats;
pub mod padding;
pub mod regressor;
pub mod sequence_dataset;
pub mod tolerant_gpx_reader;
pub mod track_preprocessor;
pub mod track_types;
pub mod utm_projection;
pub mod zscore_scaler;

pub use error::{Result, TrackError};
