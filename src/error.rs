/// PIPELINE ERRORS
///
/// Error type shared by every stage of the pipeline.
///
/// Configuration and validation problems are domain errors; I/O, CSV, JSON and
/// GPX failures keep the offending path so a failed run says which file broke.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    /// Missing pattern track, missing directory, empty family set, malformed rows.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad arguments at a call site (step size, window width, lengths).
    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not read GPX {}: {message}", path.display())]
    Gpx { path: PathBuf, message: String },

    #[error("projection failed: {0}")]
    Projection(String),

    /// Wraps whatever stopped the preprocessing of one family.
    #[error("family {family} failed: {source}")]
    Family {
        family: String,
        #[source]
        source: Box<TrackError>,
    },

    /// Wraps whatever stopped a LOFO fold so the caller sees which one failed.
    #[error("fold {fold} (family {family}) failed: {source}")]
    Fold {
        fold: usize,
        family: String,
        #[source]
        source: Box<TrackError>,
    },
}

pub type Result<T> = std::result::Result<T, TrackError>;

impl TrackError {
    pub fn config(message: impl Into<String>) -> Self {
        TrackError::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        TrackError::Validation(message.into())
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        TrackError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn csv(path: impl AsRef<Path>, source: csv::Error) -> Self {
        TrackError::Csv {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn json(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        TrackError::Json {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// True for failures of the file system rather than of the data.
    pub fn is_io(&self) -> bool {
        match self {
            TrackError::Io { .. } => true,
            TrackError::Fold { source, .. } | TrackError::Family { source, .. } => source.is_io(),
            _ => false,
        }
    }
}

impl From<walkdir::Error> for TrackError {
    fn from(err: walkdir::Error) -> Self {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "directory walk loop"));
        TrackError::Io { path, source }
    }
}
