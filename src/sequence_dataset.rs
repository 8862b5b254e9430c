/// SEQUENCE DATASET LOADER
///
/// Loads the preprocessed feature and label files of a set of families,
/// normalizes every feature row with the global scaler and assembles one
/// padded, masked batch. The padded width is the longest track of the call.

use std::path::Path;

use log::{debug, info};

use crate::dataset_io::{
    base_name, label_file, list_files_with_extension, list_subdirectories, read_features,
    read_labels, FEATURES_DIR, LABELS_DIR,
};
use crate::error::{Result, TrackError};
use crate::padding::{make_mask, pad_features};
use crate::track_types::{SegmentFeature, TripMetrics, FEATURE_COUNT};
use crate::zscore_scaler::{ZScoreScaler, SCALER_FILE_NAME};

/// One track as loaded from disk, before padding.
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    /// `family/track`
    pub name: String,
    pub family: String,
    pub features: Vec<SegmentFeature>,
    /// Same rows before normalization.
    pub raw_features: Vec<SegmentFeature>,
    pub labels: TripMetrics,
}

/// Padded, masked tensors plus index-aligned track metadata.
///
/// Features are stored flat as `[batch][FEATURE_COUNT][max_len]` and the mask
/// as `[batch][max_len]`, the layout sequence models expect.
#[derive(Debug, Clone)]
pub struct PaddedBatch {
    max_len: usize,
    features: Vec<f64>,
    mask: Vec<f64>,
    labels: Vec<TripMetrics>,
    lengths: Vec<usize>,
    raw_features: Vec<Vec<SegmentFeature>>,
    track_names: Vec<String>,
    family_names: Vec<String>,
}

impl PaddedBatch {
    /// Pads every track to the longest one among them.
    pub fn from_tracks(tracks: Vec<LoadedTrack>) -> Result<Self> {
        let longest = tracks.iter().map(|t| t.features.len()).max().unwrap_or(0);
        Self::with_width(tracks, longest.max(1))
    }

    /// Pads every track to `max_len`; a longer track is a validation error.
    pub fn with_width(tracks: Vec<LoadedTrack>, max_len: usize) -> Result<Self> {
        if tracks.is_empty() {
            return Err(TrackError::config("no tracks loaded"));
        }

        let batch_size = tracks.len();
        let mut batch = PaddedBatch {
            max_len,
            features: vec![0.0; batch_size * FEATURE_COUNT * max_len],
            mask: Vec::with_capacity(batch_size * max_len),
            labels: Vec::with_capacity(batch_size),
            lengths: Vec::with_capacity(batch_size),
            raw_features: Vec::with_capacity(batch_size),
            track_names: Vec::with_capacity(batch_size),
            family_names: Vec::with_capacity(batch_size),
        };

        for (i, track) in tracks.into_iter().enumerate() {
            let padded = pad_features(&track.features, max_len)?;
            let mask = make_mask(track.features.len() as i64, max_len as i64)?;

            for (t, row) in padded.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    batch.features[(i * FEATURE_COUNT + c) * max_len + t] = *value;
                }
            }
            batch.mask.extend(mask);
            batch.labels.push(track.labels);
            batch.lengths.push(track.features.len());
            batch.raw_features.push(track.raw_features);
            batch.track_names.push(track.name);
            batch.family_names.push(track.family);
        }

        Ok(batch)
    }

    pub fn batch_size(&self) -> usize {
        self.labels.len()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn feature(&self, track: usize, channel: usize, step: usize) -> f64 {
        self.features[(track * FEATURE_COUNT + channel) * self.max_len + step]
    }

    /// One padded channel of one track.
    pub fn channel(&self, track: usize, channel: usize) -> &[f64] {
        let start = (track * FEATURE_COUNT + channel) * self.max_len;
        &self.features[start..start + self.max_len]
    }

    pub fn mask_row(&self, track: usize) -> &[f64] {
        &self.mask[track * self.max_len..(track + 1) * self.max_len]
    }

    pub fn length(&self, track: usize) -> usize {
        self.lengths[track]
    }

    pub fn labels(&self) -> &[TripMetrics] {
        &self.labels
    }

    pub fn raw_features(&self, track: usize) -> &[SegmentFeature] {
        &self.raw_features[track]
    }

    /// Rebuilds the (normalized) sequence of a track from the tensor, keeping
    /// only the positions the mask marks as real.
    pub fn unpadded_features(&self, track: usize) -> Vec<SegmentFeature> {
        self.mask_row(track)
            .iter()
            .enumerate()
            .filter(|(_, m)| **m > 0.0)
            .map(|(t, _)| {
                SegmentFeature::new(
                    self.feature(track, 0, t),
                    self.feature(track, 1, t),
                    self.feature(track, 2, t),
                )
            })
            .collect()
    }

    pub fn track_names(&self) -> &[String] {
        &self.track_names
    }

    pub fn family_names(&self) -> &[String] {
        &self.family_names
    }
}

/// Tracks of the retained families, in family then file-name order.
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    tracks: Vec<LoadedTrack>,
}

impl SequenceDataset {
    /// `inclusion == None` keeps every family under `<root>/features`;
    /// otherwise only the families present both on disk and in the list.
    pub fn load(root: &Path, scaler: &ZScoreScaler, inclusion: Option<&[String]>) -> Result<Self> {
        let features_dir = root.join(FEATURES_DIR);
        require_dir(&features_dir)?;
        require_dir(&root.join(LABELS_DIR))?;

        let families: Vec<String> = discover_families(root)?
            .into_iter()
            .filter(|f| inclusion.map_or(true, |keep| keep.contains(f)))
            .collect();
        if families.is_empty() {
            return Err(TrackError::config(format!(
                "no families to process in {}",
                root.display()
            )));
        }

        let mut tracks = Vec::new();
        for family in &families {
            let labels = read_labels(&label_file(root, family))?;

            for csv_path in list_files_with_extension(&features_dir.join(family), "csv")? {
                let raw_features = read_features(&csv_path)?;
                let features = scaler.transform_all(&raw_features);
                debug!(
                    "loaded {}/{} with {} segments",
                    family,
                    base_name(&csv_path),
                    features.len()
                );
                tracks.push(LoadedTrack {
                    name: format!("{}/{}", family, base_name(&csv_path)),
                    family: family.clone(),
                    features,
                    raw_features,
                    labels,
                });
            }
        }

        if tracks.is_empty() {
            return Err(TrackError::config(format!(
                "no tracks loaded for families {:?}",
                families
            )));
        }

        info!("loaded {} tracks from {} families", tracks.len(), families.len());
        Ok(SequenceDataset { tracks })
    }

    pub(crate) fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn into_batch(self) -> Result<PaddedBatch> {
        PaddedBatch::from_tracks(self.tracks)
    }
}

/// Loads, normalizes and pads in one call.
pub fn load_batch(root: &Path, scaler: &ZScoreScaler, inclusion: Option<&[String]>) -> Result<PaddedBatch> {
    SequenceDataset::load(root, scaler, inclusion)?.into_batch()
}

/// Sorted family names found under `<root>/features`.
pub fn discover_families(root: &Path) -> Result<Vec<String>> {
    let features_dir = root.join(FEATURES_DIR);
    require_dir(&features_dir)?;
    list_subdirectories(&features_dir)
}

/// Reads `<root>/mu_sigma.json`.
pub fn load_scaler(root: &Path) -> Result<ZScoreScaler> {
    let path = root.join(SCALER_FILE_NAME);
    if !path.is_file() {
        return Err(TrackError::config(format!(
            "missing scaler file {}",
            path.display()
        )));
    }
    ZScoreScaler::load(&path)
}

fn require_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(TrackError::config(format!(
            "missing required directory {}",
            dir.display()
        )))
    }
}
