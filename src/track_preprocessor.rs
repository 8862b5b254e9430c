/// TRACK PREPROCESSING SERVICE
///
/// Input layout: one subdirectory per family holding exactly one
/// `*_pattern.gpx` (the clean reference route) and at least one noisy GPX
/// recording of the same route.
///
/// Every track goes through
///   read GPX -> UTM projection -> altitude filter -> 3D resampling -> features
/// and lands under the output root in the layout `dataset_io` documents.
/// Family labels come from the pattern track; the global scaler is fit on
/// the noisy tracks of every family together.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use csv::Writer;
use log::{debug, info};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::altitude_filters::apply_to_altitude;
use crate::arc_length_resampler::resample_by_arc_length_3d;
use crate::config::PreprocessConfig;
use crate::dataset_io::{
    base_name, feature_file, label_file, length_file, list_subdirectories, write_features,
    write_labels, write_length, FEATURES_DIR, LABELS_DIR, LENGTHS_DIR,
};
use crate::error::{Result, TrackError};
use crate::feature_extractor::{compute_features, trip_metrics};
use crate::tolerant_gpx_reader::read_track_points;
use crate::track_types::{SegmentFeature, TripMetrics};
use crate::utm_projection::{haversine_length, project_track};
use crate::zscore_scaler::{ZScoreScaler, SCALER_FILE_NAME};

pub const PATTERN_SUFFIX: &str = "_pattern";
pub const TRACK_SUMMARY_FILE: &str = "track_summary.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackRole {
    Pattern,
    Noisy,
}

impl TrackRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackRole::Pattern => "pattern",
            TrackRole::Noisy => "noisy",
        }
    }
}

/// Result of running one GPX file through the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedTrack {
    pub name: String,
    pub raw_points: usize,
    /// Haversine length of the raw points, meters.
    pub raw_length_m: f64,
    pub resampled_points: usize,
    pub features: Vec<SegmentFeature>,
}

#[derive(Debug, Clone)]
pub struct FamilySummary {
    pub family: String,
    pub labels: TripMetrics,
    pub pattern: ProcessedTrack,
    pub noisy: Vec<ProcessedTrack>,
}

impl FamilySummary {
    pub fn track_count(&self) -> usize {
        self.noisy.len() + 1
    }

    pub fn noisy_features(&self) -> impl Iterator<Item = &SegmentFeature> {
        self.noisy.iter().flat_map(|t| t.features.iter())
    }
}

#[derive(Debug, Clone)]
pub struct PreprocessReport {
    pub families: Vec<FamilySummary>,
    pub scaler: ZScoreScaler,
    pub noisy_feature_count: usize,
}

/// Runs one GPX file through projection, filtering, resampling and feature
/// extraction. Tracks with fewer than two points are rejected.
pub fn process_gpx(path: &Path, config: &PreprocessConfig) -> Result<ProcessedTrack> {
    let points = read_track_points(path)?;
    if points.len() < 2 {
        return Err(TrackError::validation(format!(
            "track has fewer than 2 points: {}",
            path.display()
        )));
    }

    let (zone, planar) = project_track(&points)?;
    let filtered = apply_to_altitude(&planar, &config.filter)?;
    let resampled = resample_by_arc_length_3d(&filtered, config.step_meters)?;
    let features = compute_features(&resampled)?;

    debug!(
        "{}: {} points in {} (EPSG:{}), {} resampled, {} features",
        path.display(),
        points.len(),
        zone,
        zone.epsg_code(),
        resampled.len(),
        features.len()
    );

    Ok(ProcessedTrack {
        name: base_name(path),
        raw_points: points.len(),
        raw_length_m: haversine_length(&points),
        resampled_points: resampled.len(),
        features,
    })
}

pub struct TrackPreprocessor {
    input_dir: PathBuf,
    output_dir: PathBuf,
    config: PreprocessConfig,
    workers: usize,
}

impl TrackPreprocessor {
    pub fn new(input_dir: &Path, output_dir: &Path, config: PreprocessConfig, workers: usize) -> Self {
        TrackPreprocessor {
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            config,
            workers: workers.max(1),
        }
    }

    pub fn run(&self) -> Result<PreprocessReport> {
        self.config.validate()?;
        if !self.input_dir.is_dir() {
            return Err(TrackError::config(format!(
                "input directory does not exist or is not a directory: {}",
                self.input_dir.display()
            )));
        }

        for dir in [FEATURES_DIR, LABELS_DIR, LENGTHS_DIR] {
            let path = self.output_dir.join(dir);
            fs::create_dir_all(&path).map_err(|e| TrackError::io(&path, e))?;
        }

        let family_names = list_subdirectories(&self.input_dir)?;
        if family_names.is_empty() {
            return Err(TrackError::config(format!(
                "no family directories found in {}",
                self.input_dir.display()
            )));
        }
        info!(
            "preprocessing {} families (step {} m, filter {})",
            family_names.len(),
            self.config.step_meters,
            self.config.filter.label()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| TrackError::config(format!("cannot build worker pool: {}", e)))?;

        let mut families = Vec::with_capacity(family_names.len());
        for family in &family_names {
            let summary = pool
                .install(|| self.process_family(family))
                .map_err(|e| TrackError::Family {
                    family: family.clone(),
                    source: Box::new(e),
                })?;
            info!(
                "family {}: {} tracks, pattern has {} steps",
                family,
                summary.track_count(),
                summary.pattern.features.len()
            );
            families.push(summary);
        }

        let noisy: Vec<SegmentFeature> = families
            .iter()
            .flat_map(|f| f.noisy_features().copied())
            .collect();
        let scaler = ZScoreScaler::fit(&noisy)?;
        scaler.save(&self.output_dir.join(SCALER_FILE_NAME))?;
        info!("global scaler fit on {} noisy features", noisy.len());

        write_track_summary(&self.output_dir.join(TRACK_SUMMARY_FILE), &families)?;

        Ok(PreprocessReport {
            families,
            scaler,
            noisy_feature_count: noisy.len(),
        })
    }

    fn process_family(&self, family: &str) -> Result<FamilySummary> {
        let (pattern_path, noisy_paths) = split_family_tracks(&self.input_dir.join(family))?;

        let pattern = process_gpx(&pattern_path, &self.config)?;
        let labels = trip_metrics(&pattern.features);

        for dir in [FEATURES_DIR, LENGTHS_DIR] {
            let path = self.output_dir.join(dir).join(family);
            fs::create_dir_all(&path).map_err(|e| TrackError::io(&path, e))?;
        }
        write_labels(&label_file(&self.output_dir, family), &labels)?;
        self.save_track(family, &pattern)?;

        let completed = AtomicUsize::new(0);
        let total = noisy_paths.len();
        let start = Instant::now();

        let noisy = noisy_paths
            .par_iter()
            .map(|path| {
                let track = process_gpx(path, &self.config)?;
                self.save_track(family, &track)?;
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "{}: {}/{} noisy tracks ({:.1}s)",
                    family,
                    done,
                    total,
                    start.elapsed().as_secs_f64()
                );
                Ok(track)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FamilySummary {
            family: family.to_string(),
            labels,
            pattern,
            noisy,
        })
    }

    fn save_track(&self, family: &str, track: &ProcessedTrack) -> Result<()> {
        write_features(&feature_file(&self.output_dir, family, &track.name), &track.features)?;
        write_length(&length_file(&self.output_dir, family, &track.name), track.features.len())
    }
}

/// Splits a family directory into its pattern track and its noisy tracks.
pub fn split_family_tracks(family_dir: &Path) -> Result<(PathBuf, Vec<PathBuf>)> {
    let mut gpx_files = Vec::new();
    for entry in WalkDir::new(family_dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let is_gpx = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("gpx"))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_gpx {
            gpx_files.push(entry.path().to_path_buf());
        }
    }
    gpx_files.sort();

    let (patterns, noisy): (Vec<PathBuf>, Vec<PathBuf>) = gpx_files
        .into_iter()
        .partition(|p| base_name(p).ends_with(PATTERN_SUFFIX));

    let pattern = match patterns.as_slice() {
        [single] => single.clone(),
        [] => {
            return Err(TrackError::config(format!(
                "no pattern file (*{}.gpx) found in {}",
                PATTERN_SUFFIX,
                family_dir.display()
            )))
        }
        _ => {
            return Err(TrackError::config(format!(
                "{} pattern files found in {}, expected exactly one",
                patterns.len(),
                family_dir.display()
            )))
        }
    };

    if noisy.is_empty() {
        return Err(TrackError::config(format!(
            "no noisy tracks found in {}",
            family_dir.display()
        )));
    }
    Ok((pattern, noisy))
}

pub fn write_track_summary(path: &Path, families: &[FamilySummary]) -> Result<()> {
    let mut wtr = Writer::from_path(path).map_err(|e| TrackError::csv(path, e))?;
    wtr.write_record([
        "family",
        "track",
        "role",
        "raw_points",
        "raw_length_m",
        "resampled_points",
        "features",
    ])
    .map_err(|e| TrackError::csv(path, e))?;

    for family in families {
        let tracks = std::iter::once((TrackRole::Pattern, &family.pattern))
            .chain(family.noisy.iter().map(|t| (TrackRole::Noisy, t)));
        for (role, track) in tracks {
            wtr.write_record(&[
                family.family.clone(),
                track.name.clone(),
                role.as_str().to_string(),
                track.raw_points.to_string(),
                format!("{:.1}", track.raw_length_m),
                track.resampled_points.to_string(),
                track.features.len().to_string(),
            ])
            .map_err(|e| TrackError::csv(path, e))?;
        }
    }

    wtr.flush().map_err(|e| TrackError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::altitude_filters::FilterKind;
    use crate::dataset_io::{read_features, read_labels, read_length};
    use tempfile::tempdir;

    /// Straight northward track with a climb then a descent.
    fn gpx_track(points: &[(f64, f64, f64)]) -> String {
        let mut body = String::new();
        for (lat, lon, ele) in points {
            body.push_str(&format!(
                "<trkpt lat=\"{}\" lon=\"{}\"><ele>{}</ele></trkpt>\n",
                lat, lon, ele
            ));
        }
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <gpx version=\"1.1\" creator=\"test\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n\
             <trk><name>t</name><trkseg>\n{}</trkseg></trk>\n</gpx>\n",
            body
        )
    }

    fn route(offset: f64) -> Vec<(f64, f64, f64)> {
        (0..=20)
            .map(|i| {
                let ele = if i <= 10 { i as f64 } else { (20 - i) as f64 };
                (43.0 + i as f64 * 0.0001, -5.8 + offset, ele + offset * 1000.0)
            })
            .collect()
    }

    fn write_family(root: &Path, family: &str, noisy: usize) {
        let dir = root.join(family);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}_pattern.gpx", family)), gpx_track(&route(0.0))).unwrap();
        for i in 0..noisy {
            let offset = 0.00001 * (i + 1) as f64;
            fs::write(dir.join(format!("run_{}.gpx", i + 1)), gpx_track(&route(offset))).unwrap();
        }
    }

    fn config() -> PreprocessConfig {
        PreprocessConfig {
            step_meters: 5.0,
            filter: FilterKind::None,
        }
    }

    #[test]
    fn test_split_family_tracks() {
        let dir = tempdir().unwrap();
        write_family(dir.path(), "alpha", 2);
        fs::write(dir.path().join("alpha").join("notes.txt"), "x").unwrap();

        let (pattern, noisy) = split_family_tracks(&dir.path().join("alpha")).unwrap();
        assert_eq!(base_name(&pattern), "alpha_pattern");
        assert_eq!(noisy.len(), 2);
        assert_eq!(base_name(&noisy[0]), "run_1");
    }

    #[test]
    fn test_missing_or_duplicate_pattern_rejected() {
        let dir = tempdir().unwrap();
        let family = dir.path().join("beta");
        fs::create_dir_all(&family).unwrap();
        fs::write(family.join("run_1.gpx"), gpx_track(&route(0.0))).unwrap();
        assert!(matches!(split_family_tracks(&family), Err(TrackError::Config(_))));

        fs::write(family.join("a_pattern.gpx"), gpx_track(&route(0.0))).unwrap();
        fs::write(family.join("b_pattern.gpx"), gpx_track(&route(0.0))).unwrap();
        assert!(matches!(split_family_tracks(&family), Err(TrackError::Config(_))));
    }

    #[test]
    fn test_pattern_without_noisy_rejected() {
        let dir = tempdir().unwrap();
        write_family(dir.path(), "gamma", 0);
        assert!(matches!(
            split_family_tracks(&dir.path().join("gamma")),
            Err(TrackError::Config(_))
        ));
    }

    #[test]
    fn test_process_gpx_features() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.gpx");
        fs::write(&path, gpx_track(&route(0.0))).unwrap();

        let track = process_gpx(&path, &config()).unwrap();
        assert_eq!(track.name, "t");
        assert_eq!(track.raw_points, 21);
        assert_eq!(track.features.len(), track.resampled_points - 1);
        // ~222 m north, 10 m up and 10 m down
        assert!((track.raw_length_m - 222.4).abs() < 1.0);
        let labels = trip_metrics(&track.features);
        assert!(labels.elevation_gain > 8.0 && labels.elevation_gain <= 10.0);
        assert!(labels.elevation_loss > 8.0 && labels.elevation_loss <= 10.0);
    }

    #[test]
    fn test_single_point_track_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.gpx");
        fs::write(&path, gpx_track(&[(43.0, -5.8, 100.0)])).unwrap();
        assert!(matches!(process_gpx(&path, &config()), Err(TrackError::Validation(_))));
    }

    #[test]
    fn test_run_writes_dataset_layout() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_family(input.path(), "alpha", 2);
        write_family(input.path(), "beta", 1);

        let report = TrackPreprocessor::new(input.path(), output.path(), config(), 2)
            .run()
            .unwrap();
        assert_eq!(report.families.len(), 2);
        assert_eq!(report.families[0].family, "alpha");

        let out = output.path();
        assert!(out.join(SCALER_FILE_NAME).is_file());
        assert!(out.join(TRACK_SUMMARY_FILE).is_file());

        let labels = read_labels(&label_file(out, "alpha")).unwrap();
        assert!((labels.distance - report.families[0].labels.distance).abs() < 1e-5);

        let pattern_features = read_features(&feature_file(out, "alpha", "alpha_pattern")).unwrap();
        let length = read_length(&length_file(out, "alpha", "alpha_pattern")).unwrap();
        assert_eq!(pattern_features.len(), length);
        assert!(feature_file(out, "beta", "run_1").is_file());

        let noisy_total: usize = report
            .families
            .iter()
            .flat_map(|f| f.noisy.iter())
            .map(|t| t.features.len())
            .sum();
        assert_eq!(report.noisy_feature_count, noisy_total);

        let summary = fs::read_to_string(out.join(TRACK_SUMMARY_FILE)).unwrap();
        assert_eq!(summary.lines().count(), 1 + 3 + 2);
    }

    #[test]
    fn test_failing_family_named_in_error() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_family(input.path(), "alpha", 1);
        fs::create_dir_all(input.path().join("broken")).unwrap();

        let err = TrackPreprocessor::new(input.path(), output.path(), config(), 1)
            .run()
            .unwrap_err();
        match err {
            TrackError::Family { family, .. } => assert_eq!(family, "broken"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
