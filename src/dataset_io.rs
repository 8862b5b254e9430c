/// Readers and writers for the preprocessed dataset layout:
///
/// ```text
/// <root>/mu_sigma.json
/// <root>/features/<family>/<track>.csv   dh,dz,slope
/// <root>/labels/<family>.csv             dist_total,desn_pos,desn_neg
/// <root>/lengths/<family>/<track>.txt    feature count
/// ```

use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Writer};

use crate::error::{Result, TrackError};
use crate::track_types::{SegmentFeature, TripMetrics, FEATURE_COUNT, TARGET_COUNT};

pub const FEATURES_DIR: &str = "features";
pub const LABELS_DIR: &str = "labels";
pub const LENGTHS_DIR: &str = "lengths";

const FEATURE_HEADER: [&str; FEATURE_COUNT] = ["dh", "dz", "slope"];
const LABEL_HEADER: [&str; TARGET_COUNT] = ["dist_total", "desn_pos", "desn_neg"];

pub fn feature_file(root: &Path, family: &str, track: &str) -> PathBuf {
    root.join(FEATURES_DIR).join(family).join(format!("{}.csv", track))
}

pub fn label_file(root: &Path, family: &str) -> PathBuf {
    root.join(LABELS_DIR).join(format!("{}.csv", family))
}

pub fn length_file(root: &Path, family: &str, track: &str) -> PathBuf {
    root.join(LENGTHS_DIR).join(family).join(format!("{}.txt", track))
}

pub fn write_features(path: &Path, features: &[SegmentFeature]) -> Result<()> {
    let mut wtr = Writer::from_path(path).map_err(|e| TrackError::csv(path, e))?;
    wtr.write_record(FEATURE_HEADER).map_err(|e| TrackError::csv(path, e))?;

    for f in features {
        wtr.write_record(&[
            format!("{:.6}", f.dh),
            format!("{:.6}", f.dz),
            format!("{:.6}", f.slope),
        ])
        .map_err(|e| TrackError::csv(path, e))?;
    }

    wtr.flush().map_err(|e| TrackError::io(path, e))
}

/// Every data row must hold exactly three numeric columns.
pub fn read_features(path: &Path) -> Result<Vec<SegmentFeature>> {
    read_numeric_rows(path)?
        .into_iter()
        .map(|(line, values)| {
            let row: [f64; FEATURE_COUNT] = values.try_into().map_err(|v: Vec<f64>| {
                TrackError::config(format!(
                    "expected {} feature values, got {} at line {} of {}",
                    FEATURE_COUNT,
                    v.len(),
                    line,
                    path.display()
                ))
            })?;
            Ok(SegmentFeature::from_array(row))
        })
        .collect()
}

pub fn write_labels(path: &Path, labels: &TripMetrics) -> Result<()> {
    let mut wtr = Writer::from_path(path).map_err(|e| TrackError::csv(path, e))?;
    wtr.write_record(LABEL_HEADER).map_err(|e| TrackError::csv(path, e))?;
    wtr.write_record(labels.to_array().iter().map(|v| format!("{:.6}", v)))
        .map_err(|e| TrackError::csv(path, e))?;
    wtr.flush().map_err(|e| TrackError::io(path, e))
}

/// Header plus at least one data row; the first data row holds the triple.
pub fn read_labels(path: &Path) -> Result<TripMetrics> {
    let rows = read_numeric_rows(path)?;
    let (line, values) = rows.into_iter().next().ok_or_else(|| {
        TrackError::config(format!("invalid labels file format: {}", path.display()))
    })?;

    let triple: [f64; TARGET_COUNT] = values.try_into().map_err(|v: Vec<f64>| {
        TrackError::config(format!(
            "expected {} label values, got {} at line {} of {}",
            TARGET_COUNT,
            v.len(),
            line,
            path.display()
        ))
    })?;
    Ok(TripMetrics::from_array(triple))
}

pub fn write_length(path: &Path, length: usize) -> Result<()> {
    fs::write(path, format!("{}\n", length)).map_err(|e| TrackError::io(path, e))
}

#[cfg(test)]
pub fn read_length(path: &Path) -> Result<usize> {
    let content = fs::read_to_string(path).map_err(|e| TrackError::io(path, e))?;
    content.trim().parse::<usize>().map_err(|_| {
        TrackError::config(format!(
            "invalid length '{}' in {}",
            content.trim(),
            path.display()
        ))
    })
}

/// Sorted names of the subdirectories of `dir`.
pub fn list_subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| TrackError::io(dir, e))? {
        let entry = entry.map_err(|e| TrackError::io(dir, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Sorted files of `dir` with the given extension (case-insensitive).
pub fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| TrackError::io(dir, e))? {
        let path = entry.map_err(|e| TrackError::io(dir, e))?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// File name without its last extension.
pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Data rows (header skipped) as `(line number, values)`; any
/// non-numeric cell is a configuration error naming file and line.
fn read_numeric_rows(path: &Path) -> Result<Vec<(u64, Vec<f64>)>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| TrackError::csv(path, e))?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| TrackError::csv(path, e))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let values = record
            .iter()
            .map(|cell| {
                cell.parse::<f64>().map_err(|_| {
                    TrackError::config(format!(
                        "non-numeric value '{}' at line {} of {}",
                        cell,
                        line,
                        path.display()
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push((line, values));
    }
    Ok(rows)
}
