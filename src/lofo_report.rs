/// LOFO RESULT SAVING AND CONSOLE SUMMARY
///
/// Output layout:
///   <out>/fold_results.csv
///   <out>/summary_report.md
///   <out>/models/fold_<family>_model.json
///   <out>/predictions/fold_<family>_predictions.json

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use log::info;
use serde::Serialize;

use crate::error::{Result, TrackError};
use crate::lofo::{FoldResult, LofoOutcome};
use crate::lofo_stats::{ErrorSummary, LofoStatistics};
use crate::track_types::TARGET_COUNT;

pub const FOLD_RESULTS_FILE: &str = "fold_results.csv";
pub const SUMMARY_REPORT_FILE: &str = "summary_report.md";
pub const MODELS_DIR: &str = "models";
pub const PREDICTIONS_DIR: &str = "predictions";

const METRIC_LABELS: [&str; TARGET_COUNT] = ["Distance MAE", "Elevation Pos MAE", "Elevation Neg MAE"];

const FOLD_HEADER: [&str; 11] = [
    "fold",
    "test_family",
    "train_families",
    "nn_mae_distance",
    "nn_mae_elevation_pos",
    "nn_mae_elevation_neg",
    "nn_mae_overall",
    "baseline_mae_distance",
    "baseline_mae_elevation_pos",
    "baseline_mae_elevation_neg",
    "baseline_mae_overall",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FoldPredictions<'a> {
    test_family: &'a str,
    train_families: &'a [String],
    predictions: BTreeMap<&'a str, [f64; TARGET_COUNT]>,
    actual_labels: BTreeMap<&'a str, [f64; TARGET_COUNT]>,
}

pub fn model_file(output_dir: &Path, family: &str) -> PathBuf {
    output_dir
        .join(MODELS_DIR)
        .join(format!("fold_{}_model.json", family))
}

pub fn predictions_file(output_dir: &Path, family: &str) -> PathBuf {
    output_dir
        .join(PREDICTIONS_DIR)
        .join(format!("fold_{}_predictions.json", family))
}

/// Writes every artifact of a finished run.
pub fn save_results(output_dir: &Path, outcome: &LofoOutcome) -> Result<()> {
    for dir in [
        output_dir.to_path_buf(),
        output_dir.join(MODELS_DIR),
        output_dir.join(PREDICTIONS_DIR),
    ] {
        fs::create_dir_all(&dir).map_err(|e| TrackError::io(&dir, e))?;
    }

    write_fold_results(&output_dir.join(FOLD_RESULTS_FILE), &outcome.folds)?;

    let report_path = output_dir.join(SUMMARY_REPORT_FILE);
    let report = render_summary_report(&outcome.folds, &outcome.statistics);
    fs::write(&report_path, report).map_err(|e| TrackError::io(&report_path, e))?;

    for fold in &outcome.folds {
        fold.model.save(&model_file(output_dir, &fold.test_family))?;
        write_predictions(&predictions_file(output_dir, &fold.test_family), fold)?;
    }

    info!("LOFO results saved to {}", output_dir.display());
    Ok(())
}

pub fn write_fold_results(path: &Path, folds: &[FoldResult]) -> Result<()> {
    let mut wtr = Writer::from_path(path).map_err(|e| TrackError::csv(path, e))?;
    wtr.write_record(FOLD_HEADER).map_err(|e| TrackError::csv(path, e))?;

    for fold in folds {
        let mut record = vec![
            fold.fold.to_string(),
            fold.test_family.clone(),
            fold.train_families.join("-"),
        ];
        record.extend(fold.model_mae.iter().map(|v| format!("{:.6}", v)));
        record.push(format!("{:.6}", fold.model_overall_mae));
        record.extend(fold.baseline_mae.iter().map(|v| format!("{:.6}", v)));
        record.push(format!("{:.6}", fold.baseline_overall_mae));
        wtr.write_record(&record).map_err(|e| TrackError::csv(path, e))?;
    }

    wtr.flush().map_err(|e| TrackError::io(path, e))
}

fn write_predictions(path: &Path, fold: &FoldResult) -> Result<()> {
    let data = FoldPredictions {
        test_family: &fold.test_family,
        train_families: &fold.train_families,
        predictions: fold
            .predictions
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_array()))
            .collect(),
        actual_labels: fold
            .expected
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_array()))
            .collect(),
    };
    let json = serde_json::to_string_pretty(&data).map_err(|e| TrackError::json(path, e))?;
    fs::write(path, json).map_err(|e| TrackError::io(path, e))
}

pub fn render_summary_report(folds: &[FoldResult], stats: &LofoStatistics) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# LOFO Cross-Validation Summary Report\n");
    let _ = writeln!(md, "Generated: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(md, "## Overview\n");
    let _ = writeln!(md, "- **Total Folds**: {}", stats.fold_count);
    let _ = writeln!(md, "- **Validation Method**: Leave-One-Family-Out");
    match stats.relative_improvement {
        Some(pct) => {
            let _ = writeln!(md, "- **Overall Improvement vs Baseline**: {:.1}%", pct);
        }
        None => {
            let _ = writeln!(md, "- **Overall Improvement vs Baseline**: n/a (baseline MAE is zero)");
        }
    }

    let _ = writeln!(md, "\n## Performance Summary\n");
    let _ = writeln!(md, "### Model Performance\n");
    render_error_table(&mut md, &stats.model);
    let _ = writeln!(md, "\n### Baseline Performance\n");
    render_error_table(&mut md, &stats.baseline);

    let _ = writeln!(md, "\n## Fold Details\n");
    for fold in folds {
        let _ = writeln!(md, "### Fold {}: {}\n", fold.fold, fold.test_family);
        let _ = writeln!(md, "- **Training Families**: {}", fold.train_families.join(", "));
        let _ = writeln!(
            md,
            "- **Model MAE**: [{:.3}, {:.3}, {:.3}] (overall: {:.3})",
            fold.model_mae[0], fold.model_mae[1], fold.model_mae[2], fold.model_overall_mae
        );
        let _ = writeln!(
            md,
            "- **Baseline MAE**: [{:.3}, {:.3}, {:.3}] (overall: {:.3})",
            fold.baseline_mae[0], fold.baseline_mae[1], fold.baseline_mae[2], fold.baseline_overall_mae
        );
        let _ = writeln!(
            md,
            "- **Training**: {} epochs, MAE {:.3} -> {:.3}{}\n",
            fold.training.epochs_run,
            fold.training.initial_mae,
            fold.training.final_mae,
            if fold.training.stopped_early { " (stopped early)" } else { "" }
        );
    }
    md
}

fn render_error_table(md: &mut String, summary: &ErrorSummary) {
    let _ = writeln!(md, "| Metric            | Mean ± Std           | Range                  |");
    let _ = writeln!(md, "|-------------------|----------------------|------------------------|");
    let rows = METRIC_LABELS
        .iter()
        .zip(summary.per_metric.iter())
        .chain(std::iter::once((&"Overall MAE", &summary.overall)));
    for (label, s) in rows {
        let _ = writeln!(
            md,
            "| {:<17} | {:.3} ± {:.3} | [{:.3}, {:.3}] |",
            label, s.mean, s.std, s.min, s.max
        );
    }
}

/// Console summary printed at the end of a LOFO run.
pub fn print_summary(stats: &LofoStatistics) {
    if stats.fold_count == 0 {
        println!("No fold results to report.");
        return;
    }

    println!("\n{}", "=".repeat(60));
    println!("LOFO CROSS-VALIDATION SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Total folds: {}\n", stats.fold_count);

    print_error_block("MODEL PERFORMANCE:", &stats.model);
    print_error_block("BASELINE PERFORMANCE:", &stats.baseline);

    match stats.relative_improvement {
        Some(pct) => println!("Overall improvement: {:.1}%", pct),
        None => println!("Overall improvement: n/a (baseline MAE is zero)"),
    }
    println!("{}", "=".repeat(60));
}

fn print_error_block(title: &str, summary: &ErrorSummary) {
    println!("{}", title);
    println!("{}", "-".repeat(40));
    let labels = ["Distance MAE:", "Elevation+ MAE:", "Elevation- MAE:"];
    for (label, s) in labels.iter().zip(summary.per_metric.iter()) {
        println!("{:<17} {:.3} ± {:.3}", label, s.mean, s.std);
    }
    println!("{:<17} {:.3} ± {:.3}\n", "Overall MAE:", summary.overall.mean, summary.overall.std);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lofo_stats::aggregate;
    use crate::regressor::{PooledLinearRegressor, TrainingSummary};
    use crate::track_types::TripMetrics;
    use tempfile::tempdir;

    fn fold(index: usize, family: &str, others: &[&str], model: f64, baseline: f64) -> FoldResult {
        let key = format!("{}/run_1", family);
        FoldResult {
            fold: index,
            test_family: family.to_string(),
            train_families: others.iter().map(|s| s.to_string()).collect(),
            model_mae: [model; 3],
            model_overall_mae: model,
            baseline_mae: [baseline; 3],
            baseline_overall_mae: baseline,
            training: TrainingSummary {
                epochs_run: 10,
                initial_mae: 50.0,
                final_mae: 5.0,
                stopped_early: false,
            },
            model: Box::new(PooledLinearRegressor::new()),
            predictions: BTreeMap::from([(key.clone(), TripMetrics::new(100.0, 10.0, 5.0))]),
            expected: BTreeMap::from([(key, TripMetrics::new(98.0, 12.0, 5.0))]),
        }
    }

    #[test]
    fn test_fold_results_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(FOLD_RESULTS_FILE);
        let folds = vec![fold(1, "alpha", &["beta", "gamma"], 1.5, 3.0)];
        write_fold_results(&path, &folds).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), FOLD_HEADER.join(","));
        let row: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(row[0], "1");
        assert_eq!(row[1], "alpha");
        assert_eq!(row[2], "beta-gamma");
        assert_eq!(row[6], "1.500000");
        assert_eq!(row[10], "3.000000");
    }

    #[test]
    fn test_summary_report_sections() {
        let folds = vec![
            fold(1, "alpha", &["beta"], 2.0, 4.0),
            fold(2, "beta", &["alpha"], 4.0, 4.0),
        ];
        let stats = aggregate(&folds);
        let report = render_summary_report(&folds, &stats);

        assert!(report.contains("- **Total Folds**: 2"));
        assert!(report.contains("### Fold 2: beta"));
        assert!(report.contains("| Overall MAE       | 3.000 ± 1.000 | [2.000, 4.000] |"));
        assert!(report.contains("Improvement vs Baseline**: 25.0%"));
    }

    #[test]
    fn test_prediction_json_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.json");
        write_predictions(&path, &fold(1, "alpha", &["beta"], 1.0, 2.0)).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["testFamily"], "alpha");
        assert_eq!(value["trainFamilies"][0], "beta");
        assert_eq!(value["predictions"]["alpha/run_1"][0], 100.0);
        assert_eq!(value["actualLabels"]["alpha/run_1"][1], 12.0);
    }

    #[test]
    fn test_save_results_layout() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("lofo");
        let folds = vec![fold(1, "alpha", &["beta"], 1.0, 2.0)];
        let statistics = aggregate(&folds);
        save_results(&out, &LofoOutcome { folds, statistics }).unwrap();

        assert!(out.join(FOLD_RESULTS_FILE).is_file());
        assert!(out.join(SUMMARY_REPORT_FILE).is_file());
        assert!(model_file(&out, "alpha").is_file());
        assert!(predictions_file(&out, "alpha").is_file());
    }
}
