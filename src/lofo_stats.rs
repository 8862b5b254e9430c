/// Cross-fold statistics of the model and baseline errors.

use serde::Serialize;

use crate::lofo::FoldResult;
use crate::track_types::TARGET_COUNT;

/// Mean, population std, min and max of one error series.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    /// N = 0 gives all zeros; N = 1 gives std 0.
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Summary::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Summary {
            mean,
            std: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Per-metric summaries (distance, gain, loss) plus the overall error.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ErrorSummary {
    pub per_metric: [Summary; TARGET_COUNT],
    pub overall: Summary,
}

impl ErrorSummary {
    pub fn from_series(per_metric: &[[f64; TARGET_COUNT]], overall: &[f64]) -> Self {
        ErrorSummary {
            per_metric: std::array::from_fn(|k| {
                let column: Vec<f64> = per_metric.iter().map(|m| m[k]).collect();
                Summary::of(&column)
            }),
            overall: Summary::of(overall),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LofoStatistics {
    pub fold_count: usize,
    pub model: ErrorSummary,
    pub baseline: ErrorSummary,
    /// Percent reduction of the overall MAE against the baseline; `None`
    /// when the baseline mean is zero.
    pub relative_improvement: Option<f64>,
}

pub fn aggregate(folds: &[FoldResult]) -> LofoStatistics {
    let model_mae: Vec<[f64; TARGET_COUNT]> = folds.iter().map(|f| f.model_mae).collect();
    let model_overall: Vec<f64> = folds.iter().map(|f| f.model_overall_mae).collect();
    let baseline_mae: Vec<[f64; TARGET_COUNT]> = folds.iter().map(|f| f.baseline_mae).collect();
    let baseline_overall: Vec<f64> = folds.iter().map(|f| f.baseline_overall_mae).collect();

    let model = ErrorSummary::from_series(&model_mae, &model_overall);
    let baseline = ErrorSummary::from_series(&baseline_mae, &baseline_overall);

    LofoStatistics {
        fold_count: folds.len(),
        model,
        baseline,
        relative_improvement: relative_improvement(baseline.overall.mean, model.overall.mean),
    }
}

pub fn relative_improvement(baseline_mean: f64, model_mean: f64) -> Option<f64> {
    if baseline_mean == 0.0 {
        None
    } else {
        Some((baseline_mean - model_mean) / baseline_mean * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_matches_direct_formulas() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let s = Summary::of(&values);
        assert_eq!(s.mean, 5.0);
        assert_eq!(s.std, 2.0);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
    }

    #[test]
    fn test_summary_edge_cases() {
        assert_eq!(Summary::of(&[]), Summary::default());
        let single = Summary::of(&[3.5]);
        assert_eq!(single.mean, 3.5);
        assert_eq!(single.std, 0.0);
        assert_eq!(single.min, 3.5);
        assert_eq!(single.max, 3.5);
    }

    #[test]
    fn test_error_summary_columns() {
        let per_metric = [[1.0, 10.0, 100.0], [3.0, 30.0, 300.0]];
        let summary = ErrorSummary::from_series(&per_metric, &[37.0, 111.0]);
        assert_eq!(summary.per_metric[0].mean, 2.0);
        assert_eq!(summary.per_metric[1].std, 10.0);
        assert_eq!(summary.per_metric[2].max, 300.0);
        assert_eq!(summary.overall.mean, 74.0);
    }

    #[test]
    fn test_relative_improvement() {
        assert_eq!(relative_improvement(10.0, 7.5), Some(25.0));
        assert_eq!(relative_improvement(10.0, 12.0), Some(-20.0));
        assert_eq!(relative_improvement(0.0, 1.0), None);
    }

    #[test]
    fn test_aggregate_empty() {
        let stats = aggregate(&[]);
        assert_eq!(stats.fold_count, 0);
        assert_eq!(stats.model.overall, Summary::default());
        assert_eq!(stats.relative_improvement, None);
    }
}
