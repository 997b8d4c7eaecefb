//! Held-out evaluation metrics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Model family reported alongside metrics
pub const MODEL_TYPE: &str = "Random Forest Regressor";

/// Summary of the most recent training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub r2_score: f64,
    pub model_type: String,
    pub training_samples: usize,
    pub feature_importance: BTreeMap<String, f64>,
}

impl ModelMetrics {
    /// Score `predicted` against `actual` and bundle the result
    pub fn evaluate(
        actual: &[f64],
        predicted: &[f64],
        training_samples: usize,
        feature_importance: BTreeMap<String, f64>,
    ) -> Self {
        let mse = mean_squared_error(actual, predicted);
        Self {
            mse,
            rmse: mse.sqrt(),
            r2_score: r2_score(actual, predicted),
            model_type: MODEL_TYPE.to_string(),
            training_samples,
            feature_importance,
        }
    }
}

/// Mean squared error; `0.0` for empty input
pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum();
    sum / n as f64
}

/// Coefficient of determination
///
/// When the targets have zero variance the score is `1.0` for a perfect fit
/// and `0.0` otherwise.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let mean = actual[..n].iter().sum::<f64>() / n as f64;
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum();
    let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean) * (a - mean)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}
