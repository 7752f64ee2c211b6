//! Hold-out evaluation of the final price model.

use crate::features::DerivedSale;
use crate::ols::{OlsError, OlsFit};
use ndarray::ArrayView1;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluateError {
    #[error("The test partition is empty.")]
    EmptyTestSet,
    #[error(transparent)]
    Ols(#[from] OlsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HoldoutMetrics {
    pub rmse: f64,
    pub r_squared: f64,
    pub n_obs: usize,
}

/// RMSE and R² of `predicted` against `observed`. A constant `observed` gives
/// R² = 1 for a perfect prediction and negative infinity otherwise.
pub fn holdout_metrics(observed: ArrayView1<f64>, predicted: ArrayView1<f64>) -> HoldoutMetrics {
    let n = observed.len();
    let mean = observed.sum() / n as f64;
    let rss: f64 = observed
        .iter()
        .zip(predicted.iter())
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    let tss: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    let r_squared = if tss > 0.0 {
        1.0 - rss / tss
    } else if rss == 0.0 {
        1.0
    } else {
        f64::NEG_INFINITY
    };
    HoldoutMetrics {
        rmse: (rss / n as f64).sqrt(),
        r_squared,
        n_obs: n,
    }
}

/// Scores `fit` on the untouched test sales.
pub fn evaluate_holdout(fit: &OlsFit, test: &[DerivedSale]) -> Result<HoldoutMetrics, EvaluateError> {
    if test.is_empty() {
        return Err(EvaluateError::EmptyTestSet);
    }
    let predicted = fit.predict(test)?;
    let observed: ndarray::Array1<f64> = test.iter().map(|s| s.price).collect();
    let metrics = holdout_metrics(observed.view(), predicted.view());
    log::info!(
        "Hold-out: RMSE = {:.2}, R² = {:.4} on {} sales",
        metrics.rmse,
        metrics.r_squared,
        metrics.n_obs
    );
    Ok(metrics)
}
