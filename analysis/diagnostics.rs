//! Regression diagnostics: influence statistics, correlation and variance
//! inflation.

use crate::design::{DesignLayout, Term};
use crate::linalg::{LinalgError, rank_checked_cholesky};
use crate::ols::OlsFit;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;

/// Per-observation influence statistics of a linear fit, in row order.
#[derive(Debug, Clone)]
pub struct InfluenceDiagnostics {
    pub standardized: Array1<f64>,
    /// Externally studentized residuals (leave-one-out scale).
    pub studentized: Array1<f64>,
    pub leverage: Array1<f64>,
    pub dffits: Array1<f64>,
    pub cooks_distance: Array1<f64>,
    /// Coefficients in the model, intercept included.
    pub n_coefficients: usize,
}

/// How many observations exceed each conventional threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OutlierCounts {
    pub standardized: usize,
    pub studentized: usize,
    pub leverage: usize,
    pub dffits: usize,
    pub cooks_distance: usize,
}

impl InfluenceDiagnostics {
    pub fn n_obs(&self) -> usize {
        self.leverage.len()
    }

    pub fn leverage_threshold(&self) -> f64 {
        2.0 * self.n_coefficients as f64 / self.n_obs() as f64
    }

    pub fn dffits_threshold(&self) -> f64 {
        2.0 * (self.n_coefficients as f64 / self.n_obs() as f64).sqrt()
    }

    pub fn counts(&self) -> OutlierCounts {
        let exceeding = |values: &Array1<f64>, limit: f64| {
            values.iter().filter(|v| v.abs() > limit).count()
        };
        OutlierCounts {
            standardized: exceeding(&self.standardized, 2.0),
            studentized: exceeding(&self.studentized, 2.0),
            leverage: exceeding(&self.leverage, self.leverage_threshold()),
            dffits: exceeding(&self.dffits, self.dffits_threshold()),
            cooks_distance: exceeding(&self.cooks_distance, 1.0),
        }
    }
}

/// Observations with `1 - h` below this are fitted exactly by their own
/// columns; their residual statistics are undefined and reported as zero.
pub const SATURATED_LEVERAGE: f64 = 1e-8;

/// Influence statistics for every training observation of `fit`.
pub fn influence(fit: &OlsFit) -> InfluenceDiagnostics {
    let n = fit.n_obs;
    let k = fit.n_coefficients();
    let sigma = fit.sigma2().sqrt();
    let loo_df = n as f64 - k as f64 - 1.0;

    let rows: Vec<(f64, f64, f64, f64)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let e = fit.residuals[i];
            let h = fit.leverage[i];
            if 1.0 - h < SATURATED_LEVERAGE {
                return (0.0, 0.0, 0.0, 0.0);
            }
            let standardized = e / (sigma * (1.0 - h).sqrt());
            let loo_variance = (fit.rss - e * e / (1.0 - h)) / loo_df;
            let studentized = e / (loo_variance.sqrt() * (1.0 - h).sqrt());
            let dffits = studentized * (h / (1.0 - h)).sqrt();
            let cooks = standardized * standardized * h / (k as f64 * (1.0 - h));
            (standardized, studentized, dffits, cooks)
        })
        .collect();

    InfluenceDiagnostics {
        standardized: rows.iter().map(|r| r.0).collect(),
        studentized: rows.iter().map(|r| r.1).collect(),
        leverage: fit.leverage.clone(),
        dffits: rows.iter().map(|r| r.2).collect(),
        cooks_distance: rows.iter().map(|r| r.3).collect(),
        n_coefficients: k,
    }
}

/// Pearson correlation; `None` when either input has zero variance.
pub fn pearson_correlation(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let n = a.len() as f64;
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    if saa > 0.0 && sbb > 0.0 {
        Some(sab / (saa * sbb).sqrt())
    } else {
        None
    }
}

/// Pairwise Pearson correlations of the columns; undefined entries are NaN.
pub fn correlation_matrix(columns: ArrayView2<f64>) -> Array2<f64> {
    let p = columns.ncols();
    Array2::from_shape_fn((p, p), |(i, j)| {
        pearson_correlation(columns.column(i), columns.column(j)).unwrap_or(f64::NAN)
    })
}

/// Variance inflation factor of every non-intercept column of `x` (column 0
/// is the intercept): `1 / (1 - R²_j)` from regressing column `j` on the rest,
/// read off the diagonal of the inverse correlation matrix.
pub fn variance_inflation(x: ArrayView2<f64>) -> Result<Array1<f64>, LinalgError> {
    let predictors = x.slice(ndarray::s![.., 1..]);
    let p = predictors.ncols();
    if p == 0 {
        return Ok(Array1::zeros(0));
    }
    let n = predictors.nrows() as f64;
    let means = predictors.sum_axis(Axis(0)) / n;
    let mut centered = &predictors - &means.view().insert_axis(Axis(0));
    for (j, mut col) in centered.axis_iter_mut(Axis(1)).enumerate() {
        let norm = col.dot(&col).sqrt();
        if !(norm > 0.0) {
            return Err(LinalgError::RankDeficient { column: j + 1 });
        }
        col /= norm;
    }
    let correlation = centered.t().dot(&centered);
    let inverse = rank_checked_cholesky(&correlation)
        .map_err(|err| match err {
            LinalgError::RankDeficient { column } => {
                LinalgError::RankDeficient { column: column + 1 }
            }
            other => other,
        })?
        .inverse();
    Ok(inverse.diag().to_owned())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermVif {
    pub term: Term,
    pub vif: f64,
}

/// Per-term VIF; a categorical term reports its largest indicator VIF. Terms
/// without columns are left out.
pub fn term_vif(layout: &DesignLayout, x: ArrayView2<f64>) -> Result<Vec<TermVif>, LinalgError> {
    let column_vif = variance_inflation(x)?;
    Ok(layout
        .terms()
        .iter()
        .filter_map(|&term| {
            layout
                .columns_of(term)
                .into_iter()
                .map(|j| column_vif[j - 1])
                .reduce(f64::max)
                .map(|vif| TermVif { term, vif })
        })
        .collect())
}
