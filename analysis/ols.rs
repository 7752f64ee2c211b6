//! Ordinary least squares with the usual inference tables.

use crate::design::{DesignError, DesignLayout, Term};
use crate::features::DerivedSale;
use crate::linalg::{LinalgError, weighted_least_squares};
use ndarray::{Array1, Array2};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OlsError {
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error("Least-squares solve failed: {0}")]
    Linalg(#[from] LinalgError),
    #[error("{n} observations cannot support a model with {k} coefficients.")]
    TooFewObservations { n: usize, k: usize },
}

/// One row of a coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientRow {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    /// t statistic for linear models, z statistic for logistic ones.
    pub statistic: f64,
    pub p_value: f64,
}

/// A fitted linear model of price.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub layout: DesignLayout,
    pub coefficients: Array1<f64>,
    pub xtx_inverse: Array2<f64>,
    pub fitted: Array1<f64>,
    pub residuals: Array1<f64>,
    pub leverage: Array1<f64>,
    pub rss: f64,
    pub tss: f64,
    pub n_obs: usize,
}

impl OlsFit {
    /// Number of coefficients, intercept included.
    pub fn n_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    pub fn residual_df(&self) -> usize {
        self.n_obs - self.n_coefficients()
    }

    /// Residual variance estimate `RSS / (n - k)`.
    pub fn sigma2(&self) -> f64 {
        self.rss / self.residual_df() as f64
    }

    pub fn r_squared(&self) -> f64 {
        1.0 - self.rss / self.tss
    }

    pub fn adjusted_r_squared(&self) -> f64 {
        let n = self.n_obs as f64;
        1.0 - (self.rss / self.residual_df() as f64) / (self.tss / (n - 1.0))
    }

    /// Overall F statistic against the intercept-only model with its p-value.
    /// `None` for an intercept-only fit.
    pub fn f_statistic(&self) -> Option<(f64, f64)> {
        let df1 = self.n_coefficients() - 1;
        if df1 == 0 {
            return None;
        }
        let df2 = self.residual_df() as f64;
        let f = ((self.tss - self.rss) / df1 as f64) / (self.rss / df2);
        let p = FisherSnedecor::new(df1 as f64, df2)
            .map(|dist| dist.sf(f))
            .unwrap_or(f64::NAN);
        Some((f, p))
    }

    pub fn predict(&self, sales: &[DerivedSale]) -> Result<Array1<f64>, OlsError> {
        Ok(self.layout.matrix(sales)?.dot(&self.coefficients))
    }

    /// Estimate of the named design column.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.layout
            .names()
            .iter()
            .position(|n| n == name)
            .map(|j| self.coefficients[j])
    }

    pub fn coefficient_table(&self) -> Vec<CoefficientRow> {
        let sigma2 = self.sigma2();
        let t_dist = StudentsT::new(0.0, 1.0, self.residual_df() as f64).ok();
        self.layout
            .names()
            .into_iter()
            .enumerate()
            .map(|(j, name)| {
                let estimate = self.coefficients[j];
                let std_error = (sigma2 * self.xtx_inverse[[j, j]]).sqrt();
                let statistic = estimate / std_error;
                let p_value = t_dist
                    .as_ref()
                    .map(|t| 2.0 * t.sf(statistic.abs()))
                    .unwrap_or(f64::NAN);
                CoefficientRow {
                    name,
                    estimate,
                    std_error,
                    statistic,
                    p_value,
                }
            })
            .collect()
    }
}

/// Fits `price ~ terms` on `sales`.
pub fn fit_ols(terms: &[Term], sales: &[DerivedSale]) -> Result<OlsFit, OlsError> {
    let layout = DesignLayout::new(terms, sales)?;
    let x = layout.matrix(sales)?;
    let y: Array1<f64> = sales.iter().map(|s| s.price).collect();
    fit_ols_matrix(layout, &x, &y)
}

pub(crate) fn fit_ols_matrix(
    layout: DesignLayout,
    x: &Array2<f64>,
    y: &Array1<f64>,
) -> Result<OlsFit, OlsError> {
    let (n, k) = x.dim();
    if n <= k {
        return Err(OlsError::TooFewObservations { n, k });
    }
    let solve = weighted_least_squares(x.view(), y.view(), None)?;
    let fitted = x.dot(&solve.coefficients);
    let residuals = y - &fitted;
    let rss = residuals.dot(&residuals);
    let mean = y.sum() / n as f64;
    let tss = y.iter().map(|v| (v - mean).powi(2)).sum();
    log::debug!("OLS fit with {k} coefficients on {n} observations: RSS = {rss:.6e}");
    Ok(OlsFit {
        layout,
        coefficients: solve.coefficients,
        xtx_inverse: solve.xtwx_inverse,
        fitted,
        residuals,
        leverage: solve.leverage,
        rss,
        tss,
        n_obs: n,
    })
}
