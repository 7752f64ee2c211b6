//! Logistic regression for the good-quality label.
//!
//! Fitted by iteratively reweighted least squares with step halving. Also
//! covers deviance bookkeeping, Wald tables, VIF/significance pruning of the
//! full model and the likelihood ratio test between nested models.

use crate::config::ClassificationConfig;
use crate::design::{DesignError, DesignLayout, Term};
use crate::diagnostics::{TermVif, term_vif};
use crate::features::DerivedSale;
use crate::linalg::{LinalgError, weighted_least_squares};
use crate::ols::CoefficientRow;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use thiserror::Error;

const MAX_STEP_HALVINGS: usize = 30;
/// Every fitted probability within this of its label means the classes are separated.
const SEPARATION_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum LogisticError {
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error("Weighted least-squares step failed: {0}")]
    Linalg(#[from] LinalgError),
    #[error("Cannot fit a logistic model: {0} labels for {1} observations.")]
    LabelMismatch(usize, usize),
    #[error("Term '{0}' of the reduced model is not part of the full model.")]
    NotNested(Term),
    #[error("Invalid chi-squared reference with {df} degrees of freedom: {reason}")]
    ChiSquared { df: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IrlsStatus {
    Converged,
    /// Fitted probabilities reproduce every label; coefficients are not finite in the limit.
    PerfectSeparation,
    MaxIterationsReached,
    /// No step could improve the deviance, or the weighted solve broke down.
    Unstable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrlsOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl From<&ClassificationConfig> for IrlsOptions {
    fn from(config: &ClassificationConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tolerance: config.convergence_tolerance,
        }
    }
}

impl Default for IrlsOptions {
    fn default() -> Self {
        Self::from(&ClassificationConfig::default())
    }
}

/// Mean, working weights and working response for the logit link.
pub fn update_glm_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    const MIN_WEIGHT: f64 = 1e-6;
    const PROB_EPS: f64 = 1e-8;

    let eta_clamped = eta.mapv(|e| e.clamp(-700.0, 700.0));
    let mut mu = eta_clamped.mapv(|e| 1.0 / (1.0 + (-e).exp()));
    mu.mapv_inplace(|v| v.clamp(PROB_EPS, 1.0 - PROB_EPS));
    let weights = (&mu * (1.0 - &mu)).mapv(|v| v.max(MIN_WEIGHT));
    let residual = &y - &mu;
    let z = &eta_clamped + &(&residual / &weights);
    (mu, weights, z)
}

/// Binomial deviance `-2 log L` of 0/1 labels.
pub fn calculate_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-8;
    let total = Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let mui_c = mui.clamp(EPS, 1.0 - EPS);
        let term1 = if yi > EPS {
            yi * (yi.ln() - mui_c.ln())
        } else {
            0.0
        };
        let term2 = if yi < 1.0 - EPS {
            (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui_c).ln())
        } else {
            0.0
        };
        acc + term1 + term2
    });
    2.0 * total
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta.clamp(-700.0, 700.0)).exp())
}

#[derive(Debug, Clone)]
pub struct LogisticFit {
    pub layout: DesignLayout,
    pub coefficients: Array1<f64>,
    /// `(X'WX)^-1` at the final weights; `None` when it could not be formed.
    pub covariance: Option<Array2<f64>>,
    pub deviance: f64,
    pub null_deviance: f64,
    pub iterations: usize,
    pub status: IrlsStatus,
    pub n_obs: usize,
}

impl LogisticFit {
    pub fn n_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    pub fn aic(&self) -> f64 {
        self.deviance + 2.0 * self.n_coefficients() as f64
    }

    pub fn predict_proba(&self, sales: &[DerivedSale]) -> Result<Array1<f64>, LogisticError> {
        let eta = self.layout.matrix(sales)?.dot(&self.coefficients);
        Ok(eta.mapv(sigmoid))
    }

    /// Wald table; standard errors are NaN when the covariance is unavailable.
    pub fn coefficient_table(&self) -> Vec<CoefficientRow> {
        let normal = Normal::new(0.0, 1.0).ok();
        self.layout
            .names()
            .into_iter()
            .enumerate()
            .map(|(j, name)| {
                let estimate = self.coefficients[j];
                let std_error = self
                    .covariance
                    .as_ref()
                    .map_or(f64::NAN, |cov| cov[[j, j]].sqrt());
                let statistic = estimate / std_error;
                let p_value = normal
                    .as_ref()
                    .map_or(f64::NAN, |n| 2.0 * n.sf(statistic.abs()));
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

    /// Smallest Wald p-value over each term's columns; NaN if none is defined.
    pub fn term_p_values(&self) -> Vec<(Term, f64)> {
        let table = self.coefficient_table();
        self.layout
            .terms()
            .iter()
            .map(|&term| {
                let p = self
                    .layout
                    .columns_of(term)
                    .into_iter()
                    .map(|j| table[j].p_value)
                    .filter(|p| !p.is_nan())
                    .reduce(f64::min)
                    .unwrap_or(f64::NAN);
                (term, p)
            })
            .collect()
    }
}

/// Fits `labels ~ terms` on `sales`.
pub fn fit_logistic(
    terms: &[Term],
    sales: &[DerivedSale],
    labels: ArrayView1<f64>,
    options: IrlsOptions,
) -> Result<LogisticFit, LogisticError> {
    if labels.len() != sales.len() {
        return Err(LogisticError::LabelMismatch(labels.len(), sales.len()));
    }
    let layout = DesignLayout::new(terms, sales)?;
    let x = layout.matrix(sales)?;
    fit_logistic_matrix(layout, x.view(), labels, options)
}

fn fit_logistic_matrix(
    layout: DesignLayout,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    options: IrlsOptions,
) -> Result<LogisticFit, LogisticError> {
    let (n, p) = x.dim();
    let mean = y.sum() / n as f64;
    let null_deviance = calculate_deviance(y, &Array1::from_elem(n, mean));

    let mut beta = Array1::<f64>::zeros(p);
    let mut eta = Array1::<f64>::zeros(n);
    let (mut mu, mut weights, mut z) = update_glm_vectors(y, &eta);
    let mut deviance = calculate_deviance(y, &mu);
    let mut status = IrlsStatus::MaxIterationsReached;
    let mut iterations = 0;

    for iter in 1..=options.max_iterations {
        iterations = iter;
        let mut beta_trial = match weighted_least_squares(x, z.view(), Some(weights.view())) {
            Ok(solve) => solve.coefficients,
            Err(err) if iter == 1 => return Err(err.into()),
            Err(err) => {
                log::warn!("IRLS iteration {iter}: weighted solve failed ({err}); keeping last estimate");
                status = IrlsStatus::Unstable;
                break;
            }
        };

        let mut eta_trial = x.dot(&beta_trial);
        let (mut mu_trial, _, _) = update_glm_vectors(y, &eta_trial);
        let mut deviance_trial = calculate_deviance(y, &mu_trial);
        let mut step_halving_count = 0;
        while !(deviance_trial.is_finite() && deviance_trial <= deviance)
            && step_halving_count < MAX_STEP_HALVINGS
        {
            beta_trial = &beta + 0.5 * (&beta_trial - &beta);
            eta_trial = x.dot(&beta_trial);
            mu_trial = update_glm_vectors(y, &eta_trial).0;
            deviance_trial = calculate_deviance(y, &mu_trial);
            step_halving_count += 1;
        }
        if !(deviance_trial.is_finite() && deviance_trial <= deviance) {
            log::warn!("IRLS iteration {iter}: no improving step after {step_halving_count} halvings");
            status = IrlsStatus::Unstable;
            break;
        }

        let change = (deviance - deviance_trial).abs();
        beta = beta_trial;
        eta = eta_trial;
        deviance = deviance_trial;
        (mu, weights, z) = update_glm_vectors(y, &eta);
        log::debug!(
            "IRLS iteration {iter}: deviance = {deviance:.8e}, change = {change:.3e}, halvings = {step_halving_count}"
        );

        let max_gap = Zip::from(y)
            .and(&mu)
            .fold(0.0_f64, |acc, &yi, &mui| acc.max((yi - mui).abs()));
        if max_gap < SEPARATION_TOLERANCE {
            log::warn!("IRLS stopped at iteration {iter}: the classes are perfectly separated");
            status = IrlsStatus::PerfectSeparation;
            break;
        }
        if change / (deviance.abs() + 0.1) < options.tolerance {
            status = IrlsStatus::Converged;
            break;
        }
    }
    if status == IrlsStatus::MaxIterationsReached {
        log::warn!("IRLS did not converge in {} iterations", options.max_iterations);
    }

    let covariance = match weighted_least_squares(x, z.view(), Some(weights.view())) {
        Ok(solve) => Some(solve.xtwx_inverse),
        Err(err) => {
            log::warn!("Coefficient covariance unavailable: {err}");
            None
        }
    };

    Ok(LogisticFit {
        layout,
        coefficients: beta,
        covariance,
        deviance,
        null_deviance,
        iterations,
        status,
        n_obs: n,
    })
}

/// Why a term was left out of the reduced model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DropReason {
    Collinear { vif: f64 },
    Insignificant { p_value: f64 },
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReducedSelection {
    pub terms: Vec<Term>,
    pub dropped: Vec<(Term, DropReason)>,
    pub vif: Vec<TermVif>,
}

/// Chooses the reduced model's terms: the full terms minus those whose VIF
/// exceeds the threshold or whose smallest Wald p-value exceeds the
/// significance level, unless an explicit list is configured.
pub fn reduce_terms(
    full: &LogisticFit,
    sales: &[DerivedSale],
    config: &ClassificationConfig,
) -> Result<ReducedSelection, LogisticError> {
    let x = full.layout.matrix(sales)?;
    let vif = term_vif(&full.layout, x.view())?;
    let full_terms = full.layout.terms();

    if let Some(manual) = &config.reduced_terms {
        if let Some(&stray) = manual.iter().find(|t| !full_terms.contains(t)) {
            return Err(LogisticError::NotNested(stray));
        }
        let dropped = full_terms
            .iter()
            .filter(|t| !manual.contains(t))
            .map(|&t| (t, DropReason::Manual))
            .collect();
        return Ok(ReducedSelection {
            terms: manual.clone(),
            dropped,
            vif,
        });
    }

    let p_values = full.term_p_values();
    let mut terms = Vec::new();
    let mut dropped = Vec::new();
    for (&term, &(_, p_value)) in full_terms.iter().zip(&p_values) {
        let term_vif = vif.iter().find(|v| v.term == term).map(|v| v.vif);
        match term_vif {
            Some(vif) if vif > config.vif_threshold => {
                dropped.push((term, DropReason::Collinear { vif }));
            }
            _ if p_value > config.significance_level => {
                dropped.push((term, DropReason::Insignificant { p_value }));
            }
            _ => terms.push(term),
        }
    }
    log::info!("Reduced logistic model keeps {terms:?}, drops {dropped:?}");
    Ok(ReducedSelection {
        terms,
        dropped,
        vif,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LikelihoodRatioTest {
    /// Deviance of the reduced model minus deviance of the full model.
    pub statistic: f64,
    pub df: usize,
    pub critical_value: f64,
    pub p_value: f64,
    /// True when the dropped terms are not jointly zero, so the full model is preferred.
    pub reject_null: bool,
}

/// Compares nested fits; `None` when they have the same number of coefficients.
pub fn likelihood_ratio_test(
    full: &LogisticFit,
    reduced: &LogisticFit,
    level: f64,
) -> Result<Option<LikelihoodRatioTest>, LogisticError> {
    if let Some(&stray) = reduced
        .layout
        .terms()
        .iter()
        .find(|t| !full.layout.terms().contains(t))
    {
        return Err(LogisticError::NotNested(stray));
    }
    let df = full.n_coefficients().saturating_sub(reduced.n_coefficients());
    if df == 0 {
        return Ok(None);
    }
    let reference = ChiSquared::new(df as f64).map_err(|e| LogisticError::ChiSquared {
        df,
        reason: e.to_string(),
    })?;
    let statistic = reduced.deviance - full.deviance;
    let critical_value = reference.inverse_cdf(level);
    Ok(Some(LikelihoodRatioTest {
        statistic,
        df,
        critical_value,
        p_value: reference.sf(statistic.max(0.0)),
        reject_null: statistic > critical_value,
    }))
}
