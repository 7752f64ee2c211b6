//! Best-subset search over candidate price predictors.
//!
//! Every subset is scored from one centered, column-scaled Gram matrix of the
//! full candidate design: for column set `S`, `RSS = Syy - c_S' G_SS^-1 c_S`.
//! Per subset size the minimum-RSS subset is kept, and the sizes are then
//! ranked by adjusted R², Mallows' Cp and BIC.

use crate::design::{DesignError, DesignLayout, Term};
use crate::features::DerivedSale;
use crate::linalg::{forward_substitute, principal_cholesky};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use thiserror::Error;

const PIVOT_TOLERANCE: f64 = 1e-10;
/// Hard ceiling for bit-mask enumeration regardless of configuration.
const MAX_ENUMERABLE_TERMS: usize = 30;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error("No candidate predictors were supplied.")]
    NoCandidates,
    #[error("No subset of the candidate predictors gives an estimable model.")]
    NoEstimableSubset,
    #[error(
        "Selection criteria disagree: adjusted R² picks [{}], Cp picks [{}], BIC picks [{}]. Set regression.resolution or regression.manual_terms to choose.",
        term_list(.adjusted_r2),
        term_list(.cp),
        term_list(.bic)
    )]
    Ambiguous {
        adjusted_r2: Vec<Term>,
        cp: Vec<Term>,
        bic: Vec<Term>,
    },
}

fn term_list(terms: &[Term]) -> String {
    terms.iter().join(", ")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchStrategy {
    #[default]
    Exhaustive,
    Forward,
}

/// How a disagreement between the three criteria is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Disagreement is an error.
    #[default]
    RequireAgreement,
    AdjustedR2,
    Cp,
    Bic,
}

/// Best subset of one size with its criteria.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsetScore {
    pub terms: Vec<Term>,
    /// Design columns, intercept included.
    pub n_columns: usize,
    pub rss: f64,
    pub adjusted_r2: f64,
    pub cp: f64,
    pub bic: f64,
}

#[derive(Debug, Clone)]
pub struct SubsetSearch {
    pub strategy: SearchStrategy,
    pub candidates: Vec<Term>,
    /// One entry per estimable subset size, in increasing size.
    pub per_size: Vec<SubsetScore>,
    pub best_adjusted_r2: usize,
    pub best_cp: usize,
    pub best_bic: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Agreed(Vec<Term>),
    Disagreed {
        adjusted_r2: Vec<Term>,
        cp: Vec<Term>,
        bic: Vec<Term>,
    },
}

impl SubsetSearch {
    pub fn outcome(&self) -> SelectionOutcome {
        let (a, c, b) = (self.best_adjusted_r2, self.best_cp, self.best_bic);
        if a == c && c == b {
            SelectionOutcome::Agreed(self.per_size[a].terms.clone())
        } else {
            SelectionOutcome::Disagreed {
                adjusted_r2: self.per_size[a].terms.clone(),
                cp: self.per_size[c].terms.clone(),
                bic: self.per_size[b].terms.clone(),
            }
        }
    }

    /// Applies the configured policy to the three criteria's choices.
    pub fn resolve(&self, resolution: Resolution) -> Result<Vec<Term>, SelectionError> {
        let pick = |index: usize| self.per_size[index].terms.clone();
        match resolution {
            Resolution::AdjustedR2 => Ok(pick(self.best_adjusted_r2)),
            Resolution::Cp => Ok(pick(self.best_cp)),
            Resolution::Bic => Ok(pick(self.best_bic)),
            Resolution::RequireAgreement => match self.outcome() {
                SelectionOutcome::Agreed(terms) => Ok(terms),
                SelectionOutcome::Disagreed {
                    adjusted_r2,
                    cp,
                    bic,
                } => Err(SelectionError::Ambiguous {
                    adjusted_r2,
                    cp,
                    bic,
                }),
            },
        }
    }
}

/// Centered and scaled sufficient statistics of the full candidate design.
struct GramSystem {
    gram: Array2<f64>,
    cross: Array1<f64>,
    syy: f64,
    /// Design columns (intercept excluded) of every candidate term.
    term_columns: Vec<Vec<usize>>,
    /// Columns with zero variance can never enter an estimable subset.
    constant: Vec<bool>,
}

impl GramSystem {
    fn new(terms: &[Term], sales: &[DerivedSale]) -> Result<Self, SelectionError> {
        let layout = DesignLayout::new(terms, sales)?;
        let x = layout.matrix(sales)?;
        let x = x.slice(ndarray::s![.., 1..]).to_owned();
        let y: Array1<f64> = sales.iter().map(|s| s.price).collect();

        let n = x.nrows() as f64;
        let means = x.sum_axis(Axis(0)) / n;
        let mut centered = &x - &means.view().insert_axis(Axis(0));
        let mut constant = Vec::with_capacity(centered.ncols());
        for mut col in centered.axis_iter_mut(Axis(1)) {
            let norm = col.dot(&col).sqrt();
            constant.push(!(norm > 0.0));
            if norm > 0.0 {
                col /= norm;
            }
        }
        let y_mean = y.sum() / n;
        let yc = &y - y_mean;

        let term_columns = terms
            .iter()
            .map(|&t| layout.columns_of(t).into_iter().map(|j| j - 1).collect())
            .collect();

        Ok(Self {
            gram: centered.t().dot(&centered),
            cross: centered.t().dot(&yc),
            syy: yc.dot(&yc),
            term_columns,
            constant,
        })
    }

    fn columns_for_mask(&self, mask: usize) -> Vec<usize> {
        self.term_columns
            .iter()
            .enumerate()
            .filter(|(t, _)| mask & (1 << t) != 0)
            .flat_map(|(_, cols)| cols.iter().copied())
            .collect()
    }

    fn columns_for_terms(&self, term_indices: &[usize]) -> Vec<usize> {
        term_indices
            .iter()
            .flat_map(|&t| self.term_columns[t].iter().copied())
            .collect()
    }

    /// Residual sum of squares of the intercept plus `columns`, `None` if the
    /// subset is rank deficient.
    fn rss(&self, columns: &[usize]) -> Option<f64> {
        let p = columns.len();
        if p == 0 {
            return Some(self.syy);
        }
        if columns.iter().any(|&j| self.constant[j]) {
            return None;
        }
        let l = principal_cholesky(&self.gram, columns, PIVOT_TOLERANCE).ok()?;
        // With L z = c, the explained sum of squares is z'z.
        let cross: Vec<f64> = columns.iter().map(|&j| self.cross[j]).collect();
        let z = forward_substitute(&l, &cross);
        let explained = z.dot(&z);
        Some((self.syy - explained).max(0.0))
    }
}

#[derive(Debug, Clone, Copy)]
struct Best {
    rss: f64,
    mask: usize,
}

impl Best {
    fn better_than(&self, other: &Option<Best>) -> bool {
        match other {
            None => true,
            Some(o) => self.rss < o.rss || (self.rss == o.rss && self.mask < o.mask),
        }
    }
}

fn merge(mut a: Vec<Option<Best>>, b: Vec<Option<Best>>) -> Vec<Option<Best>> {
    for (slot, candidate) in a.iter_mut().zip(b) {
        if let Some(c) = candidate {
            if c.better_than(slot) {
                *slot = Some(c);
            }
        }
    }
    a
}

fn create_progress_bar(len: u64) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} subsets ({eta})",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb
}

fn exhaustive(system: &GramSystem, m: usize, n_obs: usize) -> Vec<Option<Best>> {
    let total = (1usize << m) - 1;
    let pb = create_progress_bar(total as u64);
    let best = (1usize..=total)
        .into_par_iter()
        .fold(
            || vec![None; m + 1],
            |mut best: Vec<Option<Best>>, mask| {
                let columns = system.columns_for_mask(mask);
                if columns.len() + 1 < n_obs {
                    if let Some(rss) = system.rss(&columns) {
                        let size = mask.count_ones() as usize;
                        let candidate = Best { rss, mask };
                        if candidate.better_than(&best[size]) {
                            best[size] = Some(candidate);
                        }
                    }
                }
                pb.inc(1);
                best
            },
        )
        .reduce(|| vec![None; m + 1], merge);
    pb.finish_and_clear();
    best
}

fn forward(system: &GramSystem, m: usize, n_obs: usize) -> Vec<Option<Best>> {
    let mut best = vec![None; m + 1];
    let mut selected: Vec<usize> = Vec::new();
    for size in 1..=m {
        let step = (0..m)
            .filter(|t| !selected.contains(t))
            .filter_map(|t| {
                let mut trial = selected.clone();
                trial.push(t);
                let columns = system.columns_for_terms(&trial);
                if columns.len() + 1 >= n_obs {
                    return None;
                }
                system.rss(&columns).map(|rss| (t, rss))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        let Some((term, rss)) = step else {
            break;
        };
        selected.push(term);
        log::debug!("Forward step {size}: added term #{term}, RSS = {rss:.6e}");
        let mask = selected.iter().fold(0usize, |acc, &t| acc | (1 << t));
        best[size] = Some(Best { rss, mask });
    }
    best
}

/// Runs the best-subset search. `Exhaustive` falls back to forward stepwise
/// selection when there are more than `max_exhaustive_terms` candidates.
pub fn best_subsets(
    candidates: &[Term],
    sales: &[DerivedSale],
    strategy: SearchStrategy,
    max_exhaustive_terms: usize,
) -> Result<SubsetSearch, SelectionError> {
    if candidates.is_empty() {
        return Err(SelectionError::NoCandidates);
    }
    let m = candidates.len();
    let strategy = if strategy == SearchStrategy::Exhaustive
        && m > max_exhaustive_terms.min(MAX_ENUMERABLE_TERMS)
    {
        log::warn!(
            "{m} candidate terms exceed the exhaustive limit of {max_exhaustive_terms}; using forward selection"
        );
        SearchStrategy::Forward
    } else {
        strategy
    };

    let system = GramSystem::new(candidates, sales)?;
    let n_obs = sales.len();
    log::info!(
        "Best-subset search ({strategy:?}) over {m} terms and {} design columns on {n_obs} sales",
        system.cross.len()
    );
    let best = match strategy {
        SearchStrategy::Exhaustive => exhaustive(&system, m, n_obs),
        SearchStrategy::Forward => forward(&system, m, n_obs),
    };

    let n = n_obs as f64;
    let all_columns = system.columns_for_mask((1usize << m) - 1);
    let (full_rss, full_k) = match system.rss(&all_columns) {
        Some(rss) if all_columns.len() + 1 < n_obs => (rss, all_columns.len() + 1),
        _ => {
            // Fall back to the largest estimable subset.
            let largest = best
                .iter()
                .rev()
                .flatten()
                .next()
                .ok_or(SelectionError::NoEstimableSubset)?;
            (largest.rss, system.columns_for_mask(largest.mask).len() + 1)
        }
    };
    let sigma2_full = full_rss / (n - full_k as f64);

    let per_size: Vec<SubsetScore> = best
        .iter()
        .flatten()
        .map(|b| {
            let k = system.columns_for_mask(b.mask).len() + 1;
            let kf = k as f64;
            SubsetScore {
                terms: (0..m)
                    .filter(|t| b.mask & (1 << t) != 0)
                    .map(|t| candidates[t])
                    .collect(),
                n_columns: k,
                rss: b.rss,
                adjusted_r2: 1.0 - (b.rss / (n - kf)) / (system.syy / (n - 1.0)),
                cp: b.rss / sigma2_full - n + 2.0 * kf,
                bic: n * (b.rss / n).ln() + kf * n.ln(),
            }
        })
        .collect();
    if per_size.is_empty() {
        return Err(SelectionError::NoEstimableSubset);
    }

    let argbest = |key: &dyn Fn(&SubsetScore) -> f64| {
        per_size
            .iter()
            .enumerate()
            .min_by(|a, b| key(a.1).total_cmp(&key(b.1)).then(a.0.cmp(&b.0)))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let best_adjusted_r2 = argbest(&|s: &SubsetScore| -s.adjusted_r2);
    let best_cp = argbest(&|s: &SubsetScore| s.cp);
    let best_bic = argbest(&|s: &SubsetScore| s.bic);

    Ok(SubsetSearch {
        strategy,
        candidates: candidates.to_vec(),
        per_size,
        best_adjusted_r2,
        best_cp,
        best_bic,
    })
}
