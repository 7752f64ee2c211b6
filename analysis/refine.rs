//! Outlier refinement of the candidate price model.
//!
//! Training sales are ranked by descending absolute standardized residual and
//! the top of the ranking is dropped before refitting. By default the number
//! dropped equals the standardized-residual outlier count of the candidate
//! fit, which ties the removal to one diagnostic; [`removal_sensitivity`]
//! shows how the refit moves as that count changes.

use crate::design::Term;
use crate::diagnostics::{InfluenceDiagnostics, OutlierCounts, influence};
use crate::features::DerivedSale;
use crate::ols::{OlsError, OlsFit, fit_ols};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefineError {
    #[error(
        "Cannot remove {requested} of {n_obs} training sales and still fit {n_coefficients} coefficients."
    )]
    TooManyRemovals {
        requested: usize,
        n_obs: usize,
        n_coefficients: usize,
    },
    #[error(transparent)]
    Ols(#[from] OlsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCount {
    /// As many as the standardized-residual outlier count.
    Diagnostic,
    Fixed(usize),
}

impl From<Option<usize>> for RemovalCount {
    fn from(value: Option<usize>) -> Self {
        value.map_or(RemovalCount::Diagnostic, RemovalCount::Fixed)
    }
}

#[derive(Debug, Clone)]
pub struct Refinement {
    pub counts: OutlierCounts,
    pub removed_ids: Vec<i64>,
    pub n_before: usize,
    pub n_after: usize,
    pub fit: OlsFit,
}

/// Row indices ordered by descending absolute standardized residual; ties keep
/// the lower index first.
pub fn outlier_ranking(diagnostics: &InfluenceDiagnostics) -> Vec<usize> {
    let mut order: Vec<usize> = (0..diagnostics.n_obs()).collect();
    order.sort_by(|&a, &b| {
        let ra = diagnostics.standardized[a].abs();
        let rb = diagnostics.standardized[b].abs();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    order
}

fn refit_without(
    terms: &[Term],
    train: &[DerivedSale],
    ranking: &[usize],
    n_remove: usize,
    n_coefficients: usize,
) -> Result<(Vec<i64>, OlsFit), RefineError> {
    if n_remove + n_coefficients >= train.len() {
        return Err(RefineError::TooManyRemovals {
            requested: n_remove,
            n_obs: train.len(),
            n_coefficients,
        });
    }
    let mut drop = vec![false; train.len()];
    for &i in &ranking[..n_remove] {
        drop[i] = true;
    }
    let removed_ids = ranking[..n_remove].iter().map(|&i| train[i].id).collect();
    let retained: Vec<DerivedSale> = train
        .iter()
        .zip(&drop)
        .filter(|(_, dropped)| !**dropped)
        .map(|(sale, _)| sale.clone())
        .collect();
    Ok((removed_ids, fit_ols(terms, &retained)?))
}

/// Drops the top-ranked outliers of `candidate` (fit on `train`) and refits the
/// same terms.
pub fn refine(
    candidate: &OlsFit,
    train: &[DerivedSale],
    count: RemovalCount,
) -> Result<Refinement, RefineError> {
    let diagnostics = influence(candidate);
    let counts = diagnostics.counts();
    let n_remove = match count {
        RemovalCount::Diagnostic => counts.standardized,
        RemovalCount::Fixed(n) => n,
    };
    let ranking = outlier_ranking(&diagnostics);
    let (removed_ids, fit) = refit_without(
        candidate.layout.terms(),
        train,
        &ranking,
        n_remove,
        candidate.n_coefficients(),
    )?;
    log::info!(
        "Outlier refinement removed {} of {} training sales ({} standardized-residual outliers)",
        n_remove,
        train.len(),
        counts.standardized
    );
    Ok(Refinement {
        counts,
        removed_ids,
        n_before: train.len(),
        n_after: fit.n_obs,
        fit,
    })
}

/// One row of the removal-count sensitivity table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityRow {
    pub removed: usize,
    pub n_obs: usize,
    pub sqft_living: Option<f64>,
    pub adjusted_r2: f64,
    pub residual_se: f64,
    pub coefficients: Vec<f64>,
}

/// Refits the candidate after removing each of `removal_counts` top-ranked
/// outliers. Counts that leave too few sales are skipped with a warning.
pub fn removal_sensitivity(
    candidate: &OlsFit,
    train: &[DerivedSale],
    removal_counts: &[usize],
) -> Result<Vec<SensitivityRow>, RefineError> {
    let ranking = outlier_ranking(&influence(candidate));
    let mut rows = Vec::with_capacity(removal_counts.len());
    for &n_remove in removal_counts {
        let fit = match refit_without(
            candidate.layout.terms(),
            train,
            &ranking,
            n_remove,
            candidate.n_coefficients(),
        ) {
            Ok((_, fit)) => fit,
            Err(RefineError::TooManyRemovals { .. }) => {
                log::warn!("Skipping removal count {n_remove}: too few training sales remain");
                continue;
            }
            Err(err) => return Err(err),
        };
        rows.push(SensitivityRow {
            removed: n_remove,
            n_obs: fit.n_obs,
            sqft_living: fit.coefficient(Term::SqftLiving.name()),
            adjusted_r2: fit.adjusted_r_squared(),
            residual_se: fit.sigma2().sqrt(),
            coefficients: fit.coefficients.to_vec(),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::features::{Region, derive_features};
    use crate::synthetic::SyntheticSalesBuilder;

    fn derived_with_outliers() -> Vec<DerivedSale> {
        let sales = SyntheticSalesBuilder::new(300).seed(17).noise_sd(2_000.0).build();
        let mut derived = derive_features(&sales, &FeatureConfig::default())
            .unwrap()
            .sales;
        for &i in &[3usize, 50, 120] {
            derived[i].price += 400_000.0;
        }
        derived
    }

    #[test]
    fn diagnostic_count_removes_planted_outliers() {
        let train = derived_with_outliers();
        let candidate = fit_ols(&[Term::SqftLiving], &train).unwrap();
        let refinement = refine(&candidate, &train, RemovalCount::Diagnostic).unwrap();

        assert_eq!(
            refinement.n_before - refinement.n_after,
            refinement.counts.standardized
        );
        assert_eq!(refinement.removed_ids.len(), refinement.counts.standardized);
        for i in [3usize, 50, 120] {
            assert!(refinement.removed_ids.contains(&train[i].id));
        }
        let slope = refinement.fit.coefficient("sqft_living").unwrap();
        assert!((slope - 150.0).abs() < 2.0);
        assert!(refinement.fit.rss < candidate.rss);
    }

    #[test]
    fn saturated_row_is_ranked_below_real_outliers() {
        let sales = SyntheticSalesBuilder::new(150).seed(23).noise_sd(2_000.0).build();
        let mut seen_rural = false;
        let mut train: Vec<DerivedSale> = derive_features(&sales, &FeatureConfig::default())
            .unwrap()
            .sales
            .into_iter()
            .filter(|s| {
                let keep = s.region != Region::Rural || !seen_rural;
                seen_rural |= s.region == Region::Rural;
                keep
            })
            .collect();
        let lone = train.iter().position(|s| s.region == Region::Rural).unwrap();
        let planted = (lone + 1) % train.len();
        train[planted].price += 300_000.0;

        let candidate = fit_ols(&[Term::SqftLiving, Term::Region], &train).unwrap();
        let ranking = outlier_ranking(&influence(&candidate));
        assert_eq!(ranking[0], planted);
        assert_ne!(ranking[1], lone);

        let refinement = refine(&candidate, &train, RemovalCount::Fixed(1)).unwrap();
        assert_eq!(refinement.removed_ids, vec![train[planted].id]);
    }

    #[test]
    fn fixed_count_overrides_the_diagnostic() {
        let train = derived_with_outliers();
        let candidate = fit_ols(&[Term::SqftLiving], &train).unwrap();
        let refinement = refine(&candidate, &train, RemovalCount::Fixed(2)).unwrap();
        assert_eq!(refinement.n_after, train.len() - 2);

        let none = refine(&candidate, &train, RemovalCount::Fixed(0)).unwrap();
        assert_eq!(none.fit.coefficients, candidate.coefficients);

        let err = refine(&candidate, &train, RemovalCount::Fixed(299)).unwrap_err();
        assert!(matches!(err, RefineError::TooManyRemovals { .. }));
    }

    #[test]
    fn ranking_is_descending_with_index_ties() {
        let train = derived_with_outliers();
        let candidate = fit_ols(&[Term::SqftLiving], &train).unwrap();
        let diagnostics = influence(&candidate);
        let ranking = outlier_ranking(&diagnostics);
        for pair in ranking.windows(2) {
            let a = diagnostics.standardized[pair[0]].abs();
            let b = diagnostics.standardized[pair[1]].abs();
            assert!(a > b || (a == b && pair[0] < pair[1]));
        }
    }

    #[test]
    fn sensitivity_table_covers_each_count() {
        let train = derived_with_outliers();
        let candidate = fit_ols(&[Term::SqftLiving], &train).unwrap();
        let rows = removal_sensitivity(&candidate, &train, &[0, 3, 10, 1000]).unwrap();
        assert_eq!(rows.iter().map(|r| r.removed).collect::<Vec<_>>(), vec![0, 3, 10]);
        assert_eq!(rows[0].n_obs, 300);
        assert!((rows[1].sqft_living.unwrap() - 150.0).abs() < 2.0);
        assert!(rows[1].residual_se < rows[0].residual_se / 5.0);
    }
}
