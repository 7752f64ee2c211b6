//! Manual data-quality correction.
//!
//! A fixed correction table overwrites bedroom and/or bathroom counts of
//! specific sales, a fixed removal set drops sales with anomalies that could
//! not be verified, and every remaining sale is checked against the record
//! invariants. An identifier in either table that does not occur in the data
//! is reported as a stale reference instead of being skipped.

use crate::config::{CleaningConfig, Correction};
use crate::record::HouseSale;
use ahash::AHashSet;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CleaningError {
    #[error("Correction table references sale {0}, which is not in the loaded data.")]
    StaleCorrection(i64),
    #[error("Removal set references sale {0}, which is not in the loaded data.")]
    StaleRemoval(i64),
    #[error("Sale {id} violates a data invariant: {violation}")]
    InvariantViolation { id: i64, violation: Violation },
}

/// The record invariant a sale failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("bedroom count is 0 and the sale is not a verified studio")]
    NoBedrooms,
    #[error("bathroom count {0} is not positive")]
    NonPositiveBathrooms(f64),
    #[error("living area {0} is not positive")]
    NonPositiveLivingArea(f64),
    #[error("price {0} is not positive")]
    NonPositivePrice(f64),
    #[error("renovation year {renovated} is after the analysis year {analysis_year}")]
    RenovatedInFuture { renovated: i32, analysis_year: i32 },
    #[error("renovation year {renovated} precedes construction year {built}")]
    RenovatedBeforeBuilt { renovated: i32, built: i32 },
}

/// What the cleaning stage changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CleaningSummary {
    pub loaded: usize,
    pub corrected: usize,
    pub removed: usize,
    pub retained: usize,
}

/// Applies corrections and removals, then checks every retained sale.
pub fn clean(
    mut sales: Vec<HouseSale>,
    config: &CleaningConfig,
) -> Result<(Vec<HouseSale>, CleaningSummary), CleaningError> {
    let loaded = sales.len();
    let corrected = apply_corrections(&mut sales, &config.corrections)?;
    let sales = remove_sales(sales, &config.removals)?;
    check_invariants(&sales, config)?;

    let summary = CleaningSummary {
        loaded,
        corrected,
        removed: loaded - sales.len(),
        retained: sales.len(),
    };
    log::info!(
        "Cleaning: {} loaded, {} corrected, {} removed, {} retained",
        summary.loaded,
        summary.corrected,
        summary.removed,
        summary.retained
    );
    Ok((sales, summary))
}

/// Overwrites the fields each correction supplies and returns how many sales
/// were touched. Applying the same table twice changes nothing the second time.
pub fn apply_corrections(
    sales: &mut [HouseSale],
    corrections: &[Correction],
) -> Result<usize, CleaningError> {
    let present: AHashSet<i64> = sales.iter().map(|s| s.id).collect();
    if let Some(stale) = corrections.iter().find(|c| !present.contains(&c.id)) {
        return Err(CleaningError::StaleCorrection(stale.id));
    }

    let mut touched = 0;
    for sale in sales.iter_mut() {
        // Later entries for the same id win.
        let mut hit = false;
        for correction in corrections.iter().filter(|c| c.id == sale.id) {
            if let Some(bedrooms) = correction.bedrooms {
                sale.bedrooms = bedrooms;
            }
            if let Some(bathrooms) = correction.bathrooms {
                sale.bathrooms = bathrooms;
            }
            hit = true;
        }
        if hit {
            touched += 1;
        }
    }
    Ok(touched)
}

/// Drops every sale whose id is in `removals`.
pub fn remove_sales(
    sales: Vec<HouseSale>,
    removals: &[i64],
) -> Result<Vec<HouseSale>, CleaningError> {
    let present: AHashSet<i64> = sales.iter().map(|s| s.id).collect();
    if let Some(&stale) = removals.iter().find(|id| !present.contains(id)) {
        return Err(CleaningError::StaleRemoval(stale));
    }
    let removals: AHashSet<i64> = removals.iter().copied().collect();
    Ok(sales
        .into_iter()
        .filter(|s| !removals.contains(&s.id))
        .collect())
}

/// Fails on the first sale that breaks a record invariant.
pub fn check_invariants(sales: &[HouseSale], config: &CleaningConfig) -> Result<(), CleaningError> {
    let studios: AHashSet<i64> = config.studio_exceptions.iter().copied().collect();
    for sale in sales {
        if let Some(violation) = invariant_violation(sale, &studios, config.analysis_year) {
            return Err(CleaningError::InvariantViolation {
                id: sale.id,
                violation,
            });
        }
    }
    Ok(())
}

fn invariant_violation(
    sale: &HouseSale,
    studios: &AHashSet<i64>,
    analysis_year: i32,
) -> Option<Violation> {
    if sale.bedrooms == 0 && !studios.contains(&sale.id) {
        return Some(Violation::NoBedrooms);
    }
    if !(sale.bathrooms > 0.0) {
        return Some(Violation::NonPositiveBathrooms(sale.bathrooms));
    }
    if !(sale.sqft_living > 0.0) {
        return Some(Violation::NonPositiveLivingArea(sale.sqft_living));
    }
    if !(sale.price > 0.0) {
        return Some(Violation::NonPositivePrice(sale.price));
    }
    if sale.yr_renovated > analysis_year {
        return Some(Violation::RenovatedInFuture {
            renovated: sale.yr_renovated,
            analysis_year,
        });
    }
    if sale.yr_renovated != 0 && sale.yr_renovated < sale.yr_built {
        return Some(Violation::RenovatedBeforeBuilt {
            renovated: sale.yr_renovated,
            built: sale.yr_built,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticSalesBuilder;

    fn sales_with_anomalies() -> Vec<HouseSale> {
        let mut sales = SyntheticSalesBuilder::new(30).seed(11).build();
        sales[0].bedrooms = 33;
        sales[1].bedrooms = 0;
        sales[2].bathrooms = 0.0;
        sales[3].bedrooms = 0;
        sales[3].bathrooms = 0.0;
        sales[4].bedrooms = 0;
        sales
    }

    fn table(sales: &[HouseSale]) -> CleaningConfig {
        CleaningConfig {
            corrections: vec![
                Correction {
                    id: sales[0].id,
                    bedrooms: Some(3),
                    bathrooms: None,
                },
                Correction {
                    id: sales[1].id,
                    bedrooms: Some(2),
                    bathrooms: None,
                },
                Correction {
                    id: sales[2].id,
                    bedrooms: None,
                    bathrooms: Some(1.75),
                },
            ],
            removals: vec![sales[3].id],
            studio_exceptions: vec![sales[4].id],
            ..CleaningConfig::default()
        }
    }

    #[test]
    fn corrections_overwrite_only_supplied_fields() {
        let original = sales_with_anomalies();
        let config = table(&original);
        let (cleaned, summary) = clean(original.clone(), &config).unwrap();

        assert_eq!(summary.loaded, 30);
        assert_eq!(summary.corrected, 3);
        assert_eq!(summary.removed, 1);
        assert_eq!(cleaned.len(), 29);

        let by_id = |id: i64| cleaned.iter().find(|s| s.id == id).unwrap();
        assert_eq!(by_id(original[0].id).bedrooms, 3);
        assert_eq!(by_id(original[0].id).bathrooms, original[0].bathrooms);
        assert_eq!(by_id(original[1].id).bedrooms, 2);
        assert_eq!(by_id(original[2].id).bathrooms, 1.75);
        assert_eq!(by_id(original[2].id).bedrooms, original[2].bedrooms);
        assert!(cleaned.iter().all(|s| s.id != original[3].id));

        // Untouched sales are unchanged.
        for sale in &original[5..] {
            assert_eq!(by_id(sale.id), sale);
        }
    }

    #[test]
    fn retained_sales_satisfy_invariants() {
        let original = sales_with_anomalies();
        let config = table(&original);
        let (cleaned, _) = clean(original.clone(), &config).unwrap();
        for sale in &cleaned {
            assert!(sale.bedrooms > 0 || config.studio_exceptions.contains(&sale.id));
            assert!(sale.bathrooms > 0.0);
            assert!(sale.price > 0.0);
            assert!(sale.sqft_living > 0.0);
        }
    }

    #[test]
    fn corrections_are_idempotent() {
        let original = sales_with_anomalies();
        let config = table(&original);
        let mut once = original.clone();
        apply_corrections(&mut once, &config.corrections).unwrap();
        let mut twice = once.clone();
        apply_corrections(&mut twice, &config.corrections).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn stale_identifiers_are_reported() {
        let original = sales_with_anomalies();
        let mut config = table(&original);
        config.corrections.push(Correction {
            id: -1,
            bedrooms: Some(1),
            bathrooms: None,
        });
        assert_eq!(
            clean(original.clone(), &config).unwrap_err(),
            CleaningError::StaleCorrection(-1)
        );

        let mut config = table(&original);
        config.removals.push(-7);
        assert_eq!(
            clean(original, &config).unwrap_err(),
            CleaningError::StaleRemoval(-7)
        );
    }

    #[test]
    fn unexplained_studio_aborts() {
        let original = sales_with_anomalies();
        let mut config = table(&original);
        config.studio_exceptions.clear();
        match clean(original.clone(), &config).unwrap_err() {
            CleaningError::InvariantViolation { id, violation } => {
                assert_eq!(id, original[4].id);
                assert_eq!(violation, Violation::NoBedrooms);
            }
            other => panic!("Expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn renovation_years_are_bounded() {
        let mut sales = SyntheticSalesBuilder::new(10).seed(5).build();
        sales[0].yr_built = 1990;
        sales[0].yr_renovated = 1980;
        let err = check_invariants(&sales, &CleaningConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            CleaningError::InvariantViolation {
                violation: Violation::RenovatedBeforeBuilt { .. },
                ..
            }
        ));

        sales[0].yr_renovated = 2020;
        let err = check_invariants(&sales, &CleaningConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            CleaningError::InvariantViolation {
                violation: Violation::RenovatedInFuture { .. },
                ..
            }
        ));
    }
}
