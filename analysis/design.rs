//! Term catalogue and design-matrix construction.
//!
//! A [`Term`] is one predictor as the analyst names it. Numeric terms map to a
//! single design column; `region` and `renovation_group` expand to indicator
//! columns against a baseline level. A [`DesignLayout`] freezes that expansion
//! on the training sales so the same columns can be rebuilt for the test set.

use crate::features::{AreaSchema, DerivedSale, Region, RenovationGroup};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DesignError {
    #[error("Term '{0}' refers to an area field that was pruned as redundant.")]
    PrunedTerm(Term),
    #[error("Term '{0}' appears more than once in the predictor list.")]
    DuplicateTerm(Term),
    #[error("Cannot build a design matrix from zero sales.")]
    NoSales,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    Price,
    Bedrooms,
    Bathrooms,
    SqftLiving,
    SqftLot,
    SqftAbove,
    SqftBasement,
    Floors,
    Waterfront,
    View,
    Condition,
    Grade,
    YrBuilt,
    SqftLiving15,
    SqftLot15,
    YearSold,
    MonthSold,
    Region,
    RenovationGroup,
    DistanceToDowntown,
}

impl Term {
    pub fn name(self) -> &'static str {
        match self {
            Term::Price => "price",
            Term::Bedrooms => "bedrooms",
            Term::Bathrooms => "bathrooms",
            Term::SqftLiving => "sqft_living",
            Term::SqftLot => "sqft_lot",
            Term::SqftAbove => "sqft_above",
            Term::SqftBasement => "sqft_basement",
            Term::Floors => "floors",
            Term::Waterfront => "waterfront",
            Term::View => "view",
            Term::Condition => "condition",
            Term::Grade => "grade",
            Term::YrBuilt => "yr_built",
            Term::SqftLiving15 => "sqft_living15",
            Term::SqftLot15 => "sqft_lot15",
            Term::YearSold => "year_sold",
            Term::MonthSold => "month_sold",
            Term::Region => "region",
            Term::RenovationGroup => "renovation_group",
            Term::DistanceToDowntown => "distance_to_downtown",
        }
    }

    pub fn is_categorical(self) -> bool {
        matches!(self, Term::Region | Term::RenovationGroup)
    }

    /// Value of a numeric term, `None` when the field was pruned.
    fn numeric_value(self, sale: &DerivedSale) -> Option<f64> {
        let value = match self {
            Term::Price => sale.price,
            Term::Bedrooms => f64::from(sale.bedrooms),
            Term::Bathrooms => sale.bathrooms,
            Term::SqftLiving => sale.sqft_living,
            Term::SqftLot => return sale.sqft_lot,
            Term::SqftAbove => return sale.sqft_above,
            Term::SqftBasement => return sale.sqft_basement,
            Term::Floors => sale.floors,
            Term::Waterfront => f64::from(u8::from(sale.waterfront)),
            Term::View => f64::from(sale.view),
            Term::Condition => f64::from(sale.condition),
            Term::Grade => f64::from(sale.grade),
            Term::YrBuilt => f64::from(sale.yr_built),
            Term::SqftLiving15 => sale.sqft_living15,
            Term::SqftLot15 => sale.sqft_lot15,
            Term::YearSold => f64::from(sale.year_sold),
            Term::MonthSold => f64::from(sale.month_sold),
            Term::DistanceToDowntown => sale.distance_to_downtown,
            Term::Region | Term::RenovationGroup => return None,
        };
        Some(value)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Predictors considered by the best-subset search for price.
///
/// Identifier, raw date, coordinates, zip code and renovation year are left
/// out because derived fields carry the same information; `good_quality` is a
/// function of condition and grade.
pub fn continuous_candidates(schema: &AreaSchema) -> Vec<Term> {
    use crate::features::AreaField;
    let mut terms = vec![Term::Bedrooms, Term::Bathrooms, Term::SqftLiving];
    for (field, term) in [
        (AreaField::Lot, Term::SqftLot),
        (AreaField::Above, Term::SqftAbove),
        (AreaField::Basement, Term::SqftBasement),
    ] {
        if schema.retains(field) {
            terms.push(term);
        }
    }
    terms.extend([
        Term::Floors,
        Term::Waterfront,
        Term::View,
        Term::Condition,
        Term::Grade,
        Term::YrBuilt,
        Term::SqftLiving15,
        Term::SqftLot15,
        Term::YearSold,
        Term::MonthSold,
        Term::Region,
        Term::RenovationGroup,
        Term::DistanceToDowntown,
    ]);
    terms
}

/// The practically distinct predictors of the full good-quality model.
pub fn classification_terms() -> Vec<Term> {
    vec![
        Term::Price,
        Term::SqftLiving,
        Term::YrBuilt,
        Term::DistanceToDowntown,
        Term::Waterfront,
        Term::Region,
        Term::RenovationGroup,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Region(Region),
    Renovation(RenovationGroup),
}

impl Level {
    fn matches(self, sale: &DerivedSale) -> bool {
        match self {
            Level::Region(region) => sale.region == region,
            Level::Renovation(group) => sale.renovation_group == group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnSource {
    Intercept,
    Numeric(Term),
    Indicator(Level),
}

#[derive(Debug, Clone, PartialEq)]
struct Column {
    name: String,
    term: Option<Term>,
    source: ColumnSource,
}

/// Column layout of a design matrix: intercept first, then every term's
/// columns in the order the terms were given.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignLayout {
    terms: Vec<Term>,
    columns: Vec<Column>,
}

impl DesignLayout {
    /// Fixes the column expansion from the levels present in `sales`. The
    /// first present level of a categorical term (in canonical order) is its
    /// baseline; absent levels get no column.
    pub fn new(terms: &[Term], sales: &[DerivedSale]) -> Result<Self, DesignError> {
        let Some(first) = sales.first() else {
            return Err(DesignError::NoSales);
        };
        let mut columns = vec![Column {
            name: "(Intercept)".to_string(),
            term: None,
            source: ColumnSource::Intercept,
        }];
        for (i, &term) in terms.iter().enumerate() {
            if terms[..i].contains(&term) {
                return Err(DesignError::DuplicateTerm(term));
            }
            let levels: Vec<Level> = match term {
                Term::Region => Region::ALL.iter().map(|&r| Level::Region(r)).collect(),
                Term::RenovationGroup => RenovationGroup::ALL
                    .iter()
                    .map(|&g| Level::Renovation(g))
                    .collect(),
                _ => {
                    if term.numeric_value(first).is_none() {
                        return Err(DesignError::PrunedTerm(term));
                    }
                    columns.push(Column {
                        name: term.name().to_string(),
                        term: Some(term),
                        source: ColumnSource::Numeric(term),
                    });
                    continue;
                }
            };
            let present: Vec<Level> = levels
                .into_iter()
                .filter(|level| sales.iter().any(|s| level.matches(s)))
                .collect();
            for level in present.into_iter().skip(1) {
                let label = match level {
                    Level::Region(region) => region.to_string(),
                    Level::Renovation(group) => group.to_string(),
                };
                columns.push(Column {
                    name: format!("{}[{}]", term.name(), label),
                    term: Some(term),
                    source: ColumnSource::Indicator(level),
                });
            }
        }
        Ok(Self {
            terms: terms.to_vec(),
            columns,
        })
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Design-column indices belonging to `term` (empty for a categorical term
    /// with a single level present).
    pub fn columns_of(&self, term: Term) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.term == Some(term))
            .map(|(j, _)| j)
            .collect()
    }

    /// Builds the matrix for any sales sharing the training schema. Levels not
    /// seen when the layout was built fall into the baseline.
    pub fn matrix(&self, sales: &[DerivedSale]) -> Result<Array2<f64>, DesignError> {
        let mut x = Array2::<f64>::zeros((sales.len(), self.columns.len()));
        for (i, sale) in sales.iter().enumerate() {
            for (j, column) in self.columns.iter().enumerate() {
                x[[i, j]] = match column.source {
                    ColumnSource::Intercept => 1.0,
                    ColumnSource::Numeric(term) => term
                        .numeric_value(sale)
                        .ok_or(DesignError::PrunedTerm(term))?,
                    ColumnSource::Indicator(level) => f64::from(u8::from(level.matches(sale))),
                };
            }
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::features::{AreaField, derive_features};
    use crate::synthetic::SyntheticSalesBuilder;

    fn derived(n: usize) -> Vec<DerivedSale> {
        let sales = SyntheticSalesBuilder::new(n).seed(8).build();
        derive_features(&sales, &FeatureConfig::default())
            .unwrap()
            .sales
    }

    #[test]
    fn categorical_terms_expand_against_baseline() {
        let sales = derived(300);
        let layout =
            DesignLayout::new(&[Term::SqftLiving, Term::Region, Term::RenovationGroup], &sales)
                .unwrap();
        assert_eq!(
            layout.names(),
            vec![
                "(Intercept)",
                "sqft_living",
                "region[Suburb]",
                "region[Rural]",
                "renovation_group[Recently Renovated]",
                "renovation_group[Renovated Long Ago]",
            ]
        );
        assert_eq!(layout.columns_of(Term::Region), vec![2, 3]);

        let x = layout.matrix(&sales).unwrap();
        assert_eq!(x.dim(), (300, 6));
        for (row, sale) in x.rows().into_iter().zip(&sales) {
            assert_eq!(row[0], 1.0);
            assert_eq!(row[1], sale.sqft_living);
            let indicators = row[2] + row[3];
            assert_eq!(indicators, if sale.region == Region::City { 0.0 } else { 1.0 });
        }
    }

    #[test]
    fn absent_levels_get_no_column() {
        let sales: Vec<DerivedSale> = derived(200)
            .into_iter()
            .filter(|s| s.region != Region::City)
            .collect();
        let layout = DesignLayout::new(&[Term::Region], &sales).unwrap();
        assert_eq!(layout.names(), vec!["(Intercept)", "region[Rural]"]);
    }

    #[test]
    fn pruned_and_duplicate_terms_are_rejected() {
        let sales = derived(50);
        assert_eq!(
            DesignLayout::new(&[Term::SqftAbove], &sales).unwrap_err(),
            DesignError::PrunedTerm(Term::SqftAbove)
        );
        assert_eq!(
            DesignLayout::new(&[Term::Grade, Term::Grade], &sales).unwrap_err(),
            DesignError::DuplicateTerm(Term::Grade)
        );
    }

    #[test]
    fn candidates_follow_the_area_schema() {
        let sales = SyntheticSalesBuilder::new(100).seed(8).build();
        let dataset = derive_features(&sales, &FeatureConfig::default()).unwrap();
        let terms = continuous_candidates(&dataset.area_schema);
        assert!(terms.contains(&Term::SqftLot));
        assert!(!terms.contains(&Term::SqftAbove));
        assert!(!terms.contains(&Term::Price));
        assert_eq!(terms.len(), 17);
        assert!(dataset.area_schema.retains(AreaField::Living));
    }

    #[test]
    fn terms_use_snake_case_names() {
        let parsed: Vec<Term> =
            toml::from_str::<toml::Value>("t = [\"distance_to_downtown\", \"sqft_living15\"]")
                .unwrap()["t"]
                .clone()
                .try_into()
                .unwrap();
        assert_eq!(parsed, vec![Term::DistanceToDowntown, Term::SqftLiving15]);
        assert_eq!(Term::SqftLiving15.to_string(), "sqft_living15");
    }
}
