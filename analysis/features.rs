//! Feature derivation.
//!
//! Adds the sale year and month, a region bucket from the zip code, a
//! renovation-recency bucket, the Euclidean (degree-space) distance to the
//! downtown reference point and the good-quality label. It also makes the
//! one-time schema decision of which area sub-fields are redundant against
//! living area, and removes them from every derived record.

use crate::config::{Coordinate, FeatureConfig};
use crate::diagnostics::{correlation_matrix, pearson_correlation};
use crate::record::HouseSale;
use ahash::AHashSet;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("Zip code {0} is listed as both City and Suburb; region bucketing would be ambiguous.")]
    OverlappingRegionSets(u32),
    #[error("Area field '{0}' is constant, so its redundancy against living area is undefined.")]
    ConstantAreaField(AreaField),
    #[error("Cannot derive features from an empty sales table.")]
    NoSales,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    City,
    Suburb,
    Rural,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::City, Region::Suburb, Region::Rural];
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Region::City => "City",
            Region::Suburb => "Suburb",
            Region::Rural => "Rural",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RenovationGroup {
    Never,
    Recent,
    LongAgo,
}

impl RenovationGroup {
    pub const ALL: [RenovationGroup; 3] = [
        RenovationGroup::Never,
        RenovationGroup::Recent,
        RenovationGroup::LongAgo,
    ];

    /// A renovation in or after `cutoff` is recent; `0` means never renovated.
    pub fn classify(yr_renovated: i32, cutoff: i32) -> Self {
        if yr_renovated >= cutoff {
            RenovationGroup::Recent
        } else if yr_renovated == 0 {
            RenovationGroup::Never
        } else {
            RenovationGroup::LongAgo
        }
    }
}

impl fmt::Display for RenovationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RenovationGroup::Never => "Never Renovated",
            RenovationGroup::Recent => "Recently Renovated",
            RenovationGroup::LongAgo => "Renovated Long Ago",
        })
    }
}

/// The four area measurements of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AreaField {
    Living,
    Lot,
    Above,
    Basement,
}

impl AreaField {
    pub const ALL: [AreaField; 4] = [
        AreaField::Living,
        AreaField::Lot,
        AreaField::Above,
        AreaField::Basement,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AreaField::Living => "sqft_living",
            AreaField::Lot => "sqft_lot",
            AreaField::Above => "sqft_above",
            AreaField::Basement => "sqft_basement",
        }
    }

    fn value(self, sale: &HouseSale) -> f64 {
        match self {
            AreaField::Living => sale.sqft_living,
            AreaField::Lot => sale.sqft_lot,
            AreaField::Above => sale.sqft_above,
            AreaField::Basement => sale.sqft_basement,
        }
    }
}

impl fmt::Display for AreaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The multicollinearity decision over the area fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaSchema {
    /// Pearson correlations in [`AreaField::ALL`] order.
    pub correlations: Array2<f64>,
    pub retained: Vec<AreaField>,
    pub dropped: Vec<AreaField>,
}

impl AreaSchema {
    pub fn retains(&self, field: AreaField) -> bool {
        self.retained.contains(&field)
    }
}

/// A cleaned sale with its derived fields. Pruned area fields are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedSale {
    pub id: i64,
    pub price: f64,
    pub bedrooms: u32,
    pub bathrooms: f64,
    pub sqft_living: f64,
    pub sqft_lot: Option<f64>,
    pub sqft_above: Option<f64>,
    pub sqft_basement: Option<f64>,
    pub floors: f64,
    pub waterfront: bool,
    pub view: u32,
    pub condition: u32,
    pub grade: u32,
    pub yr_built: i32,
    pub yr_renovated: i32,
    pub zipcode: u32,
    pub lat: f64,
    pub long: f64,
    pub sqft_living15: f64,
    pub sqft_lot15: f64,
    pub year_sold: i32,
    pub month_sold: u32,
    pub region: Region,
    pub renovation_group: RenovationGroup,
    pub distance_to_downtown: f64,
    pub good_quality: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedDataset {
    pub sales: Vec<DerivedSale>,
    pub area_schema: AreaSchema,
}

/// Static zip-code membership for the City and Suburb buckets.
#[derive(Debug, Clone)]
pub struct RegionBuckets {
    city: AHashSet<u32>,
    suburb: AHashSet<u32>,
}

impl RegionBuckets {
    /// Fails if a zip code is in both sets.
    pub fn from_config(config: &FeatureConfig) -> Result<Self, FeatureError> {
        let city: AHashSet<u32> = config.city_zipcodes.iter().copied().collect();
        let suburb: AHashSet<u32> = config.suburb_zipcodes.iter().copied().collect();
        let mut overlap: Vec<u32> = city.intersection(&suburb).copied().collect();
        overlap.sort_unstable();
        if let Some(&zip) = overlap.first() {
            return Err(FeatureError::OverlappingRegionSets(zip));
        }
        Ok(Self { city, suburb })
    }

    pub fn classify(&self, zipcode: u32) -> Region {
        if self.city.contains(&zipcode) {
            Region::City
        } else if self.suburb.contains(&zipcode) {
            Region::Suburb
        } else {
            Region::Rural
        }
    }
}

pub fn distance_to(reference: Coordinate, lat: f64, long: f64) -> f64 {
    (lat - reference.latitude).hypot(long - reference.longitude)
}

pub fn is_good_quality(condition: u32, grade: u32, config: &FeatureConfig) -> bool {
    condition > config.good_condition_above && grade > config.good_grade_above
}

/// The binary good-quality response as 0/1, identically for any subset.
pub fn quality_labels(sales: &[DerivedSale]) -> Array1<f64> {
    sales
        .iter()
        .map(|s| if s.good_quality { 1.0 } else { 0.0 })
        .collect()
}

/// Decides which of lot/above/basement area to drop: the ones most correlated
/// (in absolute value) with living area.
pub fn area_schema(sales: &[HouseSale], n_drop: usize) -> Result<AreaSchema, FeatureError> {
    let n = sales.len();
    let mut columns = Array2::<f64>::zeros((n, AreaField::ALL.len()));
    for (j, field) in AreaField::ALL.iter().enumerate() {
        for (i, sale) in sales.iter().enumerate() {
            columns[[i, j]] = field.value(sale);
        }
    }

    let living = columns.column(0);
    let mut redundancy: Vec<(AreaField, f64)> = Vec::with_capacity(3);
    for (j, &field) in AreaField::ALL.iter().enumerate().skip(1) {
        let r = pearson_correlation(living, columns.column(j))
            .ok_or(FeatureError::ConstantAreaField(field))?;
        redundancy.push((field, r.abs()));
    }
    redundancy.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut dropped: Vec<AreaField> = redundancy.iter().take(n_drop).map(|(f, _)| *f).collect();
    dropped.sort();
    let retained = AreaField::ALL
        .iter()
        .copied()
        .filter(|f| !dropped.contains(f))
        .collect();

    Ok(AreaSchema {
        correlations: correlation_matrix(columns.view()),
        retained,
        dropped,
    })
}

/// Derives every feature for the cleaned sales.
pub fn derive_features(
    sales: &[HouseSale],
    config: &FeatureConfig,
) -> Result<DerivedDataset, FeatureError> {
    if sales.is_empty() {
        return Err(FeatureError::NoSales);
    }
    let buckets = RegionBuckets::from_config(config)?;
    let schema = area_schema(sales, config.area_fields_to_drop)?;
    log::info!(
        "Area fields retained: {:?}; pruned as redundant with living area: {:?}",
        schema.retained,
        schema.dropped
    );

    let keep = |field: AreaField, value: f64| schema.retains(field).then_some(value);
    let derived = sales
        .iter()
        .map(|sale| DerivedSale {
            id: sale.id,
            price: sale.price,
            bedrooms: sale.bedrooms,
            bathrooms: sale.bathrooms,
            sqft_living: sale.sqft_living,
            sqft_lot: keep(AreaField::Lot, sale.sqft_lot),
            sqft_above: keep(AreaField::Above, sale.sqft_above),
            sqft_basement: keep(AreaField::Basement, sale.sqft_basement),
            floors: sale.floors,
            waterfront: sale.waterfront,
            view: sale.view,
            condition: sale.condition,
            grade: sale.grade,
            yr_built: sale.yr_built,
            yr_renovated: sale.yr_renovated,
            zipcode: sale.zipcode,
            lat: sale.lat,
            long: sale.long,
            sqft_living15: sale.sqft_living15,
            sqft_lot15: sale.sqft_lot15,
            year_sold: sale.sale_year,
            month_sold: sale.sale_month,
            region: buckets.classify(sale.zipcode),
            renovation_group: RenovationGroup::classify(
                sale.yr_renovated,
                config.recent_renovation_cutoff,
            ),
            distance_to_downtown: distance_to(config.downtown, sale.lat, sale.long),
            good_quality: is_good_quality(sale.condition, sale.grade, config),
        })
        .collect();

    Ok(DerivedDataset {
        sales: derived,
        area_schema: schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticSalesBuilder;
    use approx::assert_abs_diff_eq;

    #[test]
    fn region_is_total_and_ordered() {
        let config = FeatureConfig::default();
        let buckets = RegionBuckets::from_config(&config).unwrap();
        assert_eq!(buckets.classify(98103), Region::City);
        assert_eq!(buckets.classify(98004), Region::Suburb);
        assert_eq!(buckets.classify(98022), Region::Rural);
        assert_eq!(buckets.classify(0), Region::Rural);
        for zip in 98000..98300 {
            let region = buckets.classify(zip);
            let expected = usize::from(config.city_zipcodes.contains(&zip))
                + usize::from(config.suburb_zipcodes.contains(&zip));
            assert!(expected <= 1);
            assert!(Region::ALL.contains(&region));
        }
    }

    #[test]
    fn overlapping_region_sets_are_rejected() {
        let mut config = FeatureConfig::default();
        config.suburb_zipcodes.push(98103);
        assert_eq!(
            RegionBuckets::from_config(&config).unwrap_err(),
            FeatureError::OverlappingRegionSets(98103)
        );
    }

    #[test]
    fn renovation_cutoff_takes_precedence() {
        assert_eq!(RenovationGroup::classify(0, 2000), RenovationGroup::Never);
        assert_eq!(RenovationGroup::classify(2000, 2000), RenovationGroup::Recent);
        assert_eq!(RenovationGroup::classify(2014, 2000), RenovationGroup::Recent);
        assert_eq!(RenovationGroup::classify(1999, 2000), RenovationGroup::LongAgo);
        // A zero cutoff sends every sale to the recent bucket.
        assert_eq!(RenovationGroup::classify(0, 0), RenovationGroup::Recent);
    }

    #[test]
    fn distance_is_euclidean_in_degrees() {
        let downtown = FeatureConfig::default().downtown;
        assert_eq!(distance_to(downtown, 47.6062, -122.3321), 0.0);
        assert_abs_diff_eq!(
            distance_to(downtown, 47.6062 + 0.3, -122.3321 - 0.4),
            0.5,
            epsilon = 1e-12
        );
        assert!(distance_to(downtown, 40.0, -100.0) >= 0.0);
    }

    #[test]
    fn good_quality_needs_both_scores() {
        let config = FeatureConfig::default();
        assert!(is_good_quality(4, 8, &config));
        assert!(!is_good_quality(3, 8, &config));
        assert!(!is_good_quality(4, 7, &config));
        assert!(!is_good_quality(5, 3, &config));
    }

    #[test]
    fn above_and_basement_are_pruned() {
        let sales = SyntheticSalesBuilder::new(500).seed(2).build();
        let dataset = derive_features(&sales, &FeatureConfig::default()).unwrap();
        let schema = &dataset.area_schema;
        assert_eq!(schema.dropped, vec![AreaField::Above, AreaField::Basement]);
        assert_eq!(schema.retained, vec![AreaField::Living, AreaField::Lot]);
        assert_abs_diff_eq!(schema.correlations[[0, 0]], 1.0, epsilon = 1e-12);
        assert!(dataset.sales.iter().all(|s| s.sqft_above.is_none()
            && s.sqft_basement.is_none()
            && s.sqft_lot.is_some()));
    }

    #[test]
    fn derived_fields_follow_their_rules() {
        let sales = SyntheticSalesBuilder::new(200).seed(4).build();
        let config = FeatureConfig::default();
        let dataset = derive_features(&sales, &config).unwrap();
        for (raw, derived) in sales.iter().zip(&dataset.sales) {
            assert_eq!(derived.year_sold, raw.sale_year);
            assert_eq!(derived.month_sold, raw.sale_month);
            assert_eq!(
                derived.good_quality,
                raw.condition > 3 && raw.grade > 7
            );
            assert_eq!(
                derived.renovation_group,
                RenovationGroup::classify(raw.yr_renovated, 2000)
            );
            assert!(derived.distance_to_downtown >= 0.0);
        }
        let labels = quality_labels(&dataset.sales);
        assert_eq!(
            labels.sum() as usize,
            dataset.sales.iter().filter(|s| s.good_quality).count()
        );
    }
}
