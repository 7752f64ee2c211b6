//! Analysis configuration.
//!
//! The static data of the analysis (correction table, removal set, region
//! membership, renovation cutoff, downtown reference point) and every tuning
//! knob live in one TOML document. Every table has a default, so an empty file
//! is a valid configuration; unknown keys are rejected.

use crate::design::Term;
use crate::selection::{Resolution, SearchStrategy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Zip code {0} is listed in both the City and the Suburb sets.")]
    OverlappingRegionSets(u32),
    #[error("Configuration value '{field}' = {value} is out of range; expected {expected}.")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// One entry of the manual correction table. Either field may be absent, in
/// which case the loaded value is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Correction {
    pub id: i64,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleaningConfig {
    pub corrections: Vec<Correction>,
    /// Sales with anomalies that could not be verified.
    pub removals: Vec<i64>,
    /// Sales verified to be studios; only these may have zero bedrooms.
    pub studio_exceptions: Vec<i64>,
    /// Latest year a renovation may be recorded in.
    pub analysis_year: i32,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            corrections: Vec::new(),
            removals: Vec::new(),
            studio_exceptions: Vec::new(),
            analysis_year: 2015,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    pub city_zipcodes: Vec<u32>,
    pub suburb_zipcodes: Vec<u32>,
    /// Renovations in or after this year count as recent.
    pub recent_renovation_cutoff: i32,
    pub downtown: Coordinate,
    pub good_condition_above: u32,
    pub good_grade_above: u32,
    /// How many of lot/above/basement area are pruned against living area.
    pub area_fields_to_drop: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            city_zipcodes: vec![
                98101, 98102, 98103, 98104, 98105, 98106, 98107, 98108, 98109, 98112, 98115,
                98116, 98117, 98118, 98119, 98121, 98122, 98125, 98126, 98133, 98136, 98144,
                98199,
            ],
            suburb_zipcodes: vec![
                98001, 98002, 98003, 98004, 98005, 98006, 98007, 98008, 98011, 98023, 98027,
                98028, 98029, 98030, 98031, 98032, 98033, 98034, 98039, 98040, 98042, 98052,
                98053, 98055, 98056, 98058, 98059, 98072, 98074, 98075, 98077, 98092, 98146,
                98148, 98155, 98166, 98168, 98177, 98178, 98188, 98198,
            ],
            recent_renovation_cutoff: 2000,
            downtown: Coordinate {
                latitude: 47.6062,
                longitude: -122.3321,
            },
            good_condition_above: 3,
            good_grade_above: 7,
            area_fields_to_drop: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SplitConfig {
    pub seed: u64,
    pub train_fraction: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            train_fraction: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegressionConfig {
    pub search: SearchStrategy,
    /// Above this many candidate terms the search falls back to forward selection.
    pub max_exhaustive_terms: usize,
    pub resolution: Resolution,
    /// Explicit predictor set; bypasses best-subset selection when present.
    pub manual_terms: Option<Vec<Term>>,
    /// Explicit outlier removal count; defaults to the standardized-residual outlier count.
    pub outlier_removal: Option<usize>,
    pub sensitivity_counts: Vec<usize>,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            search: SearchStrategy::Exhaustive,
            max_exhaustive_terms: 20,
            resolution: Resolution::RequireAgreement,
            manual_terms: None,
            outlier_removal: None,
            sensitivity_counts: vec![0, 10, 25, 50, 100],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassificationConfig {
    /// Probability above which a sale is classified as good quality.
    pub threshold: f64,
    pub vif_threshold: f64,
    pub significance_level: f64,
    /// Quantile of the chi-squared reference used by the likelihood ratio test.
    pub lrt_level: f64,
    /// Explicit reduced predictor set; bypasses VIF/significance pruning when present.
    pub reduced_terms: Option<Vec<Term>>,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    pub threshold_sweep: Vec<f64>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            vif_threshold: 5.0,
            significance_level: 0.05,
            lrt_level: 0.95,
            reduced_terms: None,
            max_iterations: 50,
            convergence_tolerance: 1e-8,
            threshold_sweep: vec![0.3, 0.4, 0.5, 0.6, 0.7],
        }
    }
}

/// The complete analysis configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub cleaning: CleaningConfig,
    pub features: FeatureConfig,
    pub split: SplitConfig,
    pub regression: RegressionConfig,
    pub classification: ClassificationConfig,
}

impl AnalysisConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn from_toml_str(toml_string: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Range checks that do not depend on the data.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let split = &self.split;
        if !(split.train_fraction > 0.0 && split.train_fraction < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "split.train_fraction",
                value: split.train_fraction.to_string(),
                expected: "a fraction strictly between 0 and 1",
            });
        }
        if let Some(&zip) = self
            .features
            .city_zipcodes
            .iter()
            .find(|zip| self.features.suburb_zipcodes.contains(zip))
        {
            return Err(ConfigError::OverlappingRegionSets(zip));
        }
        if self.features.area_fields_to_drop > 3 {
            return Err(ConfigError::OutOfRange {
                field: "features.area_fields_to_drop",
                value: self.features.area_fields_to_drop.to_string(),
                expected: "at most 3 (living area is always kept)",
            });
        }
        let classification = &self.classification;
        let thresholds = std::iter::once(classification.threshold)
            .chain(classification.threshold_sweep.iter().copied());
        for threshold in thresholds {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::OutOfRange {
                    field: "classification.threshold",
                    value: threshold.to_string(),
                    expected: "a probability in [0, 1]",
                });
            }
        }
        if !(classification.lrt_level > 0.0 && classification.lrt_level < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "classification.lrt_level",
                value: classification.lrt_level.to_string(),
                expected: "a probability strictly between 0 and 1",
            });
        }
        if !(classification.significance_level > 0.0 && classification.significance_level < 1.0)
        {
            return Err(ConfigError::OutOfRange {
                field: "classification.significance_level",
                value: classification.significance_level.to_string(),
                expected: "a probability strictly between 0 and 1",
            });
        }
        if classification.max_iterations == 0 {
            return Err(ConfigError::OutOfRange {
                field: "classification.max_iterations",
                value: "0".to_string(),
                expected: "at least one iteration",
            });
        }
        Ok(())
    }
}
