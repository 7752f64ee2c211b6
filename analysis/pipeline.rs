//! Stage orchestration.
//!
//! Runs the fixed sequence: clean, derive features, split, fit and refine the
//! price model, score it on the test partition, then fit, reduce, compare and
//! score the good-quality classifiers. Every stage reads the output of the one
//! before it; nothing is shared or mutated across stages.

use crate::classify::{ClassificationEvaluation, ClassifyError, evaluate_classifier};
use crate::cleaning::{CleaningError, CleaningSummary, clean};
use crate::config::{AnalysisConfig, ConfigError};
use crate::data::{DataError, load_sales};
use crate::design::{Term, classification_terms, continuous_candidates};
use crate::diagnostics::OutlierCounts;
use crate::evaluate::{EvaluateError, HoldoutMetrics, evaluate_holdout};
use crate::features::{AreaSchema, DerivedSale, FeatureError, derive_features, quality_labels};
use crate::logistic::{
    IrlsOptions, LikelihoodRatioTest, LogisticError, LogisticFit, ReducedSelection,
    fit_logistic, likelihood_ratio_test, reduce_terms,
};
use crate::ols::{OlsError, OlsFit, fit_ols};
use crate::record::HouseSale;
use crate::refine::{RefineError, Refinement, SensitivityRow, refine, removal_sensitivity};
use crate::selection::{SelectionError, SelectionOutcome, SubsetSearch, best_subsets};
use crate::split::{SplitError, train_test_split};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Data loading failed: {0}")]
    Data(#[from] DataError),
    #[error("Data cleaning failed: {0}")]
    Cleaning(#[from] CleaningError),
    #[error("Feature derivation failed: {0}")]
    Features(#[from] FeatureError),
    #[error("Train/test split failed: {0}")]
    Split(#[from] SplitError),
    #[error("Model selection failed: {0}")]
    Selection(#[from] SelectionError),
    #[error("Price model fit failed: {0}")]
    Ols(#[from] OlsError),
    #[error("Outlier refinement failed: {0}")]
    Refine(#[from] RefineError),
    #[error("Hold-out evaluation failed: {0}")]
    Evaluate(#[from] EvaluateError),
    #[error("Logistic model failed: {0}")]
    Logistic(#[from] LogisticError),
    #[error("Classifier evaluation failed: {0}")]
    Classify(#[from] ClassifyError),
}

#[derive(Debug, Clone)]
pub struct RegressionReport {
    /// `None` when the predictor set was configured explicitly.
    pub search: Option<SubsetSearch>,
    pub outcome: Option<SelectionOutcome>,
    pub terms: Vec<Term>,
    pub candidate: OlsFit,
    pub candidate_counts: OutlierCounts,
    pub refinement: Refinement,
    pub sensitivity: Vec<SensitivityRow>,
    pub holdout: HoldoutMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreferredModel {
    Full,
    Reduced,
}

#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub full: LogisticFit,
    pub reduced: LogisticFit,
    pub reduction: ReducedSelection,
    /// `None` when the reduced model drops nothing.
    pub lrt: Option<LikelihoodRatioTest>,
    pub preferred: PreferredModel,
    pub full_evaluation: ClassificationEvaluation,
    pub reduced_evaluation: ClassificationEvaluation,
}

/// One test sale with every model's prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestPrediction {
    pub id: i64,
    pub price: f64,
    pub predicted_price: f64,
    pub good_quality: bool,
    pub probability_full: f64,
    pub probability_reduced: f64,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub cleaning: CleaningSummary,
    pub area_schema: AreaSchema,
    pub n_train: usize,
    pub n_test: usize,
    pub regression: RegressionReport,
    pub classification: ClassificationReport,
    pub test_predictions: Vec<TestPrediction>,
}

/// Loads the sales table at `path` and runs the whole analysis.
pub fn run_from_path(
    path: &Path,
    delimiter: u8,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, PipelineError> {
    config.validate()?;
    let sales = load_sales(path, delimiter)?;
    run_analysis(sales, config)
}

pub fn run_analysis(
    sales: Vec<HouseSale>,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, PipelineError> {
    config.validate()?;
    let (sales, cleaning) = clean(sales, &config.cleaning)?;
    let dataset = derive_features(&sales, &config.features)?;

    let split = train_test_split(
        dataset.sales.len(),
        config.split.train_fraction,
        config.split.seed,
    )?;
    let (train, test) = split.apply(&dataset.sales);

    let regression = run_regression(&dataset.area_schema, &train, &test, config)?;
    let classification = run_classification(&train, &test, config)?;

    let predicted_prices = regression.refinement.fit.predict(&test)?;
    let test_predictions = test
        .iter()
        .enumerate()
        .map(|(i, sale)| TestPrediction {
            id: sale.id,
            price: sale.price,
            predicted_price: predicted_prices[i],
            good_quality: sale.good_quality,
            probability_full: classification.full_evaluation.probabilities[i],
            probability_reduced: classification.reduced_evaluation.probabilities[i],
        })
        .collect();

    Ok(AnalysisReport {
        cleaning,
        area_schema: dataset.area_schema,
        n_train: train.len(),
        n_test: test.len(),
        regression,
        classification,
        test_predictions,
    })
}

fn run_regression(
    schema: &AreaSchema,
    train: &[DerivedSale],
    test: &[DerivedSale],
    config: &AnalysisConfig,
) -> Result<RegressionReport, PipelineError> {
    let settings = &config.regression;
    let (search, outcome, terms) = match &settings.manual_terms {
        Some(terms) => {
            log::info!("Using configured price predictors {terms:?}");
            (None, None, terms.clone())
        }
        None => {
            let candidates = continuous_candidates(schema);
            let search = best_subsets(
                &candidates,
                train,
                settings.search,
                settings.max_exhaustive_terms,
            )?;
            let outcome = search.outcome();
            let terms = search.resolve(settings.resolution)?;
            log::info!("Selected price predictors {terms:?}");
            (Some(search), Some(outcome), terms)
        }
    };

    let candidate = fit_ols(&terms, train)?;
    let refinement = refine(&candidate, train, settings.outlier_removal.into())?;
    let sensitivity = removal_sensitivity(&candidate, train, &settings.sensitivity_counts)?;
    let holdout = evaluate_holdout(&refinement.fit, test)?;

    Ok(RegressionReport {
        search,
        outcome,
        terms,
        candidate_counts: refinement.counts,
        candidate,
        refinement,
        sensitivity,
        holdout,
    })
}

fn run_classification(
    train: &[DerivedSale],
    test: &[DerivedSale],
    config: &AnalysisConfig,
) -> Result<ClassificationReport, PipelineError> {
    let settings = &config.classification;
    let options = IrlsOptions::from(settings);
    let train_labels = quality_labels(train);
    let test_labels = quality_labels(test);

    let full = fit_logistic(&classification_terms(), train, train_labels.view(), options)?;
    let reduction = reduce_terms(&full, train, settings)?;
    let reduced = if reduction.dropped.is_empty() {
        full.clone()
    } else {
        fit_logistic(&reduction.terms, train, train_labels.view(), options)?
    };

    let lrt = likelihood_ratio_test(&full, &reduced, settings.lrt_level)?;
    let preferred = match &lrt {
        Some(test) if test.reject_null => PreferredModel::Full,
        Some(_) => PreferredModel::Reduced,
        None => PreferredModel::Full,
    };
    if let Some(test) = &lrt {
        log::info!(
            "Likelihood ratio test: Δ = {:.4} on {} df, critical value {:.4}; {:?} model preferred",
            test.statistic,
            test.df,
            test.critical_value,
            preferred
        );
    }

    let evaluate = |fit: &LogisticFit| {
        evaluate_classifier(
            fit,
            test,
            test_labels.view(),
            settings.threshold,
            &settings.threshold_sweep,
        )
    };
    let full_evaluation = evaluate(&full)?;
    let reduced_evaluation = evaluate(&reduced)?;

    Ok(ClassificationReport {
        full,
        reduced,
        reduction,
        lrt,
        preferred,
        full_evaluation,
        reduced_evaluation,
    })
}
