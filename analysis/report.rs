//! Human-readable rendering of an [`AnalysisReport`] and its file exports.

use crate::classify::{ClassificationEvaluation, ConfusionMatrix};
use crate::cleaning::CleaningSummary;
use crate::design::Term;
use crate::features::AreaField;
use crate::logistic::{DropReason, IrlsStatus, LikelihoodRatioTest};
use crate::ols::CoefficientRow;
use crate::pipeline::{AnalysisReport, PreferredModel};
use crate::refine::SensitivityRow;
use crate::selection::SelectionOutcome;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to write CSV export: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Failed to serialize summary to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Plain-text rendering of a report.
pub struct TextReport<'a>(pub &'a AnalysisReport);

pub fn render(report: &AnalysisReport) -> String {
    TextReport(report).to_string()
}

fn write_coefficients(f: &mut fmt::Formatter<'_>, rows: &[CoefficientRow], stat: &str) -> fmt::Result {
    writeln!(
        f,
        "  {:<40} {:>14} {:>12} {:>9} {:>10}",
        "term", "estimate", "std. error", stat, "p-value"
    )?;
    for row in rows {
        writeln!(
            f,
            "  {:<40} {:>14.6e} {:>12.4e} {:>9.3} {:>10.3e}",
            row.name, row.estimate, row.std_error, row.statistic, row.p_value
        )?;
    }
    Ok(())
}

fn write_confusion(f: &mut fmt::Formatter<'_>, threshold: f64, m: &ConfusionMatrix) -> fmt::Result {
    writeln!(
        f,
        "  p > {threshold:.2}: TP {:>5} FP {:>5} TN {:>5} FN {:>5} | accuracy {:.4} error {:.4} sensitivity {:.4} specificity {:.4}",
        m.true_positive,
        m.false_positive,
        m.true_negative,
        m.false_negative,
        m.accuracy(),
        m.error_rate(),
        m.sensitivity(),
        m.specificity()
    )
}

fn write_evaluation(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    evaluation: &ClassificationEvaluation,
) -> fmt::Result {
    writeln!(f, "{label} model on the test set (AUC {:.4}):", evaluation.roc.auc)?;
    write_confusion(f, evaluation.threshold, &evaluation.confusion)?;
    for (threshold, matrix) in &evaluation.sweep {
        write_confusion(f, *threshold, matrix)?;
    }
    Ok(())
}

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let CleaningSummary {
            loaded,
            corrected,
            removed,
            retained,
        } = report.cleaning;
        writeln!(f, "== Data ==")?;
        writeln!(
            f,
            "{loaded} sales loaded, {corrected} corrected, {removed} removed, {retained} retained; {} training / {} test",
            report.n_train, report.n_test
        )?;
        let schema = &report.area_schema;
        writeln!(f, "Area correlations (Pearson):")?;
        write!(f, "  {:<14}", "")?;
        for field in AreaField::ALL {
            write!(f, " {:>14}", field.name())?;
        }
        writeln!(f)?;
        for (i, field) in AreaField::ALL.iter().enumerate() {
            write!(f, "  {:<14}", field.name())?;
            for j in 0..AreaField::ALL.len() {
                write!(f, " {:>14.4}", schema.correlations[[i, j]])?;
            }
            writeln!(f)?;
        }
        writeln!(f, "Area fields pruned as redundant: {:?}", schema.dropped)?;

        let regression = &report.regression;
        writeln!(f, "\n== Price model ==")?;
        if let Some(search) = &regression.search {
            writeln!(f, "Best subsets ({:?} search):", search.strategy)?;
            writeln!(
                f,
                "  {:>4} {:>16} {:>12} {:>12} {:>14}  terms",
                "size", "RSS", "adj. R²", "Cp", "BIC"
            )?;
            for (i, score) in search.per_size.iter().enumerate() {
                let mut marks = String::new();
                if i == search.best_adjusted_r2 {
                    marks.push('a');
                }
                if i == search.best_cp {
                    marks.push('c');
                }
                if i == search.best_bic {
                    marks.push('b');
                }
                let names: Vec<&str> = score.terms.iter().map(|t| t.name()).collect();
                writeln!(
                    f,
                    "  {:>4} {:>16.6e} {:>12.6} {:>12.3} {:>14.3} {:<3} {}",
                    score.terms.len(),
                    score.rss,
                    score.adjusted_r2,
                    score.cp,
                    score.bic,
                    marks,
                    names.join(", ")
                )?;
            }
        }
        match &regression.outcome {
            Some(SelectionOutcome::Agreed(_)) => {
                writeln!(f, "Adjusted R², Cp and BIC agree on the predictor set.")?
            }
            Some(SelectionOutcome::Disagreed { .. }) => writeln!(
                f,
                "Adjusted R², Cp and BIC disagree; the configured resolution picked the predictor set."
            )?,
            None => writeln!(f, "Predictor set configured explicitly.")?,
        }
        let names: Vec<&str> = regression.terms.iter().map(|t| t.name()).collect();
        writeln!(f, "Predictors: {}", names.join(", "))?;

        let counts = regression.candidate_counts;
        writeln!(
            f,
            "Candidate diagnostics: |standardized| > 2: {}, |studentized| > 2: {}, leverage: {}, DFFITS: {}, Cook's D > 1: {}",
            counts.standardized, counts.studentized, counts.leverage, counts.dffits, counts.cooks_distance
        )?;
        let refinement = &regression.refinement;
        writeln!(
            f,
            "Removed {} training sales with the largest standardized residuals ({} -> {})",
            refinement.removed_ids.len(),
            refinement.n_before,
            refinement.n_after
        )?;
        let fit = &refinement.fit;
        writeln!(f, "Final model:")?;
        write_coefficients(f, &fit.coefficient_table(), "t")?;
        write!(
            f,
            "  residual SE {:.4} on {} df, R² {:.4}, adjusted R² {:.4}",
            fit.sigma2().sqrt(),
            fit.residual_df(),
            fit.r_squared(),
            fit.adjusted_r_squared()
        )?;
        match fit.f_statistic() {
            Some((stat, p)) => writeln!(f, ", F {stat:.3} (p = {p:.3e})")?,
            None => writeln!(f)?,
        }
        if !regression.sensitivity.is_empty() {
            writeln!(f, "Removal-count sensitivity:")?;
            writeln!(
                f,
                "  {:>8} {:>8} {:>14} {:>12} {:>14}",
                "removed", "n", "sqft_living", "adj. R²", "residual SE"
            )?;
            for SensitivityRow {
                removed,
                n_obs,
                sqft_living,
                adjusted_r2,
                residual_se,
                ..
            } in &regression.sensitivity
            {
                let slope = sqft_living.map_or_else(|| "-".to_string(), |s| format!("{s:.4}"));
                writeln!(
                    f,
                    "  {removed:>8} {n_obs:>8} {slope:>14} {adjusted_r2:>12.6} {residual_se:>14.4}"
                )?;
            }
        }
        let holdout = regression.holdout;
        writeln!(
            f,
            "Hold-out: RMSE {:.4}, R² {:.4} on {} test sales",
            holdout.rmse, holdout.r_squared, holdout.n_obs
        )?;

        let classification = &report.classification;
        writeln!(f, "\n== Good-quality classifier ==")?;
        for (label, model) in [("Full", &classification.full), ("Reduced", &classification.reduced)] {
            writeln!(
                f,
                "{label} model: {} coefficients, deviance {:.4} (null {:.4}), AIC {:.4}, {} IRLS iterations",
                model.n_coefficients(),
                model.deviance,
                model.null_deviance,
                model.aic(),
                model.iterations
            )?;
            if model.status != IrlsStatus::Converged {
                writeln!(f, "  fit status: {:?}", model.status)?;
            }
            write_coefficients(f, &model.coefficient_table(), "z")?;
        }
        writeln!(f, "Variance inflation (full model):")?;
        for entry in &classification.reduction.vif {
            writeln!(f, "  {:<24} {:>10.4}", entry.term.name(), entry.vif)?;
        }
        for (term, reason) in &classification.reduction.dropped {
            let why = match reason {
                DropReason::Collinear { vif } => format!("VIF {vif:.3}"),
                DropReason::Insignificant { p_value } => format!("p-value {p_value:.3e}"),
                DropReason::Manual => "configured".to_string(),
            };
            writeln!(f, "  dropped {} ({why})", term.name())?;
        }
        match &classification.lrt {
            Some(LikelihoodRatioTest {
                statistic,
                df,
                critical_value,
                p_value,
                reject_null,
            }) => writeln!(
                f,
                "Likelihood ratio test: Δ = {statistic:.4}, df = {df}, critical value {critical_value:.4}, p = {p_value:.3e}; dropped terms {} jointly zero",
                if *reject_null { "are not" } else { "may be" }
            )?,
            None => writeln!(f, "Likelihood ratio test: not applicable, nothing was dropped")?,
        }
        let preferred = match classification.preferred {
            PreferredModel::Full => "full",
            PreferredModel::Reduced => "reduced",
        };
        writeln!(f, "Preferred model: {preferred}")?;
        write_evaluation(f, "Full", &classification.full_evaluation)?;
        write_evaluation(f, "Reduced", &classification.reduced_evaluation)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    cleaning: CleaningSummary,
    n_train: usize,
    n_test: usize,
    area_fields_dropped: Vec<&'static str>,
    regression: RegressionSummary<'a>,
    classification: ClassificationSummary,
}

#[derive(Serialize)]
struct RegressionSummary<'a> {
    terms: Vec<&'static str>,
    removed_ids: &'a [i64],
    holdout_rmse: f64,
    holdout_r_squared: f64,
    coefficients: Vec<CoefficientRow>,
    sensitivity: &'a [SensitivityRow],
}

#[derive(Serialize)]
struct ClassificationSummary {
    full_terms: Vec<&'static str>,
    reduced_terms: Vec<&'static str>,
    preferred: PreferredModel,
    lrt: Option<LikelihoodRatioTest>,
    threshold: f64,
    full_accuracy: f64,
    full_auc: f64,
    reduced_accuracy: f64,
    reduced_auc: f64,
}

fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `summary.toml`, `roc_full.csv`, `roc_reduced.csv` and
/// `test_predictions.csv` into `dir`, creating it if needed.
pub fn write_outputs(report: &AnalysisReport, dir: &Path) -> Result<(), ReportError> {
    fs::create_dir_all(dir)?;
    let regression = &report.regression;
    let classification = &report.classification;
    let names = |terms: &[Term]| -> Vec<&'static str> { terms.iter().map(|t| t.name()).collect() };

    let summary = Summary {
        cleaning: report.cleaning,
        n_train: report.n_train,
        n_test: report.n_test,
        area_fields_dropped: report.area_schema.dropped.iter().map(|f| f.name()).collect(),
        regression: RegressionSummary {
            terms: names(&regression.terms),
            removed_ids: &regression.refinement.removed_ids,
            holdout_rmse: regression.holdout.rmse,
            holdout_r_squared: regression.holdout.r_squared,
            coefficients: regression.refinement.fit.coefficient_table(),
            sensitivity: &regression.sensitivity,
        },
        classification: ClassificationSummary {
            full_terms: names(classification.full.layout.terms()),
            reduced_terms: names(classification.reduced.layout.terms()),
            preferred: classification.preferred,
            lrt: classification.lrt,
            threshold: classification.full_evaluation.threshold,
            full_accuracy: classification.full_evaluation.confusion.accuracy(),
            full_auc: classification.full_evaluation.roc.auc,
            reduced_accuracy: classification.reduced_evaluation.confusion.accuracy(),
            reduced_auc: classification.reduced_evaluation.roc.auc,
        },
    };
    fs::write(dir.join("summary.toml"), toml::to_string_pretty(&summary)?)?;

    write_csv(
        &dir.join("roc_full.csv"),
        &classification.full_evaluation.roc.points,
    )?;
    write_csv(
        &dir.join("roc_reduced.csv"),
        &classification.reduced_evaluation.roc.points,
    )?;
    write_csv(&dir.join("test_predictions.csv"), &report.test_predictions)?;
    log::info!("Wrote summary and CSV exports to {}", dir.display());
    Ok(())
}
