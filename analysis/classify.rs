//! Classification metrics on the test partition: confusion matrices, ROC and AUC.

use crate::features::DerivedSale;
use crate::logistic::{LogisticError, LogisticFit};
use ndarray::{Array1, ArrayView1};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("{probabilities} probabilities were given for {labels} labels.")]
    LengthMismatch { probabilities: usize, labels: usize },
    #[error("The test labels contain only {0} sales; ROC and AUC need both classes.")]
    SingleClass(&'static str),
    #[error("The test partition is empty.")]
    EmptyTestSet,
    #[error(transparent)]
    Logistic(#[from] LogisticError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    /// A sale is predicted positive when its probability exceeds `threshold`.
    pub fn at_threshold(probabilities: ArrayView1<f64>, labels: ArrayView1<f64>, threshold: f64) -> Self {
        let mut matrix = Self::default();
        for (&p, &y) in probabilities.iter().zip(labels.iter()) {
            match (p > threshold, y == 1.0) {
                (true, true) => matrix.true_positive += 1,
                (true, false) => matrix.false_positive += 1,
                (false, false) => matrix.true_negative += 1,
                (false, true) => matrix.false_negative += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn predicted_positive(&self) -> usize {
        self.true_positive + self.false_positive
    }

    pub fn accuracy(&self) -> f64 {
        (self.true_positive + self.true_negative) as f64 / self.total() as f64
    }

    pub fn error_rate(&self) -> f64 {
        1.0 - self.accuracy()
    }

    /// True positive rate; NaN without positive labels.
    pub fn sensitivity(&self) -> f64 {
        self.true_positive as f64 / (self.true_positive + self.false_negative) as f64
    }

    /// True negative rate; NaN without negative labels.
    pub fn specificity(&self) -> f64 {
        self.true_negative as f64 / (self.true_negative + self.false_positive) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RocPoint {
    /// Sales with probability at or above this are positive; the first point uses +inf.
    pub threshold: f64,
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub points: Vec<RocPoint>,
    pub auc: f64,
}

/// ROC curve over every distinct probability, from (0, 0) to (1, 1), with the
/// trapezoidal area under it.
pub fn roc_curve(probabilities: ArrayView1<f64>, labels: ArrayView1<f64>) -> Result<RocCurve, ClassifyError> {
    if probabilities.len() != labels.len() {
        return Err(ClassifyError::LengthMismatch {
            probabilities: probabilities.len(),
            labels: labels.len(),
        });
    }
    let positives = labels.iter().filter(|&&y| y == 1.0).count();
    let negatives = labels.len() - positives;
    if positives == 0 {
        return Err(ClassifyError::SingleClass("negative"));
    }
    if negatives == 0 {
        return Err(ClassifyError::SingleClass("positive"));
    }

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    let mut points = vec![RocPoint {
        threshold: f64::INFINITY,
        false_positive_rate: 0.0,
        true_positive_rate: 0.0,
    }];
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < order.len() {
        let threshold = probabilities[order[i]];
        // Tied probabilities enter together.
        while i < order.len() && probabilities[order[i]] == threshold {
            if labels[order[i]] == 1.0 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        points.push(RocPoint {
            threshold,
            false_positive_rate: fp as f64 / negatives as f64,
            true_positive_rate: tp as f64 / positives as f64,
        });
    }

    let auc = points
        .windows(2)
        .map(|w| {
            (w[1].false_positive_rate - w[0].false_positive_rate)
                * (w[1].true_positive_rate + w[0].true_positive_rate)
                / 2.0
        })
        .sum();
    Ok(RocCurve { points, auc })
}

#[derive(Debug, Clone)]
pub struct ClassificationEvaluation {
    pub threshold: f64,
    pub confusion: ConfusionMatrix,
    pub sweep: Vec<(f64, ConfusionMatrix)>,
    pub roc: RocCurve,
    pub probabilities: Array1<f64>,
}

/// Scores a fitted model on the test sales at the fixed threshold and every
/// sweep threshold.
pub fn evaluate_classifier(
    fit: &LogisticFit,
    test: &[DerivedSale],
    labels: ArrayView1<f64>,
    threshold: f64,
    sweep: &[f64],
) -> Result<ClassificationEvaluation, ClassifyError> {
    if test.is_empty() {
        return Err(ClassifyError::EmptyTestSet);
    }
    let probabilities = fit.predict_proba(test)?;
    let roc = roc_curve(probabilities.view(), labels)?;
    let confusion = ConfusionMatrix::at_threshold(probabilities.view(), labels, threshold);
    let sweep = sweep
        .iter()
        .map(|&t| (t, ConfusionMatrix::at_threshold(probabilities.view(), labels, t)))
        .collect();
    log::info!(
        "Classifier with {} coefficients: accuracy = {:.4}, AUC = {:.4}",
        fit.n_coefficients(),
        confusion.accuracy(),
        roc.auc
    );
    Ok(ClassificationEvaluation {
        threshold,
        confusion,
        sweep,
        roc,
        probabilities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    #[test]
    fn confusion_matrix_by_hand() {
        let p = array![0.9, 0.6, 0.4, 0.2, 0.5];
        let y = array![1.0, 0.0, 1.0, 0.0, 1.0];
        let m = ConfusionMatrix::at_threshold(p.view(), y.view(), 0.5);
        assert_eq!(
            m,
            ConfusionMatrix {
                true_positive: 1,
                false_positive: 1,
                true_negative: 1,
                false_negative: 2,
            }
        );
        assert_abs_diff_eq!(m.accuracy(), 0.4);
        assert_abs_diff_eq!(m.error_rate(), 0.6);
        assert_abs_diff_eq!(m.sensitivity(), 1.0 / 3.0);
        assert_abs_diff_eq!(m.specificity(), 0.5);
    }

    #[test]
    fn predicted_positives_shrink_as_threshold_rises() {
        let mut rng = StdRng::seed_from_u64(3);
        let p: Array1<f64> = (0..200).map(|_| rng.gen_range(0.0..1.0)).collect();
        let y: Array1<f64> = (0..200).map(|_| f64::from(u8::from(rng.gen_bool(0.4)))).collect();
        let counts: Vec<usize> = [0.0, 0.2, 0.4, 0.5, 0.6, 0.8, 1.0]
            .iter()
            .map(|&t| ConfusionMatrix::at_threshold(p.view(), y.view(), t).predicted_positive())
            .collect();
        assert!(counts.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(counts[counts.len() - 1], 0);
    }

    #[test]
    fn perfect_ranking_has_unit_auc() {
        let p = array![0.9, 0.8, 0.3, 0.1];
        let y = array![1.0, 1.0, 0.0, 0.0];
        let roc = roc_curve(p.view(), y.view()).unwrap();
        assert_abs_diff_eq!(roc.auc, 1.0);
        let first = roc.points.first().unwrap();
        let last = roc.points.last().unwrap();
        assert_eq!((first.false_positive_rate, first.true_positive_rate), (0.0, 0.0));
        assert_eq!((last.false_positive_rate, last.true_positive_rate), (1.0, 1.0));
        assert!(roc.points.windows(2).all(|w| w[0].threshold > w[1].threshold));
    }

    #[test]
    fn constant_probabilities_give_half_auc() {
        let p = Array1::from_elem(10, 0.3);
        let y = array![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let roc = roc_curve(p.view(), y.view()).unwrap();
        assert_eq!(roc.auc, 0.5);
        assert_eq!(roc.points.len(), 2);
    }

    #[test]
    fn shuffled_labels_give_auc_near_half() {
        let mut rng = StdRng::seed_from_u64(12);
        let n = 4000;
        let p: Array1<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        let mut labels: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        labels.shuffle(&mut rng);
        let roc = roc_curve(p.view(), Array1::from(labels).view()).unwrap();
        assert!((roc.auc - 0.5).abs() < 0.05);
    }

    #[test]
    fn single_class_is_an_error() {
        let p = array![0.2, 0.7];
        let y = array![1.0, 1.0];
        assert!(matches!(
            roc_curve(p.view(), y.view()),
            Err(ClassifyError::SingleClass("positive"))
        ));
        assert!(matches!(
            roc_curve(p.view(), array![1.0].view()),
            Err(ClassifyError::LengthMismatch { .. })
        ));
    }
}
