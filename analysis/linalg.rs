//! Bridge between `ndarray` storage and `faer` factorizations, plus the
//! column-scaled weighted least-squares solve shared by the linear and
//! logistic models.

use faer::diag::DiagRef;
use faer::linalg::solvers::{self, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix1, Ix2, Zip};
use thiserror::Error;

/// Squared Cholesky pivots of the scaled Gram matrix below this are rank deficient.
pub const RANK_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error(
        "Design matrix is rank deficient: column {column} is constant or a linear combination of the others."
    )]
    RankDeficient { column: usize },
    #[error("Dimension mismatch: design has {rows} rows but {what} has length {len}.")]
    DimensionMismatch {
        rows: usize,
        what: &'static str,
        len: usize,
    },
    #[error("Design matrix has no columns.")]
    EmptyDesign,
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl FaerStorage<'_> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// A `faer` view of an `ndarray` matrix, borrowing when the memory layout allows.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_row_major_slice(slice, array.nrows(), array.ncols()),
            ),
            Some(slice) if array.t().is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_column_major_slice(slice, array.nrows(), array.ncols()),
            ),
            _ => {
                let (rows, cols) = array.dim();
                FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
            }
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

pub struct FaerColView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerColView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix1>) -> Self {
        let len = array.len();
        let storage = if let Some(slice) = array.as_slice() {
            FaerStorage::Borrowed(MatRef::from_row_major_slice(slice, len, 1))
        } else {
            FaerStorage::Owned(Mat::from_fn(len, 1, |i, _| array[i]))
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let rhs_view = FaerColView::new(rhs);
        let sol = self.factor.solve(rhs_view.as_ref());
        Array1::from_shape_fn(rhs.len(), |i| sol[(i, 0)])
    }

    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let rhs_view = FaerArrayView::new(rhs);
        let sol = self.factor.solve(rhs_view.as_ref());
        mat_to_array(sol.as_ref())
    }

    /// Diagonal of the lower factor `L`.
    pub fn diag(&self) -> Array1<f64> {
        diag_to_array(self.factor.L().diagonal())
    }

    pub fn inverse(&self) -> Array2<f64> {
        let n = self.factor.L().nrows();
        self.solve_mat(&Array2::eye(n))
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, LinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, LinalgError> {
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(LinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}

/// Cholesky of a Gram matrix whose columns were scaled to unit weighted norm,
/// failing on the first pivot that signals rank deficiency.
pub fn rank_checked_cholesky(gram: &Array2<f64>) -> Result<FaerCholeskyFactor, LinalgError> {
    let factor = gram.cholesky(Side::Lower).map_err(|_| {
        // faer only reports failure; locate the offending column by pivoting manually.
        LinalgError::RankDeficient {
            column: first_dependent_column(gram),
        }
    })?;
    if let Some(column) = factor.diag().iter().position(|&l| l * l < RANK_TOLERANCE) {
        return Err(LinalgError::RankDeficient { column });
    }
    Ok(factor)
}

fn first_dependent_column(gram: &Array2<f64>) -> usize {
    let all: Vec<usize> = (0..gram.nrows()).collect();
    match principal_cholesky(gram, &all, RANK_TOLERANCE) {
        Err(column) => column,
        Ok(_) => gram.nrows().saturating_sub(1),
    }
}

/// Lower Cholesky factor of the principal submatrix `gram[columns, columns]`,
/// in the order `columns` lists them. `Err(j)` names the first position whose
/// squared pivot falls below `tolerance`.
///
/// Small dense loop used where a faer factorization per call would dominate,
/// such as scoring every subset of a candidate pool.
pub fn principal_cholesky(
    gram: &Array2<f64>,
    columns: &[usize],
    tolerance: f64,
) -> Result<Array2<f64>, usize> {
    let p = columns.len();
    let mut l = Array2::<f64>::zeros((p, p));
    for j in 0..p {
        let mut d = gram[[columns[j], columns[j]]];
        for k in 0..j {
            d -= l[[j, k]] * l[[j, k]];
        }
        if !(d >= tolerance) {
            return Err(j);
        }
        let d = d.sqrt();
        l[[j, j]] = d;
        for i in (j + 1)..p {
            let mut s = gram[[columns[i], columns[j]]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / d;
        }
    }
    Ok(l)
}

/// Solves `L z = b` for lower-triangular `L`.
pub fn forward_substitute(l: &Array2<f64>, b: &[f64]) -> Array1<f64> {
    let p = b.len();
    let mut z = Array1::<f64>::zeros(p);
    for i in 0..p {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }
    z
}

/// Result of a weighted least-squares solve.
#[derive(Debug, Clone)]
pub struct WeightedSolve {
    pub coefficients: Array1<f64>,
    /// `(X'WX)^-1` in the original column units.
    pub xtwx_inverse: Array2<f64>,
    /// Diagonal of the weighted hat matrix `W^(1/2) X (X'WX)^-1 X' W^(1/2)`.
    pub leverage: Array1<f64>,
}

/// Solves `min sum w_i (y_i - x_i'b)^2` through the Cholesky factor of the
/// column-scaled Gram matrix. `weights = None` means unit weights.
pub fn weighted_least_squares(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
) -> Result<WeightedSolve, LinalgError> {
    let (n, p) = x.dim();
    if p == 0 {
        return Err(LinalgError::EmptyDesign);
    }
    if y.len() != n {
        return Err(LinalgError::DimensionMismatch {
            rows: n,
            what: "response",
            len: y.len(),
        });
    }
    let w = match weights {
        Some(w) if w.len() != n => {
            return Err(LinalgError::DimensionMismatch {
                rows: n,
                what: "weights",
                len: w.len(),
            });
        }
        Some(w) => w.to_owned(),
        None => Array1::ones(n),
    };

    // Column scales: weighted Euclidean norm of every column.
    let scale: Array1<f64> = x
        .axis_iter(Axis(1))
        .map(|col| col.iter().zip(&w).map(|(v, wi)| wi * v * v).sum::<f64>().sqrt())
        .collect();
    if let Some(column) = scale.iter().position(|&s| !(s > 0.0) || !s.is_finite()) {
        return Err(LinalgError::RankDeficient { column });
    }
    let z = &x / &scale.view().insert_axis(Axis(0));
    let wz = &z * &w.view().insert_axis(Axis(1));

    let gram = z.t().dot(&wz);
    let factor = rank_checked_cholesky(&gram)?;
    let rhs = wz.t().dot(&y);
    let scaled_coefficients = factor.solve_vec(&rhs);
    let gram_inverse = factor.inverse();

    let coefficients = &scaled_coefficients / &scale;
    let outer_scale = scale
        .view()
        .insert_axis(Axis(1))
        .dot(&scale.view().insert_axis(Axis(0)));
    let xtwx_inverse = &gram_inverse / &outer_scale;

    let zg = z.dot(&gram_inverse);
    let mut leverage = Array1::<f64>::zeros(n);
    Zip::from(&mut leverage)
        .and(zg.rows())
        .and(z.rows())
        .and(&w)
        .for_each(|h, a, b, &wi| *h = wi * a.dot(&b));

    Ok(WeightedSolve {
        coefficients,
        xtwx_inverse,
        leverage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn recovers_exact_line() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];
        let solve = weighted_least_squares(x.view(), y.view(), None).unwrap();
        assert_abs_diff_eq!(solve.coefficients[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(solve.coefficients[1], 2.0, epsilon = 1e-10);
        // Hat matrix trace equals the column count.
        assert_abs_diff_eq!(solve.leverage.sum(), 2.0, epsilon = 1e-10);
    }

    #[test]
    fn inverse_matches_closed_form() {
        let x = array![[1.0, 1.0], [1.0, 2.0], [1.0, 4.0]];
        let y = array![0.0, 1.0, 2.0];
        let solve = weighted_least_squares(x.view(), y.view(), None).unwrap();
        // X'X = [[3, 7], [7, 21]], det = 14.
        let expected = array![[21.0 / 14.0, -7.0 / 14.0], [-7.0 / 14.0, 3.0 / 14.0]];
        for (a, b) in solve.xtwx_inverse.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn weights_change_the_fit() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0]];
        let y = array![0.0, 1.0, 5.0];
        let unweighted = weighted_least_squares(x.view(), y.view(), None).unwrap();
        let w = array![1.0, 1.0, 100.0];
        let weighted = weighted_least_squares(x.view(), y.view(), Some(w.view())).unwrap();
        assert!(weighted.coefficients[1] > unweighted.coefficients[1]);
    }

    #[test]
    fn principal_cholesky_of_a_column_subset() {
        let gram = array![[4.0, 2.0, 9.0], [2.0, 2.0, 9.0], [9.0, 9.0, 9.0]];
        let l = principal_cholesky(&gram, &[0, 1], RANK_TOLERANCE).unwrap();
        let expected = array![[2.0, 0.0], [1.0, 1.0]];
        for (a, b) in l.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }

        let z = forward_substitute(&l, &[2.0, 3.0]);
        assert_abs_diff_eq!(z[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z[1], 2.0, epsilon = 1e-12);

        // Repeating a column makes its second pivot vanish.
        assert_eq!(principal_cholesky(&gram, &[1, 0, 1], RANK_TOLERANCE), Err(2));
        assert!(principal_cholesky(&gram, &[], RANK_TOLERANCE).unwrap().is_empty());
    }

    #[test]
    fn duplicated_column_is_rank_deficient() {
        let x = array![[1.0, 2.0, 4.0], [1.0, 3.0, 6.0], [1.0, 5.0, 10.0], [1.0, 7.0, 14.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];
        let err = weighted_least_squares(x.view(), y.view(), None).unwrap_err();
        assert!(matches!(err, LinalgError::RankDeficient { column: 2 }));
    }

    #[test]
    fn zero_column_is_rank_deficient() {
        let x = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]];
        let y = array![1.0, 2.0, 3.0];
        let err = weighted_least_squares(x.view(), y.view(), None).unwrap_err();
        assert!(matches!(err, LinalgError::RankDeficient { column: 1 }));
    }
}
