use crate::errors::CrossValidationError;
use crate::linalg::faer_ndarray::{FaerCholesky, FaerCholeskyFactor};
use crate::linalg::utils::submatrix;
use faer::Side;
use ndarray::{Array1, Array2, ArrayView2};

/// Cholesky factor of a posterior covariance Σ together with its precision Σ⁻¹.
///
/// All solves against Σ go through the factor; the explicit precision is kept
/// because the cross-validation identities read its diagonal and its blocks.
pub struct Precision {
    factor: FaerCholeskyFactor,
    precision: Array2<f64>,
}

impl Precision {
    pub fn from_covariance(covariance: ArrayView2<'_, f64>) -> Result<Self, CrossValidationError> {
        let factor = covariance.cholesky(Side::Lower).map_err(|e| {
            CrossValidationError::NonPositiveDefinite {
                context: format!("posterior covariance ({e})"),
            }
        })?;
        let precision = factor.inverse();
        Ok(Self { factor, precision })
    }

    pub fn dim(&self) -> usize {
        self.precision.nrows()
    }

    /// Σ⁻¹
    pub fn matrix(&self) -> &Array2<f64> {
        &self.precision
    }

    pub fn diag(&self) -> Array1<f64> {
        self.precision.diag().to_owned()
    }

    /// Σ⁻¹ B
    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        self.factor.solve_mat(rhs)
    }

    /// Σ⁻¹ b
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        self.factor.solve_vec(rhs)
    }

    /// `(Σ⁻¹)[V, V]`
    pub fn submatrix(&self, indices: &[usize]) -> Array2<f64> {
        submatrix(&self.precision, indices)
    }

    /// `((Σ⁻¹)[V, V])⁻¹`: the covariance of y[V] given every observation outside V.
    ///
    /// This inverts a block of the precision matrix, not the block Σ[V, V].
    pub fn invert_submatrix(&self, indices: &[usize]) -> Result<Array2<f64>, CrossValidationError> {
        let block = self.submatrix(indices);
        let factor = block.cholesky(Side::Lower).map_err(|e| {
            CrossValidationError::NonPositiveDefinite {
                context: format!("precision block of {} observations ({e})", indices.len()),
            }
        })?;
        Ok(factor.inverse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample_covariance() -> Array2<f64> {
        array![
            [2.0, 0.5, 0.1, 0.0],
            [0.5, 1.5, 0.3, 0.2],
            [0.1, 0.3, 1.2, 0.4],
            [0.0, 0.2, 0.4, 1.0]
        ]
    }

    #[test]
    fn precision_times_covariance_is_identity() {
        let cov = sample_covariance();
        let prec = Precision::from_covariance(cov.view()).expect("PD");
        let eye = prec.matrix().dot(&cov);
        for ((i, j), v) in eye.indexed_iter() {
            let want = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(*v, want, epsilon = 1e-12);
        }
        assert_eq!(prec.dim(), 4);
        assert_eq!(prec.diag().len(), 4);
    }

    #[test]
    fn solves_agree_with_explicit_precision() {
        let cov = sample_covariance();
        let prec = Precision::from_covariance(cov.view()).expect("PD");
        let b = array![1.0, -2.0, 0.5, 3.0];
        let x = prec.solve_vec(&b);
        let want = prec.matrix().dot(&b);
        for (g, w) in x.iter().zip(want.iter()) {
            assert_abs_diff_eq!(*g, *w, epsilon = 1e-12);
        }
    }

    #[test]
    fn inverted_precision_block_is_conditional_covariance() {
        // For V = {0, 1} and R = {2, 3}: ((Σ⁻¹)_VV)⁻¹ = Σ_VV - Σ_VR Σ_RR⁻¹ Σ_RV.
        let cov = sample_covariance();
        let prec = Precision::from_covariance(cov.view()).expect("PD");
        let got = prec.invert_submatrix(&[0, 1]).expect("PD block");

        let (a, b, d) = (cov[[2, 2]], cov[[2, 3]], cov[[3, 3]]);
        let det = a * d - b * b;
        let rr_inv = array![[d, -b], [-b, a]] / det;
        let vr = array![[cov[[0, 2]], cov[[0, 3]]], [cov[[1, 2]], cov[[1, 3]]]];
        let vv = array![[cov[[0, 0]], cov[[0, 1]]], [cov[[1, 0]], cov[[1, 1]]]];
        let want = &vv - &vr.dot(&rr_inv).dot(&vr.t());
        for (g, w) in got.iter().zip(want.iter()) {
            assert_abs_diff_eq!(*g, *w, epsilon = 1e-12);
        }
    }

    #[test]
    fn indefinite_covariance_is_reported() {
        let cov = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(
            Precision::from_covariance(cov.view()),
            Err(CrossValidationError::NonPositiveDefinite { .. })
        ));
    }
}
