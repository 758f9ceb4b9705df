use crate::errors::CrossValidationError;
use crate::linalg::faer_ndarray::{FaerCholesky, FaerCholeskyFactor};
use crate::options::CrossValidationOptions;
use faer::Side;
use ndarray::{Array2, Axis};

#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

/// Square submatrix `matrix[indices, indices]`, rows and columns in `indices` order.
pub fn submatrix(matrix: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    matrix.select(Axis(0), indices).select(Axis(1), indices)
}

pub(crate) fn symmetrize_in_place(matrix: &mut Array2<f64>) {
    let n = matrix.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (matrix[[i, j]] + matrix[[j, i]]);
            matrix[[i, j]] = avg;
            matrix[[j, i]] = avg;
        }
    }
}

pub(crate) fn add_ridge(matrix: &Array2<f64>, ridge: f64) -> Array2<f64> {
    let mut regularized = matrix.clone();
    if ridge > 0.0 {
        regularized.diag_mut().mapv_inplace(|v| v + ridge);
    }
    regularized
}

fn mean_abs_diag(matrix: &Array2<f64>) -> f64 {
    let n = matrix.nrows();
    if n == 0 {
        return 0.0;
    }
    matrix.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64
}

/// Deterministic diagonal-inflation schedule for near-PD matrices.
///
/// Attempt `k` (zero based) adds `initial_jitter * growth^k * scale` to the
/// diagonal, where `scale` is the mean absolute diagonal entry.
#[derive(Clone, Debug)]
pub(crate) struct PdRepair {
    jitter: f64,
    growth: f64,
    attempts: usize,
    max_attempts: usize,
}

impl PdRepair {
    pub(crate) fn new(matrix: &Array2<f64>, options: &CrossValidationOptions) -> Self {
        let scale = mean_abs_diag(matrix).max(f64::MIN_POSITIVE);
        Self {
            jitter: options.initial_jitter * scale,
            growth: options.jitter_growth,
            attempts: 0,
            max_attempts: options.max_repair_attempts,
        }
    }

    /// Next jitter to try, or `None` once the attempt budget is spent.
    pub(crate) fn next_jitter(&mut self) -> Option<f64> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let jitter = self.jitter;
        self.jitter *= self.growth;
        self.attempts += 1;
        Some(jitter)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts
    }
}

/// A covariance matrix that has been brought to a factorizable state.
pub(crate) struct RepairedCovariance {
    pub(crate) factor: FaerCholeskyFactor,
    /// Diagonal inflation that was needed; `None` if the symmetrized input factored as is.
    pub(crate) jitter: Option<f64>,
}

/// Factorize a covariance, symmetrizing and then inflating its diagonal on failure.
///
/// Exhausting the attempt budget is fatal: callers never see a factor of a
/// matrix that is not positive definite.
pub(crate) fn factorize_with_repair(
    matrix: &Array2<f64>,
    options: &CrossValidationOptions,
    label: &str,
) -> Result<RepairedCovariance, CrossValidationError> {
    // faer only reads one triangle, so symmetrize before the first attempt.
    let mut symmetric = matrix.clone();
    symmetrize_in_place(&mut symmetric);
    if let Ok(factor) = symmetric.cholesky(Side::Lower) {
        return Ok(RepairedCovariance {
            factor,
            jitter: None,
        });
    }

    let mut planner = PdRepair::new(&symmetric, options);
    while let Some(jitter) = planner.next_jitter() {
        let candidate = add_ridge(&symmetric, jitter);
        if let Ok(factor) = candidate.cholesky(Side::Lower) {
            log::warn!(
                "[GP CV] {} repaired with diagonal jitter {:.3e} after {} attempt(s)",
                label,
                jitter,
                planner.attempts()
            );
            return Ok(RepairedCovariance {
                factor,
                jitter: Some(jitter),
            });
        }
    }

    log::error!(
        "[GP CV] {} is not positive definite after {} jitter attempts",
        label,
        planner.attempts()
    );
    Err(CrossValidationError::NonPositiveDefinite {
        context: format!(
            "{label} could not be repaired within {} diagonal-jitter attempts",
            planner.attempts()
        ),
    })
}
