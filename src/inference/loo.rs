//! Closed-form leave-one-out predictive moments and the LOO log predictive
//! density of a fitted GP, following the identities in Rasmussen & Williams
//! (2006), §5.4.2:
//!
//! ```text
//! sigma_i^2 = 1 / [Σ⁻¹]_ii
//! mu_i      = y_i - alpha_i * sigma_i^2
//! ```
//!
//! The gradient with respect to a kernel hyperparameter θ_j only needs the
//! derivative slice Z_j = dΣ/dθ_j, since d(Σ⁻¹) = -Σ⁻¹ Z_j Σ⁻¹ and
//! dα = -Σ⁻¹ Z_j α for a fixed mean function.

use crate::crossval::CrossValidation;
use crate::errors::CrossValidationError;
use crate::kernel::DerivativeSlices;
use crate::linalg::faer_ndarray::fast_ab;
use crate::linalg::precision::Precision;
use crate::linalg::utils::KahanSum;
use crate::options::CrossValidationOptions;
use crate::probability::normal_log_pdf;
use crate::types::LooPrediction;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

pub(crate) fn loo_moments(
    precision: &Precision,
    alpha: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<LooPrediction, CrossValidationError> {
    let n = precision.dim();
    let diag = precision.matrix().diag();
    let mut mean = Array1::<f64>::zeros(n);
    let mut variance = Array1::<f64>::zeros(n);
    for i in 0..n {
        let p_ii = diag[i];
        if !(p_ii.is_finite() && p_ii > 0.0) {
            return Err(CrossValidationError::NonPositiveDefinite {
                context: format!("precision diagonal entry {i} is {p_ii:.6e}"),
            });
        }
        let var = 1.0 / p_ii;
        variance[i] = var;
        mean[i] = y[i] - alpha[i] * var;
    }
    Ok(LooPrediction { mean, variance })
}

pub(crate) fn loo_pointwise(pred: &LooPrediction, y: ArrayView1<'_, f64>) -> Array1<f64> {
    Array1::from_shape_fn(y.len(), |i| {
        normal_log_pdf(y[i], pred.mean[i], pred.variance[i])
    })
}

pub(crate) fn loo_log_prob(pred: &LooPrediction, y: ArrayView1<'_, f64>) -> f64 {
    let mut acc = KahanSum::default();
    for i in 0..y.len() {
        acc.add(normal_log_pdf(y[i], pred.mean[i], pred.variance[i]));
    }
    acc.sum()
}

/// `scale` is the magnitude of the products summed into either side.
#[inline]
fn violates_consistency(lhs: f64, rhs: f64, scale: f64, tol: f64) -> bool {
    // Negated comparison so NaN counts as a violation.
    !((lhs - rhs).abs() <= tol * scale.max(f64::MIN_POSITIVE))
}

#[inline]
fn abs_dot(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(u, v)| (u * v).abs()).sum()
}

/// d logp_LOO / dθ_j for one derivative slice `z = dΣ/dθ_j`.
///
/// `d_i = [Σ⁻¹ Z Σ⁻¹]_ii` is formed twice: through triangular solves against
/// the factor, and as the quadratic form `p_iᵀ Z p_i` over column `i` of the
/// explicit precision. The first drives `d_i σ_i²`, the second `dσ_i²`, and
/// the two must agree for every observation.
pub(crate) fn loo_gradient_component(
    precision: &Precision,
    alpha: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    pred: &LooPrediction,
    hyperparameter: usize,
    z: &Array2<f64>,
    options: &CrossValidationOptions,
) -> Result<f64, CrossValidationError> {
    let n = precision.dim();
    let p = precision.matrix();
    // W = Σ⁻¹ Z
    let w = precision.solve_mat(z);
    let w_alpha = w.dot(&alpha);
    // Z Σ⁻¹
    let zp = fast_ab(z, p);

    let mut term = KahanSum::default();
    let mut violations = 0usize;
    for i in 0..n {
        let p_i = p.column(i);
        let w_i = w.row(i);
        let zp_i = zp.column(i);
        let d_i = w_i.dot(&p_i);
        let q_i = zp_i.dot(&p_i);
        let var = pred.variance[i];
        let dvar = q_i * var * var;
        let dmean = w_alpha[i] * var - alpha[i] * dvar;

        let lhs = d_i * var;
        let rhs = dvar / var;
        let scale = var * abs_dot(w_i, p_i).max(abs_dot(zp_i, p_i));
        if violates_consistency(lhs, rhs, scale, options.consistency_tolerance) {
            if options.strict_consistency {
                log::error!(
                    "[GP CV] derivative slice {} inconsistent at obs {}: {:.6e} vs {:.6e}",
                    hyperparameter,
                    i,
                    lhs,
                    rhs
                );
                return Err(CrossValidationError::NumericalInstability {
                    hyperparameter,
                    index: i,
                    lhs,
                    rhs,
                });
            }
            violations += 1;
        }

        let resid = y[i] - pred.mean[i];
        term.add(-2.0 * resid / var * dmean);
        term.add(-resid * resid * d_i);
        term.add(d_i * var);
    }

    if violations > 0 {
        log::warn!(
            "[GP CV] derivative slice {} failed the LOO variance identity at {} of {} observations",
            hyperparameter,
            violations,
            n
        );
    }

    let grad = -0.5 * term.sum();
    if !grad.is_finite() {
        return Err(CrossValidationError::NonFiniteInput(format!(
            "LOO gradient entry {hyperparameter} is {grad}"
        )));
    }
    Ok(grad)
}

/// Leave-one-out predictive mean and variance of every observation.
pub fn predict_loo<'a>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
) -> Result<LooPrediction, CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, CrossValidationOptions::default())?.predict_loo()
}

/// Sum of the leave-one-out log predictive densities, `sum_i log p(y_i | y_-i)`.
pub fn log_prob_loo<'a>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
) -> Result<f64, CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, CrossValidationOptions::default())?.log_prob_loo()
}

/// Per-observation terms of [`log_prob_loo`].
pub fn log_prob_loo_pointwise<'a>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
) -> Result<Array1<f64>, CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, CrossValidationOptions::default())?
        .log_prob_loo_pointwise()
}

/// Gradient of [`log_prob_loo`] with respect to each kernel hyperparameter.
///
/// Mean-function and observation-noise parameters contribute nothing here.
pub fn grad_log_prob_loo<'a, S: DerivativeSlices + ?Sized>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    slices: &S,
    options: &CrossValidationOptions,
) -> Result<Array1<f64>, CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, options.clone())?.grad_log_prob_loo(slices)
}

/// [`log_prob_loo`] and [`grad_log_prob_loo`] from a single factorization of Σ.
pub fn loo_value_and_gradient<'a, S: DerivativeSlices + ?Sized>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    slices: &S,
    options: &CrossValidationOptions,
) -> Result<(f64, Array1<f64>), CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, options.clone())?.loo_value_and_gradient(slices)
}
