use crate::linalg::faer_ndarray::FaerCholeskyFactor;
use ndarray::ArrayView1;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Log density of `x` under `N(mean, variance)`.
#[inline]
pub fn normal_log_pdf(x: f64, mean: f64, variance: f64) -> f64 {
    let r = x - mean;
    -0.5 * (LN_2PI + variance.ln() + r * r / variance)
}

/// Log density of `x` under `N(mean, L L^T)` given the Cholesky factor of the covariance.
pub fn mvn_log_pdf(
    x: ArrayView1<'_, f64>,
    mean: ArrayView1<'_, f64>,
    factor: &FaerCholeskyFactor,
) -> f64 {
    let k = x.len();
    debug_assert_eq!(mean.len(), k);
    debug_assert_eq!(factor.dim(), k);
    let resid = &x - &mean;
    let weighted = factor.solve_vec(&resid);
    let quad = resid.dot(&weighted);
    -0.5 * (k as f64 * LN_2PI + factor.log_det() + quad)
}
