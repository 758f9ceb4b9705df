//! Block ("fold") generalization of the leave-one-out identities.
//!
//! For a fold V, the predictive distribution of y[V] given every observation
//! outside V has covariance `((Σ⁻¹)[V, V])⁻¹` and mean `y[V] - cov · α[V]`.
//! Folds are processed independently of each other and of any index they do
//! not contain.

use crate::crossval::CrossValidation;
use crate::errors::CrossValidationError;
use crate::kernel::DerivativeSlices;
use crate::linalg::faer_ndarray::fast_ab;
use crate::linalg::precision::Precision;
use crate::linalg::utils::{KahanSum, factorize_with_repair, submatrix};
use crate::options::CrossValidationOptions;
use crate::probability::mvn_log_pdf;
use crate::types::{Fold, FoldPrediction, FoldScore};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

pub(crate) fn fold_moments(
    precision: &Precision,
    alpha: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    folds: &[Fold],
) -> Result<FoldPrediction, CrossValidationError> {
    let mut means = Vec::with_capacity(folds.len());
    let mut covariances = Vec::with_capacity(folds.len());
    for fold in folds {
        let cov = precision.invert_submatrix(fold)?;
        let alpha_v = alpha.select(Axis(0), fold);
        let y_v = y.select(Axis(0), fold);
        means.push(&y_v - &cov.dot(&alpha_v));
        covariances.push(cov);
    }
    Ok(FoldPrediction { means, covariances })
}

pub(crate) fn fold_score(
    pred: &FoldPrediction,
    y: ArrayView1<'_, f64>,
    folds: &[Fold],
    options: &CrossValidationOptions,
) -> Result<FoldScore, CrossValidationError> {
    let mut total = KahanSum::default();
    let mut per_fold = Vec::with_capacity(folds.len());
    let mut jitter = Vec::with_capacity(folds.len());
    for (k, fold) in folds.iter().enumerate() {
        let label = format!("fold {k} predictive covariance");
        let repaired = factorize_with_repair(&pred.covariances[k], options, &label)?;
        let y_v = y.select(Axis(0), fold);
        let lp = mvn_log_pdf(y_v.view(), pred.means[k].view(), &repaired.factor);
        if !lp.is_finite() {
            log::error!("[GP CV] fold {} log density is {}", k, lp);
            return Err(CrossValidationError::NonFiniteInput(format!(
                "log density of fold {k} is {lp}"
            )));
        }
        total.add(lp);
        per_fold.push(lp);
        jitter.push(repaired.jitter);
    }
    let score = FoldScore {
        total: total.sum(),
        per_fold,
        jitter,
    };
    if score.repaired_folds() > 0 {
        log::warn!(
            "[GP CV] {} of {} fold covariances needed diagonal repair",
            score.repaired_folds(),
            folds.len()
        );
    }
    Ok(score)
}

/// Per-fold quantities shared by every hyperparameter.
struct FoldTerms {
    cov: Array2<f64>,
    /// cov · α[V], which is also y[V] - mean.
    cov_alpha: Array1<f64>,
    resid: Array1<f64>,
}

pub(crate) fn fold_gradient<S: DerivativeSlices + ?Sized>(
    precision: &Precision,
    alpha: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    folds: &[Fold],
    pred: &FoldPrediction,
    slices: &S,
    options: &CrossValidationOptions,
) -> Result<Array1<f64>, CrossValidationError> {
    let terms: Vec<FoldTerms> = folds
        .iter()
        .zip(pred.means.iter().zip(pred.covariances.iter()))
        .map(|(fold, (mean, cov))| {
            let alpha_v = alpha.select(Axis(0), fold);
            let y_v = y.select(Axis(0), fold);
            FoldTerms {
                cov_alpha: cov.dot(&alpha_v),
                resid: &y_v - mean,
                cov: cov.clone(),
            }
        })
        .collect();

    crate::inference::map_hyperparameters(slices, precision.dim(), options, |j, z| {
        // W = Σ⁻¹ Z, M = Σ⁻¹ Z Σ⁻¹, Zjα = Σ⁻¹ Z α
        let w = precision.solve_mat(z);
        let z_alpha = w.dot(&alpha);
        let m = fast_ab(&w, precision.matrix());

        let mut term = KahanSum::default();
        for (fold, t) in folds.iter().zip(terms.iter()) {
            let m_vv = submatrix(&m, fold);
            let z_alpha_v = z_alpha.select(Axis(0), fold);
            let drift = &z_alpha_v - &m_vv.dot(&t.cov_alpha);
            term.add(-2.0 * t.resid.dot(&drift));
            term.add(-t.resid.dot(&m_vv.dot(&t.resid)));
            term.add((&m_vv * &t.cov).sum());
        }
        let grad = -0.5 * term.sum();
        if !grad.is_finite() {
            return Err(CrossValidationError::NonFiniteInput(format!(
                "fold gradient entry {j} is {grad}"
            )));
        }
        Ok(grad)
    })
}

/// Joint predictive mean and covariance of each fold given the observations outside it.
pub fn predict_folds<'a>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    folds: &[Fold],
) -> Result<FoldPrediction, CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, CrossValidationOptions::default())?
        .predict_folds(folds)
}

/// Per-fold log predictive densities, their sum, and any covariance repair applied.
pub fn score_folds<'a>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    folds: &[Fold],
    options: &CrossValidationOptions,
) -> Result<FoldScore, CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, options.clone())?.score_folds(folds)
}

/// Sum over folds of `log p(y[V] | y[-V])`.
pub fn log_prob_folds<'a>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    folds: &[Fold],
    options: &CrossValidationOptions,
) -> Result<f64, CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, options.clone())?.log_prob_folds(folds)
}

/// Gradient of [`log_prob_folds`] with respect to each kernel hyperparameter.
pub fn grad_log_prob_folds<'a, S: DerivativeSlices + ?Sized>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    folds: &[Fold],
    slices: &S,
    options: &CrossValidationOptions,
) -> Result<Array1<f64>, CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, options.clone())?.grad_log_prob_folds(folds, slices)
}

/// [`log_prob_folds`] and [`grad_log_prob_folds`] from a single factorization of Σ.
pub fn folds_value_and_gradient<'a, S: DerivativeSlices + ?Sized>(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    folds: &[Fold],
    slices: &S,
    options: &CrossValidationOptions,
) -> Result<(f64, Array1<f64>), CrossValidationError> {
    CrossValidation::new(covariance, alpha, y, options.clone())?
        .folds_value_and_gradient(folds, slices)
}
