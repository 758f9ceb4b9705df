use crate::errors::CrossValidationError;
use crate::inference::{folds, loo};
use crate::kernel::DerivativeSlices;
use crate::linalg::precision::Precision;
use crate::options::CrossValidationOptions;
use crate::types::{Fold, FoldPrediction, FoldScore, LooPrediction};
use crate::validation::{validate_folds, validate_inputs};
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Cross-validation criteria for one fitted GP state.
///
/// Inputs are validated and Σ is factorized once on construction; every method
/// is then a pure function of the borrowed `(Σ⁻¹, α, y)` and may be called
/// concurrently.
pub struct CrossValidation<'a> {
    precision: Precision,
    alpha: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    options: CrossValidationOptions,
}

impl<'a> CrossValidation<'a> {
    /// `covariance` is the posterior covariance Σ, `alpha` is Σ⁻¹(y - m), and
    /// `y` the raw observations.
    pub fn new(
        covariance: ArrayView2<'_, f64>,
        alpha: ArrayView1<'a, f64>,
        y: ArrayView1<'a, f64>,
        options: CrossValidationOptions,
    ) -> Result<Self, CrossValidationError> {
        options.validate()?;
        let n = validate_inputs(covariance, alpha, y)?;
        let precision = Precision::from_covariance(covariance)?;
        log::debug!("[GP CV] factorized posterior covariance with n={}", n);
        Ok(Self {
            precision,
            alpha,
            y,
            options,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn precision(&self) -> &Precision {
        &self.precision
    }

    pub fn options(&self) -> &CrossValidationOptions {
        &self.options
    }

    pub fn predict_loo(&self) -> Result<LooPrediction, CrossValidationError> {
        loo::loo_moments(&self.precision, self.alpha, self.y)
    }

    pub fn log_prob_loo(&self) -> Result<f64, CrossValidationError> {
        let pred = self.predict_loo()?;
        Ok(loo::loo_log_prob(&pred, self.y))
    }

    pub fn log_prob_loo_pointwise(&self) -> Result<Array1<f64>, CrossValidationError> {
        let pred = self.predict_loo()?;
        Ok(loo::loo_pointwise(&pred, self.y))
    }

    pub fn grad_log_prob_loo<S: DerivativeSlices + ?Sized>(
        &self,
        slices: &S,
    ) -> Result<Array1<f64>, CrossValidationError> {
        let pred = self.predict_loo()?;
        self.loo_gradient_with(&pred, slices)
    }

    pub fn loo_value_and_gradient<S: DerivativeSlices + ?Sized>(
        &self,
        slices: &S,
    ) -> Result<(f64, Array1<f64>), CrossValidationError> {
        let pred = self.predict_loo()?;
        let value = loo::loo_log_prob(&pred, self.y);
        let grad = self.loo_gradient_with(&pred, slices)?;
        Ok((value, grad))
    }

    fn loo_gradient_with<S: DerivativeSlices + ?Sized>(
        &self,
        pred: &LooPrediction,
        slices: &S,
    ) -> Result<Array1<f64>, CrossValidationError> {
        crate::inference::map_hyperparameters(
            slices,
            self.n_obs(),
            &self.options,
            |j, z| {
                loo::loo_gradient_component(
                    &self.precision,
                    self.alpha,
                    self.y,
                    pred,
                    j,
                    z,
                    &self.options,
                )
            },
        )
    }

    pub fn predict_folds(&self, folds: &[Fold]) -> Result<FoldPrediction, CrossValidationError> {
        validate_folds(folds, self.n_obs())?;
        folds::fold_moments(&self.precision, self.alpha, self.y, folds)
    }

    pub fn score_folds(&self, folds: &[Fold]) -> Result<FoldScore, CrossValidationError> {
        let pred = self.predict_folds(folds)?;
        folds::fold_score(&pred, self.y, folds, &self.options)
    }

    pub fn log_prob_folds(&self, folds: &[Fold]) -> Result<f64, CrossValidationError> {
        Ok(self.score_folds(folds)?.total)
    }

    pub fn grad_log_prob_folds<S: DerivativeSlices + ?Sized>(
        &self,
        folds: &[Fold],
        slices: &S,
    ) -> Result<Array1<f64>, CrossValidationError> {
        let pred = self.predict_folds(folds)?;
        folds::fold_gradient(
            &self.precision,
            self.alpha,
            self.y,
            folds,
            &pred,
            slices,
            &self.options,
        )
    }

    pub fn folds_value_and_gradient<S: DerivativeSlices + ?Sized>(
        &self,
        folds: &[Fold],
        slices: &S,
    ) -> Result<(f64, Array1<f64>), CrossValidationError> {
        let pred = self.predict_folds(folds)?;
        let score = folds::fold_score(&pred, self.y, folds, &self.options)?;
        let grad = folds::fold_gradient(
            &self.precision,
            self.alpha,
            self.y,
            folds,
            &pred,
            slices,
            &self.options,
        )?;
        Ok((score.total, grad))
    }
}
