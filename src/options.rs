use crate::errors::CrossValidationError;
use serde::{Deserialize, Serialize};

pub fn default_initial_jitter() -> f64 {
    1e-10
}

pub fn default_jitter_growth() -> f64 {
    10.0
}

pub fn default_max_repair_attempts() -> usize {
    10
}

pub fn default_consistency_tolerance() -> f64 {
    1e-8
}

pub fn default_strict_consistency() -> bool {
    true
}

pub fn default_parallel_threshold() -> usize {
    4
}

/// Numerical policy for the cross-validation criteria and their gradients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationOptions {
    /// First diagonal jitter tried on a fold covariance, relative to its mean
    /// absolute diagonal.
    #[serde(default = "default_initial_jitter")]
    pub initial_jitter: f64,
    /// Multiplier applied to the jitter after each failed attempt.
    #[serde(default = "default_jitter_growth")]
    pub jitter_growth: f64,
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: usize,
    /// Relative tolerance for `d_i * sigma_i^2 == dsigma_i^2 / sigma_i^2` and
    /// for mirrored entries of a derivative slice. Must be positive.
    #[serde(default = "default_consistency_tolerance")]
    pub consistency_tolerance: f64,
    /// Fail with `NumericalInstability` instead of logging a warning.
    #[serde(default = "default_strict_consistency")]
    pub strict_consistency: bool,
    /// Hyperparameter count at which gradient loops move onto the rayon pool.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

impl Default for CrossValidationOptions {
    fn default() -> Self {
        Self {
            initial_jitter: default_initial_jitter(),
            jitter_growth: default_jitter_growth(),
            max_repair_attempts: default_max_repair_attempts(),
            consistency_tolerance: default_consistency_tolerance(),
            strict_consistency: default_strict_consistency(),
            parallel_threshold: default_parallel_threshold(),
        }
    }
}

impl CrossValidationOptions {
    pub fn validate(&self) -> Result<(), CrossValidationError> {
        if !(self.initial_jitter.is_finite() && self.initial_jitter > 0.0) {
            return Err(CrossValidationError::InvalidOptions(format!(
                "initial_jitter must be positive and finite, got {}",
                self.initial_jitter
            )));
        }
        if !(self.jitter_growth.is_finite() && self.jitter_growth > 1.0) {
            return Err(CrossValidationError::InvalidOptions(format!(
                "jitter_growth must be finite and greater than 1, got {}",
                self.jitter_growth
            )));
        }
        if !(self.consistency_tolerance.is_finite() && self.consistency_tolerance > 0.0) {
            return Err(CrossValidationError::InvalidOptions(format!(
                "consistency_tolerance must be positive and finite, got {}",
                self.consistency_tolerance
            )));
        }
        Ok(())
    }
}
