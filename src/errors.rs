use thiserror::Error;

#[derive(Error)]
pub enum CrossValidationError {
    #[error("Matrix is not positive definite: {context}")]
    NonPositiveDefinite { context: String },

    #[error("Dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Fold {fold} references index {index}, outside the {n} observations")]
    FoldIndexOutOfRange { fold: usize, index: usize, n: usize },

    #[error("Invalid fold: {0}")]
    InvalidFold(String),

    /// Either `d_i * sigma_i^2` against `dsigma_i^2 / sigma_i^2` at observation
    /// `index`, or the mirrored entries `Z[index, k]` and `Z[k, index]` of an
    /// asymmetric slice.
    #[error(
        "Derivative slice for hyperparameter {hyperparameter} is inconsistent at row {index}: \
        {lhs:.6e} vs {rhs:.6e}"
    )]
    NumericalInstability {
        hyperparameter: usize,
        index: usize,
        lhs: f64,
        rhs: f64,
    },

    #[error("Non-finite input: {0}")]
    NonFiniteInput(String),

    #[error("Invalid cross-validation options: {0}")]
    InvalidOptions(String),
}

// Ensure Debug prints with actual line breaks by delegating to Display
impl core::fmt::Debug for CrossValidationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self)
    }
}
