#![warn(dead_code)]
#![warn(unused_imports)]

pub mod crossval;
pub mod errors;
pub mod inference;
pub mod kernel;
pub mod linalg;
pub mod options;
pub mod probability;
pub mod types;
pub mod validation;

pub use crossval::CrossValidation;
pub use errors::CrossValidationError;
pub use inference::folds::{
    folds_value_and_gradient, grad_log_prob_folds, log_prob_folds, predict_folds, score_folds,
};
pub use inference::loo::{
    grad_log_prob_loo, log_prob_loo, log_prob_loo_pointwise, loo_value_and_gradient, predict_loo,
};
pub use kernel::{DerivativeSlices, SliceFn};
pub use linalg::precision::Precision;
pub use options::CrossValidationOptions;
pub use types::{
    Fold, FoldPrediction, FoldScore, LooPrediction, contiguous_folds, singleton_folds,
};
