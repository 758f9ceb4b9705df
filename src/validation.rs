use crate::errors::CrossValidationError;
use crate::linalg::utils::symmetrize_in_place;
use crate::options::CrossValidationOptions;
use crate::types::Fold;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Check that Σ is square, α and y have its length, and all entries are finite.
///
/// Returns the observation count `n`.
pub fn validate_inputs(
    covariance: ArrayView2<'_, f64>,
    alpha: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<usize, CrossValidationError> {
    let (rows, cols) = covariance.dim();
    if rows != cols {
        return Err(CrossValidationError::DimensionMismatch {
            what: "covariance columns",
            expected: rows,
            found: cols,
        });
    }
    let n = rows;
    if alpha.len() != n {
        return Err(CrossValidationError::DimensionMismatch {
            what: "residual-weight vector alpha",
            expected: n,
            found: alpha.len(),
        });
    }
    if y.len() != n {
        return Err(CrossValidationError::DimensionMismatch {
            what: "observation vector y",
            expected: n,
            found: y.len(),
        });
    }
    if let Some(((i, j), v)) = covariance.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(CrossValidationError::NonFiniteInput(format!(
            "covariance entry ({i}, {j}) is {v}"
        )));
    }
    if let Some((i, v)) = alpha.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(CrossValidationError::NonFiniteInput(format!(
            "alpha[{i}] is {v}"
        )));
    }
    if let Some((i, v)) = y.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(CrossValidationError::NonFiniteInput(format!("y[{i}] is {v}")));
    }
    Ok(n)
}

/// Check every fold is non-empty, in range, and free of repeated indices.
///
/// Overlap between folds and coverage of `0..n` are not checked.
pub fn validate_folds(folds: &[Fold], n: usize) -> Result<(), CrossValidationError> {
    let mut seen = vec![usize::MAX; n];
    for (f, fold) in folds.iter().enumerate() {
        if fold.is_empty() {
            return Err(CrossValidationError::InvalidFold(format!("fold {f} is empty")));
        }
        for &index in fold {
            if index >= n {
                return Err(CrossValidationError::FoldIndexOutOfRange { fold: f, index, n });
            }
            if seen[index] == f {
                return Err(CrossValidationError::InvalidFold(format!(
                    "fold {f} lists index {index} more than once"
                )));
            }
            seen[index] = f;
        }
    }
    Ok(())
}

/// Check a derivative slice written by the kernel collaborator.
pub(crate) fn validate_slice(
    hyperparameter: usize,
    slice: &Array2<f64>,
    n: usize,
) -> Result<(), CrossValidationError> {
    if slice.nrows() != n || slice.ncols() != n {
        return Err(CrossValidationError::DimensionMismatch {
            what: "derivative slice size",
            expected: n,
            found: if slice.nrows() != n { slice.nrows() } else { slice.ncols() },
        });
    }
    if let Some(((i, j), v)) = slice.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(CrossValidationError::NonFiniteInput(format!(
            "derivative slice {hyperparameter} entry ({i}, {j}) is {v}"
        )));
    }
    Ok(())
}

/// Compare mirrored entries of a derivative slice.
///
/// The derivative of a symmetric Σ is symmetric. Entries are compared against
/// `consistency_tolerance` times the largest absolute entry. Under strict
/// consistency the first mismatched pair is a `NumericalInstability` carrying
/// the upper and lower entries; otherwise the slice is replaced by its
/// symmetric part and a warning is logged.
pub(crate) fn check_slice_symmetry(
    hyperparameter: usize,
    slice: &mut Array2<f64>,
    options: &CrossValidationOptions,
) -> Result<(), CrossValidationError> {
    let n = slice.nrows();
    let largest = slice.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let limit = options.consistency_tolerance * largest;
    let mut mismatched = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let upper = slice[[i, j]];
            let lower = slice[[j, i]];
            if (upper - lower).abs() <= limit {
                continue;
            }
            if options.strict_consistency {
                log::error!(
                    "[GP CV] derivative slice {} is not symmetric at ({}, {}): {:.6e} vs {:.6e}",
                    hyperparameter,
                    i,
                    j,
                    upper,
                    lower
                );
                return Err(CrossValidationError::NumericalInstability {
                    hyperparameter,
                    index: i,
                    lhs: upper,
                    rhs: lower,
                });
            }
            mismatched += 1;
        }
    }
    if mismatched > 0 {
        log::warn!(
            "[GP CV] derivative slice {} had {} asymmetric pairs; using its symmetric part",
            hyperparameter,
            mismatched
        );
        symmetrize_in_place(slice);
    }
    Ok(())
}
