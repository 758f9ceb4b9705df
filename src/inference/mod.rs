pub mod folds;
pub mod loo;

use crate::errors::CrossValidationError;
use crate::kernel::DerivativeSlices;
use crate::options::CrossValidationOptions;
use crate::validation::{check_slice_symmetry, validate_slice};
use ndarray::{Array1, Array2};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// Evaluate one gradient entry per hyperparameter.
///
/// Each entry gets its own freshly allocated n x n slice buffer, so entries can
/// run on the rayon pool without sharing scratch space.
pub(crate) fn map_hyperparameters<S, F>(
    slices: &S,
    n: usize,
    options: &CrossValidationOptions,
    component: F,
) -> Result<Array1<f64>, CrossValidationError>
where
    S: DerivativeSlices + ?Sized,
    F: Fn(usize, &Array2<f64>) -> Result<f64, CrossValidationError> + Sync,
{
    let count = slices.num_hyperparameters();
    let parallel = count >= options.parallel_threshold.max(1);
    log::debug!(
        "[GP CV] evaluating {} derivative slices of size {}x{} (parallel: {})",
        count,
        n,
        n,
        parallel
    );

    let evaluate = |j: usize| -> Result<f64, CrossValidationError> {
        let mut slice = Array2::<f64>::zeros((n, n));
        slices.fill_slice(j, &mut slice)?;
        validate_slice(j, &slice, n)?;
        check_slice_symmetry(j, &mut slice, options)?;
        component(j, &slice)
    };

    let values = if parallel {
        (0..count)
            .into_par_iter()
            .map(evaluate)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        (0..count).map(evaluate).collect::<Result<Vec<_>, _>>()?
    };
    Ok(Array1::from_vec(values))
}
