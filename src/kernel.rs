use crate::errors::CrossValidationError;
use ndarray::Array2;

/// Source of covariance derivative slices `dΣ/dθ_j`.
///
/// Implementations typically wrap a kernel together with its training inputs
/// and any cached pairwise statistics. `fill_slice` may be called from several
/// rayon workers at once, each with its own buffer.
pub trait DerivativeSlices: Sync {
    fn num_hyperparameters(&self) -> usize;

    /// Overwrite `out` (n x n, zero-initialized) with `dΣ/dθ_index`.
    fn fill_slice(&self, index: usize, out: &mut Array2<f64>) -> Result<(), CrossValidationError>;
}

fn copy_precomputed(
    slices: &[Array2<f64>],
    index: usize,
    out: &mut Array2<f64>,
) -> Result<(), CrossValidationError> {
    let slice = slices.get(index).ok_or(CrossValidationError::DimensionMismatch {
        what: "derivative slice index",
        expected: slices.len(),
        found: index,
    })?;
    if slice.dim() != out.dim() {
        return Err(CrossValidationError::DimensionMismatch {
            what: "derivative slice rows",
            expected: out.nrows(),
            found: slice.nrows().max(slice.ncols()),
        });
    }
    out.assign(slice);
    Ok(())
}

impl DerivativeSlices for [Array2<f64>] {
    fn num_hyperparameters(&self) -> usize {
        self.len()
    }

    fn fill_slice(&self, index: usize, out: &mut Array2<f64>) -> Result<(), CrossValidationError> {
        copy_precomputed(self, index, out)
    }
}

impl DerivativeSlices for Vec<Array2<f64>> {
    fn num_hyperparameters(&self) -> usize {
        self.len()
    }

    fn fill_slice(&self, index: usize, out: &mut Array2<f64>) -> Result<(), CrossValidationError> {
        copy_precomputed(self, index, out)
    }
}

/// Closure-backed slices, for kernels that compute `dΣ/dθ_j` on demand.
pub struct SliceFn<F> {
    count: usize,
    fill: F,
}

impl<F> SliceFn<F>
where
    F: Fn(usize, &mut Array2<f64>) + Sync,
{
    pub fn new(count: usize, fill: F) -> Self {
        Self { count, fill }
    }
}

impl<F> DerivativeSlices for SliceFn<F>
where
    F: Fn(usize, &mut Array2<f64>) + Sync,
{
    fn num_hyperparameters(&self) -> usize {
        self.count
    }

    fn fill_slice(&self, index: usize, out: &mut Array2<f64>) -> Result<(), CrossValidationError> {
        if index >= self.count {
            return Err(CrossValidationError::DimensionMismatch {
                what: "derivative slice index",
                expected: self.count,
                found: index,
            });
        }
        (self.fill)(index, out);
        Ok(())
    }
}
