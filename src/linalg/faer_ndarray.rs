use faer::linalg::matmul::matmul;
use faer::linalg::solvers::{self, Solve};
use faer::{Accum, Mat, MatMut, MatRef, Par, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("Matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
}

#[inline]
fn should_use_faer_matmul(m: usize, n: usize, k: usize) -> bool {
    // Tiny products stay on ndarray; GEMM setup only pays off past this size.
    const MIN_DIM: usize = 32;
    const MIN_FLOP_SCALE: usize = 64 * 64;
    (m >= MIN_DIM || n >= MIN_DIM || k >= MIN_DIM)
        && m.saturating_mul(n).saturating_mul(k) >= MIN_FLOP_SCALE
}

#[inline]
pub fn array2_to_mat_mut(array: &mut Array2<f64>) -> MatMut<'_, f64> {
    let (rows, cols) = array.dim();
    let strides = array.strides();
    let (s0, s1) = (strides[0], strides[1]);
    // SAFETY: shape and strides come straight from the live, uniquely borrowed Array2.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), rows, cols, s0, s1) }
}

#[inline]
pub fn array1_to_col_mat_mut(array: &mut Array1<f64>) -> MatMut<'_, f64> {
    let len = array.len();
    let stride = array.strides()[0];
    // SAFETY: a single column over the vector's own storage; the column stride is unused.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), len, 1, stride, 0) }
}

/// Compute A * B, dispatching to faer's GEMM once the product is large enough.
///
/// For A of shape (n, p) and B of shape (p, q) this returns the (n, q) product.
#[inline]
pub fn fast_ab<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    let (n, p) = a.dim();
    let (p_b, q) = b.dim();
    debug_assert_eq!(p, p_b, "A and B must have compatible inner dimensions");

    if !should_use_faer_matmul(n, q, p) {
        return a.dot(b);
    }

    let mut result = Mat::<f64>::zeros(n, q);
    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    let par = if n < 128 || p < 128 || q < 128 {
        Par::Seq
    } else {
        get_global_parallelism()
    };
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref(),
        b_view.as_ref(),
        1.0,
        par,
    );
    mat_to_array(result.as_ref())
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

/// Borrowed faer view over an ndarray matrix.
///
/// Layouts with non-positive strides are materialized into an owned compact
/// copy, since faer kernels assume forward traversal.
pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.as_standard_layout().into_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, row_stride, col_stride) = match &self.owned {
            Some(owned) => {
                let strides = owned.strides();
                (owned.as_ptr(), strides[0], strides[1])
            }
            None => (self.ptr, self.row_stride, self.col_stride),
        };
        // SAFETY: pointer/shape/strides either come from a live ndarray view with
        // positive strides, or from the owned copy held by this wrapper.
        unsafe { MatRef::from_raw_parts(ptr, self.rows, self.cols, row_stride, col_stride) }
    }
}

/// Lower Cholesky factor `A = L L^T` of a symmetric positive-definite matrix.
pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn dim(&self) -> usize {
        self.factor.L().nrows()
    }

    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let mut rhs = rhs.to_owned();
        let mut rhs_view = array1_to_col_mat_mut(&mut rhs);
        self.factor.solve_in_place(rhs_view.as_mut());
        rhs
    }

    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let mut rhs = rhs.as_standard_layout().into_owned();
        let mut rhs_view = array2_to_mat_mut(&mut rhs);
        self.factor.solve_in_place(rhs_view.as_mut());
        rhs
    }

    /// `A^{-1}` obtained by solving against the identity, symmetrized.
    pub fn inverse(&self) -> Array2<f64> {
        let mut inv = self.solve_mat(&Array2::<f64>::eye(self.dim()));
        crate::linalg::utils::symmetrize_in_place(&mut inv);
        inv
    }

    /// `log|A| = 2 * sum(log L_ii)`.
    pub fn log_det(&self) -> f64 {
        2.0 * self.diag().mapv(f64::ln).sum()
    }

    /// Diagonal of `L`.
    pub fn diag(&self) -> Array1<f64> {
        let l = self.factor.L();
        Array1::from_shape_fn(l.nrows(), |i| l[(i, i)])
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let (rows, cols) = self.dim();
        if rows != cols {
            return Err(FaerLinalgError::NotSquare { rows, cols });
        }
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}
