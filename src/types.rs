use crate::errors::CrossValidationError;
use ndarray::{Array1, Array2};

/// An ordered list of distinct observation indices held out together.
pub type Fold = Vec<usize>;

/// Leave-one-out predictive moments, one entry per observation.
#[derive(Debug, Clone, PartialEq)]
pub struct LooPrediction {
    pub mean: Array1<f64>,
    pub variance: Array1<f64>,
}

impl LooPrediction {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

/// Joint predictive moments of each fold given every observation outside it.
///
/// Entries are in the order the folds were supplied; `means[k][a]` and
/// `covariances[k][[a, b]]` refer to `folds[k][a]` and `folds[k][b]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldPrediction {
    pub means: Vec<Array1<f64>>,
    pub covariances: Vec<Array2<f64>>,
}

impl FoldPrediction {
    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Fold criterion with its per-fold breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldScore {
    pub total: f64,
    /// Log density of each fold's held-out observations.
    pub per_fold: Vec<f64>,
    /// Diagonal jitter added to each fold covariance (`None` when none was needed).
    pub jitter: Vec<Option<f64>>,
}

impl FoldScore {
    pub fn repaired_folds(&self) -> usize {
        self.jitter.iter().filter(|j| j.is_some()).count()
    }
}

/// `[[0], [1], ..., [n-1]]`: the fold layout equivalent to leave-one-out.
pub fn singleton_folds(n: usize) -> Vec<Fold> {
    (0..n).map(|i| vec![i]).collect()
}

/// Split `0..n` into `k` contiguous blocks whose sizes differ by at most one.
///
/// The first `n % k` blocks carry the extra element.
pub fn contiguous_folds(n: usize, k: usize) -> Result<Vec<Fold>, CrossValidationError> {
    if k == 0 || k > n {
        return Err(CrossValidationError::InvalidFold(format!(
            "cannot split {n} observations into {k} non-empty contiguous folds"
        )));
    }
    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for f in 0..k {
        let size = base + usize::from(f < extra);
        folds.push((start..start + size).collect());
        start += size;
    }
    Ok(folds)
}
