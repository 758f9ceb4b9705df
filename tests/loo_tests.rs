use approx::assert_abs_diff_eq;
use gpcv::{
    CrossValidation, CrossValidationError, CrossValidationOptions, Precision, SliceFn,
    grad_log_prob_loo, log_prob_loo, log_prob_loo_pointwise, loo_value_and_gradient, predict_folds,
    predict_loo, singleton_folds,
};
use ndarray::{Array1, Array2, array};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn random_pd_covariance(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let a = Array2::from_shape_fn((n, n), |_| normal.sample(&mut rng));
    let mut cov = a.dot(&a.t()) / n as f64;
    for i in 0..n {
        cov[[i, i]] += 0.5;
    }
    cov
}

fn random_symmetric(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let a = Array2::from_shape_fn((n, n), |_| normal.sample(&mut rng));
    (&a + &a.t()) * 0.5
}

fn random_vector(n: usize, seed: u64) -> Array1<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array1::from_shape_fn(n, |_| normal.sample(&mut rng))
}

/// alpha = Σ⁻¹ (y - m)
fn weights(cov: &Array2<f64>, y: &Array1<f64>, m: &Array1<f64>) -> Array1<f64> {
    Precision::from_covariance(cov.view())
        .expect("PD covariance")
        .solve_vec(&(y - m))
}

/// Squared-exponential kernel plus fixed noise, θ = (log ℓ, log σ_f).
fn se_covariance(x: &[f64], theta: [f64; 2], noise: f64) -> Array2<f64> {
    let ell = theta[0].exp();
    let sf2 = (2.0 * theta[1]).exp();
    let n = x.len();
    Array2::from_shape_fn((n, n), |(i, j)| {
        let r = x[i] - x[j];
        let k = sf2 * (-0.5 * r * r / (ell * ell)).exp();
        if i == j { k + noise } else { k }
    })
}

fn se_slices(x: &[f64], theta: [f64; 2]) -> Vec<Array2<f64>> {
    let ell = theta[0].exp();
    let sf2 = (2.0 * theta[1]).exp();
    let n = x.len();
    let k = Array2::from_shape_fn((n, n), |(i, j)| {
        let r = x[i] - x[j];
        sf2 * (-0.5 * r * r / (ell * ell)).exp()
    });
    let d_log_ell = Array2::from_shape_fn((n, n), |(i, j)| {
        let r = x[i] - x[j];
        k[[i, j]] * r * r / (ell * ell)
    });
    let d_log_sf = &k * 2.0;
    vec![d_log_ell, d_log_sf]
}

#[test]
fn singleton_folds_reproduce_loo_predictions() {
    let n = 7;
    let cov = random_pd_covariance(n, 3);
    let y = random_vector(n, 4);
    let m = random_vector(n, 5) * 0.1;
    let alpha = weights(&cov, &y, &m);

    let loo = predict_loo(cov.view(), alpha.view(), y.view()).expect("loo");
    let folds = predict_folds(cov.view(), alpha.view(), y.view(), &singleton_folds(n))
        .expect("folds");
    assert_eq!(folds.len(), n);
    for i in 0..n {
        assert_abs_diff_eq!(folds.means[i][0], loo.mean[i], epsilon = 1e-10);
        assert_abs_diff_eq!(folds.covariances[i][[0, 0]], loo.variance[i], epsilon = 1e-10);
    }
}

#[test]
fn loo_variances_are_positive() {
    for seed in 0..5 {
        let n = 12;
        let cov = random_pd_covariance(n, seed);
        let y = random_vector(n, seed + 100);
        let alpha = weights(&cov, &y, &Array1::zeros(n));
        let pred = predict_loo(cov.view(), alpha.view(), y.view()).expect("loo");
        assert_eq!(pred.len(), n);
        assert!(pred.variance.iter().all(|&v| v > 0.0 && v.is_finite()));
    }
}

#[test]
fn loo_criterion_equals_sum_of_univariate_densities() {
    let n = 9;
    let cov = random_pd_covariance(n, 21);
    let y = random_vector(n, 22);
    let alpha = weights(&cov, &y, &Array1::zeros(n));
    let pred = predict_loo(cov.view(), alpha.view(), y.view()).expect("loo");

    let mut expected = 0.0;
    for i in 0..n {
        let var = pred.variance[i];
        let r = y[i] - pred.mean[i];
        expected += -0.5 * ((2.0 * std::f64::consts::PI * var).ln() + r * r / var);
    }
    let got = log_prob_loo(cov.view(), alpha.view(), y.view()).expect("logp");
    assert_abs_diff_eq!(got, expected, epsilon = 1e-10);

    let pointwise = log_prob_loo_pointwise(cov.view(), alpha.view(), y.view()).expect("pointwise");
    assert_abs_diff_eq!(pointwise.sum(), got, epsilon = 1e-10);
}

#[test]
fn loo_mean_matches_explicit_refit_without_the_point() {
    // Conditioning the prior N(m, Σ) on the other points gives the same moments.
    let cov = array![[1.0, 0.5, 0.2], [0.5, 1.2, 0.3], [0.2, 0.3, 0.9]];
    let m = array![0.1, -0.2, 0.05];
    let y = array![0.7, -0.4, 1.3];
    let alpha = weights(&cov, &y, &m);
    let pred = predict_loo(cov.view(), alpha.view(), y.view()).expect("loo");

    // Held-out index 0, remaining R = {1, 2}.
    let (a, b, d) = (cov[[1, 1]], cov[[1, 2]], cov[[2, 2]]);
    let det = a * d - b * b;
    let rr_inv = array![[d, -b], [-b, a]] / det;
    let k = array![cov[[0, 1]], cov[[0, 2]]];
    let resid_r = array![y[1] - m[1], y[2] - m[2]];
    let mean0 = m[0] + k.dot(&rr_inv.dot(&resid_r));
    let var0 = cov[[0, 0]] - k.dot(&rr_inv.dot(&k));
    assert_abs_diff_eq!(pred.mean[0], mean0, epsilon = 1e-12);
    assert_abs_diff_eq!(pred.variance[0], var0, epsilon = 1e-12);
}

#[test]
fn loo_gradient_matches_finite_differences() {
    let x = [0.0, 0.7, 1.9];
    let y = array![0.3, -0.5, 1.1];
    let noise = 0.1;
    let theta = [0.8f64.ln(), 1.2f64.ln()];

    let criterion = |t: [f64; 2]| -> f64 {
        let cov = se_covariance(&x, t, noise);
        let alpha = weights(&cov, &y, &Array1::zeros(3));
        log_prob_loo(cov.view(), alpha.view(), y.view()).expect("logp")
    };

    let cov = se_covariance(&x, theta, noise);
    let alpha = weights(&cov, &y, &Array1::zeros(3));
    let slices = se_slices(&x, theta);
    let grad = grad_log_prob_loo(
        cov.view(),
        alpha.view(),
        y.view(),
        &slices,
        &CrossValidationOptions::default(),
    )
    .expect("gradient");
    assert_eq!(grad.len(), 2);

    let h = 1e-5;
    for j in 0..2 {
        let mut plus = theta;
        let mut minus = theta;
        plus[j] += h;
        minus[j] -= h;
        let fd = (criterion(plus) - criterion(minus)) / (2.0 * h);
        assert_abs_diff_eq!(grad[j], fd, epsilon = 1e-6 * (1.0 + fd.abs()));
    }
}

#[test]
fn value_and_gradient_agree_with_separate_calls() {
    let x = [0.0, 0.4, 1.1, 1.5, 2.8];
    let y = array![0.2, 0.1, -0.6, -0.3, 0.9];
    let theta = [0.0, 0.3];
    let cov = se_covariance(&x, theta, 0.05);
    let alpha = weights(&cov, &y, &Array1::zeros(5));
    let slices = se_slices(&x, theta);
    let opts = CrossValidationOptions::default();

    let (value, grad) =
        loo_value_and_gradient(cov.view(), alpha.view(), y.view(), &slices, &opts).expect("both");
    let value_only = log_prob_loo(cov.view(), alpha.view(), y.view()).expect("value");
    let grad_only =
        grad_log_prob_loo(cov.view(), alpha.view(), y.view(), &slices, &opts).expect("grad");
    assert_abs_diff_eq!(value, value_only, epsilon = 1e-14);
    for j in 0..2 {
        assert_abs_diff_eq!(grad[j], grad_only[j], epsilon = 1e-14);
    }
}

#[test]
fn variance_derivative_identity_holds_along_random_slices() {
    // d_i sigma_i^2 == (dsigma_i^2/dθ) / sigma_i^2, with the derivative taken
    // numerically along Σ + εZ.
    let n = 6;
    let cov = random_pd_covariance(n, 31);
    let z = random_symmetric(n, 32);
    let y = random_vector(n, 33);
    let alpha = weights(&cov, &y, &Array1::zeros(n));

    let prec = Precision::from_covariance(cov.view()).expect("PD");
    let p = prec.matrix();
    let m = p.dot(&z).dot(p);
    let base = predict_loo(cov.view(), alpha.view(), y.view()).expect("loo");

    let eps = 1e-6;
    let shifted = |s: f64| {
        let c = &cov + &(&z * s);
        let a = weights(&c, &y, &Array1::zeros(n));
        predict_loo(c.view(), a.view(), y.view()).expect("loo").variance
    };
    let var_plus = shifted(eps);
    let var_minus = shifted(-eps);
    for i in 0..n {
        let d_i = m[[i, i]];
        let var = base.variance[i];
        let dvar = (var_plus[i] - var_minus[i]) / (2.0 * eps);
        assert_abs_diff_eq!(d_i * var, dvar / var, epsilon = 1e-6 * (1.0 + (d_i * var).abs()));
    }

    // The internal guard accepts the same slices under a tight tolerance.
    let strict = CrossValidationOptions {
        consistency_tolerance: 1e-12,
        strict_consistency: true,
        ..CrossValidationOptions::default()
    };
    let slices = vec![z];
    assert!(grad_log_prob_loo(cov.view(), alpha.view(), y.view(), &slices, &strict).is_ok());
}

#[test]
fn parallel_and_sequential_gradients_match() {
    let n = 10;
    let cov = random_pd_covariance(n, 41);
    let y = random_vector(n, 42);
    let alpha = weights(&cov, &y, &Array1::zeros(n));
    let slices: Vec<Array2<f64>> = (0..6).map(|s| random_symmetric(n, 50 + s)).collect();

    let sequential = CrossValidationOptions {
        parallel_threshold: usize::MAX,
        ..CrossValidationOptions::default()
    };
    let parallel = CrossValidationOptions {
        parallel_threshold: 1,
        ..CrossValidationOptions::default()
    };
    let g_seq =
        grad_log_prob_loo(cov.view(), alpha.view(), y.view(), &slices, &sequential).expect("seq");
    let g_par =
        grad_log_prob_loo(cov.view(), alpha.view(), y.view(), &slices, &parallel).expect("par");
    assert_eq!(g_seq.len(), 6);
    for j in 0..6 {
        assert_abs_diff_eq!(g_seq[j], g_par[j], epsilon = 1e-12);
    }
}

#[test]
fn closure_slices_match_precomputed_slices() {
    let x = [0.0, 0.3, 0.9, 1.4];
    let y = array![1.0, 0.8, 0.1, -0.2];
    let theta = [0.2, -0.1];
    let cov = se_covariance(&x, theta, 0.2);
    let alpha = weights(&cov, &y, &Array1::zeros(4));
    let slices = se_slices(&x, theta);
    let on_demand = SliceFn::new(2, |j: usize, out: &mut Array2<f64>| {
        out.assign(&se_slices(&x, theta)[j]);
    });

    let cv = CrossValidation::new(
        cov.view(),
        alpha.view(),
        y.view(),
        CrossValidationOptions::default(),
    )
    .expect("valid inputs");
    let a = cv.grad_log_prob_loo(&slices).expect("precomputed");
    let b = cv.grad_log_prob_loo(&on_demand).expect("closure");
    assert_eq!(a, b);
}

#[test]
fn mismatched_lengths_fail_before_computation() {
    let cov = random_pd_covariance(4, 61);
    let y = random_vector(4, 62);
    let alpha = random_vector(3, 63);
    let err = predict_loo(cov.view(), alpha.view(), y.view()).unwrap_err();
    assert!(matches!(
        err,
        CrossValidationError::DimensionMismatch {
            expected: 4,
            found: 3,
            ..
        }
    ));
}

#[test]
fn wrongly_sized_slice_is_rejected() {
    let cov = random_pd_covariance(4, 71);
    let y = random_vector(4, 72);
    let alpha = weights(&cov, &y, &Array1::zeros(4));
    let slices = vec![Array2::<f64>::zeros((3, 3))];
    let err = grad_log_prob_loo(
        cov.view(),
        alpha.view(),
        y.view(),
        &slices,
        &CrossValidationOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, CrossValidationError::DimensionMismatch { .. }));
}

#[test]
fn non_finite_slice_is_rejected() {
    let cov = random_pd_covariance(3, 81);
    let y = random_vector(3, 82);
    let alpha = weights(&cov, &y, &Array1::zeros(3));
    let mut bad = Array2::<f64>::zeros((3, 3));
    bad[[1, 2]] = f64::INFINITY;
    let err = grad_log_prob_loo(
        cov.view(),
        alpha.view(),
        y.view(),
        &vec![bad],
        &CrossValidationOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, CrossValidationError::NonFiniteInput(_)));
}

#[test]
fn non_positive_definite_covariance_is_surfaced() {
    let cov = array![[1.0, 0.0], [0.0, -2.0]];
    let y = array![0.0, 1.0];
    let err = log_prob_loo(cov.view(), y.view(), y.view()).unwrap_err();
    assert!(matches!(err, CrossValidationError::NonPositiveDefinite { .. }));
}

#[test]
fn asymmetric_slice_is_reported_as_numerical_instability() {
    let n = 3;
    let cov = random_pd_covariance(n, 91);
    let y = random_vector(n, 92);
    let alpha = weights(&cov, &y, &Array1::zeros(n));
    let corrupted = array![[0.0, 1e6, -3.0], [-7.0, 0.0, 2e5], [4.0, 9.0, -1e3]];
    let slices = vec![random_symmetric(n, 93), corrupted];

    let err = grad_log_prob_loo(
        cov.view(),
        alpha.view(),
        y.view(),
        &slices,
        &CrossValidationOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CrossValidationError::NumericalInstability {
            hyperparameter: 1,
            index: 0,
            ..
        }
    ));
}

#[test]
fn lenient_mode_uses_the_symmetric_part_of_a_slice() {
    let n = 4;
    let cov = random_pd_covariance(n, 95);
    let y = random_vector(n, 96);
    let alpha = weights(&cov, &y, &Array1::zeros(n));
    let sym = random_symmetric(n, 97);
    let mut skewed = sym.clone();
    skewed[[0, 3]] += 0.4;
    skewed[[3, 0]] -= 0.4;

    let lenient = CrossValidationOptions {
        strict_consistency: false,
        ..CrossValidationOptions::default()
    };
    let g_skewed = grad_log_prob_loo(cov.view(), alpha.view(), y.view(), &vec![skewed], &lenient)
        .expect("lenient");
    let g_sym = grad_log_prob_loo(
        cov.view(),
        alpha.view(),
        y.view(),
        &vec![sym],
        &CrossValidationOptions::default(),
    )
    .expect("symmetric");
    assert_abs_diff_eq!(g_skewed[0], g_sym[0], epsilon = 1e-12 * (1.0 + g_sym[0].abs()));
}

#[test]
fn views_with_distinct_owners_are_accepted() {
    let n = 5;
    let cov = random_pd_covariance(n, 101);
    let y = random_vector(n, 102);
    let loo = {
        let alpha = weights(&cov, &y, &Array1::zeros(n));
        predict_loo(cov.view(), alpha.view(), y.view()).expect("loo")
    };
    let logp = {
        let alpha = weights(&cov, &y, &Array1::zeros(n));
        let cov_copy = cov.clone();
        log_prob_loo(cov_copy.view(), alpha.view(), y.view()).expect("logp")
    };
    let expected: f64 = (0..n)
        .map(|i| {
            let r = y[i] - loo.mean[i];
            -0.5 * ((2.0 * std::f64::consts::PI * loo.variance[i]).ln() + r * r / loo.variance[i])
        })
        .sum();
    assert_abs_diff_eq!(logp, expected, epsilon = 1e-10);
}
