//! Statistical properties of the consensus estimators on simulated teams

mod common;

use common::*;
use consensus_core::stats::{
    adjusted_standard_error, correct, correlated_ttest, estimate_tau, naive_standard_error, voxel_means,
    CorrelationMatrix, FdrMethod, ScalarMoments,
};
use consensus_core::{analyze, ConsensusConfig, FeatureMatrix};
use ndarray::{array, Array2};
use rand_distr::{Distribution, Normal};

fn iid_features(seed: u64, n_teams: usize, n_voxels: usize, effect: f64) -> FeatureMatrix {
    let mut rng = rng(seed);
    let normal = Normal::new(effect, 1.0).unwrap();
    let data = Array2::from_shape_fn((n_teams, n_voxels), |_| normal.sample(&mut rng));
    FeatureMatrix::from_array(data).unwrap()
}

#[test]
fn test_identical_teams_scenario() {
    let features = FeatureMatrix::from_array(array![
        [1.0, 2.0, 3.0],
        [1.0, 2.0, 3.0],
        [1.0, 2.0, 3.0],
        [1.0, 2.0, 3.0],
    ])
    .unwrap();

    let moments = ScalarMoments::estimate(&features).unwrap();
    let q = CorrelationMatrix::estimate(&features).unwrap();
    assert!(q.as_array().iter().all(|&r| (r - 1.0).abs() < 1e-12));

    let tau = estimate_tau(&features, &q).unwrap();
    assert!(tau.tau.iter().all(|&t| t.abs() < 1e-9), "tau {:?}", tau.tau);

    let adjusted = adjusted_standard_error(moments.variance, &q);
    let naive = naive_standard_error(moments.variance, 4);
    assert!(adjusted > naive);
}

#[test]
fn test_null_simulation_controls_fdr() {
    let alpha = 0.05;
    let trials = 100;
    let mut false_discovery_proportion = 0.0;

    for trial in 0..trials {
        let features = iid_features(1000 + trial, 20, 400, 0.0);
        let result = analyze(&features, &ConsensusConfig { alpha, ..ConsensusConfig::default() }).unwrap();
        // Under the complete null every rejection is false: FDP is 1 if anything is rejected
        if result.fdr.n_rejected() > 0 {
            false_discovery_proportion += 1.0;
        }
    }

    let rate = false_discovery_proportion / trials as f64;
    assert!(rate <= alpha, "null rejection rate {} exceeds alpha {}", rate, alpha);
}

#[test]
fn test_uniform_effect_is_detected() {
    // A spatially constant effect leaves Q near identity and the variance at the noise level
    let features = iid_features(7, 20, 300, 1.0);

    let result = analyze(&features, &ConsensusConfig::default()).unwrap();
    assert!(result.correlation.mean_off_diagonal().abs() < 0.1);
    let hits = result.fdr.n_rejected();
    assert!(hits >= 285, "only {} of 300 voxels detected", hits);
}

#[test]
fn test_independence_reduction_on_random_data() {
    let features = iid_features(3, 12, 250, 0.3);
    let moments = ScalarMoments::estimate(&features).unwrap();
    let identity = CorrelationMatrix::identity(12);

    let result = correlated_ttest(&features, &moments, &identity).unwrap();
    let se = (moments.variance / 12.0).sqrt();
    let means = voxel_means(&features);
    for (t, m) in result.t.iter().zip(means.iter()) {
        assert!((t - m / se).abs() <= 1e-9 * (1.0 + t.abs()));
    }
}

#[test]
fn test_negation_symmetry_on_random_data() {
    let features = iid_features(5, 15, 333, 0.5);
    let negated = FeatureMatrix::from_array(features.data().mapv(|x| -x)).unwrap();

    let config = ConsensusConfig::default();
    let a = analyze(&features, &config).unwrap();
    let b = analyze(&negated, &config).unwrap();

    for j in 0..features.n_voxels() {
        assert_eq!(a.ttest.t[j], -b.ttest.t[j], "voxel {}", j);
        assert_eq!(a.ttest.p[j], b.ttest.p[j], "voxel {}", j);
        assert!((a.tau.tau[j] - b.tau.tau[j]).abs() < 1e-12);
    }
    assert_eq!(a.fdr.reject, b.fdr.reject);
}

#[test]
fn test_correlation_inflates_standard_error() {
    let mut rng = rng(9);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let (n, v) = (10, 500);
    let shared: Vec<f64> = (0..v).map(|_| normal.sample(&mut rng)).collect();
    let correlated = Array2::from_shape_fn((n, v), |(_, j)| shared[j] + 0.3 * normal.sample(&mut rng));
    let features = FeatureMatrix::from_array(correlated).unwrap();

    let result = analyze(&features, &ConsensusConfig::default()).unwrap();
    let naive = naive_standard_error(result.moments.variance, n);
    assert!(result.correlation.mean_off_diagonal() > 0.8);
    assert!(result.ttest.standard_error > 2.5 * naive);
    assert!(result.tau.tau.iter().all(|&t| t >= 0.0));
}

#[test]
fn test_fdr_monotone_on_simulated_p_values() {
    let features = iid_features(17, 20, 600, 0.4);
    let result = analyze(&features, &ConsensusConfig::default()).unwrap();

    for method in [FdrMethod::Bh, FdrMethod::By, FdrMethod::Tsbh] {
        let strict = correct(&result.ttest.p, 0.05, method).unwrap();
        let loose = correct(&result.ttest.p, 0.10, method).unwrap();
        assert!(loose.n_rejected() >= strict.n_rejected(), "{}", method);
        for (s, l) in strict.reject.iter().zip(loose.reject.iter()) {
            assert!(!s || *l, "{}: rejection lost when alpha grew", method);
        }
    }
}
