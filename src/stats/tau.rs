//! Between-team heterogeneity (tau)
//!
//! With the centering operator `R = I - J/n`, the expected residual sum of
//! squares of a team vector under correlation `Q` is proportional to
//! `trace(R Q)`. Tau rescales each voxel's observed residual sum of squares
//! `Yᵗ R Y` by that expectation:
//!
//! ```text
//! tau² = Yᵗ R Y / trace(R Q)
//! ```
//!
//! Both quantities are evaluated without forming `R`:
//! `trace(R Q) = trace(Q) - 1ᵗ Q 1 / n` and `Yᵗ R Y = Σ (y_i - ȳ)²`.

use rayon::prelude::*;

use crate::error::{ensure_finite, ConsensusError, Result};
use crate::features::FeatureMatrix;
use crate::stats::moments::{voxel_means, CorrelationMatrix, VOXEL_CHUNK};
use crate::utils::simd_ops::accumulate_squared_deviations_f64;

/// Relative tolerance below which a voxel residual is treated as zero
const RESIDUAL_EPS: f64 = 1e-12;

/// Per-voxel heterogeneity estimate
#[derive(Debug, Clone)]
pub struct TauEstimate {
    /// tau per voxel (always >= 0)
    pub tau: Vec<f64>,
    /// Normaliser `trace(R Q)`
    pub sampvar_est: f64,
}

/// `trace(R Q)` with `R = I - J/n`
pub fn residual_trace(q: &CorrelationMatrix) -> f64 {
    q.trace() - q.total() / q.n() as f64
}

/// Residual sum of squares about the team mean, per voxel
pub fn residual_sum_of_squares(features: &FeatureMatrix) -> Vec<f64> {
    let n = features.n_teams();
    let means = voxel_means(features);
    let mut rss = vec![0.0; features.n_voxels()];

    rss.par_chunks_mut(VOXEL_CHUNK)
        .zip(means.par_chunks(VOXEL_CHUNK))
        .enumerate()
        .for_each(|(chunk, (acc, center))| {
            let start = chunk * VOXEL_CHUNK;
            let end = start + acc.len();
            for team in 0..n {
                accumulate_squared_deviations_f64(acc, &features.row(team)[start..end], center);
            }
        });
    rss
}

/// Rounding error bound of `trace(Q) - 1ᵗ Q 1 / n`
///
/// Scales with the magnitudes that cancel, so nearly identical teams keep a
/// small but resolvable `trace(R Q)`.
fn cancellation_bound(q: &CorrelationMatrix) -> f64 {
    8.0 * q.n() as f64 * f64::EPSILON * q.total().abs().max(q.trace().abs())
}

/// Estimate tau at every voxel
///
/// When every team is perfectly correlated, `trace(R Q)` vanishes and tau is
/// only defined (as 0) where the teams also agree exactly; any residual
/// spread then fails with `NumericInstability`. "Vanishes" means within the
/// rounding error of the subtraction, not below a fixed constant.
pub fn estimate_tau(features: &FeatureMatrix, q: &CorrelationMatrix) -> Result<TauEstimate> {
    let n = features.n_teams();
    if q.n() != n {
        return Err(ConsensusError::ShapeMismatch {
            source_name: "correlation matrix".to_string(),
            detail: format!("{} teams in Q but {} rows in the feature matrix", q.n(), n),
        });
    }
    if n < 2 {
        return Err(ConsensusError::DegenerateInput(format!(
            "need at least 2 team maps, found {}",
            n
        )));
    }

    let sampvar_est = residual_trace(q);
    let rss = residual_sum_of_squares(features);
    let trace_scale = cancellation_bound(q);

    if sampvar_est < -trace_scale || !sampvar_est.is_finite() {
        return Err(ConsensusError::DegenerateInput(format!(
            "trace(RQ) is {}; correlation matrix is not positive semi-definite",
            sampvar_est
        )));
    }

    let tau = if sampvar_est <= trace_scale {
        let means = voxel_means(features);
        if let Some(voxel) = rss
            .iter()
            .zip(means.iter())
            .position(|(&r, &m)| r > RESIDUAL_EPS * n as f64 * (1.0 + m * m))
        {
            return Err(ConsensusError::non_finite("tau", voxel));
        }
        vec![0.0; rss.len()]
    } else {
        rss.par_iter()
            .map(|&r| (r / sampvar_est).max(0.0).sqrt())
            .collect()
    };

    ensure_finite("tau", &tau)?;
    Ok(TauEstimate { tau, sampvar_est })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    /// Direct `Yᵗ R Y / trace(R Q)` with explicit matrices
    fn reference_tau(data: &Array2<f64>, q: &Array2<f64>) -> Vec<f64> {
        let n = data.nrows();
        let r = Array2::<f64>::eye(n) - Array2::<f64>::from_elem((n, n), 1.0 / n as f64);
        let sampvar = r.dot(q).diag().sum();
        data.columns()
            .into_iter()
            .map(|y| (y.dot(&r.dot(&y)) / sampvar).sqrt())
            .collect()
    }

    #[test]
    fn test_matches_matrix_formula() {
        let features = FeatureMatrix::from_array(array![
            [0.5, 1.2, -0.3, 2.0],
            [0.7, 0.9, -0.1, 1.6],
            [0.2, 1.5, 0.4, 2.4],
        ])
        .unwrap();
        let q = CorrelationMatrix::estimate(&features).unwrap();

        let estimate = estimate_tau(&features, &q).unwrap();
        let expected = reference_tau(features.data(), q.as_array());
        for (j, (&got, &want)) in estimate.tau.iter().zip(expected.iter()).enumerate() {
            assert!(
                (got - want).abs() <= 1e-6 * want.abs().max(1e-12),
                "voxel {}: got {}, expected {}",
                j, got, want
            );
        }
    }

    #[test]
    fn test_identity_correlation_gives_sample_sd() {
        let features = FeatureMatrix::from_array(array![[1.0, 0.0], [3.0, 0.0], [5.0, 6.0]]).unwrap();
        let q = CorrelationMatrix::identity(3);

        let estimate = estimate_tau(&features, &q).unwrap();
        // trace(R) = n - 1, so tau is the sample standard deviation
        assert!((estimate.sampvar_est - 2.0).abs() < 1e-12);
        assert!((estimate.tau[0] - 2.0).abs() < 1e-12);
        assert!((estimate.tau[1] - 12.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_identical_teams_have_zero_tau() {
        let features = FeatureMatrix::from_array(array![
            [1.0, 2.0, 3.0],
            [1.0, 2.0, 3.0],
            [1.0, 2.0, 3.0],
            [1.0, 2.0, 3.0],
        ])
        .unwrap();
        let q = CorrelationMatrix::estimate(&features).unwrap();

        let estimate = estimate_tau(&features, &q).unwrap();
        assert!(estimate.sampvar_est.abs() < 1e-9);
        for &t in &estimate.tau {
            assert!(t.abs() < 1e-9, "tau {} should be 0", t);
        }
    }

    #[test]
    fn test_perfect_correlation_with_spread_is_unstable() {
        let features = FeatureMatrix::from_array(array![[1.0, 2.0], [2.0, 4.0]]).unwrap();
        let q = CorrelationMatrix::from_array(array![[1.0, 1.0], [1.0, 1.0]]).unwrap();
        assert!(matches!(
            estimate_tau(&features, &q),
            Err(ConsensusError::NumericInstability { .. })
        ));
    }

    #[test]
    fn test_nearly_identical_teams_keep_finite_tau() {
        // Two identical teams and a third offset by at most ~1e-4
        let v = 1000;
        let base: Vec<f64> = (0..v).map(|k| ((k * 37) % 101) as f64 / 10.0).collect();
        let offset: Vec<f64> = (0..v).map(|k| 1e-6 * ((k * 53) % 97) as f64).collect();
        let data = Array2::from_shape_fn((3, v), |(i, k)| if i == 2 { base[k] + offset[k] } else { base[k] });
        let features = FeatureMatrix::from_array(data).unwrap();
        let q = CorrelationMatrix::estimate(&features).unwrap();

        let estimate = estimate_tau(&features, &q).unwrap();
        assert!(estimate.sampvar_est > 0.0 && estimate.sampvar_est < 1e-9, "trace(RQ) {}", estimate.sampvar_est);

        let n = 3;
        let r = Array2::<f64>::eye(n) - Array2::<f64>::from_elem((n, n), 1.0 / n as f64);
        let sampvar = r.dot(q.as_array()).diag().sum();
        assert!((estimate.sampvar_est - sampvar).abs() <= 1e-3 * sampvar);

        // Offsets (0, 0, d) leave a residual sum of squares of 2d²/3
        for (k, &d) in offset.iter().enumerate() {
            let want = (2.0 * d * d / 3.0 / sampvar).sqrt();
            let got = estimate.tau[k];
            assert!(
                (got - want).abs() <= 1e-3 * want + 1e-9,
                "voxel {}: got {}, expected {}",
                k, got, want
            );
        }
    }

    #[test]
    fn test_tau_is_non_negative_across_chunks() {
        let n = 5;
        let v = VOXEL_CHUNK + 123;
        let data = Array2::from_shape_fn((n, v), |(i, j)| ((i * 7 + j * 13) % 11) as f64 - 5.0 + 0.1 * i as f64);
        let features = FeatureMatrix::from_array(data).unwrap();
        let q = CorrelationMatrix::estimate(&features).unwrap();

        let estimate = estimate_tau(&features, &q).unwrap();
        assert_eq!(estimate.tau.len(), v);
        assert!(estimate.tau.iter().all(|&t| t >= 0.0 && t.is_finite()));

        let rss = residual_sum_of_squares(&features);
        let last = v - 1;
        let column: Vec<f64> = (0..n).map(|i| features.data()[[i, last]]).collect();
        let mean = column.iter().sum::<f64>() / n as f64;
        let expected: f64 = column.iter().map(|x| (x - mean) * (x - mean)).sum();
        assert!((rss[last] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_mismatched_correlation() {
        let features = FeatureMatrix::from_array(array![[1.0, 2.0], [2.0, 1.0]]).unwrap();
        assert!(matches!(
            estimate_tau(&features, &CorrelationMatrix::identity(3)),
            Err(ConsensusError::ShapeMismatch { .. })
        ));
    }
}
