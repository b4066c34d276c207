//! Correlated one-sample t-test
//!
//! Generalised one-sample t-test for observations with a known correlation
//! structure (the Nichols-Mumford correlated-effects method). With `n` teams,
//! pooled variance `s²` and team correlation `Q`, the variance of the
//! per-voxel team mean is
//!
//! ```text
//! Var(mean) = s² · 1ᵗ Q 1 / n²
//! ```
//!
//! which reduces to the classical `s² / n` when `Q = I`. Each voxel's
//! statistic is `t = mean / sqrt(Var(mean))`, referred to a Student t
//! distribution with `n - 1` degrees of freedom (two-sided).

use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{ensure_finite, ConsensusError, Result};
use crate::features::FeatureMatrix;
use crate::stats::moments::{voxel_means, CorrelationMatrix, ScalarMoments};

/// Per-voxel statistics of the correlated t-test
#[derive(Debug, Clone)]
pub struct CorrelatedTTest {
    /// t-statistic per voxel
    pub t: Vec<f64>,
    /// Two-sided p-value per voxel
    pub p: Vec<f64>,
    /// Correlation-adjusted standard error shared by every voxel
    pub standard_error: f64,
    /// Degrees of freedom of the reference distribution
    pub df: f64,
}

/// Classical standard error of a mean of `n` independent observations
pub fn naive_standard_error(variance: f64, n: usize) -> f64 {
    (variance / n as f64).sqrt()
}

/// Standard error of the team mean under correlation `Q`
pub fn adjusted_standard_error(variance: f64, q: &CorrelationMatrix) -> f64 {
    let n = q.n() as f64;
    (variance * q.total() / (n * n)).sqrt()
}

/// Ratio of the correlated to the independent variance of the mean
///
/// `1ᵗ Q 1 / n`: 1 for independent teams, `n` for perfectly correlated ones.
pub fn design_effect(q: &CorrelationMatrix) -> f64 {
    q.total() / q.n() as f64
}

/// Two-sided p-value of `t` under the given reference distribution
pub fn two_sided_p(t: f64, dist: &StudentsT) -> f64 {
    (2.0 * dist.sf(t.abs())).min(1.0)
}

/// Run the correlated t-test at every voxel
///
/// # Arguments
/// * `features` - Team-by-voxel matrix
/// * `moments` - Global mean/variance of `features`
/// * `q` - Team correlation matrix (`n x n`)
///
/// # Returns
/// t-statistics and p-values aligned with the feature columns
pub fn correlated_ttest(
    features: &FeatureMatrix,
    moments: &ScalarMoments,
    q: &CorrelationMatrix,
) -> Result<CorrelatedTTest> {
    let n = features.n_teams();
    if n < 2 {
        return Err(ConsensusError::DegenerateInput(format!(
            "need at least 2 team maps, found {}",
            n
        )));
    }
    if q.n() != n {
        return Err(ConsensusError::ShapeMismatch {
            source_name: "correlation matrix".to_string(),
            detail: format!("{} teams in Q but {} rows in the feature matrix", q.n(), n),
        });
    }
    if !moments.variance.is_finite() || moments.variance <= 0.0 {
        return Err(ConsensusError::DegenerateInput(format!(
            "pooled variance is {}",
            moments.variance
        )));
    }
    if !(q.total() > 0.0) {
        return Err(ConsensusError::DegenerateInput(format!(
            "sum of team correlations is {}",
            q.total()
        )));
    }

    let standard_error = adjusted_standard_error(moments.variance, q);
    let df = (n - 1) as f64;
    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| ConsensusError::DegenerateInput(format!("invalid t distribution: {}", e)))?;

    let means = voxel_means(features);
    let (t, p): (Vec<f64>, Vec<f64>) = means
        .par_iter()
        .map(|&m| {
            let t = m / standard_error;
            (t, two_sided_p(t, &dist))
        })
        .unzip();

    ensure_finite("t", &t)?;
    ensure_finite("p", &p)?;

    Ok(CorrelatedTTest { t, p, standard_error, df })
}
