//! Global moments and cross-team correlation
//!
//! The correlated t-test and the tau estimator are driven by one global
//! estimate per hypothesis rather than per-voxel estimates:
//! - `mean`: grand mean of every entry of the feature matrix
//! - `variance`: mean over teams of each team's variance across voxels (ddof 0)
//! - `Q`: Pearson correlation between team rows, voxels as the sample axis

use ndarray::Array2;
use rayon::prelude::*;

use crate::error::{ConsensusError, Result};
use crate::features::FeatureMatrix;
use crate::utils::simd_ops::{axpy_f64, dot_product_f64, sum_f64, sum_squared_deviations_f64};

/// Voxel chunk size for parallel column reductions
pub(crate) const VOXEL_CHUNK: usize = 4096;

/// Global (mean, variance) pair shared by every voxel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarMoments {
    pub mean: f64,
    pub variance: f64,
}

impl ScalarMoments {
    /// Estimate the grand mean and pooled within-team variance
    pub fn estimate(features: &FeatureMatrix) -> Result<Self> {
        ensure_estimable(features)?;
        let n = features.n_teams();
        let v = features.n_voxels();

        let mut total = 0.0;
        let mut variance_sum = 0.0;
        for team in 0..n {
            let row = features.row(team);
            let row_sum = sum_f64(row);
            total += row_sum;
            variance_sum += sum_squared_deviations_f64(row, row_sum / v as f64) / v as f64;
        }

        let moments = Self {
            mean: total / (n * v) as f64,
            variance: variance_sum / n as f64,
        };
        if !moments.variance.is_finite() || moments.variance <= 0.0 {
            return Err(ConsensusError::DegenerateInput(format!(
                "pooled variance is {} (every team map is constant)",
                moments.variance
            )));
        }
        Ok(moments)
    }
}

/// Symmetric `n x n` team correlation matrix with unit diagonal
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    q: Array2<f64>,
}

impl CorrelationMatrix {
    /// Pearson correlation of the team rows
    ///
    /// A team whose map is constant over the mask has undefined correlation
    /// and fails with `DegenerateInput`.
    pub fn estimate(features: &FeatureMatrix) -> Result<Self> {
        ensure_estimable(features)?;
        let n = features.n_teams();
        let v = features.n_voxels();

        let mut centered = Vec::with_capacity(n);
        let mut norms = Vec::with_capacity(n);
        for team in 0..n {
            let row = features.row(team);
            let mean = sum_f64(row) / v as f64;
            let c: Vec<f64> = row.iter().map(|&x| x - mean).collect();
            let ss = dot_product_f64(&c, &c);
            if ss <= 0.0 || !ss.is_finite() {
                return Err(ConsensusError::DegenerateInput(format!(
                    "map of {} is constant over the mask; correlation is undefined",
                    features.teams()[team]
                )));
            }
            norms.push(ss.sqrt());
            centered.push(c);
        }

        let upper: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (i + 1..n)
                    .map(|j| {
                        let r = dot_product_f64(&centered[i], &centered[j]) / (norms[i] * norms[j]);
                        r.clamp(-1.0, 1.0)
                    })
                    .collect()
            })
            .collect();

        let mut q = Array2::eye(n);
        for (i, row) in upper.iter().enumerate() {
            for (offset, &r) in row.iter().enumerate() {
                let j = i + 1 + offset;
                q[[i, j]] = r;
                q[[j, i]] = r;
            }
        }
        Ok(Self { q })
    }

    /// Use a known correlation matrix
    pub fn from_array(q: Array2<f64>) -> Result<Self> {
        let (rows, cols) = q.dim();
        if rows != cols || rows == 0 {
            return Err(ConsensusError::ShapeMismatch {
                source_name: "correlation matrix".to_string(),
                detail: format!("expected a non-empty square matrix, got {}x{}", rows, cols),
            });
        }
        for i in 0..rows {
            for j in 0..cols {
                let value = q[[i, j]];
                if !value.is_finite() {
                    return Err(ConsensusError::non_finite("correlation", i * cols + j));
                }
                if (value - q[[j, i]]).abs() > 1e-12 {
                    return Err(ConsensusError::DegenerateInput(format!(
                        "correlation matrix is not symmetric at ({}, {})",
                        i, j
                    )));
                }
            }
        }
        Ok(Self { q })
    }

    /// Independent teams
    pub fn identity(n: usize) -> Self {
        Self { q: Array2::eye(n) }
    }

    /// Number of teams
    pub fn n(&self) -> usize {
        self.q.nrows()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.q
    }

    /// Sum of all entries, `1ᵗ Q 1`
    pub fn total(&self) -> f64 {
        self.q.sum()
    }

    pub fn trace(&self) -> f64 {
        self.q.diag().sum()
    }

    /// Mean of the strict upper triangle (0 for a single team)
    pub fn mean_off_diagonal(&self) -> f64 {
        let n = self.n();
        if n < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..n {
            for j in i + 1..n {
                sum += self.q[[i, j]];
            }
        }
        sum / (n * (n - 1) / 2) as f64
    }
}

/// Per-voxel mean across teams
pub fn voxel_means(features: &FeatureMatrix) -> Vec<f64> {
    let n = features.n_teams();
    let mut means = vec![0.0; features.n_voxels()];
    if n == 0 {
        return means;
    }
    let weight = 1.0 / n as f64;
    means
        .par_chunks_mut(VOXEL_CHUNK)
        .enumerate()
        .for_each(|(chunk, acc)| {
            let start = chunk * VOXEL_CHUNK;
            let end = start + acc.len();
            for team in 0..n {
                axpy_f64(acc, weight, &features.row(team)[start..end]);
            }
        });
    means
}

fn ensure_estimable(features: &FeatureMatrix) -> Result<()> {
    if features.n_teams() < 2 {
        return Err(ConsensusError::DegenerateInput(format!(
            "need at least 2 team maps, found {}",
            features.n_teams()
        )));
    }
    if features.n_voxels() < 2 {
        return Err(ConsensusError::DegenerateInput(format!(
            "need at least 2 in-mask voxels, found {}",
            features.n_voxels()
        )));
    }
    Ok(())
}
