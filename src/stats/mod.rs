//! Consensus statistics
//!
//! This module provides the voxel-wise statistical core:
//! - moments: global mean/variance and the team correlation matrix Q
//! - ttest: correlated one-sample t-test (Nichols-Mumford)
//! - tau: between-team heterogeneity from the same Q
//! - fdr: false discovery rate correction across all voxels
//!
//! All estimators take one global (mean, variance, Q) per hypothesis and
//! apply it uniformly to every voxel.

pub mod moments;
pub mod ttest;
pub mod tau;
pub mod fdr;

pub use moments::{voxel_means, CorrelationMatrix, ScalarMoments};
pub use ttest::{adjusted_standard_error, correlated_ttest, design_effect, naive_standard_error, CorrelatedTTest};
pub use tau::{estimate_tau, residual_sum_of_squares, residual_trace, TauEstimate};
pub use fdr::{correct, FdrMethod, FdrResult};
