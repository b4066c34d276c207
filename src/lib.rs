//! Consensus-Core: correlated-effects consensus maps for multi-team neuroimaging
//!
//! Many analysis teams estimate the same contrast from the same data, so
//! their effect maps are not independent. This crate combines them voxel by
//! voxel with a one-sample t-test whose variance is inflated by the
//! empirical cross-team correlation, estimates between-team heterogeneity
//! (tau) from the same correlation, and controls the false discovery rate
//! across voxels.
//!
//! # Modules
//! - `nifti_io`: NIfTI-1 volume reading and writing
//! - `masker`: Mask-restricted volume <-> vector transform
//! - `features`: Team-by-voxel matrix assembly
//! - `stats`: Moments, correlated t-test, tau, FDR
//! - `materialize`: Atomic writing of result images
//! - `pipeline`: Per-hypothesis orchestration and run reports
//! - `config`: Run configuration and manifest
//! - `utils`: Vectorised reductions

pub mod error;
pub mod config;

// Numerical core
pub mod stats;
pub mod utils;

// Volume space
pub mod nifti_io;
pub mod masker;
pub mod features;
pub mod materialize;

// Orchestration
pub mod pipeline;

pub use config::{ConsensusConfig, Hypothesis, RunManifest};
pub use error::{ConsensusError, Result};
pub use features::{EffectMapSource, FeatureMatrix};
pub use masker::SpatialMask;
pub use pipeline::{analyze, run_consensus, run_hypothesis, HypothesisOutcome, HypothesisSummary, RunReport};
pub use stats::FdrMethod;
