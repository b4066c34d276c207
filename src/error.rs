//! Error taxonomy for consensus analysis
//!
//! Every error is scoped to a single hypothesis: the pipeline records the
//! failure and moves on to the next one.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ConsensusError>;

#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Geometry of an input image does not match the spatial mask
    #[error("shape mismatch for {source_name}: {detail}")]
    ShapeMismatch { source_name: String, detail: String },

    /// Too few teams/voxels, or a variance/correlation that cannot be estimated
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// NaN or Inf found where a finite value is required
    #[error("non-finite {quantity} value at voxel {voxel}")]
    NumericInstability { quantity: String, voxel: usize },

    /// Image bytes could not be decoded, or describe an unsupported layout
    #[error("invalid image data: {0}")]
    Format(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid run manifest: {0}")]
    Manifest(String),
}

impl ConsensusError {
    /// Stable short name for diagnostics and run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusError::ShapeMismatch { .. } => "shape_mismatch",
            ConsensusError::DegenerateInput(_) => "degenerate_input",
            ConsensusError::NumericInstability { .. } => "numeric_instability",
            ConsensusError::Format(_) => "format",
            ConsensusError::Io { .. } => "io",
            ConsensusError::Manifest(_) => "manifest",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConsensusError::Io { path: path.into(), source }
    }

    pub(crate) fn non_finite(quantity: impl Into<String>, voxel: usize) -> Self {
        ConsensusError::NumericInstability { quantity: quantity.into(), voxel }
    }
}

/// Return the index of the first non-finite value, if any
pub(crate) fn first_non_finite(values: &[f64]) -> Option<usize> {
    values.iter().position(|v| !v.is_finite())
}

/// Fail with `NumericInstability` if any value is NaN or infinite
pub(crate) fn ensure_finite(quantity: &str, values: &[f64]) -> Result<()> {
    match first_non_finite(values) {
        Some(voxel) => Err(ConsensusError::non_finite(quantity, voxel)),
        None => Ok(()),
    }
}
