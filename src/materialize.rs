//! Result volumes
//!
//! Scatters the per-voxel result vectors of one hypothesis back into the mask
//! grid and writes four images:
//! - `hypo{N}_t.nii.gz`: correlated t-statistic
//! - `hypo{N}_1-p.nii.gz`: one minus the uncorrected p-value
//! - `hypo{N}_1-fdr.nii.gz`: one minus the FDR-adjusted p-value
//! - `hypo{N}_tau.nii.gz`: between-team heterogeneity
//!
//! Images are encoded in memory and staged in temporary files next to their
//! targets; nothing is renamed into place until all four are on disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ensure_finite, ConsensusError, Result};
use crate::masker::SpatialMask;
use crate::nifti_io::encode_for_path;

/// Paths of the four result images of one hypothesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultVolumeSet {
    pub t: PathBuf,
    pub one_minus_p: PathBuf,
    pub one_minus_fdr: PathBuf,
    pub tau: PathBuf,
}

impl ResultVolumeSet {
    pub fn for_hypothesis(output_dir: &Path, hypothesis: u32) -> Self {
        let path = |suffix: &str| output_dir.join(format!("hypo{}_{}.nii.gz", hypothesis, suffix));
        Self {
            t: path("t"),
            one_minus_p: path("1-p"),
            one_minus_fdr: path("1-fdr"),
            tau: path("tau"),
        }
    }

    pub fn paths(&self) -> [&Path; 4] {
        [&self.t, &self.one_minus_p, &self.one_minus_fdr, &self.tau]
    }

    /// True when every target image is present
    pub fn exists(&self) -> bool {
        self.paths().iter().all(|p| p.is_file())
    }

    /// True when any target image is present
    pub fn any_exists(&self) -> bool {
        self.paths().iter().any(|p| p.exists())
    }
}

/// Voxel-aligned result vectors of one hypothesis
#[derive(Debug, Clone, Copy)]
pub struct ResultVectors<'a> {
    pub t: &'a [f64],
    pub p: &'a [f64],
    pub p_fdr: &'a [f64],
    pub tau: &'a [f64],
}

/// Write the result images of one hypothesis into `output_dir`
///
/// Re-running with the same vectors rewrites byte-identical files. If any
/// image fails to encode or write, no target file of this hypothesis is
/// created or replaced.
pub fn write_results(
    mask: &SpatialMask,
    vectors: &ResultVectors<'_>,
    output_dir: &Path,
    hypothesis: u32,
) -> Result<ResultVolumeSet> {
    ensure_finite("t", vectors.t)?;
    ensure_finite("p", vectors.p)?;
    ensure_finite("fdr", vectors.p_fdr)?;
    ensure_finite("tau", vectors.tau)?;

    let one_minus = |values: &[f64]| -> Vec<f64> { values.iter().map(|&p| 1.0 - p).collect() };
    let set = ResultVolumeSet::for_hypothesis(output_dir, hypothesis);
    let images = [
        (&set.t, vectors.t.to_vec()),
        (&set.one_minus_p, one_minus(vectors.p)),
        (&set.one_minus_fdr, one_minus(vectors.p_fdr)),
        (&set.tau, vectors.tau.to_vec()),
    ];

    let mut encoded = Vec::with_capacity(images.len());
    for (path, values) in &images {
        let volume = mask.inverse(values)?;
        encoded.push((path.as_path(), encode_for_path(path, &volume)?));
    }

    let mut staged = Vec::with_capacity(encoded.len());
    for (path, bytes) in &encoded {
        staged.push((*path, stage(output_dir, bytes)?));
    }

    for (path, file) in staged {
        file.persist(path)
            .map_err(|e| ConsensusError::io(path, e.error))?;
        debug!(path = %path.display(), "wrote result image");
    }

    Ok(set)
}

/// Write bytes to a temporary file in `dir`; it is removed on drop unless persisted
fn stage(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(".consensus-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| ConsensusError::io(dir, e))?;
    file.write_all(bytes).map_err(|e| ConsensusError::io(file.path(), e))?;
    file.as_file().sync_all().map_err(|e| ConsensusError::io(file.path(), e))?;
    Ok(file)
}
