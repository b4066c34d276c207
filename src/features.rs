//! Team-by-voxel feature assembly
//!
//! Loads one effect map per team for a hypothesis and stacks the masked
//! voxel values into an `n x v` matrix (rows = teams in the order given,
//! columns = in-mask voxels in mask order).

use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{first_non_finite, ConsensusError, Result};
use crate::masker::SpatialMask;
use crate::nifti_io::{read_nifti_file, NiftiVolume};

/// One team's effect map for a hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectMapSource {
    pub team: String,
    pub path: PathBuf,
}

/// Masked effect values, one row per team
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    teams: Vec<String>,
    data: Array2<f64>,
}

impl FeatureMatrix {
    /// Wrap an already-masked matrix; `teams` labels the rows
    pub fn new(teams: Vec<String>, data: Array2<f64>) -> Result<Self> {
        if teams.len() != data.nrows() {
            return Err(ConsensusError::ShapeMismatch {
                source_name: "feature matrix".to_string(),
                detail: format!("{} team labels for {} rows", teams.len(), data.nrows()),
            });
        }
        for (row, values) in data.rows().into_iter().enumerate() {
            let position = match values.as_slice() {
                Some(slice) => first_non_finite(slice),
                None => values.iter().position(|v| !v.is_finite()),
            };
            if let Some(voxel) = position {
                return Err(ConsensusError::NumericInstability {
                    quantity: format!("input ({})", teams[row]),
                    voxel,
                });
            }
        }
        // Row slices are used directly by the estimators
        let data = data.as_standard_layout().into_owned();
        Ok(Self { teams, data })
    }

    /// Build from unlabeled rows; teams are named by row index
    pub fn from_array(data: Array2<f64>) -> Result<Self> {
        let teams = (0..data.nrows()).map(|i| format!("team{}", i)).collect();
        Self::new(teams, data)
    }

    /// Number of teams (rows)
    pub fn n_teams(&self) -> usize {
        self.data.nrows()
    }

    /// Number of in-mask voxels (columns)
    pub fn n_voxels(&self) -> usize {
        self.data.ncols()
    }

    pub fn teams(&self) -> &[String] {
        &self.teams
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Contiguous values of one team across voxels
    pub fn row(&self, team: usize) -> &[f64] {
        let width = self.n_voxels();
        // Standard layout is guaranteed by the constructor
        &self.data.as_slice().unwrap_or(&[])[team * width..(team + 1) * width]
    }
}

/// Stack already-loaded volumes for a hypothesis
pub fn assemble_volumes(mask: &SpatialMask, volumes: &[(String, NiftiVolume)]) -> Result<FeatureMatrix> {
    let v = mask.n_voxels();
    let mut teams = Vec::with_capacity(volumes.len());
    let mut flat = Vec::with_capacity(volumes.len() * v);
    for (team, volume) in volumes {
        flat.extend(mask.forward_one(team, volume)?);
        teams.push(team.clone());
    }
    let data = Array2::from_shape_vec((teams.len(), v), flat)
        .map_err(|e| ConsensusError::Format(format!("failed to stack feature rows: {}", e)))?;
    FeatureMatrix::new(teams, data)
}

/// Load each team's map from disk and stack them into a feature matrix
///
/// Maps are read one at a time so only the masked values are retained.
pub fn assemble(mask: &SpatialMask, sources: &[EffectMapSource]) -> Result<FeatureMatrix> {
    let v = mask.n_voxels();
    let mut teams = Vec::with_capacity(sources.len());
    let mut flat = Vec::with_capacity(sources.len() * v);

    for source in sources {
        debug!(team = %source.team, path = %source.path.display(), "loading effect map");
        let volume = read_nifti_file(&source.path)?;
        flat.extend(mask.forward_one(&source.team, &volume)?);
        teams.push(source.team.clone());
    }

    let data = Array2::from_shape_vec((teams.len(), v), flat)
        .map_err(|e| ConsensusError::Format(format!("failed to stack feature rows: {}", e)))?;
    FeatureMatrix::new(teams, data)
}
