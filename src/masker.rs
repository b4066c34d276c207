//! Volume <-> feature vector masking
//!
//! A [`SpatialMask`] selects the analysed voxels of a 3D grid. `forward`
//! samples in-mask voxels of each image in ascending flat-index order
//! (x fastest), stacking images as matrix rows; `inverse` scatters a vector
//! back into the grid with 0 outside the mask. For any vector `x` of length
//! `n_voxels()`, `forward_one(inverse(x)) == x` exactly.

use std::path::Path;

use ndarray::Array2;

use crate::error::{ConsensusError, Result};
use crate::nifti_io::{read_nifti_file, NiftiVolume};

/// Absolute tolerance for affine comparison (headers store float32)
pub const AFFINE_TOLERANCE: f64 = 1e-4;

/// Boolean analysis mask with its grid geometry
#[derive(Debug, Clone)]
pub struct SpatialMask {
    mask: Vec<u8>,
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: [f64; 16],
    indices: Vec<usize>,
}

impl SpatialMask {
    /// Build a mask from raw flags (non-zero = in mask)
    pub fn from_raw(
        mask: Vec<u8>,
        dims: (usize, usize, usize),
        voxel_size: (f64, f64, f64),
        affine: [f64; 16],
    ) -> Result<Self> {
        let n_total = dims.0 * dims.1 * dims.2;
        if mask.len() != n_total {
            return Err(ConsensusError::ShapeMismatch {
                source_name: "mask".to_string(),
                detail: format!("{} flags for a {}x{}x{} grid", mask.len(), dims.0, dims.1, dims.2),
            });
        }

        let mask: Vec<u8> = mask.into_iter().map(|m| (m != 0) as u8).collect();
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m == 1)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Err(ConsensusError::DegenerateInput("mask contains no voxels".to_string()));
        }

        Ok(Self { mask, dims, voxel_size, affine, indices })
    }

    /// Build a mask from an image: voxels with a finite non-zero value are in
    pub fn from_volume(volume: &NiftiVolume) -> Result<Self> {
        if volume.n_volumes != 1 {
            return Err(ConsensusError::ShapeMismatch {
                source_name: "mask".to_string(),
                detail: format!("expected a single volume, found {}", volume.n_volumes),
            });
        }
        let flags = volume
            .data
            .iter()
            .map(|&v| (v.is_finite() && v != 0.0) as u8)
            .collect();
        Self::from_raw(flags, volume.dims, volume.voxel_size, volume.affine)
    }

    /// Load a mask image from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let volume = read_nifti_file(path)?;
        Self::from_volume(&volume)
    }

    /// Number of in-mask voxels (feature count `v`)
    pub fn n_voxels(&self) -> usize {
        self.indices.len()
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn voxel_size(&self) -> (f64, f64, f64) {
        self.voxel_size
    }

    pub fn affine(&self) -> &[f64; 16] {
        &self.affine
    }

    /// Flat grid indices of in-mask voxels, ascending
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Binary flags over the full grid
    pub fn flags(&self) -> &[u8] {
        &self.mask
    }

    /// Verify an image shares the mask's grid and affine
    pub fn check_geometry(&self, source_name: &str, volume: &NiftiVolume) -> Result<()> {
        let mismatch = |detail: String| ConsensusError::ShapeMismatch {
            source_name: source_name.to_string(),
            detail,
        };

        if volume.n_volumes != 1 {
            return Err(mismatch(format!(
                "expected a single volume, found {}",
                volume.n_volumes
            )));
        }
        if volume.dims != self.dims {
            return Err(mismatch(format!(
                "grid {:?} differs from mask grid {:?}",
                volume.dims, self.dims
            )));
        }
        if volume.data.len() != self.mask.len() {
            return Err(mismatch(format!(
                "{} voxels for a {}-voxel grid",
                volume.data.len(),
                self.mask.len()
            )));
        }
        if let Some(i) = (0..16).find(|&i| (volume.affine[i] - self.affine[i]).abs() > AFFINE_TOLERANCE) {
            return Err(mismatch(format!(
                "affine entry {} is {} but mask has {}",
                i, volume.affine[i], self.affine[i]
            )));
        }
        Ok(())
    }

    /// Sample one image at the in-mask voxels
    pub fn forward_one(&self, source_name: &str, volume: &NiftiVolume) -> Result<Vec<f64>> {
        self.check_geometry(source_name, volume)?;
        Ok(self.indices.iter().map(|&i| volume.data[i]).collect())
    }

    /// Sample each image and stack the results as rows (images x voxels)
    pub fn forward(&self, images: &[&NiftiVolume]) -> Result<Array2<f64>> {
        let v = self.n_voxels();
        let mut flat = Vec::with_capacity(images.len() * v);
        for (row, volume) in images.iter().enumerate() {
            flat.extend(self.forward_one(&format!("image {}", row), volume)?);
        }
        Array2::from_shape_vec((images.len(), v), flat)
            .map_err(|e| ConsensusError::Format(format!("failed to stack feature rows: {}", e)))
    }

    /// Scatter a voxel vector back into the mask grid (0 outside the mask)
    pub fn inverse(&self, values: &[f64]) -> Result<NiftiVolume> {
        if values.len() != self.n_voxels() {
            return Err(ConsensusError::ShapeMismatch {
                source_name: "result vector".to_string(),
                detail: format!(
                    "length {} differs from {} in-mask voxels",
                    values.len(),
                    self.n_voxels()
                ),
            });
        }

        let mut data = vec![0.0; self.mask.len()];
        for (&idx, &value) in self.indices.iter().zip(values.iter()) {
            data[idx] = value;
        }
        NiftiVolume::new(data, self.dims, self.voxel_size, self.affine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affine_2mm() -> [f64; 16] {
        [
            2.0, 0.0, 0.0, -10.0,
            0.0, 2.0, 0.0, -12.0,
            0.0, 0.0, 2.0, -8.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }

    /// Ball of radius 3 voxels around (4, 4, 3) on an 8x9x7 grid
    fn sphere_mask() -> SpatialMask {
        let dims = (8, 9, 7);
        let flags = (0..dims.0 * dims.1 * dims.2)
            .map(|idx| {
                let (x, y, z) = (idx % dims.0, (idx / dims.0) % dims.1, idx / (dims.0 * dims.1));
                let d2 = (x as f64 - 4.0).powi(2) + (y as f64 - 4.0).powi(2) + (z as f64 - 3.0).powi(2);
                (d2 <= 9.0) as u8
            })
            .collect();
        SpatialMask::from_raw(flags, dims, (2.0, 2.0, 2.0), affine_2mm()).unwrap()
    }

    fn volume_like(mask: &SpatialMask, f: impl Fn(usize) -> f64) -> NiftiVolume {
        let n = mask.flags().len();
        NiftiVolume::new((0..n).map(f).collect(), mask.dims(), mask.voxel_size(), *mask.affine()).unwrap()
    }

    #[test]
    fn test_indices_are_ascending_fortran_order() {
        let dims = (3, 2, 2);
        let mut flags = vec![0u8; 12];
        flags[1] = 1; // x=1, y=0, z=0
        flags[4] = 1; // x=1, y=1, z=0
        flags[9] = 2; // x=0, y=1, z=1
        let mask = SpatialMask::from_raw(flags, dims, (1.0, 1.0, 1.0), affine_2mm()).unwrap();

        assert_eq!(mask.indices(), &[1, 4, 9]);
        assert_eq!(mask.n_voxels(), 3);
        assert_eq!(mask.flags()[9], 1, "flags should be normalised to 0/1");
    }

    #[test]
    fn test_from_volume_uses_nonzero_finite() {
        let volume = NiftiVolume::new(
            vec![0.0, 1.0, -0.5, f64::NAN, 0.0, 3.0, f64::INFINITY, 0.0],
            (2, 2, 2),
            (1.0, 1.0, 1.0),
            affine_2mm(),
        )
        .unwrap();
        let mask = SpatialMask::from_volume(&volume).unwrap();
        assert_eq!(mask.indices(), &[1, 2, 5]);
    }

    #[test]
    fn test_empty_mask_is_degenerate() {
        let result = SpatialMask::from_raw(vec![0u8; 8], (2, 2, 2), (1.0, 1.0, 1.0), affine_2mm());
        assert!(matches!(result, Err(ConsensusError::DegenerateInput(_))));
    }

    #[test]
    fn test_forward_samples_in_mask_voxels() {
        let mask = sphere_mask();
        let volume = volume_like(&mask, |i| i as f64 * 0.25);

        let values = mask.forward_one("team", &volume).unwrap();
        assert_eq!(values.len(), mask.n_voxels());
        for (value, &idx) in values.iter().zip(mask.indices()) {
            assert_eq!(*value, idx as f64 * 0.25);
        }
    }

    #[test]
    fn test_forward_stacks_rows() {
        let mask = sphere_mask();
        let a = volume_like(&mask, |i| i as f64);
        let b = volume_like(&mask, |i| -(i as f64));

        let matrix = mask.forward(&[&a, &b]).unwrap();
        assert_eq!(matrix.dim(), (2, mask.n_voxels()));
        for j in 0..mask.n_voxels() {
            assert_eq!(matrix[[0, j]], -matrix[[1, j]]);
        }
    }

    #[test]
    fn test_inverse_then_forward_is_identity() {
        let mask = sphere_mask();
        let x: Vec<f64> = (0..mask.n_voxels()).map(|i| (i as f64 * 0.37).sin() * 5.0).collect();

        let volume = mask.inverse(&x).unwrap();
        let back = mask.forward_one("roundtrip", &volume).unwrap();
        assert_eq!(back, x);

        // Outside the mask is background
        for (i, &m) in mask.flags().iter().enumerate() {
            if m == 0 {
                assert_eq!(volume.data[i], 0.0);
            }
        }
    }

    #[test]
    fn test_inverse_rejects_wrong_length() {
        let mask = sphere_mask();
        let result = mask.inverse(&vec![1.0; mask.n_voxels() + 1]);
        assert!(matches!(result, Err(ConsensusError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_forward_rejects_different_grid() {
        let mask = sphere_mask();
        let volume = NiftiVolume::new(vec![1.0; 8 * 9 * 6], (8, 9, 6), (2.0, 2.0, 2.0), affine_2mm()).unwrap();

        match mask.forward_one("team X", &volume) {
            Err(ConsensusError::ShapeMismatch { source_name, .. }) => assert_eq!(source_name, "team X"),
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_rejects_different_affine() {
        let mask = sphere_mask();
        let mut volume = volume_like(&mask, |_| 1.0);
        volume.affine[3] += 2.0;
        assert!(matches!(
            mask.forward_one("shifted", &volume),
            Err(ConsensusError::ShapeMismatch { .. })
        ));

        // float32 header noise is tolerated
        let mut volume = volume_like(&mask, |_| 1.0);
        volume.affine[0] += 1e-6;
        assert!(mask.forward_one("noisy", &volume).is_ok());
    }

    #[test]
    fn test_forward_rejects_time_series() {
        let mask = sphere_mask();
        let mut volume = volume_like(&mask, |_| 1.0);
        volume.n_volumes = 3;
        assert!(matches!(
            mask.forward_one("4d", &volume),
            Err(ConsensusError::ShapeMismatch { .. })
        ));
    }
}
