//! Common test utilities for consensus-core integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use consensus_core::nifti_io::{save_nifti_to_file, NiftiVolume};
use consensus_core::{EffectMapSource, Hypothesis, SpatialMask};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub const DIMS: (usize, usize, usize) = (10, 10, 8);
pub const VOXEL_SIZE: (f64, f64, f64) = (2.0, 2.0, 2.0);

/// 2 mm grid with the origin near the volume centre
pub fn test_affine() -> [f64; 16] {
    [
        2.0, 0.0, 0.0, -9.0,
        0.0, 2.0, 0.0, -9.0,
        0.0, 0.0, 2.0, -7.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Ball of radius 3.5 voxels centred in the grid, as a 0/1 image
pub fn sphere_mask_volume() -> NiftiVolume {
    let (nx, ny, nz) = DIMS;
    let mut data = vec![0.0; nx * ny * nz];
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let d2 = (x as f64 - 4.5).powi(2) + (y as f64 - 4.5).powi(2) + (z as f64 - 3.5).powi(2);
                if d2 <= 3.5 * 3.5 {
                    data[x + y * nx + z * nx * ny] = 1.0;
                }
            }
        }
    }
    NiftiVolume::new(data, DIMS, VOXEL_SIZE, test_affine()).unwrap()
}

pub fn sphere_mask() -> SpatialMask {
    SpatialMask::from_volume(&sphere_mask_volume()).unwrap()
}

/// Seeded generator so every run draws the same maps
pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Full-grid volume: shared spatial pattern plus independent team noise
///
/// Out-of-mask voxels carry noise too, as real effect maps do.
pub fn team_volume(rng: &mut StdRng, effect: f64, shared: &[f64], noise_sd: f64) -> NiftiVolume {
    let noise = Normal::new(0.0, noise_sd).unwrap();
    let data = shared
        .iter()
        .map(|&s| effect + s + noise.sample(rng))
        .collect();
    NiftiVolume::new(data, DIMS, VOXEL_SIZE, test_affine()).unwrap()
}

/// Spatial pattern common to every team
pub fn shared_pattern(rng: &mut StdRng, sd: f64) -> Vec<f64> {
    let normal = Normal::new(0.0, sd).unwrap();
    (0..DIMS.0 * DIMS.1 * DIMS.2).map(|_| normal.sample(rng)).collect()
}

/// Write `n_teams` maps for a hypothesis and return its manifest entry
pub fn write_hypothesis(
    dir: &Path,
    id: u32,
    n_teams: usize,
    effect: f64,
    seed: u64,
) -> Hypothesis {
    let mut rng = rng(seed);
    let shared = shared_pattern(&mut rng, 1.0);
    let maps = (0..n_teams)
        .map(|k| {
            let team = format!("team{:02}", k);
            let path = dir.join(format!("{}_hypo{}_unthresh.nii.gz", team, id));
            save_nifti_to_file(&path, &team_volume(&mut rng, effect, &shared, 0.5)).unwrap();
            EffectMapSource { team, path }
        })
        .collect();
    Hypothesis { id, maps }
}

pub fn write_mask(dir: &Path) -> PathBuf {
    let path = dir.join("mask.nii.gz");
    save_nifti_to_file(&path, &sphere_mask_volume()).unwrap();
    path
}
