//! NIfTI-1 volume I/O
//!
//! Effect maps, masks and result maps are all single 3D volumes. Reading
//! accepts `.nii` and `.nii.gz` (gzip is detected from the magic bytes) and
//! 4D files, of which only the first volume is kept; `n_volumes` records the
//! original count so callers can reject true time series. Writing always
//! produces float32 NIfTI-1 single files.
//!
//! Voxel data is flattened in NIfTI on-disk order (x fastest):
//! `index = x + y*nx + z*nx*ny`.

use std::io::{Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{ConsensusError, Result};

/// Size of a NIfTI-1 header plus the 4-byte extension flag
const NIFTI1_VOX_OFFSET: usize = 352;

/// A single 3D volume with its geometry
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiVolume {
    /// Voxel values of the first volume, Fortran order
    pub data: Vec<f64>,
    /// Grid dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Number of volumes along the 4th axis in the source file (1 for 3D)
    pub n_volumes: usize,
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
}

impl NiftiVolume {
    /// Build a 3D volume from already-flattened data
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize, usize),
        voxel_size: (f64, f64, f64),
        affine: [f64; 16],
    ) -> Result<Self> {
        let expected = dims.0 * dims.1 * dims.2;
        if data.len() != expected {
            return Err(ConsensusError::Format(format!(
                "data length {} does not match grid {}x{}x{}",
                data.len(), dims.0, dims.1, dims.2
            )));
        }
        Ok(Self { data, dims, n_volumes: 1, voxel_size, affine })
    }

    /// Total number of voxels in the grid
    pub fn n_total(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Summarise the raw header for error messages
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("file too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Decode a NIfTI image from bytes
///
/// Supports both .nii and .nii.gz content (gzip is auto-detected).
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiVolume> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut decompressed = Vec::new();
            let mut decoder = GzDecoder::new(Cursor::new(bytes));
            let info = match std::io::Read::read_to_end(&mut decoder, &mut decompressed) {
                Ok(_) => get_header_info(&decompressed),
                Err(_) => "could not decompress".to_string(),
            };
            ConsensusError::Format(format!("failed to read gzipped NIfTI: {} ({})", e, info))
        })?
    } else {
        let info = get_header_info(bytes);
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| ConsensusError::Format(format!("failed to read NIfTI: {} ({})", e, info)))?
    };

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(ConsensusError::Format(format!("expected at least 3D volume, got {}D", ndim)));
    }

    let voxel_size = (
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    );
    let affine = get_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| ConsensusError::Format(format!("failed to convert to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(ConsensusError::Format(format!("expected at least 3D array, got {}D", shape.len())));
    }
    if shape.len() > 4 && shape[4..].iter().any(|&d| d > 1) {
        return Err(ConsensusError::Format(format!("unsupported {}D image", shape.len())));
    }

    // Use the array shape for dimensions (nifti-rs may reorder)
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let n_volumes = if shape.len() >= 4 { shape[3] } else { 1 };

    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let value = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    let mut index = vec![0usize; shape.len()];
                    index[0] = i;
                    index[1] = j;
                    index[2] = k;
                    array[index.as_slice()]
                };
                data.push(value);
            }
        }
    }

    Ok(NiftiVolume {
        data,
        dims: (nx, ny, nz),
        n_volumes,
        voxel_size,
        affine,
    })
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    // Prefer sform if available (sform_code > 0)
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Encode a volume as uncompressed NIfTI-1 bytes (float32)
pub fn save_nifti(volume: &NiftiVolume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dims;
    let (vsx, vsy, vsz) = volume.voxel_size;
    if volume.data.len() != volume.n_total() {
        return Err(ConsensusError::Format(format!(
            "data length {} does not match grid {}x{}x{}",
            volume.data.len(), nx, ny, nz
        )));
    }
    if [nx, ny, nz].iter().any(|&d| d > i16::MAX as usize) {
        return Err(ConsensusError::Format(format!(
            "grid {}x{}x{} exceeds NIfTI-1 limits", nx, ny, nz
        )));
    }

    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(NIFTI1_VOX_OFFSET as f32).to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // qform_code = 0, sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            let value = volume.affine[row * 4 + col] as f32;
            header[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(NIFTI1_VOX_OFFSET + volume.data.len() * 4);
    buffer.extend_from_slice(&header);
    // Extension flag: no extensions
    buffer.extend_from_slice(&[0u8; 4]);
    for &val in &volume.data {
        buffer.extend_from_slice(&(val as f32).to_le_bytes());
    }

    Ok(buffer)
}

/// Encode a volume as gzipped NIfTI-1 bytes (.nii.gz)
pub fn save_nifti_gz(volume: &NiftiVolume) -> Result<Vec<u8>> {
    let uncompressed = save_nifti(volume)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&uncompressed)
        .map_err(|e| ConsensusError::Format(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| ConsensusError::Format(format!("gzip finish failed: {}", e)))
}

/// Encode a volume for the given file name: gzip if it ends with `.nii.gz`
pub fn encode_for_path(path: &Path, volume: &NiftiVolume) -> Result<Vec<u8>> {
    if path.to_string_lossy().ends_with(".nii.gz") {
        save_nifti_gz(volume)
    } else {
        save_nifti(volume)
    }
}

/// Read a NIfTI file from a filesystem path
pub fn read_nifti_file(path: &Path) -> Result<NiftiVolume> {
    let bytes = std::fs::read(path).map_err(|e| ConsensusError::io(path, e))?;
    load_nifti(&bytes).map_err(|e| match e {
        ConsensusError::Format(msg) => {
            ConsensusError::Format(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Write a volume to a file (gzip chosen by extension)
pub fn save_nifti_to_file(path: &Path, volume: &NiftiVolume) -> Result<()> {
    let bytes = encode_for_path(path, volume)?;
    std::fs::write(path, &bytes).map_err(|e| ConsensusError::io(path, e))
}
