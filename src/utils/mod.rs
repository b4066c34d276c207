//! Small reusable kernels shared by the statistical core

pub mod simd_ops;
