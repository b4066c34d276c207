//! SIMD-accelerated row reductions
//!
//! Feature matrices are stored team-major (one contiguous row per team), so
//! the moment estimators and the tau accumulator work on contiguous `f64`
//! slices. When the `simd` feature is enabled these use 256-bit `f64x4`
//! lanes from `wide`; otherwise scalar fallbacks are compiled.

#[cfg(feature = "simd")]
use wide::f64x4;

/// SIMD lane width (4 for f64x4)
#[cfg(feature = "simd")]
pub const SIMD_WIDTH: usize = 4;

#[cfg(not(feature = "simd"))]
pub const SIMD_WIDTH: usize = 1;

#[cfg(feature = "simd")]
#[inline]
fn load(a: &[f64], idx: usize) -> f64x4 {
    f64x4::new([a[idx], a[idx + 1], a[idx + 2], a[idx + 3]])
}

// ============================================================================
// Reductions
// ============================================================================

/// Compute sum(a[i])
#[cfg(feature = "simd")]
#[inline]
pub fn sum_f64(a: &[f64]) -> f64 {
    let chunks = a.len() / SIMD_WIDTH;
    let mut acc = f64x4::ZERO;
    for i in 0..chunks {
        acc += load(a, i * SIMD_WIDTH);
    }
    let mut result = acc.reduce_add();
    for &v in &a[chunks * SIMD_WIDTH..] {
        result += v;
    }
    result
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn sum_f64(a: &[f64]) -> f64 {
    a.iter().sum()
}

/// Compute dot product: sum(a[i] * b[i])
#[cfg(feature = "simd")]
#[inline]
pub fn dot_product_f64(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let chunks = a.len() / SIMD_WIDTH;
    let mut acc = f64x4::ZERO;
    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        acc += load(a, idx) * load(b, idx);
    }
    let mut result = acc.reduce_add();
    for i in chunks * SIMD_WIDTH..a.len() {
        result += a[i] * b[i];
    }
    result
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn dot_product_f64(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&ai, &bi)| ai * bi).sum()
}

/// Compute sum((a[i] - center)^2)
#[cfg(feature = "simd")]
#[inline]
pub fn sum_squared_deviations_f64(a: &[f64], center: f64) -> f64 {
    let chunks = a.len() / SIMD_WIDTH;
    let c = f64x4::splat(center);
    let mut acc = f64x4::ZERO;
    for i in 0..chunks {
        let d = load(a, i * SIMD_WIDTH) - c;
        acc += d * d;
    }
    let mut result = acc.reduce_add();
    for &v in &a[chunks * SIMD_WIDTH..] {
        result += (v - center) * (v - center);
    }
    result
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn sum_squared_deviations_f64(a: &[f64], center: f64) -> f64 {
    a.iter().map(|&v| (v - center) * (v - center)).sum()
}

// ============================================================================
// Accumulators
// ============================================================================

/// Compute acc[i] += alpha * b[i]
#[cfg(feature = "simd")]
#[inline]
pub fn axpy_f64(acc: &mut [f64], alpha: f64, b: &[f64]) {
    debug_assert_eq!(acc.len(), b.len());
    let chunks = acc.len() / SIMD_WIDTH;
    let va = f64x4::splat(alpha);
    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let r = (load(acc, idx) + va * load(b, idx)).to_array();
        acc[idx..idx + SIMD_WIDTH].copy_from_slice(&r);
    }
    for i in chunks * SIMD_WIDTH..acc.len() {
        acc[i] += alpha * b[i];
    }
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn axpy_f64(acc: &mut [f64], alpha: f64, b: &[f64]) {
    debug_assert_eq!(acc.len(), b.len());
    for (a, &bi) in acc.iter_mut().zip(b.iter()) {
        *a += alpha * bi;
    }
}

/// Compute acc[i] += (b[i] - center[i])^2
#[cfg(feature = "simd")]
#[inline]
pub fn accumulate_squared_deviations_f64(acc: &mut [f64], b: &[f64], center: &[f64]) {
    debug_assert_eq!(acc.len(), b.len());
    debug_assert_eq!(acc.len(), center.len());
    let chunks = acc.len() / SIMD_WIDTH;
    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let d = load(b, idx) - load(center, idx);
        let r = (load(acc, idx) + d * d).to_array();
        acc[idx..idx + SIMD_WIDTH].copy_from_slice(&r);
    }
    for i in chunks * SIMD_WIDTH..acc.len() {
        let d = b[i] - center[i];
        acc[i] += d * d;
    }
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn accumulate_squared_deviations_f64(acc: &mut [f64], b: &[f64], center: &[f64]) {
    debug_assert_eq!(acc.len(), b.len());
    debug_assert_eq!(acc.len(), center.len());
    for ((a, &bi), &ci) in acc.iter_mut().zip(b.iter()).zip(center.iter()) {
        let d = bi - ci;
        *a += d * d;
    }
}
