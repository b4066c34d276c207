//! False discovery rate correction
//!
//! Every in-mask voxel is one test in a single family; no spatial
//! information is used. Procedures follow the conventions of statsmodels'
//! `multipletests` so adjusted p-values are directly comparable:
//! - `fdr_bh`: Benjamini-Hochberg step-up
//! - `fdr_by`: Benjamini-Yekutieli (BH with the harmonic factor `c(m)`)
//! - `fdr_tsbh`: two-stage BH (Benjamini, Krieger & Yekutieli 2006 with a
//!   BH first stage), one iteration
//!
//! Reference:
//! Benjamini, Y., Krieger, A.M., Yekutieli, D. (2006). "Adaptive linear
//! step-up procedures that control the false discovery rate."
//! Biometrika, 93(3):491-507.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, Result};

/// Multiple-comparisons procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FdrMethod {
    #[serde(rename = "fdr_bh")]
    Bh,
    #[serde(rename = "fdr_by")]
    By,
    #[default]
    #[serde(rename = "fdr_tsbh")]
    Tsbh,
}

impl FdrMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FdrMethod::Bh => "fdr_bh",
            FdrMethod::By => "fdr_by",
            FdrMethod::Tsbh => "fdr_tsbh",
        }
    }
}

impl fmt::Display for FdrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FdrMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fdr_bh" | "bh" => Ok(FdrMethod::Bh),
            "fdr_by" | "by" => Ok(FdrMethod::By),
            "fdr_tsbh" | "fdr_2sbh" | "tsbh" => Ok(FdrMethod::Tsbh),
            other => Err(format!(
                "unknown FDR method '{}' (use fdr_bh|fdr_by|fdr_tsbh)",
                other
            )),
        }
    }
}

/// Outcome of an FDR correction, aligned with the input p-values
#[derive(Debug, Clone, PartialEq)]
pub struct FdrResult {
    /// Whether each hypothesis is rejected
    pub reject: Vec<bool>,
    /// Adjusted p-values, capped at 1
    pub p_adjusted: Vec<f64>,
    pub alpha: f64,
    pub method: FdrMethod,
}

impl FdrResult {
    pub fn n_rejected(&self) -> usize {
        self.reject.iter().filter(|&&r| r).count()
    }
}

/// Apply an FDR procedure across all p-values
///
/// # Arguments
/// * `pvalues` - One p-value per voxel
/// * `alpha` - Target false discovery rate, in (0, 1)
/// * `method` - Correction procedure
pub fn correct(pvalues: &[f64], alpha: f64, method: FdrMethod) -> Result<FdrResult> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(ConsensusError::DegenerateInput(format!(
            "alpha must be in (0, 1), got {}",
            alpha
        )));
    }
    if let Some(voxel) = pvalues.iter().position(|p| p.is_nan()) {
        return Err(ConsensusError::non_finite("p", voxel));
    }

    let m = pvalues.len();
    if m == 0 {
        return Ok(FdrResult { reject: Vec::new(), p_adjusted: Vec::new(), alpha, method });
    }

    // Ascending p, ties broken by voxel index
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| pvalues[i].total_cmp(&pvalues[j]).then(i.cmp(&j)));
    let sorted: Vec<f64> = order.iter().map(|&i| pvalues[i]).collect();

    let (reject_sorted, adjusted_sorted) = match method {
        FdrMethod::Bh => step_up(&sorted, alpha, 1.0),
        FdrMethod::By => {
            let cm: f64 = (1..=m).map(|k| 1.0 / k as f64).sum();
            step_up(&sorted, alpha, cm)
        }
        FdrMethod::Tsbh => two_stage(&sorted, alpha),
    };

    let mut reject = vec![false; m];
    let mut p_adjusted = vec![1.0; m];
    for (rank, &idx) in order.iter().enumerate() {
        reject[idx] = reject_sorted[rank];
        p_adjusted[idx] = adjusted_sorted[rank];
    }

    Ok(FdrResult { reject, p_adjusted, alpha, method })
}

/// Linear step-up on sorted p-values with threshold `k/m * alpha / factor`
///
/// Returns (reject, adjusted) in sorted order.
fn step_up(sorted: &[f64], alpha: f64, factor: f64) -> (Vec<bool>, Vec<f64>) {
    let m = sorted.len();
    let mf = m as f64;

    let last_reject = (0..m)
        .rev()
        .find(|&k| sorted[k] <= (k + 1) as f64 / mf * alpha / factor);
    let mut reject = vec![false; m];
    if let Some(last) = last_reject {
        reject[..=last].iter_mut().for_each(|r| *r = true);
    }

    let mut adjusted = vec![1.0; m];
    let mut running = f64::INFINITY;
    for k in (0..m).rev() {
        let raw = sorted[k] * mf / (k + 1) as f64 * factor;
        running = running.min(raw);
        adjusted[k] = running.min(1.0);
    }

    (reject, adjusted)
}

/// Two-stage BH with one iteration
///
/// Stage 1 estimates the number of true nulls `m0 = m - r1` from a BH pass
/// at `alpha`; stage 2 reruns BH at `alpha * m / m0`. Adjusted p-values are
/// the BH values scaled by `m0 / m`.
fn two_stage(sorted: &[f64], alpha: f64) -> (Vec<bool>, Vec<f64>) {
    let m = sorted.len();
    let (stage1, adjusted) = step_up(sorted, alpha, 1.0);
    let r1 = stage1.iter().filter(|&&r| r).count();
    if r1 == 0 || r1 == m {
        return (stage1, adjusted);
    }

    let m0 = (m - r1) as f64;
    let alpha_star = alpha * m as f64 / m0;
    let (reject, adjusted) = step_up(sorted, alpha_star, 1.0);
    let scale = m0 / m as f64;
    let adjusted = adjusted.into_iter().map(|p| (p * scale).min(1.0)).collect();
    (reject, adjusted)
}
