//! Per-hypothesis consensus analysis
//!
//! For each hypothesis: assemble the team-by-voxel matrix, estimate the
//! global moments and correlation, run the correlated t-test and the tau
//! estimator, correct the p-values across voxels, and write the result
//! images. Failures are scoped to the hypothesis that raised them; the batch
//! always runs to the end.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{ConsensusConfig, Hypothesis};
use crate::error::{ConsensusError, Result};
use crate::features::{assemble, FeatureMatrix};
use crate::masker::SpatialMask;
use crate::materialize::{write_results, ResultVectors, ResultVolumeSet};
use crate::stats::fdr::{correct, FdrMethod, FdrResult};
use crate::stats::moments::{CorrelationMatrix, ScalarMoments};
use crate::stats::tau::{estimate_tau, TauEstimate};
use crate::stats::ttest::{correlated_ttest, design_effect, CorrelatedTTest};

/// Everything computed for one hypothesis, before any I/O
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub n_teams: usize,
    pub moments: ScalarMoments,
    pub correlation: CorrelationMatrix,
    pub ttest: CorrelatedTTest,
    pub tau: TauEstimate,
    pub fdr: FdrResult,
}

impl ConsensusResult {
    pub fn n_voxels(&self) -> usize {
        self.ttest.t.len()
    }

    pub fn summary(&self, hypothesis: u32) -> HypothesisSummary {
        HypothesisSummary {
            hypothesis,
            n_teams: self.n_teams,
            n_voxels: self.n_voxels(),
            mean: self.moments.mean,
            variance: self.moments.variance,
            mean_correlation: self.correlation.mean_off_diagonal(),
            design_effect: design_effect(&self.correlation),
            sampvar_est: self.tau.sampvar_est,
            n_significant: self.fdr.n_rejected(),
            alpha: self.fdr.alpha,
            fdr_method: self.fdr.method,
            median_tau: median(&self.tau.tau),
            max_tau: self.tau.tau.iter().copied().fold(0.0, f64::max),
        }
    }

    fn vectors(&self) -> ResultVectors<'_> {
        ResultVectors {
            t: &self.ttest.t,
            p: &self.ttest.p,
            p_fdr: &self.fdr.p_adjusted,
            tau: &self.tau.tau,
        }
    }
}

/// Scalar facts reported for a completed hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSummary {
    pub hypothesis: u32,
    pub n_teams: usize,
    pub n_voxels: usize,
    pub mean: f64,
    pub variance: f64,
    /// Mean off-diagonal team correlation
    pub mean_correlation: f64,
    pub design_effect: f64,
    pub sampvar_est: f64,
    /// Voxels rejected at the FDR level
    pub n_significant: usize,
    pub alpha: f64,
    pub fdr_method: FdrMethod,
    pub median_tau: f64,
    pub max_tau: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HypothesisOutcome {
    Completed(HypothesisSummary),
    /// Outputs already existed and `overwrite` was off
    Skipped,
}

/// Outcome of one hypothesis in a run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HypothesisReport {
    Completed(HypothesisSummary),
    Skipped { hypothesis: u32 },
    Failed { hypothesis: u32, kind: String, message: String },
}

impl HypothesisReport {
    pub fn hypothesis(&self) -> u32 {
        match self {
            HypothesisReport::Completed(summary) => summary.hypothesis,
            HypothesisReport::Skipped { hypothesis } | HypothesisReport::Failed { hypothesis, .. } => {
                *hypothesis
            }
        }
    }
}

/// Per-hypothesis outcomes of a consensus run, in manifest order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub hypotheses: Vec<HypothesisReport>,
}

impl RunReport {
    pub fn n_completed(&self) -> usize {
        self.count(|r| matches!(r, HypothesisReport::Completed(_)))
    }

    pub fn n_skipped(&self) -> usize {
        self.count(|r| matches!(r, HypothesisReport::Skipped { .. }))
    }

    pub fn n_failed(&self) -> usize {
        self.count(|r| matches!(r, HypothesisReport::Failed { .. }))
    }

    /// True if there was work and none of it succeeded
    pub fn all_failed(&self) -> bool {
        !self.hypotheses.is_empty() && self.n_failed() == self.hypotheses.len()
    }

    pub fn get(&self, hypothesis: u32) -> Option<&HypothesisReport> {
        self.hypotheses.iter().find(|r| r.hypothesis() == hypothesis)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConsensusError::Format(format!("failed to serialise run report: {}", e)))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(|e| ConsensusError::io(path, e))
    }

    fn count(&self, pred: impl Fn(&HypothesisReport) -> bool) -> usize {
        self.hypotheses.iter().filter(|r| pred(r)).count()
    }
}

/// Run the statistical core on an assembled matrix
///
/// Pure: no files are read or written.
pub fn analyze(features: &FeatureMatrix, config: &ConsensusConfig) -> Result<ConsensusResult> {
    config.validate()?;
    let moments = ScalarMoments::estimate(features)?;
    let correlation = CorrelationMatrix::estimate(features)?;
    let ttest = correlated_ttest(features, &moments, &correlation)?;
    let tau = estimate_tau(features, &correlation)?;
    let fdr = correct(&ttest.p, config.alpha, config.fdr_method)?;

    Ok(ConsensusResult {
        n_teams: features.n_teams(),
        moments,
        correlation,
        ttest,
        tau,
        fdr,
    })
}

/// Assemble, analyse and materialise one hypothesis
pub fn run_hypothesis(
    mask: &SpatialMask,
    hypothesis: &Hypothesis,
    config: &ConsensusConfig,
    output_dir: &Path,
) -> Result<HypothesisOutcome> {
    config.validate()?;
    let id = hypothesis.id;
    if !config.overwrite && ResultVolumeSet::for_hypothesis(output_dir, id).exists() {
        info!(hypothesis = id, "results exist, skipping (overwrite disabled)");
        return Ok(HypothesisOutcome::Skipped);
    }

    let features = assemble(mask, &hypothesis.maps)?;
    info!(
        hypothesis = id,
        teams = features.n_teams(),
        voxels = features.n_voxels(),
        "assembled feature matrix"
    );

    let result = analyze(&features, config)?;
    let summary = result.summary(id);
    info!(
        hypothesis = id,
        mean = summary.mean,
        variance = summary.variance,
        mean_correlation = summary.mean_correlation,
        "estimated global moments"
    );
    info!(
        hypothesis = id,
        significant = summary.n_significant,
        alpha = summary.alpha,
        method = %summary.fdr_method,
        median_tau = summary.median_tau,
        max_tau = summary.max_tau,
        "consensus statistics"
    );

    write_results(mask, &result.vectors(), output_dir, id)?;
    Ok(HypothesisOutcome::Completed(summary))
}

/// Run every hypothesis in order, recording failures instead of aborting
pub fn run_consensus(
    mask: &SpatialMask,
    hypotheses: &[Hypothesis],
    config: &ConsensusConfig,
    output_dir: &Path,
) -> Result<RunReport> {
    config.validate()?;
    std::fs::create_dir_all(output_dir).map_err(|e| ConsensusError::io(output_dir, e))?;

    let mut report = RunReport::default();
    for hypothesis in hypotheses {
        let entry = match run_hypothesis(mask, hypothesis, config, output_dir) {
            Ok(HypothesisOutcome::Completed(summary)) => HypothesisReport::Completed(summary),
            Ok(HypothesisOutcome::Skipped) => HypothesisReport::Skipped { hypothesis: hypothesis.id },
            Err(e) => {
                error!(hypothesis = hypothesis.id, kind = e.kind(), "{}", e);
                HypothesisReport::Failed {
                    hypothesis: hypothesis.id,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };
        report.hypotheses.push(entry);
    }

    if report.n_failed() > 0 {
        warn!(
            failed = report.n_failed(),
            total = hypotheses.len(),
            "some hypotheses failed"
        );
    }
    info!(
        completed = report.n_completed(),
        skipped = report.n_skipped(),
        failed = report.n_failed(),
        "consensus run finished"
    );
    Ok(report)
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}
