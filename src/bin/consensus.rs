//! Command-line driver: run a consensus analysis described by a JSON manifest

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use consensus_core::{run_consensus, ConsensusError, FdrMethod, RunManifest, SpatialMask};

/// Correlated-effects consensus maps across analysis teams.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Run manifest (JSON): mask, output directory and per-hypothesis team maps
    #[arg(long)]
    manifest: PathBuf,

    /// FDR level, overrides the manifest
    #[arg(long)]
    alpha: Option<f64>,

    /// FDR procedure (fdr_bh, fdr_by, fdr_tsbh), overrides the manifest
    #[arg(long)]
    fdr_method: Option<FdrMethod>,

    /// Skip hypotheses whose result images already exist
    #[arg(long, default_value_t = false)]
    no_overwrite: bool,

    /// Where to write the JSON run report [default: <output_dir>/consensus_summary.json]
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(kind = e.kind(), "{}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns `Ok(false)` when every hypothesis failed
fn run(cli: Cli) -> Result<bool, ConsensusError> {
    let manifest = RunManifest::from_file(&cli.manifest)?;

    let mut config = manifest.config();
    if let Some(alpha) = cli.alpha {
        config.alpha = alpha;
    }
    if let Some(method) = cli.fdr_method {
        config.fdr_method = method;
    }
    if cli.no_overwrite {
        config.overwrite = false;
    }
    config.validate()?;

    let mask = SpatialMask::from_file(&manifest.mask)?;
    info!(
        mask = %manifest.mask.display(),
        voxels = mask.n_voxels(),
        hypotheses = manifest.hypotheses.len(),
        alpha = config.alpha,
        method = %config.fdr_method,
        "starting consensus run"
    );

    let report = run_consensus(&mask, &manifest.hypotheses, &config, &manifest.output_dir)?;

    let summary_path = cli
        .summary
        .unwrap_or_else(|| manifest.output_dir.join("consensus_summary.json"));
    report.write_json(&summary_path)?;
    info!(path = %summary_path.display(), "wrote run report");

    Ok(!report.all_failed())
}
