//! Run configuration and manifest
//!
//! The core never reads ambient state: the caller builds a
//! [`ConsensusConfig`] (or loads one from a [`RunManifest`]) and passes it
//! into every component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, Result};
use crate::features::EffectMapSource;
use crate::stats::fdr::FdrMethod;

fn default_alpha() -> f64 {
    0.05
}

fn default_overwrite() -> bool {
    true
}

/// Parameters shared by every hypothesis in a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// FDR level
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub fdr_method: FdrMethod,
    /// Recompute hypotheses whose outputs already exist
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            fdr_method: FdrMethod::default(),
            overwrite: default_overwrite(),
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ConsensusError::Manifest(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// One hypothesis and its ordered team maps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: u32,
    pub maps: Vec<EffectMapSource>,
}

/// Enumerated inputs for a consensus run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub mask: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub config: Option<ConsensusConfig>,
    pub hypotheses: Vec<Hypothesis>,
}

impl RunManifest {
    /// Parse a manifest from JSON text
    ///
    /// Relative paths are kept as written; see [`RunManifest::from_file`].
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: RunManifest =
            serde_json::from_str(text).map_err(|e| ConsensusError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest, resolving relative paths against its directory
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConsensusError::io(path, e))?;
        let mut manifest = Self::from_json(&text)?;
        if let Some(base) = path.parent() {
            manifest.resolve_relative(base);
        }
        Ok(manifest)
    }

    /// Configuration from the manifest, or the defaults
    pub fn config(&self) -> ConsensusConfig {
        self.config.unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if let Some(config) = &self.config {
            config.validate()?;
        }
        let mut seen = std::collections::HashSet::new();
        for hypothesis in &self.hypotheses {
            if !seen.insert(hypothesis.id) {
                return Err(ConsensusError::Manifest(format!(
                    "hypothesis {} listed more than once",
                    hypothesis.id
                )));
            }
        }
        Ok(())
    }

    fn resolve_relative(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.mask);
        resolve(&mut self.output_dir);
        for hypothesis in &mut self.hypotheses {
            for map in &mut hypothesis.maps {
                resolve(&mut map.path);
            }
        }
    }
}
