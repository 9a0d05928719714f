//! Run configuration, loadable from a JSON file.
//!
//! ```json
//! {
//!   "strategy": "pairwise",
//!   "overlap_sampling": "finer",
//!   "validate_overlaps": true,
//!   "calibration": { "method": "shift", "percentile": 25.0, "reference_segment": 1 }
//! }
//! ```
//!
//! Every key is optional. Command-line flags override file values.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::stitch::{CalibrationMethod, MergeOptions, MergeStrategy, OverlapSampling};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    pub strategy: MergeStrategy,
    pub overlap_sampling: OverlapSampling,
    pub validate_overlaps: bool,
    /// Correct segment-to-segment flux jumps before merging.
    pub calibration: Option<CalibrationConfig>,
}

impl Default for StitchConfig {
    fn default() -> Self {
        let merge = MergeOptions::default();
        Self {
            strategy: merge.strategy,
            overlap_sampling: merge.overlap_sampling,
            validate_overlaps: merge.validate_overlaps,
            calibration: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(flatten)]
    pub method: CalibrationMethod,
    /// Sorted index of the segment whose flux is left untouched.
    #[serde(default)]
    pub reference_segment: usize,
}

impl StitchConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&payload)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(path, payload).map_err(anyhow::Error::from)
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            strategy: self.strategy,
            overlap_sampling: self.overlap_sampling,
            validate_overlaps: self.validate_overlaps,
        }
    }
}
