//! Run configuration
//!
//! Every knob of a run lives in [`PipelineConfig`]. Defaults carry the usual
//! values; a JSON file may override any subset of them.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispersion::DispersionParams;
use crate::error::{DeError, Result};
use crate::glm::GlmFitParams;
use crate::testing::CorrectionMethod;

/// Low-expression filter applied before size factor estimation.
///
/// A gene is kept when at least `min_samples` samples have a count of at
/// least `min_count`. The all-zero default keeps every gene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_count: u64,
    pub min_samples: usize,
}

impl FilterConfig {
    pub fn is_enabled(&self) -> bool {
        self.min_count > 0 && self.min_samples > 0
    }
}

/// Full configuration of a differential expression run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    /// Baseline group; alphabetically first group when unset
    pub reference_group: Option<String>,
    /// Group compared against the reference; required with more than two groups
    pub test_group: Option<String>,
    pub correction: CorrectionMethod,
    /// Adjusted p-value below which a gene can be called significant
    pub padj_cutoff: f64,
    /// Absolute log2 fold change a significant gene must exceed
    pub min_abs_log2_fold_change: f64,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            reference_group: None,
            test_group: None,
            correction: CorrectionMethod::BenjaminiHochberg,
            padj_cutoff: 0.05,
            min_abs_log2_fold_change: 2.0,
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    /// Check every value before any computation starts
    pub fn validate(&self) -> Result<()> {
        if !(self.padj_cutoff > 0.0 && self.padj_cutoff <= 1.0) {
            return Err(DeError::config(format!(
                "padj_cutoff must be in (0, 1], got {}",
                self.padj_cutoff
            )));
        }
        if !(self.min_abs_log2_fold_change >= 0.0 && self.min_abs_log2_fold_change.is_finite()) {
            return Err(DeError::config(format!(
                "min_abs_log2_fold_change must be non-negative, got {}",
                self.min_abs_log2_fold_change
            )));
        }
        if (self.filter.min_count > 0) != (self.filter.min_samples > 0) {
            return Err(DeError::config(
                "filter needs both min_count and min_samples, or neither",
            ));
        }
        if let (Some(reference), Some(test)) = (&self.reference_group, &self.test_group) {
            if reference == test {
                return Err(DeError::config(format!(
                    "reference and test group are both '{}'",
                    reference
                )));
            }
        }
        self.dispersion.validate()?;
        self.glm.validate()?;
        Ok(())
    }
}
