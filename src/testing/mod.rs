//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod wald;

pub use fdr::{benjamini_hochberg, bonferroni};
pub use pvalue::calculate_pvalue;
pub use wald::{wald_test, WaldStatistic};

use serde::{Deserialize, Serialize};

/// Multiple-testing correction applied across all genes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    /// Benjamini-Hochberg false discovery rate
    #[default]
    BenjaminiHochberg,
    /// Bonferroni family-wise error rate
    Bonferroni,
}

impl CorrectionMethod {
    /// Adjust p-values; missing ones count as tests and get 1.0
    pub fn adjust(&self, pvalues: &[Option<f64>]) -> Vec<f64> {
        match self {
            CorrectionMethod::BenjaminiHochberg => benjamini_hochberg(pvalues),
            CorrectionMethod::Bonferroni => bonferroni(pvalues),
        }
    }
}

impl std::str::FromStr for CorrectionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bh" | "fdr" | "benjamini_hochberg" | "benjamini-hochberg" => {
                Ok(CorrectionMethod::BenjaminiHochberg)
            }
            "bonferroni" => Ok(CorrectionMethod::Bonferroni),
            other => Err(format!("unknown correction method '{}'", other)),
        }
    }
}

impl std::fmt::Display for CorrectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrectionMethod::BenjaminiHochberg => write!(f, "BH"),
            CorrectionMethod::Bonferroni => write!(f, "bonferroni"),
        }
    }
}
