//! Differential expression results

use std::cmp::Ordering;
use std::fmt;

use crate::dispersion::{DispersionEstimate, DispersionPrior, DispersionTrend};
use crate::error::{ConvergenceFailure, FitConvergenceFailure, FitFailureReason};
use crate::glm::FitResult;
use crate::normalization::SizeFactors;
use crate::testing::CorrectionMethod;

/// How a gene made it through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneStatus {
    Ok,
    /// Gene-wise dispersion far above the trend, used unshrunk
    DispersionOutlier,
    /// Gene-wise dispersion failed, the trend value was used
    DispersionFallback,
    /// No replicates, the fixed default dispersion was used
    DefaultDispersion,
    /// Every count is zero
    AllZero,
    /// GLM did not converge
    FitFailed,
}

impl GeneStatus {
    pub fn from_estimates(dispersion: &DispersionEstimate, fit: &FitResult) -> Self {
        if let Some(failure) = fit.failure() {
            return match failure.reason {
                FitFailureReason::NoDispersion => GeneStatus::AllZero,
                _ => GeneStatus::FitFailed,
            };
        }
        match dispersion {
            DispersionEstimate::Shrunk { .. } => GeneStatus::Ok,
            DispersionEstimate::Outlier { .. } => GeneStatus::DispersionOutlier,
            DispersionEstimate::TrendFallback { .. } => GeneStatus::DispersionFallback,
            DispersionEstimate::Default { .. } => GeneStatus::DefaultDispersion,
            DispersionEstimate::Missing { .. } => GeneStatus::AllZero,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeneStatus::Ok => "ok",
            GeneStatus::DispersionOutlier => "dispersion_outlier",
            GeneStatus::DispersionFallback => "dispersion_fallback",
            GeneStatus::DefaultDispersion => "default_dispersion",
            GeneStatus::AllZero => "all_zero",
            GeneStatus::FitFailed => "fit_failed",
        }
    }
}

impl fmt::Display for GeneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the results table
#[derive(Debug, Clone, PartialEq)]
pub struct DeResult {
    pub gene_id: String,
    /// Mean of the normalized counts over all samples
    pub base_mean: f64,
    pub log2_fold_change: Option<f64>,
    pub lfc_se: Option<f64>,
    /// Wald statistic
    pub stat: Option<f64>,
    pub pvalue: Option<f64>,
    /// Adjusted p-value; 1.0 for genes without a p-value
    pub padj: f64,
    /// Dispersion used in the GLM fit
    pub dispersion: Option<f64>,
    pub significant: bool,
    pub status: GeneStatus,
}

/// Per-gene failures of a run, kept in matrix row order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureSummary {
    pub dispersion: Vec<ConvergenceFailure>,
    pub fit: Vec<FitConvergenceFailure>,
}

impl FailureSummary {
    pub fn is_empty(&self) -> bool {
        self.dispersion.is_empty() && self.fit.is_empty()
    }

    pub fn dispersion_gene_ids(&self) -> Vec<&str> {
        self.dispersion.iter().map(|f| f.gene_id.as_str()).collect()
    }

    pub fn fit_gene_ids(&self) -> Vec<&str> {
        self.fit.iter().map(|f| f.gene_id.as_str()).collect()
    }
}

/// Output of a pipeline run
#[derive(Debug, Clone)]
pub struct DeResults {
    /// Rows sorted by padj, then p-value (missing last), then gene id
    pub rows: Vec<DeResult>,
    pub failures: FailureSummary,
    pub size_factors: SizeFactors,
    pub trend: DispersionTrend,
    /// `None` when there were no replicates
    pub prior: Option<DispersionPrior>,
    pub reference_group: String,
    pub test_group: String,
    pub correction: CorrectionMethod,
    pub padj_cutoff: f64,
    /// Genes removed by the expression filter
    pub n_filtered: usize,
}

impl DeResults {
    pub fn n_genes(&self) -> usize {
        self.rows.len()
    }

    /// Look up the row of a gene
    pub fn get(&self, gene_id: &str) -> Option<&DeResult> {
        self.rows.iter().find(|r| r.gene_id == gene_id)
    }

    pub fn significant(&self) -> impl Iterator<Item = &DeResult> {
        self.rows.iter().filter(|r| r.significant)
    }

    /// Name of the tested contrast, e.g. `treated_vs_control`
    pub fn contrast(&self) -> String {
        format!("{}_vs_{}", self.test_group, self.reference_group)
    }

    pub fn summary(&self) -> ResultsSummary {
        let tested = self.rows.iter().filter(|r| r.pvalue.is_some()).count();
        let upregulated = self
            .significant()
            .filter(|r| r.log2_fold_change.is_some_and(|l| l > 0.0))
            .count();
        let downregulated = self
            .significant()
            .filter(|r| r.log2_fold_change.is_some_and(|l| l < 0.0))
            .count();
        let outliers = self
            .rows
            .iter()
            .filter(|r| r.status == GeneStatus::DispersionOutlier)
            .count();

        ResultsSummary {
            contrast: self.contrast(),
            total_genes: self.n_genes(),
            genes_tested: tested,
            significant: upregulated + downregulated,
            upregulated,
            downregulated,
            dispersion_outliers: outliers,
            dispersion_failures: self.failures.dispersion.len(),
            fit_failures: self.failures.fit.len(),
            filtered: self.n_filtered,
            padj_cutoff: self.padj_cutoff,
        }
    }
}

/// Order rows by padj, then raw p-value with missing values last, then gene id
pub fn sort_results(rows: &mut [DeResult]) {
    rows.sort_by(|a, b| {
        a.padj
            .total_cmp(&b.padj)
            .then_with(|| match (a.pvalue, b.pvalue) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.gene_id.cmp(&b.gene_id))
    });
}

/// Counts describing a run
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub contrast: String,
    pub total_genes: usize,
    pub genes_tested: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub dispersion_outliers: usize,
    pub dispersion_failures: usize,
    pub fit_failures: usize,
    pub filtered: usize,
    pub padj_cutoff: f64,
}

impl fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Differential expression: {}", self.contrast)?;
        writeln!(f, "================================")?;
        writeln!(f, "Total genes: {}", self.total_genes)?;
        if self.filtered > 0 {
            writeln!(f, "Filtered (low expression): {}", self.filtered)?;
        }
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(
            f,
            "Significant (padj < {}): {}",
            self.padj_cutoff, self.significant
        )?;
        writeln!(f, "  Up-regulated: {}", self.upregulated)?;
        writeln!(f, "  Down-regulated: {}", self.downregulated)?;
        writeln!(f, "Dispersion outliers: {}", self.dispersion_outliers)?;
        writeln!(f, "Dispersion failures: {}", self.dispersion_failures)?;
        writeln!(f, "GLM fit failures: {}", self.fit_failures)?;
        Ok(())
    }
}
