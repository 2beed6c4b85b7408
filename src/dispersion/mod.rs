//! Dispersion estimation for negative binomial models
//!
//! Three steps: gene-wise maximum likelihood, a mean-dispersion trend, and
//! shrinkage of the gene-wise values toward that trend.

mod gene_wise;
mod shrink;
mod trend;

pub use gene_wise::{estimate_gene_dispersion, max_dispersion};
pub use shrink::{estimate_prior, shrink_gene, DispersionPrior};
pub use trend::{fit_dispersion_trend, DispersionTrend, TrendFitMethod};

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{ConvergenceFailure, DeError, DispersionFailureReason, Result};
use crate::glm::GroupDesign;
use crate::normalization::SizeFactors;

/// When a gene-wise dispersion is considered an outlier above the trend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierRule {
    /// Fixed multiple of the trend (>= 1)
    Factor(f64),
    /// Multiple of the standard deviation of the log residuals
    SdMultiple(f64),
}

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Minimum dispersion value
    pub min_disp: f64,
    /// Convergence tolerance on the log-dispersion change
    pub disp_tol: f64,
    /// Maximum iterations for the gene-wise optimization
    pub maxit: usize,
    pub trend_method: TrendFitMethod,
    pub outlier_rule: OutlierRule,
    /// Floor for the prior variance of the log dispersions
    pub min_prior_var: f64,
    /// Dispersion used when no trend can be fitted or there are no replicates
    pub default_dispersion: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            maxit: 100,
            trend_method: TrendFitMethod::Parametric,
            outlier_rule: OutlierRule::SdMultiple(2.0),
            min_prior_var: 0.25,
            default_dispersion: 0.1,
        }
    }
}

impl DispersionParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_disp > 0.0 && self.min_disp.is_finite()) {
            return Err(DeError::config("min_disp must be positive"));
        }
        if !(self.disp_tol > 0.0 && self.disp_tol.is_finite()) {
            return Err(DeError::config("disp_tol must be positive"));
        }
        if self.maxit == 0 {
            return Err(DeError::config("dispersion maxit must be at least 1"));
        }
        if !(self.min_prior_var > 0.0 && self.min_prior_var.is_finite()) {
            return Err(DeError::config("min_prior_var must be positive"));
        }
        if !(self.default_dispersion > 0.0 && self.default_dispersion.is_finite()) {
            return Err(DeError::config("default_dispersion must be positive"));
        }
        match self.outlier_rule {
            OutlierRule::Factor(f) if !(f >= 1.0 && f.is_finite()) => Err(DeError::config(format!(
                "outlier factor must be >= 1, got {}",
                f
            ))),
            OutlierRule::SdMultiple(k) if !(k > 0.0 && k.is_finite()) => Err(DeError::config(
                format!("outlier SD multiple must be positive, got {}", k),
            )),
            _ => Ok(()),
        }
    }
}

/// Dispersion of one gene, tagged by how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub enum DispersionEstimate {
    /// Gene-wise estimate pulled toward the trend
    Shrunk {
        raw: f64,
        trend: f64,
        value: f64,
        weight: f64,
    },
    /// Gene-wise estimate far above the trend, kept as is
    Outlier { raw: f64, trend: f64 },
    /// Gene-wise estimation failed; the trend value is used
    TrendFallback {
        trend: f64,
        failure: ConvergenceFailure,
    },
    /// No residual degrees of freedom; a fixed value is used
    Default { value: f64 },
    /// All-zero gene, nothing to estimate
    Missing { failure: ConvergenceFailure },
}

impl DispersionEstimate {
    /// Dispersion used for the GLM fit
    pub fn value(&self) -> Option<f64> {
        match self {
            DispersionEstimate::Shrunk { value, .. } => Some(*value),
            DispersionEstimate::Outlier { raw, .. } => Some(*raw),
            DispersionEstimate::TrendFallback { trend, .. } => Some(*trend),
            DispersionEstimate::Default { value } => Some(*value),
            DispersionEstimate::Missing { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ConvergenceFailure> {
        match self {
            DispersionEstimate::TrendFallback { failure, .. }
            | DispersionEstimate::Missing { failure } => Some(failure),
            _ => None,
        }
    }

    pub fn is_outlier(&self) -> bool {
        matches!(self, DispersionEstimate::Outlier { .. })
    }
}

/// Everything the dispersion stage produces for a run
#[derive(Debug, Clone)]
pub struct Dispersions {
    /// One estimate per gene, in matrix row order
    pub estimates: Vec<DispersionEstimate>,
    pub trend: DispersionTrend,
    /// `None` when there were no residual degrees of freedom
    pub prior: Option<DispersionPrior>,
}

impl Dispersions {
    pub fn failures(&self) -> impl Iterator<Item = &ConvergenceFailure> {
        self.estimates.iter().filter_map(|e| e.failure())
    }
}

/// Estimate all dispersions (gene-wise, trended, and shrunk)
pub fn estimate_dispersions(
    matrix: &CountMatrix,
    size_factors: &SizeFactors,
    base_means: &Array1<f64>,
    design: &GroupDesign,
    params: &DispersionParams,
) -> Dispersions {
    let counts = matrix.counts();
    let gene_ids = matrix.gene_ids();
    let n_genes = matrix.n_genes();
    let sf: Vec<f64> = size_factors.values().to_vec();

    // No replicates: nothing to estimate a dispersion from
    if design.residual_df() == 0 {
        log::warn!(
            "{} samples in {} groups leaves no residual degrees of freedom, using dispersion {} for every gene",
            design.n_samples(),
            design.n_groups(),
            params.default_dispersion
        );
        let estimates = (0..n_genes)
            .map(|i| {
                if counts.row(i).iter().all(|&c| c == 0.0) {
                    DispersionEstimate::Missing {
                        failure: ConvergenceFailure {
                            gene_id: gene_ids[i].clone(),
                            reason: DispersionFailureReason::AllZero,
                        },
                    }
                } else {
                    DispersionEstimate::Default {
                        value: params.default_dispersion,
                    }
                }
            })
            .collect();
        return Dispersions {
            estimates,
            trend: DispersionTrend::constant(params.default_dispersion),
            prior: None,
        };
    }

    // Step 1: gene-wise MLE
    let gene_wise: Vec<std::result::Result<f64, ConvergenceFailure>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let row: Vec<f64> = counts.row(i).to_vec();
            estimate_gene_dispersion(&row, &sf, design, params).map_err(|reason| {
                ConvergenceFailure {
                    gene_id: gene_ids[i].clone(),
                    reason,
                }
            })
        })
        .collect();

    let n_failed = gene_wise.iter().filter(|r| r.is_err()).count();
    log::info!(
        "Gene-wise dispersions: {} estimated, {} failed",
        n_genes - n_failed,
        n_failed
    );

    // Step 2: trend
    let raw: Vec<Option<f64>> = gene_wise.iter().map(|r| r.as_ref().ok().copied()).collect();
    let means = base_means.to_vec();
    let trend = fit_dispersion_trend(&means, &raw, params);
    let trend_values: Vec<f64> = means.iter().map(|&m| trend.at(m)).collect();

    // Step 3: shrinkage
    let prior = estimate_prior(&gene_wise, &trend_values, design.residual_df(), params);
    let estimates: Vec<DispersionEstimate> = (0..n_genes)
        .into_par_iter()
        .map(|i| shrink_gene(&gene_wise[i], trend_values[i], &prior))
        .collect();

    let n_outliers = estimates.iter().filter(|e| e.is_outlier()).count();
    log::info!(
        "Dispersion shrinkage: prior variance {:.4}, {} outliers",
        prior.prior_variance,
        n_outliers
    );

    Dispersions {
        estimates,
        trend,
        prior: Some(prior),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleSheet;
    use crate::normalization::{base_means, estimate_size_factors, normalized_counts};
    use ndarray::array;

    fn run(matrix: &CountMatrix) -> Dispersions {
        let sf = estimate_size_factors(matrix).unwrap();
        let means = base_means(&normalized_counts(matrix, &sf));
        let design = GroupDesign::new(matrix.samples(), None, None).unwrap();
        estimate_dispersions(matrix, &sf, &means, &design, &DispersionParams::default())
    }

    #[test]
    fn test_no_replicates_uses_default() {
        let samples = SampleSheet::from_pairs(vec![("a1", "A"), ("b1", "B")]).unwrap();
        let matrix = CountMatrix::new(
            array![[10.0, 40.0], [100.0, 90.0], [5.0, 7.0]],
            vec!["g1".to_string(), "g2".to_string(), "g3".to_string()],
            samples,
        )
        .unwrap();

        let disp = run(&matrix);
        assert!(disp.prior.is_none());
        for e in &disp.estimates {
            assert_eq!(*e, DispersionEstimate::Default { value: 0.1 });
        }
    }

    #[test]
    fn test_all_zero_gene_is_missing() {
        let samples = SampleSheet::from_pairs(vec![
            ("s1", "A"),
            ("s2", "A"),
            ("s3", "B"),
            ("s4", "B"),
        ])
        .unwrap();
        let matrix = CountMatrix::new(
            array![
                [100.0, 120.0, 300.0, 280.0],
                [0.0, 0.0, 0.0, 0.0],
                [50.0, 45.0, 52.0, 60.0],
                [20.0, 35.0, 10.0, 25.0]
            ],
            (1..=4).map(|i| format!("g{}", i)).collect(),
            samples,
        )
        .unwrap();

        let disp = run(&matrix);
        assert_eq!(disp.estimates.len(), 4);
        match &disp.estimates[1] {
            DispersionEstimate::Missing { failure } => {
                assert_eq!(failure.gene_id, "g2");
                assert_eq!(failure.reason, DispersionFailureReason::AllZero);
            }
            other => panic!("expected missing estimate, got {:?}", other),
        }
        assert_eq!(disp.failures().count(), 1);
        for i in [0, 2, 3] {
            let v = disp.estimates[i].value().unwrap();
            assert!(v > 0.0 && v.is_finite());
        }
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let mut params = DispersionParams::default();
        assert!(params.validate().is_ok());
        params.outlier_rule = OutlierRule::Factor(0.5);
        assert!(params.validate().is_err());
        params.outlier_rule = OutlierRule::SdMultiple(2.0);
        params.default_dispersion = 0.0;
        assert!(params.validate().is_err());
    }
}
