//! Empirical-Bayes shrinkage of gene-wise dispersions toward the trend
//!
//! Shrinkage is a weighted average on the log scale. The weight comes from
//! the spread of the log residuals around the trend, split into a sampling
//! part (known from the residual degrees of freedom) and a prior part.

use super::{DispersionEstimate, DispersionParams, OutlierRule};
use crate::error::{ConvergenceFailure, DispersionFailureReason};
use crate::stats::{mad_squared, trigamma};

/// Spread of the dispersions around the trend, estimated once per run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionPrior {
    /// Squared MAD of the log residuals
    pub log_residual_variance: f64,
    /// Expected variance of a log dispersion estimate, trigamma((m - p) / 2)
    pub sampling_variance: f64,
    /// Prior variance after flooring
    pub prior_variance: f64,
    /// Multiplier over the trend beyond which a gene is an outlier
    pub outlier_factor: f64,
}

impl DispersionPrior {
    /// Weight of the gene-wise estimate in the log-scale average
    pub fn weight(&self) -> f64 {
        self.prior_variance / (self.prior_variance + self.sampling_variance)
    }
}

/// Estimate the prior from the genes with a usable gene-wise dispersion
pub fn estimate_prior(
    gene_wise: &[Result<f64, ConvergenceFailure>],
    trend: &[f64],
    residual_df: usize,
    params: &DispersionParams,
) -> DispersionPrior {
    let threshold = params.min_disp * 100.0;
    let log_residuals: Vec<f64> = gene_wise
        .iter()
        .zip(trend)
        .filter_map(|(raw, &t)| match raw {
            Ok(d) if *d > threshold && t > 0.0 => Some(d.ln() - t.ln()),
            _ => None,
        })
        .collect();

    let log_residual_variance = mad_squared(&log_residuals);
    let sampling_variance = trigamma(residual_df as f64 / 2.0);
    let prior_variance = (log_residual_variance - sampling_variance).max(params.min_prior_var);

    let outlier_factor = match params.outlier_rule {
        OutlierRule::Factor(f) => f,
        OutlierRule::SdMultiple(k) => (k * log_residual_variance.sqrt()).exp(),
    };

    log::debug!(
        "Dispersion prior: var_log={:.4}, sampling={:.4}, prior={:.4}, outlier factor={:.3}",
        log_residual_variance,
        sampling_variance,
        prior_variance,
        outlier_factor
    );

    DispersionPrior {
        log_residual_variance,
        sampling_variance,
        prior_variance,
        outlier_factor,
    }
}

/// Final dispersion of one gene given its gene-wise result and trend value
pub fn shrink_gene(
    gene_wise: &Result<f64, ConvergenceFailure>,
    trend: f64,
    prior: &DispersionPrior,
) -> DispersionEstimate {
    match gene_wise {
        Err(failure) if failure.reason == DispersionFailureReason::AllZero => {
            DispersionEstimate::Missing {
                failure: failure.clone(),
            }
        }
        Err(failure) => DispersionEstimate::TrendFallback {
            trend,
            failure: failure.clone(),
        },
        Ok(raw) if *raw > trend * prior.outlier_factor => {
            DispersionEstimate::Outlier { raw: *raw, trend }
        }
        Ok(raw) => {
            let weight = prior.weight();
            let value = (weight * raw.ln() + (1.0 - weight) * trend.ln()).exp();
            DispersionEstimate::Shrunk {
                raw: *raw,
                trend,
                value,
                weight,
            }
        }
    }
}
