//! Dispersion trend fitting

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::DispersionParams;
use crate::stats::trimmed_mean;

/// Fraction trimmed from each tail for the mean trend
const MEAN_TRIM: f64 = 0.001;

/// Method for fitting the dispersion-mean trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendFitMethod {
    /// Parametric fit: dispersion = asymptotic + extra_poisson / mean
    Parametric,
    /// Use the (trimmed) mean of dispersions, no dependence on the mean
    Mean,
}

impl std::str::FromStr for TrendFitMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parametric" => Ok(TrendFitMethod::Parametric),
            "mean" => Ok(TrendFitMethod::Mean),
            other => Err(format!("unknown trend fit method '{}'", other)),
        }
    }
}

/// Fitted dispersion trend `alpha(mu) = asymptotic + extra_poisson / mu`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionTrend {
    /// Method that produced the coefficients
    pub method: TrendFitMethod,
    pub asymptotic: f64,
    pub extra_poisson: f64,
}

impl DispersionTrend {
    /// A trend that is the same value at every mean
    pub fn constant(value: f64) -> Self {
        Self {
            method: TrendFitMethod::Mean,
            asymptotic: value,
            extra_poisson: 0.0,
        }
    }

    /// Trend value at a given base mean
    pub fn at(&self, base_mean: f64) -> f64 {
        if self.extra_poisson == 0.0 {
            self.asymptotic
        } else {
            self.asymptotic + self.extra_poisson / base_mean
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct TrendFitError(String);

/// Fit a trend to the gene-wise dispersions as a function of mean expression.
///
/// Only genes with a finite dispersion above `100 * min_disp` and a positive
/// base mean are used. A parametric fit that fails falls back to the mean.
pub fn fit_dispersion_trend(
    base_means: &[f64],
    dispersions: &[Option<f64>],
    params: &DispersionParams,
) -> DispersionTrend {
    let threshold = params.min_disp * 100.0;
    let data: Vec<(f64, f64)> = base_means
        .iter()
        .zip(dispersions)
        .filter_map(|(&m, d)| match d {
            Some(d) if d.is_finite() && *d > threshold && m > 0.0 => Some((m, *d)),
            _ => None,
        })
        .collect();

    if data.is_empty() {
        log::warn!(
            "No gene-wise dispersions usable for the trend, using constant {}",
            params.default_dispersion
        );
        return DispersionTrend::constant(params.default_dispersion);
    }

    log::debug!("Fitting dispersion trend on {} genes", data.len());

    match params.trend_method {
        TrendFitMethod::Parametric => match fit_parametric(&data) {
            Ok((asymptotic, extra_poisson)) => {
                log::info!(
                    "Dispersion trend: {:.4e} + {:.4} / mean",
                    asymptotic,
                    extra_poisson
                );
                DispersionTrend {
                    method: TrendFitMethod::Parametric,
                    asymptotic,
                    extra_poisson,
                }
            }
            Err(e) => {
                log::info!("Parametric fit failed ({}), using mean of dispersions", e);
                mean_trend(&data)
            }
        },
        TrendFitMethod::Mean => mean_trend(&data),
    }
}

fn mean_trend(data: &[(f64, f64)]) -> DispersionTrend {
    let disps: Vec<f64> = data.iter().map(|&(_, d)| d).collect();
    // data is non-empty, so the trimmed mean exists
    let value = trimmed_mean(&disps, MEAN_TRIM).unwrap_or(0.0);
    log::info!("Dispersion trend: mean {:.4e}", value);
    DispersionTrend::constant(value)
}

/// Iterate gamma GLM fits, dropping genes whose dispersion is far from the
/// current fit (keep `1e-4 < disp / fitted < 15`).
fn fit_parametric(data: &[(f64, f64)]) -> Result<(f64, f64), TrendFitError> {
    let mut coefs = (0.1_f64, 1.0_f64);
    let max_iter = 11;
    let tol = 1e-6;

    for iter in 0..max_iter {
        let old_coefs = coefs;

        let good_data: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                if fitted <= 0.0 {
                    return false;
                }
                let residual = disp / fitted;
                residual > 1e-4 && residual < 15.0
            })
            .copied()
            .collect();

        if good_data.len() < 3 {
            return Err(TrendFitError(format!(
                "only {} genes within the residual window",
                good_data.len()
            )));
        }

        let (new_coefs, glm_converged) = fit_gamma_glm_identity(&good_data, coefs);
        log::debug!(
            "Trend iteration {}: {} genes, asymptotic={:.6}, extra_poisson={:.6}",
            iter + 1,
            good_data.len(),
            new_coefs.0,
            new_coefs.1
        );
        coefs = new_coefs;

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(TrendFitError(format!(
                "coefficients not positive (asymptotic={:.4}, extra_poisson={:.4})",
                coefs.0, coefs.1
            )));
        }

        let log_change =
            (coefs.0 / old_coefs.0).ln().powi(2) + (coefs.1 / old_coefs.1).ln().powi(2);
        if log_change < tol && glm_converged {
            return Ok(coefs);
        }
    }

    Err(TrendFitError("trend fit did not converge".to_string()))
}

/// Gamma GLM with identity link: disp ~ 1 + 1/mean, by IRLS.
///
/// Returns the coefficients and whether the deviance settled.
fn fit_gamma_glm_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let max_iter = 25;
    let tol = 1e-8;

    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(mean, disp)| {
                let mu = (a0 + a1 / mean).max(1e-8);
                2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
            })
            .sum()
    };

    let mut dev_old = deviance(a0, a1);

    for _ in 0..max_iter {
        let mut sum_w = 0.0_f64;
        let mut sum_wx = 0.0_f64;
        let mut sum_wz = 0.0_f64;
        let mut sum_wxx = 0.0_f64;
        let mut sum_wxz = 0.0_f64;

        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);

            sum_w += w;
            sum_wx += w * x;
            sum_wz += w * disp;
            sum_wxx += w * x * x;
            sum_wxz += w * x * disp;
        }

        let det = sum_w * sum_wxx - sum_wx * sum_wx;
        if det.abs() < 1e-10 {
            break;
        }

        a0 = (sum_wxx * sum_wz - sum_wx * sum_wxz) / det;
        a1 = (sum_w * sum_wxz - sum_wx * sum_wz) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < tol {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }

    ((a0, a1), false)
}
