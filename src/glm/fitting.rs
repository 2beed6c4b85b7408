//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::design::GroupDesign;
use super::negative_binomial::{nb_mean, nb_weight, MAX_BETA, MIN_MU};
use crate::data::CountMatrix;
use crate::dispersion::DispersionEstimate;
use crate::error::{DeError, FitConvergenceFailure, FitFailureReason, Result};
use crate::linalg;
use crate::normalization::SizeFactors;

/// Ridge added to the diagonal of X'WX during IRLS
const RIDGE: f64 = 1e-6;

/// Floor for group means when initializing the coefficients
const INIT_FLOOR: f64 = 0.1;

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Convergence tolerance on the largest coefficient change
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

impl GlmFitParams {
    pub fn validate(&self) -> Result<()> {
        if self.maxit == 0 {
            return Err(DeError::config("GLM maxit must be at least 1"));
        }
        if !(self.beta_tol > 0.0 && self.beta_tol.is_finite()) {
            return Err(DeError::config("beta_tol must be positive"));
        }
        Ok(())
    }
}

/// Outcome of fitting one gene
#[derive(Debug, Clone, PartialEq)]
pub enum FitResult {
    /// Coefficients and standard errors on the natural-log scale
    Converged {
        coefficients: Vec<f64>,
        standard_error: Vec<f64>,
        iterations: usize,
    },
    /// No usable fit; the fold change, if any, comes from raw group means
    Indeterminate {
        approximate_log2_fold_change: Option<f64>,
        failure: FitConvergenceFailure,
    },
}

impl FitResult {
    /// log2 fold change of coefficient `coef` (exact or approximate)
    pub fn log2_fold_change(&self, coef: usize) -> Option<f64> {
        match self {
            FitResult::Converged { coefficients, .. } => {
                Some(coefficients[coef] / std::f64::consts::LN_2)
            }
            FitResult::Indeterminate {
                approximate_log2_fold_change,
                ..
            } => *approximate_log2_fold_change,
        }
    }

    pub fn failure(&self) -> Option<&FitConvergenceFailure> {
        match self {
            FitResult::Converged { .. } => None,
            FitResult::Indeterminate { failure, .. } => Some(failure),
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, FitResult::Converged { .. })
    }
}

/// Fit the NB GLM to all genes, in parallel, preserving row order
pub fn fit_all(
    matrix: &CountMatrix,
    size_factors: &SizeFactors,
    design: &GroupDesign,
    dispersions: &[DispersionEstimate],
    params: &GlmFitParams,
) -> Vec<FitResult> {
    let counts = matrix.counts();
    let gene_ids = matrix.gene_ids();
    let sf: Vec<f64> = size_factors.values().to_vec();

    let results: Vec<FitResult> = (0..matrix.n_genes())
        .into_par_iter()
        .map(|i| {
            let row: Vec<f64> = counts.row(i).to_vec();
            fit_gene(&gene_ids[i], &row, &sf, design, dispersions[i].value(), params)
        })
        .collect();

    let n_converged = results.iter().filter(|r| r.is_converged()).count();
    log::info!(
        "GLM fits: {} converged, {} indeterminate",
        n_converged,
        results.len() - n_converged
    );

    results
}

/// Fit one gene with its dispersion fixed and `ln(size_factor)` as offset
pub fn fit_gene(
    gene_id: &str,
    counts: &[f64],
    size_factors: &[f64],
    design: &GroupDesign,
    dispersion: Option<f64>,
    params: &GlmFitParams,
) -> FitResult {
    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| c / s)
        .collect();
    let group_means = design.group_means(&normalized);

    let fail = |iterations: usize, reason: FitFailureReason| {
        log::debug!("GLM fit for {} failed: {}", gene_id, reason);
        FitResult::Indeterminate {
            approximate_log2_fold_change: approximate_log2_fold_change(&group_means, design),
            failure: FitConvergenceFailure {
                gene_id: gene_id.to_string(),
                iterations,
                reason,
            },
        }
    };

    let alpha = match dispersion {
        Some(a) => a,
        None => {
            return FitResult::Indeterminate {
                approximate_log2_fold_change: None,
                failure: FitConvergenceFailure {
                    gene_id: gene_id.to_string(),
                    iterations: 0,
                    reason: FitFailureReason::NoDispersion,
                },
            }
        }
    };

    let x = design.matrix();
    let n_samples = counts.len();
    let n_coefs = design.n_groups();

    // Initialize from log group means, reference first
    let mut beta = vec![0.0; n_coefs];
    beta[0] = group_means[0].max(INIT_FLOOR).ln();
    for k in 1..n_coefs {
        beta[k] = group_means[k].max(INIT_FLOOR).ln() - beta[0];
    }

    let mut weights = vec![0.0; n_samples];
    let mut working_response = vec![0.0; n_samples];

    for iter in 1..=params.maxit {
        for j in 0..n_samples {
            let eta: f64 = (0..n_coefs).map(|k| x[[j, k]] * beta[k]).sum();
            let mu = nb_mean(eta, size_factors[j]).max(MIN_MU);
            weights[j] = nb_weight(mu, alpha);
            working_response[j] = (mu / size_factors[j]).ln() + (counts[j] - mu) / mu;
        }

        let mut a = linalg::xtwx(x, &weights);
        for k in 0..n_coefs {
            a[k * n_coefs + k] += RIDGE;
        }
        let b = linalg::xtwz(x, &weights, &working_response);

        let new_beta = match linalg::solve(&a, &b, n_coefs) {
            Some(v) => v,
            None => return fail(iter, FitFailureReason::NonFinite),
        };

        if new_beta.iter().any(|b| b.abs() > MAX_BETA) {
            return fail(iter, FitFailureReason::Diverged);
        }

        let max_change = new_beta
            .iter()
            .zip(&beta)
            .map(|(n, o)| (n - o).abs())
            .fold(0.0, f64::max);
        beta = new_beta;

        if max_change < params.beta_tol {
            return match standard_errors(&beta, size_factors, design, alpha) {
                Some(standard_error) => FitResult::Converged {
                    coefficients: beta,
                    standard_error,
                    iterations: iter,
                },
                None => fail(iter, FitFailureReason::NonFinite),
            };
        }
    }

    fail(params.maxit, FitFailureReason::IterationLimit)
}

/// sqrt(diag((X'WX)^-1)) at the fitted coefficients
fn standard_errors(
    beta: &[f64],
    size_factors: &[f64],
    design: &GroupDesign,
    alpha: f64,
) -> Option<Vec<f64>> {
    let x = design.matrix();
    let n_coefs = beta.len();
    let weights: Vec<f64> = (0..x.nrows())
        .map(|j| {
            let eta: f64 = (0..n_coefs).map(|k| x[[j, k]] * beta[k]).sum();
            nb_weight(nb_mean(eta, size_factors[j]).max(MIN_MU), alpha)
        })
        .collect();

    let inverse = linalg::invert(&linalg::xtwx(x, &weights), n_coefs)?;
    let se: Vec<f64> = (0..n_coefs)
        .map(|k| inverse[k * n_coefs + k].sqrt())
        .collect();

    if se.iter().all(|s| s.is_finite() && *s > 0.0) {
        Some(se)
    } else {
        None
    }
}

/// log2(test mean / reference mean) of the normalized counts, if finite
fn approximate_log2_fold_change(group_means: &[f64], design: &GroupDesign) -> Option<f64> {
    let lfc = (group_means[design.test_coefficient()] / group_means[0]).log2();
    if lfc.is_finite() {
        Some(lfc)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleSheet;
    use crate::glm::negative_binomial::nb_log_likelihood;

    fn design() -> GroupDesign {
        let sheet = SampleSheet::from_pairs(vec![
            ("s1", "A"),
            ("s2", "A"),
            ("s3", "A"),
            ("s4", "B"),
            ("s5", "B"),
            ("s6", "B"),
        ])
        .unwrap();
        GroupDesign::new(&sheet, None, None).unwrap()
    }

    #[test]
    fn test_fit_recovers_group_means() {
        let counts = [100.0, 100.0, 100.0, 400.0, 400.0, 400.0];
        let fit = fit_gene("g", &counts, &[1.0; 6], &design(), Some(0.1), &GlmFitParams::default());

        match &fit {
            FitResult::Converged {
                coefficients,
                standard_error,
                ..
            } => {
                assert!((coefficients[0] - 100.0_f64.ln()).abs() < 1e-5);
                assert!((coefficients[1] - 4.0_f64.ln()).abs() < 1e-5);

                // SE of the group difference: sqrt(1/sum(w_A) + 1/sum(w_B))
                let w_a = 3.0 * nb_weight(100.0, 0.1);
                let w_b = 3.0 * nb_weight(400.0, 0.1);
                let expected = (1.0 / w_a + 1.0 / w_b).sqrt();
                assert!((standard_error[1] - expected).abs() < 1e-5);
            }
            other => panic!("expected convergence, got {:?}", other),
        }
        assert!((fit.log2_fold_change(1).unwrap() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_fit_maximizes_likelihood_with_offsets() {
        let counts = [40.0, 130.0, 160.0, 300.0, 450.0, 1500.0];
        let sf = [0.5, 1.0, 2.0, 0.5, 1.0, 2.0];
        let alpha = 0.05;
        let fit = fit_gene("g", &counts, &sf, &design(), Some(alpha), &GlmFitParams::default());

        let coefficients = match fit {
            FitResult::Converged { coefficients, .. } => coefficients,
            other => panic!("expected convergence, got {:?}", other),
        };

        let loglik = |beta: &[f64]| -> f64 {
            (0..6)
                .map(|j| {
                    let eta = beta[0] + if j >= 3 { beta[1] } else { 0.0 };
                    nb_log_likelihood(counts[j], nb_mean(eta, sf[j]), alpha)
                })
                .sum()
        };
        let best = loglik(&coefficients);
        for (d0, d1) in [(0.01, 0.0), (-0.01, 0.0), (0.0, 0.01), (0.0, -0.01)] {
            let perturbed = [coefficients[0] + d0, coefficients[1] + d1];
            assert!(best >= loglik(&perturbed));
        }
    }

    #[test]
    fn test_iteration_limit_is_indeterminate() {
        let counts = [40.0, 130.0, 160.0, 300.0, 450.0, 1500.0];
        let sf = [0.5, 1.0, 2.0, 0.5, 1.0, 2.0];
        let params = GlmFitParams {
            maxit: 1,
            ..GlmFitParams::default()
        };
        let fit = fit_gene("g7", &counts, &sf, &design(), Some(0.05), &params);

        let failure = fit.failure().unwrap();
        assert_eq!(failure.gene_id, "g7");
        assert_eq!(failure.reason, FitFailureReason::IterationLimit);
        // normalized means: A = 290/3, B = 1800/3
        let expected = (1800.0_f64 / 290.0).log2();
        assert!((fit.log2_fold_change(1).unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn test_missing_dispersion_not_fitted() {
        let fit = fit_gene("z", &[0.0; 6], &[1.0; 6], &design(), None, &GlmFitParams::default());
        match fit {
            FitResult::Indeterminate {
                approximate_log2_fold_change,
                failure,
            } => {
                assert_eq!(approximate_log2_fold_change, None);
                assert_eq!(failure.reason, FitFailureReason::NoDispersion);
            }
            other => panic!("expected indeterminate, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_reference_group_gives_large_finite_change() {
        let counts = [0.0, 0.0, 0.0, 500.0, 500.0, 500.0];
        let fit = fit_gene("g", &counts, &[1.0; 6], &design(), Some(0.1), &GlmFitParams::default());
        assert!(fit.is_converged());
        let lfc = fit.log2_fold_change(1).unwrap();
        assert!(lfc > 5.0 && lfc.is_finite());
    }

    #[test]
    fn test_three_groups_use_gauss_jordan() {
        let sheet = SampleSheet::from_pairs(vec![
            ("s1", "a"),
            ("s2", "a"),
            ("s3", "b"),
            ("s4", "b"),
            ("s5", "c"),
            ("s6", "c"),
        ])
        .unwrap();
        let design = GroupDesign::new(&sheet, None, Some("c")).unwrap();
        let counts = [50.0, 50.0, 100.0, 100.0, 200.0, 200.0];
        let fit = fit_gene("g", &counts, &[1.0; 6], &design, Some(0.1), &GlmFitParams::default());
        assert!((fit.log2_fold_change(2).unwrap() - 2.0).abs() < 1e-5);
        assert!((fit.log2_fold_change(1).unwrap() - 1.0).abs() < 1e-5);
    }
}
