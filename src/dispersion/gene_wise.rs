//! Gene-wise dispersion estimation using the Cox-Reid adjusted profile likelihood
//!
//! Expected counts come from the group means of the normalized counts, so
//! only the dispersion is optimized. The search runs on `ln(alpha)`.

use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::error::DispersionFailureReason;
use crate::glm::{GroupDesign, MIN_MU};

/// Step for the central-difference second derivative, in log-dispersion units
const HESSIAN_STEP: f64 = 1e-4;

/// Upper bound on the dispersion for a run with `n_samples` samples
pub fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// Maximum-likelihood dispersion of a single gene.
///
/// Fails with `AllZero` for a gene without counts, `NonFinite` when the
/// likelihood or its derivative breaks down, and `IterationLimit` when the
/// search does not settle within `params.maxit` iterations.
pub fn estimate_gene_dispersion(
    counts: &[f64],
    size_factors: &[f64],
    design: &GroupDesign,
    params: &DispersionParams,
) -> Result<f64, DispersionFailureReason> {
    if counts.iter().all(|&c| c == 0.0) {
        return Err(DispersionFailureReason::AllZero);
    }

    let n_samples = counts.len();
    let min_disp = params.min_disp;
    let max_disp = max_dispersion(n_samples);

    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| c / s)
        .collect();
    let group_means = design.group_means(&normalized);

    let mu: Vec<f64> = (0..n_samples)
        .map(|j| (size_factors[j] * group_means[design.sample_groups()[j]]).max(MIN_MU))
        .collect();

    // Starting value: min(rough, moments), clamped
    let xim = size_factors.iter().map(|&s| 1.0 / s).sum::<f64>() / n_samples as f64;
    let rough = rough_disp_estimate(&normalized, &group_means, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments);
    let alpha_init = if alpha_init.is_nan() { min_disp } else { alpha_init };
    let alpha_init = alpha_init.max(min_disp).min(max_disp);

    let objective = CoxReid {
        counts,
        mu: &mu,
        members: design.members(),
    };

    let log_alpha = safeguarded_newton(
        &objective,
        alpha_init.ln(),
        min_disp.ln(),
        max_disp.ln(),
        params,
    )?;

    Ok(log_alpha.exp().max(min_disp).min(max_disp))
}

/// Newton iteration on the score of the log-dispersion, kept inside a bracket.
///
/// The bracket starts as `[lo, hi]` and is narrowed using the sign of the
/// score. A Newton step that leaves it, or a non-concave curvature, falls
/// back to bisection. An optimum on a bound converges to that bound.
fn safeguarded_newton(
    objective: &CoxReid<'_>,
    start: f64,
    mut lo: f64,
    mut hi: f64,
    params: &DispersionParams,
) -> Result<f64, DispersionFailureReason> {
    let mut theta = start.max(lo).min(hi);

    for _ in 0..params.maxit {
        let score = objective.d_log_likelihood(theta);
        if !score.is_finite() || !objective.log_likelihood(theta).is_finite() {
            return Err(DispersionFailureReason::NonFinite);
        }
        if score == 0.0 {
            return Ok(theta);
        }

        // The maximum lies on the side the score points to
        if score > 0.0 {
            lo = theta;
        } else {
            hi = theta;
        }

        let curvature = (objective.d_log_likelihood(theta + HESSIAN_STEP)
            - objective.d_log_likelihood(theta - HESSIAN_STEP))
            / (2.0 * HESSIAN_STEP);

        let newton = theta - score / curvature;
        let next = if curvature < 0.0 && newton.is_finite() && newton >= lo && newton <= hi {
            newton
        } else {
            0.5 * (lo + hi)
        };

        if (next - theta).abs() < params.disp_tol || hi - lo < params.disp_tol {
            return Ok(next);
        }
        theta = next;
    }

    Err(DispersionFailureReason::IterationLimit {
        iterations: params.maxit,
    })
}

/// Cox-Reid adjusted NB log-likelihood of one gene with fixed means.
///
/// For the one-factor design X'WX is block diagonal in the cell-means
/// parametrization, so `log|X'WX| = sum_g ln(sum_{j in g} w_j)` with
/// `w_j = 1 / (1/mu_j + alpha)`.
struct CoxReid<'a> {
    counts: &'a [f64],
    mu: &'a [f64],
    members: &'a [Vec<usize>],
}

impl CoxReid<'_> {
    fn log_likelihood(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;

        let mut ll = 0.0;
        for (&y, &mu) in self.counts.iter().zip(self.mu) {
            ll += ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv);
            ll -= y * (mu + alpha_inv).ln();
            ll -= alpha_inv * (1.0 + mu * alpha).ln();
        }

        let mut log_det = 0.0;
        for group in self.members {
            let sum_w: f64 = group.iter().map(|&j| 1.0 / (1.0 / self.mu[j] + alpha)).sum();
            log_det += sum_w.ln();
        }

        ll - 0.5 * log_det
    }

    /// Derivative of `log_likelihood` with respect to `ln(alpha)`
    fn d_log_likelihood(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;
        let alpha_sq = alpha * alpha;

        let mut dll = 0.0;
        for (&y, &mu) in self.counts.iter().zip(self.mu) {
            dll += (digamma(alpha_inv) - digamma(y + alpha_inv)) / alpha_sq;
            dll += y / (alpha_sq * (mu + alpha_inv));
            dll += (1.0 + mu * alpha).ln() / alpha_sq - mu / (alpha * (1.0 + mu * alpha));
        }

        // dw/dalpha = -w^2
        let mut dcr = 0.0;
        for group in self.members {
            let (sum_w, sum_w2) = group.iter().fold((0.0, 0.0), |(s, s2), &j| {
                let w = 1.0 / (1.0 / self.mu[j] + alpha);
                (s + w, s2 + w * w)
            });
            dcr += 0.5 * sum_w2 / sum_w;
        }

        (dll + dcr) * alpha
    }
}

/// Residual-based starting estimate: mean of ((y - m)^2 - m) / m^2 over residual df
fn rough_disp_estimate(normalized: &[f64], group_means: &[f64], design: &GroupDesign) -> f64 {
    let df = design.residual_df();
    if df == 0 {
        return f64::NAN;
    }
    let sum: f64 = normalized
        .iter()
        .zip(design.sample_groups())
        .map(|(&y, &g)| {
            let m = group_means[g].max(1.0);
            ((y - m).powi(2) - m) / (m * m)
        })
        .sum();
    (sum / df as f64).max(0.0)
}

/// Method-of-moments estimate: (var - xim * mean) / mean^2
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let base_mean = normalized.iter().sum::<f64>() / n;
    let base_var = if n > 1.0 {
        normalized.iter().map(|&x| (x - base_mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };

    if base_mean > 1e-10 {
        (base_var - xim * base_mean) / (base_mean * base_mean)
    } else {
        f64::INFINITY
    }
}
