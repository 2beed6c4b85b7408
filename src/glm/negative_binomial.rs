//! Negative binomial distribution utilities

use statrs::function::gamma::ln_gamma;

/// Floor applied to fitted means before computing IRLS weights
pub const MIN_MU: f64 = 0.5;

/// Coefficients beyond this magnitude (natural log scale) mark a diverged fit
pub const MAX_BETA: f64 = 30.0;

/// Maximum linear predictor, exp(700) is close to the f64 limit
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Log-probability of count `k` with mean `mu` and dispersion `alpha`
pub fn nb_log_likelihood(k: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }

    let r = 1.0 / alpha;
    let p = alpha * mu / (1.0 + alpha * mu);

    ln_gamma(k + r) - ln_gamma(r) - ln_gamma(k + 1.0) + r * (1.0 - p).ln() + k * p.ln()
}

/// IRLS working weight, W = mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}
