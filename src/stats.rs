//! Statistical utility functions shared across modules
//!
//! Order statistics and special functions used by size factor estimation,
//! the dispersion trend, and dispersion shrinkage.

use std::cmp::Ordering;

/// Scale factor that makes the MAD a consistent estimator of the normal SD
const MAD_CONSTANT: f64 = 1.4826;

/// Median of a slice; `None` when empty or when any value is NaN.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|x| x.is_nan()) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    let m = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };
    Some(m)
}

/// Squared median absolute deviation, scaled for consistency with the normal SD.
pub fn mad_squared(values: &[f64]) -> f64 {
    let center = match median(values) {
        Some(m) => m,
        None => return 0.0,
    };
    let abs_devs: Vec<f64> = values.iter().map(|&x| (x - center).abs()).collect();
    let mad = median(&abs_devs).unwrap_or(0.0) * MAD_CONSTANT;
    mad * mad
}

/// Geometric mean of strictly positive values; `None` if any value is not positive.
pub fn geometric_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|&x| !(x > 0.0) || !x.is_finite()) {
        return None;
    }
    let log_mean = values.iter().map(|x| x.ln()).sum::<f64>() / values.len() as f64;
    Some(log_mean.exp())
}

/// Mean after trimming `trim` (a fraction in [0, 0.5)) from each tail.
pub fn trimmed_mean(values: &[f64], trim: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    let cut = ((n as f64) * trim.clamp(0.0, 0.499)).floor() as usize;
    let kept = &sorted[cut..n - cut];
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Trigamma function (derivative of digamma).
///
/// Reflection for x < 0.5, upward recurrence to x >= 8, then the asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }

    if x >= 8.0 {
        let x2 = x * x;
        let inv = 1.0 / x;
        let inv2 = 1.0 / x2;
        // 1/x + 1/2x^2 + 1/6x^3 - 1/30x^5 + 1/42x^7 - 1/30x^9
        return inv
            + 0.5 * inv2
            + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)));
    }

    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result += 1.0 / (z * z);
        z += 1.0;
    }
    result + trigamma(z)
}
