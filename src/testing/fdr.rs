//! P-value adjustment methods for multiple testing correction
//!
//! Missing p-values (genes without a usable fit) still count toward the
//! number of tests and receive an adjusted p-value of 1.

use std::cmp::Ordering;

/// Benjamini-Hochberg step-up adjustment.
///
/// `padj_(i) = min_{k >= i} min(1, p_(k) * m / k)` over the p-values sorted
/// ascending, where `m` is the total number of genes including missing ones.
pub fn benjamini_hochberg(pvalues: &[Option<f64>]) -> Vec<f64> {
    let m = pvalues.len();
    let mut padj = vec![1.0; m];

    let mut present: Vec<(usize, f64)> = pvalues
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.filter(|v| !v.is_nan()).map(|v| (i, v)))
        .collect();
    present.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let mut cummin = 1.0_f64;
    for (rank0, &(i, p)) in present.iter().enumerate().rev() {
        let rank = rank0 + 1;
        let adj = (p * m as f64 / rank as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }

    padj
}

/// Bonferroni correction, min(1, p * m)
pub fn bonferroni(pvalues: &[Option<f64>]) -> Vec<f64> {
    let m = pvalues.len() as f64;
    pvalues
        .iter()
        .map(|p| match p {
            Some(v) if !v.is_nan() => (v * m).min(1.0),
            _ => 1.0,
        })
        .collect()
}
