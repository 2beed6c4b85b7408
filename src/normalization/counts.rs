//! Size-factor normalized counts

use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::SizeFactors;
use crate::data::CountMatrix;

/// Divide every count by its sample's size factor
pub fn normalized_counts(matrix: &CountMatrix, size_factors: &SizeFactors) -> Array2<f64> {
    normalize(matrix.counts(), size_factors.values())
}

fn normalize(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Array2<f64> {
    let mut result = counts.to_owned();
    for (mut col, &sf) in result.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        col.mapv_inplace(|x| x / sf);
    }
    result
}

/// Mean of the normalized counts per gene (baseMean)
pub fn base_means(normalized: &Array2<f64>) -> Array1<f64> {
    normalized
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(normalized.nrows()))
}
