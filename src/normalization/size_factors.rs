//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::CountMatrix;
use crate::error::{DeError, Result};
use crate::stats::{geometric_mean, median};

/// Per-sample scaling factors, in the matrix's sample order.
///
/// Always positive; their geometric mean is 1.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeFactors {
    sample_ids: Vec<String>,
    values: Array1<f64>,
}

impl SizeFactors {
    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn get(&self, sample_id: &str) -> Option<f64> {
        self.sample_ids
            .iter()
            .position(|id| id == sample_id)
            .map(|j| self.values[j])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Estimate size factors using the median of ratios method
///
/// Accounts for both sequencing depth and RNA composition. Only genes with a
/// positive count in every sample take part; with none, the run cannot be
/// normalized and `NoEligibleGenes` is returned.
pub fn estimate_size_factors(matrix: &CountMatrix) -> Result<SizeFactors> {
    let raw = median_of_ratios(matrix.counts())?;

    // Re-center so the geometric mean of the factors is 1
    let center = geometric_mean(&raw.to_vec()).ok_or_else(|| DeError::NoEligibleGenes {
        reason: "invalid size factors computed".to_string(),
    })?;
    let values = raw.mapv(|x| x / center);

    log::debug!(
        "Size factors: {}",
        values
            .iter()
            .map(|v| format!("{:.4}", v))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(SizeFactors {
        sample_ids: matrix.sample_order().to_vec(),
        values,
    })
}

/// Standard median of ratios, before re-centering
fn median_of_ratios(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();

    if n_genes == 0 || n_samples == 0 {
        return Err(DeError::NoEligibleGenes {
            reason: "count matrix is empty".to_string(),
        });
    }

    // Step 1: geometric mean of each gene positive in every sample
    let mut geo_means = Vec::with_capacity(n_genes);
    let mut valid_genes = Vec::new();

    for (i, row) in counts.axis_iter(Axis(0)).enumerate() {
        if let Some(geo_mean) = geometric_mean(&row.to_vec()) {
            geo_means.push(geo_mean);
            valid_genes.push(i);
        }
    }

    if valid_genes.is_empty() {
        return Err(DeError::NoEligibleGenes {
            reason: format!(
                "none of the {} genes has a positive count in every sample",
                n_genes
            ),
        });
    }

    log::debug!(
        "{} of {} genes used as size factor reference",
        valid_genes.len(),
        n_genes
    );

    // Step 2: per sample, the median ratio to the reference
    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let ratios: Vec<f64> = valid_genes
            .iter()
            .zip(geo_means.iter())
            .map(|(&i, &geo_mean)| counts[[i, j]] / geo_mean)
            .collect();

        size_factors[j] = median(&ratios).ok_or_else(|| DeError::NoEligibleGenes {
            reason: format!("no valid ratios for sample {}", j),
        })?;
    }

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(DeError::NoEligibleGenes {
            reason: "invalid size factors computed".to_string(),
        });
    }

    Ok(size_factors)
}
