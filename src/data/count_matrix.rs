//! Count matrix representation for RNA-seq data

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use super::SampleSheet;
use crate::error::{DeError, Result};

/// Raw read counts, genes x samples, with the sample sheet that labels the columns.
///
/// Counts are stored as `f64` but are validated to be non-negative integers.
/// The matrix is immutable once built; filtering returns a new matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    /// Raw count data (genes x samples)
    counts: Array2<f64>,
    /// Gene identifiers, one per row
    gene_ids: Vec<String>,
    /// Sample identifiers and group labels, one per column
    samples: SampleSheet,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, samples: SampleSheet) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DeError::malformed(format!(
                "{} rows of counts but {} gene ids",
                n_genes,
                gene_ids.len()
            )));
        }

        if samples.n_samples() != n_samples {
            return Err(DeError::malformed(format!(
                "{} columns of counts but {} samples",
                n_samples,
                samples.n_samples()
            )));
        }

        let mut seen = HashSet::with_capacity(n_genes);
        for id in &gene_ids {
            if !seen.insert(id.as_str()) {
                return Err(DeError::malformed(format!("duplicate gene id '{}'", id)));
            }
        }

        for ((i, j), &x) in counts.indexed_iter() {
            if !x.is_finite() || x < 0.0 || x.fract() != 0.0 {
                return Err(DeError::malformed(format!(
                    "count for gene '{}' in sample '{}' is not a non-negative integer: {}",
                    gene_ids[i],
                    samples.sample_ids()[j],
                    x
                )));
            }
        }

        let n_groups = samples.levels().len();
        if n_groups < 2 {
            return Err(DeError::malformed(format!(
                "at least 2 distinct groups are required, found {}",
                n_groups
            )));
        }

        Ok(Self {
            counts,
            gene_ids,
            samples,
        })
    }

    /// Create from a gene -> per-sample counts mapping, in iteration order
    pub fn from_rows<I>(rows: I, samples: SampleSheet) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        let n_samples = samples.n_samples();
        let mut gene_ids = Vec::new();
        let mut flat = Vec::new();

        for (gene_id, row) in rows {
            if row.len() != n_samples {
                return Err(DeError::malformed(format!(
                    "gene '{}' has {} counts, expected {}",
                    gene_id,
                    row.len(),
                    n_samples
                )));
            }
            flat.extend(row);
            gene_ids.push(gene_id);
        }

        let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), flat)
            .map_err(|e| DeError::malformed(e.to_string()))?;
        Self::new(counts, gene_ids, samples)
    }

    /// Get the number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Get the number of samples
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn samples(&self) -> &SampleSheet {
        &self.samples
    }

    /// Sample ids in the fixed column order used by every downstream vector
    pub fn sample_order(&self) -> &[String] {
        self.samples.sample_ids()
    }

    /// Group label of a sample
    pub fn group_of(&self, sample_id: &str) -> Option<&str> {
        self.samples.group_of(sample_id)
    }

    /// Get counts for a specific gene
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Calculate sum of counts per sample (library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(1))
            .map(|col| col.sum())
            .collect()
    }

    /// Keep genes where at least `min_samples` samples have a count >= `min_count`
    pub fn filter_by_expression(&self, min_count: u64, min_samples: usize) -> Result<Self> {
        let threshold = min_count as f64;
        let keep_genes: Vec<usize> = (0..self.n_genes())
            .filter(|&i| {
                let above_threshold = self
                    .counts
                    .row(i)
                    .iter()
                    .filter(|&&x| x >= threshold)
                    .count();
                above_threshold >= min_samples
            })
            .collect();

        if keep_genes.is_empty() {
            return Err(DeError::malformed(format!(
                "no genes have a count >= {} in at least {} samples",
                min_count, min_samples
            )));
        }

        log::debug!(
            "Expression filter kept {} of {} genes",
            keep_genes.len(),
            self.n_genes()
        );

        let new_counts = self.counts.select(Axis(0), &keep_genes);
        let new_gene_ids: Vec<String> = keep_genes.iter().map(|&i| self.gene_ids[i].clone()).collect();

        Self::new(new_counts, new_gene_ids, self.samples.clone())
    }
}
