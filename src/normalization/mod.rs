//! Normalization of RNA-seq count data

mod counts;
mod size_factors;

pub use counts::{base_means, normalized_counts};
pub use size_factors::{estimate_size_factors, SizeFactors};
