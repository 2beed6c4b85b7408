//! nbde: negative binomial differential expression analysis
//!
//! Raw per-sample counts go in, a ranked per-gene results table comes out.
//! The pipeline normalizes with median-of-ratios size factors, shrinks
//! gene-wise dispersions toward a mean-dispersion trend, fits a negative
//! binomial GLM per gene, and reports Wald test p-values adjusted for
//! multiple testing.
//!
//! # Example
//!
//! ```ignore
//! use nbde::prelude::*;
//!
//! let samples = read_sample_sheet("samples.tsv", None)?;
//! let counts = read_count_matrix("counts.tsv", &samples)?;
//!
//! let results = run_pipeline(&counts, &PipelineConfig::default())?;
//! write_results("results.tsv", &results)?;
//! println!("{}", results.summary());
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod glm;
pub mod io;
pub mod linalg;
pub mod normalization;
pub mod pipeline;
pub mod stats;
pub mod testing;

pub use pipeline::run_pipeline;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{FilterConfig, PipelineConfig};
    pub use crate::data::{CountMatrix, SampleSheet};
    pub use crate::dispersion::{
        estimate_dispersions, DispersionEstimate, DispersionParams, OutlierRule, TrendFitMethod,
    };
    pub use crate::error::{DeError, Result, Stage};
    pub use crate::glm::{fit_all, FitResult, GlmFitParams, GroupDesign};
    pub use crate::io::{
        read_count_matrix, read_sample_sheet, write_normalized_counts, write_results, DeResult,
        DeResults, GeneStatus, ResultsSummary,
    };
    pub use crate::normalization::{estimate_size_factors, normalized_counts, SizeFactors};
    pub use crate::pipeline::run_pipeline;
    pub use crate::testing::{wald_test, CorrectionMethod};
}
