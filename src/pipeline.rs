//! End-to-end differential expression run

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::data::CountMatrix;
use crate::dispersion::estimate_dispersions;
use crate::error::Result;
use crate::glm::{fit_all, GroupDesign};
use crate::io::{sort_results, DeResult, DeResults, FailureSummary, GeneStatus};
use crate::normalization::{base_means, estimate_size_factors, normalized_counts};
use crate::testing::{wald_test, WaldStatistic};

/// Run the complete pipeline on a count matrix.
///
/// Steps: validate the configuration, resolve the compared groups, filter,
/// size factors, dispersions, GLM fits, Wald tests, correction, and sorting.
/// Genes that fail along the way stay in the output with their status and
/// are listed in the failure summary.
pub fn run_pipeline(matrix: &CountMatrix, config: &PipelineConfig) -> Result<DeResults> {
    config.validate()?;

    let design = GroupDesign::new(
        matrix.samples(),
        config.reference_group.as_deref(),
        config.test_group.as_deref(),
    )?;
    log::info!(
        "Testing {} ({} samples, {} groups)",
        design.contrast_name(),
        design.n_samples(),
        design.n_groups()
    );

    // Step 1: optional low-expression filter
    let filtered;
    let n_input = matrix.n_genes();
    let matrix = if config.filter.is_enabled() {
        filtered = matrix.filter_by_expression(config.filter.min_count, config.filter.min_samples)?;
        log::info!(
            "Expression filter kept {} of {} genes",
            filtered.n_genes(),
            n_input
        );
        &filtered
    } else {
        matrix
    };
    let n_filtered = n_input - matrix.n_genes();

    // Step 2: size factors and normalized means
    let size_factors = estimate_size_factors(matrix)?;
    log::info!(
        "Size factors: {}",
        size_factors
            .values()
            .iter()
            .map(|s| format!("{:.3}", s))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let normalized = normalized_counts(matrix, &size_factors);
    let means = base_means(&normalized);

    // Step 3: dispersions
    let dispersions = estimate_dispersions(matrix, &size_factors, &means, &design, &config.dispersion);

    // Step 4: GLM fits
    let fits = fit_all(matrix, &size_factors, &design, &dispersions.estimates, &config.glm);

    // Step 5: Wald tests and correction across all genes
    let coef = design.test_coefficient();
    let tests: Vec<WaldStatistic> = fits.par_iter().map(|fit| wald_test(fit, coef)).collect();
    let pvalues: Vec<Option<f64>> = tests.iter().map(|t| t.pvalue).collect();
    let padj = config.correction.adjust(&pvalues);

    let gene_ids = matrix.gene_ids();
    let mut rows: Vec<DeResult> = (0..matrix.n_genes())
        .map(|i| {
            let test = &tests[i];
            let significant = padj[i] < config.padj_cutoff
                && test
                    .log2_fold_change
                    .is_some_and(|lfc| lfc.abs() > config.min_abs_log2_fold_change);
            DeResult {
                gene_id: gene_ids[i].clone(),
                base_mean: means[i],
                log2_fold_change: test.log2_fold_change,
                lfc_se: test.lfc_se,
                stat: test.stat,
                pvalue: test.pvalue,
                padj: padj[i],
                dispersion: dispersions.estimates[i].value(),
                significant,
                status: GeneStatus::from_estimates(&dispersions.estimates[i], &fits[i]),
            }
        })
        .collect();

    // Step 6: deterministic order
    sort_results(&mut rows);

    let failures = FailureSummary {
        dispersion: dispersions.failures().cloned().collect(),
        fit: fits.iter().filter_map(|f| f.failure().cloned()).collect(),
    };
    if !failures.is_empty() {
        log::warn!(
            "{} genes failed dispersion estimation, {} genes failed the GLM fit",
            failures.dispersion.len(),
            failures.fit.len()
        );
        for failure in &failures.dispersion {
            log::debug!("{}", failure);
        }
        for failure in &failures.fit {
            log::debug!("{}", failure);
        }
    }

    let results = DeResults {
        rows,
        failures,
        size_factors,
        trend: dispersions.trend,
        prior: dispersions.prior,
        reference_group: design.reference().to_string(),
        test_group: design.test_level().to_string(),
        correction: config.correction,
        padj_cutoff: config.padj_cutoff,
        n_filtered,
    };
    log::info!(
        "{} of {} genes significant ({} correction)",
        results.significant().count(),
        results.n_genes(),
        results.correction
    );

    Ok(results)
}
