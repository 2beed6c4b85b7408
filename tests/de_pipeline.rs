//! Integration tests for the differential expression pipeline.

use nbde::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use statrs::distribution::{ContinuousCDF, Gamma};
use std::io::Write;
use tempfile::NamedTempFile;

/// Per-sample noise; gene g in sample j gets `NOISE[(g + j) % 6]`, so every
/// sample sees each factor equally often.
const NOISE: [f64; 6] = [0.88, 0.94, 0.98, 1.02, 1.06, 1.13];

fn two_group_sheet() -> SampleSheet {
    SampleSheet::from_pairs(vec![
        ("a1", "A"),
        ("a2", "A"),
        ("a3", "A"),
        ("b1", "B"),
        ("b2", "B"),
        ("b3", "B"),
    ])
    .unwrap()
}

/// 100 genes x 6 samples (A: samples 0-2, B: samples 3-5) drawn from a
/// seeded gamma-Poisson model
/// - genes 0-4: 4x higher in B
/// - genes 5-9: 4x higher in A
/// - genes 10-99: no effect
///
/// Gene g has mean `200 + 30g` and dispersion `0.05 + 1/mean`. Gamma
/// multipliers come from a randomized Latin square over six quantile strata,
/// so each sample sees every stratum about equally often and the library
/// sizes stay balanced.
fn synthetic_counts() -> CountMatrix {
    let mut rng = StdRng::seed_from_u64(42);
    let mut offsets: Vec<usize> = (0..100).map(|g| g % 6).collect();
    offsets.shuffle(&mut rng);

    let rows: Vec<(String, Vec<f64>)> = (0..100)
        .map(|g| {
            let mean = 200.0 + 30.0 * g as f64;
            let shape = 1.0 / (0.05 + 1.0 / mean);
            let gamma = Gamma::new(shape, shape).unwrap();
            let counts = (0..6)
                .map(|j| {
                    let in_b = j >= 3;
                    let effect = match g {
                        0..=4 if in_b => 4.0,
                        5..=9 if !in_b => 4.0,
                        _ => 1.0,
                    };
                    let stratum = ((offsets[g] + j) % 6) as f64;
                    let u = (stratum + rng.gen::<f64>()) / 6.0;
                    let multiplier = gamma.inverse_cdf(u.clamp(1e-4, 1.0 - 1e-4));
                    Poisson::new(mean * effect * multiplier)
                        .unwrap()
                        .sample(&mut rng)
                })
                .collect::<Vec<f64>>();
            (format!("gene_{:03}", g), counts)
        })
        .collect();
    CountMatrix::from_rows(rows, two_group_sheet()).unwrap()
}

fn is_planted(gene_id: &str) -> bool {
    let idx: usize = gene_id.trim_start_matches("gene_").parse().unwrap();
    idx < 10
}

#[test]
fn test_planted_genes_rank_at_top() {
    let counts = synthetic_counts();
    let mut config = PipelineConfig::default();
    config.min_abs_log2_fold_change = 1.0;
    let results = run_pipeline(&counts, &config).unwrap();

    assert_eq!(results.n_genes(), 100);
    assert_eq!(results.contrast(), "B_vs_A");

    let found = results.rows[..15]
        .iter()
        .filter(|r| is_planted(&r.gene_id))
        .count();
    assert!(found >= 8, "only {} planted genes in the top 15", found);

    for sf in results.size_factors.values() {
        assert!((sf - 1.0).abs() < 0.05, "size factor {} not within 5% of 1", sf);
    }

    for g in 0..5 {
        let row = results.get(&format!("gene_{:03}", g)).unwrap();
        let lfc = row.log2_fold_change.unwrap();
        assert!(lfc > 1.0, "gene_{:03} log2FC {}", g, lfc);
    }
    for g in 5..10 {
        let row = results.get(&format!("gene_{:03}", g)).unwrap();
        let lfc = row.log2_fold_change.unwrap();
        assert!(lfc < -1.0, "gene_{:03} log2FC {}", g, lfc);
    }

    // overdispersed counts still yield a positive trend
    assert!(results.trend.asymptotic > 0.0);
}

#[test]
fn test_default_fold_change_cutoff() {
    let counts = synthetic_counts();
    let config = PipelineConfig::default();
    assert_eq!(config.min_abs_log2_fold_change, 2.0);

    let results = run_pipeline(&counts, &config).unwrap();
    for row in results.significant() {
        assert!(row.padj < 0.05);
        assert!(
            row.log2_fold_change.unwrap().abs() > 2.0,
            "{} significant with log2FC {:?}",
            row.gene_id,
            row.log2_fold_change
        );
    }
    for row in results.rows.iter().filter(|r| !is_planted(&r.gene_id)) {
        assert!(!row.significant, "{} called significant", row.gene_id);
    }

    // a lower cutoff can only add genes
    let mut relaxed = config.clone();
    relaxed.min_abs_log2_fold_change = 1.0;
    let relaxed = run_pipeline(&counts, &relaxed).unwrap();
    assert!(relaxed.significant().count() >= results.significant().count());
}

#[test]
fn test_all_zero_gene_is_flagged() {
    let rows = (0..30).map(|g| {
        let counts = if g == 7 {
            vec![0.0; 6]
        } else {
            (0..6)
                .map(|j| ((100.0 + 10.0 * g as f64) * NOISE[(g + j) % 6]).round())
                .collect()
        };
        (format!("gene_{:03}", g), counts)
    });
    let counts = CountMatrix::from_rows(rows, two_group_sheet()).unwrap();

    let results = run_pipeline(&counts, &PipelineConfig::default()).unwrap();
    assert_eq!(results.n_genes(), 30);

    let zero = results.get("gene_007").unwrap();
    assert_eq!(zero.status, GeneStatus::AllZero);
    assert_eq!(zero.pvalue, None);
    assert_eq!(zero.log2_fold_change, None);
    assert_eq!(zero.dispersion, None);
    assert_eq!(zero.padj, 1.0);
    assert!(!zero.significant);

    assert_eq!(results.failures.dispersion_gene_ids(), vec!["gene_007"]);
    assert_eq!(results.failures.fit_gene_ids(), vec!["gene_007"]);

    // missing p-values sort last
    assert_eq!(results.rows.last().unwrap().gene_id, "gene_007");
}

#[test]
fn test_one_sample_per_group() {
    let samples = SampleSheet::from_pairs(vec![("ctrl", "control"), ("trt", "treated")]).unwrap();
    let rows = vec![
        ("g1".to_string(), vec![100.0, 400.0]),
        ("g2".to_string(), vec![250.0, 240.0]),
        ("g3".to_string(), vec![80.0, 85.0]),
        ("g4".to_string(), vec![600.0, 150.0]),
    ];
    let counts = CountMatrix::from_rows(rows, samples).unwrap();

    let results = run_pipeline(&counts, &PipelineConfig::default()).unwrap();

    assert_eq!(results.size_factors.len(), 2);
    let product: f64 = results.size_factors.values().iter().product();
    assert!((product - 1.0).abs() < 1e-9);
    assert!(results.prior.is_none());

    for row in &results.rows {
        assert_eq!(row.status, GeneStatus::DefaultDispersion);
        assert_eq!(row.dispersion, Some(0.1));
        assert!(row.log2_fold_change.unwrap().is_finite());
    }

    let up = results.get("g1").unwrap().log2_fold_change.unwrap();
    let down = results.get("g4").unwrap().log2_fold_change.unwrap();
    assert!(up > 1.0);
    assert!(down < -1.0);
}

#[test]
fn test_expression_filter_and_files() {
    let mut sheet_file = NamedTempFile::new().unwrap();
    writeln!(sheet_file, "sample\tcondition").unwrap();
    for (s, g) in [("a1", "A"), ("a2", "A"), ("a3", "A"), ("b1", "B"), ("b2", "B"), ("b3", "B")] {
        writeln!(sheet_file, "{}\t{}", s, g).unwrap();
    }
    sheet_file.flush().unwrap();

    let matrix = synthetic_counts();
    let mut count_file = NamedTempFile::new().unwrap();
    writeln!(count_file, "gene_id\t{}", matrix.sample_order().join("\t")).unwrap();
    for (i, gene_id) in matrix.gene_ids().iter().enumerate() {
        let values: Vec<String> = matrix
            .gene_counts(i)
            .iter()
            .map(|c| format!("{}", *c as u64))
            .collect();
        writeln!(count_file, "{}\t{}", gene_id, values.join("\t")).unwrap();
    }
    writeln!(count_file, "gene_low\t1\t0\t2\t0\t1\t0").unwrap();
    count_file.flush().unwrap();

    let samples = read_sample_sheet(sheet_file.path(), Some("condition")).unwrap();
    let counts = read_count_matrix(count_file.path(), &samples).unwrap();
    assert_eq!(counts.n_genes(), 101);

    let mut config = PipelineConfig::default();
    config.filter.min_count = 10;
    config.filter.min_samples = 3;
    let results = run_pipeline(&counts, &config).unwrap();
    assert_eq!(results.n_genes(), 100);
    assert_eq!(results.n_filtered, 1);
    assert!(results.get("gene_low").is_none());

    let out = NamedTempFile::new().unwrap();
    write_results(out.path(), &results).unwrap();
    let text = std::fs::read_to_string(out.path()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "gene_id\tbaseMean\tlog2FoldChange\tlfcSE\tstat\tpvalue\tpadj\tdispersion\tsignificant\tstatus"
    );
    assert_eq!(lines.len(), 101);
    assert!(lines[1].starts_with("gene_00"));
}

/// 12 genes x 4 samples; the second sample of each group is sequenced about
/// twice as deep, so group means of normalized counts are not the fitted
/// group levels and the first IRLS step moves the coefficients.
fn uneven_depth_counts() -> CountMatrix {
    let samples =
        SampleSheet::from_pairs(vec![("a1", "A"), ("a2", "A"), ("b1", "B"), ("b2", "B")]).unwrap();
    let rows = (0..12).map(|g| {
        let base = 100.0 + 25.0 * g as f64;
        let effect = if g < 3 { 3.0 } else { 1.0 };
        let counts = vec![
            (base * NOISE[g % 6]).round(),
            (2.0 * base * NOISE[(g + 3) % 6]).round(),
            (base * effect * NOISE[(g + 1) % 6]).round(),
            (2.0 * base * effect * NOISE[(g + 4) % 6]).round(),
        ];
        (format!("gene_{:03}", g), counts)
    });
    CountMatrix::from_rows(rows, samples).unwrap()
}

#[test]
fn test_glm_iteration_limit_flags_genes() {
    let counts = uneven_depth_counts();
    let mut config = PipelineConfig::default();
    config.glm.maxit = 1;
    let results = run_pipeline(&counts, &config).unwrap();

    assert_eq!(results.n_genes(), 12);
    let sf = results.size_factors.values();
    for row in &results.rows {
        assert_eq!(row.status, GeneStatus::FitFailed, "{}", row.gene_id);
        assert_eq!(row.pvalue, None);
        assert_eq!(row.stat, None);
        assert_eq!(row.lfc_se, None);
        assert_eq!(row.padj, 1.0);
        assert!(!row.significant);
        assert!(row.dispersion.is_some());

        // fold change falls back to the ratio of normalized group means
        let i = counts.gene_ids().iter().position(|id| *id == row.gene_id).unwrap();
        let c = counts.gene_counts(i);
        let mean_a = (c[0] / sf[0] + c[1] / sf[1]) / 2.0;
        let mean_b = (c[2] / sf[2] + c[3] / sf[3]) / 2.0;
        let lfc = row.log2_fold_change.unwrap();
        assert!((lfc - (mean_b / mean_a).log2()).abs() < 1e-9, "{} log2FC {}", row.gene_id, lfc);
    }

    let mut failed = results.failures.fit_gene_ids();
    failed.sort();
    let mut expected: Vec<&str> = counts.gene_ids().iter().map(|s| s.as_str()).collect();
    expected.sort();
    assert_eq!(failed, expected);

    // every padj ties at 1.0 with no p-value, so gene ids decide the order
    let order: Vec<&str> = results.rows.iter().map(|r| r.gene_id.as_str()).collect();
    assert_eq!(order, expected);
}

#[test]
fn test_dispersion_iteration_limit_uses_trend() {
    let counts = synthetic_counts();
    let mut config = PipelineConfig::default();
    config.dispersion.maxit = 1;
    let results = run_pipeline(&counts, &config).unwrap();
    assert_eq!(results.n_genes(), 100);

    let fallback: Vec<&DeResult> = results
        .rows
        .iter()
        .filter(|r| r.status == GeneStatus::DispersionFallback)
        .collect();
    assert!(!fallback.is_empty());
    assert_eq!(fallback.len(), results.failures.dispersion.len());

    let failed = results.failures.dispersion_gene_ids();
    for row in &fallback {
        assert!(failed.contains(&row.gene_id.as_str()));
        let expected = results.trend.at(row.base_mean);
        let dispersion = row.dispersion.unwrap();
        assert!((dispersion - expected).abs() < 1e-12, "{} dispersion {}", row.gene_id, dispersion);
        // the GLM still runs with the trend value
        assert!(row.pvalue.is_some());
        assert!(row.log2_fold_change.unwrap().is_finite());
    }
}

#[test]
fn test_three_groups_need_a_test_group() {
    let samples = SampleSheet::from_pairs(vec![
        ("s1", "A"),
        ("s2", "A"),
        ("s3", "B"),
        ("s4", "B"),
        ("s5", "C"),
        ("s6", "C"),
    ])
    .unwrap();
    let rows = (0..20).map(|g| {
        let counts = (0..6)
            .map(|j| {
                let effect = if g < 3 && j >= 4 { 5.0 } else { 1.0 };
                ((150.0 + 20.0 * g as f64) * effect * NOISE[(g + j) % 6]).round()
            })
            .collect::<Vec<f64>>();
        (format!("gene_{:03}", g), counts)
    });
    let counts = CountMatrix::from_rows(rows, samples).unwrap();

    let err = run_pipeline(&counts, &PipelineConfig::default()).unwrap_err();
    assert_eq!(err.stage(), Stage::Configuration);

    let mut config = PipelineConfig::default();
    config.test_group = Some("C".to_string());
    let results = run_pipeline(&counts, &config).unwrap();
    assert_eq!(results.contrast(), "C_vs_A");
    for g in 0..3 {
        let lfc = results
            .get(&format!("gene_{:03}", g))
            .unwrap()
            .log2_fold_change
            .unwrap();
        assert!(lfc > 1.5, "gene_{:03} log2FC {}", g, lfc);
    }
}
