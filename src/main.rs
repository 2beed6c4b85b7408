//! nbde command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use nbde::cli::{Cli, Commands};
use nbde::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "normalize", "help"];
    let has_subcommand = first_positional.is_some_and(|a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("nbde {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            counts,
            metadata,
            design,
            config,
            reference,
            test,
            output,
            min_count,
            min_samples,
            correction,
            alpha,
            lfc_cutoff,
            fit_type,
            outlier_sd,
            outlier_factor,
            default_dispersion,
            maxit,
            beta_tol,
            min_disp,
            disp_tol,
            threads,
        }) => {
            let overrides = Overrides {
                reference,
                test,
                min_count,
                min_samples,
                correction,
                alpha,
                lfc_cutoff,
                fit_type,
                outlier_sd,
                outlier_factor,
                default_dispersion,
                maxit,
                beta_tol,
                min_disp,
                disp_tol,
            };
            run_analysis(
                &counts,
                &metadata,
                design.as_deref(),
                config.as_deref(),
                overrides,
                &output,
                threads,
            )
        }
        Some(Commands::Normalize {
            counts,
            metadata,
            design,
            output,
        }) => run_normalize(&counts, &metadata, design.as_deref(), &output),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error ({}): {}", e.stage(), e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("nbde v{}", VERSION);
    println!("Run `nbde -h` for usage or `nbde --help` for detailed information.");
}

fn print_short_help() {
    println!("nbde v{}", VERSION);
    println!();
    println!("Usage: nbde <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full differential expression analysis");
    println!("  normalize  Normalize count data only");
    println!();
    println!("Run `nbde <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("nbde v{}", VERSION);
    println!("Negative binomial differential expression analysis");
    println!();
    println!("Usage: nbde <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full differential expression analysis");
    println!("               - Median-of-ratios size factors");
    println!("               - Dispersions shrunk toward a mean-dispersion trend");
    println!("               - Per-gene negative binomial GLM and Wald test");
    println!("               - Benjamini-Hochberg or Bonferroni correction");
    println!("  normalize  Normalize count data using median-of-ratios method");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  nbde run -c counts.tsv -m samples.tsv -o results.tsv");
    println!();
    println!("  nbde run -c counts.tsv -m samples.tsv -d condition \\");
    println!("    --reference control --test treated --correction bonferroni");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

/// Command-line values that take precedence over the configuration file
struct Overrides {
    reference: Option<String>,
    test: Option<String>,
    min_count: Option<u64>,
    min_samples: Option<usize>,
    correction: Option<String>,
    alpha: Option<f64>,
    lfc_cutoff: Option<f64>,
    fit_type: Option<String>,
    outlier_sd: Option<f64>,
    outlier_factor: Option<f64>,
    default_dispersion: Option<f64>,
    maxit: Option<usize>,
    beta_tol: Option<f64>,
    min_disp: Option<f64>,
    disp_tol: Option<f64>,
}

impl Overrides {
    fn apply(self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(v) = self.reference {
            config.reference_group = Some(v);
        }
        if let Some(v) = self.test {
            config.test_group = Some(v);
        }
        if let Some(v) = self.min_count {
            config.filter.min_count = v;
        }
        if let Some(v) = self.min_samples {
            config.filter.min_samples = v;
        }
        if let Some(v) = self.correction {
            config.correction = v.parse().map_err(invalid)?;
        }
        if let Some(v) = self.alpha {
            config.padj_cutoff = v;
        }
        if let Some(v) = self.lfc_cutoff {
            config.min_abs_log2_fold_change = v;
        }
        if let Some(v) = self.fit_type {
            config.dispersion.trend_method = v.parse().map_err(invalid)?;
        }
        if let Some(v) = self.outlier_sd {
            config.dispersion.outlier_rule = OutlierRule::SdMultiple(v);
        }
        if let Some(v) = self.outlier_factor {
            config.dispersion.outlier_rule = OutlierRule::Factor(v);
        }
        if let Some(v) = self.default_dispersion {
            config.dispersion.default_dispersion = v;
        }
        if let Some(v) = self.maxit {
            config.dispersion.maxit = v;
            config.glm.maxit = v;
        }
        if let Some(v) = self.beta_tol {
            config.glm.beta_tol = v;
        }
        if let Some(v) = self.min_disp {
            config.dispersion.min_disp = v;
        }
        if let Some(v) = self.disp_tol {
            config.dispersion.disp_tol = v;
        }
        Ok(())
    }
}

fn invalid(reason: String) -> DeError {
    DeError::InvalidConfiguration { reason }
}

fn load_matrix(counts_path: &str, metadata_path: &str, group_column: Option<&str>) -> Result<CountMatrix> {
    info!("Loading sample sheet from: {}", metadata_path);
    let samples = read_sample_sheet(metadata_path, group_column)?;

    info!("Loading count matrix from: {}", counts_path);
    let counts = read_count_matrix(counts_path, &samples)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());
    Ok(counts)
}

fn run_analysis(
    counts_path: &str,
    metadata_path: &str,
    group_column: Option<&str>,
    config_path: Option<&str>,
    overrides: Overrides,
    output_path: &str,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            PipelineConfig::from_json_file(path)?
        }
        None => PipelineConfig::default(),
    };
    overrides.apply(&mut config)?;
    config.validate()?;

    let counts = load_matrix(counts_path, metadata_path, group_column)?;
    let results = run_pipeline(&counts, &config)?;

    info!("Writing results to: {}", output_path);
    write_results(output_path, &results)?;

    println!("\n{}", results.summary());

    Ok(())
}

fn run_normalize(
    counts_path: &str,
    metadata_path: &str,
    group_column: Option<&str>,
    output_path: &str,
) -> Result<()> {
    let counts = load_matrix(counts_path, metadata_path, group_column)?;

    info!("Estimating size factors...");
    let size_factors = estimate_size_factors(&counts)?;
    for (id, sf) in size_factors.sample_ids().iter().zip(size_factors.values()) {
        info!("  {}: {:.4}", id, sf);
    }

    info!("Writing normalized counts to: {}", output_path);
    let normalized = normalized_counts(&counts, &size_factors);
    write_normalized_counts(output_path, counts.gene_ids(), counts.sample_order(), &normalized)?;

    info!("Done!");
    Ok(())
}
