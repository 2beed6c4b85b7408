//! Command-line interface for nbde

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nbde")]
#[command(version)]
#[command(about = "Negative binomial differential expression analysis")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full differential expression analysis
    #[command(
        about = "Run the full differential expression analysis",
        long_about = "Run the full differential expression analysis\n\n\
            Estimates size factors, shrunk negative binomial dispersions, fits a\n\
            per-gene GLM, and reports Wald test p-values adjusted for multiple\n\
            testing. Options given on the command line override the --config file.",
        after_long_help = "\
Examples:
  # Two groups, reference chosen alphabetically
  nbde run -c counts.tsv -m samples.tsv -o results.tsv

  # Explicit contrast and a low-expression filter
  nbde run -c counts.tsv -m samples.tsv -d condition \\
    --reference control --test treated --min-count 10 --min-samples 3

  # Settings from a JSON file, Bonferroni correction
  nbde run -c counts.tsv -m samples.tsv --config run.json --correction bonferroni"
    )]
    Run {
        /// Path to count matrix TSV/CSV file
        #[arg(short, long,
            long_help = "Path to count matrix file.\n\
                Format: first column = gene IDs, remaining columns = raw counts per sample.\n\
                Supports both CSV (comma) and TSV (tab) delimiters (auto-detected).")]
        counts: String,

        /// Path to sample sheet TSV/CSV file
        #[arg(short, long,
            long_help = "Path to sample sheet file.\n\
                Format: first column = sample IDs (matching count matrix columns),\n\
                a group column (the second column unless --design is given).")]
        metadata: String,

        /// Group column of the sample sheet [default: second column]
        #[arg(short, long)]
        design: Option<String>,

        /// JSON configuration file
        #[arg(long,
            long_help = "JSON configuration file. Any field may be omitted and takes its default.\n\
                Command-line options override values from this file.")]
        config: Option<String>,

        /// Reference (baseline) group
        #[arg(long,
            long_help = "Reference group of the comparison.\n\
                Without this, the alphabetically first group is used.")]
        reference: Option<String>,

        /// Test group compared against the reference
        #[arg(long,
            long_help = "Group compared against the reference.\n\
                Required when the sample sheet has more than two groups.")]
        test: Option<String>,

        /// Output file path [default: nbde_results.tsv]
        #[arg(short, long, default_value = "nbde_results.tsv")]
        output: String,

        /// Minimum count for the expression filter
        #[arg(long)]
        min_count: Option<u64>,

        /// Minimum number of samples reaching --min-count
        #[arg(long)]
        min_samples: Option<usize>,

        /// Multiple testing correction [default: bh]
        #[arg(long,
            long_help = "Multiple testing correction.\n\
                bh:         Benjamini-Hochberg false discovery rate (default)\n\
                bonferroni: Bonferroni family-wise error rate")]
        correction: Option<String>,

        /// Adjusted p-value cutoff [default: 0.05]
        #[arg(short, long)]
        alpha: Option<f64>,

        /// Absolute log2 fold change cutoff [default: 2.0]
        #[arg(long)]
        lfc_cutoff: Option<f64>,

        /// Dispersion trend fit method [default: parametric]
        #[arg(long,
            long_help = "Dispersion-mean trend fitting method.\n\
                parametric: Gamma GLM with identity link, a + b / mean (default)\n\
                mean:       Trimmed mean of gene-wise dispersions")]
        fit_type: Option<String>,

        /// Outlier threshold in SDs of the log residuals [default: 2.0]
        #[arg(long, conflicts_with = "outlier_factor")]
        outlier_sd: Option<f64>,

        /// Outlier threshold as a fixed multiple of the trend
        #[arg(long)]
        outlier_factor: Option<f64>,

        /// Dispersion used when there are no replicates [default: 0.1]
        #[arg(long)]
        default_dispersion: Option<f64>,

        /// Maximum iterations for GLM fitting and dispersion estimation [default: 100]
        #[arg(long)]
        maxit: Option<usize>,

        /// Beta convergence tolerance for GLM fitting [default: 1e-8]
        #[arg(long)]
        beta_tol: Option<f64>,

        /// Minimum dispersion value [default: 1e-8]
        #[arg(long)]
        min_disp: Option<f64>,

        /// Dispersion convergence tolerance [default: 1e-6]
        #[arg(long)]
        disp_tol: Option<f64>,

        /// Number of threads (0 = auto) [default: 0]
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,
    },

    /// Normalize count data only
    #[command(
        long_about = "Normalize count data using the median-of-ratios method.\n\n\
            Outputs a matrix of normalized counts (raw counts / size factors).",
        after_long_help = "\
Examples:
  nbde normalize -c counts.tsv -m samples.tsv -o normalized.tsv"
    )]
    Normalize {
        /// Path to count matrix TSV/CSV file
        #[arg(short, long)]
        counts: String,

        /// Path to sample sheet TSV/CSV file
        #[arg(short, long)]
        metadata: String,

        /// Group column of the sample sheet [default: second column]
        #[arg(short, long)]
        design: Option<String>,

        /// Output file path
        #[arg(short, long)]
        output: String,
    },
}
