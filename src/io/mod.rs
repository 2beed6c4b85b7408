//! Input/Output: delimited files and the results table

mod results;
mod tsv;

pub use results::{sort_results, DeResult, DeResults, FailureSummary, GeneStatus, ResultsSummary};
pub use tsv::{read_count_matrix, read_sample_sheet, write_normalized_counts, write_results};
