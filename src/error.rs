//! Error types for nbde
//!
//! `DeError` covers fatal conditions that abort a run. Per-gene problems are
//! not errors of the run: they are recorded as [`ConvergenceFailure`] /
//! [`FitConvergenceFailure`] values and surfaced in the results.

use std::fmt;

use thiserror::Error;

/// Pipeline stage, used to report where a fatal error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Input,
    SizeFactors,
    Io,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::Input => "input",
            Stage::SizeFactors => "size factors",
            Stage::Io => "io",
        };
        f.write_str(name)
    }
}

/// Main error type for fatal pipeline failures
#[derive(Error, Debug)]
pub enum DeError {
    #[error("Malformed input: {reason}")]
    MalformedInput { reason: String },

    #[error("No eligible genes for size factor estimation: {reason}")]
    NoEligibleGenes { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DeError::MalformedInput { reason: reason.into() }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        DeError::InvalidConfiguration { reason: reason.into() }
    }

    /// The stage that raised this error
    pub fn stage(&self) -> Stage {
        match self {
            DeError::MalformedInput { .. } => Stage::Input,
            DeError::NoEligibleGenes { .. } => Stage::SizeFactors,
            DeError::InvalidConfiguration { .. } => Stage::Configuration,
            DeError::Io(_) | DeError::Csv(_) | DeError::Json(_) => Stage::Io,
        }
    }
}

/// Result type alias for nbde operations
pub type Result<T> = std::result::Result<T, DeError>;

/// Why a gene-wise dispersion estimate could not be produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispersionFailureReason {
    /// Every count is zero; the likelihood carries no information
    AllZero,
    /// Log-likelihood or its derivative became NaN/infinite
    NonFinite,
    /// Iteration cap reached before the log-dispersion change fell below tolerance
    IterationLimit { iterations: usize },
}

impl fmt::Display for DispersionFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispersionFailureReason::AllZero => write!(f, "all counts are zero"),
            DispersionFailureReason::NonFinite => write!(f, "non-finite likelihood"),
            DispersionFailureReason::IterationLimit { iterations } => {
                write!(f, "no convergence after {} iterations", iterations)
            }
        }
    }
}

/// Gene-wise dispersion estimation failed for one gene (non-fatal)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Dispersion estimation failed for gene {gene_id}: {reason}")]
pub struct ConvergenceFailure {
    pub gene_id: String,
    pub reason: DispersionFailureReason,
}

/// Why a GLM fit did not converge
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitFailureReason {
    /// No usable dispersion (all-zero gene); the fit was not attempted
    NoDispersion,
    /// A coefficient exceeded the magnitude cap
    Diverged,
    /// Non-finite coefficients or a singular weighted design
    NonFinite,
    IterationLimit,
}

impl fmt::Display for FitFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitFailureReason::NoDispersion => write!(f, "no usable dispersion"),
            FitFailureReason::Diverged => write!(f, "coefficients diverged"),
            FitFailureReason::NonFinite => write!(f, "non-finite coefficients"),
            FitFailureReason::IterationLimit => write!(f, "iteration limit reached"),
        }
    }
}

/// GLM fit failed for one gene (non-fatal)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("GLM fit did not converge for gene {gene_id} after {iterations} iterations: {reason}")]
pub struct FitConvergenceFailure {
    pub gene_id: String,
    pub iterations: usize,
    pub reason: FitFailureReason,
}
