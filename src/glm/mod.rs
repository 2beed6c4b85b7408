//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
mod negative_binomial;

pub use design::GroupDesign;
pub use fitting::{fit_all, fit_gene, FitResult, GlmFitParams};
pub use negative_binomial::{nb_log_likelihood, nb_mean, nb_weight, MAX_BETA, MIN_MU};
