//! Wald test for differential expression

use std::f64::consts::LN_2;

use super::pvalue::calculate_pvalue;
use crate::glm::FitResult;

/// Per-gene Wald test output; everything is on the log2 scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaldStatistic {
    pub log2_fold_change: Option<f64>,
    pub lfc_se: Option<f64>,
    pub stat: Option<f64>,
    pub pvalue: Option<f64>,
}

/// Test coefficient `coef` of a fit: z = beta / SE, p = 2 * Phi(-|z|).
///
/// Indeterminate fits keep their approximate fold change and have no
/// statistic or p-value.
pub fn wald_test(fit: &FitResult, coef: usize) -> WaldStatistic {
    match fit {
        FitResult::Converged {
            coefficients,
            standard_error,
            ..
        } => {
            let beta = coefficients[coef];
            let se = standard_error[coef];
            let z = beta / se;
            let (stat, pvalue) = if z.is_finite() {
                (Some(z), Some(calculate_pvalue(z)))
            } else {
                (None, None)
            };
            WaldStatistic {
                log2_fold_change: Some(beta / LN_2),
                lfc_se: Some(se / LN_2),
                stat,
                pvalue,
            }
        }
        FitResult::Indeterminate {
            approximate_log2_fold_change,
            ..
        } => WaldStatistic {
            log2_fold_change: *approximate_log2_fold_change,
            lfc_se: None,
            stat: None,
            pvalue: None,
        },
    }
}
