//! Design matrix creation for the one-factor group model

use ndarray::Array2;

use crate::data::SampleSheet;
use crate::error::{DeError, Result};

/// Treatment-coded design for a single grouping factor.
///
/// Column 0 is the intercept (reference group); column `k >= 1` is the
/// indicator of `levels[k]`. Levels are the reference first, then the
/// remaining labels in sorted order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDesign {
    levels: Vec<String>,
    /// Index into `levels` for each sample
    sample_groups: Vec<usize>,
    /// Sample indices of each level
    members: Vec<Vec<usize>>,
    matrix: Array2<f64>,
    test_coef: usize,
}

impl GroupDesign {
    /// Build the design from the sample sheet.
    ///
    /// `reference` defaults to the alphabetically first label. `test` is the
    /// group compared against the reference; it may be omitted only when
    /// there are exactly two groups.
    pub fn new(samples: &SampleSheet, reference: Option<&str>, test: Option<&str>) -> Result<Self> {
        let sorted = samples.levels();
        if sorted.len() < 2 {
            return Err(DeError::malformed(format!(
                "at least 2 distinct groups are required, found {}",
                sorted.len()
            )));
        }

        let reference_level = match reference {
            Some(r) if sorted.iter().any(|l| l == r) => r.to_string(),
            Some(r) => {
                return Err(DeError::config(format!(
                    "reference group '{}' not found; groups are {}",
                    r,
                    sorted.join(", ")
                )))
            }
            None => sorted[0].clone(),
        };

        let mut levels = vec![reference_level.clone()];
        levels.extend(sorted.iter().filter(|l| **l != reference_level).cloned());

        let test_coef = match test {
            Some(t) if t == reference_level => {
                return Err(DeError::config(format!(
                    "test group '{}' is the reference group",
                    t
                )))
            }
            Some(t) => levels.iter().position(|l| l == t).ok_or_else(|| {
                DeError::config(format!(
                    "test group '{}' not found; groups are {}",
                    t,
                    sorted.join(", ")
                ))
            })?,
            None if levels.len() == 2 => 1,
            None => {
                return Err(DeError::config(format!(
                    "{} groups present; a test group must be chosen",
                    levels.len()
                )))
            }
        };

        let n_samples = samples.n_samples();
        let n_coefs = levels.len();
        let mut matrix = Array2::zeros((n_samples, n_coefs));
        let mut sample_groups = Vec::with_capacity(n_samples);
        let mut members = vec![Vec::new(); n_coefs];

        for (i, group) in samples.groups().iter().enumerate() {
            // every label is one of `levels` by construction
            let g = levels.iter().position(|l| l == group).unwrap_or(0);
            matrix[[i, 0]] = 1.0;
            if g > 0 {
                matrix[[i, g]] = 1.0;
            }
            sample_groups.push(g);
            members[g].push(i);
        }

        Ok(Self {
            levels,
            sample_groups,
            members,
            matrix,
            test_coef,
        })
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Levels, reference first
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn reference(&self) -> &str {
        &self.levels[0]
    }

    pub fn test_level(&self) -> &str {
        &self.levels[self.test_coef]
    }

    /// Column of the coefficient being tested
    pub fn test_coefficient(&self) -> usize {
        self.test_coef
    }

    pub fn n_groups(&self) -> usize {
        self.levels.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_groups.len()
    }

    /// Group index of each sample
    pub fn sample_groups(&self) -> &[usize] {
        &self.sample_groups
    }

    /// Sample indices per group
    pub fn members(&self) -> &[Vec<usize>] {
        &self.members
    }

    /// Residual degrees of freedom (samples minus coefficients)
    pub fn residual_df(&self) -> usize {
        self.n_samples().saturating_sub(self.n_groups())
    }

    /// Per-group means of one gene's values
    pub fn group_means(&self, values: &[f64]) -> Vec<f64> {
        self.members
            .iter()
            .map(|idx| idx.iter().map(|&j| values[j]).sum::<f64>() / idx.len() as f64)
            .collect()
    }

    /// Name of the tested coefficient, e.g. `treated_vs_control`
    pub fn contrast_name(&self) -> String {
        format!("{}_vs_{}", self.test_level(), self.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(groups: &[&str]) -> SampleSheet {
        SampleSheet::from_pairs(
            groups
                .iter()
                .enumerate()
                .map(|(i, g)| (format!("s{}", i + 1), g.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_design_matrix_creation() {
        let s = sheet(&["treated", "control", "treated", "control"]);
        let design = GroupDesign::new(&s, None, None).unwrap();

        assert_eq!(design.matrix().dim(), (4, 2));
        assert_eq!(design.reference(), "control");
        assert_eq!(design.test_level(), "treated");
        assert_eq!(design.contrast_name(), "treated_vs_control");

        // treated -> [1, 1], control -> [1, 0]
        assert_eq!(design.matrix()[[0, 1]], 1.0);
        assert_eq!(design.matrix()[[1, 1]], 0.0);
        assert!(design.matrix().column(0).iter().all(|&x| x == 1.0));
        assert_eq!(design.members(), &[vec![1, 3], vec![0, 2]]);
        assert_eq!(design.residual_df(), 2);
    }

    #[test]
    fn test_custom_reference() {
        let s = sheet(&["a", "a", "b", "b"]);
        let design = GroupDesign::new(&s, Some("b"), None).unwrap();
        assert_eq!(design.levels(), &["b", "a"]);
        assert_eq!(design.test_level(), "a");
        assert_eq!(design.sample_groups(), &[1, 1, 0, 0]);
    }

    #[test]
    fn test_three_level_design_needs_test_group() {
        let s = sheet(&["high", "high", "low", "low", "medium", "medium"]);
        let err = GroupDesign::new(&s, None, None).unwrap_err();
        assert!(matches!(err, DeError::InvalidConfiguration { .. }));

        let design = GroupDesign::new(&s, None, Some("medium")).unwrap();
        assert_eq!(design.matrix().dim(), (6, 3));
        assert_eq!(design.reference(), "high");
        assert_eq!(design.test_coefficient(), 2);
    }

    #[test]
    fn test_unknown_groups_rejected() {
        let s = sheet(&["a", "b"]);
        assert!(GroupDesign::new(&s, Some("zzz"), None).is_err());
        assert!(GroupDesign::new(&s, None, Some("zzz")).is_err());
        assert!(GroupDesign::new(&s, Some("a"), Some("a")).is_err());
    }

    #[test]
    fn test_group_means() {
        let s = sheet(&["a", "b", "a", "b"]);
        let design = GroupDesign::new(&s, None, None).unwrap();
        assert_eq!(design.group_means(&[1.0, 10.0, 3.0, 20.0]), vec![2.0, 15.0]);
    }
}
