//! Sample sheet: sample identifiers and their group labels

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{DeError, Result};

/// Sample identifiers with one group label each, in column order.
///
/// The position of a sample in this sheet is its index into every per-gene
/// vector downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSheet {
    sample_ids: Vec<String>,
    groups: Vec<String>,
}

impl SampleSheet {
    /// Create a sample sheet; sample ids must be unique and every sample needs a label
    pub fn new(sample_ids: Vec<String>, groups: Vec<String>) -> Result<Self> {
        if sample_ids.len() != groups.len() {
            return Err(DeError::malformed(format!(
                "{} sample ids but {} group labels",
                sample_ids.len(),
                groups.len()
            )));
        }

        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(DeError::malformed(format!("duplicate sample id '{}'", id)));
            }
        }

        if let Some(pos) = groups.iter().position(|g| g.trim().is_empty()) {
            return Err(DeError::malformed(format!(
                "sample '{}' has an empty group label",
                sample_ids[pos]
            )));
        }

        Ok(Self { sample_ids, groups })
    }

    /// Build from (sample, group) pairs
    pub fn from_pairs<I, S, G>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, G)>,
        S: Into<String>,
        G: Into<String>,
    {
        let (sample_ids, groups) = pairs
            .into_iter()
            .map(|(s, g)| (s.into(), g.into()))
            .unzip();
        Self::new(sample_ids, groups)
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Group label per sample, in sample order
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Group label of a sample
    pub fn group_of(&self, sample_id: &str) -> Option<&str> {
        self.sample_index(sample_id).map(|i| self.groups[i].as_str())
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Distinct group labels, sorted
    pub fn levels(&self) -> Vec<String> {
        let mut unique: Vec<String> = self.groups.clone();
        unique.sort();
        unique.dedup();
        unique
    }

    /// Indices of the samples belonging to `level`
    pub fn group_indices(&self, level: &str) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.as_str() == level)
            .map(|(i, _)| i)
            .collect()
    }

    /// Reorder the sheet to follow `order` (a permutation of its sample ids)
    pub fn reordered(&self, order: &[String]) -> Result<Self> {
        if order.len() != self.n_samples() {
            return Err(DeError::malformed(format!(
                "count matrix has {} samples, sample sheet has {}",
                order.len(),
                self.n_samples()
            )));
        }
        let mut groups = Vec::with_capacity(order.len());
        for id in order {
            let idx = self.sample_index(id).ok_or_else(|| {
                DeError::malformed(format!("sample '{}' is missing from the sample sheet", id))
            })?;
            groups.push(self.groups[idx].clone());
        }
        Self::new(order.to_vec(), groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> SampleSheet {
        SampleSheet::from_pairs(vec![
            ("s1", "treated"),
            ("s2", "control"),
            ("s3", "treated"),
            ("s4", "control"),
        ])
        .unwrap()
    }

    #[test]
    fn test_levels_sorted() {
        assert_eq!(sheet().levels(), vec!["control".to_string(), "treated".to_string()]);
    }

    #[test]
    fn test_group_lookup() {
        let s = sheet();
        assert_eq!(s.group_of("s3"), Some("treated"));
        assert_eq!(s.group_of("nope"), None);
        assert_eq!(s.group_indices("control"), vec![1, 3]);
    }

    #[test]
    fn test_duplicate_sample_rejected() {
        let result = SampleSheet::from_pairs(vec![("s1", "a"), ("s1", "b")]);
        assert!(matches!(result, Err(DeError::MalformedInput { .. })));
    }

    #[test]
    fn test_reordered_follows_matrix_columns() {
        let s = sheet();
        let order: Vec<String> = ["s4", "s3", "s2", "s1"].iter().map(|s| s.to_string()).collect();
        let r = s.reordered(&order).unwrap();
        assert_eq!(r.groups(), &["control", "treated", "control", "treated"]);

        let missing: Vec<String> = ["s4", "s3", "s2", "s9"].iter().map(|s| s.to_string()).collect();
        assert!(s.reordered(&missing).is_err());
    }
}
