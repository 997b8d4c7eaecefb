//! Bagged regression forest
//!
//! Prediction is the unweighted mean of the member trees. The forest also
//! carries the impurity-based feature importances computed when it was
//! fitted, since they cannot be recovered from the tree structure alone.

use super::tree::Tree;
use crate::errors::{ModelError, Result};
use crate::serde_canon::{hash_canonical_hex, to_canonical_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current forest serialization format
pub const FOREST_FORMAT_VERSION: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forest {
    pub version: i32,
    /// Column names in the order the trees index them
    pub feature_names: Vec<String>,
    pub trees: Vec<Tree>,
    /// One non-negative weight per feature, summing to 1 (or all zero)
    pub feature_importances: Vec<f64>,
}

impl Forest {
    pub fn new(feature_names: Vec<String>, trees: Vec<Tree>, feature_importances: Vec<f64>) -> Self {
        Self {
            version: FOREST_FORMAT_VERSION,
            feature_names,
            trees,
            feature_importances,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != FOREST_FORMAT_VERSION {
            return Err(ModelError::ValidationFailed(format!(
                "unsupported forest version: {}",
                self.version
            )));
        }
        if self.trees.is_empty() {
            return Err(ModelError::ValidationFailed(
                "forest has no trees".to_string(),
            ));
        }
        if self.feature_importances.len() != self.feature_count() {
            return Err(ModelError::ValidationFailed(format!(
                "expected {} feature importances, found {}",
                self.feature_count(),
                self.feature_importances.len()
            )));
        }
        if self
            .feature_importances
            .iter()
            .any(|weight| !weight.is_finite() || *weight < 0.0)
        {
            return Err(ModelError::ValidationFailed(
                "feature importances must be finite and non-negative".to_string(),
            ));
        }

        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_count()).map_err(|e| {
                ModelError::ValidationFailed(format!("tree {i} validation failed: {e}"))
            })?;
        }

        Ok(())
    }

    /// Mean prediction of all trees for one feature vector
    pub fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.feature_count() {
            return Err(ModelError::FeatureCountMismatch {
                expected: self.feature_count(),
                actual: features.len(),
            });
        }
        if self.trees.is_empty() {
            return Err(ModelError::ValidationFailed(
                "forest has no trees".to_string(),
            ));
        }

        let sum: f64 = self.trees.iter().map(|tree| tree.evaluate(features)).sum();
        Ok(sum / self.trees.len() as f64)
    }

    pub fn predict_batch<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<f64>> {
        rows.iter().map(|row| self.predict(row.as_ref())).collect()
    }

    /// Importances keyed by feature name
    pub fn importance_map(&self) -> BTreeMap<String, f64> {
        self.feature_names
            .iter()
            .cloned()
            .zip(self.feature_importances.iter().copied())
            .collect()
    }

    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(to_canonical_json(self)?)
    }

    pub fn hash_hex(&self) -> Result<String> {
        Ok(hash_canonical_hex(self)?)
    }
}
