//! Service configuration

use pricing_trainer::ForestParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::PricingError;

/// What to do when a prediction request names a categorical value the
/// current encoders have never seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnseenCategoryPolicy {
    /// Predict with the fallback code, report the fields and floor confidence
    #[default]
    Flag,
    /// Refuse the prediction
    Reject,
}

impl FromStr for UnseenCategoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flag" => Ok(Self::Flag),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown unseen category policy '{other}' (expected 'flag' or 'reject')"
            )),
        }
    }
}

impl fmt::Display for UnseenCategoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag => f.write_str("flag"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Dataset and model locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// CSV file that training reads and uploads merge into
    pub dataset_path: PathBuf,
    /// Directory holding the model/encoder artifact pair
    pub model_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("dataset.csv"),
            model_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub unseen_category_policy: UnseenCategoryPolicy,
}

/// Everything the pricing service needs to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub data: DataConfig,
    pub forest: ForestParams,
    pub prediction: PredictionConfig,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.data.dataset_path.as_os_str().is_empty() {
            return Err(PricingError::Config(
                "data.dataset_path must not be empty".to_string(),
            ));
        }
        if self.data.model_dir.as_os_str().is_empty() {
            return Err(PricingError::Config(
                "data.model_dir must not be empty".to_string(),
            ));
        }
        self.forest
            .validate()
            .map_err(|err| PricingError::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_training_setup() {
        let config = ServiceConfig::default();
        assert_eq!(config.forest.n_trees, 100);
        assert_eq!(config.forest.max_depth, 10);
        assert_eq!(config.forest.seed, 42);
        assert_eq!(
            config.prediction.unseen_category_policy,
            UnseenCategoryPolicy::Flag
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!(
            "Reject".parse::<UnseenCategoryPolicy>(),
            Ok(UnseenCategoryPolicy::Reject)
        );
        assert!("ignore".parse::<UnseenCategoryPolicy>().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{"forest": {"n_trees": 5}, "prediction": {"unseen_category_policy": "reject"}}"#,
        )
        .unwrap();
        assert_eq!(config.forest.n_trees, 5);
        assert_eq!(config.forest.max_depth, 10);
        assert_eq!(
            config.prediction.unseen_category_policy,
            UnseenCategoryPolicy::Reject
        );
        assert_eq!(config.data, DataConfig::default());
    }

    #[test]
    fn invalid_forest_is_a_config_error() {
        let mut config = ServiceConfig::default();
        config.forest.min_samples_split = 1;
        assert!(matches!(config.validate(), Err(PricingError::Config(_))));
    }
}
