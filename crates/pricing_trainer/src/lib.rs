//! Pricing model trainer
//!
//! Loads the product dataset, fits label encoders and a bagged random
//! forest with full determinism, and scores the result on a held-out split.

pub mod cart;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod trainer;

use std::path::Path;

pub use dataset::{Dataset, MergeSummary, ProductRecord, TRAINING_COLUMNS, UPLOAD_COLUMNS};
pub use deterministic::LcgRng;
pub use errors::{DataError, TrainerError};
pub use trainer::{
    evaluate_holdout, train_pipeline, train_test_split, ForestParams, ForestTrainer, Split,
    TrainedModel,
};

/// Train a model directly from a CSV file using the provided parameters.
pub fn train_model_from_csv(
    path: &Path,
    params: &ForestParams,
) -> Result<TrainedModel, TrainerError> {
    let dataset = Dataset::from_csv(path)?;
    train_pipeline(&dataset, params)
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
