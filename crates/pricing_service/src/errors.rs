//! Error types for the pricing service

use pricing_core::{ArtifactError, CategoricalField, ModelError};
use pricing_trainer::{DataError, TrainerError};
use thiserror::Error;

/// Failures while scoring a single product
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error(
        "unseen values for {}",
        fields.iter().map(|f| f.column()).collect::<Vec<_>>().join(", ")
    )]
    UnseenCategory { fields: Vec<CategoricalField> },

    #[error("base_price must be non-zero to compute a price change")]
    ZeroBasePrice,

    #[error("base_price {base_price} is too small to compute a finite price change")]
    UnboundedChange { base_price: f64 },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Pricing service errors
#[derive(Error, Debug)]
pub enum PricingError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("prediction error: {0}")]
    Prediction(#[from] PredictionError),

    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("no model metrics available")]
    MetricsUnavailable,

    #[error("product {0} not found")]
    ProductNotFound(i64),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("model storage error: {0}")]
    Storage(#[from] ArtifactError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TrainerError> for PricingError {
    fn from(err: TrainerError) -> Self {
        match err {
            TrainerError::Data(data) => PricingError::Data(data),
            TrainerError::InvalidParams(message) => PricingError::Training(message),
            TrainerError::Model(model) => PricingError::Training(model.to_string()),
        }
    }
}

impl From<ModelError> for PricingError {
    fn from(err: ModelError) -> Self {
        PricingError::Prediction(PredictionError::Model(err))
    }
}

/// Result type for service operations
pub type Result<T> = std::result::Result<T, PricingError>;
