//! Error types for the pricing core

use crate::encoder::CategoricalField;
use crate::serde_canon::CanonicalError;
use thiserror::Error;

/// Errors raised by the forest model and feature assembly
#[derive(Error, Debug)]
pub enum ModelError {
    /// Structural validation of a forest failed
    #[error("model validation failed: {0}")]
    ValidationFailed(String),

    /// Input vector does not match the layout the forest was trained on
    #[error("feature count mismatch: model expects {expected}, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    /// A numeric input is NaN or infinite
    #[error("non-finite value for feature `{feature}`")]
    NonFiniteFeature { feature: &'static str },

    #[error("canonical serialization error: {0}")]
    Canonical(#[from] CanonicalError),
}

/// Errors raised while fitting label encoders
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncoderError {
    /// No values were observed for a categorical column
    #[error("cannot fit encoder for `{0}`: no values observed")]
    EmptyFit(CategoricalField),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
