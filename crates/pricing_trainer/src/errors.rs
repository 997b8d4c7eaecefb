use pricing_core::{EncoderError, ModelError};
use std::path::PathBuf;
use thiserror::Error;

/// Problems with a dataset file or uploaded batch
#[derive(Debug, Error)]
pub enum DataError {
    #[error("dataset {} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("missing required columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("dataset has no rows")]
    Empty,

    #[error("dataset has {rows} row(s); at least 2 are needed to train and evaluate")]
    InsufficientRows { rows: usize },

    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    /// Every out-of-range value found, one message per violation
    #[error("{} invalid value(s): {}", errors.len(), errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("dataset I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the forest trainer.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("invalid training parameters: {0}")]
    InvalidParams(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}
