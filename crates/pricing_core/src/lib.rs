//! Pricing model core
//!
//! Everything needed to score a product against a trained model, with no
//! I/O beyond the artifact files:
//!
//! - `encoder`: label encoders for the categorical attributes
//! - `features`: product attributes and the fixed feature-vector layout
//! - `forest`: random-forest regression trees and inference
//! - `evaluation`: held-out regression metrics
//! - `artifact`: the persisted forest/encoder pair and its generation id
//! - `serde_canon`: canonical JSON and content hashing

pub mod artifact;
pub mod encoder;
pub mod errors;
pub mod evaluation;
pub mod features;
pub mod forest;
pub mod serde_canon;

pub use artifact::{generation_id, ArtifactError, ArtifactStore, ModelArtifact};
pub use encoder::{CategoricalField, CategoricalSource, EncoderTable, LabelEncoder, FALLBACK_CODE};
pub use errors::{EncoderError, ModelError};
pub use evaluation::{mean_squared_error, r2_score, ModelMetrics, MODEL_TYPE};
pub use features::{
    assemble, EncodedFeatures, ProductAttributes, FEATURE_COLUMNS, FEATURE_COUNT,
    NUMERIC_FEATURES,
};
pub use forest::{Forest, Node, Tree};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
