//! Dynamic pricing service layer
//!
//! Owns the serving model, turns raw forest output into price
//! recommendations, merges uploaded data and answers catalog queries.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod prediction;
pub mod service;

pub use catalog::{ProductPage, ProductQuery, ProductSummary, SortBy};
pub use config::{DataConfig, PredictionConfig, ServiceConfig, UnseenCategoryPolicy};
pub use errors::{PredictionError, PricingError};
pub use prediction::{PricePrediction, Recommendation};
pub use service::{
    BootstrapOutcome, ModelBundle, ModelStatus, PricingService, RetrainingStatus, UploadReport,
};

/// Service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
