//! Random-forest regression model
//!
//! - `tree`: flat regression trees and traversal
//! - `model`: the bagged ensemble, validation and canonical hashing
//!
//! Models are plain serde structures; see [`crate::artifact`] for how a
//! forest is persisted together with the encoders it was trained with.

pub mod model;
pub mod tree;

pub use model::{Forest, FOREST_FORMAT_VERSION};
pub use tree::{Node, Tree};
