//! Product attributes and the fixed-order feature vector
//!
//! The model consumes ten columns: seven numeric attributes in
//! [`NUMERIC_FEATURES`] order followed by the three encoded categorical
//! columns in [`CategoricalField::ALL`] order.

use crate::encoder::{CategoricalField, CategoricalSource, EncoderTable};
use crate::errors::{ModelError, Result};
use serde::{Deserialize, Serialize};

/// Numeric columns, in vector order
pub const NUMERIC_FEATURES: [&str; 7] = [
    "base_price",
    "inventory_level",
    "competitor_avg_price",
    "sales_last_30_days",
    "rating",
    "review_count",
    "material_cost",
];

/// Width of the feature vector
pub const FEATURE_COUNT: usize = 10;

/// All feature-vector column names, in vector order
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "base_price",
    "inventory_level",
    "competitor_avg_price",
    "sales_last_30_days",
    "rating",
    "review_count",
    "material_cost",
    "category_encoded",
    "season_encoded",
    "brand_tier_encoded",
];

/// Raw attributes of one product as submitted for pricing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAttributes {
    pub product_name: String,
    pub category: String,
    pub base_price: f64,
    pub inventory_level: i64,
    pub competitor_avg_price: f64,
    pub sales_last_30_days: i64,
    pub rating: f64,
    pub review_count: i64,
    pub season: String,
    pub brand_tier: String,
    pub material_cost: f64,
}

impl ProductAttributes {
    /// Numeric attributes in [`NUMERIC_FEATURES`] order
    pub fn numeric_features(&self) -> [f64; 7] {
        [
            self.base_price,
            self.inventory_level as f64,
            self.competitor_avg_price,
            self.sales_last_30_days as f64,
            self.rating,
            self.review_count as f64,
            self.material_cost,
        ]
    }
}

impl CategoricalSource for ProductAttributes {
    fn categorical(&self, field: CategoricalField) -> &str {
        match field {
            CategoricalField::Category => &self.category,
            CategoricalField::Season => &self.season,
            CategoricalField::BrandTier => &self.brand_tier,
        }
    }
}

/// A ready-to-score feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFeatures {
    pub values: [f64; FEATURE_COUNT],
    /// Categorical columns whose value was unknown to the encoder and
    /// replaced with the fallback code
    pub unseen: Vec<CategoricalField>,
}

impl EncodedFeatures {
    pub fn has_unseen(&self) -> bool {
        !self.unseen.is_empty()
    }
}

/// Encode and lay out `attrs` in the model's column order
pub fn assemble(attrs: &ProductAttributes, encoders: &EncoderTable) -> Result<EncodedFeatures> {
    let mut values = [0.0; FEATURE_COUNT];

    for (idx, value) in attrs.numeric_features().into_iter().enumerate() {
        if !value.is_finite() {
            return Err(ModelError::NonFiniteFeature {
                feature: NUMERIC_FEATURES[idx],
            });
        }
        values[idx] = value;
    }

    let mut unseen = Vec::new();
    for (offset, field) in CategoricalField::ALL.into_iter().enumerate() {
        let (code, missing) = encoders.encode_or_fallback(field, attrs.categorical(field));
        if missing {
            unseen.push(field);
        }
        values[NUMERIC_FEATURES.len() + offset] = code as f64;
    }

    Ok(EncodedFeatures { values, unseen })
}
