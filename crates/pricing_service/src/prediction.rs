//! Prediction post-processing
//!
//! Turns a raw forest output into the response: rounded price, confidence,
//! price change against the current base price and a recommendation.

use pricing_core::CategoricalField;
use serde::{Deserialize, Serialize};

use crate::errors::PredictionError;

/// Lowest reported confidence
pub const MIN_CONFIDENCE: f64 = 0.6;
/// Highest reported confidence
pub const MAX_CONFIDENCE: f64 = 0.95;
/// Percentage change beyond which a price move is recommended
pub const RECOMMENDATION_THRESHOLD_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Increase,
    Decrease,
    Maintain,
}

impl Recommendation {
    /// `Increase` above +5%, `Decrease` below -5%, otherwise `Maintain`
    pub fn from_change(price_change_pct: f64) -> Self {
        if price_change_pct > RECOMMENDATION_THRESHOLD_PCT {
            Recommendation::Increase
        } else if price_change_pct < -RECOMMENDATION_THRESHOLD_PCT {
            Recommendation::Decrease
        } else {
            Recommendation::Maintain
        }
    }

    pub fn detail(&self) -> &'static str {
        match self {
            Recommendation::Increase => {
                "Increase price - high demand and favorable market conditions"
            }
            Recommendation::Decrease => "Decrease price - stimulate demand and clear inventory",
            Recommendation::Maintain => "Maintain current pricing - optimal market position",
        }
    }
}

/// Response to a single prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePrediction {
    pub predicted_price: f64,
    pub confidence_score: f64,
    pub price_change_percentage: f64,
    pub recommendation: Recommendation,
    pub recommendation_detail: String,
    pub model_generation: String,
    /// Categorical fields whose value the model had never seen
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unseen_categories: Vec<CategoricalField>,
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Model-level confidence from the held-out R²
///
/// Clamped to `[0.6, 0.95]`; a missing or non-finite score gives the floor.
pub fn confidence_from_r2(r2: Option<f64>) -> f64 {
    match r2 {
        Some(score) if score.is_finite() => score.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE),
        _ => MIN_CONFIDENCE,
    }
}

/// Percentage change from `base_price` to `predicted_price`
pub fn price_change_percentage(predicted_price: f64, base_price: f64) -> f64 {
    (predicted_price - base_price) / base_price * 100.0
}

/// Build the response for a raw model output
///
/// The percentage is computed from the rounded price and the recommendation
/// from the rounded percentage, so the three reported numbers always agree.
/// A `base_price` too small to yield a finite percentage is an error.
pub fn finalize(
    raw_price: f64,
    base_price: f64,
    r2: Option<f64>,
    unseen_categories: Vec<CategoricalField>,
    model_generation: &str,
) -> Result<PricePrediction, PredictionError> {
    let predicted_price = round_to(raw_price, 2);
    let price_change_percentage = round_to(price_change_percentage(predicted_price, base_price), 2);
    if !price_change_percentage.is_finite() {
        return Err(PredictionError::UnboundedChange { base_price });
    }
    let recommendation = Recommendation::from_change(price_change_percentage);

    let confidence = if unseen_categories.is_empty() {
        confidence_from_r2(r2)
    } else {
        MIN_CONFIDENCE
    };

    Ok(PricePrediction {
        predicted_price,
        confidence_score: round_to(confidence, 3),
        price_change_percentage,
        recommendation,
        recommendation_detail: recommendation.detail().to_string(),
        model_generation: model_generation.to_string(),
        unseen_categories,
    })
}
