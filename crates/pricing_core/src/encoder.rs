//! Label encoding for categorical product attributes
//!
//! Each categorical column gets its own [`LabelEncoder`]: the observed values
//! are sorted and de-duplicated, and a value's code is its index in that
//! list. Codes are only meaningful together with the encoder that produced
//! them; a retrain on a different value set may renumber existing values.

use crate::errors::EncoderError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Code substituted for a value the encoder has never seen
pub const FALLBACK_CODE: u32 = 0;

/// Categorical columns consumed by the pricing model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalField {
    Category,
    Season,
    BrandTier,
}

impl CategoricalField {
    /// Fixed order in which encoded columns are appended to the feature vector
    pub const ALL: [CategoricalField; 3] = [
        CategoricalField::Category,
        CategoricalField::Season,
        CategoricalField::BrandTier,
    ];

    /// Raw dataset column name
    pub fn column(&self) -> &'static str {
        match self {
            CategoricalField::Category => "category",
            CategoricalField::Season => "season",
            CategoricalField::BrandTier => "brand_tier",
        }
    }

    /// Feature-vector column name
    pub fn encoded_column(&self) -> &'static str {
        match self {
            CategoricalField::Category => "category_encoded",
            CategoricalField::Season => "season_encoded",
            CategoricalField::BrandTier => "brand_tier_encoded",
        }
    }
}

impl fmt::Display for CategoricalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Anything that can supply raw categorical values for encoding
pub trait CategoricalSource {
    fn categorical(&self, field: CategoricalField) -> &str;
}

/// Deterministic string-to-code mapping for one column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// Fit on the observed values; duplicates are ignored
    pub fn fit<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: BTreeSet<String> = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .collect();
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    /// Code for `value`, or `None` if it was not seen during fitting
    pub fn encode(&self, value: &str) -> Option<u32> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(value))
            .ok()
            .map(|idx| idx as u32)
    }

    /// Reverse lookup
    pub fn decode(&self, code: u32) -> Option<&str> {
        self.classes.get(code as usize).map(String::as_str)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// The three per-column encoders fitted in one training run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderTable {
    pub category: LabelEncoder,
    pub season: LabelEncoder,
    pub brand_tier: LabelEncoder,
}

impl EncoderTable {
    /// Fit every column from the full set of rows
    pub fn fit<R: CategoricalSource>(rows: &[R]) -> Result<Self, EncoderError> {
        let fit_column = |field: CategoricalField| {
            let encoder = LabelEncoder::fit(rows.iter().map(|row| row.categorical(field)));
            if encoder.is_empty() {
                Err(EncoderError::EmptyFit(field))
            } else {
                Ok(encoder)
            }
        };

        Ok(Self {
            category: fit_column(CategoricalField::Category)?,
            season: fit_column(CategoricalField::Season)?,
            brand_tier: fit_column(CategoricalField::BrandTier)?,
        })
    }

    pub fn encoder(&self, field: CategoricalField) -> &LabelEncoder {
        match field {
            CategoricalField::Category => &self.category,
            CategoricalField::Season => &self.season,
            CategoricalField::BrandTier => &self.brand_tier,
        }
    }

    pub fn encode(&self, field: CategoricalField, value: &str) -> Option<u32> {
        self.encoder(field).encode(value)
    }

    /// Encode with [`FALLBACK_CODE`] for unseen values; the flag is `true`
    /// when the fallback was used.
    pub fn encode_or_fallback(&self, field: CategoricalField, value: &str) -> (u32, bool) {
        match self.encode(field, value) {
            Some(code) => (code, false),
            None => (FALLBACK_CODE, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row(&'static str, &'static str, &'static str);

    impl CategoricalSource for Row {
        fn categorical(&self, field: CategoricalField) -> &str {
            match field {
                CategoricalField::Category => self.0,
                CategoricalField::Season => self.1,
                CategoricalField::BrandTier => self.2,
            }
        }
    }

    #[test]
    fn codes_follow_sorted_order() {
        let encoder = LabelEncoder::fit(["Sports", "Electronics", "Books", "Electronics"]);
        assert_eq!(encoder.classes(), ["Books", "Electronics", "Sports"]);
        assert_eq!(encoder.encode("Books"), Some(0));
        assert_eq!(encoder.encode("Electronics"), Some(1));
        assert_eq!(encoder.encode("Sports"), Some(2));
        assert_eq!(encoder.decode(2), Some("Sports"));
    }

    #[test]
    fn unseen_value_is_none() {
        let encoder = LabelEncoder::fit(["Summer", "Winter"]);
        assert_eq!(encoder.encode("Monsoon"), None);
        assert_eq!(encoder.encode("summer"), None);
    }

    #[test]
    fn fit_is_deterministic_regardless_of_input_order() {
        let a = LabelEncoder::fit(["b", "a", "c"]);
        let b = LabelEncoder::fit(["c", "b", "a", "a"]);
        assert_eq!(a, b);
    }

    #[test]
    fn table_fallback_flags_unseen() {
        let rows = vec![
            Row("Books", "Winter", "Budget"),
            Row("Toys", "Summer", "Premium"),
        ];
        let table = EncoderTable::fit(&rows).unwrap();

        assert_eq!(
            table.encode_or_fallback(CategoricalField::Category, "Toys"),
            (1, false)
        );
        assert_eq!(
            table.encode_or_fallback(CategoricalField::Category, "Garden"),
            (FALLBACK_CODE, true)
        );
    }

    #[test]
    fn empty_fit_is_rejected() {
        let rows: Vec<Row> = Vec::new();
        assert_eq!(
            EncoderTable::fit(&rows),
            Err(EncoderError::EmptyFit(CategoricalField::Category))
        );
    }

    #[test]
    fn new_category_gets_distinct_code_after_refit() {
        let before = LabelEncoder::fit(["Books", "Toys"]);
        let after = LabelEncoder::fit(["Books", "Toys", "Apparel"]);

        assert_eq!(before.encode("Apparel"), None);
        let code = after.encode("Apparel").expect("refit encoder knows the value");
        assert_ne!(Some(code), after.encode("Books"));
        assert_ne!(Some(code), after.encode("Toys"));
        // Existing values may be renumbered by a refit.
        assert_eq!(before.encode("Books"), Some(0));
        assert_eq!(after.encode("Books"), Some(1));
    }
}
