//! Read-only product catalog over the training dataset

use pricing_trainer::{Dataset, ProductRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::errors::{PricingError, Result};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Best sellers first
    #[default]
    Popularity,
    PriceLow,
    PriceHigh,
    Rating,
}

/// Filters, ordering and paging for a product listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductQuery {
    pub category: Option<String>,
    pub season: Option<String>,
    pub brand_tier: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_rating: Option<f64>,
    /// Case-insensitive substring of the product name or category
    pub search: Option<String>,
    pub sort_by: SortBy,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl ProductQuery {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page() == 0 {
            return Err(PricingError::InvalidQuery("page starts at 1".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.limit()) {
            return Err(PricingError::InvalidQuery(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(PricingError::InvalidQuery(
                    "min_price must not exceed max_price".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn matches(&self, record: &ProductRecord, search: Option<&str>) -> bool {
        let exact = |filter: &Option<String>, value: &str| {
            filter.as_deref().map_or(true, |wanted| wanted == value)
        };

        exact(&self.category, &record.category)
            && exact(&self.season, &record.season)
            && exact(&self.brand_tier, &record.brand_tier)
            && self.min_price.map_or(true, |min| record.base_price >= min)
            && self.max_price.map_or(true, |max| record.base_price <= max)
            && self.min_rating.map_or(true, |min| record.rating >= min)
            && search.map_or(true, |needle| {
                record
                    .product_name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(needle))
                    || record.category.to_lowercase().contains(needle)
            })
    }
}

/// A catalog entry with the model's current price suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    #[serde(flatten)]
    pub record: ProductRecord,
    pub predicted_price: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
    pub products: Vec<ProductSummary>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

/// Filter, sort and page `dataset`; `price` supplies the optional
/// `(predicted_price, confidence)` for each returned product
pub fn query_products<F>(dataset: &Dataset, query: &ProductQuery, price: F) -> Result<ProductPage>
where
    F: Fn(&ProductRecord) -> Option<(f64, f64)>,
{
    query.validate()?;

    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut matched: Vec<&ProductRecord> = dataset
        .records
        .iter()
        .filter(|record| query.matches(record, search.as_deref()))
        .collect();

    match query.sort_by {
        SortBy::Popularity => matched.sort_by(|a, b| b.sales_last_30_days.cmp(&a.sales_last_30_days)),
        SortBy::PriceLow => matched.sort_by(|a, b| a.base_price.total_cmp(&b.base_price)),
        SortBy::PriceHigh => matched.sort_by(|a, b| b.base_price.total_cmp(&a.base_price)),
        SortBy::Rating => matched.sort_by(|a, b| match b.rating.total_cmp(&a.rating) {
            Ordering::Equal => b.review_count.cmp(&a.review_count),
            other => other,
        }),
    }

    let total = matched.len();
    let limit = query.limit();
    let page = query.page();
    let products = matched
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .map(|record| summarize(record, &price))
        .collect();

    Ok(ProductPage {
        products,
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    })
}

pub fn summarize<F>(record: &ProductRecord, price: &F) -> ProductSummary
where
    F: Fn(&ProductRecord) -> Option<(f64, f64)>,
{
    let suggestion = price(record);
    ProductSummary {
        record: record.clone(),
        predicted_price: suggestion.map(|(p, _)| p),
        confidence: suggestion.map(|(_, c)| c),
    }
}
