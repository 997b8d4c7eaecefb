//! CSV product dataset loading, validation and merging
//!
//! One row per product. Columns are matched by header name, so column order
//! in the file does not matter and unknown columns are ignored.

use pricing_core::{CategoricalField, CategoricalSource, ProductAttributes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::errors::DataError;

/// Column holding the price the model learns to predict
pub const TARGET_COLUMN: &str = "target_price";

/// Columns a training dataset must carry, in schema order
pub const TRAINING_COLUMNS: [&str; 11] = [
    "category",
    "base_price",
    "inventory_level",
    "competitor_avg_price",
    "sales_last_30_days",
    "rating",
    "review_count",
    "season",
    "brand_tier",
    "material_cost",
    TARGET_COLUMN,
];

/// Columns an uploaded batch must carry, in schema order
pub const UPLOAD_COLUMNS: [&str; 13] = [
    "product_id",
    "product_name",
    "category",
    "base_price",
    "inventory_level",
    "competitor_avg_price",
    "sales_last_30_days",
    "rating",
    "review_count",
    "season",
    "brand_tier",
    "material_cost",
    TARGET_COLUMN,
];

/// Highest allowed product rating
pub const MAX_RATING: f64 = 5.0;

/// One dataset row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub product_name: Option<String>,
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
    pub target_price: f64,
}

impl ProductRecord {
    /// Prediction inputs for this row
    pub fn to_attributes(&self) -> ProductAttributes {
        ProductAttributes {
            product_name: self.product_name.clone().unwrap_or_default(),
            category: self.category.clone(),
            base_price: self.base_price,
            inventory_level: self.inventory_level,
            competitor_avg_price: self.competitor_avg_price,
            sales_last_30_days: self.sales_last_30_days,
            rating: self.rating,
            review_count: self.review_count,
            season: self.season.clone(),
            brand_tier: self.brand_tier.clone(),
            material_cost: self.material_cost,
        }
    }

    /// Range violations for this row, prefixed with its line number
    fn violations(&self, line: usize, require_identity: bool) -> Vec<String> {
        let mut errors = Vec::new();
        let mut push = |message: String| errors.push(format!("line {line}: {message}"));

        if require_identity {
            if self.product_id.is_none() {
                push("product_id is required".to_string());
            }
            if self.product_name.as_deref().map_or(true, str::is_empty) {
                push("product_name is required".to_string());
            }
        }

        for (column, value) in [
            ("category", &self.category),
            ("season", &self.season),
            ("brand_tier", &self.brand_tier),
        ] {
            if value.is_empty() {
                push(format!("{column} must not be empty"));
            }
        }

        for (column, value) in [
            ("base_price", self.base_price),
            ("competitor_avg_price", self.competitor_avg_price),
            ("material_cost", self.material_cost),
            (TARGET_COLUMN, self.target_price),
        ] {
            if !value.is_finite() || value < 0.0 {
                push(format!("{column} must be a non-negative number (got {value})"));
            }
        }

        for (column, value) in [
            ("inventory_level", self.inventory_level),
            ("sales_last_30_days", self.sales_last_30_days),
            ("review_count", self.review_count),
        ] {
            if value < 0 {
                push(format!("{column} must not be negative (got {value})"));
            }
        }

        if !(0.0..=MAX_RATING).contains(&self.rating) {
            push(format!(
                "rating must be between 0 and {MAX_RATING} (got {})",
                self.rating
            ));
        }

        errors
    }
}

impl CategoricalSource for ProductRecord {
    fn categorical(&self, field: CategoricalField) -> &str {
        match field {
            CategoricalField::Category => &self.category,
            CategoricalField::Season => &self.season,
            CategoricalField::BrandTier => &self.brand_tier,
        }
    }
}

/// Row counts from merging an upload into an existing dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub new_records: usize,
    pub existing_records: usize,
    pub duplicates_removed: usize,
    pub total_records: usize,
}

/// Product dataset
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    pub records: Vec<ProductRecord>,
}

impl Dataset {
    pub fn new(records: Vec<ProductRecord>) -> Self {
        Self { records }
    }

    /// Load a training dataset from a CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let file = File::open(path.as_ref())?;
        let dataset = Self::from_reader(file, &TRAINING_COLUMNS)?;
        dataset.validate(false)?;
        debug!(
            rows = dataset.len(),
            path = %path.as_ref().display(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    /// Parse and validate an uploaded CSV batch
    pub fn parse_upload(bytes: &[u8]) -> Result<Self, DataError> {
        let dataset = Self::from_reader(bytes, &UPLOAD_COLUMNS)?;
        dataset.validate(true)?;
        Ok(dataset)
    }

    /// Parse CSV, requiring `required` columns in the header
    pub fn from_reader<R: Read>(reader: R, required: &[&str]) -> Result<Self, DataError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers().map_err(|err| malformed(err, 1))?.clone();
        let missing: Vec<String> = required
            .iter()
            .filter(|column| !headers.iter().any(|h| h == **column))
            .map(|column| column.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DataError::MissingColumns { missing });
        }

        let mut records = Vec::new();
        for (idx, row) in rdr.deserialize::<ProductRecord>().enumerate() {
            records.push(row.map_err(|err| malformed(err, idx + 2))?);
        }

        if records.is_empty() {
            return Err(DataError::Empty);
        }

        Ok(Self { records })
    }

    /// Check value ranges, collecting every violation
    pub fn validate(&self, require_identity: bool) -> Result<(), DataError> {
        let errors: Vec<String> = self
            .records
            .iter()
            .enumerate()
            .flat_map(|(idx, record)| record.violations(idx + 2, require_identity))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DataError::Validation { errors })
        }
    }

    /// Append `incoming`, keeping only the last row for each product id
    ///
    /// Surviving rows keep their relative order. Rows without an id are
    /// never treated as duplicates.
    pub fn merge(&mut self, incoming: Dataset) -> MergeSummary {
        let existing_records = self.records.len();
        let new_records = incoming.records.len();

        let mut combined = std::mem::take(&mut self.records);
        combined.extend(incoming.records);
        let combined_len = combined.len();

        let mut last_seen: HashMap<i64, usize> = HashMap::new();
        for (idx, record) in combined.iter().enumerate() {
            if let Some(id) = record.product_id {
                last_seen.insert(id, idx);
            }
        }

        self.records = combined
            .into_iter()
            .enumerate()
            .filter(|(idx, record)| match record.product_id {
                Some(id) => last_seen.get(&id) == Some(idx),
                None => true,
            })
            .map(|(_, record)| record)
            .collect();

        MergeSummary {
            new_records,
            existing_records,
            duplicates_removed: combined_len - self.records.len(),
            total_records: self.records.len(),
        }
    }

    /// Write the dataset as CSV, replacing `path` atomically
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), DataError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            for record in &self.records {
                writer.serialize(record).map_err(csv_io)?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().flush()?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    pub fn find(&self, product_id: i64) -> Option<&ProductRecord> {
        self.records
            .iter()
            .find(|record| record.product_id == Some(product_id))
    }

    /// Target column
    pub fn targets(&self) -> Vec<f64> {
        self.records.iter().map(|record| record.target_price).collect()
    }

    /// Get number of samples
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn malformed(err: csv::Error, fallback_line: usize) -> DataError {
    let line = err
        .position()
        .map(|pos| pos.line() as usize)
        .unwrap_or(fallback_line);
    let message = match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => err.to_string(),
        _ => err.to_string(),
    };
    DataError::Malformed { line, message }
}

fn csv_io(err: csv::Error) -> DataError {
    DataError::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const HEADER: &str = "product_id,product_name,category,base_price,inventory_level,competitor_avg_price,sales_last_30_days,rating,review_count,season,brand_tier,material_cost,target_price";

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "1,Headphones,Electronics,99.99,50,105.0,150,4.5,1000,All,Premium,35.0,104.5").unwrap();
        writeln!(file, "2,Novel,Books,12.5,200,13.0,80,4.1,320,Winter,Budget,3.0,12.9").unwrap();
        writeln!(file, "3,Yoga Mat,Sports,30.0,75,28.0,60,3.9,150,Summer,Mid,9.5,29.0").unwrap();
        file.flush().unwrap();
        file
    }

    fn record(id: i64, name: &str) -> ProductRecord {
        ProductRecord {
            product_id: Some(id),
            product_name: Some(name.to_string()),
            category: "Books".into(),
            base_price: 10.0,
            inventory_level: 5,
            competitor_avg_price: 11.0,
            sales_last_30_days: 3,
            rating: 4.0,
            review_count: 10,
            season: "All".into(),
            brand_tier: "Budget".into(),
            material_cost: 2.0,
            target_price: 10.5,
        }
    }

    #[test]
    fn test_load_csv() {
        let file = create_test_csv();
        let dataset = Dataset::from_csv(file.path()).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.records[0].product_id, Some(1));
        assert_eq!(dataset.records[1].category, "Books");
        assert_eq!(dataset.targets(), vec![104.5, 12.9, 29.0]);
    }

    #[test]
    fn training_does_not_need_identity_columns() {
        let csv = "category,base_price,inventory_level,competitor_avg_price,sales_last_30_days,rating,review_count,season,brand_tier,material_cost,target_price\n\
                   Books,10,1,11,2,4.0,3,All,Budget,2,10.5\n";
        let dataset = Dataset::from_reader(csv.as_bytes(), &TRAINING_COLUMNS).unwrap();
        assert_eq!(dataset.records[0].product_id, None);
        assert_eq!(dataset.records[0].to_attributes().product_name, "");
    }

    #[test]
    fn missing_columns_listed_in_schema_order() {
        let csv = "product_name,category,base_price\nX,Books,10\n";
        let err = Dataset::parse_upload(csv.as_bytes()).unwrap_err();
        match err {
            DataError::MissingColumns { missing } => assert_eq!(
                missing,
                vec![
                    "product_id",
                    "inventory_level",
                    "competitor_avg_price",
                    "sales_last_30_days",
                    "rating",
                    "review_count",
                    "season",
                    "brand_tier",
                    "material_cost",
                    "target_price",
                ]
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn header_only_is_empty() {
        let csv = format!("{HEADER}\n");
        assert!(matches!(
            Dataset::parse_upload(csv.as_bytes()),
            Err(DataError::Empty)
        ));
    }

    #[test]
    fn unparsable_value_reports_line() {
        let csv = format!(
            "{HEADER}\n1,A,Books,10,1,11,2,4.0,3,All,Budget,2,10.5\n2,B,Books,ten,1,11,2,4.0,3,All,Budget,2,10.5\n"
        );
        match Dataset::parse_upload(csv.as_bytes()).unwrap_err() {
            DataError::Malformed { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validation_collects_every_violation() {
        let csv = format!(
            "{HEADER}\n1,A,Books,-10,1,11,2,7.5,3,All,Budget,2,10.5\n2,B,Books,10,-1,11,2,4.0,3,All,Budget,2,10.5\n"
        );
        match Dataset::parse_upload(csv.as_bytes()).unwrap_err() {
            DataError::Validation { errors } => {
                assert_eq!(errors.len(), 3);
                assert!(errors[0].starts_with("line 2: base_price"));
                assert!(errors[1].starts_with("line 2: rating"));
                assert!(errors[2].starts_with("line 3: inventory_level"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn merge_keeps_last_row_per_product() {
        let mut dataset = Dataset::new(vec![record(1, "old"), record(2, "two")]);
        let incoming = Dataset::new(vec![record(3, "three"), record(1, "new")]);

        let summary = dataset.merge(incoming);

        assert_eq!(
            summary,
            MergeSummary {
                new_records: 2,
                existing_records: 2,
                duplicates_removed: 1,
                total_records: 3,
            }
        );
        let names: Vec<_> = dataset
            .records
            .iter()
            .map(|r| r.product_name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["two", "three", "new"]);
        assert_eq!(dataset.find(1).unwrap().product_name.as_deref(), Some("new"));
    }

    #[test]
    fn write_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("dataset.csv");
        let dataset = Dataset::new(vec![record(1, "one"), record(2, "two")]);

        dataset.write_csv(&path).unwrap();
        let reloaded = Dataset::from_csv(&path).unwrap();

        assert_eq!(reloaded, dataset);
    }
}
