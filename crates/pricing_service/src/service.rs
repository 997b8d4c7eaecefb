//! Pricing service: model lifecycle, prediction, upload and catalog
//!
//! The forest and its encoders live together in one immutable
//! [`ModelBundle`] behind a read-write lock. Predictions clone the `Arc`
//! under a short read lock; a retrain builds a complete new bundle without
//! holding the lock and swaps it in under the write lock, so a prediction
//! never sees a forest from one run with encoders from another. Retrains
//! and uploads are serialised by a separate mutex.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use pricing_core::{
    assemble, ArtifactError, ArtifactStore, EncoderTable, Forest, ModelArtifact, ModelMetrics,
    ProductAttributes, FEATURE_COLUMNS,
};
use pricing_trainer::{evaluate_holdout, train_pipeline, DataError, Dataset, ProductRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::catalog::{self, ProductPage, ProductQuery, ProductSummary};
use crate::config::{ServiceConfig, UnseenCategoryPolicy};
use crate::errors::{PredictionError, PricingError, Result};
use crate::prediction::{self, PricePrediction};

/// A forest, the encoders it was trained with and its held-out metrics
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub generation: String,
    pub trained_at: DateTime<Utc>,
    pub forest: Forest,
    pub encoders: EncoderTable,
    pub metrics: Option<ModelMetrics>,
}

impl ModelBundle {
    fn from_artifact(artifact: ModelArtifact, metrics: Option<ModelMetrics>) -> Self {
        Self {
            generation: artifact.generation,
            trained_at: artifact.trained_at,
            forest: artifact.forest,
            encoders: artifact.encoders,
            metrics,
        }
    }
}

/// How `bootstrap` obtained the initial model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Loaded { generation: String },
    Trained { generation: String },
    /// No persisted model and no dataset to train from
    NoModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrainingStatus {
    Completed,
    Failed,
}

/// Result of merging an uploaded CSV batch and retraining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    pub new_records: usize,
    pub existing_records: usize,
    pub duplicates_removed: usize,
    pub total_records: usize,
    pub retraining_status: RetrainingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retraining_error: Option<String>,
    pub model_metrics: Option<ModelMetrics>,
}

/// Snapshot of the serving model for health reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub generation: Option<String>,
    pub trained_at: Option<DateTime<Utc>>,
    pub num_trees: usize,
    pub r2_score: Option<f64>,
}

pub struct PricingService {
    config: ServiceConfig,
    store: ArtifactStore,
    model: RwLock<Option<Arc<ModelBundle>>>,
    catalog: RwLock<Option<Arc<Dataset>>>,
    train_lock: Mutex<()>,
}

impl PricingService {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let store = ArtifactStore::new(&config.data.model_dir);
        Ok(Self {
            config,
            store,
            model: RwLock::new(None),
            catalog: RwLock::new(None),
            train_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Load the persisted pair, or train one if none is usable
    #[instrument(skip(self))]
    pub fn bootstrap(&self) -> Result<BootstrapOutcome> {
        let _guard = self.train_lock.lock();

        let dataset = match self.read_dataset() {
            Ok(dataset) => dataset,
            Err(err) => {
                warn!(error = %err, "Dataset unavailable; catalog and retraining disabled");
                None
            }
        };
        if let Some(dataset) = &dataset {
            self.set_catalog(dataset.clone());
        }

        match self.store.load() {
            Ok(Some(artifact)) if !has_current_layout(&artifact.forest) => warn!(
                generation = %artifact.generation,
                features = ?artifact.forest.feature_names,
                "Persisted model uses a different feature layout; retraining"
            ),
            Ok(Some(artifact)) => {
                let metrics = dataset.as_ref().and_then(|dataset| {
                    evaluate_holdout(&artifact.forest, &artifact.encoders, dataset)
                        .map_err(|err| warn!(error = %err, "Could not score loaded model"))
                        .ok()
                });
                let generation = artifact.generation.clone();
                self.install(ModelBundle::from_artifact(artifact, metrics));
                info!(%generation, "Loaded persisted model");
                return Ok(BootstrapOutcome::Loaded { generation });
            }
            Ok(None) => info!("No persisted model found"),
            Err(ArtifactError::PairingMismatch(reason)) => {
                warn!(%reason, "Persisted model and encoders do not match; retraining")
            }
            Err(err) => warn!(error = %err, "Persisted model unreadable; retraining"),
        }

        match dataset {
            Some(dataset) => {
                self.retrain_locked(&dataset)?;
                let generation = self
                    .current()
                    .map(|bundle| bundle.generation.clone())
                    .unwrap_or_default();
                Ok(BootstrapOutcome::Trained { generation })
            }
            None => {
                warn!("No dataset to train from; serving without a model");
                Ok(BootstrapOutcome::NoModel)
            }
        }
    }

    /// Retrain from the dataset file and swap in the new model
    #[instrument(skip(self))]
    pub fn train(&self) -> Result<ModelMetrics> {
        let _guard = self.train_lock.lock();
        let dataset = self.read_dataset()?.ok_or_else(|| DataError::NotFound {
            path: self.config.data.dataset_path.clone(),
        })?;
        self.set_catalog(dataset.clone());
        self.retrain_locked(&dataset)
    }

    /// Validate and merge an uploaded CSV batch, then retrain
    ///
    /// A retrain failure after a successful merge is reported in the result;
    /// the merged data stays in place.
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn upload(&self, bytes: &[u8]) -> Result<UploadReport> {
        let incoming = Dataset::parse_upload(bytes)?;

        let _guard = self.train_lock.lock();
        let mut dataset = self.read_dataset()?.unwrap_or_default();
        let summary = dataset.merge(incoming);
        dataset.write_csv(&self.config.data.dataset_path)?;
        self.set_catalog(dataset.clone());

        info!(
            new = summary.new_records,
            duplicates = summary.duplicates_removed,
            total = summary.total_records,
            "Merged uploaded data"
        );

        let (retraining_status, retraining_error, model_metrics) =
            match self.retrain_locked(&dataset) {
                Ok(metrics) => (RetrainingStatus::Completed, None, Some(metrics)),
                Err(err) => {
                    warn!(error = %err, "Retraining after upload failed");
                    (RetrainingStatus::Failed, Some(err.to_string()), None)
                }
            };

        Ok(UploadReport {
            new_records: summary.new_records,
            existing_records: summary.existing_records,
            duplicates_removed: summary.duplicates_removed,
            total_records: summary.total_records,
            retraining_status,
            retraining_error,
            model_metrics,
        })
    }

    /// Score one product with the current model
    pub fn predict(&self, attrs: &ProductAttributes) -> Result<PricePrediction> {
        let bundle = self.current().ok_or(PricingError::ModelNotLoaded)?;

        match self.predict_with(&bundle, attrs) {
            Ok(prediction) => {
                if !prediction.unseen_categories.is_empty() {
                    counter!("pricing_unseen_category_total").increment(1);
                }
                counter!("pricing_predictions_total").increment(1);
                Ok(prediction)
            }
            Err(err) => {
                if matches!(err, PredictionError::UnseenCategory { .. }) {
                    counter!("pricing_unseen_category_total").increment(1);
                }
                counter!("pricing_prediction_errors_total").increment(1);
                Err(err.into())
            }
        }
    }

    fn predict_with(
        &self,
        bundle: &ModelBundle,
        attrs: &ProductAttributes,
    ) -> std::result::Result<PricePrediction, PredictionError> {
        let encoded = assemble(attrs, &bundle.encoders)?;
        if attrs.base_price == 0.0 {
            return Err(PredictionError::ZeroBasePrice);
        }

        if encoded.has_unseen()
            && self.config.prediction.unseen_category_policy == UnseenCategoryPolicy::Reject
        {
            return Err(PredictionError::UnseenCategory {
                fields: encoded.unseen,
            });
        }

        let raw = bundle.forest.predict(&encoded.values)?;
        prediction::finalize(
            raw,
            attrs.base_price,
            bundle.metrics.as_ref().map(|m| m.r2_score),
            encoded.unseen,
            &bundle.generation,
        )
    }

    /// Metrics of the serving model
    pub fn metrics(&self) -> Result<ModelMetrics> {
        let bundle = self.current().ok_or(PricingError::ModelNotLoaded)?;
        bundle.metrics.clone().ok_or(PricingError::MetricsUnavailable)
    }

    pub fn status(&self) -> ModelStatus {
        match self.current() {
            Some(bundle) => ModelStatus {
                loaded: true,
                generation: Some(bundle.generation.clone()),
                trained_at: Some(bundle.trained_at),
                num_trees: bundle.forest.num_trees(),
                r2_score: bundle.metrics.as_ref().map(|m| m.r2_score),
            },
            None => ModelStatus {
                loaded: false,
                generation: None,
                trained_at: None,
                num_trees: 0,
                r2_score: None,
            },
        }
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.read().is_some()
    }

    /// Current model, if any
    pub fn current(&self) -> Option<Arc<ModelBundle>> {
        self.model.read().clone()
    }

    pub fn list_products(&self, query: &ProductQuery) -> Result<ProductPage> {
        let dataset = self.catalog.read().clone().unwrap_or_default();
        let bundle = self.current();
        catalog::query_products(&dataset, query, |record| {
            self.suggest(bundle.as_deref(), record)
        })
    }

    pub fn get_product(&self, product_id: i64) -> Result<ProductSummary> {
        let dataset = self.catalog.read().clone();
        let record = dataset
            .as_deref()
            .and_then(|dataset| dataset.find(product_id))
            .ok_or(PricingError::ProductNotFound(product_id))?;
        let bundle = self.current();
        Ok(catalog::summarize(record, &|record: &ProductRecord| {
            self.suggest(bundle.as_deref(), record)
        }))
    }

    /// Best-effort `(price, confidence)` for a catalog entry
    fn suggest(&self, bundle: Option<&ModelBundle>, record: &ProductRecord) -> Option<(f64, f64)> {
        let bundle = bundle?;
        self.predict_with(bundle, &record.to_attributes())
            .ok()
            .map(|p| (p.predicted_price, p.confidence_score))
    }

    fn read_dataset(&self) -> Result<Option<Dataset>> {
        let path = &self.config.data.dataset_path;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Dataset::from_csv(path)?))
    }

    /// Train, persist and swap in a new bundle; caller holds `train_lock`
    fn retrain_locked(&self, dataset: &Dataset) -> Result<ModelMetrics> {
        let trained = train_pipeline(dataset, &self.config.forest)?;
        let artifact = ModelArtifact::new(trained.forest, trained.encoders, Utc::now())?;
        self.store.save(&artifact)?;

        let metrics = trained.metrics;
        let generation = artifact.generation.clone();
        self.install(ModelBundle::from_artifact(artifact, Some(metrics.clone())));

        counter!("pricing_retrains_total").increment(1);
        info!(%generation, r2 = metrics.r2_score, "Model retrained");
        Ok(metrics)
    }

    fn install(&self, bundle: ModelBundle) {
        if let Some(metrics) = &bundle.metrics {
            gauge!("pricing_model_r2").set(metrics.r2_score);
        }
        *self.model.write() = Some(Arc::new(bundle));
    }

    fn set_catalog(&self, dataset: Dataset) {
        *self.catalog.write() = Some(Arc::new(dataset));
    }
}

/// Whether `forest` reads features in the order `assemble` produces them
fn has_current_layout(forest: &Forest) -> bool {
    forest
        .feature_names
        .iter()
        .map(String::as_str)
        .eq(FEATURE_COLUMNS.iter().copied())
}
