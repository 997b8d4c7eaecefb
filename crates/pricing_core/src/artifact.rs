//! Persisted model artifact pair
//!
//! A trained model is stored as two canonical-JSON files in one directory:
//! the forest and the label encoders it was trained with. Both carry the same
//! generation id, the blake3 hash of the canonical `(forest, encoders)` pair,
//! so a forest can never be served with encoders from a different run.

use crate::encoder::EncoderTable;
use crate::errors::ModelError;
use crate::forest::Forest;
use crate::serde_canon::{hash_canonical_hex, to_canonical_json, CanonicalError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const MODEL_FILE: &str = "pricing_model.json";
pub const ENCODER_FILE: &str = "label_encoders.json";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("artifact serialization error: {0}")]
    Canonical(#[from] CanonicalError),

    /// The two files do not belong to the same training run
    #[error("model/encoder pairing mismatch: {0}")]
    PairingMismatch(String),

    #[error("invalid model artifact: {0}")]
    Model(#[from] ModelError),
}

#[derive(Serialize)]
struct GenerationInput<'a> {
    forest: &'a Forest,
    encoders: &'a EncoderTable,
}

/// Content hash identifying a `(forest, encoders)` pair
pub fn generation_id(forest: &Forest, encoders: &EncoderTable) -> Result<String, CanonicalError> {
    hash_canonical_hex(&GenerationInput { forest, encoders })
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    generation: String,
    trained_at: DateTime<Utc>,
    forest: Forest,
}

#[derive(Debug, Serialize, Deserialize)]
struct EncoderFile {
    generation: String,
    encoders: EncoderTable,
}

/// A forest and its encoders, as stored on disk
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub generation: String,
    pub trained_at: DateTime<Utc>,
    pub forest: Forest,
    pub encoders: EncoderTable,
}

impl ModelArtifact {
    /// Stamp a freshly trained pair with its generation id
    pub fn new(
        forest: Forest,
        encoders: EncoderTable,
        trained_at: DateTime<Utc>,
    ) -> Result<Self, ArtifactError> {
        let generation = generation_id(&forest, &encoders)?;
        Ok(Self {
            generation,
            trained_at,
            forest,
            encoders,
        })
    }
}

/// Directory holding the current artifact pair
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.dir.join(ENCODER_FILE)
    }

    /// Write both files, each via a temp file renamed into place
    pub fn save(&self, artifact: &ModelArtifact) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.dir)?;

        let model = to_canonical_json(&ModelFile {
            generation: artifact.generation.clone(),
            trained_at: artifact.trained_at,
            forest: artifact.forest.clone(),
        })?;
        let encoders = to_canonical_json(&EncoderFile {
            generation: artifact.generation.clone(),
            encoders: artifact.encoders.clone(),
        })?;

        self.write_atomic(&self.model_path(), &model)?;
        self.write_atomic(&self.encoder_path(), &encoders)?;

        info!(
            generation = %artifact.generation,
            dir = %self.dir.display(),
            "Saved model artifacts"
        );
        Ok(())
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), ArtifactError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        debug!(path = %path.display(), "Wrote artifact file");
        Ok(())
    }

    /// Load the pair; `Ok(None)` when neither file exists
    pub fn load(&self) -> Result<Option<ModelArtifact>, ArtifactError> {
        let model_path = self.model_path();
        let encoder_path = self.encoder_path();

        match (model_path.exists(), encoder_path.exists()) {
            (false, false) => return Ok(None),
            (true, false) => {
                return Err(ArtifactError::PairingMismatch(format!(
                    "{ENCODER_FILE} is missing"
                )))
            }
            (false, true) => {
                return Err(ArtifactError::PairingMismatch(format!(
                    "{MODEL_FILE} is missing"
                )))
            }
            (true, true) => {}
        }

        let model: ModelFile = serde_json::from_str(&fs::read_to_string(&model_path)?)?;
        let encoders: EncoderFile = serde_json::from_str(&fs::read_to_string(&encoder_path)?)?;

        if model.generation != encoders.generation {
            return Err(ArtifactError::PairingMismatch(format!(
                "model generation {} does not match encoder generation {}",
                model.generation, encoders.generation
            )));
        }

        let recomputed = generation_id(&model.forest, &encoders.encoders)?;
        if recomputed != model.generation {
            return Err(ArtifactError::PairingMismatch(format!(
                "stored generation {} does not match contents ({recomputed})",
                model.generation
            )));
        }

        model.forest.validate()?;

        info!(generation = %model.generation, "Loaded model artifacts");
        Ok(Some(ModelArtifact {
            generation: model.generation,
            trained_at: model.trained_at,
            forest: model.forest,
            encoders: encoders.encoders,
        }))
    }
}
