//! Trained-model persistence over a string-keyed blob store.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::ml::ensemble::FamilyFailure;
use crate::ml::model::{Ensemble, ModelBundle, ModelFamily};
use crate::types::FeatureName;

pub const KEY_TRAINED_MODEL: &str = "trained_model";
pub const KEY_ALL_MODELS: &str = "all_trained_models";
pub const KEY_FEATURE_LIST: &str = "feature_list";
pub const KEY_MODEL_INFO: &str = "model_info";

/// Headline metadata for a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: ModelFamily,
    pub train_date: DateTime<Utc>,
    pub accuracy: f64,
    pub avg_precision: f64,
    pub families: Vec<ModelFamily>,
    pub n_features: usize,
    pub train_samples: usize,
    pub window_size: usize,
    pub forecast_horizon: usize,
}

/// Everything a training run produces and inference consumes.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub best: ModelBundle,
    pub ensemble: Ensemble,
    pub info: ModelInfo,
    /// Families that failed during this run. Not persisted.
    pub failures: Vec<FamilyFailure>,
}

impl TrainedModel {
    pub fn feature_list(&self) -> &[FeatureName] {
        self.ensemble.feature_list()
    }
}

pub trait BlobStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Blob store on an embedded sled database.
pub struct SledBlobStore {
    db: sled::Db,
}

impl SledBlobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        debug!("Opened model store at {}", path.as_ref().display());
        Ok(Self { db })
    }
}

impl BlobStore for SledBlobStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, bytes)?;
        self.db.flush()?;
        Ok(())
    }
}

/// Process-local blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.get(key).cloned())
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Reads and writes a [`TrainedModel`] as four JSON blobs.
pub struct ModelStore<S: BlobStore> {
    blobs: S,
}

impl<S: BlobStore> ModelStore<S> {
    pub fn new(blobs: S) -> Self {
        Self { blobs }
    }

    fn read<T: DeserializeOwned>(&self, key: &'static str) -> Result<Option<T>, StoreError> {
        match self.blobs.load(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Codec {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &'static str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.blobs.store(key, &bytes)
    }

    pub fn put(&self, model: &TrainedModel) -> Result<(), StoreError> {
        self.write(KEY_ALL_MODELS, &model.ensemble.bundles())?;
        self.write(KEY_FEATURE_LIST, &model.ensemble.feature_list())?;
        self.write(KEY_TRAINED_MODEL, &model.best)?;
        self.write(KEY_MODEL_INFO, &model.info)?;
        info!(
            "Stored {} model(s), best {}, {} features",
            model.ensemble.len(),
            model.best.family,
            model.ensemble.feature_list().len()
        );
        Ok(())
    }

    /// `None` when nothing has been stored; an error when only part of a
    /// model is present or a blob fails to decode.
    pub fn get(&self) -> Result<Option<TrainedModel>, StoreError> {
        let best: Option<ModelBundle> = self.read(KEY_TRAINED_MODEL)?;
        let bundles: Option<Vec<ModelBundle>> = self.read(KEY_ALL_MODELS)?;
        let feature_list: Option<Vec<FeatureName>> = self.read(KEY_FEATURE_LIST)?;
        let info: Option<ModelInfo> = self.read(KEY_MODEL_INFO)?;

        if best.is_none() && bundles.is_none() && feature_list.is_none() && info.is_none() {
            return Ok(None);
        }

        let best = best.ok_or(StoreError::Incomplete(KEY_TRAINED_MODEL))?;
        let bundles = bundles.ok_or(StoreError::Incomplete(KEY_ALL_MODELS))?;
        let feature_list = feature_list.ok_or(StoreError::Incomplete(KEY_FEATURE_LIST))?;
        let info = info.ok_or(StoreError::Incomplete(KEY_MODEL_INFO))?;
        let ensemble = Ensemble::new(bundles, feature_list).ok_or(StoreError::Incomplete(KEY_ALL_MODELS))?;

        Ok(Some(TrainedModel {
            best,
            ensemble,
            info,
            failures: Vec::new(),
        }))
    }

    pub fn info(&self) -> Result<Option<ModelInfo>, StoreError> {
        self.read(KEY_MODEL_INFO)
    }
}
