//! Versioned model snapshots and the active-model pointer.
//!
//! Snapshots are opaque predictor bytes stored with their metadata. Exactly
//! one version is active at a time; every change of the active pointer is
//! appended to the promotion history.

use std::sync::Arc;

use predictor::PolicyValuePredictor;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::storage::{DeleteOutcome, Store};
use crate::types::{ActivePointer, ModelId, ModelMetadata, ModelVersion, PromotionEntry};

#[derive(Clone)]
pub struct ModelRegistry {
    store: Arc<dyn Store>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Snapshot `predictor` as the next version of `family`.
    pub fn register<P: PolicyValuePredictor>(
        &self,
        family: &str,
        predictor: &P,
        metadata: ModelMetadata,
    ) -> Result<ModelVersion> {
        if family.is_empty() {
            return Err(PipelineError::Validation(
                "model family must not be empty".into(),
            ));
        }
        let blob = predictor.to_bytes()?;
        let version = self.store.insert_model(family, &blob, &metadata)?;
        info!(
            model = %version.id,
            bytes = blob.len(),
            positions = metadata.positions,
            "Registered model version"
        );
        Ok(version)
    }

    /// Restore the predictor stored under `id`.
    pub fn load_predictor<P: PolicyValuePredictor>(&self, id: &ModelId) -> Result<P> {
        let blob = self
            .store
            .model_blob(id)?
            .ok_or_else(|| PipelineError::NotFound(format!("model {id}")))?;
        Ok(P::from_bytes(&blob)?)
    }

    pub fn get(&self, id: &ModelId) -> Result<ModelVersion> {
        self.store
            .get_model(id)?
            .ok_or_else(|| PipelineError::NotFound(format!("model {id}")))
    }

    pub fn list(&self, family: Option<&str>) -> Result<Vec<ModelVersion>> {
        Ok(self.store.list_models(family)?)
    }

    pub fn latest(&self, family: &str) -> Result<Option<ModelVersion>> {
        Ok(self.store.latest_model(family)?)
    }

    pub fn get_active(&self) -> Result<Option<ActivePointer>> {
        Ok(self.store.get_active()?)
    }

    /// The active version with its metadata.
    pub fn active_model(&self) -> Result<Option<ModelVersion>> {
        self.active_id()?.map(|id| self.get(&id)).transpose()
    }

    pub fn active_id(&self) -> Result<Option<ModelId>> {
        Ok(self.get_active()?.map(|p| p.model))
    }

    /// Make `id` active by operator request.
    pub fn activate(&self, id: &ModelId) -> Result<ActivePointer> {
        let win_rate = self.get(id)?.metadata.win_rate.unwrap_or(0.0);
        let pointer = self.swap(id, win_rate, true)?;
        info!(model = %id, previous = ?pointer.previous, "Activated model");
        Ok(pointer)
    }

    /// Promote `challenger` after it beat `champion` (or became the first
    /// model of an empty registry).
    pub fn promote(
        &self,
        challenger: &ModelId,
        champion: Option<&ModelId>,
        win_rate: f64,
    ) -> Result<ActivePointer> {
        let pointer = self.swap(challenger, win_rate, false)?;
        if champion.is_some() && pointer.previous.as_ref() != champion {
            // Champion changed mid-evaluation; the challenger still takes over
            warn!(
                challenger = %challenger,
                expected = ?champion,
                replaced = ?pointer.previous,
                "Active model changed during evaluation"
            );
        }
        info!(model = %challenger, win_rate, "Promoted model");
        Ok(pointer)
    }

    fn swap(&self, model: &ModelId, win_rate: f64, manual: bool) -> Result<ActivePointer> {
        self.store
            .set_active(model, win_rate, manual)?
            .ok_or_else(|| PipelineError::NotFound(format!("model {model}")))
    }

    /// Delete a version. The active version cannot be deleted.
    pub fn delete(&self, id: &ModelId) -> Result<()> {
        match self.store.delete_model(id)? {
            DeleteOutcome::Deleted => {
                info!(model = %id, "Deleted model version");
                Ok(())
            }
            DeleteOutcome::NotFound => Err(PipelineError::NotFound(format!("model {id}"))),
            DeleteOutcome::Active => Err(PipelineError::Conflict(format!(
                "model {id} is active and cannot be deleted"
            ))),
        }
    }

    /// Promotion history, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<PromotionEntry>> {
        Ok(self.store.promotion_history(limit)?)
    }
}
