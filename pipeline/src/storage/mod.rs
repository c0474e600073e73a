//! Durable storage for the pipeline.
//!
//! Everything the pipeline persists goes through [`Store`]: self-play
//! examples, training sessions and their epoch metrics, evaluations, model
//! versions with their weight blobs, the active model pointer with its
//! promotion history, and job records.
//!
//! # Usage
//!
//! ```rust
//! use pipeline::storage::{SqliteStore, Store};
//!
//! let store = SqliteStore::in_memory().unwrap();
//! assert_eq!(store.count_examples(None).unwrap(), 0);
//! ```

mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;

use crate::types::{
    ActivePointer, EpochMetrics, EvaluationResult, JobStatus, ModelId, ModelMetadata,
    ModelVersion, PromotionEntry, SessionStatus, TrainingExample, TrainingSession,
};

/// Outcome of a model deletion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// The version is the active model and was kept
    Active,
}

/// Abstract interface for pipeline storage.
///
/// Implementations must be thread-safe: job workers call into the store from
/// blocking threads while the CLI reads from the async runtime.
pub trait Store: Send + Sync {
    // ---- examples ----

    /// Store a batch of examples in one transaction
    fn save_examples(&self, examples: &[TrainingExample]) -> Result<()>;

    /// Examples of a session, ordered by move index
    fn load_examples(&self, session_id: &str) -> Result<Vec<TrainingExample>>;

    fn count_examples(&self, session_id: Option<&str>) -> Result<usize>;

    // ---- training sessions ----

    fn create_session(&self, session: &TrainingSession) -> Result<()>;

    fn append_epoch(&self, session_id: &str, metrics: &EpochMetrics) -> Result<()>;

    fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        model: Option<&ModelId>,
        error: Option<&str>,
    ) -> Result<()>;

    fn get_session(&self, session_id: &str) -> Result<Option<TrainingSession>>;

    /// Most recent sessions first
    fn list_sessions(&self, limit: usize) -> Result<Vec<TrainingSession>>;

    fn count_sessions(&self) -> Result<usize>;

    /// Epochs recorded across all sessions
    fn count_epochs(&self) -> Result<usize>;

    // ---- evaluations ----

    fn save_evaluation(&self, result: &EvaluationResult) -> Result<()>;

    /// Most recent evaluations first
    fn list_evaluations(&self, limit: usize) -> Result<Vec<EvaluationResult>>;

    fn count_evaluations(&self) -> Result<usize>;

    // ---- models ----

    /// Insert a new version numbered `max(version) + 1` for the family,
    /// atomically.
    fn insert_model(
        &self,
        family: &str,
        blob: &[u8],
        metadata: &ModelMetadata,
    ) -> Result<ModelVersion>;

    fn get_model(&self, id: &ModelId) -> Result<Option<ModelVersion>>;

    fn model_blob(&self, id: &ModelId) -> Result<Option<Vec<u8>>>;

    /// Ordered by family, then version ascending
    fn list_models(&self, family: Option<&str>) -> Result<Vec<ModelVersion>>;

    fn latest_model(&self, family: &str) -> Result<Option<ModelVersion>>;

    fn delete_model(&self, id: &ModelId) -> Result<DeleteOutcome>;

    // ---- active pointer ----

    fn get_active(&self) -> Result<Option<ActivePointer>>;

    /// Make `model` active and append the history entry in one transaction.
    /// The outgoing champion is read inside that transaction and returned as
    /// `previous`. Returns None, changing nothing, if the model does not
    /// exist.
    fn set_active(&self, model: &ModelId, win_rate: f64, manual: bool)
        -> Result<Option<ActivePointer>>;

    /// Newest first
    fn promotion_history(&self, limit: usize) -> Result<Vec<PromotionEntry>>;

    // ---- jobs ----

    fn save_job(&self, status: &JobStatus) -> Result<()>;

    /// Most recent jobs first
    fn list_jobs(&self, limit: usize) -> Result<Vec<JobStatus>>;
}
