//! Pipeline error type.

use chess_core::RulesError;
use mcts::SearchError;
use predictor::PredictorError;
use thiserror::Error;

/// Errors surfaced by self-play, training, evaluation, the registry and jobs.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Predictor error: {0}")]
    Predictor(#[from] PredictorError),

    #[error("Search error: {0}")]
    Search(SearchError),

    #[error("Rules error: {0}")]
    Rules(#[from] RulesError),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the failed game or batch may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Predictor(e) if e.is_transient())
    }
}

impl From<SearchError> for PipelineError {
    /// Predictor failures keep their identity so retry logic can see them.
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Predictor(e) => PipelineError::Predictor(e),
            other => PipelineError::Search(other),
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Storage(err.into())
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
