//! ZeroChess training pipeline.
//!
//! The loop that improves the chess model:
//!
//! 1. **Self-play** ([`self_play`]): the active model plays itself with PUCT
//!    search and every position becomes a training example
//! 2. **Training** ([`trainer`]): mini-batch updates on the stored examples,
//!    with per-epoch metrics and a new registered version at the end
//! 3. **Evaluation** ([`evaluator`]): the new version plays the active one
//!    with alternating colours and is promoted above the win threshold
//! 4. **Registry** ([`registry`]): versioned weights, the active pointer and
//!    the promotion history, all in [`storage`]
//!
//! [`jobs::JobController`] runs training and evaluation as cancellable
//! background jobs with progress reporting; [`analytics`] summarises what
//! the store holds.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use pipeline::registry::ModelRegistry;
//! use pipeline::storage::SqliteStore;
//! use pipeline::types::ModelMetadata;
//! use predictor::LinearPredictor;
//!
//! let registry = ModelRegistry::new(Arc::new(SqliteStore::in_memory().unwrap()));
//! let v1 = registry
//!     .register("zerochess", &LinearPredictor::new(1), ModelMetadata::default())
//!     .unwrap();
//! registry.activate(&v1.id).unwrap();
//! assert_eq!(registry.active_id().unwrap(), Some(v1.id));
//! ```

pub mod analytics;
pub mod cancel;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod jobs;
pub mod registry;
pub mod self_play;
pub mod storage;
pub mod trainer;
pub mod types;

pub use cancel::CancelToken;
pub use error::{PipelineError, Result};
pub use evaluator::{evaluate, evaluate_and_promote, EvaluationSettings};
pub use jobs::{EvaluationJob, JobController, TrainingJob};
pub use registry::ModelRegistry;
pub use self_play::{generate_batch, generate_game, SelfPlaySettings};
pub use trainer::{run_session, train, TrainOutcome};
