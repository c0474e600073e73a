//! Policy-value predictors for ZeroChess.
//!
//! The search and the pipeline depend only on [`PolicyValuePredictor`].
//! Two implementations ship with the crate:
//!
//! - [`UniformPredictor`]: uniform priors and a neutral value (for testing)
//! - [`LinearPredictor`]: a small trainable model with atomic SGD steps and a
//!   self-describing byte snapshot, used as the default model family

mod linear;
mod predictor;
mod uniform;

pub use linear::LinearPredictor;
pub use predictor::{
    LossBreakdown, PolicyValuePredictor, Prediction, PredictorError, StepParams, TrainingTarget,
};
pub use uniform::UniformPredictor;
