//! The policy-value predictor contract.
//!
//! A predictor maps an encoded position plus its legal moves to a prior over
//! those moves and a scalar value estimate, and can be trained from batches of
//! self-play targets. The search only ever sees this trait.

use chess_core::Move;
use thiserror::Error;

/// Errors raised by predictors.
#[derive(Debug, Clone, Error)]
pub enum PredictorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Training step failed: {0}")]
    Training(String),

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// A hiccup worth retrying (e.g. a device briefly unavailable).
    #[error("Transient predictor failure: {0}")]
    Transient(String),
}

impl PredictorError {
    /// Whether the caller may retry the failed game or batch.
    pub fn is_transient(&self) -> bool {
        matches!(self, PredictorError::Transient(_))
    }
}

/// Output of a single inference.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Prior probability per legal move, aligned with the `legal_moves`
    /// slice passed to [`PolicyValuePredictor::infer`].
    pub priors: Vec<f32>,

    /// Value estimate for the side to move, in [-1, 1].
    pub value: f32,
}

/// One training target.
#[derive(Debug, Clone, Copy)]
pub struct TrainingTarget<'a> {
    pub encoding: &'a [f32],
    pub legal_moves: &'a [Move],
    /// Target probability per legal move, aligned with `legal_moves`.
    pub policy: &'a [f32],
    /// Game outcome from the side to move: -1, 0 or 1.
    pub value: f32,
}

/// Optimizer parameters for one step.
#[derive(Debug, Clone, Copy)]
pub struct StepParams {
    pub learning_rate: f32,
    /// Weight of the value loss in the combined loss.
    pub value_weight: f32,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            value_weight: 1.0,
        }
    }
}

/// Mean losses over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossBreakdown {
    pub total: f32,
    pub policy: f32,
    pub value: f32,
}

/// Trait for policy-value predictors.
///
/// Implementations:
/// - [`UniformPredictor`](crate::UniformPredictor): uniform priors, zero value (for testing)
/// - [`LinearPredictor`](crate::LinearPredictor): trainable reference model
///
/// `train_step` must be atomic: on error the parameters are left exactly as
/// they were before the call.
pub trait PolicyValuePredictor: Send + Sync {
    /// Evaluate a single encoded position.
    fn infer(&self, encoding: &[f32], legal_moves: &[Move]) -> Result<Prediction, PredictorError>;

    /// Apply one optimizer step over `batch`.
    fn train_step(
        &mut self,
        batch: &[TrainingTarget<'_>],
        params: StepParams,
    ) -> Result<LossBreakdown, PredictorError>;

    /// Serialize the parameters into an opaque snapshot.
    fn to_bytes(&self) -> Result<Vec<u8>, PredictorError>;

    /// Restore a predictor from a snapshot produced by `to_bytes`.
    fn from_bytes(bytes: &[u8]) -> Result<Self, PredictorError>
    where
        Self: Sized;

    /// Label of the device the predictor runs on.
    fn device(&self) -> &str {
        "cpu"
    }
}

/// Softmax over `logits` in place, numerically stabilised.
pub(crate) fn softmax_in_place(logits: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for l in logits.iter_mut() {
        *l = (*l - max).exp();
        sum += *l;
    }
    if sum > 0.0 {
        for l in logits.iter_mut() {
            *l /= sum;
        }
    }
}

/// Cross-entropy `-sum(t * ln p)` with probabilities clamped away from zero.
pub(crate) fn cross_entropy(target: &[f32], probs: &[f32]) -> f32 {
    target
        .iter()
        .zip(probs)
        .filter(|(t, _)| **t > 0.0)
        .map(|(t, p)| -t * p.max(1e-8).ln())
        .sum()
}

pub(crate) fn validate_target(
    target: &TrainingTarget<'_>,
    encoded_len: usize,
) -> Result<(), PredictorError> {
    if target.encoding.len() != encoded_len {
        return Err(PredictorError::InvalidInput(format!(
            "encoding has {} values, expected {}",
            target.encoding.len(),
            encoded_len
        )));
    }
    if target.policy.len() != target.legal_moves.len() {
        return Err(PredictorError::InvalidInput(format!(
            "policy has {} entries for {} legal moves",
            target.policy.len(),
            target.legal_moves.len()
        )));
    }
    Ok(())
}
