//! Supervised training on self-play examples.

use std::time::Instant;

use chess_core::Move;
use predictor::{PolicyValuePredictor, StepParams, TrainingTarget};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::registry::ModelRegistry;
use crate::types::{
    now_secs, EpochMetrics, ModelMetadata, ModelVersion, SessionStatus, TrainingConfig,
    TrainingExample, TrainingSession,
};

/// How a training run ended.
#[derive(Debug)]
pub enum TrainOutcome<P> {
    Completed {
        predictor: P,
        metrics: Vec<EpochMetrics>,
    },
    /// Stopped between batches; the partial epoch is not reported
    Cancelled {
        predictor: P,
        epochs_completed: u32,
        metrics: Vec<EpochMetrics>,
    },
}

impl<P> TrainOutcome<P> {
    pub fn metrics(&self) -> &[EpochMetrics] {
        match self {
            TrainOutcome::Completed { metrics, .. } | TrainOutcome::Cancelled { metrics, .. } => {
                metrics
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TrainOutcome::Cancelled { .. })
    }
}

/// An example split into the aligned slices the predictor trains on.
struct Prepared<'a> {
    encoding: &'a [f32],
    moves: Vec<Move>,
    policy: Vec<f32>,
    value: f32,
}

impl<'a> Prepared<'a> {
    fn new(example: &'a TrainingExample) -> Self {
        let (moves, policy) = example.policy.iter().copied().unzip();
        Self {
            encoding: &example.encoding,
            moves,
            policy,
            value: example.value,
        }
    }

    fn target(&self) -> TrainingTarget<'_> {
        TrainingTarget {
            encoding: self.encoding,
            legal_moves: &self.moves,
            policy: &self.policy,
            value: self.value,
        }
    }
}

/// Train `predictor` on `examples` for `config.epochs` epochs.
///
/// `on_epoch` receives the metrics of every completed epoch.
pub fn train<P, F>(
    mut predictor: P,
    examples: &[TrainingExample],
    config: &TrainingConfig,
    rng: &mut ChaCha20Rng,
    cancel: &CancelToken,
    mut on_epoch: F,
) -> Result<TrainOutcome<P>>
where
    P: PolicyValuePredictor,
    F: FnMut(&EpochMetrics),
{
    if config.epochs == 0 {
        return Ok(TrainOutcome::Completed {
            predictor,
            metrics: Vec::new(),
        });
    }
    config.validate()?;
    if examples.is_empty() {
        return Err(PipelineError::Validation(
            "no training examples".into(),
        ));
    }

    let prepared: Vec<Prepared<'_>> = examples.iter().map(Prepared::new).collect();
    let mut order: Vec<usize> = (0..prepared.len()).collect();
    let params = StepParams {
        learning_rate: config.learning_rate,
        value_weight: config.value_weight,
    };
    let num_batches = prepared.len().div_ceil(config.batch_size);
    let mut metrics = Vec::with_capacity(config.epochs as usize);

    info!(
        examples = examples.len(),
        epochs = config.epochs,
        batch_size = config.batch_size,
        learning_rate = config.learning_rate,
        device = predictor.device(),
        "Starting training"
    );

    for epoch in 1..=config.epochs {
        let started = Instant::now();
        order.shuffle(rng);

        let (mut total, mut policy, mut value) = (0.0f32, 0.0f32, 0.0f32);
        for chunk in order.chunks(config.batch_size) {
            if cancel.is_cancelled() {
                info!(
                    epoch,
                    epochs_completed = epoch - 1,
                    "Training cancelled"
                );
                return Ok(TrainOutcome::Cancelled {
                    predictor,
                    epochs_completed: epoch - 1,
                    metrics,
                });
            }

            let batch: Vec<TrainingTarget<'_>> =
                chunk.iter().map(|&i| prepared[i].target()).collect();

            let mut attempt = 0;
            let loss = loop {
                match predictor.train_step(&batch, params) {
                    Ok(loss) => break loss,
                    Err(e) if e.is_transient() && attempt < config.max_retries => {
                        attempt += 1;
                        warn!(epoch, attempt, error = %e, "Transient training failure, retrying batch");
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            total += loss.total;
            policy += loss.policy;
            value += loss.value;
        }

        let n = num_batches as f32;
        let epoch_metrics = EpochMetrics {
            epoch,
            total_loss: total / n,
            policy_loss: policy / n,
            value_loss: value / n,
            duration_secs: started.elapsed().as_secs_f64(),
            device: predictor.device().to_string(),
            timestamp: now_secs(),
        };
        debug!(
            epoch,
            total_loss = epoch_metrics.total_loss,
            policy_loss = epoch_metrics.policy_loss,
            value_loss = epoch_metrics.value_loss,
            secs = format!("{:.2}", epoch_metrics.duration_secs),
            "Epoch complete"
        );
        on_epoch(&epoch_metrics);
        metrics.push(epoch_metrics);
    }

    Ok(TrainOutcome::Completed { predictor, metrics })
}

/// A completed, registered training session.
#[derive(Debug)]
pub struct SessionReport<P> {
    pub predictor: P,
    pub version: ModelVersion,
    pub metrics: Vec<EpochMetrics>,
}

/// Train under a recorded session and register the result as the next
/// version of `family`.
///
/// Cancellation marks the session cancelled, registers nothing and returns
/// `PipelineError::Cancelled`.
#[allow(clippy::too_many_arguments)]
pub fn run_session<P, F>(
    registry: &ModelRegistry,
    family: &str,
    predictor: P,
    session_id: &str,
    examples: &[TrainingExample],
    config: &TrainingConfig,
    rng: &mut ChaCha20Rng,
    cancel: &CancelToken,
    mut on_epoch: F,
) -> Result<SessionReport<P>>
where
    P: PolicyValuePredictor,
    F: FnMut(&EpochMetrics),
{
    let store = registry.store();
    store.create_session(&TrainingSession {
        id: session_id.to_string(),
        config: config.clone(),
        status: SessionStatus::Running,
        epochs: Vec::new(),
        positions: examples.len(),
        model: None,
        error: None,
        started_at: now_secs(),
        finished_at: None,
    })?;

    let mut persist_error = None;
    let outcome = train(predictor, examples, config, rng, cancel, |metrics| {
        if persist_error.is_none() {
            if let Err(e) = store.append_epoch(session_id, metrics) {
                persist_error = Some(e);
            }
        }
        on_epoch(metrics);
    });

    let outcome = match (outcome, persist_error) {
        (Ok(outcome), None) => outcome,
        (Ok(_), Some(e)) => return fail_session(registry, session_id, e.into()),
        (Err(e), _) => return fail_session(registry, session_id, e),
    };

    let (predictor, metrics) = match outcome {
        TrainOutcome::Completed { predictor, metrics } => (predictor, metrics),
        TrainOutcome::Cancelled { .. } => {
            store.finish_session(session_id, SessionStatus::Cancelled, None, None)?;
            return Err(PipelineError::Cancelled);
        }
    };

    let metadata = ModelMetadata {
        training_date: now_secs(),
        session_id: Some(session_id.to_string()),
        positions: examples.len(),
        epochs: metrics.len() as u32,
        final_loss: metrics.last().map(|m| m.total_loss),
        win_rate: None,
        device: predictor.device().to_string(),
    };
    let version = match registry.register(family, &predictor, metadata) {
        Ok(version) => version,
        Err(e) => return fail_session(registry, session_id, e),
    };
    store.finish_session(
        session_id,
        SessionStatus::Completed,
        Some(&version.id),
        None,
    )?;

    info!(
        session = session_id,
        model = %version.id,
        epochs = metrics.len(),
        final_loss = ?version.metadata.final_loss,
        "Training session complete"
    );

    Ok(SessionReport {
        predictor,
        version,
        metrics,
    })
}

fn fail_session<T>(registry: &ModelRegistry, session_id: &str, err: PipelineError) -> Result<T> {
    let message = err.to_string();
    if let Err(e) =
        registry
            .store()
            .finish_session(session_id, SessionStatus::Failed, None, Some(&message))
    {
        warn!(session = session_id, error = %e, "Failed to record session failure");
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use chess_core::{encode, Position};
    use predictor::{LinearPredictor, LossBreakdown, Prediction, PredictorError};
    use rand::SeedableRng;
    use std::sync::Arc;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    fn examples(n: u32) -> Vec<TrainingExample> {
        let pos = Position::startpos();
        let legal = pos.legal_moves();
        (0..n)
            .map(|i| {
                let hot = (i as usize) % legal.len();
                TrainingExample {
                    encoding: encode(&pos),
                    policy: legal
                        .iter()
                        .enumerate()
                        .map(|(j, &m)| (m, if j == hot { 1.0 } else { 0.0 }))
                        .collect(),
                    value: 1.0,
                    fen: pos.fen(),
                    session_id: "s".into(),
                    move_index: i,
                    ply: 0,
                }
            })
            .collect()
    }

    fn config(epochs: u32) -> TrainingConfig {
        TrainingConfig {
            epochs,
            batch_size: 4,
            learning_rate: 0.005,
            ..TrainingConfig::default()
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    /// Wraps a linear model and scripts failures or cancellation.
    #[derive(Debug)]
    struct Scripted {
        inner: LinearPredictor,
        transient_failures: u32,
        fatal: bool,
        cancel_after_step: Option<CancelToken>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                inner: LinearPredictor::new(3),
                transient_failures: 0,
                fatal: false,
                cancel_after_step: None,
            }
        }
    }

    impl PolicyValuePredictor for Scripted {
        fn infer(
            &self,
            encoding: &[f32],
            moves: &[Move],
        ) -> std::result::Result<Prediction, PredictorError> {
            self.inner.infer(encoding, moves)
        }

        fn train_step(
            &mut self,
            batch: &[TrainingTarget<'_>],
            params: StepParams,
        ) -> std::result::Result<LossBreakdown, PredictorError> {
            if self.fatal {
                return Err(PredictorError::Training("out of memory".into()));
            }
            if self.transient_failures > 0 {
                self.transient_failures -= 1;
                return Err(PredictorError::Transient("device busy".into()));
            }
            let loss = self.inner.train_step(batch, params)?;
            if let Some(token) = &self.cancel_after_step {
                token.cancel();
            }
            Ok(loss)
        }

        fn to_bytes(&self) -> std::result::Result<Vec<u8>, PredictorError> {
            self.inner.to_bytes()
        }

        fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, PredictorError> {
            Ok(Self {
                inner: LinearPredictor::from_bytes(bytes)?,
                ..Self::new()
            })
        }
    }

    #[test]
    fn test_zero_epochs_is_a_no_op() {
        let model = LinearPredictor::new(1);
        let outcome = train(
            model.clone(),
            &[],
            &config(0),
            &mut rng(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap();
        match outcome {
            TrainOutcome::Completed { predictor, metrics } => {
                assert!(metrics.is_empty());
                assert_eq!(predictor, model);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_empty_examples_rejected() {
        let err = train(
            LinearPredictor::new(1),
            &[],
            &config(2),
            &mut rng(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_reports_every_epoch() {
        let mut seen = Vec::new();
        let outcome = train(
            LinearPredictor::new(1),
            &examples(10),
            &config(3),
            &mut rng(),
            &CancelToken::new(),
            |m| seen.push(m.epoch),
        )
        .unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
        let metrics = outcome.metrics();
        assert_eq!(metrics.len(), 3);
        for m in metrics {
            assert_eq!(m.device, "cpu");
            assert!(m.total_loss.is_finite());
            assert!((m.total_loss - (m.policy_loss + m.value_loss)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_loss_decreases_on_a_fixed_target() {
        let data = vec![examples(1).remove(0)];
        let cfg = TrainingConfig {
            epochs: 20,
            batch_size: 1,
            learning_rate: 0.005,
            ..TrainingConfig::default()
        };
        let outcome = train(
            LinearPredictor::new(1),
            &data,
            &cfg,
            &mut rng(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap();
        let metrics = outcome.metrics();
        assert!(metrics.last().unwrap().total_loss < metrics[0].total_loss);
    }

    #[test]
    fn test_transient_batch_failures_are_retried() {
        let mut model = Scripted::new();
        model.transient_failures = 2;
        let outcome = train(
            model,
            &examples(4),
            &config(1),
            &mut rng(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap();
        assert_eq!(outcome.metrics().len(), 1);
    }

    #[test]
    fn test_fatal_failure_escalates() {
        let mut model = Scripted::new();
        model.fatal = true;
        let err = train(
            model,
            &examples(4),
            &config(1),
            &mut rng(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Predictor(PredictorError::Training(_))));
    }

    #[test]
    fn test_cancel_after_first_batch() {
        let cancel = CancelToken::new();
        let mut model = Scripted::new();
        model.cancel_after_step = Some(cancel.clone());

        let outcome = train(model, &examples(12), &config(3), &mut rng(), &cancel, |_| {})
            .unwrap();
        match outcome {
            TrainOutcome::Cancelled {
                epochs_completed,
                metrics,
                ..
            } => {
                assert_eq!(epochs_completed, 0);
                assert!(metrics.is_empty());
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn test_session_registers_next_version() {
        let registry = registry();
        let data = examples(8);
        let mut epochs_seen = 0;
        let report = run_session(
            &registry,
            "zerochess",
            LinearPredictor::new(1),
            "session-1",
            &data,
            &config(2),
            &mut rng(),
            &CancelToken::new(),
            |_| epochs_seen += 1,
        )
        .unwrap();

        assert_eq!(epochs_seen, 2);
        assert_eq!(report.version.id.to_string(), "zerochess_v1");
        assert_eq!(report.version.metadata.positions, 8);
        assert_eq!(report.version.metadata.epochs, 2);

        let session = registry.store().get_session("session-1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.epochs.len(), 2);
        assert_eq!(session.model, Some(report.version.id.clone()));

        let restored: LinearPredictor = registry.load_predictor(&report.version.id).unwrap();
        assert_eq!(restored, report.predictor);
    }

    #[test]
    fn test_cancelled_session_registers_nothing() {
        let registry = registry();
        let cancel = CancelToken::new();
        let mut model = Scripted::new();
        model.cancel_after_step = Some(cancel.clone());

        let err = run_session(
            &registry,
            "zerochess",
            model,
            "session-2",
            &examples(12),
            &config(3),
            &mut rng(),
            &cancel,
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(registry.list(None).unwrap().is_empty());
        let session = registry.store().get_session("session-2").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
    }

    #[test]
    fn test_failed_session_is_recorded() {
        let registry = registry();
        let mut model = Scripted::new();
        model.fatal = true;

        let err = run_session(
            &registry,
            "zerochess",
            model,
            "session-3",
            &examples(4),
            &config(1),
            &mut rng(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::Predictor(_)));
        let session = registry.store().get_session("session-3").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.unwrap().contains("out of memory"));
    }
}
