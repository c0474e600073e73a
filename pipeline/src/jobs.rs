//! Background jobs: the training pipeline and standalone evaluations.
//!
//! The controller owns two slots, one per [`JobKind`]. Each slot publishes
//! its [`JobStatus`] through a `watch` channel. A started job runs on a
//! blocking worker thread and reports progress over an mpsc channel to a
//! supervisor task, which owns every write to the status record and settles
//! the final state once the worker returns (or panics).

use std::sync::{Arc, Mutex};

use predictor::PolicyValuePredictor;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::evaluator::{evaluate_and_promote, EvaluationSettings};
use crate::registry::ModelRegistry;
use crate::self_play::{generate_batch, SelfPlaySettings};
use crate::trainer::run_session;
use crate::types::{next_id, now_secs, JobKind, JobState, JobStatus, ModelId, TrainingConfig};

/// Builds a fresh predictor from a seed when the registry has no model yet.
pub type PredictorFactory<P> = Arc<dyn Fn(u64) -> P + Send + Sync>;

/// Parameters of one training pipeline run.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub num_games: u32,
    pub num_simulations: u32,
    pub self_play: SelfPlaySettings,
    pub training: TrainingConfig,
    /// Evaluate the new version against the active model
    pub auto_evaluate: bool,
    pub evaluation: EvaluationSettings,
    pub seed: u64,
}

impl TrainingJob {
    pub fn validate(&self) -> Result<()> {
        if self.num_games == 0 {
            return Err(PipelineError::Validation(
                "num_games must be positive".into(),
            ));
        }
        if self.num_simulations == 0 {
            return Err(PipelineError::Validation(
                "num_simulations must be positive".into(),
            ));
        }
        self.training.validate()?;
        if self.auto_evaluate {
            self.evaluation.validate()?;
        }
        Ok(())
    }
}

/// Parameters of a standalone evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvaluationJob {
    /// Defaults to the latest version of the controller's family
    pub challenger: Option<ModelId>,
    /// Defaults to the active model
    pub champion: Option<ModelId>,
    pub settings: EvaluationSettings,
}

struct Progress {
    percent: u8,
    message: String,
}

/// Worker-side handle for progress updates.
struct ProgressSink(mpsc::UnboundedSender<Progress>);

impl ProgressSink {
    fn report(&self, percent: u32, message: impl Into<String>) {
        // The supervisor outlives the worker; a closed channel only means
        // nobody is listening any more
        let _ = self.0.send(Progress {
            percent: percent.min(100) as u8,
            message: message.into(),
        });
    }
}

/// `start + span * done / total`, for progress inside a stage.
fn stage_percent(start: u32, span: u32, done: u32, total: u32) -> u32 {
    start + span * done / total.max(1)
}

struct Slot {
    status: watch::Sender<JobStatus>,
    cancel: Mutex<CancelToken>,
}

impl Slot {
    fn new(kind: JobKind) -> Self {
        let (status, _) = watch::channel(JobStatus::idle(kind));
        Self {
            status,
            cancel: Mutex::new(CancelToken::new()),
        }
    }

    /// Cancel the running job, if it is `expected` (or any job when `None`).
    ///
    /// Holds the token lock across the status check: `begin` swaps the
    /// token under the same lock, so the token cancelled here always
    /// belongs to the job that was observed running.
    fn cancel_running(&self, kind: JobKind, expected: Option<&str>) -> Result<String> {
        let token = self
            .cancel
            .lock()
            .map_err(|e| PipelineError::Storage(anyhow::anyhow!("Lock poisoned: {}", e)))?;

        let status = self.status.borrow();
        let running = match (&status.state, &status.id) {
            (JobState::Running, Some(id)) => id.clone(),
            _ => return Err(PipelineError::NotFound(format!("no running {kind} job"))),
        };
        if let Some(expected) = expected {
            if expected != running {
                return Err(PipelineError::NotFound(format!(
                    "{kind} job {expected} is not running"
                )));
            }
        }
        token.cancel();
        Ok(running)
    }

    /// Move the slot to Running under a fresh id and cancel token.
    fn begin(&self, kind: JobKind) -> Result<(String, CancelToken)> {
        let mut cancel = self
            .cancel
            .lock()
            .map_err(|e| PipelineError::Storage(anyhow::anyhow!("Lock poisoned: {}", e)))?;

        let id = next_id(kind.as_str());
        let mut started = false;
        self.status.send_if_modified(|status| {
            if status.state == JobState::Running {
                return false;
            }
            *status = JobStatus {
                id: Some(id.clone()),
                kind,
                state: JobState::Running,
                progress: 0,
                message: "starting".into(),
                error: None,
                started_at: Some(now_secs()),
                finished_at: None,
            };
            started = true;
            true
        });
        if !started {
            return Err(PipelineError::Conflict(format!(
                "a {kind} job is already running"
            )));
        }

        *cancel = CancelToken::new();
        Ok((id, cancel.clone()))
    }
}

struct Inner<P> {
    registry: ModelRegistry,
    family: String,
    factory: PredictorFactory<P>,
    training: Slot,
    evaluation: Slot,
}

impl<P> Inner<P> {
    fn slot(&self, kind: JobKind) -> &Slot {
        match kind {
            JobKind::Training => &self.training,
            JobKind::Evaluation => &self.evaluation,
        }
    }
}

/// Runs at most one training and one evaluation job at a time.
pub struct JobController<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for JobController<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PolicyValuePredictor + 'static> JobController<P> {
    pub fn new(registry: ModelRegistry, family: impl Into<String>, factory: PredictorFactory<P>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                family: family.into(),
                factory,
                training: Slot::new(JobKind::Training),
                evaluation: Slot::new(JobKind::Evaluation),
            }),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    /// Current status of a slot.
    pub fn status(&self, kind: JobKind) -> JobStatus {
        self.inner.slot(kind).status.borrow().clone()
    }

    /// Follow status changes of a slot.
    pub fn subscribe(&self, kind: JobKind) -> watch::Receiver<JobStatus> {
        self.inner.slot(kind).status.subscribe()
    }

    /// Resolves once the slot is no longer Running.
    pub async fn wait(&self, kind: JobKind) -> JobStatus {
        let mut rx = self.subscribe(kind);
        let settled = rx
            .wait_for(|status| status.state != JobState::Running)
            .await
            .map(|status| status.clone());
        match settled {
            Ok(status) => status,
            Err(_) => self.status(kind),
        }
    }

    /// Request cancellation of the running job of `kind`.
    pub fn cancel(&self, kind: JobKind) -> Result<()> {
        let id = self.inner.slot(kind).cancel_running(kind, None)?;
        info!(kind = %kind, job = %id, "Cancellation requested");
        Ok(())
    }

    /// Cancel job `id` only if it is still the running job of `kind`.
    pub fn cancel_job(&self, kind: JobKind, id: &str) -> Result<()> {
        self.inner.slot(kind).cancel_running(kind, Some(id))?;
        info!(kind = %kind, job = %id, "Cancellation requested");
        Ok(())
    }

    /// Start self-play, training, registration and (optionally) evaluation
    /// of the new version. Must be called from within a Tokio runtime.
    pub fn start_training(&self, job: TrainingJob) -> Result<String> {
        job.validate()?;
        let (id, cancel) = self.inner.training.begin(JobKind::Training)?;
        info!(job = %id, games = job.num_games, epochs = job.training.epochs, "Training job started");

        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        let worker = tokio::task::spawn_blocking(move || {
            run_training(&inner, &job, &cancel, &ProgressSink(tx))
        });
        self.supervise(JobKind::Training, worker, rx);
        Ok(id)
    }

    /// Start a standalone evaluation. Missing models are reported here rather
    /// than as a failed job.
    pub fn start_evaluation(&self, job: EvaluationJob) -> Result<String> {
        job.settings.validate()?;
        let registry = &self.inner.registry;
        let champion = match job.champion {
            Some(id) => registry.get(&id)?.id,
            None => registry
                .active_id()?
                .ok_or_else(|| PipelineError::NotFound("no active model to evaluate against".into()))?,
        };
        let challenger = match job.challenger {
            Some(id) => registry.get(&id)?.id,
            None => {
                registry
                    .latest(&self.inner.family)?
                    .ok_or_else(|| {
                        PipelineError::NotFound(format!(
                            "no models in family {}",
                            self.inner.family
                        ))
                    })?
                    .id
            }
        };

        let (id, cancel) = self.inner.evaluation.begin(JobKind::Evaluation)?;
        info!(job = %id, challenger = %challenger, champion = %champion, "Evaluation job started");

        let settings = job.settings;
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        let worker = tokio::task::spawn_blocking(move || {
            run_evaluation(&inner, &challenger, &champion, &settings, &cancel, &ProgressSink(tx))
        });
        self.supervise(JobKind::Evaluation, worker, rx);
        Ok(id)
    }

    fn supervise(
        &self,
        kind: JobKind,
        worker: JoinHandle<Result<String>>,
        mut progress: mpsc::UnboundedReceiver<Progress>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let slot = inner.slot(kind);

            // The worker drops its sender when it returns or unwinds
            while let Some(update) = progress.recv().await {
                debug!(kind = %kind, progress = update.percent, message = %update.message, "Job progress");
                slot.status.send_modify(|status| {
                    status.progress = update.percent;
                    status.message = update.message;
                });
            }

            let mut status = slot.status.borrow().clone();
            match worker.await {
                Ok(Ok(message)) => {
                    status.state = JobState::Completed;
                    status.progress = 100;
                    status.message = message;
                }
                Ok(Err(PipelineError::Cancelled)) => {
                    status.state = JobState::Cancelled;
                    status.message = "cancelled".into();
                }
                Ok(Err(e)) => {
                    error!(kind = %kind, error = %e, "Job failed");
                    status.state = JobState::Failed;
                    status.message = "failed".into();
                    status.error = Some(e.to_string());
                }
                Err(join_error) => {
                    error!(kind = %kind, error = %join_error, "Job worker panicked");
                    status.state = JobState::Failed;
                    status.message = "worker panicked".into();
                    status.error = Some(join_error.to_string());
                }
            }
            status.finished_at = Some(now_secs());

            if let Err(e) = inner.registry.store().save_job(&status) {
                warn!(kind = %kind, error = %e, "Failed to persist job record");
            }
            info!(
                kind = %kind,
                job = ?status.id,
                state = status.state.as_str(),
                message = %status.message,
                "Job finished"
            );
            slot.status.send_replace(status);
        });
    }
}

fn run_training<P: PolicyValuePredictor>(
    inner: &Inner<P>,
    job: &TrainingJob,
    cancel: &CancelToken,
    progress: &ProgressSink,
) -> Result<String> {
    let registry = &inner.registry;
    let mut rng = ChaCha20Rng::seed_from_u64(job.seed);

    progress.report(5, "loading model");
    let champion = registry.active_id()?;
    let predictor: P = match &champion {
        Some(id) => registry.load_predictor(id)?,
        None => (inner.factory)(job.seed),
    };

    let session_id = next_id("session");
    progress.report(10, "self-play");
    let batch = generate_batch(
        &predictor,
        job.num_games,
        job.num_simulations,
        &session_id,
        &job.self_play,
        &mut rng,
        cancel,
        |done, total| {
            progress.report(
                stage_percent(10, 30, done, total),
                format!("self-play game {done}/{total}"),
            )
        },
    )?;
    registry.store().save_examples(&batch.examples)?;
    progress.report(45, format!("stored {} positions", batch.examples.len()));

    progress.report(50, "training");
    let epochs = job.training.epochs;
    let report = run_session(
        registry,
        &inner.family,
        predictor,
        &session_id,
        &batch.examples,
        &job.training,
        &mut rng,
        cancel,
        |metrics| {
            progress.report(
                stage_percent(50, 25, metrics.epoch, epochs),
                format!("epoch {}/{} loss {:.4}", metrics.epoch, epochs, metrics.total_loss),
            )
        },
    )?;
    let new_id = report.version.id;
    progress.report(90, format!("registered {new_id}"));

    // From here on the new version exists, so a cancel only skips the
    // evaluation and the job still completes
    let message = match champion {
        Some(champion) if job.auto_evaluate => {
            let evaluated = evaluate_and_promote::<P, _>(
                registry,
                &new_id,
                &champion,
                &job.evaluation,
                true,
                cancel,
                |done, total| {
                    progress.report(
                        stage_percent(90, 9, done, total),
                        format!("evaluation game {done}/{total}"),
                    )
                },
            );
            match evaluated {
                Ok(result) if result.promoted => {
                    format!("{new_id} promoted over {champion} ({:.3})", result.win_rate)
                }
                Ok(result) => {
                    format!("{new_id} kept {champion} active ({:.3})", result.win_rate)
                }
                Err(PipelineError::Cancelled) => {
                    info!(model = %new_id, "Evaluation cancelled after registration");
                    format!("registered {new_id}; evaluation cancelled, {champion} stays active")
                }
                Err(e) => return Err(e),
            }
        }
        Some(_) => format!("registered {new_id}"),
        None => {
            registry.promote(&new_id, None, 1.0)?;
            format!("{new_id} activated as the first model")
        }
    };
    Ok(message)
}

fn run_evaluation<P: PolicyValuePredictor>(
    inner: &Inner<P>,
    challenger: &ModelId,
    champion: &ModelId,
    settings: &EvaluationSettings,
    cancel: &CancelToken,
    progress: &ProgressSink,
) -> Result<String> {
    progress.report(5, "loading models");
    let result = evaluate_and_promote::<P, _>(
        &inner.registry,
        challenger,
        champion,
        settings,
        false,
        cancel,
        |done, total| {
            progress.report(
                stage_percent(10, 90, done, total),
                format!("game {done}/{total}"),
            )
        },
    )?;
    Ok(format!(
        "{challenger} vs {champion}: +{} -{} ={} ({:.3}){}",
        result.wins,
        result.losses,
        result.draws,
        result.win_rate,
        if result.promoted { ", promoted" } else { "" }
    ))
}

#[cfg(test)]
mod tests;
