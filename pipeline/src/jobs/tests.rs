//! Tests for the job controller.

use super::*;
use crate::storage::SqliteStore;
use crate::types::{ModelMetadata, SessionStatus};
use mcts::MctsConfig;
use predictor::LinearPredictor;

fn controller() -> JobController<LinearPredictor> {
    let registry = ModelRegistry::new(Arc::new(SqliteStore::in_memory().unwrap()));
    JobController::new(registry, "zerochess", Arc::new(LinearPredictor::new))
}

fn small_training_job() -> TrainingJob {
    TrainingJob {
        num_games: 1,
        num_simulations: 5,
        self_play: SelfPlaySettings {
            mcts: MctsConfig::for_training(),
            max_plies: 6,
            max_retries: 0,
        },
        training: TrainingConfig {
            epochs: 2,
            batch_size: 8,
            learning_rate: 0.001,
            ..TrainingConfig::default()
        },
        auto_evaluate: true,
        evaluation: EvaluationSettings {
            num_games: 2,
            num_simulations: 5,
            win_threshold: 0.0,
            max_plies: 6,
            ..EvaluationSettings::default()
        },
        seed: 7,
    }
}

fn long_training_job() -> TrainingJob {
    TrainingJob {
        num_games: 100,
        num_simulations: 20,
        self_play: SelfPlaySettings {
            max_plies: 500,
            ..SelfPlaySettings::default()
        },
        ..small_training_job()
    }
}

/// Minimal self-play feeding a training stage that would run for a long time.
fn long_training_stage_job() -> TrainingJob {
    TrainingJob {
        training: TrainingConfig {
            epochs: 10_000,
            batch_size: 8,
            ..small_training_job().training
        },
        ..small_training_job()
    }
}

async fn wait_for_progress(jobs: &JobController<LinearPredictor>, kind: JobKind, percent: u8) {
    let mut updates = jobs.subscribe(kind);
    let status = updates
        .wait_for(|s| s.progress >= percent || s.state.is_terminal())
        .await
        .unwrap()
        .clone();
    assert_eq!(status.state, JobState::Running, "{status:?}");
}

#[test]
fn test_stage_percent() {
    assert_eq!(stage_percent(10, 30, 0, 4), 10);
    assert_eq!(stage_percent(10, 30, 2, 4), 25);
    assert_eq!(stage_percent(10, 30, 4, 4), 40);
    assert_eq!(stage_percent(50, 25, 1, 0), 75);
}

#[tokio::test]
async fn test_slots_start_idle() {
    let jobs = controller();
    for kind in [JobKind::Training, JobKind::Evaluation] {
        let status = jobs.status(kind);
        assert_eq!(status.state, JobState::Idle);
        assert_eq!(status.kind, kind);
        assert!(status.id.is_none());
    }
}

#[tokio::test]
async fn test_first_training_run_activates_model() {
    let jobs = controller();
    let id = jobs.start_training(small_training_job()).unwrap();
    assert_eq!(jobs.status(JobKind::Training).state, JobState::Running);

    let status = jobs.wait(JobKind::Training).await;
    assert_eq!(status.state, JobState::Completed, "{status:?}");
    assert_eq!(status.id.as_deref(), Some(id.as_str()));
    assert_eq!(status.progress, 100);
    assert!(status.finished_at.is_some());

    let registry = jobs.registry();
    let active = registry.get_active().unwrap().unwrap();
    assert_eq!(active.model, ModelId::new("zerochess", 1));
    assert_eq!(active.win_rate, 1.0);
    assert_eq!(active.previous, None);
    assert!(registry.store().count_examples(None).unwrap() > 0);
    assert_eq!(registry.store().count_sessions().unwrap(), 1);

    let records = registry.store().list_jobs(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, JobState::Completed);
}

#[tokio::test]
async fn test_second_run_evaluates_and_promotes() {
    let jobs = controller();
    jobs.start_training(small_training_job()).unwrap();
    jobs.wait(JobKind::Training).await;

    // a terminal slot accepts a new start
    jobs.start_training(small_training_job()).unwrap();
    let status = jobs.wait(JobKind::Training).await;
    assert_eq!(status.state, JobState::Completed, "{status:?}");

    let registry = jobs.registry();
    assert_eq!(
        registry.active_id().unwrap(),
        Some(ModelId::new("zerochess", 2))
    );
    assert_eq!(registry.store().count_evaluations().unwrap(), 1);
    let evaluation = &registry.store().list_evaluations(1).unwrap()[0];
    assert!(evaluation.automatic);
    assert!(evaluation.promoted);
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let jobs = controller();
    jobs.start_training(long_training_job()).unwrap();
    let err = jobs.start_training(small_training_job()).unwrap_err();
    assert!(matches!(err, PipelineError::Conflict(_)));

    jobs.cancel(JobKind::Training).unwrap();
    jobs.wait(JobKind::Training).await;
}

#[tokio::test]
async fn test_cancel_running_job() {
    let jobs = controller();
    jobs.start_training(long_training_job()).unwrap();
    jobs.cancel(JobKind::Training).unwrap();

    let status = jobs.wait(JobKind::Training).await;
    assert_eq!(status.state, JobState::Cancelled);
    assert!(status.error.is_none());
    assert!(jobs.registry().list(None).unwrap().is_empty());

    let records = jobs.registry().store().list_jobs(10).unwrap();
    assert_eq!(records[0].state, JobState::Cancelled);
}

#[tokio::test]
async fn test_cancel_idle_slot_is_not_found() {
    let jobs = controller();
    let err = jobs.cancel(JobKind::Evaluation).unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn test_invalid_job_rejected_before_start() {
    let jobs = controller();
    let job = TrainingJob {
        num_games: 0,
        ..small_training_job()
    };
    assert!(matches!(
        jobs.start_training(job),
        Err(PipelineError::Validation(_))
    ));
    assert_eq!(jobs.status(JobKind::Training).state, JobState::Idle);
}

#[tokio::test]
async fn test_panicking_worker_fails_job() {
    let registry = ModelRegistry::new(Arc::new(SqliteStore::in_memory().unwrap()));
    let jobs: JobController<LinearPredictor> = JobController::new(
        registry,
        "zerochess",
        Arc::new(|_: u64| -> LinearPredictor { panic!("weights unavailable") }),
    );
    jobs.start_training(small_training_job()).unwrap();

    let status = jobs.wait(JobKind::Training).await;
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.is_some());
}

#[tokio::test]
async fn test_evaluation_requires_active_model() {
    let jobs = controller();
    let err = jobs.start_evaluation(EvaluationJob::default()).unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
    assert_eq!(jobs.status(JobKind::Evaluation).state, JobState::Idle);
}

#[tokio::test]
async fn test_evaluation_job_promotes_latest() {
    let jobs = controller();
    let registry = jobs.registry();
    let model = LinearPredictor::new(4);
    let v1 = registry
        .register("zerochess", &model, ModelMetadata::default())
        .unwrap();
    let v2 = registry
        .register("zerochess", &model, ModelMetadata::default())
        .unwrap();
    registry.activate(&v1.id).unwrap();

    let job = EvaluationJob {
        settings: EvaluationSettings {
            num_games: 2,
            num_simulations: 5,
            win_threshold: 0.5,
            max_plies: 8,
            ..EvaluationSettings::default()
        },
        ..EvaluationJob::default()
    };
    jobs.start_evaluation(job).unwrap();
    let status = jobs.wait(JobKind::Evaluation).await;

    assert_eq!(status.state, JobState::Completed, "{status:?}");
    assert!(status.message.contains("promoted"));
    assert_eq!(registry.active_id().unwrap(), Some(v2.id));

    let evaluation = &registry.store().list_evaluations(1).unwrap()[0];
    assert!(!evaluation.automatic);
    assert_eq!(evaluation.win_rate, 0.5);
}

#[tokio::test]
async fn test_cancel_during_training_registers_nothing() {
    let jobs = controller();
    jobs.start_training(long_training_stage_job()).unwrap();
    wait_for_progress(&jobs, JobKind::Training, 50).await;
    jobs.cancel(JobKind::Training).unwrap();

    let status = jobs.wait(JobKind::Training).await;
    assert_eq!(status.state, JobState::Cancelled, "{status:?}");
    let registry = jobs.registry();
    assert!(registry.list(None).unwrap().is_empty());
    assert!(registry.get_active().unwrap().is_none());

    let sessions = registry.store().list_sessions(10).unwrap();
    assert_eq!(sessions[0].status, SessionStatus::Cancelled);
    assert!(sessions[0].model.is_none());
}

#[tokio::test]
async fn test_cancel_during_evaluation_keeps_registered_version() {
    let jobs = controller();
    jobs.start_training(small_training_job()).unwrap();
    jobs.wait(JobKind::Training).await;

    let job = TrainingJob {
        evaluation: EvaluationSettings {
            num_games: 50,
            num_simulations: 50,
            win_threshold: 0.0,
            max_plies: 500,
            ..EvaluationSettings::default()
        },
        ..small_training_job()
    };
    jobs.start_training(job).unwrap();
    wait_for_progress(&jobs, JobKind::Training, 90).await;
    jobs.cancel(JobKind::Training).unwrap();

    let status = jobs.wait(JobKind::Training).await;
    assert_eq!(status.state, JobState::Completed, "{status:?}");
    assert!(status.message.contains("evaluation cancelled"), "{}", status.message);

    let registry = jobs.registry();
    assert_eq!(registry.list(None).unwrap().len(), 2);
    assert_eq!(
        registry.active_id().unwrap(),
        Some(ModelId::new("zerochess", 1))
    );
    assert_eq!(registry.store().count_evaluations().unwrap(), 0);
}

#[tokio::test]
async fn test_out_of_range_learning_rate_rejected() {
    let jobs = controller();
    let mut job = small_training_job();
    job.training.learning_rate = 50.0;
    assert!(matches!(
        jobs.start_training(job),
        Err(PipelineError::Validation(_))
    ));
    assert_eq!(jobs.status(JobKind::Training).state, JobState::Idle);
}

#[tokio::test]
async fn test_cancel_job_ignores_stale_id() {
    let jobs = controller();
    let first = jobs.start_training(small_training_job()).unwrap();
    jobs.wait(JobKind::Training).await;

    let second = jobs.start_training(long_training_job()).unwrap();
    let err = jobs.cancel_job(JobKind::Training, &first).unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
    assert_eq!(jobs.status(JobKind::Training).state, JobState::Running);

    jobs.cancel_job(JobKind::Training, &second).unwrap();
    let status = jobs.wait(JobKind::Training).await;
    assert_eq!(status.state, JobState::Cancelled);
    assert_eq!(status.id.as_deref(), Some(second.as_str()));
}
