//! zerochess - command-line front end for the training pipeline.
//!
//! Subcommands:
//! - `self-play`: play games with the active model and store the examples
//! - `train`: self-play, train, register and (optionally) evaluate a new version
//! - `evaluate`: pit a challenger against the champion and promote on success
//! - `models`, `history`, `summary`: registry management and reports

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};

use pipeline::analytics;
use pipeline::config::{central_config, Cli, Command, ModelsCommand, PipelineSettings, SelfPlayArgs};
use pipeline::jobs::JobController;
use pipeline::registry::ModelRegistry;
use pipeline::self_play::generate_batch;
use pipeline::storage::{SqliteStore, Store};
use pipeline::types::{next_id, JobKind, JobState, JobStatus, ModelId};
use pipeline::CancelToken;
use predictor::LinearPredictor;

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn progress_bar(len: u64, unit: &str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len);
    let template = format!("{{spinner:.green}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} {{msg}}");
    bar.set_style(
        ProgressStyle::default_bar()
            .template(&template)?
            .progress_chars("#>-"),
    );
    Ok(bar)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.validate()?;

    init_tracing(&cli.log_level)?;
    info!(db = %cli.db, family = %cli.family, "zerochess starting");

    let mut settings = PipelineSettings::from_config(central_config());
    settings.family = cli.family.clone();

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::new(&cli.db).with_context(|| format!("Failed to open database {}", cli.db))?,
    );
    let registry = ModelRegistry::new(store);

    match cli.command {
        Command::SelfPlay(args) => self_play(registry, args, &settings).await,
        Command::Train(args) => {
            let job = args.training_job(&settings);
            let jobs = controller(registry, &settings);
            let id = jobs.start_training(job)?;
            info!(job = %id, "Training job started");
            let status = follow_job(&jobs, JobKind::Training, &id).await?;
            finish_job(&jobs, status)
        }
        Command::Evaluate(args) => {
            let job = args.evaluation_job(&settings)?;
            let jobs = controller(registry, &settings);
            let id = jobs.start_evaluation(job)?;
            info!(job = %id, "Evaluation job started");
            let status = follow_job(&jobs, JobKind::Evaluation, &id).await?;
            finish_job(&jobs, status)
        }
        Command::Models(command) => models(&registry, command, &settings.family),
        Command::History { limit } => {
            print_json(&analytics::model_history(registry.store().as_ref(), limit)?)
        }
        Command::Summary { limit } => {
            let store = registry.store().as_ref();
            print_json(&json!({
                "training": analytics::training_summary(store, limit)?,
                "evaluation": analytics::evaluation_summary(store, limit)?,
            }))
        }
    }
}

fn controller(registry: ModelRegistry, settings: &PipelineSettings) -> JobController<LinearPredictor> {
    JobController::new(registry, settings.family.clone(), Arc::new(LinearPredictor::new))
}

/// Mirror a job slot onto a progress bar until it reaches a terminal state.
/// Ctrl-C cancels the job; the loop still waits for the worker to stop.
async fn follow_job(
    jobs: &JobController<LinearPredictor>,
    kind: JobKind,
    id: &str,
) -> Result<JobStatus> {
    let bar = progress_bar(100, "%")?;
    let mut updates = jobs.subscribe(kind);
    let mut cancel_sent = false;

    loop {
        let status = updates.borrow_and_update().clone();
        bar.set_position(u64::from(status.progress));
        bar.set_message(status.message.clone());
        if status.state.is_terminal() {
            bar.finish_and_clear();
            return Ok(status);
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    bar.abandon();
                    return Err(anyhow!("{} job channel closed", kind.as_str()));
                }
            }
            interrupted = signal::ctrl_c(), if !cancel_sent => {
                interrupted.context("Failed to listen for ctrl+c")?;
                warn!("Interrupt received, cancelling {} job...", kind.as_str());
                if let Err(e) = jobs.cancel_job(kind, id) {
                    warn!(error = %e, "Cancel request ignored");
                }
                cancel_sent = true;
            }
        }
    }
}

fn finish_job(jobs: &JobController<LinearPredictor>, status: JobStatus) -> Result<()> {
    print_json(&json!({
        "job": status,
        "active": jobs.registry().get_active()?,
    }))?;
    match status.state {
        JobState::Failed => Err(anyhow!(
            "{} job failed: {}",
            status.kind.as_str(),
            status.error.unwrap_or_default()
        )),
        _ => Ok(()),
    }
}

async fn self_play(registry: ModelRegistry, args: SelfPlayArgs, settings: &PipelineSettings) -> Result<()> {
    let self_play = args.self_play_settings(settings);
    let cancel = CancelToken::new();

    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping self-play...");
            interrupt.cancel();
        }
    });

    let bar = progress_bar(u64::from(args.games), "games")?;
    let worker_bar = bar.clone();
    let outcome = tokio::task::spawn_blocking(move || -> Result<_> {
        let (predictor, model) = match registry.active_id()? {
            Some(id) => (registry.load_predictor::<LinearPredictor>(&id)?, Some(id)),
            None => {
                warn!("No active model; playing with freshly initialised weights");
                (LinearPredictor::new(args.seed), None)
            }
        };

        let session_id = next_id("selfplay");
        let mut rng = ChaCha20Rng::seed_from_u64(args.seed);
        let batch = generate_batch(
            &predictor,
            args.games,
            args.simulations,
            &session_id,
            &self_play,
            &mut rng,
            &cancel,
            |done, _| worker_bar.set_position(u64::from(done)),
        )?;
        registry.store().save_examples(&batch.examples)?;
        Ok((batch, model))
    })
    .await?;
    watcher.abort();

    let (batch, model) = match outcome {
        Ok(result) => result,
        Err(e) => {
            bar.abandon();
            return Err(e);
        }
    };
    bar.finish_and_clear();

    let (white, black, draws) = batch.tally();
    let plies: u32 = batch.games.iter().map(|g| g.plies).sum();
    info!(
        session = %batch.session_id,
        games = batch.games.len(),
        examples = batch.examples.len(),
        "Self-play batch stored"
    );
    print_json(&json!({
        "session_id": batch.session_id,
        "model": model.map(|m: ModelId| m.to_string()),
        "games": batch.games.len(),
        "examples": batch.examples.len(),
        "white_wins": white,
        "black_wins": black,
        "draws": draws,
        "average_plies": plies as f64 / batch.games.len().max(1) as f64,
    }))
}

fn models(registry: &ModelRegistry, command: ModelsCommand, family: &str) -> Result<()> {
    match command {
        ModelsCommand::List { all } => {
            let versions = registry.list(if all { None } else { Some(family) })?;
            let active = registry.active_id()?;
            let rows: Vec<_> = versions
                .iter()
                .map(|v| {
                    json!({
                        "id": v.id,
                        "active": active.as_ref() == Some(&v.id),
                        "created_at": v.created_at,
                        "metadata": v.metadata,
                    })
                })
                .collect();
            print_json(&rows)
        }
        ModelsCommand::Activate { id } => {
            let id: ModelId = id.parse()?;
            let pointer = registry.activate(&id)?;
            info!(model = %id, "Model activated");
            print_json(&pointer)
        }
        ModelsCommand::Delete { id } => {
            let id: ModelId = id.parse()?;
            registry.delete(&id)?;
            info!(model = %id, "Model deleted");
            Ok(())
        }
    }
}
