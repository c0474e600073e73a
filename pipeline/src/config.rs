//! Command-line configuration for the `zerochess` binary.
//!
//! Defaults come from the central config (config.toml plus `ZEROCHESS_*`
//! environment overrides); CLI arguments take highest priority.

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use engine_config::{load_config, CentralConfig};
use mcts::MctsConfig;
use once_cell::sync::Lazy;
use tracing::level_filters::LevelFilter;

use crate::evaluator::EvaluationSettings;
use crate::jobs::{EvaluationJob, TrainingJob};
use crate::self_play::SelfPlaySettings;
use crate::types::{ModelId, TrainingConfig};

// Load central config once at startup
static CENTRAL_CONFIG: Lazy<CentralConfig> = Lazy::new(load_config);

/// The loaded central configuration.
pub fn central_config() -> &'static CentralConfig {
    &CENTRAL_CONFIG
}

// Default value functions that read from central config
fn default_db_path() -> String {
    CENTRAL_CONFIG.common.db_path().display().to_string()
}

fn default_log_level() -> String {
    CENTRAL_CONFIG.common.log_level.clone()
}

fn default_family() -> String {
    CENTRAL_CONFIG.common.model_family.clone()
}

fn default_sp_games() -> u32 {
    CENTRAL_CONFIG.self_play.num_games
}

fn default_sp_simulations() -> u32 {
    CENTRAL_CONFIG.self_play.num_simulations
}

fn default_sp_max_plies() -> u32 {
    CENTRAL_CONFIG.self_play.max_plies
}

fn default_epochs() -> u32 {
    CENTRAL_CONFIG.training.epochs
}

fn default_batch_size() -> usize {
    CENTRAL_CONFIG.training.batch_size
}

fn default_learning_rate() -> f64 {
    CENTRAL_CONFIG.training.learning_rate
}

fn default_seed() -> u64 {
    CENTRAL_CONFIG.training.seed
}

fn default_eval_games() -> u32 {
    CENTRAL_CONFIG.evaluation.num_games
}

fn default_eval_simulations() -> u32 {
    CENTRAL_CONFIG.evaluation.num_simulations
}

fn default_win_threshold() -> f64 {
    CENTRAL_CONFIG.evaluation.win_threshold
}

/// Everything a pipeline run needs, resolved from the central config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub family: String,
    pub self_play_games: u32,
    pub self_play_simulations: u32,
    pub self_play: SelfPlaySettings,
    pub training: TrainingConfig,
    pub evaluation: EvaluationSettings,
    pub auto_evaluate: bool,
    pub seed: u64,
}

impl PipelineSettings {
    pub fn from_config(config: &CentralConfig) -> Self {
        let mcts = &config.mcts;
        let search = MctsConfig::for_training()
            .with_simulations(config.self_play.num_simulations)
            .with_c_puct(mcts.c_puct as f32)
            .with_dirichlet(mcts.dirichlet_alpha as f32, mcts.dirichlet_epsilon as f32)
            .with_temperature(mcts.temperature as f32)
            .with_temp_schedule(mcts.temp_threshold, mcts.late_temperature as f32)
            .with_persistent_cache(mcts.persist_cache);

        Self {
            family: config.common.model_family.clone(),
            self_play_games: config.self_play.num_games,
            self_play_simulations: config.self_play.num_simulations,
            self_play: SelfPlaySettings {
                mcts: search,
                max_plies: config.self_play.max_plies,
                max_retries: config.training.max_retries,
            },
            training: TrainingConfig {
                epochs: config.training.epochs,
                batch_size: config.training.batch_size,
                learning_rate: config.training.learning_rate as f32,
                value_weight: config.training.value_weight as f32,
                max_retries: config.training.max_retries,
            },
            evaluation: EvaluationSettings {
                num_games: config.evaluation.num_games,
                num_simulations: config.evaluation.num_simulations,
                win_threshold: config.evaluation.win_threshold,
                max_plies: config.evaluation.max_plies,
                max_retries: config.evaluation.max_retries,
                c_puct: mcts.c_puct as f32,
            },
            auto_evaluate: config.evaluation.auto_evaluate,
            seed: config.training.seed,
        }
    }

    /// A training job with every parameter taken from the config.
    pub fn training_job(&self) -> TrainingJob {
        TrainingJob {
            num_games: self.self_play_games,
            num_simulations: self.self_play_simulations,
            self_play: self.self_play.clone(),
            training: self.training.clone(),
            auto_evaluate: self.auto_evaluate,
            evaluation: self.evaluation.clone(),
            seed: self.seed,
        }
    }
}

fn check_range<T: PartialOrd + Display>(name: &str, value: T, range: RangeInclusive<T>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(anyhow!(
            "{} must be between {} and {}, got {}",
            name,
            range.start(),
            range.end(),
            value
        ))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "zerochess")]
#[command(about = "ZeroChess - self-play training pipeline for chess")]
#[command(
    long_about = "Generates self-play games with PUCT search, trains the policy-value model,
evaluates new versions against the active one and manages the model registry.

Configuration is loaded from config.toml with environment variable overrides.
CLI arguments take highest priority."
)]
pub struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true, default_value_t = default_db_path())]
    pub db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value_t = default_log_level())]
    pub log_level: String,

    /// Model family new versions are registered under
    #[arg(long, global = true, default_value_t = default_family())]
    pub family: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Play self-play games with the active model and store the examples
    SelfPlay(SelfPlayArgs),
    /// Run the training pipeline: self-play, training, registration, evaluation
    Train(TrainArgs),
    /// Evaluate a challenger against the champion and promote on success
    Evaluate(EvaluateArgs),
    /// Inspect and manage registered model versions
    #[command(subcommand)]
    Models(ModelsCommand),
    /// Show the active model and recent promotions
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show training and evaluation summaries
    Summary {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SelfPlayArgs {
    /// Number of games to play
    #[arg(long, default_value_t = default_sp_games())]
    pub games: u32,

    /// MCTS simulations per move
    #[arg(long, default_value_t = default_sp_simulations())]
    pub simulations: u32,

    /// Plies after which a game is adjudicated drawn
    #[arg(long, default_value_t = default_sp_max_plies())]
    pub max_plies: u32,

    #[arg(long, default_value_t = default_seed())]
    pub seed: u64,
}

impl SelfPlayArgs {
    pub fn validate(&self) -> Result<()> {
        check_range("games", self.games, 1..=100)?;
        check_range("simulations", self.simulations, 5..=1000)?;
        if self.max_plies == 0 {
            return Err(anyhow!("max_plies must be greater than 0"));
        }
        Ok(())
    }

    pub fn self_play_settings(&self, settings: &PipelineSettings) -> SelfPlaySettings {
        SelfPlaySettings {
            mcts: settings.self_play.mcts.clone().with_simulations(self.simulations),
            max_plies: self.max_plies,
            ..settings.self_play.clone()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Self-play games to generate before training
    #[arg(long, default_value_t = default_sp_games())]
    pub games: u32,

    /// MCTS simulations per self-play move
    #[arg(long, default_value_t = default_sp_simulations())]
    pub simulations: u32,

    #[arg(long, default_value_t = default_epochs())]
    pub epochs: u32,

    #[arg(long, default_value_t = default_batch_size())]
    pub batch_size: usize,

    #[arg(long, default_value_t = default_learning_rate())]
    pub learning_rate: f64,

    /// Skip evaluating the new version against the active model
    #[arg(long)]
    pub no_evaluate: bool,

    #[arg(long, default_value_t = default_seed())]
    pub seed: u64,
}

impl TrainArgs {
    pub fn validate(&self) -> Result<()> {
        check_range("games", self.games, 1..=100)?;
        check_range("simulations", self.simulations, 5..=1000)?;
        check_range("epochs", self.epochs, 1..=50)?;
        check_range("batch_size", self.batch_size, 8..=256)?;
        check_range("learning_rate", self.learning_rate, 0.0001..=0.1)?;
        Ok(())
    }

    pub fn training_job(&self, settings: &PipelineSettings) -> TrainingJob {
        let base = settings.training_job();
        TrainingJob {
            num_games: self.games,
            num_simulations: self.simulations,
            self_play: SelfPlaySettings {
                mcts: base.self_play.mcts.clone().with_simulations(self.simulations),
                ..base.self_play.clone()
            },
            training: TrainingConfig {
                epochs: self.epochs,
                batch_size: self.batch_size,
                learning_rate: self.learning_rate as f32,
                ..base.training.clone()
            },
            auto_evaluate: base.auto_evaluate && !self.no_evaluate,
            seed: self.seed,
            ..base
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    /// Challenger version (defaults to the latest of the family)
    #[arg(long)]
    pub challenger: Option<String>,

    /// Champion version (defaults to the active model)
    #[arg(long)]
    pub champion: Option<String>,

    #[arg(long, default_value_t = default_eval_games())]
    pub games: u32,

    #[arg(long, default_value_t = default_eval_simulations())]
    pub simulations: u32,

    /// Score the challenger needs for promotion
    #[arg(long, default_value_t = default_win_threshold())]
    pub threshold: f64,
}

impl EvaluateArgs {
    pub fn validate(&self) -> Result<()> {
        check_range("games", self.games, 1..=50)?;
        check_range("simulations", self.simulations, 5..=1000)?;
        check_range("threshold", self.threshold, 0.5..=1.0)?;
        Ok(())
    }

    pub fn evaluation_job(&self, settings: &PipelineSettings) -> Result<EvaluationJob> {
        let parse = |s: &Option<String>| -> Result<Option<ModelId>> {
            Ok(s.as_deref().map(ModelId::from_str).transpose()?)
        };
        Ok(EvaluationJob {
            challenger: parse(&self.challenger)?,
            champion: parse(&self.champion)?,
            settings: EvaluationSettings {
                num_games: self.games,
                num_simulations: self.simulations,
                win_threshold: self.threshold,
                ..settings.evaluation.clone()
            },
        })
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ModelsCommand {
    /// List registered versions of the family
    List {
        /// Include every family
        #[arg(long)]
        all: bool,
    },
    /// Make a version active
    Activate { id: String },
    /// Delete a version (the active one is refused)
    Delete { id: String },
}

impl Cli {
    pub fn validate(&self) -> Result<()> {
        if self.db.is_empty() {
            return Err(anyhow!("db path cannot be empty"));
        }
        if self.family.is_empty() {
            return Err(anyhow!("family cannot be empty"));
        }
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| anyhow!("invalid log level '{}'", self.log_level))?;

        match &self.command {
            Command::SelfPlay(args) => args.validate(),
            Command::Train(args) => args.validate(),
            Command::Evaluate(args) => args.validate(),
            Command::Models(_) | Command::History { .. } | Command::Summary { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("zerochess").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_follow_central_config() {
        let cli = parse(&["train"]);
        assert_eq!(cli.family, central_config().common.model_family);
        assert_eq!(cli.log_level, central_config().common.log_level);
        match cli.command {
            Command::Train(args) => {
                assert_eq!(args.games, central_config().self_play.num_games);
                assert_eq!(args.epochs, central_config().training.epochs);
                assert!(!args.no_evaluate);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_train_ranges() {
        assert!(parse(&["train", "--epochs", "3"]).validate().is_ok());
        assert!(parse(&["train", "--epochs", "0"]).validate().is_err());
        assert!(parse(&["train", "--epochs", "51"]).validate().is_err());
        assert!(parse(&["train", "--batch-size", "4"]).validate().is_err());
        assert!(parse(&["train", "--learning-rate", "0.5"]).validate().is_err());
        assert!(parse(&["train", "--games", "101"]).validate().is_err());
        assert!(parse(&["train", "--simulations", "4"]).validate().is_err());
    }

    #[test]
    fn test_evaluate_ranges_and_ids() {
        let cli = parse(&["evaluate", "--challenger", "zerochess_v3", "--threshold", "0.6"]);
        assert!(cli.validate().is_ok());
        let Command::Evaluate(args) = &cli.command else {
            panic!("expected evaluate");
        };
        let settings = PipelineSettings::from_config(&CentralConfig::default());
        let job = args.evaluation_job(&settings).unwrap();
        assert_eq!(job.challenger, Some(ModelId::new("zerochess", 3)));
        assert_eq!(job.champion, None);
        assert_eq!(job.settings.win_threshold, 0.6);

        assert!(parse(&["evaluate", "--threshold", "0.4"]).validate().is_err());
        assert!(parse(&["evaluate", "--games", "51"]).validate().is_err());

        let bad = parse(&["evaluate", "--champion", "nonsense"]);
        let Command::Evaluate(args) = &bad.command else {
            panic!("expected evaluate");
        };
        assert!(args.evaluation_job(&settings).is_err());
    }

    #[test]
    fn test_global_flags_and_log_level() {
        let cli = parse(&["summary", "--db", "/tmp/x.db", "--log-level", "debug"]);
        assert_eq!(cli.db, "/tmp/x.db");
        assert!(cli.validate().is_ok());
        assert!(parse(&["history", "--log-level", "chatty"]).validate().is_err());
    }

    #[test]
    fn test_models_subcommands() {
        let cli = parse(&["models", "activate", "zerochess_v2"]);
        match cli.command {
            Command::Models(ModelsCommand::Activate { id }) => assert_eq!(id, "zerochess_v2"),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            parse(&["models", "list"]).command,
            Command::Models(ModelsCommand::List { all: false })
        ));
    }

    #[test]
    fn test_settings_from_config() {
        let config = CentralConfig::default();
        let settings = PipelineSettings::from_config(&config);
        assert_eq!(settings.family, "zerochess");
        assert_eq!(settings.self_play.max_plies, 500);
        assert_eq!(settings.self_play.mcts.temp_threshold, 15);
        assert_eq!(settings.self_play.mcts.num_simulations, 100);
        assert_eq!(settings.training.batch_size, 64);
        assert_eq!(settings.evaluation.win_threshold, 0.55);
        assert!(settings.auto_evaluate);
    }

    #[test]
    fn test_train_args_override_settings() {
        let cli = parse(&[
            "train",
            "--games",
            "2",
            "--simulations",
            "12",
            "--epochs",
            "4",
            "--no-evaluate",
        ]);
        let Command::Train(args) = &cli.command else {
            panic!("expected train");
        };
        let settings = PipelineSettings::from_config(&CentralConfig::default());
        let job = args.training_job(&settings);
        assert_eq!(job.num_games, 2);
        assert_eq!(job.num_simulations, 12);
        assert_eq!(job.self_play.mcts.num_simulations, 12);
        assert_eq!(job.training.epochs, 4);
        assert!(!job.auto_evaluate);
        assert_eq!(job.self_play.max_plies, 500);
    }
}
