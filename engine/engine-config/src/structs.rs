//! Configuration struct definitions.
//!
//! All config structs with serde deserialization support and default values.

use crate::defaults;
use serde::Deserialize;
use std::path::PathBuf;

// ============================================================================
// Serde default functions (required for #[serde(default = "...")])
// These call the accessor functions from defaults module
// ============================================================================

fn d_data_dir() -> String {
    defaults::data_dir().into()
}
fn d_db_file() -> String {
    defaults::db_file().into()
}
fn d_log_level() -> String {
    defaults::log_level().into()
}
fn d_model_family() -> String {
    defaults::model_family().into()
}
fn d_c_puct() -> f64 {
    defaults::c_puct()
}
fn d_dirichlet_alpha() -> f64 {
    defaults::dirichlet_alpha()
}
fn d_dirichlet_epsilon() -> f64 {
    defaults::dirichlet_epsilon()
}
fn d_temperature() -> f64 {
    defaults::temperature()
}
fn d_temp_threshold() -> u32 {
    defaults::temp_threshold()
}
fn d_late_temperature() -> f64 {
    defaults::late_temperature()
}
fn d_persist_cache() -> bool {
    defaults::persist_cache()
}
fn d_sp_games() -> u32 {
    defaults::self_play_games()
}
fn d_sp_sims() -> u32 {
    defaults::self_play_simulations()
}
fn d_sp_max_plies() -> u32 {
    defaults::self_play_max_plies()
}
fn d_epochs() -> u32 {
    defaults::epochs()
}
fn d_batch_size() -> usize {
    defaults::batch_size()
}
fn d_lr() -> f64 {
    defaults::learning_rate()
}
fn d_value_weight() -> f64 {
    defaults::value_weight()
}
fn d_train_retries() -> u32 {
    defaults::training_max_retries()
}
fn d_device() -> String {
    defaults::device().into()
}
fn d_seed() -> u64 {
    defaults::seed()
}
fn d_eval_games() -> u32 {
    defaults::eval_games()
}
fn d_eval_sims() -> u32 {
    defaults::eval_simulations()
}
fn d_win_threshold() -> f64 {
    defaults::win_threshold()
}
fn d_eval_max_plies() -> u32 {
    defaults::eval_max_plies()
}
fn d_eval_retries() -> u32 {
    defaults::eval_max_retries()
}
fn d_auto_evaluate() -> bool {
    defaults::auto_evaluate()
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Root configuration structure matching config.toml
#[derive(Debug, Deserialize, Default, Clone)]
pub struct CentralConfig {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub mcts: MctsConfig,
    #[serde(default)]
    pub self_play: SelfPlayConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// Common configuration shared by all components
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommonConfig {
    #[serde(default = "d_data_dir")]
    pub data_dir: String,
    /// SQLite file name, relative to `data_dir` unless absolute
    #[serde(default = "d_db_file")]
    pub db_file: String,
    #[serde(default = "d_log_level")]
    pub log_level: String,
    /// Family name new model versions are registered under
    #[serde(default = "d_model_family")]
    pub model_family: String,
}

impl CommonConfig {
    /// Full path of the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.db_file)
    }
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir().into(),
            db_file: defaults::db_file().into(),
            log_level: defaults::log_level().into(),
            model_family: defaults::model_family().into(),
        }
    }
}

/// MCTS (Monte Carlo Tree Search) configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MctsConfig {
    #[serde(default = "d_c_puct")]
    pub c_puct: f64,
    #[serde(default = "d_dirichlet_alpha")]
    pub dirichlet_alpha: f64,
    #[serde(default = "d_dirichlet_epsilon")]
    pub dirichlet_epsilon: f64,
    #[serde(default = "d_temperature")]
    pub temperature: f64,
    /// Ply at which self-play switches to `late_temperature` (0 disables)
    #[serde(default = "d_temp_threshold")]
    pub temp_threshold: u32,
    #[serde(default = "d_late_temperature")]
    pub late_temperature: f64,
    #[serde(default = "d_persist_cache")]
    pub persist_cache: bool,
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            c_puct: defaults::c_puct(),
            dirichlet_alpha: defaults::dirichlet_alpha(),
            dirichlet_epsilon: defaults::dirichlet_epsilon(),
            temperature: defaults::temperature(),
            temp_threshold: defaults::temp_threshold(),
            late_temperature: defaults::late_temperature(),
            persist_cache: defaults::persist_cache(),
        }
    }
}

/// Self-play generation configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SelfPlayConfig {
    #[serde(default = "d_sp_games")]
    pub num_games: u32,
    #[serde(default = "d_sp_sims")]
    pub num_simulations: u32,
    /// Games reaching this many plies are adjudicated drawn
    #[serde(default = "d_sp_max_plies")]
    pub max_plies: u32,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            num_games: defaults::self_play_games(),
            num_simulations: defaults::self_play_simulations(),
            max_plies: defaults::self_play_max_plies(),
        }
    }
}

/// Training configuration for the trainer
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrainingConfig {
    #[serde(default = "d_epochs")]
    pub epochs: u32,
    #[serde(default = "d_batch_size")]
    pub batch_size: usize,
    #[serde(default = "d_lr")]
    pub learning_rate: f64,
    #[serde(default = "d_value_weight")]
    pub value_weight: f64,
    /// Retries for transient predictor failures on a single batch
    #[serde(default = "d_train_retries")]
    pub max_retries: u32,
    #[serde(default = "d_device")]
    pub device: String,
    /// Seed for weight initialization, shuffling and self-play sampling
    #[serde(default = "d_seed")]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: defaults::epochs(),
            batch_size: defaults::batch_size(),
            learning_rate: defaults::learning_rate(),
            value_weight: defaults::value_weight(),
            max_retries: defaults::training_max_retries(),
            device: defaults::device().into(),
            seed: defaults::seed(),
        }
    }
}

/// Evaluation configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EvaluationConfig {
    #[serde(default = "d_eval_games")]
    pub num_games: u32,
    #[serde(default = "d_eval_sims")]
    pub num_simulations: u32,
    #[serde(default = "d_win_threshold")]
    pub win_threshold: f64,
    #[serde(default = "d_eval_max_plies")]
    pub max_plies: u32,
    #[serde(default = "d_eval_retries")]
    pub max_retries: u32,
    /// Evaluate every newly trained model against the active one
    #[serde(default = "d_auto_evaluate")]
    pub auto_evaluate: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            num_games: defaults::eval_games(),
            num_simulations: defaults::eval_simulations(),
            win_threshold: defaults::win_threshold(),
            max_plies: defaults::eval_max_plies(),
            max_retries: defaults::eval_max_retries(),
            auto_evaluate: defaults::auto_evaluate(),
        }
    }
}
