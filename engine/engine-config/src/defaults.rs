//! Default configuration values loaded from config.defaults.toml.
//!
//! The defaults file is embedded at compile time so the binary and every
//! library crate agree on the same values.

use once_cell::sync::Lazy;
use serde::Deserialize;

/// The embedded defaults TOML file (loaded at compile time)
const DEFAULTS_TOML: &str = include_str!("../../../config.defaults.toml");

/// Parsed defaults structure (parsed once at first use)
static DEFAULTS: Lazy<DefaultsConfig> = Lazy::new(|| {
    toml::from_str(DEFAULTS_TOML).expect("config.defaults.toml should be valid TOML")
});

// ============================================================================
// Internal structs for parsing config.defaults.toml
// ============================================================================

#[derive(Debug, Deserialize)]
struct DefaultsConfig {
    common: CommonDefaults,
    mcts: MctsDefaults,
    self_play: SelfPlayDefaults,
    training: TrainingDefaults,
    evaluation: EvaluationDefaults,
}

#[derive(Debug, Deserialize)]
struct CommonDefaults {
    data_dir: String,
    db_file: String,
    log_level: String,
    model_family: String,
}

#[derive(Debug, Deserialize)]
struct MctsDefaults {
    c_puct: f64,
    dirichlet_alpha: f64,
    dirichlet_epsilon: f64,
    temperature: f64,
    temp_threshold: u32,
    late_temperature: f64,
    persist_cache: bool,
}

#[derive(Debug, Deserialize)]
struct SelfPlayDefaults {
    num_games: u32,
    num_simulations: u32,
    max_plies: u32,
}

#[derive(Debug, Deserialize)]
struct TrainingDefaults {
    epochs: u32,
    batch_size: usize,
    learning_rate: f64,
    value_weight: f64,
    max_retries: u32,
    device: String,
    seed: u64,
}

#[derive(Debug, Deserialize)]
struct EvaluationDefaults {
    num_games: u32,
    num_simulations: u32,
    win_threshold: f64,
    max_plies: u32,
    max_retries: u32,
    auto_evaluate: bool,
}

// ============================================================================
// Public accessor functions
// ============================================================================

// Common
pub fn data_dir() -> &'static str {
    &DEFAULTS.common.data_dir
}
pub fn db_file() -> &'static str {
    &DEFAULTS.common.db_file
}
pub fn log_level() -> &'static str {
    &DEFAULTS.common.log_level
}
pub fn model_family() -> &'static str {
    &DEFAULTS.common.model_family
}

// MCTS
pub fn c_puct() -> f64 {
    DEFAULTS.mcts.c_puct
}
pub fn dirichlet_alpha() -> f64 {
    DEFAULTS.mcts.dirichlet_alpha
}
pub fn dirichlet_epsilon() -> f64 {
    DEFAULTS.mcts.dirichlet_epsilon
}
pub fn temperature() -> f64 {
    DEFAULTS.mcts.temperature
}
pub fn temp_threshold() -> u32 {
    DEFAULTS.mcts.temp_threshold
}
pub fn late_temperature() -> f64 {
    DEFAULTS.mcts.late_temperature
}
pub fn persist_cache() -> bool {
    DEFAULTS.mcts.persist_cache
}

// Self-play
pub fn self_play_games() -> u32 {
    DEFAULTS.self_play.num_games
}
pub fn self_play_simulations() -> u32 {
    DEFAULTS.self_play.num_simulations
}
pub fn self_play_max_plies() -> u32 {
    DEFAULTS.self_play.max_plies
}

// Training
pub fn epochs() -> u32 {
    DEFAULTS.training.epochs
}
pub fn batch_size() -> usize {
    DEFAULTS.training.batch_size
}
pub fn learning_rate() -> f64 {
    DEFAULTS.training.learning_rate
}
pub fn value_weight() -> f64 {
    DEFAULTS.training.value_weight
}
pub fn training_max_retries() -> u32 {
    DEFAULTS.training.max_retries
}
pub fn device() -> &'static str {
    &DEFAULTS.training.device
}
pub fn seed() -> u64 {
    DEFAULTS.training.seed
}

// Evaluation
pub fn eval_games() -> u32 {
    DEFAULTS.evaluation.num_games
}
pub fn eval_simulations() -> u32 {
    DEFAULTS.evaluation.num_simulations
}
pub fn win_threshold() -> f64 {
    DEFAULTS.evaluation.win_threshold
}
pub fn eval_max_plies() -> u32 {
    DEFAULTS.evaluation.max_plies
}
pub fn eval_max_retries() -> u32 {
    DEFAULTS.evaluation.max_retries
}
pub fn auto_evaluate() -> bool {
    DEFAULTS.evaluation.auto_evaluate
}
