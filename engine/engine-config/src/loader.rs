//! Configuration loading logic.
//!
//! Handles loading config from files and applying environment variable overrides.

use crate::CentralConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Standard locations to search for config.toml
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "config.toml",      // Current directory
    "../config.toml",   // Parent directory (when running from subdirectory)
    "/app/config.toml", // Docker container
];

/// Load the central configuration from config.toml.
///
/// Searches for config.toml in the following order:
/// 1. Path specified by ZEROCHESS_CONFIG environment variable
/// 2. Current directory (config.toml)
/// 3. Parent directory (../config.toml)
/// 4. Docker container path (/app/config.toml)
///
/// After loading, environment variable overrides are applied.
pub fn load_config() -> CentralConfig {
    if let Ok(path) = std::env::var("ZEROCHESS_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            info!("Loading config from ZEROCHESS_CONFIG: {}", path.display());
            return load_from_path(&path);
        }
        warn!(
            "ZEROCHESS_CONFIG={} not found, searching defaults",
            path.display()
        );
    }

    for path_str in CONFIG_SEARCH_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading config from {}", path.display());
            return load_from_path(&path);
        }
    }

    debug!("No config.toml found, using built-in defaults");
    apply_env_overrides(CentralConfig::default())
}

/// Load configuration from a specific path.
///
/// Unreadable or malformed files fall back to the built-in defaults.
pub fn load_from_path(path: &Path) -> CentralConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                apply_env_overrides(CentralConfig::default())
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}, using defaults", path.display(), e);
            apply_env_overrides(CentralConfig::default())
        }
    }
}

/// Macro to reduce env override boilerplate
macro_rules! env_override {
    // String field
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(v) = std::env::var($key) {
            $config.$section.$field = v;
        }
    };
    // Parseable field (u32, f64, bool, etc.)
    ($config:expr, $section:ident . $field:ident, $key:expr, parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = v;
        }
    };
}

/// Apply environment variable overrides to a configuration.
///
/// Environment variables follow the pattern: ZEROCHESS_<SECTION>_<KEY>.
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(mut config: CentralConfig) -> CentralConfig {
    // Common
    env_override!(config, common.data_dir, "ZEROCHESS_COMMON_DATA_DIR");
    env_override!(config, common.db_file, "ZEROCHESS_COMMON_DB_FILE");
    env_override!(config, common.log_level, "ZEROCHESS_COMMON_LOG_LEVEL");
    env_override!(config, common.model_family, "ZEROCHESS_COMMON_MODEL_FAMILY");

    // MCTS
    env_override!(config, mcts.c_puct, "ZEROCHESS_MCTS_C_PUCT", parse);
    env_override!(
        config,
        mcts.dirichlet_alpha,
        "ZEROCHESS_MCTS_DIRICHLET_ALPHA",
        parse
    );
    env_override!(
        config,
        mcts.dirichlet_epsilon,
        "ZEROCHESS_MCTS_DIRICHLET_EPSILON",
        parse
    );
    env_override!(config, mcts.temperature, "ZEROCHESS_MCTS_TEMPERATURE", parse);
    env_override!(
        config,
        mcts.temp_threshold,
        "ZEROCHESS_MCTS_TEMP_THRESHOLD",
        parse
    );
    env_override!(
        config,
        mcts.late_temperature,
        "ZEROCHESS_MCTS_LATE_TEMPERATURE",
        parse
    );
    env_override!(
        config,
        mcts.persist_cache,
        "ZEROCHESS_MCTS_PERSIST_CACHE",
        parse
    );

    // Self-play
    env_override!(
        config,
        self_play.num_games,
        "ZEROCHESS_SELF_PLAY_NUM_GAMES",
        parse
    );
    env_override!(
        config,
        self_play.num_simulations,
        "ZEROCHESS_SELF_PLAY_NUM_SIMULATIONS",
        parse
    );
    env_override!(
        config,
        self_play.max_plies,
        "ZEROCHESS_SELF_PLAY_MAX_PLIES",
        parse
    );

    // Training
    env_override!(config, training.epochs, "ZEROCHESS_TRAINING_EPOCHS", parse);
    env_override!(
        config,
        training.batch_size,
        "ZEROCHESS_TRAINING_BATCH_SIZE",
        parse
    );
    env_override!(
        config,
        training.learning_rate,
        "ZEROCHESS_TRAINING_LEARNING_RATE",
        parse
    );
    env_override!(
        config,
        training.value_weight,
        "ZEROCHESS_TRAINING_VALUE_WEIGHT",
        parse
    );
    env_override!(
        config,
        training.max_retries,
        "ZEROCHESS_TRAINING_MAX_RETRIES",
        parse
    );
    env_override!(config, training.device, "ZEROCHESS_TRAINING_DEVICE");
    env_override!(config, training.seed, "ZEROCHESS_TRAINING_SEED", parse);

    // Evaluation
    env_override!(
        config,
        evaluation.num_games,
        "ZEROCHESS_EVALUATION_NUM_GAMES",
        parse
    );
    env_override!(
        config,
        evaluation.num_simulations,
        "ZEROCHESS_EVALUATION_NUM_SIMULATIONS",
        parse
    );
    env_override!(
        config,
        evaluation.win_threshold,
        "ZEROCHESS_EVALUATION_WIN_THRESHOLD",
        parse
    );
    env_override!(
        config,
        evaluation.max_plies,
        "ZEROCHESS_EVALUATION_MAX_PLIES",
        parse
    );
    env_override!(
        config,
        evaluation.max_retries,
        "ZEROCHESS_EVALUATION_MAX_RETRIES",
        parse
    );
    env_override!(
        config,
        evaluation.auto_evaluate,
        "ZEROCHESS_EVALUATION_AUTO_EVALUATE",
        parse
    );

    config
}
