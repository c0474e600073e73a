//! Centralized configuration loading from config.toml.
//!
//! This crate provides configuration structs and loading logic shared by
//! the search engine and the pipeline binary.
//!
//! # Configuration Priority
//!
//! Settings are loaded with the following priority (highest to lowest):
//! 1. Environment variables (`ZEROCHESS_<SECTION>_<KEY>`)
//! 2. config.toml file
//! 3. Built-in defaults (`config.defaults.toml`)
//!
//! # Environment Variable Override Pattern
//!
//! ```text
//! ZEROCHESS_<SECTION>_<KEY>=value
//!
//! Examples:
//!     ZEROCHESS_COMMON_DATA_DIR=/data
//!     ZEROCHESS_SELF_PLAY_NUM_GAMES=25
//!     ZEROCHESS_TRAINING_LEARNING_RATE=0.01
//!     ZEROCHESS_EVALUATION_WIN_THRESHOLD=0.6
//! ```

mod defaults;
mod loader;
mod structs;

pub use defaults::*;
pub use loader::{apply_env_overrides, load_config, load_from_path, CONFIG_SEARCH_PATHS};
pub use structs::*;
