//! Monte Carlo Tree Search (MCTS) for AlphaZero-style chess play.
//!
//! Each simulation consists of four phases:
//!
//! 1. **Selection**: descend by PUCT score,
//!    `-Q + c_puct * P * sqrt(N_parent) / (1 + N)`
//! 2. **Expansion**: add one child per legal move, priors from a
//!    [`PolicyValuePredictor`](predictor::PolicyValuePredictor)
//! 3. **Evaluation**: the predictor's value, or the rule outcome when the
//!    position is checkmate or a draw
//! 4. **Backpropagation**: update visit counts and values along the path,
//!    negating at each ply
//!
//! # Usage
//!
//! ```
//! use chess_core::Position;
//! use mcts::{MctsConfig, SearchEngine};
//! use predictor::UniformPredictor;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha20Rng;
//!
//! let predictor = UniformPredictor;
//! let mut engine = SearchEngine::new(&predictor, MctsConfig::for_testing());
//! let mut rng = ChaCha20Rng::seed_from_u64(42);
//!
//! let result = engine
//!     .search(&Position::startpos(), 40, 0.0, &mut rng)
//!     .unwrap();
//! assert_eq!(result.policy.len(), 20);
//! ```
//!
//! Moves are kept in ascending `(from, to, promotion)` order throughout, and
//! every maximum picks the first candidate, so greedy results are
//! reproducible.

pub mod cache;
pub mod config;
pub mod node;
pub mod search;
pub mod tree;

pub use cache::{CacheStats, InferenceCache};
pub use config::MctsConfig;
pub use node::{MctsNode, NodeId};
pub use search::{run_mcts, SearchEngine, SearchError, SearchResult, SearchStats};
pub use tree::{MctsTree, TreeStats};
