//! MCTS search implementation.
//!
//! Implements the core PUCT loop:
//! 1. Selection: descend the tree by PUCT score to a leaf
//! 2. Expansion: add one child per legal move, priors from the predictor
//! 3. Evaluation: predictor value, or the rule outcome for terminal nodes
//! 4. Backpropagation: update statistics along the path, negating per ply

use std::time::Instant;

use chess_core::{Move, Position};
use predictor::{PolicyValuePredictor, PredictorError};
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::{debug, trace};

use crate::cache::{CacheStats, InferenceCache};
use crate::config::MctsConfig;
use crate::node::NodeId;
use crate::tree::MctsTree;

/// Errors that can occur during MCTS search.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Predictor error: {0}")]
    Predictor(#[from] PredictorError),

    #[error("Position is already decided ({0})")]
    TerminalPosition(&'static str),

    #[error("Invalid search configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid prediction: {0}")]
    InvalidPrediction(String),

    #[error("Rules error: {0}")]
    Rules(#[from] chess_core::RulesError),
}

/// Per-search statistics.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    pub total_nodes: usize,
    pub max_depth: u32,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Simulations that ended on a decided or drawn position
    pub terminal_hits: u32,
    pub elapsed_us: u64,
}

/// Result of an MCTS search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Move chosen under the requested temperature
    pub best_move: Move,

    /// Temperature-adjusted distribution over the legal moves, in move order
    pub policy: Vec<(Move, f32)>,

    /// Raw root visit counts, in move order
    pub visit_counts: Vec<(Move, u32)>,

    /// Root mean value from the side to move
    pub value: f32,

    /// Number of simulations performed
    pub simulations: u32,

    pub stats: SearchStats,
}

impl SearchResult {
    /// Visit fractions (the τ = 1 distribution), used as the training target.
    pub fn visit_policy(&self) -> Vec<(Move, f32)> {
        let total: u32 = self.visit_counts.iter().map(|&(_, n)| n).sum();
        if total == 0 {
            let p = 1.0 / self.visit_counts.len().max(1) as f32;
            return self.visit_counts.iter().map(|&(mv, _)| (mv, p)).collect();
        }
        self.visit_counts
            .iter()
            .map(|&(mv, n)| (mv, n as f32 / total as f32))
            .collect()
    }

    /// Probability assigned to `mv` by the temperature-adjusted policy.
    pub fn probability(&self, mv: &Move) -> f32 {
        self.policy
            .iter()
            .find(|(m, _)| m == mv)
            .map_or(0.0, |&(_, p)| p)
    }
}

/// PUCT search engine bound to one predictor snapshot.
///
/// The engine owns the inference cache; the tree is rebuilt for every call
/// to [`search`](Self::search).
pub struct SearchEngine<'p, P: PolicyValuePredictor + ?Sized> {
    predictor: &'p P,
    config: MctsConfig,
    cache: InferenceCache,
}

impl<'p, P: PolicyValuePredictor + ?Sized> SearchEngine<'p, P> {
    pub fn new(predictor: &'p P, config: MctsConfig) -> Self {
        Self {
            predictor,
            config,
            cache: InferenceCache::new(),
        }
    }

    pub fn config(&self) -> &MctsConfig {
        &self.config
    }

    /// Cache counters accumulated over every search of this engine.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lifetime_stats()
    }

    /// Search `position` with the configured default simulation count.
    pub fn search_default(
        &mut self,
        position: &Position,
        temperature: f32,
        rng: &mut ChaCha20Rng,
    ) -> Result<SearchResult, SearchError> {
        let sims = self.config.num_simulations;
        self.search(position, sims, temperature, rng)
    }

    /// Run `num_simulations` PUCT simulations from `position` and choose a
    /// move under `temperature`.
    pub fn search(
        &mut self,
        position: &Position,
        num_simulations: u32,
        temperature: f32,
        rng: &mut ChaCha20Rng,
    ) -> Result<SearchResult, SearchError> {
        if num_simulations == 0 {
            return Err(SearchError::InvalidConfig(
                "num_simulations must be positive".into(),
            ));
        }
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(SearchError::InvalidConfig(format!(
                "temperature must be a finite non-negative number, got {temperature}"
            )));
        }

        let status = position.status();
        if status.is_terminal() {
            return Err(SearchError::TerminalPosition(status.reason()));
        }

        let start = Instant::now();
        self.cache.begin_search(self.config.persist_cache);
        let mut tree = MctsTree::new(position.clone());
        let mut terminal_hits = 0;

        // The root's own estimate is its first visit, so selection sees the
        // priors from the first simulation on. Child visits still sum to
        // `num_simulations`.
        let root = tree.root();
        let root_value = self.expand_node(&mut tree, root)?;
        tree.backpropagate(tree.root(), root_value);
        if self.config.noise_enabled() {
            add_dirichlet_noise(&mut tree, &self.config, rng);
        }

        for _ in 0..num_simulations {
            if self.simulate(&mut tree)? {
                terminal_hits += 1;
            }
        }

        let policy = tree.root_policy(temperature);
        let best_move = if temperature < 1e-6 {
            tree.best_move().map(|(mv, _)| mv)
        } else {
            sample_move(&policy, rng)
        }
        .ok_or(SearchError::TerminalPosition("no legal moves"))?;

        let root = tree.get(tree.root());
        let tree_stats = tree.stats();
        let cache_stats = self.cache.search_stats();
        let stats = SearchStats {
            total_nodes: tree_stats.total_nodes,
            max_depth: tree_stats.max_depth,
            cache_hits: cache_stats.hits,
            cache_misses: cache_stats.misses,
            terminal_hits,
            elapsed_us: start.elapsed().as_micros() as u64,
        };

        debug!(
            best_move = %best_move,
            simulations = num_simulations,
            root_value = root.mean_value(),
            prior_value = root_value,
            nodes = stats.total_nodes,
            cache_hits = stats.cache_hits,
            "MCTS search complete"
        );

        Ok(SearchResult {
            best_move,
            policy,
            visit_counts: tree.root_visits(),
            value: root.mean_value(),
            simulations: num_simulations,
            stats,
        })
    }

    /// Run a single simulation. Returns true if it ended on a terminal node.
    fn simulate(&mut self, tree: &mut MctsTree) -> Result<bool, SearchError> {
        let (leaf_id, depth) = self.select(tree);
        let leaf = tree.get(leaf_id);

        if leaf.is_terminal {
            let value = leaf.terminal_value;
            tree.backpropagate(leaf_id, value);
            return Ok(true);
        }

        let value = self.expand_node(tree, leaf_id)?;
        tree.backpropagate(leaf_id, value);

        trace!(leaf = leaf_id.0, depth, value, "MCTS simulation complete");
        Ok(false)
    }

    /// Descend from the root to a terminal or unexpanded node.
    fn select(&self, tree: &MctsTree) -> (NodeId, u32) {
        let mut current = tree.root();
        let mut depth = 0;

        loop {
            let node = tree.get(current);
            if node.is_leaf() {
                break;
            }
            match tree.select_child(current, self.config.c_puct) {
                Some(child_id) => {
                    current = child_id;
                    depth += 1;
                }
                None => break,
            }
        }

        (current, depth)
    }

    /// Expand a node with one child per legal move and return the
    /// predictor's value estimate for it.
    fn expand_node(&mut self, tree: &mut MctsTree, node_id: NodeId) -> Result<f32, SearchError> {
        let node = tree.get(node_id);
        if node.is_terminal {
            return Ok(node.terminal_value);
        }

        let position = node.position.clone();
        let legal = position.legal_moves();
        let prediction = self
            .cache
            .get_or_infer(self.predictor, &position, &legal)?;

        if prediction.priors.len() != legal.len() {
            return Err(SearchError::InvalidPrediction(format!(
                "{} priors for {} legal moves",
                prediction.priors.len(),
                legal.len()
            )));
        }
        if !prediction.value.is_finite() || prediction.priors.iter().any(|p| !p.is_finite()) {
            return Err(SearchError::InvalidPrediction(
                "non-finite predictor output".into(),
            ));
        }

        let priors = normalize_priors(&prediction.priors);
        for (mv, prior) in legal.iter().zip(priors) {
            let child = position.play(mv)?;
            tree.add_child(node_id, *mv, prior, child);
        }

        Ok(prediction.value.clamp(-1.0, 1.0))
    }
}

/// Renormalize priors over the legal moves; uniform if they carry no mass.
fn normalize_priors(priors: &[f32]) -> Vec<f32> {
    let clipped: Vec<f32> = priors.iter().map(|p| p.max(0.0)).collect();
    let sum: f32 = clipped.iter().sum();
    if sum > 0.0 {
        clipped.into_iter().map(|p| p / sum).collect()
    } else {
        vec![1.0 / priors.len().max(1) as f32; priors.len()]
    }
}

/// Mix Dirichlet noise into the root priors.
fn add_dirichlet_noise(tree: &mut MctsTree, config: &MctsConfig, rng: &mut ChaCha20Rng) {
    let root_id = tree.root();
    let children: Vec<NodeId> = tree.get(root_id).children.iter().map(|&(_, id)| id).collect();
    if children.len() < 2 {
        return;
    }

    let noise = dirichlet_noise(children.len(), config.dirichlet_alpha, rng);
    let eps = config.dirichlet_epsilon;
    for (child_id, n) in children.into_iter().zip(noise) {
        let child = tree.get_mut(child_id);
        child.prior = (1.0 - eps) * child.prior + eps * n;
    }
}

/// Sample a move from a probability distribution.
fn sample_move(policy: &[(Move, f32)], rng: &mut ChaCha20Rng) -> Option<Move> {
    let r: f32 = rng.gen();
    let mut cumsum = 0.0;

    for &(mv, p) in policy {
        cumsum += p;
        if r < cumsum {
            return Some(mv);
        }
    }

    // Floating point slack: fall back to the last move with mass
    policy
        .iter()
        .rev()
        .find(|(_, p)| *p > 0.0)
        .map(|&(mv, _)| mv)
}

/// Generate Dirichlet-distributed noise using Gamma variates.
fn dirichlet_noise(n: usize, alpha: f32, rng: &mut ChaCha20Rng) -> Vec<f32> {
    use rand_distr::{Distribution, Gamma};

    let Ok(gamma) = Gamma::new(alpha as f64, 1.0) else {
        return vec![1.0 / n as f32; n];
    };
    let mut samples: Vec<f32> = (0..n).map(|_| gamma.sample(rng) as f32).collect();

    let sum: f32 = samples.iter().sum();
    if sum > 0.0 {
        for s in &mut samples {
            *s /= sum;
        }
    }

    samples
}

/// Convenience function to run a single search with a fresh engine.
pub fn run_mcts<P: PolicyValuePredictor + ?Sized>(
    predictor: &P,
    config: MctsConfig,
    position: &Position,
    rng: &mut ChaCha20Rng,
) -> Result<SearchResult, SearchError> {
    let temperature = config.temperature;
    let mut engine = SearchEngine::new(predictor, config);
    engine.search_default(position, temperature, rng)
}
