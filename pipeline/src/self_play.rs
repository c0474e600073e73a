//! Self-play game generation.
//!
//! A single predictor snapshot plays both sides. Every ply records the
//! pre-move position together with the root visit distribution; once the
//! game ends the value targets are back-filled from the final result.

use std::time::Instant;

use chess_core::{encode, Color, Game, GameResult, Position};
use mcts::{MctsConfig, SearchEngine, SearchStats};
use predictor::PolicyValuePredictor;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::types::TrainingExample;

/// Knobs for self-play beyond the simulation count.
#[derive(Debug, Clone)]
pub struct SelfPlaySettings {
    /// Search parameters, including the temperature schedule
    pub mcts: MctsConfig,
    /// Games reaching this many plies are adjudicated drawn
    pub max_plies: u32,
    /// Replays of a game that failed with a transient predictor error
    pub max_retries: u32,
}

impl Default for SelfPlaySettings {
    fn default() -> Self {
        Self {
            mcts: MctsConfig::for_training(),
            max_plies: 500,
            max_retries: 2,
        }
    }
}

/// Aggregated search stats for a game.
#[derive(Debug, Default, Clone)]
pub struct GameStats {
    pub searches: u32,
    pub total_nodes: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub terminal_hits: u32,
    pub search_time_us: u64,
}

impl GameStats {
    fn add(&mut self, stats: &SearchStats) {
        self.searches += 1;
        self.total_nodes += stats.total_nodes;
        self.cache_hits += stats.cache_hits;
        self.cache_misses += stats.cache_misses;
        self.terminal_hits += stats.terminal_hits;
        self.search_time_us += stats.elapsed_us;
    }
}

/// One finished self-play game.
#[derive(Debug, Clone)]
pub struct GameOutcome {
    /// Examples in ply order; session id and move index are left for the
    /// batch to fill in
    pub examples: Vec<TrainingExample>,
    pub result: GameResult,
    pub plies: u32,
    pub reason: String,
    pub stats: GameStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameSummary {
    pub result: GameResult,
    pub plies: u32,
    pub reason: String,
}

/// Examples and per-game summaries of a batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub session_id: String,
    pub examples: Vec<TrainingExample>,
    pub games: Vec<GameSummary>,
}

impl BatchOutcome {
    /// (white wins, black wins, draws)
    pub fn tally(&self) -> (u32, u32, u32) {
        self.games
            .iter()
            .fold((0, 0, 0), |(w, b, d), g| match g.result {
                GameResult::WhiteWins => (w + 1, b, d),
                GameResult::BlackWins => (w, b + 1, d),
                GameResult::Draw => (w, b, d + 1),
            })
    }
}

/// Play one game from the standard starting position.
pub fn generate_game<P: PolicyValuePredictor + ?Sized>(
    predictor: &P,
    num_simulations: u32,
    settings: &SelfPlaySettings,
    rng: &mut ChaCha20Rng,
    cancel: &CancelToken,
) -> Result<GameOutcome> {
    generate_game_from(
        predictor,
        Position::startpos(),
        num_simulations,
        settings,
        rng,
        cancel,
    )
}

/// Play one game from `start`.
pub fn generate_game_from<P: PolicyValuePredictor + ?Sized>(
    predictor: &P,
    start: Position,
    num_simulations: u32,
    settings: &SelfPlaySettings,
    rng: &mut ChaCha20Rng,
    cancel: &CancelToken,
) -> Result<GameOutcome> {
    if num_simulations == 0 {
        return Err(PipelineError::Validation(
            "num_simulations must be positive".into(),
        ));
    }
    if settings.max_plies == 0 {
        return Err(PipelineError::Validation(
            "max_plies must be positive".into(),
        ));
    }

    let mut engine = SearchEngine::new(predictor, settings.mcts.clone());
    let mut game = Game::new(start).with_max_plies(settings.max_plies);
    let mut examples = Vec::new();
    let mut movers: Vec<Color> = Vec::new();
    let mut stats = GameStats::default();

    while !game.status().is_terminal() {
        cancel.check()?;

        let ply = game.plies();
        let position = game.position();
        let temperature = settings.mcts.temperature_at(ply);
        let search = engine.search(position, num_simulations, temperature, rng)?;
        stats.add(&search.stats);

        trace!(
            ply,
            best = %search.best_move,
            value = search.value,
            temperature,
            "Self-play move"
        );

        examples.push(TrainingExample {
            encoding: encode(position),
            policy: search.visit_policy(),
            value: 0.0,
            fen: position.fen(),
            session_id: String::new(),
            move_index: ply,
            ply,
        });
        movers.push(position.side_to_move());

        game.play(&search.best_move)?;
    }

    let status = game.status();
    // Terminal by the loop condition; result() is Some for every terminal status
    let result = status.result().unwrap_or(GameResult::Draw);
    for (example, mover) in examples.iter_mut().zip(&movers) {
        example.value = status.value_for(*mover);
    }

    Ok(GameOutcome {
        examples,
        result,
        plies: game.plies(),
        reason: status.reason().to_string(),
        stats,
    })
}

/// Play `num_games` games, tagging every example with `session_id` and a
/// move index that runs across the whole batch. `on_game(done, total)` is
/// called after each completed game.
#[allow(clippy::too_many_arguments)]
pub fn generate_batch<P, F>(
    predictor: &P,
    num_games: u32,
    num_simulations: u32,
    session_id: &str,
    settings: &SelfPlaySettings,
    rng: &mut ChaCha20Rng,
    cancel: &CancelToken,
    mut on_game: F,
) -> Result<BatchOutcome>
where
    P: PolicyValuePredictor + ?Sized,
    F: FnMut(u32, u32),
{
    if num_games == 0 {
        return Err(PipelineError::Validation(
            "num_games must be positive".into(),
        ));
    }

    let started = Instant::now();
    let mut examples = Vec::new();
    let mut games = Vec::with_capacity(num_games as usize);
    let mut move_index = 0u32;

    for game_number in 0..num_games {
        cancel.check()?;

        let mut attempt = 0;
        let outcome = loop {
            match generate_game(predictor, num_simulations, settings, rng, cancel) {
                Ok(outcome) => break outcome,
                Err(e) if e.is_transient() && attempt < settings.max_retries => {
                    attempt += 1;
                    warn!(
                        game = game_number,
                        attempt,
                        error = %e,
                        "Transient predictor failure, replaying game"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        debug!(
            game = game_number,
            result = %outcome.result,
            plies = outcome.plies,
            reason = %outcome.reason,
            nodes = outcome.stats.total_nodes,
            cache_hits = outcome.stats.cache_hits,
            terminal_hits = outcome.stats.terminal_hits,
            search_ms = outcome.stats.search_time_us / 1000,
            "Self-play game finished"
        );

        for mut example in outcome.examples {
            example.session_id = session_id.to_string();
            example.move_index = move_index;
            move_index += 1;
            examples.push(example);
        }
        games.push(GameSummary {
            result: outcome.result,
            plies: outcome.plies,
            reason: outcome.reason,
        });

        on_game(game_number + 1, num_games);
    }

    let batch = BatchOutcome {
        session_id: session_id.to_string(),
        examples,
        games,
    };
    let (white, black, draws) = batch.tally();
    info!(
        session = session_id,
        games = num_games,
        positions = batch.examples.len(),
        white,
        black,
        draws,
        elapsed_secs = format!("{:.1}", started.elapsed().as_secs_f64()),
        "Self-play batch complete"
    );

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::Move;
    use predictor::{
        LossBreakdown, Prediction, PredictorError, StepParams, TrainingTarget, UniformPredictor,
    };
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rng(seed: u64) -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(seed)
    }

    fn fast_settings(max_plies: u32) -> SelfPlaySettings {
        SelfPlaySettings {
            max_plies,
            ..SelfPlaySettings::default()
        }
    }

    fn greedy_settings() -> SelfPlaySettings {
        SelfPlaySettings {
            mcts: MctsConfig::for_testing(),
            max_plies: 50,
            max_retries: 0,
        }
    }

    /// Fails with a transient error for the first `failures` inferences.
    struct FlakyPredictor {
        failures: AtomicU32,
    }

    impl FlakyPredictor {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
            }
        }
    }

    impl PolicyValuePredictor for FlakyPredictor {
        fn infer(&self, encoding: &[f32], moves: &[Move]) -> std::result::Result<Prediction, PredictorError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(PredictorError::Transient("device busy".into()));
            }
            UniformPredictor.infer(encoding, moves)
        }

        fn train_step(
            &mut self,
            _: &[TrainingTarget<'_>],
            _: StepParams,
        ) -> std::result::Result<LossBreakdown, PredictorError> {
            Ok(LossBreakdown::default())
        }

        fn to_bytes(&self) -> std::result::Result<Vec<u8>, PredictorError> {
            Ok(vec![])
        }

        fn from_bytes(_: &[u8]) -> std::result::Result<Self, PredictorError> {
            Ok(Self::new(0))
        }
    }

    #[test]
    fn test_game_stops_at_ply_cutoff() {
        let outcome = generate_game(
            &UniformPredictor,
            5,
            &fast_settings(6),
            &mut rng(1),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome.plies, 6);
        assert_eq!(outcome.examples.len(), 6);
        assert_eq!(outcome.result, GameResult::Draw);
        assert_eq!(outcome.reason, "max_plies");
        assert!(outcome.examples.iter().all(|e| e.value == 0.0));
    }

    #[test]
    fn test_examples_are_well_formed() {
        let outcome = generate_game(
            &UniformPredictor,
            10,
            &fast_settings(40),
            &mut rng(2),
            &CancelToken::new(),
        )
        .unwrap();

        for (ply, example) in outcome.examples.iter().enumerate() {
            assert_eq!(example.ply, ply as u32);
            assert!([-1.0, 0.0, 1.0].contains(&example.value));
            let position = Position::from_fen(&example.fen).unwrap();
            let legal = position.legal_moves();
            let moves: Vec<Move> = example.policy.iter().map(|&(m, _)| m).collect();
            assert_eq!(moves, legal);
            let sum: f32 = example.policy.iter().map(|&(_, p)| p).sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert_eq!(example.encoding, encode(&position));
        }
    }

    #[test]
    fn test_values_backfilled_from_winner() {
        // Black mates with Qh4 on the first ply
        let start = Position::from_fen(
            "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2",
        )
        .unwrap();
        let outcome = generate_game_from(
            &UniformPredictor,
            start,
            200,
            &greedy_settings(),
            &mut rng(3),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome.result, GameResult::BlackWins);
        assert_eq!(outcome.reason, "checkmate");
        assert_eq!(outcome.plies, 1);
        assert_eq!(outcome.examples[0].value, 1.0);
    }

    #[test]
    fn test_same_seed_same_game() {
        let settings = fast_settings(20);
        let a = generate_game(&UniformPredictor, 8, &settings, &mut rng(9), &CancelToken::new())
            .unwrap();
        let b = generate_game(&UniformPredictor, 8, &settings, &mut rng(9), &CancelToken::new())
            .unwrap();
        let fens = |o: &GameOutcome| o.examples.iter().map(|e| e.fen.clone()).collect::<Vec<_>>();
        assert_eq!(fens(&a), fens(&b));
    }

    #[test]
    fn test_cancelled_game() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = generate_game(&UniformPredictor, 5, &fast_settings(10), &mut rng(1), &cancel)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn test_invalid_arguments() {
        let cancel = CancelToken::new();
        assert!(matches!(
            generate_game(&UniformPredictor, 0, &fast_settings(10), &mut rng(1), &cancel),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            generate_batch(
                &UniformPredictor,
                0,
                10,
                "s",
                &fast_settings(10),
                &mut rng(1),
                &cancel,
                |_, _| {}
            ),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_batch_of_two_games() {
        let mut progress = Vec::new();
        let batch = generate_batch(
            &UniformPredictor,
            2,
            10,
            "session-a",
            &fast_settings(80),
            &mut rng(4),
            &CancelToken::new(),
            |done, total| progress.push((done, total)),
        )
        .unwrap();

        assert_eq!(progress, vec![(1, 2), (2, 2)]);
        assert_eq!(batch.games.len(), 2);
        assert!(!batch.examples.is_empty());

        let total_plies: u32 = batch.games.iter().map(|g| g.plies).sum();
        assert_eq!(batch.examples.len() as u32, total_plies);

        for (i, example) in batch.examples.iter().enumerate() {
            assert_eq!(example.session_id, "session-a");
            assert_eq!(example.move_index, i as u32);
            assert!(Position::from_fen(&example.fen).is_ok());
        }
        let (w, b, d) = batch.tally();
        assert_eq!(w + b + d, 2);
    }

    #[test]
    fn test_transient_failures_are_replayed() {
        let flaky = FlakyPredictor::new(2);
        let batch = generate_batch(
            &flaky,
            1,
            5,
            "s",
            &fast_settings(4),
            &mut rng(5),
            &CancelToken::new(),
            |_, _| {},
        )
        .unwrap();
        assert_eq!(batch.games.len(), 1);
        assert_eq!(batch.examples.len(), 4);
    }

    #[test]
    fn test_retries_exhausted() {
        let flaky = FlakyPredictor::new(10);
        let settings = SelfPlaySettings {
            max_retries: 1,
            ..fast_settings(4)
        };
        let err = generate_batch(
            &flaky,
            1,
            5,
            "s",
            &settings,
            &mut rng(5),
            &CancelToken::new(),
            |_, _| {},
        )
        .unwrap_err();
        assert!(err.is_transient());
    }
}
