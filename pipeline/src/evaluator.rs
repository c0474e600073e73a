//! Head-to-head evaluation of a challenger against the champion.
//!
//! Colours alternate (challenger White on even games) and every move is a
//! greedy, noise-free search, so a match between identical snapshots is a
//! sequence of mirrored games scoring exactly one half.

use chess_core::{Game, GameResult, Position};
use mcts::{MctsConfig, SearchEngine};
use predictor::PolicyValuePredictor;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::registry::ModelRegistry;
use crate::types::{next_id, now_secs, EvaluationResult, GameRecord, MatchOutcome, ModelId};

#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    pub num_games: u32,
    pub num_simulations: u32,
    /// Promote when the challenger's score reaches this fraction
    pub win_threshold: f64,
    pub max_plies: u32,
    /// Replays of a game that failed with a transient predictor error
    pub max_retries: u32,
    pub c_puct: f32,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            num_games: 20,
            num_simulations: 50,
            win_threshold: 0.55,
            max_plies: 500,
            max_retries: 2,
            c_puct: MctsConfig::default().c_puct,
        }
    }
}

impl EvaluationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.num_games == 0 {
            return Err(PipelineError::Validation(
                "num_games must be positive".into(),
            ));
        }
        if self.num_simulations == 0 {
            return Err(PipelineError::Validation(
                "num_simulations must be positive".into(),
            ));
        }
        if self.max_plies == 0 {
            return Err(PipelineError::Validation(
                "max_plies must be positive".into(),
            ));
        }
        if !self.win_threshold.is_finite() {
            return Err(PipelineError::Validation(
                "win_threshold must be finite".into(),
            ));
        }
        Ok(())
    }

    fn search_config(&self) -> MctsConfig {
        MctsConfig::for_evaluation()
            .with_simulations(self.num_simulations)
            .with_c_puct(self.c_puct)
            .with_persistent_cache(true)
    }
}

/// Score from the challenger's side: wins plus half the draws.
pub fn win_rate(wins: u32, draws: u32, games: u32) -> f64 {
    if games == 0 {
        return 0.0;
    }
    (wins as f64 + 0.5 * draws as f64) / games as f64
}

/// Play one game; the challenger takes White when `challenger_white`.
fn play_game<C, H>(
    challenger: &mut SearchEngine<'_, C>,
    champion: &mut SearchEngine<'_, H>,
    challenger_white: bool,
    settings: &EvaluationSettings,
    rng: &mut ChaCha20Rng,
) -> Result<(GameResult, u32, String)>
where
    C: PolicyValuePredictor + ?Sized,
    H: PolicyValuePredictor + ?Sized,
{
    let mut game = Game::new(Position::startpos()).with_max_plies(settings.max_plies);
    while !game.status().is_terminal() {
        let position = game.position();
        let challenger_to_move = position.side_to_move().is_white() == challenger_white;
        let search = if challenger_to_move {
            challenger.search(position, settings.num_simulations, 0.0, rng)?
        } else {
            champion.search(position, settings.num_simulations, 0.0, rng)?
        };
        game.play(&search.best_move)?;
    }
    let status = game.status();
    Ok((
        status.result().unwrap_or(GameResult::Draw),
        game.plies(),
        status.reason().to_string(),
    ))
}

/// Play `settings.num_games` games between two snapshots.
///
/// Cancellation is honoured between games. `progress(done, total)` is called
/// after every game.
#[allow(clippy::too_many_arguments)]
pub fn evaluate<C, H, F>(
    challenger: &C,
    champion: &H,
    challenger_id: &ModelId,
    champion_id: &ModelId,
    settings: &EvaluationSettings,
    automatic: bool,
    cancel: &CancelToken,
    mut progress: F,
) -> Result<EvaluationResult>
where
    C: PolicyValuePredictor + ?Sized,
    H: PolicyValuePredictor + ?Sized,
    F: FnMut(u32, u32),
{
    settings.validate()?;

    let config = settings.search_config();
    let mut challenger_engine = SearchEngine::new(challenger, config.clone());
    let mut champion_engine = SearchEngine::new(champion, config);
    // Greedy search without noise never samples; the generator is a formality
    let mut rng = ChaCha20Rng::seed_from_u64(0);

    info!(
        challenger = %challenger_id,
        champion = %champion_id,
        games = settings.num_games,
        simulations = settings.num_simulations,
        "Starting evaluation"
    );

    let mut games = Vec::with_capacity(settings.num_games as usize);
    let (mut wins, mut losses, mut draws) = (0u32, 0u32, 0u32);

    for index in 0..settings.num_games {
        cancel.check()?;
        let challenger_white = index % 2 == 0;

        let mut attempt = 0;
        let (result, plies, reason) = loop {
            match play_game(
                &mut challenger_engine,
                &mut champion_engine,
                challenger_white,
                settings,
                &mut rng,
            ) {
                Ok(game) => break game,
                Err(e) if e.is_transient() && attempt < settings.max_retries => {
                    attempt += 1;
                    warn!(game = index, attempt, error = %e, "Transient predictor failure, replaying game");
                }
                Err(e) => return Err(e),
            }
        };

        let record = GameRecord {
            index,
            challenger_white,
            result,
            plies,
            reason,
        };
        match record.outcome() {
            MatchOutcome::Win => wins += 1,
            MatchOutcome::Loss => losses += 1,
            MatchOutcome::Draw => draws += 1,
        }
        debug!(
            game = index,
            challenger_white,
            result = %record.result,
            plies = record.plies,
            reason = %record.reason,
            "Evaluation game finished"
        );
        games.push(record);
        progress(index + 1, settings.num_games);
    }

    let rate = win_rate(wins, draws, settings.num_games);
    let promoted = rate >= settings.win_threshold;
    info!(
        challenger = %challenger_id,
        wins,
        losses,
        draws,
        win_rate = format!("{:.3}", rate),
        threshold = settings.win_threshold,
        promoted,
        "Evaluation complete"
    );

    Ok(EvaluationResult {
        id: next_id("eval"),
        challenger: challenger_id.clone(),
        champion: champion_id.clone(),
        games,
        wins,
        losses,
        draws,
        win_rate: rate,
        threshold: settings.win_threshold,
        promoted,
        automatic,
        timestamp: now_secs(),
    })
}

/// Evaluate two registered versions, record the result and promote the
/// challenger if it cleared the threshold.
pub fn evaluate_and_promote<P, F>(
    registry: &ModelRegistry,
    challenger_id: &ModelId,
    champion_id: &ModelId,
    settings: &EvaluationSettings,
    automatic: bool,
    cancel: &CancelToken,
    progress: F,
) -> Result<EvaluationResult>
where
    P: PolicyValuePredictor,
    F: FnMut(u32, u32),
{
    let challenger: P = registry.load_predictor(challenger_id)?;
    let champion: P = registry.load_predictor(champion_id)?;

    let result = evaluate(
        &challenger,
        &champion,
        challenger_id,
        champion_id,
        settings,
        automatic,
        cancel,
        progress,
    )?;

    registry.store().save_evaluation(&result)?;
    if result.promoted {
        registry.promote(challenger_id, Some(champion_id), result.win_rate)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::types::ModelMetadata;
    use predictor::{LinearPredictor, UniformPredictor};
    use std::sync::Arc;

    fn ids() -> (ModelId, ModelId) {
        (ModelId::new("zerochess", 2), ModelId::new("zerochess", 1))
    }

    fn quick(num_games: u32, threshold: f64) -> EvaluationSettings {
        EvaluationSettings {
            num_games,
            num_simulations: 5,
            win_threshold: threshold,
            max_plies: 30,
            ..EvaluationSettings::default()
        }
    }

    fn run(settings: &EvaluationSettings) -> EvaluationResult {
        let (c, h) = ids();
        evaluate(
            &UniformPredictor,
            &UniformPredictor,
            &c,
            &h,
            settings,
            false,
            &CancelToken::new(),
            |_, _| {},
        )
        .unwrap()
    }

    #[test]
    fn test_win_rate_counts_half_draws() {
        assert_eq!(win_rate(3, 2, 10), 0.4);
        assert_eq!(win_rate(0, 0, 0), 0.0);
    }

    #[test]
    fn test_identical_snapshots_score_one_half() {
        let result = run(&quick(20, 0.55));
        assert_eq!(result.games.len(), 20);
        assert_eq!(result.wins + result.losses + result.draws, 20);
        assert_eq!(result.win_rate, 0.5);
        assert!(!result.promoted);
    }

    #[test]
    fn test_identical_linear_snapshots_score_one_half() {
        let model = LinearPredictor::new(5);
        let copy = model.clone();
        let (c, h) = ids();
        let settings = EvaluationSettings {
            max_plies: 16,
            ..quick(4, 0.55)
        };
        let result = evaluate(
            &model,
            &copy,
            &c,
            &h,
            &settings,
            false,
            &CancelToken::new(),
            |_, _| {},
        )
        .unwrap();
        assert_eq!(result.win_rate, 0.5);
    }

    #[test]
    fn test_colours_alternate() {
        let result = run(&quick(4, 0.55));
        let colours: Vec<bool> = result.games.iter().map(|g| g.challenger_white).collect();
        assert_eq!(colours, vec![true, false, true, false]);
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(run(&quick(2, 0.0)).promoted);
        assert!(!run(&quick(2, 1.01)).promoted);
    }

    #[test]
    fn test_progress_and_cancellation() {
        let (c, h) = ids();
        let mut calls = Vec::new();
        evaluate(
            &UniformPredictor,
            &UniformPredictor,
            &c,
            &h,
            &quick(3, 0.55),
            false,
            &CancelToken::new(),
            |done, total| calls.push((done, total)),
        )
        .unwrap();
        assert_eq!(calls, vec![(1, 3), (2, 3), (3, 3)]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = evaluate(
            &UniformPredictor,
            &UniformPredictor,
            &c,
            &h,
            &quick(3, 0.55),
            false,
            &cancel,
            |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn test_invalid_settings() {
        let (c, h) = ids();
        let err = evaluate(
            &UniformPredictor,
            &UniformPredictor,
            &c,
            &h,
            &quick(0, 0.55),
            false,
            &CancelToken::new(),
            |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_promotion_through_registry() {
        let registry = ModelRegistry::new(Arc::new(SqliteStore::in_memory().unwrap()));
        let model = LinearPredictor::new(8);
        let v1 = registry
            .register("zerochess", &model, ModelMetadata::default())
            .unwrap();
        let v2 = registry
            .register("zerochess", &model, ModelMetadata::default())
            .unwrap();
        registry.activate(&v1.id).unwrap();

        let settings = EvaluationSettings {
            max_plies: 10,
            ..quick(2, 1.01)
        };
        let kept = evaluate_and_promote::<LinearPredictor, _>(
            &registry,
            &v2.id,
            &v1.id,
            &settings,
            true,
            &CancelToken::new(),
            |_, _| {},
        )
        .unwrap();
        assert!(!kept.promoted);
        assert_eq!(registry.active_id().unwrap(), Some(v1.id.clone()));

        let settings = EvaluationSettings {
            win_threshold: 0.0,
            ..settings
        };
        let promoted = evaluate_and_promote::<LinearPredictor, _>(
            &registry,
            &v2.id,
            &v1.id,
            &settings,
            true,
            &CancelToken::new(),
            |_, _| {},
        )
        .unwrap();
        assert!(promoted.promoted);
        assert_eq!(registry.active_id().unwrap(), Some(v2.id.clone()));

        let history = registry.history(10).unwrap();
        assert_eq!(history[0].model, v2.id);
        assert_eq!(history[0].previous, Some(v1.id));
        assert_eq!(registry.store().count_evaluations().unwrap(), 2);
    }
}
