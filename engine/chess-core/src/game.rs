//! A game in progress: current position plus the history needed for
//! repetition detection and the ply safety cutoff.

use std::collections::HashMap;

use crate::moves::Move;
use crate::position::{DrawReason, GameStatus, Position, RulesError};

/// Number of occurrences of a position that ends the game in a draw.
pub const REPETITION_LIMIT: u8 = 3;

#[derive(Debug, Clone)]
pub struct Game {
    position: Position,
    moves: Vec<Move>,
    seen: HashMap<String, u8>,
    max_plies: Option<u32>,
}

impl Default for Game {
    fn default() -> Self {
        Self::new(Position::startpos())
    }
}

impl Game {
    pub fn new(start: Position) -> Self {
        let mut seen = HashMap::new();
        seen.insert(start.key(), 1);
        Self {
            position: start,
            moves: Vec::new(),
            seen,
            max_plies: None,
        }
    }

    /// Force a draw once `max_plies` moves have been played.
    pub fn with_max_plies(mut self, max_plies: u32) -> Self {
        self.max_plies = Some(max_plies);
        self
    }

    #[inline]
    pub fn position(&self) -> &Position {
        &self.position
    }

    #[inline]
    pub fn plies(&self) -> u32 {
        self.moves.len() as u32
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// How many times the current position has occurred.
    pub fn repetitions(&self) -> u8 {
        self.seen.get(&self.position.key()).copied().unwrap_or(0)
    }

    pub fn play(&mut self, mv: &Move) -> Result<(), RulesError> {
        let next = self.position.play(mv)?;
        *self.seen.entry(next.key()).or_insert(0) += 1;
        self.position = next;
        self.moves.push(*mv);
        Ok(())
    }

    /// Status including repetition and the ply cutoff.
    pub fn status(&self) -> GameStatus {
        let status = self.position.status();
        if status.is_terminal() {
            return status;
        }
        if self.repetitions() >= REPETITION_LIMIT {
            return GameStatus::Drawn(DrawReason::Repetition);
        }
        if self.max_plies.is_some_and(|max| self.plies() >= max) {
            return GameStatus::Drawn(DrawReason::MaxPlies);
        }
        GameStatus::Ongoing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::GameResult;
    use shakmaty::Color;

    fn play_all(game: &mut Game, moves: &[&str]) {
        for m in moves {
            game.play(&m.parse().unwrap()).unwrap();
        }
    }

    #[test]
    fn test_threefold_repetition() {
        let mut game = Game::default();
        let shuffle = ["g1f3", "g8f6", "f3g1", "f6g8"];
        play_all(&mut game, &shuffle);
        assert_eq!(game.repetitions(), 2);
        assert_eq!(game.status(), GameStatus::Ongoing);

        play_all(&mut game, &shuffle);
        assert_eq!(game.repetitions(), 3);
        assert_eq!(game.status(), GameStatus::Drawn(DrawReason::Repetition));
        assert_eq!(game.status().result(), Some(GameResult::Draw));
    }

    #[test]
    fn test_max_plies_cutoff() {
        let mut game = Game::default().with_max_plies(2);
        play_all(&mut game, &["e2e4"]);
        assert_eq!(game.status(), GameStatus::Ongoing);
        play_all(&mut game, &["e7e5"]);
        assert_eq!(game.status(), GameStatus::Drawn(DrawReason::MaxPlies));
    }

    #[test]
    fn test_checkmate_beats_cutoff() {
        let mut game = Game::default().with_max_plies(4);
        play_all(&mut game, &["f2f3", "e7e5", "g2g4", "d8h4"]);
        assert_eq!(
            game.status(),
            GameStatus::Decided {
                winner: Color::Black
            }
        );
        assert_eq!(game.plies(), 4);
    }

    #[test]
    fn test_illegal_move_leaves_game_untouched() {
        let mut game = Game::default();
        assert!(game.play(&"e2e5".parse().unwrap()).is_err());
        assert_eq!(game.plies(), 0);
        assert_eq!(game.position().side_to_move(), Color::White);
    }
}
