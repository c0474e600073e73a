//! Immutable chess positions backed by `shakmaty`.
//!
//! `Position` is the legal-move oracle for the rest of the workspace: legal
//! move generation, move application and rule-based terminal detection.

use std::fmt;

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position as _};
use thiserror::Error;

use crate::moves::Move;

/// Errors raised by the rules layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("illegal move {mv} in position {fen}")]
    IllegalMove { mv: String, fen: String },
}

/// Why a game ended in a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawReason {
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    Repetition,
    /// Safety cutoff reached; labelled a draw.
    MaxPlies,
}

impl DrawReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrawReason::Stalemate => "stalemate",
            DrawReason::InsufficientMaterial => "insufficient_material",
            DrawReason::FiftyMoveRule => "fifty_move_rule",
            DrawReason::Repetition => "repetition",
            DrawReason::MaxPlies => "max_plies",
        }
    }
}

/// Rule status of a position or game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Ongoing,
    Decided { winner: Color },
    Drawn(DrawReason),
}

impl GameStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GameStatus::Ongoing)
    }

    /// Outcome value from `color`'s perspective: +1 win, -1 loss, 0 draw or ongoing.
    pub fn value_for(&self, color: Color) -> f32 {
        match self {
            GameStatus::Decided { winner } if *winner == color => 1.0,
            GameStatus::Decided { .. } => -1.0,
            _ => 0.0,
        }
    }

    /// Final result, or `None` while the game is ongoing.
    pub fn result(&self) -> Option<GameResult> {
        match self {
            GameStatus::Ongoing => None,
            GameStatus::Decided {
                winner: Color::White,
            } => Some(GameResult::WhiteWins),
            GameStatus::Decided {
                winner: Color::Black,
            } => Some(GameResult::BlackWins),
            GameStatus::Drawn(_) => Some(GameResult::Draw),
        }
    }

    /// Short label for logs and storage ("checkmate", "stalemate", ...).
    pub fn reason(&self) -> &'static str {
        match self {
            GameStatus::Ongoing => "ongoing",
            GameStatus::Decided { .. } => "checkmate",
            GameStatus::Drawn(reason) => reason.as_str(),
        }
    }
}

/// Final result of a game in PGN notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
}

impl GameResult {
    pub fn winner(&self) -> Option<Color> {
        match self {
            GameResult::WhiteWins => Some(Color::White),
            GameResult::BlackWins => Some(Color::Black),
            GameResult::Draw => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1-0" => Some(GameResult::WhiteWins),
            "0-1" => Some(GameResult::BlackWins),
            "1/2-1/2" => Some(GameResult::Draw),
            _ => None,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable chess position. Applying a move yields a new position.
#[derive(Debug, Clone)]
pub struct Position {
    inner: Chess,
}

impl Default for Position {
    fn default() -> Self {
        Self::startpos()
    }
}

impl Position {
    /// The standard initial position.
    pub fn startpos() -> Self {
        Self {
            inner: Chess::default(),
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        let invalid = |reason: String| RulesError::InvalidFen {
            fen: fen.to_string(),
            reason,
        };
        let parsed: Fen = fen.trim().parse().map_err(|e| invalid(format!("{e}")))?;
        let inner: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| invalid(format!("{e}")))?;
        Ok(Self { inner })
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.inner, EnPassantMode::Legal).to_string()
    }

    /// Canonical key: placement, side to move, castling rights and en passant
    /// square. Move counters are excluded so transpositions share a key.
    pub fn key(&self) -> String {
        let fen = self.fen();
        fen.split(' ').take(4).collect::<Vec<_>>().join(" ")
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.inner.turn()
    }

    #[inline]
    pub fn halfmoves(&self) -> u32 {
        self.inner.halfmoves()
    }

    #[inline]
    pub fn fullmoves(&self) -> u32 {
        self.inner.fullmoves().get()
    }

    pub fn is_check(&self) -> bool {
        self.inner.is_check()
    }

    /// Legal moves in ascending [`Move`] order.
    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves: Vec<Move> = self
            .inner
            .legal_moves()
            .into_iter()
            .map(Move::from_shakmaty)
            .collect();
        moves.sort_unstable();
        moves
    }

    pub fn is_legal(&self, mv: &Move) -> bool {
        mv.to_uci().to_move(&self.inner).is_ok()
    }

    /// Apply a legal move, returning the resulting position.
    pub fn play(&self, mv: &Move) -> Result<Position, RulesError> {
        let illegal = || RulesError::IllegalMove {
            mv: mv.to_string(),
            fen: self.fen(),
        };
        let m = mv.to_uci().to_move(&self.inner).map_err(|_| illegal())?;
        let inner = self.inner.clone().play(m).map_err(|_| illegal())?;
        Ok(Self { inner })
    }

    /// Rule status of this position in isolation (no repetition history).
    ///
    /// Checkmate takes precedence over the fifty-move rule.
    pub fn status(&self) -> GameStatus {
        if self.inner.is_checkmate() {
            return GameStatus::Decided {
                winner: !self.inner.turn(),
            };
        }
        if self.inner.is_stalemate() {
            return GameStatus::Drawn(DrawReason::Stalemate);
        }
        if self.inner.is_insufficient_material() {
            return GameStatus::Drawn(DrawReason::InsufficientMaterial);
        }
        if self.inner.halfmoves() >= 100 {
            return GameStatus::Drawn(DrawReason::FiftyMoveRule);
        }
        GameStatus::Ongoing
    }

    pub(crate) fn board(&self) -> &shakmaty::Board {
        self.inner.board()
    }

    pub(crate) fn castles(&self) -> &shakmaty::Castles {
        self.inner.castles()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Only legal move for White is a3a4.
    const ONE_MOVE_FEN: &str = "k7/8/8/8/8/P7/5q2/7K w - - 0 1";

    #[test]
    fn test_startpos_has_twenty_moves() {
        let pos = Position::startpos();
        assert_eq!(pos.legal_moves().len(), 20);
        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.status(), GameStatus::Ongoing);
    }

    #[test]
    fn test_legal_moves_are_sorted() {
        let moves = Position::startpos().legal_moves();
        let mut sorted = moves.clone();
        sorted.sort();
        assert_eq!(moves, sorted);
        // b1 knight (square 1) generates first
        assert_eq!(moves[0].to_string(), "b1a3");
    }

    #[test]
    fn test_fen_roundtrip_and_key() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
        let pos = Position::from_fen(fen).unwrap();
        assert_eq!(pos.fen(), fen);
        assert_eq!(pos.key(), "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq -");
    }

    #[test]
    fn test_invalid_fen() {
        let err = Position::from_fen("not a fen").unwrap_err();
        assert!(matches!(err, RulesError::InvalidFen { .. }));
    }

    #[test]
    fn test_play_and_illegal_move() {
        let pos = Position::startpos();
        let next = pos.play(&"e2e4".parse().unwrap()).unwrap();
        assert_eq!(next.side_to_move(), Color::Black);
        // original untouched
        assert_eq!(pos.side_to_move(), Color::White);

        let err = pos.play(&"e2e5".parse().unwrap()).unwrap_err();
        assert!(matches!(err, RulesError::IllegalMove { .. }));
    }

    #[test]
    fn test_castling_is_king_to_target() {
        let pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let moves: Vec<String> = pos.legal_moves().iter().map(|m| m.to_string()).collect();
        assert!(moves.contains(&"e1g1".to_string()));
        assert!(moves.contains(&"e1c1".to_string()));
        let after = pos.play(&"e1g1".parse().unwrap()).unwrap();
        assert!(after.fen().starts_with("r3k2r/8/8/8/8/8/8/R4RK1 b kq"));
    }

    #[test]
    fn test_checkmate_status() {
        // Fool's mate
        let pos =
            Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
                .unwrap();
        let status = pos.status();
        assert_eq!(
            status,
            GameStatus::Decided {
                winner: Color::Black
            }
        );
        assert!(pos.legal_moves().is_empty());
        assert_eq!(status.value_for(Color::White), -1.0);
        assert_eq!(status.result(), Some(GameResult::BlackWins));
    }

    #[test]
    fn test_draw_statuses() {
        let stalemate = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(stalemate.status(), GameStatus::Drawn(DrawReason::Stalemate));

        let bare_kings = Position::from_fen("8/8/4k3/8/8/4K3/8/8 w - - 0 1").unwrap();
        assert_eq!(
            bare_kings.status(),
            GameStatus::Drawn(DrawReason::InsufficientMaterial)
        );

        let fifty = Position::from_fen("8/8/4k3/8/8/4K3/4R3/8 w - - 100 80").unwrap();
        assert_eq!(fifty.status(), GameStatus::Drawn(DrawReason::FiftyMoveRule));
    }

    #[test]
    fn test_single_legal_move_position() {
        let pos = Position::from_fen(ONE_MOVE_FEN).unwrap();
        let moves = pos.legal_moves();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].to_string(), "a3a4");
    }

    #[test]
    fn test_game_result_strings() {
        for result in [GameResult::WhiteWins, GameResult::BlackWins, GameResult::Draw] {
            assert_eq!(GameResult::parse(result.as_str()), Some(result));
        }
        assert_eq!(GameResult::parse("*"), None);
    }
}
