//! Structured chess moves.
//!
//! A [`Move`] is a plain `{from, to, promotion}` triple. Strings only appear at
//! the boundary, in UCI notation (`e2e4`, `e7e8q`, castling as `e1g1`).
//!
//! # Ordering
//!
//! `Move` orders by `from` square index (a1 = 0 ... h8 = 63), then `to`
//! square index, then promotion (none < knight < bishop < rook < queen).
//! The search uses this ordering to break ties between equally scored moves.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Role, Square};
use thiserror::Error;

/// Errors parsing a move from UCI text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseMoveError {
    #[error("invalid move length {0}, expected 4 or 5 characters")]
    InvalidLength(usize),

    #[error("invalid square in move '{0}'")]
    InvalidSquare(String),

    #[error("invalid promotion piece '{0}'")]
    InvalidPromotion(char),
}

/// A chess move from one square to another, with an optional promotion piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl Move {
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, role: Role) -> Self {
        self.promotion = Some(role);
        self
    }

    /// Flat `from * 64 + to` index into the 4096-entry move space.
    ///
    /// Under-promotions share the index of the plain pawn move.
    #[inline]
    pub fn index(&self) -> usize {
        self.from.to_usize() * 64 + self.to.to_usize()
    }

    fn sort_key(&self) -> (usize, usize, u8) {
        let promo = self.promotion.map_or(0, |r| r as u8);
        (self.from.to_usize(), self.to.to_usize(), promo)
    }

    pub(crate) fn from_shakmaty(m: shakmaty::Move) -> Self {
        match UciMove::from_move(m, CastlingMode::Standard) {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => Self {
                from,
                to,
                promotion,
            },
            // Standard chess never yields drops or null moves.
            _ => Self::new(m.from().unwrap_or(m.to()), m.to()),
        }
    }

    pub(crate) fn to_uci(self) -> UciMove {
        UciMove::Normal {
            from: self.from,
            to: self.to,
            promotion: self.promotion,
        }
    }
}

impl Ord for Move {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Move {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(role) = self.promotion {
            write!(f, "{}", role.char())?;
        }
        Ok(())
    }
}

impl FromStr for Move {
    type Err = ParseMoveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() || (s.len() != 4 && s.len() != 5) {
            return Err(ParseMoveError::InvalidLength(s.chars().count()));
        }

        let from: Square = s[0..2]
            .parse()
            .map_err(|_| ParseMoveError::InvalidSquare(s.to_string()))?;
        let to: Square = s[2..4]
            .parse()
            .map_err(|_| ParseMoveError::InvalidSquare(s.to_string()))?;

        let promotion = match s[4..].chars().next() {
            None => None,
            Some(ch) => match Role::from_char(ch) {
                Some(role) if role != Role::Pawn && role != Role::King => Some(role),
                _ => return Err(ParseMoveError::InvalidPromotion(ch)),
            },
        };

        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}

impl Serialize for Move {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Move {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
