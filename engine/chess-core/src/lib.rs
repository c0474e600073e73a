//! Chess rules and position encoding for ZeroChess.
//!
//! This crate is the legal-move oracle consumed by the search and the
//! pipeline. Rules come from [`shakmaty`]; everything above it works with the
//! structured types defined here:
//!
//! - [`Move`]: `{from, to, promotion}` with a total, documented order
//! - [`Position`]: immutable position; `play` returns a new one
//! - [`Game`]: position plus history for repetition and ply cutoffs
//! - [`encoding`]: fixed-size float encoding and the 4096-entry move index
//!
//! # Usage
//!
//! ```rust
//! use chess_core::{Game, GameStatus, Position};
//!
//! let mut game = Game::new(Position::startpos()).with_max_plies(500);
//! let first = game.position().legal_moves()[0];
//! game.play(&first).unwrap();
//! assert_eq!(game.status(), GameStatus::Ongoing);
//! ```

pub mod encoding;
pub mod game;
pub mod moves;
pub mod position;

pub use encoding::{encode, move_index, ENCODED_LEN, POLICY_SIZE};
pub use game::Game;
pub use moves::{Move, ParseMoveError};
pub use position::{DrawReason, GameResult, GameStatus, Position, RulesError};

pub use shakmaty::{Color, Role, Square};
