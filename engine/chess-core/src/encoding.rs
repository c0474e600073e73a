//! Position encoder for the policy-value predictor.
//!
//! Layout is plane-major, `plane * 64 + square` with a1 = 0:
//!
//! ```text
//! planes  0..6   white pawn, knight, bishop, rook, queen, king
//! planes  6..12  black pawn, knight, bishop, rook, queen, king
//! plane   12     side to move (1.0 everywhere when White moves)
//! plane   13     castling rights, 0.25 per right held
//! ```
//!
//! Moves map to a flat 4096-entry policy space via `from * 64 + to`.

use shakmaty::{CastlingSide, Color, Role};

use crate::moves::Move;
use crate::position::Position;

pub const BOARD_SQUARES: usize = 64;
pub const NUM_PLANES: usize = 14;
/// Length of an encoded position (8 x 8 x 14).
pub const ENCODED_LEN: usize = BOARD_SQUARES * NUM_PLANES;
/// Size of the flat `from * 64 + to` move space.
pub const POLICY_SIZE: usize = BOARD_SQUARES * BOARD_SQUARES;

const TURN_PLANE: usize = 12;
const CASTLING_PLANE: usize = 13;

fn piece_plane(color: Color, role: Role) -> usize {
    let base = match color {
        Color::White => 0,
        Color::Black => 6,
    };
    base + (role as usize - 1)
}

/// Encode a position into a fresh buffer of [`ENCODED_LEN`] floats.
pub fn encode(position: &Position) -> Vec<f32> {
    let mut out = vec![0.0; ENCODED_LEN];
    encode_into(position, &mut out);
    out
}

/// Encode into an existing buffer. `out` must hold at least [`ENCODED_LEN`] floats.
pub fn encode_into(position: &Position, out: &mut [f32]) {
    let out = &mut out[..ENCODED_LEN];
    out.fill(0.0);

    for (square, piece) in position.board().iter() {
        let plane = piece_plane(piece.color, piece.role);
        out[plane * BOARD_SQUARES + square.to_usize()] = 1.0;
    }

    if position.side_to_move() == Color::White {
        out[TURN_PLANE * BOARD_SQUARES..(TURN_PLANE + 1) * BOARD_SQUARES].fill(1.0);
    }

    let castles = position.castles();
    let rights = [Color::White, Color::Black]
        .iter()
        .flat_map(|&c| {
            [CastlingSide::KingSide, CastlingSide::QueenSide]
                .into_iter()
                .map(move |side| castles.has(c, side))
        })
        .filter(|&has| has)
        .count();
    if rights > 0 {
        let value = 0.25 * rights as f32;
        out[CASTLING_PLANE * BOARD_SQUARES..(CASTLING_PLANE + 1) * BOARD_SQUARES].fill(value);
    }
}

/// Index of a move in the flat policy space.
#[inline]
pub fn move_index(mv: &Move) -> usize {
    mv.index()
}
