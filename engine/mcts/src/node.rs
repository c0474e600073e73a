//! MCTS tree node representation.
//!
//! Each node holds the position reached by playing `mv` from its parent.
//! Values are stored from the perspective of the side to move at the node.

use chess_core::{Move, Position};

/// Index into the node arena. Using a newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn is_some(self) -> bool {
        !self.is_none()
    }
}

/// A node in the MCTS tree.
#[derive(Debug, Clone)]
pub struct MctsNode {
    /// Parent node index (NONE for root)
    pub parent: NodeId,

    /// Move that led to this node from the parent (None for root)
    pub mv: Option<Move>,

    pub position: Position,

    pub visit_count: u32,

    /// Sum of backed-up values. Q = value_sum / visit_count.
    pub value_sum: f32,

    /// P(s,a) from the parent's predictor output.
    pub prior: f32,

    /// Decided or drawn by rule; never expanded.
    pub is_terminal: bool,

    /// Outcome for the side to move (only valid if is_terminal):
    /// -1 when checkmated, 0 for draws.
    pub terminal_value: f32,

    /// Children in ascending move order. Empty until expanded.
    pub children: Vec<(Move, NodeId)>,
}

impl MctsNode {
    fn with_position(parent: NodeId, mv: Option<Move>, prior: f32, position: Position) -> Self {
        let status = position.status();
        let terminal_value = status.value_for(position.side_to_move());
        Self {
            parent,
            mv,
            visit_count: 0,
            value_sum: 0.0,
            prior,
            is_terminal: status.is_terminal(),
            terminal_value,
            children: Vec::new(),
            position,
        }
    }

    /// Create a new root node.
    pub fn new_root(position: Position) -> Self {
        Self::with_position(NodeId::NONE, None, 1.0, position)
    }

    /// Create a new child node. Terminal status is derived from the position.
    pub fn new_child(parent: NodeId, mv: Move, prior: f32, position: Position) -> Self {
        Self::with_position(parent, Some(mv), prior, position)
    }

    /// Mean value Q. Returns 0.0 if never visited.
    #[inline]
    pub fn mean_value(&self) -> f32 {
        if self.visit_count == 0 {
            0.0
        } else {
            self.value_sum / self.visit_count as f32
        }
    }

    /// PUCT score of this node as seen from its parent:
    /// `-Q + c_puct * P * sqrt(N_parent) / (1 + N)`.
    ///
    /// Q is negated because the node stores value for the opponent of the
    /// player choosing between children.
    #[inline]
    pub fn puct_score(&self, parent_visits_sqrt: f32, c_puct: f32) -> f32 {
        let q = -self.mean_value();
        let u = c_puct * self.prior * parent_visits_sqrt / (1.0 + self.visit_count as f32);
        q + u
    }

    #[inline]
    pub fn is_expanded(&self) -> bool {
        !self.children.is_empty()
    }

    /// Check if this is a leaf node (not expanded or terminal).
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.is_terminal || !self.is_expanded()
    }
}
