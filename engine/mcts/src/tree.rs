//! MCTS tree structure with arena allocation.
//!
//! Nodes live in a contiguous Vec and are referenced by NodeId indices.
//! Children are kept in ascending move order; every "pick the maximum"
//! operation keeps the first maximum, so ties resolve to the lowest move.

use chess_core::{Move, Position};

use crate::node::{MctsNode, NodeId};

/// MCTS tree with arena-based node storage.
#[derive(Debug)]
pub struct MctsTree {
    nodes: Vec<MctsNode>,
    root: NodeId,
}

impl MctsTree {
    pub fn new(root_position: Position) -> Self {
        Self {
            nodes: vec![MctsNode::new_root(root_position)],
            root: NodeId(0),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &MctsNode {
        &self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut MctsNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn allocate(&mut self, node: MctsNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Select the child with the highest PUCT score.
    pub fn select_child(&self, node_id: NodeId, c_puct: f32) -> Option<NodeId> {
        let node = self.get(node_id);
        let parent_visits_sqrt = (node.visit_count as f32).sqrt();

        let mut best: Option<(NodeId, f32)> = None;
        for &(_, child_id) in &node.children {
            let score = self.get(child_id).puct_score(parent_visits_sqrt, c_puct);
            // strict > keeps the earliest (lowest) move on ties
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((child_id, score));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Add a child to a parent node. Callers add children in ascending move order.
    pub fn add_child(&mut self, parent_id: NodeId, mv: Move, prior: f32, position: Position) -> NodeId {
        let child_id = self.allocate(MctsNode::new_child(parent_id, mv, prior, position));
        self.get_mut(parent_id).children.push((mv, child_id));
        child_id
    }

    /// Backpropagate a value from a leaf to the root.
    /// Value is negated at each level (opponent's perspective).
    pub fn backpropagate(&mut self, leaf_id: NodeId, value: f32) {
        let mut current_id = leaf_id;
        let mut current_value = value;

        while current_id.is_some() {
            let node = self.get_mut(current_id);
            node.visit_count += 1;
            node.value_sum += current_value;
            current_value = -current_value;
            current_id = node.parent;
        }
    }

    /// Most visited root move; ties go to the lowest move.
    pub fn best_move(&self) -> Option<(Move, u32)> {
        let mut best: Option<(Move, u32)> = None;
        for &(mv, id) in &self.get(self.root).children {
            let visits = self.get(id).visit_count;
            if best.map_or(true, |(_, v)| visits > v) {
                best = Some((mv, visits));
            }
        }
        best
    }

    /// Raw visit counts of the root's children, in move order.
    pub fn root_visits(&self) -> Vec<(Move, u32)> {
        self.get(self.root)
            .children
            .iter()
            .map(|&(mv, id)| (mv, self.get(id).visit_count))
            .collect()
    }

    /// Root move distribution `p_i ∝ N_i^(1/τ)`.
    ///
    /// `τ < 1e-6` puts all mass on [`best_move`](Self::best_move).
    pub fn root_policy(&self, temperature: f32) -> Vec<(Move, f32)> {
        let visits = self.root_visits();
        if visits.is_empty() {
            return Vec::new();
        }

        if temperature < 1e-6 {
            let best = self.best_move().map(|(mv, _)| mv);
            return visits
                .into_iter()
                .map(|(mv, _)| (mv, if Some(mv) == best { 1.0 } else { 0.0 }))
                .collect();
        }

        // Scale by the max count first so N^(1/τ) cannot overflow for small τ.
        let max = visits.iter().map(|&(_, n)| n).max().unwrap_or(0) as f32;
        if max == 0.0 {
            let p = 1.0 / visits.len() as f32;
            return visits.into_iter().map(|(mv, _)| (mv, p)).collect();
        }
        let weights: Vec<f32> = visits
            .iter()
            .map(|&(_, n)| {
                let x = n as f32 / max;
                if temperature == 1.0 {
                    x
                } else {
                    x.powf(1.0 / temperature)
                }
            })
            .collect();
        let total: f32 = weights.iter().sum();
        visits
            .into_iter()
            .zip(weights)
            .map(|((mv, _), w)| (mv, w / total))
            .collect()
    }

    pub fn stats(&self) -> TreeStats {
        let root = self.get(self.root);
        TreeStats {
            total_nodes: self.nodes.len(),
            root_visits: root.visit_count,
            root_value: root.mean_value(),
            max_depth: self.max_depth(),
        }
    }

    fn max_depth(&self) -> u32 {
        let mut max = 0;
        let mut stack = vec![(self.root, 0u32)];
        while let Some((id, depth)) = stack.pop() {
            max = max.max(depth);
            for &(_, child) in &self.get(id).children {
                stack.push((child, depth + 1));
            }
        }
        max
    }
}

/// Statistics about an MCTS tree.
#[derive(Debug, Clone)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub root_visits: u32,
    pub root_value: f32,
    pub max_depth: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adds the first `n` legal moves of the root as children with equal priors.
    fn tree_with_children(n: usize) -> (MctsTree, Vec<NodeId>) {
        let root_pos = Position::startpos();
        let mut tree = MctsTree::new(root_pos.clone());
        let moves = root_pos.legal_moves();
        let ids = moves
            .iter()
            .take(n)
            .map(|mv| {
                let child = root_pos.play(mv).unwrap();
                tree.add_child(tree.root(), *mv, 1.0 / n as f32, child)
            })
            .collect();
        (tree, ids)
    }

    #[test]
    fn test_new_tree() {
        let tree = MctsTree::new(Position::startpos());
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root(), NodeId(0));
        assert!(tree.get(tree.root()).parent.is_none());
    }

    #[test]
    fn test_add_child() {
        let (tree, ids) = tree_with_children(2);
        assert_eq!(tree.len(), 3);
        assert_eq!(ids, vec![NodeId(1), NodeId(2)]);

        let root = tree.get(tree.root());
        assert_eq!(root.children.len(), 2);
        assert!(root.children[0].0 < root.children[1].0);

        let child = tree.get(ids[0]);
        assert_eq!(child.parent, tree.root());
        assert_eq!(child.mv, Some(root.children[0].0));
    }

    #[test]
    fn test_backpropagate() {
        let (mut tree, ids) = tree_with_children(1);
        let child_pos = tree.get(ids[0]).position.clone();
        let reply = child_pos.legal_moves()[0];
        let grandchild = tree.add_child(ids[0], reply, 1.0, child_pos.play(&reply).unwrap());

        tree.backpropagate(grandchild, 1.0);

        assert_eq!(tree.get(grandchild).visit_count, 1);
        assert_eq!(tree.get(ids[0]).visit_count, 1);
        assert_eq!(tree.get(tree.root()).visit_count, 1);

        assert!((tree.get(grandchild).value_sum - 1.0).abs() < 1e-6);
        assert!((tree.get(ids[0]).value_sum - (-1.0)).abs() < 1e-6);
        assert!((tree.get(tree.root()).value_sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_select_child_prefers_prior_then_lowest_move() {
        let (mut tree, ids) = tree_with_children(3);
        tree.get_mut(tree.root()).visit_count = 1;

        // all equal: first child wins
        assert_eq!(tree.select_child(tree.root(), 1.0), Some(ids[0]));

        tree.get_mut(ids[2]).prior = 0.9;
        assert_eq!(tree.select_child(tree.root(), 1.0), Some(ids[2]));
    }

    #[test]
    fn test_root_policy() {
        let (mut tree, ids) = tree_with_children(2);
        tree.get_mut(ids[0]).visit_count = 30;
        tree.get_mut(ids[1]).visit_count = 70;

        let policy = tree.root_policy(1.0);
        assert!((policy[0].1 - 0.3).abs() < 1e-6);
        assert!((policy[1].1 - 0.7).abs() < 1e-6);

        let greedy = tree.root_policy(0.0);
        assert_eq!(greedy[0].1, 0.0);
        assert_eq!(greedy[1].1, 1.0);

        // sharpening keeps the order and still sums to one
        let sharp = tree.root_policy(0.25);
        assert!(sharp[1].1 > 0.9);
        let sum: f32 = sharp.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_best_move_ties_go_to_lowest_move() {
        let (mut tree, ids) = tree_with_children(3);
        tree.get_mut(ids[1]).visit_count = 5;
        tree.get_mut(ids[2]).visit_count = 5;
        let (mv, visits) = tree.best_move().unwrap();
        assert_eq!(visits, 5);
        assert_eq!(Some(mv), tree.get(ids[1]).mv);
    }

    #[test]
    fn test_tree_stats() {
        let (tree, _) = tree_with_children(1);
        let stats = tree.stats();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.max_depth, 1);
    }
}
