//! Search tree node records.
//!
//! The tree is an arena: a flat vector of nodes addressed by [`NodeId`].
//! Child links are indices, so there are no reference cycles and rerooting
//! can drop whole sibling subtrees by rebuilding the vector.

use crate::config::NUM_CELLS;
use crate::game::{Chessboard, Outcome};
use crate::neural::Evaluation;

/// Index of a node in the search arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node per visited canonical board.
///
/// A node starts *fresh* (no priors). A non-terminal node becomes *evaluated*
/// once the oracle's policy and value are installed; terminal nodes carry
/// their game-theoretic value from creation and never change.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub chessboard: Chessboard,
    pub terminal: Option<Outcome>,
    /// Prior policy over the flattened board; empty until evaluated.
    pub p: Vec<f32>,
    /// Evaluator value, or the terminal value for terminal nodes.
    pub v: f32,
    /// Lazily populated child links, one slot per cell.
    pub children: Vec<Option<NodeId>>,
    /// Visit count, including in-flight virtual-loss visits.
    pub n: u32,
    /// Sum of backed-up values, in this node's side-to-move perspective.
    pub sigma_v: f32,
    /// Dirichlet noise, present on the root only while requested.
    pub noise: Option<Vec<f32>>,
}

impl Node {
    pub fn new(chessboard: Chessboard) -> Node {
        let terminal = chessboard.winner();
        let v = terminal.map_or(0.0, Outcome::terminal_value);
        Node {
            chessboard,
            terminal,
            p: Vec::new(),
            v,
            children: vec![None; NUM_CELLS],
            n: 0,
            sigma_v: 0.0,
            noise: None,
        }
    }

    /// Mean backed-up value.
    pub fn q(&self) -> f32 {
        self.sigma_v / self.n.max(1) as f32
    }

    pub fn expanded(&self) -> bool {
        !self.p.is_empty()
    }

    pub fn install(&mut self, evaluation: Evaluation) {
        debug_assert!(self.terminal.is_none() && !self.expanded());
        self.p = evaluation.policy;
        self.v = evaluation.value;
    }
}
