use serde::{Deserialize, Serialize};

use crate::game::Chessboard;

/// One labelled self-play position.
///
/// The board is the canonical snapshot at move time, `pi` the normalized
/// visit-count distribution the search produced there, and `v` the eventual
/// game result from this position's side-to-move perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub chessboard: Chessboard,
    pub pi: Vec<f32>,
    pub v: f32,
}
