//! 8-fold symmetry augmentation.
//!
//! Every board position has eight equivalent images under the dihedral group
//! of the square: four rotations, each with and without a horizontal flip.
//! The policy target rotates with the board; the value label is invariant.

use crate::config::{CHESSBOARD_SIZE, NUM_CELLS};
use crate::data::record::TrajectoryRecord;
use crate::game::cell_index;

/// Clockwise quarter turn of a flattened policy, matching
/// [`Chessboard::rotate90`].
///
/// [`Chessboard::rotate90`]: crate::game::Chessboard::rotate90
pub fn rotate_pi(pi: &[f32]) -> Vec<f32> {
    debug_assert_eq!(pi.len(), NUM_CELLS);
    let mut rotated = vec![0f32; NUM_CELLS];
    for x in 0..CHESSBOARD_SIZE {
        for y in 0..CHESSBOARD_SIZE {
            rotated[cell_index(y, CHESSBOARD_SIZE - 1 - x)] = pi[cell_index(x, y)];
        }
    }
    rotated
}

/// Mirror of a flattened policy across the vertical axis, matching
/// [`Chessboard::flip_horizontal`].
///
/// [`Chessboard::flip_horizontal`]: crate::game::Chessboard::flip_horizontal
pub fn flip_pi(pi: &[f32]) -> Vec<f32> {
    debug_assert_eq!(pi.len(), NUM_CELLS);
    let mut flipped = vec![0f32; NUM_CELLS];
    for x in 0..CHESSBOARD_SIZE {
        for y in 0..CHESSBOARD_SIZE {
            flipped[cell_index(x, CHESSBOARD_SIZE - 1 - y)] = pi[cell_index(x, y)];
        }
    }
    flipped
}

/// Expand one record into its eight symmetric images. The original record is
/// the first entry; rotations come in quarter-turn steps, each followed by
/// its flipped twin.
pub fn augment_record(record: &TrajectoryRecord) -> Vec<TrajectoryRecord> {
    let mut images = Vec::with_capacity(8);
    let mut board = record.chessboard;
    let mut pi = record.pi.clone();
    for rotation in 0..4 {
        if rotation > 0 {
            board = board.rotate90();
            pi = rotate_pi(&pi);
        }
        images.push(TrajectoryRecord {
            chessboard: board,
            pi: pi.clone(),
            v: record.v,
        });
        images.push(TrajectoryRecord {
            chessboard: board.flip_horizontal(),
            pi: flip_pi(&pi),
            v: record.v,
        });
    }
    images
}

/// Augment every record of a game, preserving nothing of the original order;
/// the trainer shuffles the result anyway.
pub fn augment_game(records: &[TrajectoryRecord]) -> Vec<TrajectoryRecord> {
    records.iter().flat_map(augment_record).collect()
}
