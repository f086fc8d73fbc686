/// Result of a finished game, indexed by bit-plane.
///
/// `Win(0)` means the plane-0 side (the side to move on a canonical board)
/// owns a completed row. On boards reached through legal play the winning
/// row always belongs to the player who just moved, i.e. plane 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win(usize),
    Draw,
}

impl Outcome {
    /// Terminal value from the perspective of the side to move on the board
    /// where this outcome was detected. A completed opponent row means the
    /// side to move has already lost.
    pub fn terminal_value(self) -> f32 {
        match self {
            Outcome::Win(0) => 1.0,
            Outcome::Win(_) => -1.0,
            Outcome::Draw => 0.0,
        }
    }
}
