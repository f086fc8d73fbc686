pub mod chessboard;
pub mod outcome;

pub use chessboard::{cell_index, Chessboard};
pub use outcome::Outcome;
