pub mod node;
pub mod tree;

pub use tree::Mcts;
