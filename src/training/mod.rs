pub mod evaluation;
pub mod selfplay;
pub mod trainer;

pub use evaluation::play_match;
pub use selfplay::{self_play, self_play_worker, SelfPlayOptions};
pub use trainer::Trainer;
