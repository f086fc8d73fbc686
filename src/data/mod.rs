pub mod augmentation;
pub mod buffer;
pub mod record;

pub use augmentation::{augment_game, augment_record};
pub use buffer::{trajectory_channel, TrajectoryReceiver, TrajectorySender};
pub use record::TrajectoryRecord;
