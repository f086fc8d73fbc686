//! # Gobang-Zero
//!
//! Self-play reinforcement learning for Gobang (five in a row) built around a
//! batched, neural-guided Monte-Carlo Tree Search.
//!
//! The crate is organised as a pipeline:
//!
//! - **Game engine**: canonical bit-plane board, legality and win detection
//! - **MCTS engine**: virtual-loss mini-batches against a batched evaluator
//! - **Self-play workers**: produce trajectories with the current best network
//! - **Trainer**: consumes trajectories, trains a candidate, promotes it when
//!   it beats the best network in a head-to-head match
//! - **Orchestrator**: `start`/`kill` lifecycle around a background process

/// Core game logic and rules
pub mod game;

/// Monte Carlo Tree Search engine
pub mod mcts;

/// Evaluator boundary and the policy/value network
pub mod neural;

/// Trajectory records, symmetry augmentation and the bounded game queue
pub mod data;

/// Self-play driver, trainer and the candidate-vs-best match
pub mod training;

/// Checkpoint registry: numbered weight files plus the `best` index
pub mod checkpoint;

/// Compiled game constants and the immutable tunable configuration
pub mod config;

/// Worker/trainer lifecycle behind the `start`/`kill` commands
pub mod orchestrator;

mod logging;

pub use config::{Config, CHESSBOARD_SIZE, IN_A_ROW, NUM_CELLS};
pub use game::{Chessboard, Outcome};
pub use logging::setup_logging;
pub use mcts::Mcts;
pub use neural::{Evaluation, Evaluator};

/// Main error type for the Gobang-Zero library.
///
/// Illegal moves are not represented here: feeding an illegal move to
/// [`Mcts::step_forward`] is a programmer error and panics.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid board: {0}")]
    InvalidBoard(String),

    #[error("evaluator failure: {0}")]
    Evaluator(String),

    #[error("checkpoint unavailable: {0}")]
    CheckpointUnavailable(String),

    #[error("promotion raced: best index is already {current}, tried to write {attempted}")]
    PromotionRaced { current: u64, attempted: u64 },

    #[error("trajectory channel closed")]
    ChannelClosed,

    #[error("background training is already running; run \"kill\" first")]
    AlreadyRunning,

    #[error("no background training process is found")]
    NotRunning,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("torch error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
