//! Game constants and the training configuration.
//!
//! The board geometry is compiled into the engine; the rest of the knobs live
//! in [`Config`], which can be loaded from a JSON file and is treated as
//! immutable once the pipeline starts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Board side length.
pub const CHESSBOARD_SIZE: usize = 15;

/// Number of collinear stones needed to win.
pub const IN_A_ROW: usize = 5;

/// Cells on the board; also the length of every flattened policy vector.
pub const NUM_CELLS: usize = CHESSBOARD_SIZE * CHESSBOARD_SIZE;

/// Tunables for the whole pipeline.
///
/// Defaults: a small residual network, 1000 simulations per move and an
/// evaluation match every 20 self-play games.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mirror of [`CHESSBOARD_SIZE`]; rejected at load time if it disagrees.
    pub chessboard_size: usize,
    /// Mirror of [`IN_A_ROW`]; rejected at load time if it disagrees.
    pub in_a_row: usize,

    pub num_residual_blocks: usize,
    pub num_filters: i64,
    pub value_head_hidden_units: i64,

    pub selfplay_num_sims: usize,
    pub selfplay_cpuct: f32,
    pub selfplay_alpha: f32,
    pub selfplay_mcts_batch: usize,

    /// Evaluation match cadence, counted in consumed self-play games.
    pub eval_freq: u64,
    pub eval_num_sims: usize,
    pub eval_cpuct: f32,
    pub eval_mcts_batch: usize,

    pub train_lr: f64,
    pub train_batch_size: usize,

    /// Pessimistic value applied along in-flight search paths.
    pub virtual_loss: f32,
    /// Move index at which the Dirichlet noise schedule switches.
    pub noise_from_move: usize,
    /// `true` applies root noise only from `noise_from_move` onward;
    /// `false` applies it only before.
    pub late_noise: bool,

    pub ckpt_dir: PathBuf,
    pub self_play_devices: Vec<String>,
    pub train_device: String,

    /// Capacity of the bounded self-play -> trainer game queue.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chessboard_size: CHESSBOARD_SIZE,
            in_a_row: IN_A_ROW,

            num_residual_blocks: 3,
            num_filters: 32,
            value_head_hidden_units: 128,

            selfplay_num_sims: 1000,
            selfplay_cpuct: 3.0,
            selfplay_alpha: 0.03,
            selfplay_mcts_batch: 8,

            eval_freq: 20,
            eval_num_sims: 1000,
            eval_cpuct: 3.0,
            eval_mcts_batch: 8,

            train_lr: 1e-3,
            train_batch_size: 64,

            virtual_loss: 1.0,
            noise_from_move: 8,
            late_noise: true,

            ckpt_dir: PathBuf::from("ckpts"),
            self_play_devices: vec!["cpu".into(), "cpu".into(), "cpu".into()],
            train_device: "cpu".into(),

            queue_capacity: 512,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file and validate it. Missing fields
    /// fall back to the defaults.
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chessboard_size != CHESSBOARD_SIZE || self.in_a_row != IN_A_ROW {
            return Err(Error::Config(format!(
                "board geometry {}x{}/{} is compiled in and cannot be reconfigured",
                CHESSBOARD_SIZE, CHESSBOARD_SIZE, IN_A_ROW
            )));
        }
        if self.num_residual_blocks == 0 || self.num_filters <= 0 {
            return Err(Error::Config("network trunk must be non-empty".into()));
        }
        if self.value_head_hidden_units <= 0 {
            return Err(Error::Config("value head needs hidden units".into()));
        }
        if self.selfplay_mcts_batch == 0 || self.eval_mcts_batch == 0 {
            return Err(Error::Config("MCTS batch sizes must be at least 1".into()));
        }
        if self.selfplay_alpha <= 0.0 || !self.selfplay_alpha.is_finite() {
            return Err(Error::Config(format!(
                "dirichlet alpha must be positive, got {}",
                self.selfplay_alpha
            )));
        }
        if self.virtual_loss < 0.0 || !self.virtual_loss.is_finite() {
            return Err(Error::Config(format!(
                "virtual loss must be non-negative, got {}",
                self.virtual_loss
            )));
        }
        if self.eval_freq == 0 {
            return Err(Error::Config("eval_freq must be at least 1".into()));
        }
        if self.train_lr <= 0.0 || self.train_batch_size == 0 {
            return Err(Error::Config("bad training hyperparameters".into()));
        }
        if self.self_play_devices.is_empty() {
            return Err(Error::Config("need at least one self-play device".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn geometry_mismatch_is_rejected() {
        let config = Config {
            chessboard_size: 19,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_is_rejected() {
        let config = Config {
            selfplay_mcts_batch: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = Config::default();
        let text = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back.selfplay_num_sims, config.selfplay_num_sims);
        assert_eq!(back.ckpt_dir, config.ckpt_dir);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"selfplay_num_sims": 64}"#).unwrap();
        assert_eq!(config.selfplay_num_sims, 64);
        assert_eq!(config.eval_freq, Config::default().eval_freq);
    }
}
