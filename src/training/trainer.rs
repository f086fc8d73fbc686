//! The training loop.
//!
//! One consumer thread owns the candidate network. It drains finished games
//! from the bounded queue, augments and shuffles them, runs Adam over the
//! combined policy/value loss, and every `eval_freq` consumed games plays
//! the candidate against the current best network. A won match saves the
//! candidate as `<ckpt_idx>.pt` and atomically promotes the `best` index.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::nn::OptimizerConfig;
use tch::{nn, Device, Kind, Reduction, Tensor};

use crate::checkpoint::{CheckpointRegistry, EvalRow};
use crate::config::{Config, NUM_CELLS};
use crate::data::{augment_game, TrajectoryReceiver, TrajectoryRecord};
use crate::neural::NetEvaluator;
use crate::training::evaluation::play_match;
use crate::{Error, Result};

/// Adam weight decay used for every training run.
const WEIGHT_DECAY: f64 = 1e-4;

/// Upper bound on games drained per training step, so one step cannot
/// starve the evaluation cadence indefinitely.
const MAX_GAMES_PER_STEP: usize = 16;

pub struct Trainer {
    config: Config,
    registry: CheckpointRegistry,
    receiver: TrajectoryReceiver,
    device: Device,
    candidate: Arc<NetEvaluator>,
    optimizer: nn::Optimizer,
    ckpt_idx: u64,
    last_eval_idx: u64,
    rng: StdRng,
}

impl Trainer {
    /// Resume the candidate from `<init_idx>.pt`.
    pub fn new(
        config: Config,
        registry: CheckpointRegistry,
        receiver: TrajectoryReceiver,
        device: Device,
        init_idx: u64,
    ) -> Result<Trainer> {
        let candidate = Arc::new(NetEvaluator::load(
            &config,
            device,
            &registry.ckpt_path(init_idx),
        )?);
        let optimizer = nn::Adam {
            wd: WEIGHT_DECAY,
            ..Default::default()
        }
        .build(candidate.var_store(), config.train_lr)?;

        Ok(Trainer {
            config,
            registry,
            receiver,
            device,
            candidate,
            optimizer,
            ckpt_idx: init_idx,
            last_eval_idx: init_idx,
            rng: StdRng::from_rng(&mut rand::rng()),
        })
    }

    #[cfg(test)]
    fn with_seed(mut self, seed: u64) -> Trainer {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Train until the game queue disappears.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.step() {
                Ok(()) => {}
                Err(Error::ChannelClosed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// One iteration: drain games, fit the candidate, maybe evaluate.
    fn step(&mut self) -> Result<()> {
        let mut games = vec![self.receiver.recv()?];
        while games.len() < MAX_GAMES_PER_STEP {
            match self.receiver.try_recv()? {
                Some(game) => games.push(game),
                None => break,
            }
        }
        let games_consumed = games.len() as u64;

        let mut dataset: Vec<TrajectoryRecord> =
            games.iter().flat_map(|game| augment_game(game)).collect();
        dataset.shuffle(&mut self.rng);

        let mut total_loss = 0.0;
        let mut batches = 0;
        for chunk in dataset.chunks(self.config.train_batch_size) {
            total_loss += self.train_minibatch(chunk)?;
            batches += 1;
        }
        log::info!(
            "trained on {} games ({} positions), mean loss {:.4}",
            games_consumed,
            dataset.len(),
            total_loss / batches.max(1) as f64
        );

        self.ckpt_idx += games_consumed;
        if self.ckpt_idx - self.last_eval_idx >= self.config.eval_freq {
            self.evaluate_candidate()?;
        }
        Ok(())
    }

    /// `loss = mse(v, v̂) − mean Σ π · log_softmax(p̂)`
    fn train_minibatch(&mut self, records: &[TrajectoryRecord]) -> Result<f64> {
        let boards: Vec<_> = records.iter().map(|r| r.chessboard).collect();
        let input = self.candidate.input_tensor(&boards);

        let mut pi_data = Vec::with_capacity(records.len() * NUM_CELLS);
        let mut v_data = Vec::with_capacity(records.len());
        for record in records {
            pi_data.extend_from_slice(&record.pi);
            v_data.push(record.v);
        }
        let target_pi = Tensor::from_slice(&pi_data)
            .view([records.len() as i64, NUM_CELLS as i64])
            .to_device(self.device);
        let target_v = Tensor::from_slice(&v_data).to_device(self.device);

        let (logits, values) = self.candidate.net().forward(&input, true);
        let value_loss = values.mse_loss(&target_v, Reduction::Mean);
        let log_probs = logits.log_softmax(-1, Kind::Float);
        let policy_loss = -(target_pi * log_probs).sum(Kind::Float) / records.len() as f64;
        let loss = value_loss + policy_loss;

        self.optimizer.zero_grad();
        loss.backward();
        self.optimizer.step();
        Ok(loss.double_value(&[]))
    }

    /// Candidate-vs-best match; a win publishes the candidate.
    fn evaluate_candidate(&mut self) -> Result<()> {
        let games = self.ckpt_idx - self.last_eval_idx;
        let best_idx = self.registry.wait_best();
        let best = Arc::new(NetEvaluator::load(
            &self.config,
            self.device,
            &self.registry.ckpt_path(best_idx),
        )?);

        let candidate_won = play_match(
            self.candidate.clone(),
            best,
            &self.config,
            &mut self.rng,
        )?;
        log::info!(
            "evaluation at ckpt {}: candidate {} against best {}",
            self.ckpt_idx,
            if candidate_won { "won" } else { "lost" },
            best_idx
        );

        let mut promoted = false;
        if candidate_won {
            self.candidate.save(&self.registry.ckpt_path(self.ckpt_idx))?;
            match self.registry.write_best(self.ckpt_idx) {
                Ok(()) => promoted = true,
                Err(Error::PromotionRaced { current, attempted }) => {
                    log::warn!("promotion raced: best moved to {current} before {attempted}");
                }
                Err(e) => return Err(e),
            }
        }
        self.registry.append_eval_row(&EvalRow {
            ckpt_idx: self.ckpt_idx,
            games,
            candidate_won,
            promoted,
        })?;
        self.last_eval_idx = self.ckpt_idx;
        Ok(())
    }
}
