//! Self-play: one game from the empty board to a terminal position, and the
//! worker loop that keeps producing such games with the current best
//! network.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::checkpoint::CheckpointRegistry;
use crate::config::{Config, CHESSBOARD_SIZE, NUM_CELLS};
use crate::data::{TrajectoryRecord, TrajectorySender};
use crate::game::Chessboard;
use crate::mcts::Mcts;
use crate::neural::{Evaluator, NetEvaluator};
use crate::{Error, Result};

/// Move-indexed temperature schedule.
pub type TemperatureFn = fn(usize) -> f32;

/// Full exploration for the opening, greedy afterwards.
pub fn step_temperature(mv: usize) -> f32 {
    if mv >= 8 {
        0.0
    } else {
        1.0
    }
}

/// Linearly cooled variant of the opening temperature.
pub fn linear_decay_temperature(mv: usize) -> f32 {
    if mv >= 8 {
        0.0
    } else {
        1.0 - mv as f32 / 8.0
    }
}

#[derive(Clone)]
pub struct SelfPlayOptions {
    pub num_sims: usize,
    pub cpuct: f32,
    pub alpha: f32,
    pub mcts_batch: usize,
    pub virtual_loss: f32,
    pub temperature: TemperatureFn,
    /// Move index at which the noise schedule switches.
    pub noise_from_move: usize,
    /// `true` applies root noise only from `noise_from_move` onward;
    /// `false` applies it only before.
    pub late_noise: bool,
}

impl SelfPlayOptions {
    pub fn from_config(config: &Config) -> SelfPlayOptions {
        SelfPlayOptions {
            num_sims: config.selfplay_num_sims,
            cpuct: config.selfplay_cpuct,
            alpha: config.selfplay_alpha,
            mcts_batch: config.selfplay_mcts_batch,
            virtual_loss: config.virtual_loss,
            temperature: step_temperature,
            noise_from_move: config.noise_from_move,
            late_noise: config.late_noise,
        }
    }
}

/// Sample a cell from a probability distribution by a cumulative walk.
pub fn sample_action(pi: &[f32], rng: &mut StdRng) -> (usize, usize) {
    debug_assert_eq!(pi.len(), NUM_CELLS);
    let mut remaining: f32 = rng.random_range(0.0..1.0);
    let mut fallback = 0;
    for (idx, &mass) in pi.iter().enumerate() {
        if mass <= 0.0 {
            continue;
        }
        if remaining < mass {
            return (idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE);
        }
        remaining -= mass;
        fallback = idx;
    }
    // float rounding can leave a sliver of probability unassigned; fall back
    // to the last cell that actually carried mass
    (fallback / CHESSBOARD_SIZE, fallback % CHESSBOARD_SIZE)
}

/// Play one game with the given evaluator and return its labelled records.
///
/// The terminal value is read from the finished engine and propagated
/// backwards with alternating signs, so every record's `v` is from its own
/// side-to-move perspective.
pub fn self_play(
    evaluator: Arc<dyn Evaluator>,
    options: &SelfPlayOptions,
    rng: &mut StdRng,
) -> Result<Vec<TrajectoryRecord>> {
    let mut mcts = Mcts::with_rng(
        Chessboard::empty(),
        options.virtual_loss,
        options.mcts_batch,
        evaluator,
        StdRng::from_rng(rng),
    )?;

    let mut boards = Vec::new();
    let mut pis = Vec::new();
    let mut mv = 0;
    while !mcts.terminated() {
        let noisy = if options.late_noise {
            mv >= options.noise_from_move
        } else {
            mv < options.noise_from_move
        };
        mcts.search(options.num_sims, options.cpuct, noisy.then_some(options.alpha))?;

        let pi = mcts.get_pi((options.temperature)(mv));
        boards.push(mcts.chessboard());
        let (x, y) = sample_action(&pi, rng);
        pis.push(pi);
        mcts.step_forward(x, y)?;
        mv += 1;
    }

    // the terminal value is from the loser-to-move's perspective; the last
    // record belongs to the player who just delivered it
    let mut v = -mcts.v();
    let mut records = Vec::with_capacity(boards.len());
    for (chessboard, pi) in boards.into_iter().zip(pis).rev() {
        records.push(TrajectoryRecord { chessboard, pi, v });
        v = -v;
    }
    records.reverse();
    Ok(records)
}

fn load_best_with_retry(
    config: &Config,
    device: tch::Device,
    registry: &CheckpointRegistry,
    idx: u64,
) -> NetEvaluator {
    loop {
        match NetEvaluator::load(config, device, &registry.ckpt_path(idx)) {
            Ok(evaluator) => return evaluator,
            Err(e) => {
                log::warn!("checkpoint {idx} not readable yet: {e}");
                thread::sleep(Duration::from_millis(250));
            }
        }
    }
}

/// Worker loop: follow the `best` index, reload the network when it moves,
/// and keep feeding finished games into the bounded queue. Returns only when
/// the queue is gone (the trainer died) or a search failed.
pub fn self_play_worker(
    device: tch::Device,
    registry: CheckpointRegistry,
    sender: TrajectorySender,
    config: Config,
) -> Result<()> {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    let options = SelfPlayOptions::from_config(&config);
    let mut current: Option<(u64, Arc<NetEvaluator>)> = None;

    loop {
        let best_idx = registry.wait_best();
        let evaluator = match &current {
            Some((idx, evaluator)) if *idx == best_idx => evaluator.clone(),
            _ => {
                log::info!("found a new best ckpt index: {best_idx}");
                let evaluator =
                    Arc::new(load_best_with_retry(&config, device, &registry, best_idx));
                current = Some((best_idx, evaluator.clone()));
                evaluator
            }
        };

        let records = self_play(evaluator, &options, &mut rng)?;
        log::info!("sending records: len(records) = {}", records.len());
        match sender.send(records) {
            Ok(()) => {}
            Err(Error::ChannelClosed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::{HashEvaluator, UniformEvaluator};

    fn quick_options() -> SelfPlayOptions {
        SelfPlayOptions {
            num_sims: 24,
            cpuct: 3.0,
            alpha: 0.3,
            mcts_batch: 4,
            virtual_loss: 1.0,
            temperature: step_temperature,
            noise_from_move: 8,
            late_noise: true,
        }
    }

    #[test]
    fn temperature_schedules_step_and_decay() {
        assert_eq!(step_temperature(0), 1.0);
        assert_eq!(step_temperature(7), 1.0);
        assert_eq!(step_temperature(8), 0.0);
        assert_eq!(linear_decay_temperature(0), 1.0);
        assert_eq!(linear_decay_temperature(4), 0.5);
        assert_eq!(linear_decay_temperature(8), 0.0);
    }

    #[test]
    fn sampling_respects_the_distribution_support() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut pi = vec![0f32; NUM_CELLS];
        pi[17] = 0.5;
        pi[200] = 0.5;
        for _ in 0..50 {
            let (x, y) = sample_action(&pi, &mut rng);
            let idx = x * CHESSBOARD_SIZE + y;
            assert!(idx == 17 || idx == 200);
        }
    }

    #[test]
    fn sampling_a_point_mass_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pi = vec![0f32; NUM_CELLS];
        pi[cell_idx(9, 3)] = 1.0;
        assert_eq!(sample_action(&pi, &mut rng), (9, 3));
    }

    fn cell_idx(x: usize, y: usize) -> usize {
        x * CHESSBOARD_SIZE + y
    }

    #[test]
    fn self_play_labels_alternate_from_the_winner_backwards() {
        let mut rng = StdRng::seed_from_u64(7);
        let records = self_play(
            Arc::new(HashEvaluator { seed: 99 }),
            &quick_options(),
            &mut rng,
        )
        .unwrap();
        assert!(!records.is_empty());

        let last = records.last().unwrap();
        assert!(last.v == 1.0 || last.v == 0.0, "decisive win or full draw");
        for pair in records.windows(2) {
            assert_eq!(pair[0].v, -pair[1].v);
        }
        // the first record is the empty board
        assert_eq!(records[0].chessboard, Chessboard::empty());
        for record in &records {
            assert!((record.pi.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn self_play_is_reproducible_with_a_seeded_rng() {
        let play = || {
            let mut rng = StdRng::seed_from_u64(11);
            self_play(
                Arc::new(UniformEvaluator::default()),
                &quick_options(),
                &mut rng,
            )
            .unwrap()
        };
        let a = play();
        let b = play();
        assert_eq!(a.len(), b.len());
        for (ra, rb) in a.iter().zip(&b) {
            assert_eq!(ra.chessboard, rb.chessboard);
            assert_eq!(ra.v, rb.v);
        }
    }

    #[test]
    fn noise_schedule_polarity_is_configurable() {
        // both polarities must still produce a complete, consistent game
        for late_noise in [true, false] {
            let mut rng = StdRng::seed_from_u64(3);
            let options = SelfPlayOptions {
                late_noise,
                ..quick_options()
            };
            let records =
                self_play(Arc::new(HashEvaluator { seed: 1 }), &options, &mut rng).unwrap();
            assert!(!records.is_empty());
        }
    }
}
