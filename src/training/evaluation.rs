//! Head-to-head match between the candidate and the current best network.
//!
//! The candidate plays side 0. Each move gets a fresh engine over the
//! current canonical position, a noise-free search and a greedy pick. The
//! single bit that comes out of here decides promotion; a draw does not
//! promote.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Config;
use crate::game::{Chessboard, Outcome};
use crate::mcts::Mcts;
use crate::neural::Evaluator;
use crate::training::selfplay::sample_action;
use crate::Result;

/// Play one evaluation game; `true` iff the candidate won.
pub fn play_match(
    candidate: Arc<dyn Evaluator>,
    best: Arc<dyn Evaluator>,
    config: &Config,
    rng: &mut StdRng,
) -> Result<bool> {
    let mut board = Chessboard::empty();
    let mut who = 0;

    loop {
        let evaluator = if who == 0 {
            candidate.clone()
        } else {
            best.clone()
        };
        let mut mcts = Mcts::with_rng(
            board,
            config.virtual_loss,
            config.eval_mcts_batch,
            evaluator,
            StdRng::from_rng(rng),
        )?;
        mcts.search(config.eval_num_sims, config.eval_cpuct, None)?;
        let pi = mcts.get_pi(0.0);
        let (x, y) = sample_action(&pi, rng);
        board = board.apply(x, y);

        match board.winner() {
            // after the plane swap the winning row belongs to the player who
            // just moved
            Some(Outcome::Win(_)) => return Ok(who == 0),
            Some(Outcome::Draw) => return Ok(false),
            None => who = 1 - who,
        }
    }
}
