//! The policy/value oracle boundary.
//!
//! The search engine only ever sees this trait: a blocking, batched callable
//! from canonical boards to a policy simplex and a scalar value. The real
//! network lives behind it, and so do the two deterministic oracles used by
//! tests and baseline players.

use crate::config::NUM_CELLS;
use crate::game::Chessboard;
use crate::{Error, Result};

/// One evaluator output: a probability distribution over the flattened board
/// plus a scalar value in `[-1, 1]` from the side-to-move's perspective.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub policy: Vec<f32>,
    pub value: f32,
}

/// Batched policy+value oracle over canonical boards.
///
/// Implementations may block arbitrarily (the network does) and must not
/// keep state between calls.
pub trait Evaluator {
    fn evaluate(&self, batch: &[Chessboard]) -> Result<Vec<Evaluation>>;
}

/// Installed evaluator outputs must be probability simplexes with a bounded
/// value; anything else aborts the search.
pub(crate) fn validate_evaluation(evaluation: &Evaluation) -> Result<()> {
    if evaluation.policy.len() != NUM_CELLS {
        return Err(Error::Evaluator(format!(
            "policy has {} entries, expected {}",
            evaluation.policy.len(),
            NUM_CELLS
        )));
    }
    if evaluation.policy.iter().any(|p| *p < 0.0 || !p.is_finite()) {
        return Err(Error::Evaluator("policy has negative or non-finite mass".into()));
    }
    let sum: f32 = evaluation.policy.iter().sum();
    if (sum - 1.0).abs() > 1e-3 {
        return Err(Error::Evaluator(format!("policy sums to {sum}, expected 1")));
    }
    if !(-1.0..=1.0).contains(&evaluation.value) || !evaluation.value.is_finite() {
        return Err(Error::Evaluator(format!(
            "value {} outside [-1, 1]",
            evaluation.value
        )));
    }
    Ok(())
}

/// Constant oracle: uniform policy, fixed value.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformEvaluator {
    pub value: f32,
}

impl Evaluator for UniformEvaluator {
    fn evaluate(&self, batch: &[Chessboard]) -> Result<Vec<Evaluation>> {
        Ok(batch
            .iter()
            .map(|_| Evaluation {
                policy: vec![1.0 / NUM_CELLS as f32; NUM_CELLS],
                value: self.value,
            })
            .collect())
    }
}

/// Deterministic pseudo-random oracle keyed on the board bitstring.
///
/// Gives every position a reproducible, non-uniform policy and value, which
/// makes search behaviour testable without a network.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashEvaluator {
    pub seed: u64,
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl Evaluator for HashEvaluator {
    fn evaluate(&self, batch: &[Chessboard]) -> Result<Vec<Evaluation>> {
        Ok(batch
            .iter()
            .map(|board| {
                let key = board.fingerprint() ^ self.seed;
                let mut policy: Vec<f32> = (0..NUM_CELLS)
                    .map(|idx| {
                        let bits = splitmix64(key.wrapping_add(idx as u64));
                        // strictly positive weight in (0, 1]
                        (bits >> 40) as f32 / (1u64 << 24) as f32 + f32::EPSILON
                    })
                    .collect();
                let total: f32 = policy.iter().sum();
                for p in &mut policy {
                    *p /= total;
                }
                let value_bits = splitmix64(key ^ 0x5bf0_3635);
                let value = ((value_bits >> 40) as f32 / (1u64 << 24) as f32) * 1.8 - 0.9;
                Evaluation { policy, value }
            })
            .collect())
    }
}
