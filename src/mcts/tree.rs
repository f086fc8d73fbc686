//! The batched Monte-Carlo Tree Search engine.
//!
//! One engine owns one logical game tree, stored as an arena. A search step
//! runs `batch_size` cooperative descents: each descent walks the PUCT rule
//! down to a terminal node or an unexpanded leaf, marking its path with a
//! virtual loss so the following descents spread to different lines. All
//! reserved leaves are then evaluated in a single oracle call, and every path
//! is backed up with the real value, replacing its virtual loss.
//!
//! There are no threads in here; concurrency is purely cooperative and the
//! only blocking point is the evaluator call.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma};

use crate::config::{CHESSBOARD_SIZE, NUM_CELLS};
use crate::game::{cell_index, Chessboard};
use crate::mcts::node::{Node, NodeId};
use crate::neural::evaluator::validate_evaluation;
use crate::neural::Evaluator;
use crate::{Error, Result};

/// Fraction of the root prior kept when Dirichlet noise is mixed in.
const NOISE_PRIOR_WEIGHT: f32 = 0.75;

pub struct Mcts {
    nodes: Vec<Node>,
    root: NodeId,
    vloss: f32,
    batch_size: usize,
    evaluator: Arc<dyn Evaluator>,
    rng: StdRng,
}

impl Mcts {
    /// Build an engine over a canonical starting position.
    ///
    /// The noise RNG is seeded from the OS; use [`Mcts::with_rng`] when the
    /// search must be reproducible.
    pub fn new(
        chessboard: Chessboard,
        virtual_loss: f32,
        batch_size: usize,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Mcts> {
        Mcts::with_rng(
            chessboard,
            virtual_loss,
            batch_size,
            evaluator,
            StdRng::from_rng(&mut rand::rng()),
        )
    }

    pub fn with_rng(
        chessboard: Chessboard,
        virtual_loss: f32,
        batch_size: usize,
        evaluator: Arc<dyn Evaluator>,
        rng: StdRng,
    ) -> Result<Mcts> {
        assert!(batch_size >= 1, "batch size must be at least 1");
        assert!(
            virtual_loss >= 0.0 && virtual_loss.is_finite(),
            "virtual loss must be non-negative, got {virtual_loss}"
        );
        if !chessboard.is_consistent() {
            return Err(Error::InvalidBoard(
                "a cell is occupied on both planes".into(),
            ));
        }
        Ok(Mcts {
            nodes: vec![Node::new(chessboard)],
            root: NodeId(0),
            vloss: virtual_loss,
            batch_size,
            evaluator,
            rng,
        })
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Run `num_sims` simulations in mini-batches of at most `batch_size`.
    ///
    /// When `dirichlet_alpha` is set, a fresh Dirichlet draw over all cells
    /// is stored at the root and mixed into its prior during selection.
    pub fn search(
        &mut self,
        num_sims: usize,
        cpuct: f32,
        dirichlet_alpha: Option<f32>,
    ) -> Result<()> {
        if let Some(alpha) = dirichlet_alpha {
            assert!(
                alpha.is_finite() && alpha > 0.0,
                "dirichlet alpha must be positive, got {alpha}"
            );
            let noise = self.draw_noise(alpha);
            let root = self.root;
            self.node_mut(root).noise = Some(noise);
        }
        let mut done = 0;
        while done < num_sims {
            let batch = self.batch_size.min(num_sims - done);
            self.search_batch(batch, cpuct)?;
            done += batch;
        }
        Ok(())
    }

    /// A Dirichlet(α, …, α) sample is a normalized vector of Gamma(α, 1)
    /// draws.
    fn draw_noise(&mut self, alpha: f32) -> Vec<f32> {
        let gamma = Gamma::new(alpha as f64, 1.0).expect("Failed to create Gamma distribution");
        let draws: Vec<f64> = (0..NUM_CELLS).map(|_| gamma.sample(&mut self.rng)).collect();
        let total: f64 = draws.iter().sum();
        if total > 0.0 {
            draws.iter().map(|x| (x / total) as f32).collect()
        } else {
            vec![1.0 / NUM_CELLS as f32; NUM_CELLS]
        }
    }

    fn search_batch(&mut self, count: usize, cpuct: f32) -> Result<()> {
        let mut paths = Vec::with_capacity(count);
        let mut pending: Vec<NodeId> = Vec::new();
        for _ in 0..count {
            let path = self.descend(cpuct);
            let leaf = *path.last().expect("descent path is never empty");
            let node = self.node(leaf);
            if node.terminal.is_none() && !node.expanded() && !pending.contains(&leaf) {
                pending.push(leaf);
            }
            paths.push(path);
        }

        if !pending.is_empty() {
            let boards: Vec<Chessboard> =
                pending.iter().map(|id| self.node(*id).chessboard).collect();
            // A failure here leaves the virtual losses in place on every
            // reserved path; the tree is unusable and must be discarded.
            let evaluations = self.evaluator.evaluate(&boards)?;
            if evaluations.len() != pending.len() {
                return Err(Error::Evaluator(format!(
                    "evaluator returned {} outputs for a batch of {}",
                    evaluations.len(),
                    pending.len()
                )));
            }
            for (id, evaluation) in pending.iter().zip(evaluations) {
                validate_evaluation(&evaluation)?;
                self.node_mut(*id).install(evaluation);
            }
        }

        for path in &paths {
            self.backup(path);
        }
        Ok(())
    }

    /// Walk the selection rule from the root to a terminal node or an
    /// unexpanded leaf, then mark the whole path with a virtual loss: the
    /// in-flight simulation is provisionally counted as a loss for the
    /// player who moved into each node, which steers the remaining descents
    /// of the batch onto different paths.
    fn descend(&mut self, cpuct: f32) -> Vec<NodeId> {
        let mut path = vec![self.root];
        loop {
            let id = *path.last().expect("descent path is never empty");
            {
                let node = self.node(id);
                if node.terminal.is_some() || !node.expanded() {
                    break;
                }
            }
            let mv = self.select_move(id, cpuct);
            let existing = self.node(id).children[mv];
            let child = match existing {
                Some(child) => child,
                None => {
                    let board = self
                        .node(id)
                        .chessboard
                        .apply(mv / CHESSBOARD_SIZE, mv % CHESSBOARD_SIZE);
                    let child = self.alloc(Node::new(board));
                    self.node_mut(id).children[mv] = Some(child);
                    child
                }
            };
            path.push(child);
        }

        let vloss = self.vloss;
        for &id in &path {
            let node = self.node_mut(id);
            node.n += 1;
            node.sigma_v += vloss;
        }
        path
    }

    /// PUCT argmax over legal moves; ties go to the lowest flattened index.
    fn select_move(&self, id: NodeId, cpuct: f32) -> usize {
        let node = self.node(id);
        let sqrt_parent = (node.n as f32).sqrt();
        let mut best_score = f32::NEG_INFINITY;
        let mut best_idx = 0;
        for idx in 0..NUM_CELLS {
            if !node
                .chessboard
                .stone_is_valid(idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE)
            {
                continue;
            }
            let prior = match &node.noise {
                Some(noise) => NOISE_PRIOR_WEIGHT * node.p[idx] + (1.0 - NOISE_PRIOR_WEIGHT) * noise[idx],
                None => node.p[idx],
            };
            // the child's statistics are in the opponent's perspective
            let (q, visits) = match node.children[idx] {
                Some(child) => {
                    let child = self.node(child);
                    (-child.q(), child.n)
                }
                None => (0.0, 0),
            };
            let score = q + cpuct * prior * sqrt_parent / (1.0 + visits as f32);
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }
        debug_assert!(best_score > f32::NEG_INFINITY, "no legal move to select");
        best_idx
    }

    /// Replace the virtual loss on a completed path with the real leaf
    /// value, flipping the perspective at every step. Visit counts stay: the
    /// virtual visits become real visits.
    fn backup(&mut self, path: &[NodeId]) {
        let vloss = self.vloss;
        let mut delta = self.node(*path.last().expect("descent path is never empty")).v;
        for &id in path.iter().rev() {
            let node = self.node_mut(id);
            node.sigma_v += delta - vloss;
            delta = -delta;
        }
    }

    /// Normalized visit-count distribution at the root.
    ///
    /// `temperature == 0` puts the mass uniformly on the most-visited
    /// children; otherwise mass is proportional to `n^(1/τ)`. A root with no
    /// visited child yet yields the uniform distribution over legal moves.
    pub fn get_pi(&self, temperature: f32) -> Vec<f32> {
        let root = self.node(self.root);
        let mut counts = vec![0u64; NUM_CELLS];
        for (idx, child) in root.children.iter().enumerate() {
            if let Some(child) = child {
                counts[idx] = self.node(*child).n as u64;
            }
        }

        let mut pi = vec![0f32; NUM_CELLS];
        if counts.iter().all(|&c| c == 0) {
            let legal: Vec<usize> = (0..NUM_CELLS)
                .filter(|idx| {
                    root.chessboard
                        .stone_is_valid(idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE)
                })
                .collect();
            for &idx in &legal {
                pi[idx] = 1.0 / legal.len() as f32;
            }
            return pi;
        }

        if temperature == 0.0 {
            let max = counts.iter().copied().max().unwrap_or(0);
            let winners: Vec<usize> = (0..NUM_CELLS).filter(|&idx| counts[idx] == max).collect();
            for &idx in &winners {
                pi[idx] = 1.0 / winners.len() as f32;
            }
        } else {
            let exponent = 1.0 / temperature as f64;
            let weights: Vec<f64> = counts
                .iter()
                .map(|&c| if c == 0 { 0.0 } else { (c as f64).powf(exponent) })
                .collect();
            let total: f64 = weights.iter().sum();
            for (idx, weight) in weights.iter().enumerate() {
                pi[idx] = (weight / total) as f32;
            }
        }
        pi
    }

    /// Commit the move `(x, y)`: the chosen child becomes the root, every
    /// sibling subtree is dropped and the root noise is cleared. An illegal
    /// move here is a programmer error.
    ///
    /// A child that was never visited is created and expanded on the spot so
    /// the new root carries priors.
    pub fn step_forward(&mut self, x: usize, y: usize) -> Result<()> {
        let root = self.root;
        assert!(
            self.node(root).terminal.is_none(),
            "step_forward on a terminated game"
        );
        assert!(
            self.node(root).chessboard.stone_is_valid(x, y),
            "illegal move ({x}, {y})"
        );

        let idx = cell_index(x, y);
        let existing = self.node(root).children[idx];
        let child = match existing {
            Some(child) => child,
            None => {
                let board = self.node(root).chessboard.apply(x, y);
                self.alloc(Node::new(board))
            }
        };

        if self.node(child).terminal.is_none() && !self.node(child).expanded() {
            let board = self.node(child).chessboard;
            let evaluation = self
                .evaluator
                .evaluate(&[board])?
                .into_iter()
                .next()
                .ok_or_else(|| Error::Evaluator("evaluator returned an empty batch".into()))?;
            validate_evaluation(&evaluation)?;
            self.node_mut(child).install(evaluation);
        }

        let mut fresh = Vec::new();
        self.copy_subtree(child, &mut fresh);
        self.nodes = fresh;
        self.root = NodeId(0);
        self.node_mut(NodeId(0)).noise = None;
        Ok(())
    }

    fn copy_subtree(&self, old: NodeId, fresh: &mut Vec<Node>) -> NodeId {
        let new_id = NodeId(fresh.len() as u32);
        fresh.push(self.node(old).clone());
        for idx in 0..NUM_CELLS {
            if let Some(old_child) = self.node(old).children[idx] {
                let new_child = self.copy_subtree(old_child, fresh);
                fresh[new_id.index()].children[idx] = Some(new_child);
            }
        }
        new_id
    }

    pub fn terminated(&self) -> bool {
        self.node(self.root).terminal.is_some()
    }

    pub fn chessboard(&self) -> Chessboard {
        self.node(self.root).chessboard
    }

    /// The root's evaluator value, or its terminal value once the game is
    /// over.
    pub fn v(&self) -> f32 {
        self.node(self.root).v
    }

    pub fn root_visits(&self) -> u32 {
        self.node(self.root).n
    }

    /// Visit count and mean value of the root child at `(x, y)`, if it has
    /// been created.
    pub fn child_stats(&self, x: usize, y: usize) -> Option<(u32, f32)> {
        let child = self.node(self.root).children[cell_index(x, y)]?;
        let node = self.node(child);
        Some((node.n, node.q()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IN_A_ROW;
    use crate::game::Outcome;
    use crate::neural::{Evaluation, HashEvaluator, UniformEvaluator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seeded(
        board: Chessboard,
        vloss: f32,
        batch: usize,
        evaluator: Arc<dyn Evaluator>,
    ) -> Mcts {
        Mcts::with_rng(board, vloss, batch, evaluator, StdRng::seed_from_u64(42)).unwrap()
    }

    fn argmax(values: &[f32]) -> usize {
        let mut best = 0;
        for (idx, value) in values.iter().enumerate() {
            if *value > values[best] {
                best = idx;
            }
        }
        best
    }

    /// Uniform-value oracle whose policy weights each empty cell by the
    /// length of the runs it would extend or block, the way any sensible
    /// gomoku prior does.
    struct ThreatEvaluator;

    impl ThreatEvaluator {
        fn run_through(board: &Chessboard, who: usize, x: usize, y: usize, dx: i32, dy: i32) -> i32 {
            let mut run = 0;
            for sign in [1i32, -1] {
                let mut step = 1;
                loop {
                    let nx = x as i32 + sign * dx * step;
                    let ny = y as i32 + sign * dy * step;
                    if nx < 0
                        || ny < 0
                        || nx >= CHESSBOARD_SIZE as i32
                        || ny >= CHESSBOARD_SIZE as i32
                        || !board.stone(who, nx as usize, ny as usize)
                    {
                        break;
                    }
                    run += 1;
                    step += 1;
                }
            }
            run
        }
    }

    impl Evaluator for ThreatEvaluator {
        fn evaluate(&self, batch: &[Chessboard]) -> Result<Vec<Evaluation>> {
            Ok(batch
                .iter()
                .map(|board| {
                    let mut policy = vec![0f32; NUM_CELLS];
                    for x in 0..CHESSBOARD_SIZE {
                        for y in 0..CHESSBOARD_SIZE {
                            if !board.stone_is_valid(x, y) {
                                continue;
                            }
                            let mut weight = 1e-3;
                            for who in 0..2 {
                                for (dx, dy) in [(0, 1), (1, 1), (1, 0), (1, -1)] {
                                    let run = Self::run_through(board, who, x, y, dx, dy);
                                    weight += 10f32.powi(run) - 1.0;
                                }
                            }
                            policy[cell_index(x, y)] = weight;
                        }
                    }
                    let total: f32 = policy.iter().sum();
                    for p in &mut policy {
                        *p /= total;
                    }
                    Evaluation { policy, value: 0.0 }
                })
                .collect())
        }
    }

    struct FailingEvaluator {
        calls_before_failure: AtomicUsize,
    }

    impl Evaluator for FailingEvaluator {
        fn evaluate(&self, batch: &[Chessboard]) -> Result<Vec<Evaluation>> {
            if self.calls_before_failure.fetch_sub(1, Ordering::SeqCst) == 0 {
                return Err(Error::Evaluator("oracle went away".into()));
            }
            UniformEvaluator::default().evaluate(batch)
        }
    }

    #[test]
    fn inconsistent_board_is_rejected() {
        let mut board = Chessboard::empty();
        board.place_stone(0, 3, 3);
        board.place_stone(1, 3, 3);
        let result = Mcts::new(board, 1.0, 8, Arc::new(UniformEvaluator::default()));
        assert!(matches!(result, Err(Error::InvalidBoard(_))));
    }

    #[test]
    fn terminal_position_detected_on_construction() {
        // five opponent stones along the first row: the side to move has
        // already lost
        let mut board = Chessboard::empty();
        for y in 0..IN_A_ROW {
            board.place_stone(1, 0, y);
        }
        let mcts = seeded(board, 1.0, 8, Arc::new(UniformEvaluator::default()));
        assert!(mcts.terminated());
        assert_eq!(mcts.v(), -1.0);
        assert_eq!(board.winner(), Some(Outcome::Win(1)));
    }

    #[test]
    fn zero_sims_leaves_the_tree_untouched() {
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            8,
            Arc::new(UniformEvaluator::default()),
        );
        mcts.search(0, 3.0, None).unwrap();
        assert_eq!(mcts.nodes.len(), 1);
        assert_eq!(mcts.root_visits(), 0);

        // the fallback distribution is uniform over legal moves
        let pi = mcts.get_pi(0.0);
        assert!((pi.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((pi[0] - 1.0 / NUM_CELLS as f32).abs() < 1e-7);
    }

    #[test]
    fn search_concentrates_on_legal_cells_from_the_empty_board() {
        // scenario: constant evaluator, 1600 sims, cpuct 3, no noise
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            8,
            Arc::new(UniformEvaluator::default()),
        );
        mcts.search(1600, 3.0, None).unwrap();
        assert_eq!(mcts.root_visits(), 1600);

        let pi = mcts.get_pi(0.0);
        assert!((pi.iter().sum::<f32>() - 1.0).abs() < 1e-6);

        // the argmax of pi is the most-visited child
        let best = argmax(&pi);
        let (best_visits, _) = mcts
            .child_stats(best / CHESSBOARD_SIZE, best % CHESSBOARD_SIZE)
            .unwrap();
        for idx in 0..NUM_CELLS {
            if let Some((n, _)) = mcts.child_stats(idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE) {
                assert!(n <= best_visits);
            }
        }
    }

    #[test]
    fn visit_counts_respect_the_tree_invariant() {
        for batch in [1usize, 8] {
            let mut mcts = seeded(
                Chessboard::empty(),
                1.0,
                batch,
                Arc::new(HashEvaluator { seed: 3 }),
            );
            mcts.search(600, 3.0, None).unwrap();
            for node in &mcts.nodes {
                if node.n == 0 {
                    continue;
                }
                let child_sum: u32 = node
                    .children
                    .iter()
                    .flatten()
                    .map(|child| mcts.node(*child).n)
                    .sum();
                assert!(
                    node.n >= 1 + child_sum || (child_sum == 0 && node.n >= 1),
                    "visits {} vs children {}",
                    node.n,
                    child_sum
                );
            }
            // serial expansion gives the exact form at the root
            if batch == 1 {
                let child_sum: u32 = mcts.nodes[mcts.root.index()]
                    .children
                    .iter()
                    .flatten()
                    .map(|child| mcts.node(*child).n)
                    .sum();
                assert_eq!(mcts.root_visits(), 1 + child_sum);
            }
        }
    }

    #[test]
    fn selection_is_the_puct_argmax() {
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            4,
            Arc::new(HashEvaluator { seed: 9 }),
        );
        mcts.search(200, 3.0, None).unwrap();

        let root = mcts.root;
        let selected = mcts.select_move(root, 3.0);
        let node = mcts.node(root);
        let sqrt_parent = (node.n as f32).sqrt();
        let score_of = |idx: usize| {
            let (q, visits) = match node.children[idx] {
                Some(child) => (-mcts.node(child).q(), mcts.node(child).n),
                None => (0.0, 0),
            };
            q + 3.0 * node.p[idx] * sqrt_parent / (1.0 + visits as f32)
        };
        let selected_score = score_of(selected);
        for idx in 0..NUM_CELLS {
            if node
                .chessboard
                .stone_is_valid(idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE)
            {
                assert!(score_of(idx) <= selected_score);
                // lowest flattened index wins ties
                if score_of(idx) == selected_score {
                    assert!(selected <= idx);
                }
            }
        }
    }

    #[test]
    fn pi_assigns_no_mass_to_occupied_cells() {
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            8,
            Arc::new(HashEvaluator { seed: 5 }),
        );
        mcts.search(256, 3.0, None).unwrap();
        mcts.step_forward(7, 7).unwrap();
        mcts.search(256, 3.0, None).unwrap();

        for temperature in [0.0, 0.5, 1.0] {
            let pi = mcts.get_pi(temperature);
            assert!((pi.iter().sum::<f32>() - 1.0).abs() < 1e-6);
            assert_eq!(pi[cell_index(7, 7)], 0.0);
        }
    }

    #[test]
    fn temperature_one_is_proportional_to_visit_counts() {
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            8,
            Arc::new(HashEvaluator { seed: 11 }),
        );
        mcts.search(400, 3.0, None).unwrap();
        let pi = mcts.get_pi(1.0);
        let total: u32 = (0..NUM_CELLS)
            .filter_map(|idx| mcts.child_stats(idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE))
            .map(|(n, _)| n)
            .sum();
        for idx in 0..NUM_CELLS {
            if let Some((n, _)) = mcts.child_stats(idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE) {
                assert!((pi[idx] - n as f32 / total as f32).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn step_forward_preserves_the_chosen_subtree() {
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            8,
            Arc::new(HashEvaluator { seed: 21 }),
        );
        mcts.search(400, 3.0, Some(0.3)).unwrap();
        assert!(mcts.nodes[mcts.root.index()].noise.is_some());

        let pi = mcts.get_pi(0.0);
        let best = argmax(&pi);
        let (x, y) = (best / CHESSBOARD_SIZE, best % CHESSBOARD_SIZE);
        let (child_visits, child_q) = mcts.child_stats(x, y).unwrap();

        mcts.step_forward(x, y).unwrap();
        assert_eq!(mcts.root_visits(), child_visits);
        let root = &mcts.nodes[mcts.root.index()];
        assert!((root.q() - child_q).abs() < 1e-6);
        assert!(root.noise.is_none());
        assert!(root.chessboard.stone(1, x, y));
    }

    #[test]
    fn step_forward_expands_an_unvisited_child() {
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            8,
            Arc::new(HashEvaluator { seed: 2 }),
        );
        // no search at all: the child does not exist yet
        mcts.step_forward(0, 0).unwrap();
        assert_eq!(mcts.nodes.len(), 1);
        assert_eq!(mcts.root_visits(), 0);
        assert!(mcts.nodes[mcts.root.index()].expanded());
    }

    #[test]
    #[should_panic(expected = "illegal move")]
    fn step_forward_panics_on_an_occupied_cell() {
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            8,
            Arc::new(UniformEvaluator::default()),
        );
        mcts.step_forward(4, 4).unwrap();
        mcts.step_forward(4, 4).unwrap();
    }

    #[test]
    fn forced_block_gets_the_most_visits() {
        // four opponent stones in an open row; the blocking cells must end
        // up with the highest visit counts
        let mut board = Chessboard::empty();
        for y in 7..11 {
            board.place_stone(1, 7, y);
        }
        let mut mcts = seeded(board, 1.0, 1, Arc::new(ThreatEvaluator));
        mcts.search(1600, 3.0, None).unwrap();

        let pi = mcts.get_pi(0.0);
        let best = argmax(&pi);
        let best_cell = (best / CHESSBOARD_SIZE, best % CHESSBOARD_SIZE);
        assert!(
            best_cell == (7, 6) || best_cell == (7, 11),
            "expected a blocking move, got {best_cell:?}"
        );
    }

    #[test]
    fn search_is_deterministic_given_seeds() {
        let run = || {
            let mut mcts = Mcts::with_rng(
                Chessboard::empty(),
                1.0,
                8,
                Arc::new(HashEvaluator { seed: 17 }),
                StdRng::seed_from_u64(1234),
            )
            .unwrap();
            mcts.search(300, 3.0, Some(0.03)).unwrap();
            mcts.get_pi(1.0)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn redrawn_noise_changes_exploration_but_not_legality() {
        let mut mcts = seeded(
            Chessboard::empty(),
            1.0,
            8,
            Arc::new(UniformEvaluator::default()),
        );
        mcts.search(64, 3.0, Some(0.03)).unwrap();
        let noise = mcts.nodes[mcts.root.index()].noise.clone().unwrap();
        assert_eq!(noise.len(), NUM_CELLS);
        assert!((noise.iter().sum::<f32>() - 1.0).abs() < 1e-3);

        // a second search redraws the noise
        mcts.search(64, 3.0, Some(0.03)).unwrap();
        let redrawn = mcts.nodes[mcts.root.index()].noise.clone().unwrap();
        assert_ne!(noise, redrawn);
    }

    #[test]
    fn evaluator_failure_aborts_the_search() {
        let evaluator = Arc::new(FailingEvaluator {
            calls_before_failure: AtomicUsize::new(2),
        });
        let mut mcts = seeded(Chessboard::empty(), 1.0, 4, evaluator);
        let result = mcts.search(200, 3.0, None);
        assert!(matches!(result, Err(Error::Evaluator(_))));
        // the reserved paths kept their virtual visits: the tree is tainted
        assert!(mcts.root_visits() > 0);
    }

    /// Plain, unbatched PUCT search used as the reference for the
    /// `batch_size = 1` equivalence check.
    struct SerialMcts {
        nodes: Vec<SerialNode>,
        evaluator: HashEvaluator,
    }

    struct SerialNode {
        chessboard: Chessboard,
        terminal: bool,
        p: Vec<f32>,
        v: f32,
        children: Vec<Option<usize>>,
        n: u32,
        sigma_v: f32,
    }

    impl SerialMcts {
        fn new(chessboard: Chessboard, evaluator: HashEvaluator) -> SerialMcts {
            SerialMcts {
                nodes: vec![SerialNode::new(chessboard)],
                evaluator,
            }
        }

        fn simulate(&mut self, id: usize, cpuct: f32) -> f32 {
            let value = if self.nodes[id].terminal {
                self.nodes[id].v
            } else if self.nodes[id].p.is_empty() {
                let evaluation = self
                    .evaluator
                    .evaluate(&[self.nodes[id].chessboard])
                    .unwrap()
                    .remove(0);
                self.nodes[id].p = evaluation.policy;
                self.nodes[id].v = evaluation.value;
                evaluation.value
            } else {
                let mv = self.select(id, cpuct);
                let child = match self.nodes[id].children[mv] {
                    Some(child) => child,
                    None => {
                        let board = self.nodes[id]
                            .chessboard
                            .apply(mv / CHESSBOARD_SIZE, mv % CHESSBOARD_SIZE);
                        self.nodes.push(SerialNode::new(board));
                        let child = self.nodes.len() - 1;
                        self.nodes[id].children[mv] = Some(child);
                        child
                    }
                };
                -self.simulate(child, cpuct)
            };
            self.nodes[id].n += 1;
            self.nodes[id].sigma_v += value;
            value
        }

        fn select(&self, id: usize, cpuct: f32) -> usize {
            let node = &self.nodes[id];
            let sqrt_parent = (node.n as f32).sqrt();
            let mut best_score = f32::NEG_INFINITY;
            let mut best_idx = 0;
            for idx in 0..NUM_CELLS {
                if !node
                    .chessboard
                    .stone_is_valid(idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE)
                {
                    continue;
                }
                let (q, visits) = match node.children[idx] {
                    Some(child) => {
                        let child = &self.nodes[child];
                        (-child.sigma_v / child.n.max(1) as f32, child.n)
                    }
                    None => (0.0, 0),
                };
                let score = q + cpuct * node.p[idx] * sqrt_parent / (1.0 + visits as f32);
                if score > best_score {
                    best_score = score;
                    best_idx = idx;
                }
            }
            best_idx
        }
    }

    impl SerialNode {
        fn new(chessboard: Chessboard) -> SerialNode {
            let terminal = chessboard.winner();
            SerialNode {
                chessboard,
                terminal: terminal.is_some(),
                p: Vec::new(),
                v: terminal.map_or(0.0, Outcome::terminal_value),
                children: vec![None; NUM_CELLS],
                n: 0,
                sigma_v: 0.0,
            }
        }
    }

    #[test]
    fn batch_of_one_matches_the_serial_reference() {
        // virtual loss 0 so the apply/replace pair adds no rounding; with a
        // batch of one the two loops are then arithmetically identical
        let evaluator = HashEvaluator { seed: 77 };
        let mut batched = seeded(Chessboard::empty(), 0.0, 1, Arc::new(evaluator));
        batched.search(300, 3.0, None).unwrap();

        let mut serial = SerialMcts::new(Chessboard::empty(), evaluator);
        for _ in 0..300 {
            serial.simulate(0, 3.0);
        }

        for idx in 0..NUM_CELLS {
            let batched_stats =
                batched.child_stats(idx / CHESSBOARD_SIZE, idx % CHESSBOARD_SIZE);
            let serial_stats = serial.nodes[0].children[idx].map(|child| {
                let child = &serial.nodes[child];
                (child.n, child.sigma_v / child.n.max(1) as f32)
            });
            match (batched_stats, serial_stats) {
                (None, None) => {}
                (Some((bn, bq)), Some((sn, sq))) => {
                    assert_eq!(bn, sn, "visit counts diverge at cell {idx}");
                    assert!((bq - sq).abs() < 1e-6);
                }
                other => panic!("child presence diverges at cell {idx}: {other:?}"),
            }
        }
    }
}
