//! Canonical bit-plane board.
//!
//! A board is two 225-bit planes packed into `u64` words. Plane 0 always
//! holds the stones of the side to move; [`Chessboard::apply`] places a stone
//! on plane 0 and swaps the planes, so the side to move flips implicitly and
//! every board in the system stays canonical.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{CHESSBOARD_SIZE, IN_A_ROW, NUM_CELLS};
use crate::game::outcome::Outcome;

const PLANE_WORDS: usize = NUM_CELLS.div_ceil(64);

/// Line directions scanned by the win test: east, north-east, north,
/// north-west. Four orientations cover all eight arrows.
const DIRS: [(isize, isize); 4] = [(0, 1), (-1, 1), (-1, 0), (-1, -1)];

/// Flattened cell index, row-major.
pub fn cell_index(x: usize, y: usize) -> usize {
    x * CHESSBOARD_SIZE + y
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Chessboard {
    planes: [[u64; PLANE_WORDS]; 2],
}

impl Chessboard {
    pub fn empty() -> Chessboard {
        Chessboard::default()
    }

    pub fn stone(&self, who: usize, x: usize, y: usize) -> bool {
        let idx = cell_index(x, y);
        self.planes[who][idx / 64] >> (idx % 64) & 1 == 1
    }

    /// Put a stone of the given plane onto the board. Test setups and
    /// decoders use this; during play stones only enter through [`apply`].
    ///
    /// [`apply`]: Chessboard::apply
    pub fn place_stone(&mut self, who: usize, x: usize, y: usize) {
        let idx = cell_index(x, y);
        self.planes[who][idx / 64] |= 1 << (idx % 64);
    }

    /// A move is valid iff it is on the board and the cell is empty in both
    /// planes.
    pub fn stone_is_valid(&self, x: usize, y: usize) -> bool {
        x < CHESSBOARD_SIZE
            && y < CHESSBOARD_SIZE
            && !self.stone(0, x, y)
            && !self.stone(1, x, y)
    }

    /// Place a stone for the side to move and canonicalize for the opponent.
    pub fn apply(&self, x: usize, y: usize) -> Chessboard {
        debug_assert!(self.stone_is_valid(x, y));
        let mut next = *self;
        next.place_stone(0, x, y);
        next.planes.swap(0, 1);
        next
    }

    pub fn stone_count(&self) -> usize {
        self.planes
            .iter()
            .flatten()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// Both planes claiming one cell is unrepresentable through `apply`; a
    /// board arriving from outside is checked with this before use.
    pub fn is_consistent(&self) -> bool {
        self.planes[0]
            .iter()
            .zip(&self.planes[1])
            .all(|(a, b)| a & b == 0)
    }

    /// Scan every line start for `IN_A_ROW` consecutive stones of either
    /// plane, then check for a draw by occupancy. `None` means the game is
    /// still going.
    pub fn winner(&self) -> Option<Outcome> {
        for who in 0..2 {
            for x in 0..CHESSBOARD_SIZE {
                for y in 0..CHESSBOARD_SIZE {
                    for (dx, dy) in DIRS {
                        if self.run_from(who, x, y, dx, dy) {
                            return Some(Outcome::Win(who));
                        }
                    }
                }
            }
        }
        if self.stone_count() >= NUM_CELLS {
            return Some(Outcome::Draw);
        }
        None
    }

    fn run_from(&self, who: usize, x: usize, y: usize, dx: isize, dy: isize) -> bool {
        for i in 0..IN_A_ROW as isize {
            let nx = x as isize + dx * i;
            let ny = y as isize + dy * i;
            if nx < 0 || ny < 0 || nx >= CHESSBOARD_SIZE as isize || ny >= CHESSBOARD_SIZE as isize
            {
                return false;
            }
            if !self.stone(who, nx as usize, ny as usize) {
                return false;
            }
        }
        true
    }

    /// Clockwise quarter turn; `(0, 0)` maps to `(0, S-1)`.
    pub fn rotate90(&self) -> Chessboard {
        let mut next = Chessboard::empty();
        for who in 0..2 {
            for x in 0..CHESSBOARD_SIZE {
                for y in 0..CHESSBOARD_SIZE {
                    if self.stone(who, x, y) {
                        next.place_stone(who, y, CHESSBOARD_SIZE - 1 - x);
                    }
                }
            }
        }
        next
    }

    /// Mirror across the vertical axis.
    pub fn flip_horizontal(&self) -> Chessboard {
        let mut next = Chessboard::empty();
        for who in 0..2 {
            for x in 0..CHESSBOARD_SIZE {
                for y in 0..CHESSBOARD_SIZE {
                    if self.stone(who, x, y) {
                        next.place_stone(who, x, CHESSBOARD_SIZE - 1 - y);
                    }
                }
            }
        }
        next
    }

    /// Dense `(2, S, S)` float encoding for the evaluator boundary.
    pub fn to_features(&self) -> Vec<f32> {
        let mut features = vec![0f32; 2 * NUM_CELLS];
        for who in 0..2 {
            for x in 0..CHESSBOARD_SIZE {
                for y in 0..CHESSBOARD_SIZE {
                    if self.stone(who, x, y) {
                        features[who * NUM_CELLS + cell_index(x, y)] = 1.0;
                    }
                }
            }
        }
        features
    }

    /// FNV-1a over the packed planes. Stable across runs; the deterministic
    /// hash oracle keys off it.
    pub fn fingerprint(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for plane in &self.planes {
            for word in plane {
                for byte in word.to_le_bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x100_0000_01b3);
                }
            }
        }
        hash
    }
}

impl fmt::Debug for Chessboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        for x in 0..CHESSBOARD_SIZE {
            for y in 0..CHESSBOARD_SIZE {
                let cell = if self.stone(0, x, y) {
                    'x'
                } else if self.stone(1, x, y) {
                    'o'
                } else {
                    '.'
                };
                write!(f, "{cell}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
