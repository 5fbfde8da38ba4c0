use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::entity::Position;

/// The single random stream of one simulation run.
///
/// Every stochastic decision of a run draws from here, in a fixed order, so a
/// seed fully determines the run. The stream position can be captured with
/// [`RandomSource::state`] and restored later to continue bit-for-bit.
#[derive(Clone, Debug)]
pub struct RandomSource {
    seed: u64,
    rng: ChaCha8Rng,
}

/// Serializable stream position: seed plus the 128-bit word counter split in
/// two halves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomState {
    pub seed: u64,
    pub word_pos_hi: u64,
    pub word_pos_lo: u64,
}

impl RandomSource {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Random seed drawn from the thread RNG, for runs nobody asked to replay.
    pub fn from_entropy() -> Self {
        let seed = rand::rng().random_range(1..u64::MAX);
        Self::seeded(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform draw in `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Uniform integer in `[0, n)`. `n` must be positive.
    pub fn below(&mut self, n: usize) -> usize {
        debug_assert!(n > 0, "below(0) has no valid outcome");
        self.rng.random_range(0..n)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// Uniform point over the disk of `radius` around `center`.
    /// `r = R·sqrt(U)` keeps the areal density flat.
    pub fn point_in_disk(&mut self, center: Position, radius: f64) -> Position {
        let r = radius * self.uniform().sqrt();
        let theta = 2.0 * PI * self.uniform();
        center.offset(r * theta.cos(), r * theta.sin())
    }

    pub fn state(&self) -> RandomState {
        let pos = self.rng.get_word_pos();
        RandomState {
            seed: self.seed,
            word_pos_hi: (pos >> 64) as u64,
            word_pos_lo: pos as u64,
        }
    }

    pub fn from_state(state: RandomState) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(state.seed);
        rng.set_word_pos(((state.word_pos_hi as u128) << 64) | state.word_pos_lo as u128);
        Self {
            seed: state.seed,
            rng,
        }
    }
}
