//! Seedable randomness for graph construction.
//!
//! Irregular graphs are often wired by random choice (pick two rolled
//! windows to compare, pick a subset of inputs to audit, ...). Drawing those
//! choices from a [`Sampler`] owned by the blueprint, instead of from a
//! thread-local generator, makes every such graph reproducible from its seed.

use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

/// A seeded random source used while wiring a graph.
#[derive(Debug, Clone)]
pub struct Sampler {
    seed: u64,
    rng: StdRng,
}

impl Sampler {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A sampler with a fresh random seed. The seed is still recorded and can
    /// be read back with [`Sampler::seed`] to reproduce the graph.
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Picks one element uniformly. `None` only for an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Draws `count` ordered pairs, each element picked independently, so
    /// duplicated pairs and self-pairs are possible.
    pub fn pairs<T: Copy>(&mut self, items: &[T], count: usize) -> Vec<(T, T)> {
        if items.is_empty() {
            return Vec::new();
        }

        (0..count)
            .map(|_| {
                let a = items[self.rng.random_range(0..items.len())];
                let b = items[self.rng.random_range(0..items.len())];
                (a, b)
            })
            .collect()
    }

    /// Uniform integer in the inclusive range.
    pub fn range(&mut self, range: RangeInclusive<u64>) -> u64 {
        self.rng.random_range(range)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::from_entropy()
    }
}
