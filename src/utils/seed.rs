//! Deterministic seed derivation for reproducible random streams.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Derive an independent seed from a base seed and a path of indices
/// (epoch, batch, series, ...).
///
/// Each path element reseeds a generator from the previous draw, so nearby
/// inputs give unrelated streams and the order of the path matters.
pub fn derive_seed(seed: u64, path: &[u64]) -> u64 {
    path.iter().fold(StdRng::seed_from_u64(seed).gen(), |acc: u64, &part| {
        StdRng::seed_from_u64(acc ^ part).gen()
    })
}
