use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::Float;

/// Sample of `N(mu, std²)`.
pub fn randn(mu: Float, std: Float) -> Float {
    let z: Float = rand::thread_rng().sample(StandardNormal);
    mu + z * std
}

pub fn zeros(n: usize) -> Vec<Float> {
    vec![0.0; n]
}

/// Rng for one unit of work (a batch of an epoch). Seeded runs draw the same
/// augmentation for the same `(epoch, index)` no matter which worker loads it.
pub fn stream_rng(seed: Option<u64>, epoch: usize, index: usize) -> StdRng {
    match seed {
        Some(seed) => {
            let stream = ((epoch as u64) << 32) ^ index as u64;
            StdRng::seed_from_u64(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ stream)
        }
        None => StdRng::from_entropy(),
    }
}

/// Index of the first largest value, `None` for an empty slice.
pub fn argmax(values: &[Float]) -> Option<usize> {
    let (first, rest) = values.split_first()?;
    let mut best = (0, *first);
    for (i, value) in rest.iter().enumerate() {
        if *value > best.1 {
            best = (i + 1, *value);
        }
    }
    Some(best.0)
}
