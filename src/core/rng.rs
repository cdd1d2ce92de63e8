//! Deterministic random number generation for training workers.
//!
//! One root seed per run; every actor, evaluator and the learner derive
//! their own stream from it, so no RNG state is ever shared between threads
//! and a run is reproducible per worker.
//!
//! ```
//! use selfplay_trainer::core::TrainRng;
//!
//! let root = TrainRng::new(42);
//! let mut a = root.for_worker("actor", 0);
//! let mut b = TrainRng::new(42).for_worker("actor", 0);
//!
//! assert_eq!(a.gen_index(1000), b.gen_index(1000));
//! ```

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hash::{Hash, Hasher};

/// Seeded ChaCha8 stream.
///
/// Implements [`RngCore`], so replay sampling and anything else generic over
/// `rand::Rng` accepts it.
#[derive(Clone, Debug)]
pub struct TrainRng {
    inner: ChaCha8Rng,
    seed: u64,
}

impl TrainRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Seed of this stream.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Create an independent stream for one worker.
    ///
    /// The same `(role, index)` pair always produces the same stream from the
    /// same root seed.
    #[must_use]
    pub fn for_worker(&self, role: &str, index: usize) -> Self {
        use std::collections::hash_map::DefaultHasher;

        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        role.hash(&mut hasher);
        index.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Uniform sample in `[0, 1)`.
    pub fn gen_unit(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Uniform index in `0..len`.
    ///
    /// # Panics
    /// Panics if `len` is zero.
    pub fn gen_index(&mut self, len: usize) -> usize {
        self.inner.gen_range(0..len)
    }

    /// Index drawn in proportion to `weights` (chance outcome sampling).
    ///
    /// `None` when there is nothing to choose from or no positive weight.
    pub fn choose_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().sum();
        if weights.is_empty() || total <= 0.0 {
            return None;
        }

        let mut remaining = self.inner.gen::<f64>() * total;
        for (i, &weight) in weights.iter().enumerate() {
            if remaining < weight {
                return Some(i);
            }
            remaining -= weight;
        }
        // Rounding left a sliver past the end.
        weights.iter().rposition(|&w| w > 0.0)
    }
}

impl RngCore for TrainRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = TrainRng::new(42);
        let mut b = TrainRng::new(42);
        assert_eq!(a.seed(), 42);

        for _ in 0..100 {
            assert_eq!(a.gen_index(1000), b.gen_index(1000));
        }
    }

    #[test]
    fn test_worker_streams_differ() {
        let root = TrainRng::new(7);
        let mut a = root.for_worker("actor", 0);
        let mut b = root.for_worker("actor", 1);
        let mut c = root.for_worker("evaluator", 0);

        let sa: Vec<_> = (0..10).map(|_| a.gen_index(1000)).collect();
        let sb: Vec<_> = (0..10).map(|_| b.gen_index(1000)).collect();
        let sc: Vec<_> = (0..10).map(|_| c.gen_index(1000)).collect();

        assert_ne!(sa, sb);
        assert_ne!(sa, sc);
    }

    #[test]
    fn test_worker_stream_is_deterministic() {
        let mut a = TrainRng::new(7).for_worker("learner", 0);
        let mut b = TrainRng::new(7).for_worker("learner", 0);

        for _ in 0..10 {
            assert_eq!(a.gen_index(1000), b.gen_index(1000));
        }
    }

    #[test]
    fn test_gen_unit_range() {
        let mut rng = TrainRng::new(3);
        for _ in 0..1000 {
            let x = rng.gen_unit();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_choose_weighted_skips_zero_weights() {
        let mut rng = TrainRng::new(42);
        for _ in 0..10 {
            assert_eq!(rng.choose_weighted(&[0.0, 3.0, 0.0]), Some(1));
        }
        assert_eq!(rng.choose_weighted(&[]), None);
        assert_eq!(rng.choose_weighted(&[0.0, 0.0]), None);
    }

    #[test]
    fn test_choose_weighted_follows_weights() {
        let mut rng = TrainRng::new(9);
        let mut counts = [0usize; 2];
        for _ in 0..4000 {
            counts[rng.choose_weighted(&[1.0, 3.0]).unwrap()] += 1;
        }
        assert!((800..1200).contains(&counts[0]), "{counts:?}");
    }

    #[test]
    fn test_usable_as_rand_rng() {
        let mut rng = TrainRng::new(1);
        let x: u8 = rng.gen_range(0..4);
        assert!(x < 4);
    }
}
