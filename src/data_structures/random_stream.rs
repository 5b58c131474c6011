use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng, SeedableRng,
};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::{FactorGraphError, Result};

// Explicit, seedable source of randomness owned by whoever consumes it (solver, estimator)
#[derive(Debug, Clone)]
pub struct RandomStream {
    rng: Xoshiro256PlusPlus,
}

impl RandomStream {
    pub fn seeded(seed: u64) -> Self {
        RandomStream {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        RandomStream {
            rng: Xoshiro256PlusPlus::from_entropy(),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    }

    // Uniform in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    // Uniform in (0, 1], never returns zero
    pub fn next_positive_f64(&mut self) -> f64 {
        1. - self.rng.gen::<f64>()
    }

    pub fn next_index(&mut self, bound: usize) -> usize {
        self.rng.gen_range(0..bound)
    }

    // Draws an index with probability proportional to `weights`
    pub fn sample_weighted(&mut self, weights: &[f64]) -> Result<usize> {
        let distribution = WeightedIndex::new(weights).map_err(|error| {
            FactorGraphError::NonFinite(format!("sampling weights ({})", error))
        })?;
        Ok(distribution.sample(&mut self.rng))
    }

    // Independent stream derived from this one
    pub fn fork(&mut self) -> RandomStream {
        let mut rng = self.rng.clone();
        rng.jump();
        self.rng.long_jump();
        RandomStream { rng }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_streams_repeat() {
        let mut a = RandomStream::seeded(7);
        let mut b = RandomStream::seeded(7);
        for _ in 0..10 {
            assert_eq!(a.next_f64(), b.next_f64());
        }
    }

    #[test]
    fn weighted_sampling_skips_zero_weights() {
        let mut stream = RandomStream::seeded(1);
        for _ in 0..100 {
            assert_eq!(stream.sample_weighted(&[0., 2., 0.]).unwrap(), 1);
        }
        assert!(stream.sample_weighted(&[0., 0.]).is_err());
    }
}
