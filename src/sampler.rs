//! Candidate action-sequence generation for the action search.

use rand::Rng;

use crate::config::SamplingStrategy;
use crate::error::{Result, ValueError};
use crate::space::ActionSpace;

/// `K` action sequences of length `H`, stored row-major as `[K, H, dim]`.
///
/// Candidates are shared by every element of an observation batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSequences {
    num_sequences: usize,
    horizon: usize,
    action_dim: usize,
    data: Vec<f64>,
}

impl ActionSequences {
    /// Wraps a flat `[K, H, dim]` buffer.
    pub fn from_flat(
        num_sequences: usize,
        horizon: usize,
        action_dim: usize,
        data: Vec<f64>,
    ) -> Result<Self> {
        let expected = num_sequences * horizon * action_dim;
        if data.len() != expected {
            return Err(ValueError::ShapeMismatch(format!(
                "expected {expected} action components, got {}",
                data.len()
            )));
        }
        Ok(Self {
            num_sequences,
            horizon,
            action_dim,
            data,
        })
    }

    pub fn num_sequences(&self) -> usize {
        self.num_sequences
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Flat `[K, H, dim]` view.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Action at step `h` of sequence `k`.
    pub fn action(&self, k: usize, h: usize) -> &[f64] {
        let start = (k * self.horizon + h) * self.action_dim;
        &self.data[start..start + self.action_dim]
    }

    /// First action of sequence `k`, the one executed now.
    pub fn first_action(&self, k: usize) -> &[f64] {
        self.action(k, 0)
    }

    /// Component `dim` of every step of sequence `k`.
    pub fn component(&self, k: usize, dim: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.horizon).map(move |h| self.action(k, h)[dim])
    }
}

/// Draws candidate action sequences from an explicitly passed random stream.
#[derive(Debug, Clone)]
pub struct ActionSampler {
    strategy: SamplingStrategy,
    space: ActionSpace,
}

impl ActionSampler {
    pub fn new(strategy: SamplingStrategy, space: ActionSpace) -> Self {
        Self { strategy, space }
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.strategy
    }

    pub fn space(&self) -> &ActionSpace {
        &self.space
    }

    /// Samples `K` sequences of length `horizon`.
    ///
    /// Continuous components are uniform within the sampling bounds; discrete
    /// steps are uniform categories encoded one-hot.
    pub fn sample<R: Rng + ?Sized>(&self, horizon: usize, rng: &mut R) -> ActionSequences {
        let k = self.strategy.num_candidates();
        let dim = self.space.flat_dim();
        let mut data = Vec::with_capacity(k * horizon * dim);

        match self.strategy {
            SamplingStrategy::Random { .. } => match self.space.sampling_bounds() {
                Some(bounds) => {
                    for _ in 0..k * horizon {
                        for (lo, hi) in bounds.low.iter().zip(&bounds.high) {
                            data.push(uniform(rng, *lo, *hi));
                        }
                    }
                }
                None => {
                    for _ in 0..k * horizon {
                        let category = rng.gen_range(0..dim);
                        data.extend((0..dim).map(|c| if c == category { 1.0 } else { 0.0 }));
                    }
                }
            },
        }

        ActionSequences {
            num_sequences: k,
            horizon,
            action_dim: dim,
            data,
        }
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if lo == hi {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn continuous_samples_within_bounds() {
        let space = ActionSpace::continuous(vec![-1.0, -0.3], vec![1.0, 0.3]).unwrap();
        let sampler = ActionSampler::new(SamplingStrategy::Random { k: 64 }, space.clone());
        let mut rng = StdRng::seed_from_u64(3);
        let seqs = sampler.sample(5, &mut rng);

        assert_eq!(seqs.num_sequences(), 64);
        assert_eq!(seqs.horizon(), 5);
        assert_eq!(seqs.as_slice().len(), 64 * 5 * 2);
        for k in 0..64 {
            for h in 0..5 {
                assert!(space.contains(seqs.action(k, h)));
            }
        }
    }

    #[test]
    fn selection_range_is_respected() {
        let space = ActionSpace::continuous(vec![-1.0, -0.3], vec![1.0, 0.3])
            .unwrap()
            .with_selection(vec![-0.2, 0.1], vec![0.2, 0.3])
            .unwrap();
        let sampler = ActionSampler::new(SamplingStrategy::Random { k: 32 }, space);
        let mut rng = StdRng::seed_from_u64(11);
        let seqs = sampler.sample(4, &mut rng);
        for k in 0..32 {
            for h in 0..4 {
                let a = seqs.action(k, h);
                assert!((-0.2..=0.2).contains(&a[0]));
                assert!((0.1..=0.3).contains(&a[1]));
            }
        }
    }

    #[test]
    fn discrete_samples_are_one_hot() {
        let space = ActionSpace::discrete(4).unwrap();
        let sampler = ActionSampler::new(SamplingStrategy::Random { k: 50 }, space.clone());
        let mut rng = StdRng::seed_from_u64(5);
        let seqs = sampler.sample(3, &mut rng);
        assert_eq!(seqs.action_dim(), 4);
        for k in 0..50 {
            for h in 0..3 {
                assert!(space.contains(seqs.action(k, h)));
            }
        }
    }

    #[test]
    fn same_seed_same_candidates() {
        let space = ActionSpace::continuous(vec![0.0], vec![1.0]).unwrap();
        let sampler = ActionSampler::new(SamplingStrategy::Random { k: 8 }, space);
        let a = sampler.sample(2, &mut StdRng::seed_from_u64(9));
        let b = sampler.sample(2, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn from_flat_checks_length() {
        assert!(ActionSequences::from_flat(2, 2, 1, vec![0.0; 4]).is_ok());
        assert!(ActionSequences::from_flat(2, 2, 1, vec![0.0; 3]).is_err());
    }
}
