//! Exploration applied on top of the greedy action.

use rand::Rng;
use rand_distr::{Distribution, Normal};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValueError};
use crate::space::ActionSpace;

/// Exploration inputs, fed per call by the training driver.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExplorationParams {
    /// Probability of replacing the action with a uniformly random one.
    pub epsilon: f64,
    /// Standard deviation of additive Gaussian noise (continuous spaces only).
    pub gaussian_std: f64,
}

impl ExplorationParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(ValueError::InvalidConfig(format!(
                "epsilon {} outside [0, 1]",
                self.epsilon
            )));
        }
        if !(self.gaussian_std >= 0.0) {
            return Err(ValueError::InvalidConfig(format!(
                "gaussian std {} must be >= 0",
                self.gaussian_std
            )));
        }
        Ok(())
    }

    /// Perturbs one greedy action. The result always lies in `space`.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        space: &ActionSpace,
        greedy: &[f64],
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        self.validate()?;
        if greedy.len() != space.flat_dim() {
            return Err(ValueError::ShapeMismatch(format!(
                "action has {} components, space has {}",
                greedy.len(),
                space.flat_dim()
            )));
        }

        if self.epsilon > 0.0 && rng.gen_bool(self.epsilon) {
            return Ok(random_action(space, rng));
        }

        let mut action = greedy.to_vec();
        if let ActionSpace::Continuous { .. } = space {
            if self.gaussian_std > 0.0 {
                let noise = Normal::new(0.0, self.gaussian_std)
                    .map_err(|e| ValueError::InvalidConfig(e.to_string()))?;
                for a in action.iter_mut() {
                    *a += noise.sample(rng);
                }
            }
            space.clip(&mut action);
        }
        Ok(action)
    }
}

/// Uniform action over the full declared bounds.
fn random_action<R: Rng + ?Sized>(space: &ActionSpace, rng: &mut R) -> Vec<f64> {
    match space {
        ActionSpace::Continuous { bounds, .. } => bounds
            .low
            .iter()
            .zip(&bounds.high)
            .map(|(lo, hi)| if lo == hi { *lo } else { rng.gen_range(*lo..=*hi) })
            .collect(),
        ActionSpace::Discrete { n } => {
            let category = rng.gen_range(0..*n);
            (0..*n).map(|c| if c == category { 1.0 } else { 0.0 }).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn no_exploration_is_identity() {
        let space = ActionSpace::continuous(vec![-1.0, 0.0], vec![1.0, 1.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = ExplorationParams::default()
            .apply(&space, &[0.3, 0.7], &mut rng)
            .unwrap();
        assert_eq!(out, vec![0.3, 0.7]);
    }

    #[test]
    fn gaussian_noise_stays_in_bounds() {
        let space = ActionSpace::continuous(vec![-1.0, 0.0], vec![1.0, 1.0]).unwrap();
        let params = ExplorationParams {
            epsilon: 0.0,
            gaussian_std: 5.0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let out = params.apply(&space, &[0.9, 0.9], &mut rng).unwrap();
            assert!(space.contains(&out));
        }
    }

    #[test]
    fn full_epsilon_gives_valid_one_hot() {
        let space = ActionSpace::discrete(5).unwrap();
        let params = ExplorationParams {
            epsilon: 1.0,
            gaussian_std: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..50 {
            let out = params
                .apply(&space, &[1.0, 0.0, 0.0, 0.0, 0.0], &mut rng)
                .unwrap();
            assert!(space.contains(&out));
        }
    }

    #[test]
    fn invalid_params_rejected() {
        let space = ActionSpace::discrete(2).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let params = ExplorationParams {
            epsilon: 1.5,
            gaussian_std: 0.0,
        };
        assert!(params.apply(&space, &[1.0, 0.0], &mut rng).is_err());
    }
}
