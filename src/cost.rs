//! Training cost: regression against bootstrapped targets, or binary
//! classification of "a collision has happened by step t".

use tracing::warn;

use crate::error::{Result, ValueError};

/// Reward emitted on the step a collision happens.
pub const COLLISION_REWARD: f64 = -1.0;
/// Cumulative reward below which a step is labelled as collided.
pub const COLLISION_LABEL_THRESHOLD: f64 = -0.5;

/// Total cost plus the unregularized diagnostic term (MSE or cross-entropy).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBundle<T> {
    pub cost: T,
    pub metric: T,
}

/// Checks that every reward is either a collision or nothing.
///
/// # Errors
///
/// [`ValueError::RewardOutOfDomain`] for the first offending value.
pub fn validate_collision_rewards(rewards: &[Vec<f64>]) -> Result<()> {
    match rewards
        .iter()
        .flatten()
        .find(|&&r| r != COLLISION_REWARD && r != 0.0)
    {
        Some(&value) => {
            warn!(value, "reward value outside {{-1,0}}");
            Err(ValueError::RewardOutOfDomain { value })
        }
        None => Ok(()),
    }
}

/// Per-step labels: 1 once the running reward sum drops below the threshold.
pub fn collision_labels(rewards: &[Vec<f64>]) -> Vec<Vec<f64>> {
    rewards
        .iter()
        .map(|row| {
            row.iter()
                .scan(0.0, |sum, r| {
                    *sum += r;
                    Some(if *sum < COLLISION_LABEL_THRESHOLD { 1.0 } else { 0.0 })
                })
                .collect()
        })
        .collect()
}

#[cfg(feature = "nn")]
pub use self::tensor::{CostEvaluator, CostInputs, NStepRegressionCost, RegressionCost};

#[cfg(feature = "nn")]
mod tensor {
    use tch::{Kind, Tensor};

    use super::{collision_labels, validate_collision_rewards, CostBundle};
    use crate::convert::{rows_from_tensor, tensor_from_rows, weight_row};
    use crate::error::{Result, ValueError};

    /// Inputs shared by both cost modes. Sequence tensors are `[batch, N]`.
    pub struct CostInputs<'a> {
        /// Predicted per-step values (logits in classification mode).
        pub values: &'a Tensor,
        /// Horizon aggregation weights, length N.
        pub weights: &'a [f64],
        pub rewards: &'a Tensor,
        /// 1.0 once the episode has terminated at or before the step.
        pub dones: &'a Tensor,
        /// Bootstrapped values, zeros without target networks.
        pub target_values: &'a Tensor,
    }

    impl CostInputs<'_> {
        fn weight_tensor(&self) -> Result<Tensor> {
            let n = self.values.size2()?.1 as usize;
            if self.weights.len() != n {
                return Err(ValueError::HorizonMismatch {
                    expected: n,
                    actual: self.weights.len(),
                });
            }
            Ok(weight_row(self.weights, self.values.device()))
        }

        /// Batch size of the predicted values; an empty batch has no mean.
        fn batch_size(&self) -> Result<i64> {
            match self.values.size2()? {
                (0, _) => Err(ValueError::BatchMismatch {
                    expected: 1,
                    actual: 0,
                }),
                (batch, _) => Ok(batch),
            }
        }
    }

    /// Externally supplied regression cost. Returns `(cost, mse)`.
    pub trait RegressionCost {
        fn cost(&self, inputs: &CostInputs<'_>) -> Result<(Tensor, Tensor)>;
    }

    /// N-step discounted regression.
    ///
    /// Step `h` regresses onto `sum_{t<=h} gamma^t r_t + gamma^(h+1) (1 - done_h) target_h`,
    /// squared errors weighted by the aggregation weights and averaged over
    /// the batch.
    #[derive(Debug, Clone, Copy)]
    pub struct NStepRegressionCost {
        pub gamma: f64,
    }

    impl RegressionCost for NStepRegressionCost {
        fn cost(&self, inputs: &CostInputs<'_>) -> Result<(Tensor, Tensor)> {
            let batch = inputs.batch_size()?;
            let n = inputs.values.size()[1];
            let device = inputs.values.device();
            let weights = inputs.weight_tensor()?;

            let discounts: Vec<f32> = (0..=n).map(|t| self.gamma.powi(t as i32) as f32).collect();
            let discounts = Tensor::from_slice(&discounts).to_device(device);
            let reward_discounts = discounts.narrow(0, 0, n).unsqueeze(0);
            let bootstrap_discounts = discounts.narrow(0, 1, n).unsqueeze(0);

            let returns = (inputs.rewards.to_kind(Kind::Float) * reward_discounts)
                .cumsum(1, Kind::Float);
            let not_done = inputs.dones.to_kind(Kind::Float).neg() + 1.0;
            let targets = (returns
                + bootstrap_discounts * not_done * inputs.target_values.to_kind(Kind::Float))
            .detach();

            let squared = (inputs.values - targets).square();
            let mse = (squared * weights).sum(Kind::Float) / batch as f64;
            Ok((mse.shallow_clone(), mse))
        }
    }

    /// Cost mode, fixed at graph assembly.
    pub enum CostEvaluator {
        Regression(Box<dyn RegressionCost>),
        Classification,
    }

    impl CostEvaluator {
        pub fn regression<C: RegressionCost + 'static>(cost: C) -> Self {
            Self::Regression(Box::new(cost))
        }

        /// Classification mode.
        ///
        /// # Errors
        ///
        /// [`ValueError::ClassificationWithBootstrap`] when target networks
        /// are in use: cumulative labels already cover the whole horizon.
        pub fn classification(use_target: bool) -> Result<Self> {
            if use_target {
                return Err(ValueError::ClassificationWithBootstrap);
            }
            Ok(Self::Classification)
        }

        pub fn is_classification(&self) -> bool {
            matches!(self, Self::Classification)
        }

        /// Computes the cost bundle, adding `regularization` to the total.
        pub fn evaluate(
            &self,
            inputs: &CostInputs<'_>,
            regularization: Option<&Tensor>,
        ) -> Result<CostBundle<Tensor>> {
            inputs.batch_size()?;
            let (cost, metric) = match self {
                Self::Regression(cost) => cost.cost(inputs)?,
                Self::Classification => {
                    let ce = classification_cross_entropy(inputs)?;
                    (ce.shallow_clone(), ce)
                }
            };
            let cost = match regularization {
                Some(reg) => cost + reg,
                None => cost,
            };
            Ok(CostBundle { cost, metric })
        }
    }

    /// Batch- and horizon-weighted sigmoid cross-entropy against collision labels.
    fn classification_cross_entropy(inputs: &CostInputs<'_>) -> Result<Tensor> {
        let batch = inputs.batch_size()?;
        let n = inputs.values.size()[1];
        let rewards = rows_from_tensor(inputs.rewards)?;
        if rewards.len() != batch as usize {
            return Err(ValueError::BatchMismatch {
                expected: batch as usize,
                actual: rewards.len(),
            });
        }
        if let Some(row) = rewards.iter().find(|row| row.len() != n as usize) {
            return Err(ValueError::HorizonMismatch {
                expected: n as usize,
                actual: row.len(),
            });
        }
        validate_collision_rewards(&rewards)?;

        let labels = tensor_from_rows(&collision_labels(&rewards))?.to_device(inputs.values.device());
        let logits = inputs.values;
        let cross_entropies =
            logits.clamp_min(0.0) - logits * &labels + logits.abs().neg().exp().log1p();

        let weights = inputs.weight_tensor()?;
        Ok((cross_entropies * weights).sum(Kind::Float) / batch as f64)
    }

}
