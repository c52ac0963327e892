//! One-time assembly of the value estimator into callable endpoints.
//!
//! [`GraphAssembler::build`] validates the configuration, creates the
//! "policy" parameter set (and a "target" set when requested), wires the
//! action searches, cost, and optimizer, and returns a [`PolicyGraph`]. The
//! graph's structure is fixed afterwards; only the optimizer mutates policy
//! parameters and only [`PolicyGraph::update_target`] mutates target ones.
//!
//! This module is only available with the `nn` feature.

use std::marker::PhantomData;

use rand::Rng;
use tch::nn::OptimizerConfig;
use tch::{nn, no_grad, Device, Kind, Tensor};
use tracing::{debug, info};

use crate::config::PolicyConfig;
use crate::convert::{values_from_tensor, weight_row};
use crate::cost::{CostBundle, CostEvaluator, CostInputs, NStepRegressionCost, RegressionCost};
use crate::error::{Result, ValueError};
use crate::exploration::ExplorationParams;
use crate::network::{MlpStateEncoder, StateEncoder, ValueNetwork};
use crate::selection::{DoubleEstimatorSelector, Selection};
use crate::space::ActionSpace;
use crate::sync::{NamespacedVarStore, TargetSynchronizer, POLICY_NAMESPACE, TARGET_NAMESPACE};

/// One training batch. Sequence tensors are `[batch, N]`.
pub struct TrainingBatch {
    /// `[batch, obs_history_len, obs_dim]`.
    pub observations: Tensor,
    /// `[batch, N, action_dim]`.
    pub actions: Tensor,
    pub rewards: Tensor,
    pub dones: Tensor,
    /// `[batch, obs_history_len + N, obs_dim]`, required with target networks.
    pub target_observations: Option<Tensor>,
}

/// Builder for [`PolicyGraph`].
pub struct GraphAssembler<E: StateEncoder = MlpStateEncoder> {
    config: PolicyConfig,
    space: ActionSpace,
    obs_dim: usize,
    device: Device,
    regression: Option<Box<dyn RegressionCost>>,
    _encoder: PhantomData<E>,
}

impl<E: StateEncoder> GraphAssembler<E> {
    pub fn new(config: PolicyConfig, space: ActionSpace, obs_dim: usize) -> Self {
        Self {
            config,
            space,
            obs_dim,
            device: Device::Cpu,
            regression: None,
            _encoder: PhantomData,
        }
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Replaces the default [`NStepRegressionCost`] used in regression mode.
    pub fn regression_cost<C: RegressionCost + 'static>(mut self, cost: C) -> Self {
        self.regression = Some(Box::new(cost));
        self
    }

    /// Validates the configuration and builds every endpoint.
    pub fn build(self) -> Result<PolicyGraph<E>> {
        let Self {
            config,
            space,
            obs_dim,
            device,
            regression,
            ..
        } = self;
        config.validate(&space)?;
        if obs_dim == 0 {
            return Err(ValueError::InvalidConfig(
                "observation dimension must be positive".into(),
            ));
        }
        if let Some(seed) = config.seed {
            tch::manual_seed(seed as i64);
        }

        let action_dim = space.flat_dim();
        let build_network = |store: &NamespacedVarStore| {
            ValueNetwork::<E>::new(
                &store.path(),
                config.obs_history_len,
                obs_dim,
                action_dim,
                &config.network,
                config.probcoll_strictly_increasing,
            )
        };

        let policy_store = NamespacedVarStore::new(POLICY_NAMESPACE, device);
        let policy = build_network(&policy_store);

        let target = if !config.use_target {
            TargetParams::Disabled
        } else if config.separate_target_params {
            let store = NamespacedVarStore::new(TARGET_NAMESPACE, device);
            let network = build_network(&store);
            TargetParams::Separate {
                store,
                network,
                synchronizer: TargetSynchronizer::new(),
            }
        } else {
            TargetParams::Aliased
        };

        let action_selector = DoubleEstimatorSelector::new(
            &config.get_action_test,
            space.clone(),
            config.action_cost,
            config.penalty_application,
            config.classification,
        )?;
        let target_selector = if config.use_target {
            Some(DoubleEstimatorSelector::new(
                &config.get_action_target,
                space.clone(),
                config.action_cost,
                config.penalty_application,
                config.classification,
            )?)
        } else {
            None
        };

        let cost = if config.classification {
            CostEvaluator::classification(config.use_target)?
        } else {
            match regression {
                Some(cost) => CostEvaluator::Regression(cost),
                None => CostEvaluator::regression(NStepRegressionCost {
                    gamma: config.gamma,
                }),
            }
        };

        let optimizer = nn::Adam::default().build(policy_store.var_store(), config.learning_rate)?;

        let train_weights = config.aggregation.weights(config.lookahead)?;
        let value_weights = config.aggregation.weights(config.get_action_test.horizon)?;

        info!(
            horizon = config.horizon,
            obs_dim,
            action_dim,
            classification = config.classification,
            use_target = config.use_target,
            separate_target_params = config.separate_target_params,
            candidates = config.get_action_test.sampling.num_candidates(),
            "assembled value graph"
        );

        Ok(PolicyGraph {
            config,
            space,
            policy_store,
            policy,
            target,
            action_selector,
            target_selector,
            cost,
            optimizer,
            train_weights,
            value_weights,
        })
    }
}

enum TargetParams<E: StateEncoder> {
    Disabled,
    /// Bootstrap values come from the policy parameters.
    Aliased,
    Separate {
        store: NamespacedVarStore,
        network: ValueNetwork<E>,
        synchronizer: TargetSynchronizer,
    },
}

/// Assembled endpoints of the value estimator.
pub struct PolicyGraph<E: StateEncoder = MlpStateEncoder> {
    config: PolicyConfig,
    space: ActionSpace,
    policy_store: NamespacedVarStore,
    policy: ValueNetwork<E>,
    target: TargetParams<E>,
    action_selector: DoubleEstimatorSelector,
    target_selector: Option<DoubleEstimatorSelector>,
    cost: CostEvaluator,
    optimizer: nn::Optimizer,
    train_weights: Vec<f64>,
    value_weights: Vec<f64>,
}

impl<E: StateEncoder> PolicyGraph<E> {
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn action_space(&self) -> &ActionSpace {
        &self.space
    }

    /// Trainable "policy" parameters.
    pub fn policy_parameters(&self) -> &NamespacedVarStore {
        &self.policy_store
    }

    /// Separate "target" parameters, if configured.
    pub fn target_parameters(&self) -> Option<&NamespacedVarStore> {
        match &self.target {
            TargetParams::Separate { store, .. } => Some(store),
            _ => None,
        }
    }

    /// Aggregated value of given action sequences, `[batch]`.
    ///
    /// `actions` must be exactly as long as the test action-search horizon.
    pub fn get_value(&self, observations: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let horizon = self.config.get_action_test.horizon;
        no_grad(|| {
            let lowd = self.policy.lowd(observations, false)?;
            let values = self.policy.values(&lowd, actions, horizon, false)?;
            let weights = weight_row(&self.value_weights, values.device());
            Ok((values * weights).sum_dim_intlist([1i64].as_slice(), false, Kind::Float))
        })
    }

    /// Greedy action search: both estimators use the policy parameters.
    pub fn get_action<R: Rng + ?Sized>(
        &self,
        observations: &Tensor,
        rng: &mut R,
    ) -> Result<Selection> {
        let scorer = self.policy.scorer(observations)?;
        self.action_selector.get_action(&scorer, &scorer, rng)
    }

    /// Greedy action search followed by exploration.
    pub fn get_action_explore<R: Rng + ?Sized>(
        &self,
        observations: &Tensor,
        exploration: &ExplorationParams,
        rng: &mut R,
    ) -> Result<Selection> {
        let mut selection = self.get_action(observations, rng)?;
        for action in selection.actions.iter_mut() {
            *action = exploration.apply(&self.space, action, rng)?;
        }
        Ok(selection)
    }

    /// Value of the greedy action, per observation.
    pub fn get_action_value<R: Rng + ?Sized>(
        &self,
        observations: &Tensor,
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        Ok(self.get_action(observations, rng)?.values)
    }

    /// Bootstrap values for the `N` windows following each observation,
    /// `[batch, N]`. Zeros without target networks.
    pub fn target_values<R: Rng + ?Sized>(
        &self,
        batch: &TrainingBatch,
        rng: &mut R,
    ) -> Result<Tensor> {
        let n = self.config.lookahead as i64;
        let batch_size = batch.observations.size()[0];
        let selector = match &self.target_selector {
            Some(selector) => selector,
            None => {
                return Ok(Tensor::zeros(
                    [batch_size, n],
                    (Kind::Float, self.policy.device()),
                ))
            }
        };
        let target_obs = batch.target_observations.as_ref().ok_or_else(|| {
            ValueError::InvalidConfig("target networks need target observations".into())
        })?;

        let history = self.config.obs_history_len as i64;
        let (target_batch, steps, _) = target_obs.size3()?;
        if target_batch != batch_size {
            return Err(ValueError::BatchMismatch {
                expected: batch_size as usize,
                actual: target_batch as usize,
            });
        }
        if steps != history + n {
            return Err(ValueError::HorizonMismatch {
                expected: (history + n) as usize,
                actual: steps as usize,
            });
        }

        // N + 1 sliding windows stacked along the batch dimension
        let windows: Vec<Tensor> = (history..=history + n)
            .map(|h| target_obs.narrow(1, h - history, history))
            .collect();
        let packed = Tensor::cat(&windows, 0);

        let select = self.policy.scorer(&packed)?;
        let selection = match &self.target {
            TargetParams::Separate { network, .. } => {
                let eval = network.scorer(&packed)?;
                selector.get_action(&select, &eval, rng)?
            }
            _ => selector.get_action(&select, &select, rng)?,
        };

        let values: Vec<f32> = selection.values.iter().map(|&v| v as f32).collect();
        Ok(Tensor::from_slice(&values)
            .reshape([n + 1, batch_size])
            .transpose(0, 1)
            .narrow(1, 1, n)
            .to_device(self.policy.device()))
    }

    /// Copies policy parameters into the separate target set.
    ///
    /// A no-op returning `Ok(0)` unless separate target parameters are
    /// configured.
    pub fn update_target(&mut self) -> Result<usize> {
        match &mut self.target {
            TargetParams::Separate {
                store,
                synchronizer,
                ..
            } => synchronizer.synchronize(&self.policy_store, store),
            _ => Ok(0),
        }
    }

    /// Whether [`Self::update_target`] does anything.
    pub fn has_target_sync(&self) -> bool {
        matches!(self.target, TargetParams::Separate { .. })
    }

    /// L2 penalty over trainable policy weight matrices.
    fn regularization(&self) -> Option<Tensor> {
        if self.config.weight_decay == 0.0 {
            return None;
        }
        let penalty = self
            .policy_store
            .var_store()
            .variables()
            .into_iter()
            .filter(|(name, var)| is_weight(name) && var.requires_grad())
            .map(|(_, var)| var.square().sum(Kind::Float) * 0.5)
            .fold(
                Tensor::from(0f32).to_device(self.policy.device()),
                |acc, x| acc + x,
            );
        Some(penalty * self.config.weight_decay)
    }

    fn batch_cost<R: Rng + ?Sized>(
        &self,
        batch: &TrainingBatch,
        train: bool,
        rng: &mut R,
    ) -> Result<CostBundle<Tensor>> {
        let target_values = no_grad(|| self.target_values(batch, rng))?;
        let lowd = self.policy.lowd(&batch.observations, train)?;
        let values = self
            .policy
            .values(&lowd, &batch.actions, self.config.horizon, train)?;
        let device = values.device();
        let rewards = batch.rewards.to_device(device);
        let dones = batch.dones.to_device(device);
        let regularization = self.regularization();

        self.cost.evaluate(
            &CostInputs {
                values: &values,
                weights: &self.train_weights,
                rewards: &rewards,
                dones: &dones,
                target_values: &target_values,
            },
            regularization.as_ref(),
        )
    }

    /// Cost and diagnostic metric of a batch, without updating anything.
    pub fn cost<R: Rng + ?Sized>(
        &self,
        batch: &TrainingBatch,
        rng: &mut R,
    ) -> Result<CostBundle<f64>> {
        let bundle = no_grad(|| self.batch_cost(batch, false, rng))?;
        Ok(CostBundle {
            cost: bundle.cost.double_value(&[]),
            metric: bundle.metric.double_value(&[]),
        })
    }

    /// One optimizer step over the policy parameters at `learning_rate`.
    pub fn optimizer_step<R: Rng + ?Sized>(
        &mut self,
        batch: &TrainingBatch,
        learning_rate: f64,
        rng: &mut R,
    ) -> Result<CostBundle<f64>> {
        let bundle = self.batch_cost(batch, true, rng)?;
        self.optimizer.set_lr(learning_rate);
        match self.config.grad_clip_norm {
            Some(max_norm) => self.optimizer.backward_step_clip_norm(&bundle.cost, max_norm),
            None => self.optimizer.backward_step(&bundle.cost),
        }
        let out = CostBundle {
            cost: bundle.cost.double_value(&[]),
            metric: bundle.metric.double_value(&[]),
        };
        debug!(cost = out.cost, metric = out.metric, learning_rate, "optimizer step");
        Ok(out)
    }

    /// Aggregation weights used by the training cost.
    pub fn train_weights(&self) -> &[f64] {
        &self.train_weights
    }

    /// Aggregated values of a batch as host values, `[batch]`.
    pub fn get_value_vec(&self, observations: &Tensor, actions: &Tensor) -> Result<Vec<f64>> {
        values_from_tensor(&self.get_value(observations, actions)?)
    }
}

/// Linear and recurrent weight matrices; batch-norm scales are not decayed.
fn is_weight(name: &str) -> bool {
    let mut segments = name.split('.');
    let leaf = name.rsplit('.').next().unwrap_or(name);
    leaf.starts_with("weight") && !segments.any(|s| s.starts_with("bn"))
}
