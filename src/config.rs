//! Configuration for the value estimator, action search, and training cost.
//!
//! Every recognized option is an explicit field with a documented default.
//! [`PolicyConfig::validate`] is run once by the graph assembler; nothing is
//! re-checked per call except the horizon of incoming action batches.

use rand::rngs::StdRng;
use rand::SeedableRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationScheme;
use crate::error::{Result, ValueError};
use crate::space::ActionSpace;

/// How candidate action sequences are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SamplingStrategy {
    /// `k` sequences drawn uniformly from the action space.
    Random { k: usize },
}

impl SamplingStrategy {
    /// Number of candidates produced per call.
    pub fn num_candidates(&self) -> usize {
        match *self {
            Self::Random { k } => k,
        }
    }
}

/// Parameters of one action-search endpoint.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GetActionParams {
    /// Length of every candidate sequence.
    pub horizon: usize,
    pub sampling: SamplingStrategy,
    pub aggregation: AggregationScheme,
    /// Subtract the configured [`ActionCost`] before picking the argmax.
    pub apply_action_cost: bool,
}

/// Soft constraint on one action dimension:
/// `weight * mean_h (a[h][dimension] - target)^2`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActionCost {
    /// Action dimension the penalty looks at (speed is dimension 1).
    pub dimension: usize,
    pub weight: f64,
    /// Target value; `None` uses the upper bound of `dimension`.
    pub target: Option<f64>,
}

/// Which side of the double estimator the action cost is subtracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PenaltyApplication {
    /// Penalize both the selection scores and the reported value.
    #[default]
    SelectAndEval,
    /// Penalize only the selection scores.
    SelectOnly,
}

/// Recurrent cell used by the value propagator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RnnCell {
    /// Hidden state is the lowd state.
    #[default]
    Gru,
    /// Lowd state is split into hidden and cell halves.
    Lstm,
}

/// Network architecture.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetworkConfig {
    /// Dimension of the compressed observation state.
    pub lowd_dim: usize,
    /// Hidden layer widths of the observation encoder.
    pub observation_hidden: Vec<usize>,
    /// Hidden layer widths of the action encoder.
    pub action_hidden: Vec<usize>,
    /// Per-step feature width fed to the recurrent core.
    pub action_feature_dim: usize,
    /// Hidden layer widths of the per-step value head.
    pub output_hidden: Vec<usize>,
    pub rnn_cell: RnnCell,
    /// Batch normalization after each hidden layer.
    pub batch_norm: bool,
}

impl NetworkConfig {
    /// Hidden size of the recurrent core.
    pub fn rnn_hidden_dim(&self) -> usize {
        match self.rnn_cell {
            RnnCell::Gru => self.lowd_dim,
            RnnCell::Lstm => self.lowd_dim / 2,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            lowd_dim: 128,
            observation_hidden: vec![256, 128],
            action_hidden: vec![64],
            action_feature_dim: 64,
            output_hidden: vec![32],
            rnn_cell: RnnCell::Gru,
            batch_norm: false,
        }
    }
}

/// Configuration of the value estimator and its training cost.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolicyConfig {
    /// Propagation horizon H.
    pub horizon: usize,
    /// Training lookahead N. Must equal `horizon`.
    pub lookahead: usize,
    /// Number of stacked observations fed to the state encoder.
    pub obs_history_len: usize,
    /// Aggregation scheme used for training and value lookup.
    pub aggregation: AggregationScheme,
    /// Action search used for the executed action.
    pub get_action_test: GetActionParams,
    /// Action search used for bootstrap targets.
    pub get_action_target: GetActionParams,
    /// Bootstrap training targets from a target network.
    pub use_target: bool,
    /// Keep target parameters separate from the policy parameters.
    pub separate_target_params: bool,
    /// Train on binary collision labels instead of regression targets.
    pub classification: bool,
    /// Make per-step values non-decreasing over the horizon.
    pub probcoll_strictly_increasing: bool,
    pub action_cost: Option<ActionCost>,
    pub penalty_application: PenaltyApplication,
    /// L2 coefficient over trainable weight matrices.
    pub weight_decay: f64,
    pub learning_rate: f64,
    pub grad_clip_norm: Option<f64>,
    /// Discount factor of the default regression cost.
    pub gamma: f64,
    /// Seed of the sampling stream and of parameter initialization.
    pub seed: Option<u64>,
    pub network: NetworkConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            horizon: 16,
            lookahead: 16,
            obs_history_len: 1,
            aggregation: AggregationScheme::Mean,
            get_action_test: GetActionParams {
                horizon: 16,
                sampling: SamplingStrategy::Random { k: 4096 },
                aggregation: AggregationScheme::Mean,
                apply_action_cost: true,
            },
            get_action_target: GetActionParams {
                horizon: 16,
                sampling: SamplingStrategy::Random { k: 100 },
                aggregation: AggregationScheme::Mean,
                apply_action_cost: false,
            },
            use_target: false,
            separate_target_params: false,
            classification: true,
            probcoll_strictly_increasing: false,
            action_cost: None,
            penalty_application: PenaltyApplication::SelectAndEval,
            weight_decay: 0.0,
            learning_rate: 1e-4,
            grad_clip_norm: None,
            gamma: 0.99,
            seed: None,
            network: NetworkConfig::default(),
        }
    }
}

impl PolicyConfig {
    /// Validates the configuration against the action space.
    ///
    /// # Errors
    ///
    /// * [`ValueError::HorizonMismatch`] if `horizon != lookahead` or an
    ///   action-search horizon is out of range.
    /// * [`ValueError::ClassificationWithBootstrap`] if classification is
    ///   combined with target networks.
    /// * [`ValueError::UnsupportedConfiguration`] if an action cost is set on
    ///   a discrete space or names a missing dimension.
    /// * [`ValueError::InvalidConfig`] for any other inconsistent option.
    pub fn validate(&self, space: &ActionSpace) -> Result<()> {
        space.validate()?;
        if self.horizon != self.lookahead {
            return Err(ValueError::HorizonMismatch {
                expected: self.lookahead,
                actual: self.horizon,
            });
        }
        if self.horizon == 0 {
            return Err(ValueError::InvalidConfig("horizon must be positive".into()));
        }
        if self.obs_history_len == 0 {
            return Err(ValueError::InvalidConfig(
                "observation history must hold at least one observation".into(),
            ));
        }
        self.aggregation.validate()?;

        for params in [&self.get_action_test, &self.get_action_target] {
            if params.horizon == 0 || params.horizon > self.lookahead {
                return Err(ValueError::HorizonMismatch {
                    expected: self.lookahead,
                    actual: params.horizon,
                });
            }
            if params.sampling.num_candidates() == 0 {
                return Err(ValueError::InvalidConfig(
                    "action search needs at least one candidate".into(),
                ));
            }
            params.aggregation.validate()?;
        }

        if self.use_target && self.get_action_target.horizon != self.lookahead {
            return Err(ValueError::HorizonMismatch {
                expected: self.lookahead,
                actual: self.get_action_target.horizon,
            });
        }
        if self.classification && self.use_target {
            return Err(ValueError::ClassificationWithBootstrap);
        }
        if self.separate_target_params && !self.use_target {
            return Err(ValueError::InvalidConfig(
                "separate target parameters require target networks".into(),
            ));
        }

        if let Some(cost) = &self.action_cost {
            if space.is_discrete() {
                return Err(ValueError::UnsupportedConfiguration(
                    "action cost on a discrete action space".into(),
                ));
            }
            if cost.dimension >= space.flat_dim() {
                return Err(ValueError::UnsupportedConfiguration(format!(
                    "action cost dimension {} on a {}-dimensional action space",
                    cost.dimension,
                    space.flat_dim()
                )));
            }
        }

        if self.weight_decay < 0.0 {
            return Err(ValueError::InvalidConfig("weight decay must be >= 0".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ValueError::InvalidConfig("learning rate must be > 0".into()));
        }
        if self.network.lowd_dim == 0 || self.network.action_feature_dim == 0 {
            return Err(ValueError::InvalidConfig(
                "network dimensions must be positive".into(),
            ));
        }
        if self.network.rnn_cell == RnnCell::Lstm && self.network.lowd_dim % 2 != 0 {
            return Err(ValueError::InvalidConfig(
                "LSTM core needs an even lowd dimension".into(),
            ));
        }
        Ok(())
    }

    /// The single random stream used for action sampling and exploration.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> ActionSpace {
        ActionSpace::continuous(vec![-1.0, 0.0], vec![1.0, 2.0]).unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = PolicyConfig::default();
        assert!(cfg.validate(&space()).is_ok());
        assert_eq!(cfg.get_action_test.sampling.num_candidates(), 4096);
    }

    #[test]
    fn horizon_must_equal_lookahead() {
        let cfg = PolicyConfig {
            horizon: 8,
            lookahead: 10,
            ..PolicyConfig::default()
        };
        assert!(matches!(
            cfg.validate(&space()),
            Err(ValueError::HorizonMismatch {
                expected: 10,
                actual: 8
            })
        ));
    }

    #[test]
    fn classification_rejects_bootstrapping() {
        let cfg = PolicyConfig {
            classification: true,
            use_target: true,
            ..PolicyConfig::default()
        };
        assert!(matches!(
            cfg.validate(&space()),
            Err(ValueError::ClassificationWithBootstrap)
        ));
    }

    #[test]
    fn action_cost_on_discrete_space_unsupported() {
        let cfg = PolicyConfig {
            action_cost: Some(ActionCost {
                dimension: 1,
                weight: 1.0,
                target: None,
            }),
            ..PolicyConfig::default()
        };
        let discrete = ActionSpace::discrete(5).unwrap();
        assert!(matches!(
            cfg.validate(&discrete),
            Err(ValueError::UnsupportedConfiguration(_))
        ));
        assert!(cfg.validate(&space()).is_ok());
    }

    #[test]
    fn separate_target_requires_target() {
        let cfg = PolicyConfig {
            classification: false,
            separate_target_params: true,
            ..PolicyConfig::default()
        };
        assert!(matches!(
            cfg.validate(&space()),
            Err(ValueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn lstm_requires_even_lowd() {
        let cfg = PolicyConfig {
            network: NetworkConfig {
                lowd_dim: 33,
                rnn_cell: RnnCell::Lstm,
                ..NetworkConfig::default()
            },
            ..PolicyConfig::default()
        };
        assert!(cfg.validate(&space()).is_err());
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        use rand::Rng;
        let cfg = PolicyConfig {
            seed: Some(7),
            ..PolicyConfig::default()
        };
        let a: u64 = cfg.rng().gen();
        let b: u64 = cfg.rng().gen();
        assert_eq!(a, b);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_serde_roundtrip() {
        let cfg = PolicyConfig {
            aggregation: AggregationScheme::Exponential { lambda: 0.5 },
            ..PolicyConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PolicyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn hand_built_space_is_rechecked() {
        let inverted = ActionSpace::Continuous {
            bounds: crate::space::Bounds {
                low: vec![1.0, 0.0],
                high: vec![-1.0, 2.0],
            },
            selection: None,
        };
        assert!(matches!(
            PolicyConfig::default().validate(&inverted),
            Err(ValueError::InvalidConfig(_))
        ));
    }
}
