//! Recurrent value network using tch-rs (PyTorch bindings).
//!
//! Observations are compressed once into a lowd state, which initializes a
//! recurrent core that consumes one encoded action per future step. A shared
//! head maps every recurrent output to one value per step.
//!
//! This module is only available with the `nn` feature.

use tch::nn::{ModuleT, RNN};
use tch::{nn, no_grad, Device, Kind, Tensor};

use crate::config::{NetworkConfig, RnnCell};
use crate::convert::rows_from_tensor;
use crate::error::{Result, ValueError};
use crate::sampler::ActionSequences;
use crate::selection::CandidateScorer;

/// Feed-forward stack `input → hidden.. → output` with ReLU between layers.
fn mlp(
    p: &nn::Path,
    input_dim: i64,
    hidden: &[usize],
    output_dim: i64,
    batch_norm: bool,
) -> nn::SequentialT {
    let mut net = nn::seq_t();
    let mut in_dim = input_dim;
    for (i, &width) in hidden.iter().enumerate() {
        let width = width as i64;
        net = net.add(nn::linear(p / format!("l{i}"), in_dim, width, Default::default()));
        if batch_norm {
            net = net.add(nn::batch_norm1d(p / format!("bn{i}"), width, Default::default()));
        }
        net = net.add_fn(|x| x.relu());
        in_dim = width;
    }
    net.add(nn::linear(
        p / format!("l{}", hidden.len()),
        in_dim,
        output_dim,
        Default::default(),
    ))
}

/// Compresses an observation history into a lowd state.
pub trait StateEncoder {
    /// Builds the encoder's parameters under `p`.
    fn build(p: &nn::Path, obs_history_len: usize, obs_dim: usize, config: &NetworkConfig) -> Self
    where
        Self: Sized;

    /// `[batch, obs_history_len, obs_dim] → [batch, lowd_dim]`.
    fn encode(&self, observations: &Tensor, train: bool) -> Tensor;
}

/// MLP over the flattened observation history.
pub struct MlpStateEncoder {
    net: nn::SequentialT,
}

impl StateEncoder for MlpStateEncoder {
    fn build(p: &nn::Path, obs_history_len: usize, obs_dim: usize, config: &NetworkConfig) -> Self {
        let net = mlp(
            &(p / "observation"),
            (obs_history_len * obs_dim) as i64,
            &config.observation_hidden,
            config.lowd_dim as i64,
            config.batch_norm,
        );
        Self { net }
    }

    fn encode(&self, observations: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(&observations.flatten(1, -1), train)
    }
}

/// Per-step action features, shared across time steps.
pub struct ActionEncoder {
    net: nn::SequentialT,
    action_dim: i64,
    output_dim: i64,
}

impl ActionEncoder {
    pub fn new(p: &nn::Path, action_dim: usize, config: &NetworkConfig) -> Self {
        let output_dim = config.action_feature_dim as i64;
        Self {
            net: mlp(
                &(p / "actions"),
                action_dim as i64,
                &config.action_hidden,
                output_dim,
                config.batch_norm,
            ),
            action_dim: action_dim as i64,
            output_dim,
        }
    }

    /// `[batch, H, action_dim] → [batch, H, feature_dim]`.
    pub fn forward(&self, actions: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, horizon, action_dim) = actions.size3()?;
        if action_dim != self.action_dim {
            return Err(ValueError::ShapeMismatch(format!(
                "actions have {action_dim} components, encoder expects {}",
                self.action_dim
            )));
        }
        let flat = actions.reshape([-1, action_dim]);
        Ok(self
            .net
            .forward_t(&flat, train)
            .reshape([batch, horizon, self.output_dim]))
    }
}

enum Core {
    Gru(nn::GRU),
    Lstm(nn::LSTM),
}

/// Running maximum over the horizon: non-decreasing and never below the
/// raw value at any step.
pub fn cumulative_increasing(values: &Tensor) -> Tensor {
    values.cummax(1).0
}

/// Maps a lowd state and `H` actions to `H` per-step values.
pub struct SequenceValuePropagator {
    action_encoder: ActionEncoder,
    core: Core,
    head: nn::SequentialT,
    lowd_dim: i64,
    hidden_dim: i64,
    strictly_increasing: bool,
}

impl SequenceValuePropagator {
    pub fn new(
        p: &nn::Path,
        action_dim: usize,
        config: &NetworkConfig,
        strictly_increasing: bool,
    ) -> Self {
        let hidden_dim = config.rnn_hidden_dim() as i64;
        let input_dim = config.action_feature_dim as i64;
        let rnn_config = nn::RNNConfig {
            batch_first: true,
            ..Default::default()
        };
        let core = match config.rnn_cell {
            RnnCell::Gru => Core::Gru(nn::gru(p / "rnn", input_dim, hidden_dim, rnn_config)),
            RnnCell::Lstm => Core::Lstm(nn::lstm(p / "rnn", input_dim, hidden_dim, rnn_config)),
        };
        Self {
            action_encoder: ActionEncoder::new(p, action_dim, config),
            core,
            head: mlp(
                &(p / "values"),
                hidden_dim,
                &config.output_hidden,
                1,
                config.batch_norm,
            ),
            lowd_dim: config.lowd_dim as i64,
            hidden_dim,
            strictly_increasing,
        }
    }

    /// Per-step values `[batch, horizon]`.
    ///
    /// # Errors
    ///
    /// [`ValueError::HorizonMismatch`] if the action sequences are not
    /// exactly `horizon` long; nothing is truncated or padded.
    pub fn forward(
        &self,
        lowd: &Tensor,
        actions: &Tensor,
        horizon: usize,
        train: bool,
    ) -> Result<Tensor> {
        let (batch, steps, _) = actions.size3()?;
        if steps as usize != horizon {
            return Err(ValueError::HorizonMismatch {
                expected: horizon,
                actual: steps as usize,
            });
        }
        let (lowd_batch, lowd_dim) = lowd.size2()?;
        if lowd_batch != batch {
            return Err(ValueError::BatchMismatch {
                expected: lowd_batch as usize,
                actual: batch as usize,
            });
        }
        if lowd_dim != self.lowd_dim {
            return Err(ValueError::ShapeMismatch(format!(
                "lowd state has {lowd_dim} features, propagator expects {}",
                self.lowd_dim
            )));
        }

        let inputs = self.action_encoder.forward(actions, train)?;
        let outputs = match &self.core {
            Core::Gru(gru) => {
                let state = nn::GRUState(lowd.unsqueeze(0));
                gru.seq_init(&inputs, &state).0
            }
            Core::Lstm(lstm) => {
                let h = lowd.narrow(1, 0, self.hidden_dim).contiguous().unsqueeze(0);
                let c = lowd
                    .narrow(1, self.hidden_dim, self.hidden_dim)
                    .contiguous()
                    .unsqueeze(0);
                lstm.seq_init(&inputs, &nn::LSTMState((h, c))).0
            }
        };

        let values = self
            .head
            .forward_t(&outputs.reshape([-1, self.hidden_dim]), train)
            .reshape([batch, steps]);
        Ok(if self.strictly_increasing {
            cumulative_increasing(&values)
        } else {
            values
        })
    }
}

/// State encoder plus propagator, built under one namespace path.
pub struct ValueNetwork<E: StateEncoder = MlpStateEncoder> {
    encoder: E,
    propagator: SequenceValuePropagator,
    obs_history_len: i64,
    obs_dim: i64,
    device: Device,
}

impl<E: StateEncoder> ValueNetwork<E> {
    pub fn new(
        p: &nn::Path,
        obs_history_len: usize,
        obs_dim: usize,
        action_dim: usize,
        config: &NetworkConfig,
        strictly_increasing: bool,
    ) -> Self {
        Self {
            encoder: E::build(p, obs_history_len, obs_dim, config),
            propagator: SequenceValuePropagator::new(p, action_dim, config, strictly_increasing),
            obs_history_len: obs_history_len as i64,
            obs_dim: obs_dim as i64,
            device: p.device(),
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Encodes `[batch, obs_history_len, obs_dim]` observations.
    pub fn lowd(&self, observations: &Tensor, train: bool) -> Result<Tensor> {
        let (_, history, obs_dim) = observations.size3()?;
        if history != self.obs_history_len || obs_dim != self.obs_dim {
            return Err(ValueError::ShapeMismatch(format!(
                "observations are [_, {history}, {obs_dim}], expected [_, {}, {}]",
                self.obs_history_len, self.obs_dim
            )));
        }
        Ok(self
            .encoder
            .encode(&observations.to_device(self.device), train))
    }

    /// Per-step values of `actions` from `lowd` states.
    pub fn values(
        &self,
        lowd: &Tensor,
        actions: &Tensor,
        horizon: usize,
        train: bool,
    ) -> Result<Tensor> {
        self.propagator
            .forward(lowd, &actions.to_device(self.device), horizon, train)
    }

    /// Binds the network to a batch of observations for the action search.
    pub fn scorer(&self, observations: &Tensor) -> Result<NetworkScorer<'_, E>> {
        let lowd = no_grad(|| self.lowd(observations, false))?;
        Ok(NetworkScorer {
            network: self,
            lowd,
        })
    }
}

/// Inference-mode scorer over a fixed observation batch.
pub struct NetworkScorer<'a, E: StateEncoder = MlpStateEncoder> {
    network: &'a ValueNetwork<E>,
    lowd: Tensor,
}

impl<E: StateEncoder> CandidateScorer for NetworkScorer<'_, E> {
    fn batch_size(&self) -> usize {
        self.lowd.size()[0] as usize
    }

    fn score(&self, candidates: &ActionSequences) -> Result<Vec<Vec<f64>>> {
        let batch = self.lowd.size()[0];
        let lowd_dim = self.lowd.size()[1];
        let k = candidates.num_sequences() as i64;
        let horizon = candidates.horizon() as i64;
        let action_dim = candidates.action_dim() as i64;

        let flat: Vec<f32> = candidates.as_slice().iter().map(|&a| a as f32).collect();
        let actions = Tensor::from_slice(&flat)
            .reshape([k, horizon, action_dim])
            .to_device(self.network.device);

        // every observation is paired with every shared candidate
        let lowd = self
            .lowd
            .unsqueeze(1)
            .expand([batch, k, lowd_dim], false)
            .reshape([batch * k, lowd_dim]);
        let actions = actions
            .unsqueeze(0)
            .expand([batch, k, horizon, action_dim], false)
            .reshape([batch * k, horizon, action_dim]);

        let values = no_grad(|| {
            self.network
                .values(&lowd, &actions, candidates.horizon(), false)
        })?;
        rows_from_tensor(&values.to_kind(Kind::Double))
    }
}
