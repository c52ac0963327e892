//! rnn_critic - multi-step action-conditioned value estimation
//!
//! A recurrent value estimator for collision-avoiding mobile robots. The
//! estimator predicts, for an observation and a candidate sequence of future
//! actions, a per-step value over a horizon; action selection is a sampled
//! search over candidate sequences scored with a double estimator.
//!
//! The sampling, aggregation, selection, and synchronization logic is plain
//! Rust and always available. The neural network, training cost, and graph
//! assembly require the `nn` feature flag (which brings in `tch`).

// Always available; no libtorch needed.
pub mod aggregation;
pub mod config;
pub mod cost;
pub mod error;
pub mod exploration;
pub mod sampler;
pub mod selection;
pub mod space;
pub mod sync;

#[cfg(feature = "nn")]
mod convert;
#[cfg(feature = "nn")]
pub mod graph;
#[cfg(feature = "nn")]
pub mod network;

pub use aggregation::{aggregate, AggregationScheme};
pub use config::{
    ActionCost, GetActionParams, NetworkConfig, PenaltyApplication, PolicyConfig, RnnCell,
    SamplingStrategy,
};
pub use cost::CostBundle;
pub use error::{Result, ValueError};
pub use exploration::ExplorationParams;
pub use sampler::{ActionSampler, ActionSequences};
pub use selection::{CandidateScorer, DoubleEstimatorSelector, Selection};
pub use space::{ActionSpace, Bounds};
pub use sync::{ParameterSet, TargetSynchronizer};

#[cfg(feature = "nn")]
pub use cost::{CostEvaluator, CostInputs, NStepRegressionCost, RegressionCost};
#[cfg(feature = "nn")]
pub use graph::{GraphAssembler, PolicyGraph, TrainingBatch};
#[cfg(feature = "nn")]
pub use network::{ActionEncoder, MlpStateEncoder, SequenceValuePropagator, StateEncoder, ValueNetwork};
#[cfg(feature = "nn")]
pub use sync::NamespacedVarStore;
