use thiserror::Error;

/// Errors raised while assembling or evaluating the value estimator.
///
/// Every variant is fatal for the call that produced it: no partial
/// results are returned and nothing is retried.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("horizon mismatch: expected {expected}, got {actual}")]
    HorizonMismatch { expected: usize, actual: usize },

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("classification mode cannot be combined with target-network bootstrapping")]
    ClassificationWithBootstrap,

    #[error("reward value outside {{-1,0}}: {value}")]
    RewardOutOfDomain { value: f64 },

    #[error("target/policy parameter count mismatch: policy has {policy}, target has {target}")]
    ParameterCountMismatch { policy: usize, target: usize },

    #[error("target/policy parameter name mismatch: {policy} vs {target}")]
    ParameterNameMismatch { policy: String, target: String },

    #[error("parameter not found: {0}")]
    MissingParameter(String),

    #[error("batch size mismatch: expected {expected}, got {actual}")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[cfg(feature = "nn")]
    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ValueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_mismatch_display() {
        let e = ValueError::HorizonMismatch {
            expected: 8,
            actual: 6,
        };
        assert_eq!(e.to_string(), "horizon mismatch: expected 8, got 6");
    }

    #[test]
    fn reward_out_of_domain_display() {
        let e = ValueError::RewardOutOfDomain { value: 0.5 };
        assert_eq!(e.to_string(), "reward value outside {-1,0}: 0.5");
    }

    #[test]
    fn parameter_count_mismatch_display() {
        let e = ValueError::ParameterCountMismatch {
            policy: 10,
            target: 9,
        };
        assert!(e
            .to_string()
            .starts_with("target/policy parameter count mismatch"));
    }
}
