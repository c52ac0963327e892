//! Horizon aggregation: collapsing a per-step value sequence into a scalar.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValueError};

/// Weighting scheme applied over the horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AggregationScheme {
    /// All weight on the last step.
    Final,
    /// Uniform weight `1/N`.
    Mean,
    /// Truncated geometric series with the tail mass folded into the last step.
    Exponential { lambda: f64 },
}

impl AggregationScheme {
    /// Checks scheme-specific parameters.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Exponential { lambda } if !(lambda > 0.0 && lambda < 1.0) => Err(
                ValueError::InvalidConfig(format!("exponential lambda {lambda} outside (0, 1)")),
            ),
            _ => Ok(()),
        }
    }

    /// Weight vector of length `n`: nonnegative and summing to one.
    ///
    /// * `Final`: `[0, .., 0, 1]`
    /// * `Mean`: `[1/n; n]`
    /// * `Exponential(λ)`: `w[i] = (1 - λ) λ^i` for `i < n - 1`, `w[n - 1] = λ^(n - 1)`
    pub fn weights(&self, n: usize) -> Result<Vec<f64>> {
        if n == 0 {
            return Err(ValueError::HorizonMismatch {
                expected: 1,
                actual: 0,
            });
        }
        self.validate()?;

        let weights = match *self {
            Self::Final => {
                let mut w = vec![0.0; n];
                w[n - 1] = 1.0;
                w
            }
            Self::Mean => vec![1.0 / n as f64; n],
            Self::Exponential { lambda } => (0..n)
                .map(|i| {
                    if i + 1 < n {
                        (1.0 - lambda) * lambda.powi(i as i32)
                    } else {
                        lambda.powi(i as i32)
                    }
                })
                .collect(),
        };
        Ok(weights)
    }
}

/// Weighted sum of a value sequence.
///
/// # Errors
///
/// Returns [`ValueError::HorizonMismatch`] when the lengths differ.
pub fn aggregate(values: &[f64], weights: &[f64]) -> Result<f64> {
    if values.len() != weights.len() {
        return Err(ValueError::HorizonMismatch {
            expected: weights.len(),
            actual: values.len(),
        });
    }
    Ok(values.iter().zip(weights).map(|(v, w)| v * w).sum())
}
