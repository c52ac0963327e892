//! Action-space descriptors supplied by the environment.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValueError};

/// Per-dimension `[low, high]` bounds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bounds {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

impl Bounds {
    /// Creates bounds, checking that both sides have the same length and
    /// that `low <= high` everywhere.
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        let bounds = Self { low, high };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Re-checks the invariants of [`Self::new`], e.g. after deserializing.
    pub fn validate(&self) -> Result<()> {
        let (low, high) = (&self.low, &self.high);
        if low.len() != high.len() {
            return Err(ValueError::ShapeMismatch(format!(
                "bounds have {} lows and {} highs",
                low.len(),
                high.len()
            )));
        }
        if let Some(i) = (0..low.len()).find(|&i| !(low[i] <= high[i])) {
            return Err(ValueError::InvalidConfig(format!(
                "dimension {i}: low {} exceeds high {}",
                low[i], high[i]
            )));
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.low.len()
    }

    /// Returns true if `other` lies entirely inside `self`.
    pub fn encloses(&self, other: &Bounds) -> bool {
        self.dim() == other.dim()
            && self
                .low
                .iter()
                .zip(&other.low)
                .all(|(outer, inner)| inner >= outer)
            && self
                .high
                .iter()
                .zip(&other.high)
                .all(|(outer, inner)| inner <= outer)
    }
}

/// The action space of the robot.
///
/// Continuous spaces (e.g. `[steer, speed]`) may carry a narrower selection
/// range that the action search samples from; exploration and bounds checks
/// always use the full declared bounds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ActionSpace {
    Continuous {
        bounds: Bounds,
        selection: Option<Bounds>,
    },
    Discrete {
        n: usize,
    },
}

impl ActionSpace {
    /// Continuous space with per-dimension bounds.
    pub fn continuous(low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        Ok(Self::Continuous {
            bounds: Bounds::new(low, high)?,
            selection: None,
        })
    }

    /// Discrete space over `n` categories (one-hot encoded).
    pub fn discrete(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(ValueError::InvalidConfig(
                "discrete action space needs at least one category".into(),
            ));
        }
        Ok(Self::Discrete { n })
    }

    /// Restricts the range the action search samples from.
    ///
    /// # Errors
    ///
    /// Fails if the space is discrete or the selection range is not inside
    /// the declared bounds.
    pub fn with_selection(self, low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        match self {
            Self::Continuous { bounds, .. } => {
                let selection = Bounds::new(low, high)?;
                if !bounds.encloses(&selection) {
                    return Err(ValueError::InvalidConfig(
                        "selection range must lie inside the action bounds".into(),
                    ));
                }
                Ok(Self::Continuous {
                    bounds,
                    selection: Some(selection),
                })
            }
            Self::Discrete { .. } => Err(ValueError::UnsupportedConfiguration(
                "selection range on a discrete action space".into(),
            )),
        }
    }

    /// Re-checks the invariants enforced by the constructors.
    ///
    /// Public fields and deserialization can bypass [`Self::continuous`],
    /// [`Self::discrete`] and [`Self::with_selection`].
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Continuous { bounds, selection } => {
                bounds.validate()?;
                if let Some(selection) = selection {
                    selection.validate()?;
                    if !bounds.encloses(selection) {
                        return Err(ValueError::InvalidConfig(
                            "selection range must lie inside the action bounds".into(),
                        ));
                    }
                }
                Ok(())
            }
            Self::Discrete { n: 0 } => Err(ValueError::InvalidConfig(
                "discrete action space needs at least one category".into(),
            )),
            Self::Discrete { .. } => Ok(()),
        }
    }

    /// Flat action dimensionality (category count for discrete spaces).
    pub fn flat_dim(&self) -> usize {
        match self {
            Self::Continuous { bounds, .. } => bounds.dim(),
            Self::Discrete { n } => *n,
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }

    /// Bounds the action search samples from.
    pub fn sampling_bounds(&self) -> Option<&Bounds> {
        match self {
            Self::Continuous {
                selection: Some(selection),
                ..
            } => Some(selection),
            Self::Continuous { bounds, .. } => Some(bounds),
            Self::Discrete { .. } => None,
        }
    }

    /// Upper bound of a continuous dimension.
    pub fn high(&self, dim: usize) -> Option<f64> {
        match self {
            Self::Continuous { bounds, .. } => bounds.high.get(dim).copied(),
            Self::Discrete { .. } => None,
        }
    }

    /// Checks whether an action lies in the space. Discrete actions must be
    /// valid one-hot vectors.
    pub fn contains(&self, action: &[f64]) -> bool {
        match self {
            Self::Continuous { bounds, .. } => {
                action.len() == bounds.dim()
                    && action
                        .iter()
                        .zip(bounds.low.iter().zip(&bounds.high))
                        .all(|(a, (lo, hi))| a >= lo && a <= hi)
            }
            Self::Discrete { n } => {
                action.len() == *n
                    && action.iter().all(|&a| a == 0.0 || a == 1.0)
                    && action.iter().filter(|&&a| a == 1.0).count() == 1
            }
        }
    }

    /// Clips a continuous action into the declared bounds in place.
    pub fn clip(&self, action: &mut [f64]) {
        if let Self::Continuous { bounds, .. } = self {
            for (a, (lo, hi)) in action.iter_mut().zip(bounds.low.iter().zip(&bounds.high)) {
                *a = a.clamp(*lo, *hi);
            }
        }
    }
}
