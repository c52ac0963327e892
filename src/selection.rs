//! Double-estimator action search.
//!
//! Candidates are scored by two independently parameterized estimators. The
//! "select" estimator picks the argmax candidate; the "eval" estimator
//! reports the value of that same candidate, never its own maximum.

use rand::Rng;
use tracing::{debug, warn};

use crate::aggregation::aggregate;
use crate::config::{ActionCost, GetActionParams, PenaltyApplication};
use crate::error::{Result, ValueError};
use crate::sampler::{ActionSampler, ActionSequences};
use crate::space::ActionSpace;

/// Scores shared candidate sequences against a fixed batch of observations.
pub trait CandidateScorer {
    /// Number of observations the scorer is bound to.
    fn batch_size(&self) -> usize;

    /// Per-step values for every (observation, candidate) pair, one row per
    /// pair in observation-major order (row `b * K + k`).
    fn score(&self, candidates: &ActionSequences) -> Result<Vec<Vec<f64>>>;
}

/// Outcome of one action search over a batch of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// First step of the winning sequence, per observation.
    pub actions: Vec<Vec<f64>>,
    /// Eval-side value of the winning sequence, per observation.
    pub values: Vec<f64>,
    /// Winning candidate index, per observation.
    pub indices: Vec<usize>,
    /// One-hot mask over candidates marking the winner, per observation.
    pub argmax_mask: Vec<Vec<f64>>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedCost {
    dimension: usize,
    weight: f64,
    target: f64,
}

/// Samples candidates and picks one per observation with decoupled
/// select/eval estimators.
#[derive(Debug, Clone)]
pub struct DoubleEstimatorSelector {
    sampler: ActionSampler,
    horizon: usize,
    weights: Vec<f64>,
    action_cost: Option<ResolvedCost>,
    penalty_application: PenaltyApplication,
    classification: bool,
}

impl DoubleEstimatorSelector {
    /// Builds a selector for one action-search endpoint.
    ///
    /// `action_cost` is only used when `params.apply_action_cost` is set. Its
    /// target defaults to the upper bound of the penalized dimension.
    pub fn new(
        params: &GetActionParams,
        space: ActionSpace,
        action_cost: Option<ActionCost>,
        penalty_application: PenaltyApplication,
        classification: bool,
    ) -> Result<Self> {
        space.validate()?;
        if params.sampling.num_candidates() == 0 {
            return Err(ValueError::InvalidConfig(
                "action search needs at least one candidate".into(),
            ));
        }
        let weights = params.aggregation.weights(params.horizon)?;

        let action_cost = match action_cost.filter(|_| params.apply_action_cost) {
            Some(cost) => {
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
                let target = match cost.target {
                    Some(target) => target,
                    None => space.high(cost.dimension).ok_or_else(|| {
                        ValueError::UnsupportedConfiguration(format!(
                            "no upper bound for action dimension {}",
                            cost.dimension
                        ))
                    })?,
                };
                Some(ResolvedCost {
                    dimension: cost.dimension,
                    weight: cost.weight,
                    target,
                })
            }
            None => None,
        };

        Ok(Self {
            sampler: ActionSampler::new(params.sampling, space),
            horizon: params.horizon,
            weights,
            action_cost,
            penalty_application,
            classification,
        })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn sampler(&self) -> &ActionSampler {
        &self.sampler
    }

    /// Samples candidates from `rng` and runs [`Self::select_among`].
    pub fn get_action<R: Rng + ?Sized>(
        &self,
        select: &dyn CandidateScorer,
        eval: &dyn CandidateScorer,
        rng: &mut R,
    ) -> Result<Selection> {
        let candidates = self.sampler.sample(self.horizon, rng);
        self.select_among(select, eval, &candidates)
    }

    /// Picks the select-argmax candidate per observation and reports the
    /// eval value of that candidate.
    pub fn select_among(
        &self,
        select: &dyn CandidateScorer,
        eval: &dyn CandidateScorer,
        candidates: &ActionSequences,
    ) -> Result<Selection> {
        if candidates.horizon() != self.horizon {
            warn!(
                expected = self.horizon,
                actual = candidates.horizon(),
                "candidate horizon mismatch"
            );
            return Err(ValueError::HorizonMismatch {
                expected: self.horizon,
                actual: candidates.horizon(),
            });
        }
        let action_dim = self.sampler.space().flat_dim();
        if candidates.action_dim() != action_dim {
            return Err(ValueError::ShapeMismatch(format!(
                "candidates have {} action components, space has {action_dim}",
                candidates.action_dim()
            )));
        }
        if candidates.num_sequences() == 0 {
            return Err(ValueError::InvalidConfig(
                "action search needs at least one candidate".into(),
            ));
        }
        let batch = select.batch_size();
        if eval.batch_size() != batch {
            return Err(ValueError::BatchMismatch {
                expected: batch,
                actual: eval.batch_size(),
            });
        }

        let k = candidates.num_sequences();
        let penalties = self.penalties(candidates);

        let select_values = self.candidate_values(select, candidates, &penalties)?;
        let eval_penalties = match self.penalty_application {
            PenaltyApplication::SelectAndEval => penalties,
            PenaltyApplication::SelectOnly => vec![0.0; k],
        };
        let eval_values = self.candidate_values(eval, candidates, &eval_penalties)?;

        let mut selection = Selection {
            actions: Vec::with_capacity(batch),
            values: Vec::with_capacity(batch),
            indices: Vec::with_capacity(batch),
            argmax_mask: Vec::with_capacity(batch),
        };
        for b in 0..batch {
            let row = &select_values[b * k..(b + 1) * k];
            let best = argmax(row);
            let mut mask = vec![0.0; k];
            mask[best] = 1.0;

            selection.actions.push(candidates.first_action(best).to_vec());
            selection.values.push(eval_values[b * k + best]);
            selection.indices.push(best);
            selection.argmax_mask.push(mask);
        }

        debug!(batch, candidates = k, horizon = self.horizon, "action search");
        Ok(selection)
    }

    /// Action-cost penalty per candidate (zero when disabled).
    fn penalties(&self, candidates: &ActionSequences) -> Vec<f64> {
        let k = candidates.num_sequences();
        match self.action_cost {
            Some(cost) => (0..k)
                .map(|i| {
                    let mean_sq = candidates
                        .component(i, cost.dimension)
                        .map(|a| (a - cost.target).powi(2))
                        .sum::<f64>()
                        / candidates.horizon() as f64;
                    cost.weight * mean_sq
                })
                .collect(),
            None => vec![0.0; k],
        }
    }

    /// Aggregated, penalized value per (observation, candidate), flattened.
    fn candidate_values(
        &self,
        scorer: &dyn CandidateScorer,
        candidates: &ActionSequences,
        penalties: &[f64],
    ) -> Result<Vec<f64>> {
        let k = candidates.num_sequences();
        let rows = scorer.score(candidates)?;
        let expected = scorer.batch_size() * k;
        if rows.len() != expected {
            return Err(ValueError::BatchMismatch {
                expected,
                actual: rows.len(),
            });
        }

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let value = if self.classification {
                    let probs: Vec<f64> = row.iter().map(|&logit| -sigmoid(logit)).collect();
                    aggregate(&probs, &self.weights)?
                } else {
                    aggregate(row, &self.weights)?
                };
                Ok(value - penalties[i % k])
            })
            .collect()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Index of the first maximum.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::aggregation::AggregationScheme;
    use crate::config::SamplingStrategy;

    /// Scores candidate `k` with `per_candidate[k]` for every observation.
    struct FixedScorer {
        batch: usize,
        per_candidate: Vec<Vec<f64>>,
    }

    impl CandidateScorer for FixedScorer {
        fn batch_size(&self) -> usize {
            self.batch
        }

        fn score(&self, candidates: &ActionSequences) -> Result<Vec<Vec<f64>>> {
            assert_eq!(candidates.num_sequences(), self.per_candidate.len());
            Ok((0..self.batch)
                .flat_map(|_| self.per_candidate.iter().cloned())
                .collect())
        }
    }

    fn params(k: usize, horizon: usize) -> GetActionParams {
        GetActionParams {
            horizon,
            sampling: SamplingStrategy::Random { k },
            aggregation: AggregationScheme::Mean,
            apply_action_cost: true,
        }
    }

    fn space() -> ActionSpace {
        ActionSpace::continuous(vec![-1.0, 0.0], vec![1.0, 2.0]).unwrap()
    }

    /// Three candidates whose first actions are distinguishable.
    fn three_candidates() -> ActionSequences {
        ActionSequences::from_flat(
            3,
            2,
            2,
            vec![
                0.0, 2.0, 0.0, 2.0, // candidate 0
                0.5, 2.0, 0.5, 2.0, // candidate 1
                -0.5, 2.0, -0.5, 2.0, // candidate 2
            ],
        )
        .unwrap()
    }

    #[test]
    fn select_picks_eval_reports() {
        let selector = DoubleEstimatorSelector::new(
            &params(3, 2),
            space(),
            None,
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let select = FixedScorer {
            batch: 2,
            per_candidate: vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0]],
        };
        let eval = FixedScorer {
            batch: 2,
            per_candidate: vec![vec![9.0, 9.0], vec![2.0, 2.0], vec![3.0, 3.0]],
        };

        let out = selector
            .select_among(&select, &eval, &three_candidates())
            .unwrap();

        assert_eq!(out.len(), 2);
        for b in 0..2 {
            assert_eq!(out.indices[b], 2);
            assert_eq!(out.actions[b], vec![-0.5, 2.0]);
            assert_eq!(out.values[b], 3.0);
            assert_eq!(out.argmax_mask[b], vec![0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn action_cost_steers_selection() {
        let cost = ActionCost {
            dimension: 1,
            weight: 10.0,
            target: Some(0.0),
        };
        let candidates = ActionSequences::from_flat(
            2,
            1,
            2,
            vec![
                0.0, 2.0, // fast
                0.0, 0.0, // stopped
            ],
        )
        .unwrap();
        let scorer = FixedScorer {
            batch: 1,
            per_candidate: vec![vec![1.0], vec![0.5]],
        };

        let penalized = DoubleEstimatorSelector::new(
            &params(2, 1),
            space(),
            Some(cost),
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let out = penalized.select_among(&scorer, &scorer, &candidates).unwrap();
        assert_eq!(out.indices, vec![1]);
        assert_eq!(out.values, vec![0.5]);

        let unpenalized_params = GetActionParams {
            apply_action_cost: false,
            ..params(2, 1)
        };
        let plain = DoubleEstimatorSelector::new(
            &unpenalized_params,
            space(),
            Some(cost),
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let out = plain.select_among(&scorer, &scorer, &candidates).unwrap();
        assert_eq!(out.indices, vec![0]);
    }

    #[test]
    fn penalty_application_controls_reported_value() {
        let cost = ActionCost {
            dimension: 1,
            weight: 1.0,
            target: None,
        };
        // Target defaults to the upper speed bound 2.0; candidate 0 is 1.0
        // below it on every step, so its penalty is 1.0.
        let candidates =
            ActionSequences::from_flat(1, 2, 2, vec![0.0, 1.0, 0.0, 1.0]).unwrap();
        let scorer = FixedScorer {
            batch: 1,
            per_candidate: vec![vec![4.0, 4.0]],
        };

        let both = DoubleEstimatorSelector::new(
            &params(1, 2),
            space(),
            Some(cost),
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let out = both.select_among(&scorer, &scorer, &candidates).unwrap();
        assert!((out.values[0] - 3.0).abs() < 1e-12);

        let select_only = DoubleEstimatorSelector::new(
            &params(1, 2),
            space(),
            Some(cost),
            PenaltyApplication::SelectOnly,
            false,
        )
        .unwrap();
        let out = select_only
            .select_among(&scorer, &scorer, &candidates)
            .unwrap();
        assert!((out.values[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn classification_prefers_low_collision_logits() {
        let selector = DoubleEstimatorSelector::new(
            &params(2, 1),
            space(),
            None,
            PenaltyApplication::SelectAndEval,
            true,
        )
        .unwrap();
        let scorer = FixedScorer {
            batch: 1,
            per_candidate: vec![vec![3.0], vec![-3.0]],
        };
        let candidates = ActionSequences::from_flat(2, 1, 2, vec![0.0; 4]).unwrap();
        let out = selector.select_among(&scorer, &scorer, &candidates).unwrap();
        assert_eq!(out.indices, vec![1]);
        assert!((out.values[0] + sigmoid(-3.0)).abs() < 1e-12);
    }

    #[test]
    fn sampled_actions_within_bounds() {
        let selector = DoubleEstimatorSelector::new(
            &params(16, 3),
            space(),
            None,
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let scorer = FixedScorer {
            batch: 4,
            per_candidate: (0..16).map(|k| vec![k as f64 % 5.0; 3]).collect(),
        };
        let mut rng = StdRng::seed_from_u64(21);
        let out = selector.get_action(&scorer, &scorer, &mut rng).unwrap();
        assert_eq!(out.len(), 4);
        for action in &out.actions {
            assert!(space().contains(action));
        }
    }

    #[test]
    fn horizon_mismatch_is_fatal() {
        let selector = DoubleEstimatorSelector::new(
            &params(3, 4),
            space(),
            None,
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let scorer = FixedScorer {
            batch: 1,
            per_candidate: vec![vec![0.0; 2]; 3],
        };
        let err = selector
            .select_among(&scorer, &scorer, &three_candidates())
            .unwrap_err();
        assert!(matches!(
            err,
            ValueError::HorizonMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn batch_mismatch_is_fatal() {
        let selector = DoubleEstimatorSelector::new(
            &params(3, 2),
            space(),
            None,
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let select = FixedScorer {
            batch: 1,
            per_candidate: vec![vec![0.0; 2]; 3],
        };
        let eval = FixedScorer {
            batch: 2,
            per_candidate: vec![vec![0.0; 2]; 3],
        };
        assert!(matches!(
            selector.select_among(&select, &eval, &three_candidates()),
            Err(ValueError::BatchMismatch { .. })
        ));
    }

    #[test]
    fn argmax_takes_first_maximum() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[-1.0]), 0);
    }

    #[test]
    fn zero_candidates_rejected() {
        let result = DoubleEstimatorSelector::new(
            &params(0, 2),
            space(),
            None,
            PenaltyApplication::SelectAndEval,
            false,
        );
        assert!(matches!(result, Err(ValueError::InvalidConfig(_))));

        let selector = DoubleEstimatorSelector::new(
            &params(3, 2),
            space(),
            None,
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let scorer = FixedScorer {
            batch: 1,
            per_candidate: Vec::new(),
        };
        let empty = ActionSequences::from_flat(0, 2, 2, Vec::new()).unwrap();
        assert!(matches!(
            selector.select_among(&scorer, &scorer, &empty),
            Err(ValueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn action_cost_dimension_out_of_range() {
        let cost = ActionCost {
            dimension: 5,
            weight: 1.0,
            target: Some(0.0),
        };
        let result = DoubleEstimatorSelector::new(
            &params(3, 2),
            space(),
            Some(cost),
            PenaltyApplication::SelectAndEval,
            false,
        );
        assert!(matches!(
            result,
            Err(ValueError::UnsupportedConfiguration(_))
        ));

        let on_discrete = DoubleEstimatorSelector::new(
            &params(3, 2),
            ActionSpace::discrete(4).unwrap(),
            Some(ActionCost {
                dimension: 0,
                ..cost
            }),
            PenaltyApplication::SelectAndEval,
            false,
        );
        assert!(matches!(
            on_discrete,
            Err(ValueError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn candidates_must_match_action_dim() {
        let selector = DoubleEstimatorSelector::new(
            &params(3, 2),
            space(),
            Some(ActionCost {
                dimension: 1,
                weight: 1.0,
                target: Some(0.0),
            }),
            PenaltyApplication::SelectAndEval,
            false,
        )
        .unwrap();
        let scorer = FixedScorer {
            batch: 1,
            per_candidate: vec![vec![0.0; 2]; 3],
        };
        let one_dim = ActionSequences::from_flat(3, 2, 1, vec![0.0; 6]).unwrap();
        assert!(matches!(
            selector.select_among(&scorer, &scorer, &one_dim),
            Err(ValueError::ShapeMismatch(_))
        ));
    }
}
