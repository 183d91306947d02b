//! Pixel-Distribution Cost
//! =======================
//!
//! Scores each candidate by the expected distance-to-goal of its predicted
//! pixel distributions:
//!
//! ```text
//! s[c, k, t] = Σ_xy  P̂[c, k, t](x, y) · D[c, k](x, y)      P̂ = P / ΣP
//! s[c, k]    = Σ_t w_t s[c, k, t] / Σ_t w_t                 w = (1, …, 1, final_weight)
//! cost       = Σ_ck λ_ck s[c, k] / Σ_ck λ_ck                λ = task weights (or 1)
//! ```
//!
//! Lower is better. A map that sums to zero has no defined expectation; the
//! candidate gets `+inf` and ranks last instead of aborting the step.

use nalgebra::DMatrix;
use vismpc_env::{ActionSequence, PredictedRollout, ScoreTrace};

use crate::config::PlannerConfig;
use crate::distance_grid::DistanceGrids;
use crate::error::ScoreError;

/// One scalar cost per candidate, in population order.
#[derive(Debug, Clone, PartialEq)]
pub struct CostVector(Vec<f64>);

impl CostVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }

    /// Candidate indices sorted by ascending cost. The sort is stable, so
    /// ties keep population order.
    pub fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.0.len()).collect();
        order.sort_by(|&a, &b| self.0[a].total_cmp(&self.0[b]));
        order
    }

    /// Index of the lowest-cost candidate (first one on ties).
    pub fn best_index(&self) -> Option<usize> {
        self.ranking().first().copied()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

/// Expected distance of one map under one grid.
///
/// Returns `None` for a degenerate map (non-positive or non-finite mass).
pub fn expected_distance(distribution: &DMatrix<f32>, grid: &DMatrix<f32>) -> Option<f64> {
    let mass: f64 = distribution.iter().map(|p| *p as f64).sum();
    if !(mass > 0.0) || !mass.is_finite() {
        return None;
    }
    let weighted: f64 = distribution
        .iter()
        .zip(grid.iter())
        .map(|(p, d)| *p as f64 * *d as f64)
        .sum();
    Some(weighted / mass)
}

/// Turns predicted rollouts into a [`CostVector`].
#[derive(Debug, Clone)]
pub struct CostEvaluator {
    num_cameras: usize,
    num_tasks: usize,
    predicted_steps: usize,
    final_weight: f64,
    task_weights: Option<Vec<f64>>,
    first_view_only: bool,
    action_cost_factor: f64,
    best_trace: Option<ScoreTrace>,
}

impl CostEvaluator {
    pub fn from_config(config: &PlannerConfig) -> Self {
        Self {
            num_cameras: config.num_cameras,
            num_tasks: config.num_tasks,
            predicted_steps: config.predicted_steps(),
            final_weight: config.final_weight,
            task_weights: config.task_weights.clone(),
            first_view_only: config.first_view_only,
            action_cost_factor: config.action_cost_factor,
            best_trace: None,
        }
    }

    /// Temporal weights for `steps` predicted timesteps.
    pub fn time_weights(&self, steps: usize) -> Vec<f64> {
        let mut weights = vec![1.0; steps];
        if let Some(last) = weights.last_mut() {
            *last = self.final_weight;
        }
        weights
    }

    /// Per-timestep score trace of the last scored arg-best candidate.
    ///
    /// Diagnostics only; the optimization signal is the returned
    /// [`CostVector`].
    pub fn best_trace(&self) -> Option<&ScoreTrace> {
        self.best_trace.as_ref()
    }

    /// Scores every candidate.
    ///
    /// Inputs are not modified. The only side effect is replacing the
    /// retained arg-best [`ScoreTrace`].
    pub fn score(
        &mut self,
        population: &[ActionSequence],
        rollouts: &[PredictedRollout],
        grids: &DistanceGrids,
    ) -> Result<CostVector, ScoreError> {
        if rollouts.len() != population.len() {
            return Err(ScoreError::RolloutCount {
                rollouts: rollouts.len(),
                candidates: population.len(),
            });
        }
        if grids.num_cameras() != self.num_cameras || grids.num_tasks() != self.num_tasks {
            return Err(ScoreError::GridCount {
                cameras: grids.num_cameras(),
                tasks: grids.num_tasks(),
                expected_cameras: self.num_cameras,
                expected_tasks: self.num_tasks,
            });
        }

        let mut costs = Vec::with_capacity(rollouts.len());
        let mut traces = Vec::with_capacity(rollouts.len());
        for (i, rollout) in rollouts.iter().enumerate() {
            let trace = self.trace_for(i, rollout, grids)?;
            let mut cost = self.aggregate(&trace);
            if self.action_cost_factor > 0.0 {
                cost += self.action_cost_factor * population[i].squared_magnitude_sum();
            }
            costs.push(cost);
            traces.push(trace);
        }

        let costs = CostVector::new(costs);
        if let Some(best) = costs.best_index() {
            for c in 0..self.num_cameras {
                for k in 0..self.num_tasks {
                    let series = traces[best].series(c, k);
                    tracing::debug!(
                        camera = c,
                        task = k,
                        final_score = series.last().copied().unwrap_or(f64::NAN),
                        "best candidate per-task score"
                    );
                }
            }
            self.best_trace = traces.into_iter().nth(best);
        }
        Ok(costs)
    }

    fn trace_for(
        &self,
        index: usize,
        rollout: &PredictedRollout,
        grids: &DistanceGrids,
    ) -> Result<ScoreTrace, ScoreError> {
        let distributions = rollout
            .distributions
            .as_ref()
            .ok_or(ScoreError::MissingDistributions { index })?;

        // Every candidate is weighted over the same timesteps.
        if distributions.len() != self.predicted_steps {
            return Err(ScoreError::StepCount {
                index,
                expected: self.predicted_steps,
                actual: distributions.len(),
            });
        }

        let mut trace = ScoreTrace::zeros(self.num_cameras, self.num_tasks, self.predicted_steps);
        for (t, maps) in distributions.iter().enumerate() {
            if maps.num_cameras() != self.num_cameras || maps.num_tasks() != self.num_tasks {
                return Err(ScoreError::MapCount {
                    index,
                    step: t,
                    cameras: maps.num_cameras(),
                    tasks: maps.num_tasks(),
                    expected_cameras: self.num_cameras,
                    expected_tasks: self.num_tasks,
                });
            }
            for c in 0..self.num_cameras {
                for k in 0..self.num_tasks {
                    let map = maps.get(c, k);
                    let grid = grids.get(c, k).field();
                    if map.shape() != grid.shape() {
                        return Err(ScoreError::MapShape {
                            index,
                            actual: map.shape(),
                            expected: grid.shape(),
                        });
                    }
                    let score = expected_distance(map, grid).unwrap_or(f64::INFINITY);
                    trace.set(c, k, t, score);
                }
            }
        }
        Ok(trace)
    }

    /// Collapses a trace to one cost. Anything that is not a finite number
    /// becomes `+inf`, so it can never outrank a real candidate.
    fn aggregate(&self, trace: &ScoreTrace) -> f64 {
        let cost = self.weighted_mean(trace);
        if cost.is_finite() {
            cost
        } else {
            f64::INFINITY
        }
    }

    fn weighted_mean(&self, trace: &ScoreTrace) -> f64 {
        let time_weights = self.time_weights(trace.horizon);
        let time_norm: f64 = time_weights.iter().sum();
        if !(time_norm > 0.0) {
            return f64::INFINITY;
        }
        let cameras = if self.first_view_only { 1 } else { self.num_cameras };

        let mut weighted = 0.0;
        let mut norm = 0.0;
        for c in 0..cameras {
            for k in 0..self.num_tasks {
                let series = trace.series(c, k);
                if series.iter().any(|s| !s.is_finite()) {
                    return f64::INFINITY;
                }
                let pair_score: f64 = series
                    .iter()
                    .zip(&time_weights)
                    .map(|(s, w)| s * w)
                    .sum::<f64>()
                    / time_norm;
                let lambda = self
                    .task_weights
                    .as_ref()
                    .map_or(1.0, |w| w[c * self.num_tasks + k]);
                weighted += lambda * pair_score;
                norm += lambda;
            }
        }

        if norm > 0.0 {
            weighted / norm
        } else {
            // All selected pairs carry zero weight; fall back to the plain mean.
            let pairs = (cameras * self.num_tasks) as f64;
            (0..cameras)
                .flat_map(|c| (0..self.num_tasks).map(move |k| (c, k)))
                .map(|(c, k)| {
                    trace
                        .series(c, k)
                        .iter()
                        .zip(&time_weights)
                        .map(|(s, w)| s * w)
                        .sum::<f64>()
                        / time_norm
                })
                .sum::<f64>()
                / pairs
        }
    }
}
