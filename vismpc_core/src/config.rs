//! Planner Configuration
//! =====================
//!
//! Every option the planning core recognizes, typed and validated up front.
//! A `PlannerConfig` that passes [`PlannerConfig::validate`] can be planned
//! with; there is no "if key present" branching anywhere downstream.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::ConfigError;

// =============================================================================
// ACTION GROUPS & COVARIANCE STRUCTURE
// =============================================================================

/// A named subset of action dimensions sharing an initial standard deviation
/// (e.g. translation, lift, rotation, gripper).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGroup {
    pub name: String,
    /// Action dimensions belonging to this group
    pub dims: Vec<usize>,
    /// Initial standard deviation for every dimension in the group
    pub initial_std: f64,
}

/// Which covariance entries the elite refit keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceStructure {
    /// Full `HA x HA` covariance
    #[default]
    Full,
    /// One `A x A` block per timestep, timesteps decoupled
    PerTimestep,
    /// One block per action group across all timesteps, groups decoupled
    PerGroup,
}

/// What the visualization queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued payload to make room
    DropOldest,
    /// Wait up to `millis` for room, then drop the new payload
    BlockFor { millis: u64 },
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropOldest
    }
}

// =============================================================================
// PLANNER CONFIG
// =============================================================================

/// Configuration for a [`CemPlanner`](crate::CemPlanner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    // --- CEM ---
    /// CEM iterations per control step (fixed compute budget)
    pub iterations: usize,

    /// Population size `M`
    pub num_samples: usize,

    /// Optional per-iteration population sizes, overriding `num_samples`
    pub samples_per_iteration: Option<Vec<usize>>,

    /// Elite fraction of the population used for refitting
    pub selection_frac: f64,

    /// Partition of the action dimensions with their initial std-devs
    pub action_groups: Vec<ActionGroup>,

    /// Block structure kept by the covariance refit
    pub covariance: CovarianceStructure,

    /// Variance floor applied to the refit diagonal
    pub min_variance: f64,

    /// Seed each step from the previous step's posterior
    pub warm_start: bool,

    // --- Cost ---
    /// Optional per-(camera, task) trade-off weights, camera-major
    pub task_weights: Option<Vec<f64>>,

    /// Weight of the final predicted timestep (others weigh 1)
    pub final_weight: f64,

    /// Restrict scoring to camera 0
    pub first_view_only: bool,

    /// Penalty per unit of squared action magnitude
    pub action_cost_factor: f64,

    // --- Pixel distribution input ---
    /// Re-seed one-hot designated pixels every iteration
    pub reseed_designated_pixels: bool,

    /// Feed the model's own predicted distribution back as input
    pub predictor_propagation: bool,

    // --- Prediction service ---
    /// Number of parallel model replicas `G`
    pub num_replicas: usize,

    /// Rows per prediction call
    pub batch_capacity: usize,

    pub num_cameras: usize,
    pub num_tasks: usize,
    pub context_length: usize,
    pub horizon: usize,
    pub action_dim: usize,
    pub image_height: usize,
    pub image_width: usize,

    /// Lower action bound per dimension
    pub action_low: Vec<f64>,

    /// Upper action bound per dimension
    pub action_high: Vec<f64>,

    // --- Diagnostics ---
    /// Enqueue diagnostics at all
    pub verbose: bool,

    /// Enqueue diagnostics on steps where `step % verbose_every == 0`
    pub verbose_every: usize,

    /// Enqueue on every iteration of a logged step, not just the last
    pub verbose_every_iteration: bool,

    /// Visualization queue capacity
    pub visualization_queue: usize,

    pub overflow: OverflowPolicy,

    /// RNG seed; entropy-seeded when absent
    pub seed: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            num_samples: 200,
            samples_per_iteration: None,
            selection_frac: 0.05,
            action_groups: vec![
                ActionGroup {
                    name: "translation".to_string(),
                    dims: vec![0, 1],
                    initial_std: 0.05,
                },
                ActionGroup {
                    name: "lift".to_string(),
                    dims: vec![2],
                    initial_std: 0.02,
                },
                ActionGroup {
                    name: "rotation".to_string(),
                    dims: vec![3],
                    initial_std: 0.1,
                },
            ],
            covariance: CovarianceStructure::Full,
            min_variance: 1e-6,
            warm_start: false,
            task_weights: None,
            final_weight: 10.0,
            first_view_only: false,
            action_cost_factor: 0.0,
            reseed_designated_pixels: true,
            predictor_propagation: false,
            num_replicas: 1,
            batch_capacity: 100,
            num_cameras: 1,
            num_tasks: 1,
            context_length: 2,
            horizon: 13,
            action_dim: 4,
            image_height: 48,
            image_width: 64,
            action_low: vec![-0.1, -0.1, -0.05, -0.3],
            action_high: vec![0.1, 0.1, 0.05, 0.3],
            verbose: false,
            verbose_every: 1,
            verbose_every_iteration: false,
            visualization_queue: 4,
            overflow: OverflowPolicy::DropOldest,
            seed: None,
        }
    }
}

impl PlannerConfig {
    /// Parses a JSON configuration and validates it.
    ///
    /// Missing fields keep their [`Default`] values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PlannerConfig = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Population size at a given CEM iteration.
    pub fn samples_at(&self, iteration: usize) -> usize {
        self.samples_per_iteration
            .as_ref()
            .and_then(|s| s.get(iteration).copied())
            .unwrap_or(self.num_samples)
    }

    /// Number of elites kept from a population of `population` candidates.
    pub fn elite_count(&self, population: usize) -> usize {
        ((population as f64 * self.selection_frac).round() as usize).clamp(1, population)
    }

    /// Number of (camera, task) pairs.
    pub fn num_pairs(&self) -> usize {
        self.num_cameras * self.num_tasks
    }

    /// Number of predicted future timesteps.
    pub fn predicted_steps(&self) -> usize {
        self.horizon
    }

    /// Length of the flattened action sequence `H * A`.
    pub fn flat_dim(&self) -> usize {
        self.horizon * self.action_dim
    }

    /// Initial std-dev per action dimension, resolved from the groups.
    pub fn initial_std_per_dim(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.action_dim];
        for group in &self.action_groups {
            for &d in &group.dims {
                if d < out.len() {
                    out[d] = group.initial_std;
                }
            }
        }
        out
    }

    /// Group index per action dimension.
    pub fn group_of_dim(&self) -> Vec<usize> {
        let mut out = vec![0; self.action_dim];
        for (g, group) in self.action_groups.iter().enumerate() {
            for &d in &group.dims {
                if d < out.len() {
                    out[d] = g;
                }
            }
        }
        out
    }

    /// Index range of timestep `t` in the flattened action vector.
    pub fn step_range(&self, t: usize) -> Range<usize> {
        t * self.action_dim..(t + 1) * self.action_dim
    }

    /// Exhaustively validates the configuration.
    ///
    /// Every rule maps to its own [`ConfigError`] variant so the caller
    /// sees exactly which option is wrong.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if self.batch_capacity == 0 || self.num_replicas == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.batch_capacity % self.num_replicas != 0 {
            return Err(ConfigError::BatchNotDivisibleByReplicas {
                batch_capacity: self.batch_capacity,
                num_replicas: self.num_replicas,
            });
        }

        let populations: Vec<usize> = match &self.samples_per_iteration {
            Some(schedule) => {
                if schedule.len() != self.iterations {
                    return Err(ConfigError::ScheduleLength {
                        expected: self.iterations,
                        actual: schedule.len(),
                    });
                }
                schedule.clone()
            }
            None => vec![self.num_samples],
        };
        for population in populations {
            if population == 0 || population % self.batch_capacity != 0 {
                return Err(ConfigError::PopulationNotDivisible {
                    population,
                    batch_capacity: self.batch_capacity,
                });
            }
        }

        if !(self.selection_frac > 0.0 && self.selection_frac <= 1.0) {
            return Err(ConfigError::SelectionFraction(self.selection_frac));
        }

        match (self.reseed_designated_pixels, self.predictor_propagation) {
            (true, true) => return Err(ConfigError::ConflictingDistributionModes),
            (false, false) => return Err(ConfigError::NoDistributionMode),
            _ => {}
        }

        if self.num_cameras == 0 || self.num_tasks == 0 {
            return Err(ConfigError::NoTasks);
        }
        if self.context_length == 0 || self.horizon == 0 || self.action_dim == 0 {
            return Err(ConfigError::ZeroShape);
        }
        if self.image_height == 0 || self.image_width == 0 {
            return Err(ConfigError::ZeroShape);
        }

        for (name, bounds) in [("action_low", &self.action_low), ("action_high", &self.action_high)] {
            if bounds.len() != self.action_dim {
                return Err(ConfigError::BoundsLength {
                    which: name,
                    expected: self.action_dim,
                    actual: bounds.len(),
                });
            }
        }
        if let Some(dim) = (0..self.action_dim).find(|&d| !(self.action_low[d] <= self.action_high[d])) {
            return Err(ConfigError::InvertedBounds(dim));
        }

        self.validate_groups()?;

        if let Some(weights) = &self.task_weights {
            if weights.len() != self.num_pairs() {
                return Err(ConfigError::TaskWeightsLength {
                    expected: self.num_pairs(),
                    actual: weights.len(),
                });
            }
            if weights.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) || !(weights.iter().sum::<f64>() > 0.0) {
                return Err(ConfigError::TaskWeightsNonPositive);
            }
        }

        if !(self.final_weight > 0.0) || !self.final_weight.is_finite() {
            return Err(ConfigError::FinalWeight(self.final_weight));
        }
        if !(self.min_variance > 0.0) || !self.min_variance.is_finite() {
            return Err(ConfigError::MinVariance(self.min_variance));
        }
        if self.verbose && (self.verbose_every == 0 || self.visualization_queue == 0) {
            return Err(ConfigError::VerbosityCadence);
        }

        Ok(())
    }

    fn validate_groups(&self) -> Result<(), ConfigError> {
        let mut seen = vec![false; self.action_dim];
        for group in &self.action_groups {
            if !(group.initial_std > 0.0) || !group.initial_std.is_finite() {
                return Err(ConfigError::InitialStd {
                    group: group.name.clone(),
                    std: group.initial_std,
                });
            }
            for &d in &group.dims {
                if d >= self.action_dim {
                    return Err(ConfigError::GroupDimOutOfRange {
                        group: group.name.clone(),
                        dim: d,
                    });
                }
                if seen[d] {
                    return Err(ConfigError::GroupOverlap(d));
                }
                seen[d] = true;
            }
        }
        if let Some(d) = seen.iter().position(|s| !s) {
            return Err(ConfigError::GroupUncovered(d));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PlannerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_population_must_divide_into_batches() {
        let config = PlannerConfig {
            num_samples: 250,
            batch_capacity: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PopulationNotDivisible {
                population: 250,
                batch_capacity: 100
            })
        ));
    }

    #[test]
    fn test_schedule_entries_checked() {
        let config = PlannerConfig {
            samples_per_iteration: Some(vec![600, 300, 150]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PopulationNotDivisible { population: 150, .. })
        ));
    }

    #[test]
    fn test_both_distribution_modes_rejected() {
        let config = PlannerConfig {
            reseed_designated_pixels: true,
            predictor_propagation: true,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ConflictingDistributionModes)
        ));
    }

    #[test]
    fn test_groups_must_partition_action_dims() {
        let mut config = PlannerConfig::default();
        config.action_groups.pop();
        assert!(matches!(config.validate(), Err(ConfigError::GroupUncovered(3))));

        let mut config = PlannerConfig::default();
        config.action_groups[1].dims = vec![1];
        assert!(matches!(config.validate(), Err(ConfigError::GroupOverlap(1))));
    }

    #[test]
    fn test_task_weights_length() {
        let config = PlannerConfig {
            num_tasks: 2,
            task_weights: Some(vec![1.0]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TaskWeightsLength { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_nan_values_rejected() {
        let config = PlannerConfig {
            final_weight: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::FinalWeight(w)) if w.is_nan()));

        let config = PlannerConfig {
            min_variance: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MinVariance(v)) if v.is_nan()));

        let mut config = PlannerConfig::default();
        config.action_groups[0].initial_std = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InitialStd { .. })));

        let mut config = PlannerConfig::default();
        config.action_low[1] = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvertedBounds(1))));

        let config = PlannerConfig {
            task_weights: Some(vec![f64::NAN]),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::TaskWeightsNonPositive)));
    }

    #[test]
    fn test_infinite_final_weight_rejected() {
        let config = PlannerConfig {
            final_weight: f64::INFINITY,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::FinalWeight(_))));
    }

    #[test]
    fn test_elite_count() {
        let config = PlannerConfig::default();
        assert_eq!(config.elite_count(300), 15);
        assert_eq!(config.elite_count(10), 1);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "iterations": 2,
            "num_samples": 400,
            "batch_capacity": 200,
            "num_replicas": 2,
            "covariance": "per_group",
            "overflow": { "block_for": { "millis": 5 } }
        }"#;
        let config = PlannerConfig::from_json(json).unwrap();

        assert_eq!(config.iterations, 2);
        assert_eq!(config.covariance, CovarianceStructure::PerGroup);
        assert_eq!(config.overflow, OverflowPolicy::BlockFor { millis: 5 });
        assert_eq!(config.horizon, PlannerConfig::default().horizon);
    }

    #[test]
    fn test_config_from_json_rejects_bad_input() {
        assert!(matches!(PlannerConfig::from_json("{ \"iterations\": "), Err(ConfigError::Parse(_))));
        assert!(matches!(
            PlannerConfig::from_json(r#"{ "num_samples": 150 }"#),
            Err(ConfigError::PopulationNotDivisible { population: 150, .. })
        ));
    }

    #[test]
    fn test_initial_std_per_dim() {
        let config = PlannerConfig::default();
        assert_eq!(config.initial_std_per_dim(), vec![0.05, 0.05, 0.02, 0.1]);
        assert_eq!(config.group_of_dim(), vec![0, 0, 1, 2]);
    }
}
