//! Error taxonomy for the planning core.

use thiserror::Error;
use vismpc_env::ServiceError;

/// Invalid planner configuration. Always fatal, never coerced.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(String),

    #[error("iterations must be at least 1")]
    ZeroIterations,

    #[error("batch capacity and replica count must be non-zero")]
    ZeroBatch,

    #[error("population size {population} is not a multiple of batch capacity {batch_capacity}")]
    PopulationNotDivisible { population: usize, batch_capacity: usize },

    #[error("batch capacity {batch_capacity} is not a multiple of replica count {num_replicas}")]
    BatchNotDivisibleByReplicas { batch_capacity: usize, num_replicas: usize },

    #[error("samples_per_iteration has {actual} entries, expected {expected}")]
    ScheduleLength { expected: usize, actual: usize },

    #[error("selection fraction {0} outside (0, 1]")]
    SelectionFraction(f64),

    #[error("re-seed and propagation pixel distribution modes are both enabled")]
    ConflictingDistributionModes,

    #[error("no pixel distribution mode enabled")]
    NoDistributionMode,

    #[error("camera and task counts must be non-zero")]
    NoTasks,

    #[error("context length, horizon, action dimension and image size must be non-zero")]
    ZeroShape,

    #[error("{which} has {actual} entries, expected {expected}")]
    BoundsLength {
        which: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("action bounds for dimension {0} are inverted or not a number")]
    InvertedBounds(usize),

    #[error("action group {group} needs a positive, finite initial std, got {std}")]
    InitialStd { group: String, std: f64 },

    #[error("action group {group} references dimension {dim} outside the action")]
    GroupDimOutOfRange { group: String, dim: usize },

    #[error("action dimension {0} belongs to more than one group")]
    GroupOverlap(usize),

    #[error("action dimension {0} belongs to no group")]
    GroupUncovered(usize),

    #[error("task_weights has {actual} entries, expected one per (camera, task) = {expected}")]
    TaskWeightsLength { expected: usize, actual: usize },

    #[error("task weights must be finite and non-negative with a positive sum")]
    TaskWeightsNonPositive,

    #[error("final weight {0} must be positive and finite")]
    FinalWeight(f64),

    #[error("minimum variance {0} must be positive and finite")]
    MinVariance(f64),

    #[error("verbose mode needs a non-zero cadence and queue capacity")]
    VerbosityCadence,

    #[error("service advertises {what} = {service}, config expects {config}")]
    ServiceMismatch {
        what: &'static str,
        service: usize,
        config: usize,
    },

    #[error("observation carries {actual} context steps, model expects {expected}")]
    ContextMismatch { expected: usize, actual: usize },

    #[error("{what}: expected {expected} (camera x task), got {actual}")]
    TaskCountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// The sampling distribution could not be drawn from.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("covariance not positive definite after {attempts} jitter attempts")]
    NotPositiveDefinite { attempts: usize },
}

/// Predictions that cannot be turned into a cost vector.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("{rollouts} rollouts for {candidates} candidates")]
    RolloutCount { rollouts: usize, candidates: usize },

    #[error("distance grids cover {cameras}x{tasks} (camera x task), expected {expected_cameras}x{expected_tasks}")]
    GridCount {
        cameras: usize,
        tasks: usize,
        expected_cameras: usize,
        expected_tasks: usize,
    },

    #[error("candidate {index} has no predicted pixel distributions")]
    MissingDistributions { index: usize },

    #[error("candidate {index} predicts {actual} timesteps, expected {expected}")]
    StepCount {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("candidate {index} step {step} predicts {cameras}x{tasks} maps, expected {expected_cameras}x{expected_tasks}")]
    MapCount {
        index: usize,
        step: usize,
        cameras: usize,
        tasks: usize,
        expected_cameras: usize,
        expected_tasks: usize,
    },

    #[error("candidate {index} map shape {actual:?} does not match grid {expected:?}")]
    MapShape {
        index: usize,
        actual: (usize, usize),
        expected: (usize, usize),
    },

    #[error("empty population")]
    EmptyPopulation,
}

/// The planner stage a fatal error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStage {
    Init,
    Sample,
    Dispatch,
    Score,
}

impl PlanStage {
    /// Human-readable stage name.
    pub fn name(&self) -> &'static str {
        match self {
            PlanStage::Init => "init",
            PlanStage::Sample => "sampling",
            PlanStage::Dispatch => "dispatch",
            PlanStage::Score => "scoring",
        }
    }
}

impl std::fmt::Display for PlanStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A fatal planning error. The control step yields no action.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("sampling failed at iteration {iteration}: {source}")]
    Sampling {
        iteration: usize,
        #[source]
        source: SampleError,
    },

    #[error("dispatch failed at iteration {iteration}, chunk {chunk}: {source}")]
    Dispatch {
        iteration: usize,
        chunk: usize,
        #[source]
        source: ServiceError,
    },

    #[error("scoring failed at iteration {iteration}: {source}")]
    Scoring {
        iteration: usize,
        #[source]
        source: ScoreError,
    },
}

impl PlanError {
    /// Which stage of the control step failed.
    pub fn stage(&self) -> PlanStage {
        match self {
            PlanError::Config(_) => PlanStage::Init,
            PlanError::Sampling { .. } => PlanStage::Sample,
            PlanError::Dispatch { .. } => PlanStage::Dispatch,
            PlanError::Scoring { .. } => PlanStage::Score,
        }
    }
}
