//! Error types for the simulation harness.

use thiserror::Error;
use vismpc_core::{ConfigError, PlanError, PlanStage};
use vismpc_env::{ServiceError, SinkError};

/// Failures reported by the simulated robot when executing an action.
#[derive(Debug, Error)]
pub enum RobotError {
    /// The commanded motion would leave the reachable workspace.
    #[error("step {step}: action leaves the workspace along dimension {dim}")]
    OutOfWorkspace { step: usize, dim: usize },

    /// The inverse-kinematics solver found no joint solution.
    #[error("step {step}: inverse kinematics found no solution")]
    NoIkSolution { step: usize },

    /// The action vector has the wrong dimensionality.
    #[error("action has {actual} dimensions, robot expects {expected}")]
    ActionShape { expected: usize, actual: usize },
}

impl RobotError {
    /// True for kinematic failures that a fresh rollout attempt may avoid.
    pub fn is_infeasible(&self) -> bool {
        matches!(self, RobotError::OutOfWorkspace { .. } | RobotError::NoIkSolution { .. })
    }
}

/// Errors raised while setting up or running a scenario.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("prediction service: {0}")]
    Service(#[from] ServiceError),

    #[error("diagnostics sink: {0}")]
    Sink(#[from] SinkError),

    #[error("planning failed during {stage}: {source}")]
    Plan {
        stage: PlanStage,
        #[source]
        source: PlanError,
    },

    #[error(transparent)]
    Robot(#[from] RobotError),

    #[error("all {tries} rollout attempts were kinematically infeasible")]
    RetriesExhausted { tries: usize },

    #[error("invalid scenario setup: {0}")]
    Setup(String),

    #[error("export failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PlanError> for SimError {
    fn from(source: PlanError) -> Self {
        SimError::Plan {
            stage: source.stage(),
            source,
        }
    }
}
