//! VisMPC Core - Sampling-Based Visual Model Predictive Control
//!
//! Picks robot action sequences by asking a learned video-prediction model
//! where tracked pixels will go, and scoring those predictions against goal
//! pixels:
//! 1. **Search**: Cross-Entropy Method over `H x A` action sequences with a
//!    fixed iteration budget per control step
//! 2. **Batching**: populations tiled into exact service-sized chunks, with
//!    candidate order preserved end to end
//! 3. **Cost**: expected distance-to-goal of the predicted pixel
//!    distributions, weighted toward the final timestep
//! 4. **Diagnostics**: a bounded, fire-and-forget visualization worker

pub mod config;
pub mod cost;
pub mod dispatch;
pub mod distance_grid;
pub mod error;
pub mod offload;
pub mod planner;
pub mod propagation;
pub mod sampling;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use config::{ActionGroup, CovarianceStructure, OverflowPolicy, PlannerConfig};
pub use cost::{CostEvaluator, CostVector};
pub use dispatch::{DispatchError, SampleBatchDispatcher};
pub use distance_grid::{DistanceGrid, DistanceGrids};
pub use error::{ConfigError, PlanError, PlanStage, SampleError, ScoreError};
pub use offload::{OffloadStats, SubmitOutcome, VisualizationOffload};
pub use planner::{CemPlanner, IterationTiming, PlanDiagnostics, PlanOutcome};
pub use propagation::{DistributionMode, DistributionPropagator};
pub use sampling::SamplingDistribution;
