//! Batched inference capability traits.

use crate::error::ServiceError;
use crate::types::{PredictedRollout, PredictionRequest};

/// A batched inference provider with a fixed batch size and a replica count.
///
/// The planner treats this as a pure function from (context, actions,
/// optional pixel distribution) to predicted rollouts. Apart from the loaded
/// model weights, which are shared read-only, there is no state carried
/// between calls.
///
/// # Implementations
///
/// - **Production**: [`ReplicatedService`](crate::ReplicatedService) fans a
///   batch out over `G` [`ReplicaModel`]s and reassembles the results
/// - **Simulation**: a synthetic tracker or index-tagging stub
///
/// # Contract
///
/// `predict` receives exactly `batch_capacity()` action rows and returns
/// exactly one [`PredictedRollout`] per row, in row order.
pub trait PredictionService: Send + Sync {
    /// Number of action rows every call must carry.
    fn batch_capacity(&self) -> usize;

    /// Number of parallel model replicas behind this service.
    fn replica_count(&self) -> usize;

    /// Runs one synchronous batched prediction.
    ///
    /// # Returns
    /// * `Ok(rollouts)` - one rollout per action row, in row order
    /// * `Err(ServiceError)` - fatal for the calling control step
    fn predict(&self, request: &PredictionRequest<'_>) -> Result<Vec<PredictedRollout>, ServiceError>;
}

/// One model replica ("tower") serving a contiguous sub-slice of a batch.
pub trait ReplicaModel: Send + Sync {
    /// Predicts one rollout per action row of `request`, in row order.
    fn predict_rows(&self, request: &PredictionRequest<'_>) -> Result<Vec<PredictedRollout>, ServiceError>;
}
