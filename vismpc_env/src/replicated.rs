//! Production prediction service that fans a batch out across replicas.

use crate::error::ServiceError;
use crate::service::{PredictionService, ReplicaModel};
use crate::types::{PredictedRollout, PredictionRequest};
use std::thread;

/// A [`PredictionService`] backed by `G` identical model replicas.
///
/// Each call splits the `batch_capacity` action rows into `G` contiguous
/// sub-slices of `batch_capacity / G` rows. Replica `g` serves rows
/// `[g * n, (g + 1) * n)`. The replicas run concurrently on scoped threads
/// and the call blocks until all of them finish, so from the caller's side
/// this is a synchronous fan-out/fan-in.
pub struct ReplicatedService<M: ReplicaModel> {
    replicas: Vec<M>,
    batch_capacity: usize,
}

impl<M: ReplicaModel> ReplicatedService<M> {
    /// Creates a service over the given replicas.
    ///
    /// # Errors
    /// `ShapeMismatch` if there are no replicas or the batch capacity is
    /// not evenly divisible by the replica count.
    pub fn new(replicas: Vec<M>, batch_capacity: usize) -> Result<Self, ServiceError> {
        if replicas.is_empty() {
            return Err(ServiceError::shape("replica count", 1, 0));
        }
        if batch_capacity == 0 {
            return Err(ServiceError::shape("batch capacity", replicas.len(), 0));
        }
        if batch_capacity % replicas.len() != 0 {
            return Err(ServiceError::shape(
                "batch capacity remainder per replica",
                0,
                batch_capacity % replicas.len(),
            ));
        }
        Ok(Self {
            replicas,
            batch_capacity,
        })
    }

    /// Rows served by each replica.
    pub fn rows_per_replica(&self) -> usize {
        self.batch_capacity / self.replicas.len()
    }

    fn run_replica(
        replica_idx: usize,
        replica: &M,
        request: &PredictionRequest<'_>,
        rows: usize,
    ) -> Result<Vec<PredictedRollout>, ServiceError> {
        let out = replica.predict_rows(request)?;
        if out.len() != rows {
            return Err(ServiceError::ReplicaFailed {
                replica: replica_idx,
                reason: format!("returned {} rollouts for {} rows", out.len(), rows),
            });
        }
        Ok(out)
    }
}

impl<M: ReplicaModel> PredictionService for ReplicatedService<M> {
    fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    fn predict(&self, request: &PredictionRequest<'_>) -> Result<Vec<PredictedRollout>, ServiceError> {
        if request.actions.len() != self.batch_capacity {
            return Err(ServiceError::shape(
                "action batch",
                self.batch_capacity,
                request.actions.len(),
            ));
        }

        let rows = self.rows_per_replica();

        if self.replicas.len() == 1 {
            return Self::run_replica(0, &self.replicas[0], request, rows);
        }

        let results: Vec<Result<Vec<PredictedRollout>, ServiceError>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .replicas
                .iter()
                .enumerate()
                .map(|(g, replica)| {
                    let sub = request.slice(g * rows, rows);
                    scope.spawn(move || Self::run_replica(g, replica, &sub, rows))
                })
                .collect();

            // Join in replica order; this is what restores intra-batch order.
            handles
                .into_iter()
                .enumerate()
                .map(|(g, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ServiceError::ReplicaFailed {
                            replica: g,
                            reason: "replica thread panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        let mut combined = Vec::with_capacity(self.batch_capacity);
        for (g, result) in results.into_iter().enumerate() {
            let part = result?;
            tracing::trace!(replica = g, rows = part.len(), "replica finished");
            combined.extend(part);
        }
        Ok(combined)
    }
}
