//! Sample batch dispatch.
//!
//! Splits a candidate population into contiguous chunks of exactly the
//! service's batch capacity, runs one synchronous prediction per chunk, and
//! concatenates the results. Index `i` of the output always belongs to
//! index `i` of the population; cost ranking and elite selection rely on it.

use thiserror::Error;
use vismpc_env::{
    ActionSequence, ContextInput, PredictedRollout, PredictionRequest, PredictionService,
    ServiceError, TaskMaps,
};

/// Why a dispatch failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The population cannot be tiled by full batches.
    #[error("population {population} is not a multiple of batch capacity {batch_capacity}")]
    Indivisible { population: usize, batch_capacity: usize },

    /// The prediction service failed on one chunk.
    #[error("chunk {chunk}: {source}")]
    Service {
        chunk: usize,
        #[source]
        source: ServiceError,
    },
}

/// Drives a [`PredictionService`] over a whole candidate population.
pub struct SampleBatchDispatcher<'s> {
    service: &'s dyn PredictionService,
}

impl<'s> SampleBatchDispatcher<'s> {
    pub fn new(service: &'s dyn PredictionService) -> Self {
        Self { service }
    }

    /// Number of chunks a population of `population` candidates needs.
    pub fn chunk_count(&self, population: usize) -> Result<usize, DispatchError> {
        let batch_capacity = self.service.batch_capacity();
        if population == 0 || batch_capacity == 0 || population % batch_capacity != 0 {
            return Err(DispatchError::Indivisible {
                population,
                batch_capacity,
            });
        }
        Ok(population / batch_capacity)
    }

    /// Predicts a rollout for every candidate, in population order.
    ///
    /// The context and the optional recurrent pixel distribution are shared
    /// by every candidate; only the action sequence varies per row.
    pub fn dispatch(
        &self,
        population: &[ActionSequence],
        context: &ContextInput,
        pixel_distribution: Option<&[TaskMaps]>,
    ) -> Result<Vec<PredictedRollout>, DispatchError> {
        let chunks = self.chunk_count(population.len())?;
        let batch_capacity = self.service.batch_capacity();
        let mut rollouts = Vec::with_capacity(population.len());

        for (chunk, actions) in population.chunks_exact(batch_capacity).enumerate() {
            let request = PredictionRequest {
                context,
                actions,
                pixel_distribution,
            };
            let out = self
                .service
                .predict(&request)
                .map_err(|source| DispatchError::Service { chunk, source })?;

            if out.len() != batch_capacity {
                return Err(DispatchError::Service {
                    chunk,
                    source: ServiceError::shape("predicted rollouts", batch_capacity, out.len()),
                });
            }
            tracing::trace!(chunk, chunks, "chunk predicted");
            rollouts.extend(out);
        }

        Ok(rollouts)
    }
}
