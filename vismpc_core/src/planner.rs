//! CEM Planner
//! ===========
//!
//! One control step is a fixed budget of CEM iterations:
//!
//! ```text
//! INIT ─► SAMPLE ─► DISPATCH ─► SCORE ─► REFIT ─┬─► SAMPLE   (iteration < N-1)
//!                                                └─► SELECT ─► DONE
//! ```
//!
//! The loop never stops early on convergence; a step either finishes all
//! `iterations` and returns the lowest-cost candidate of the last one, or
//! fails and returns no action at all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use vismpc_env::{
    ActionSequence, DiagnosticPayload, DiagnosticsSink, Observation, PredictionService, ScoreTrace,
    SinkError, TaskMaps,
};

use crate::config::PlannerConfig;
use crate::cost::CostEvaluator;
use crate::dispatch::{DispatchError, SampleBatchDispatcher};
use crate::distance_grid::DistanceGrids;
use crate::error::{ConfigError, PlanError, ScoreError};
use crate::offload::{OffloadStats, SubmitOutcome, VisualizationOffload};
use crate::propagation::DistributionPropagator;
use crate::sampling::SamplingDistribution;

/// Wall-clock time spent in each stage of one CEM iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationTiming {
    pub iteration: usize,
    pub population: usize,
    pub sample: Duration,
    pub dispatch: Duration,
    pub score: Duration,
    pub refit: Duration,
}

/// Everything a control step reports besides the chosen actions.
#[derive(Debug, Clone, Serialize)]
pub struct PlanDiagnostics {
    /// Population index of the selected candidate in the final iteration
    pub chosen_index: usize,
    /// Lowest cost of each iteration, in iteration order
    pub best_cost_per_iteration: Vec<f64>,
    /// Per-timestep, per-(camera, task) scores of the selected candidate
    pub score_trace: ScoreTrace,
    /// Sampling distribution after the final refit
    pub posterior: SamplingDistribution,
    pub timings: Vec<IterationTiming>,
    /// Hand-off result of this step's diagnostic payload, if one was sent
    pub visualization: Option<SubmitOutcome>,
}

impl PlanDiagnostics {
    /// Cost of the selected candidate.
    pub fn chosen_cost(&self) -> f64 {
        self.best_cost_per_iteration
            .last()
            .copied()
            .unwrap_or(f64::INFINITY)
    }
}

/// Result of a successful control step.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub actions: ActionSequence,
    pub diagnostics: PlanDiagnostics,
}

/// Sampling-based visual MPC planner.
///
/// Owns its sampling distribution, recurrent pixel distribution and
/// visualization worker. The prediction service is shared and read-only.
pub struct CemPlanner {
    config: PlannerConfig,
    service: Arc<dyn PredictionService>,
    rng: ChaCha8Rng,
    evaluator: CostEvaluator,
    propagator: DistributionPropagator,
    offload: Option<VisualizationOffload>,
    posterior: Option<SamplingDistribution>,
    group_of_dim: Vec<usize>,
}

impl CemPlanner {
    /// Validates `config` and checks it against the service's capabilities.
    ///
    /// Every configuration error surfaces here, before anything is sampled.
    pub fn new(config: PlannerConfig, service: Arc<dyn PredictionService>) -> Result<Self, ConfigError> {
        config.validate()?;

        if service.batch_capacity() != config.batch_capacity {
            return Err(ConfigError::ServiceMismatch {
                what: "batch capacity",
                service: service.batch_capacity(),
                config: config.batch_capacity,
            });
        }
        if service.replica_count() != config.num_replicas {
            return Err(ConfigError::ServiceMismatch {
                what: "replica count",
                service: service.replica_count(),
                config: config.num_replicas,
            });
        }

        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let propagator = DistributionPropagator::new(&config)?;

        tracing::info!(
            iterations = config.iterations,
            num_samples = config.num_samples,
            batch_capacity = config.batch_capacity,
            replicas = config.num_replicas,
            mode = ?propagator.mode(),
            "CEM planner ready"
        );

        Ok(Self {
            evaluator: CostEvaluator::from_config(&config),
            group_of_dim: config.group_of_dim(),
            config,
            service,
            rng,
            propagator,
            offload: None,
            posterior: None,
        })
    }

    /// Starts a background worker that renders diagnostics into `sink`.
    ///
    /// Payloads are only produced when `verbose` is set.
    pub fn with_diagnostics(mut self, sink: Box<dyn DiagnosticsSink>) -> Result<Self, SinkError> {
        let offload = VisualizationOffload::start(sink, self.config.visualization_queue, self.config.overflow)?;
        self.offload = Some(offload);
        Ok(self)
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn propagator(&self) -> &DistributionPropagator {
        &self.propagator
    }

    /// Posterior of the last successful step, used for warm starts.
    pub fn posterior(&self) -> Option<&SamplingDistribution> {
        self.posterior.as_ref()
    }

    /// Counters of the visualization worker, if one is running.
    pub fn diagnostics_stats(&self) -> Option<OffloadStats> {
        self.offload.as_ref().map(|o| o.stats())
    }

    /// Stops the visualization worker after it drains its queue.
    pub fn shutdown_diagnostics(&mut self) -> Option<OffloadStats> {
        self.offload.take().map(|mut o| o.shutdown())
    }

    /// Starts a new episode.
    pub fn reset(&mut self) {
        self.posterior = None;
        self.propagator.reset();
        tracing::debug!("planner reset");
    }

    /// Plans one control step, warm-starting from the previous step's
    /// posterior when enabled.
    pub fn plan(&mut self, observation: &Observation) -> Result<PlanOutcome, PlanError> {
        let previous = self.posterior.clone();
        self.plan_from(observation, previous.as_ref())
    }

    /// Plans one control step from an explicit previous posterior.
    ///
    /// `previous` is only used when `warm_start` is enabled.
    pub fn plan_from(
        &mut self,
        observation: &Observation,
        previous: Option<&SamplingDistribution>,
    ) -> Result<PlanOutcome, PlanError> {
        let span = tracing::info_span!("plan", step = observation.step);
        let _enter = span.enter();

        // A failed step must not leave warm-up re-seeds behind.
        let history = self.propagator.history_len();
        let result = self.plan_step(observation, previous);
        if result.is_err() {
            self.propagator.truncate(history);
        }
        result
    }

    fn plan_step(
        &mut self,
        observation: &Observation,
        previous: Option<&SamplingDistribution>,
    ) -> Result<PlanOutcome, PlanError> {
        let step = observation.step;

        // --- INIT ---
        let context_length = observation.context.context_length();
        if context_length != self.config.context_length {
            return Err(ConfigError::ContextMismatch {
                expected: self.config.context_length,
                actual: context_length,
            }
            .into());
        }
        let grids = DistanceGrids::build(
            self.config.num_cameras,
            self.config.num_tasks,
            self.config.image_height,
            self.config.image_width,
            &observation.goal_pixels,
        )?;

        let mut distribution = match previous {
            Some(prev) if self.config.warm_start => SamplingDistribution::warm_started(prev, &self.config),
            _ => SamplingDistribution::initial(&self.config),
        };

        let service = Arc::clone(&self.service);
        let dispatcher = SampleBatchDispatcher::new(service.as_ref());
        let iterations = self.config.iterations;
        let emit_step = self.config.verbose && step % self.config.verbose_every == 0;

        let mut best_costs = Vec::with_capacity(iterations);
        let mut timings = Vec::with_capacity(iterations);
        let mut visualization = None;
        let mut selected: Option<(usize, ActionSequence, TaskMaps)> = None;

        for iteration in 0..iterations {
            let _iter = tracing::debug_span!("cem_iteration", iteration).entered();
            let last = iteration + 1 == iterations;
            let population_size = self.config.samples_at(iteration);

            // --- SAMPLE ---
            let t0 = Instant::now();
            let population = distribution
                .sample(
                    &mut self.rng,
                    population_size,
                    &self.config.action_low,
                    &self.config.action_high,
                    self.config.min_variance,
                )
                .map_err(|source| PlanError::Sampling { iteration, source })?;
            let sample_time = t0.elapsed();

            // --- DISPATCH ---
            let t0 = Instant::now();
            let recurrent = self.propagator.input(&observation.designated_pixels)?;
            let rollouts = dispatcher
                .dispatch(&population, &observation.context, Some(&recurrent))
                .map_err(|e| match e {
                    DispatchError::Indivisible {
                        population,
                        batch_capacity,
                    } => PlanError::Config(ConfigError::PopulationNotDivisible {
                        population,
                        batch_capacity,
                    }),
                    DispatchError::Service { chunk, source } => PlanError::Dispatch {
                        iteration,
                        chunk,
                        source,
                    },
                })?;
            let dispatch_time = t0.elapsed();

            // --- SCORE ---
            let t0 = Instant::now();
            let costs = self
                .evaluator
                .score(&population, &rollouts, &grids)
                .map_err(|source| PlanError::Scoring { iteration, source })?;
            let ranking = costs.ranking();
            let best = *ranking.first().ok_or(PlanError::Scoring {
                iteration,
                source: ScoreError::EmptyPopulation,
            })?;
            best_costs.push(costs.get(best));
            let score_time = t0.elapsed();

            tracing::debug!(
                population = population_size,
                best,
                best_cost = costs.get(best),
                "iteration scored"
            );

            if last {
                let terminal = rollouts[best].terminal_distribution().ok_or(PlanError::Scoring {
                    iteration,
                    source: ScoreError::MissingDistributions { index: best },
                })?;
                selected = Some((best, population[best].clone(), terminal.clone()));
            }

            // --- REFIT ---
            let t0 = Instant::now();
            let elite_count = self.config.elite_count(population_size);
            let elites: Vec<&ActionSequence> = ranking[..elite_count].iter().map(|&i| &population[i]).collect();
            distribution.refit(
                &elites,
                self.config.covariance,
                &self.group_of_dim,
                self.config.min_variance,
            );
            let refit_time = t0.elapsed();

            tracing::debug!(
                sample_us = sample_time.as_micros() as u64,
                dispatch_us = dispatch_time.as_micros() as u64,
                score_us = score_time.as_micros() as u64,
                refit_us = refit_time.as_micros() as u64,
                elites = elite_count,
                "iteration timings"
            );
            timings.push(IterationTiming {
                iteration,
                population: population_size,
                sample: sample_time,
                dispatch: dispatch_time,
                score: score_time,
                refit: refit_time,
            });

            if emit_step && (last || self.config.verbose_every_iteration) {
                if let Some(offload) = &self.offload {
                    let payload = DiagnosticPayload {
                        step,
                        iteration,
                        chosen_index: best,
                        scores: costs.into_inner(),
                        score_trace: self.best_trace(),
                        actions: population,
                        rollouts,
                        context_frames: observation.context.frames.clone(),
                        designated_pixels: observation.designated_pixels.clone(),
                        goal_pixels: observation.goal_pixels.clone(),
                    };
                    visualization = Some(offload.submit(payload));
                }
            }
        }

        // --- SELECT ---
        let (chosen_index, actions, terminal) = selected.ok_or(PlanError::Scoring {
            iteration: iterations.saturating_sub(1),
            source: ScoreError::EmptyPopulation,
        })?;
        self.propagator.record_selected(&terminal);
        let diagnostics = PlanDiagnostics {
            chosen_index,
            best_cost_per_iteration: best_costs,
            score_trace: self.best_trace(),
            posterior: distribution.clone(),
            timings,
            visualization,
        };
        self.posterior = Some(distribution);

        tracing::info!(
            chosen = chosen_index,
            cost = diagnostics.chosen_cost(),
            "control step planned"
        );

        Ok(PlanOutcome {
            actions,
            diagnostics,
        })
    }

    fn best_trace(&self) -> ScoreTrace {
        self.evaluator.best_trace().cloned().unwrap_or_else(|| {
            ScoreTrace::zeros(self.config.num_cameras, self.config.num_tasks, self.config.horizon)
        })
    }
}
