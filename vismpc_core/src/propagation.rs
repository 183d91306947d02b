//! Recurrent pixel-distribution input.
//!
//! The prediction model takes a per-task pixel map for every context step,
//! telling it where the tracked point currently is. That input comes from
//! one of two mutually exclusive sources:
//!
//! - **Re-seed**: a one-hot map at the designated pixel, rebuilt on every
//!   CEM iteration and repeated over the context window.
//! - **Propagate**: the model's own terminal prediction for the selected
//!   candidate, carried over from previous control steps. Until a full
//!   window has been accumulated the propagator falls back to re-seeding.

use std::collections::VecDeque;

use vismpc_env::{PixelCoord, TaskMaps};

use crate::config::PlannerConfig;
use crate::error::ConfigError;

/// Where the recurrent pixel distribution comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionMode {
    Reseed,
    Propagate,
}

impl DistributionMode {
    /// Resolves the mode from the two configuration toggles.
    pub fn from_config(config: &PlannerConfig) -> Result<Self, ConfigError> {
        match (config.reseed_designated_pixels, config.predictor_propagation) {
            (true, false) => Ok(Self::Reseed),
            (false, true) => Ok(Self::Propagate),
            (true, true) => Err(ConfigError::ConflictingDistributionModes),
            (false, false) => Err(ConfigError::NoDistributionMode),
        }
    }
}

/// Owns the recurrent distribution window of one planner.
#[derive(Debug, Clone)]
pub struct DistributionPropagator {
    mode: DistributionMode,
    context_length: usize,
    num_cameras: usize,
    num_tasks: usize,
    height: usize,
    width: usize,
    history: VecDeque<TaskMaps>,
}

impl DistributionPropagator {
    pub fn new(config: &PlannerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            mode: DistributionMode::from_config(config)?,
            context_length: config.context_length,
            num_cameras: config.num_cameras,
            num_tasks: config.num_tasks,
            height: config.image_height,
            width: config.image_width,
            history: VecDeque::with_capacity(config.context_length + 1),
        })
    }

    pub fn mode(&self) -> DistributionMode {
        self.mode
    }

    /// Number of accumulated maps (always zero in re-seed mode).
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// True once a full context window of real maps is available.
    pub fn is_warm(&self) -> bool {
        self.mode == DistributionMode::Propagate && self.history.len() >= self.context_length
    }

    /// Clears the window. Called at the start of every episode.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Drops every map pushed after the window held `len` maps.
    pub fn truncate(&mut self, len: usize) {
        self.history.truncate(len);
    }

    /// The distribution window (one [`TaskMaps`] per context step) to feed
    /// the model on this CEM iteration.
    pub fn input(&mut self, designated_pixels: &[PixelCoord]) -> Result<Vec<TaskMaps>, ConfigError> {
        if self.is_warm() {
            let skip = self.history.len() - self.context_length;
            return Ok(self.history.iter().skip(skip).cloned().collect());
        }

        let seed = self.seed_map(designated_pixels)?;
        if self.mode == DistributionMode::Propagate {
            self.history.push_back(seed.clone());
            tracing::debug!(
                accumulated = self.history.len(),
                context_length = self.context_length,
                "propagator warming up, re-seeding"
            );
        }
        Ok(vec![seed; self.context_length])
    }

    /// Appends the selected candidate's terminal prediction.
    ///
    /// Ignored in re-seed mode and while the window is still warming up.
    pub fn record_selected(&mut self, terminal: &TaskMaps) {
        if !self.is_warm() {
            return;
        }
        self.history.push_back(terminal.clone());
        while self.history.len() > self.context_length {
            self.history.pop_front();
        }
    }

    fn seed_map(&self, designated_pixels: &[PixelCoord]) -> Result<TaskMaps, ConfigError> {
        let expected = self.num_cameras * self.num_tasks;
        if designated_pixels.len() != expected {
            return Err(ConfigError::TaskCountMismatch {
                what: "designated pixels",
                expected,
                actual: designated_pixels.len(),
            });
        }
        Ok(TaskMaps::one_hot(
            self.num_cameras,
            self.num_tasks,
            self.height,
            self.width,
            designated_pixels,
        ))
    }
}
