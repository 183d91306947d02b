//! Diagnostics hand-off contract.

use crate::error::SinkError;
use crate::types::{ActionSequence, Frame, PixelCoord, PredictedRollout, ScoreTrace};
use serde::{Deserialize, Serialize};

/// Everything a diagnostics renderer receives for one planning step.
///
/// The planner fills this on its final CEM iteration and hands ownership to
/// the visualization worker; it never reads it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticPayload {
    /// Control step within the episode
    pub step: usize,

    /// CEM iteration that produced the payload
    pub iteration: usize,

    /// Population index of the selected candidate
    pub chosen_index: usize,

    /// Aggregate cost of every candidate, in population order
    pub scores: Vec<f64>,

    /// Per-timestep, per-(camera, task) scores of the selected candidate
    pub score_trace: ScoreTrace,

    /// Candidate action sequences, in population order
    pub actions: Vec<ActionSequence>,

    /// Predicted frames and distributions, in population order
    pub rollouts: Vec<PredictedRollout>,

    /// `[context][camera]` real frames the prediction started from
    pub context_frames: Vec<Vec<Frame>>,

    /// Designated pixels, camera-major
    pub designated_pixels: Vec<PixelCoord>,

    /// Goal pixels, camera-major
    pub goal_pixels: Vec<PixelCoord>,
}

impl DiagnosticPayload {
    /// Cost of the selected candidate.
    pub fn chosen_cost(&self) -> f64 {
        self.scores[self.chosen_index]
    }
}

/// Renders or saves diagnostic payloads.
///
/// Runs on the visualization worker thread. Failures are reported through
/// the returned error and are never surfaced to the planner.
pub trait DiagnosticsSink: Send + 'static {
    /// Renders a single payload.
    fn render(&mut self, payload: &DiagnosticPayload) -> Result<(), SinkError>;

    /// Returns the name of this sink (for logging).
    fn name(&self) -> &str;
}
