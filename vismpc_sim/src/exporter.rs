//! JSON exporter for episode replays.
//!
//! Exports every executed control step as JSON so an episode can be
//! inspected or plotted offline.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;
use vismpc_core::{PlanOutcome, SubmitOutcome};
use vismpc_env::{Observation, PixelCoord};

use crate::agent::SimulatedRobot;

/// One executed control step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Rollout attempt this step belongs to (1-based)
    pub attempt: usize,
    pub step: usize,

    /// Action actually executed
    pub first_action: Vec<f64>,

    /// Lowest cost of each CEM iteration
    pub best_cost_per_iteration: Vec<f64>,

    /// Tracked pixels after the action, camera-major
    pub object_pixels: Vec<PixelCoord>,
    pub goal_pixels: Vec<PixelCoord>,
    pub distance_to_goal: f64,

    /// Hand-off result of this step's diagnostic payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<String>,
}

impl StepRecord {
    pub fn new(
        attempt: usize,
        observation: &Observation,
        outcome: &PlanOutcome,
        robot: &SimulatedRobot,
    ) -> Self {
        Self {
            attempt,
            step: observation.step,
            first_action: outcome.actions.first_action().iter().copied().collect(),
            best_cost_per_iteration: outcome.diagnostics.best_cost_per_iteration.clone(),
            object_pixels: robot.object_pixels().to_vec(),
            goal_pixels: robot.goal_pixels().to_vec(),
            distance_to_goal: robot.distance_to_goal(),
            visualization: outcome.diagnostics.visualization.map(|v| {
                match v {
                    SubmitOutcome::Queued => "queued",
                    SubmitOutcome::QueuedAfterEviction => "queued_after_eviction",
                    SubmitOutcome::Dropped => "dropped",
                }
                .to_string()
            }),
        }
    }
}

/// Complete episode export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Unique id of this run
    pub run_id: Uuid,

    /// Rollout attempts used
    pub tries: usize,

    /// All executed steps, across attempts
    pub steps: Vec<StepRecord>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_distance: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl EpisodeExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            run_id: Uuid::new_v4(),
            tries: 0,
            steps: Vec::new(),
            passed: false,
            final_distance: None,
            failure_reason: None,
        }
    }

    /// Adds a step.
    pub fn record(&mut self, record: StepRecord) {
        self.tries = self.tries.max(record.attempt);
        self.steps.push(record);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, final_distance: Option<f64>, failure_reason: Option<String>) {
        self.passed = passed;
        self.final_distance = final_distance;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(attempt: usize, step: usize) -> StepRecord {
        StepRecord {
            attempt,
            step,
            first_action: vec![0.1, 0.0, 0.0, 0.0],
            best_cost_per_iteration: vec![3.0, 2.5],
            object_pixels: vec![PixelCoord::new(1.0, 2.0)],
            goal_pixels: vec![PixelCoord::new(5.0, 5.0)],
            distance_to_goal: 5.0,
            visualization: None,
        }
    }

    #[test]
    fn test_record_tracks_attempts() {
        let mut export = EpisodeExport::new("reach", 7);
        export.record(record(1, 0));
        export.record(record(2, 0));
        export.record(record(2, 1));

        assert_eq!(export.tries, 2);
        assert_eq!(export.steps.len(), 3);
    }

    #[test]
    fn test_write_and_read_back() {
        let mut export = EpisodeExport::new("reach", 7);
        export.record(record(1, 0));
        export.finalize(true, Some(1.5), None);

        let path = std::env::temp_dir().join(format!("vismpc_export_{}.json", export.run_id));
        export.write_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let back: EpisodeExport = serde_json::from_str(&text).unwrap();
        assert_eq!(back.run_id, export.run_id);
        assert!(back.passed);
        assert_eq!(back.final_distance, Some(1.5));
        assert!(!text.contains("failure_reason"));
    }
}
