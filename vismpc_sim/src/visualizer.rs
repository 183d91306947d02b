//! Diagnostics sinks for simulation runs.
//!
//! Every sink here runs on the planner's visualization worker thread:
//!
//! - `JsonSink` writes a compact per-step summary to disk
//! - `RerunSink` streams chosen costs and predicted pixel tracks to a Rerun
//!   viewer (only with the `visualization` feature)
//! - `FaultySink` fails or panics on purpose, to show that a broken
//!   renderer never reaches the planner

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

#[cfg(feature = "visualization")]
use rerun::{Color, LineStrips2D, Points2D, Radius, RecordingStream};
use serde::Serialize;
use vismpc_env::{DiagnosticPayload, DiagnosticsSink, PixelCoord, SinkError};

use crate::oracle::centroid;

/// Predicted track of one (camera, task) pair for the chosen candidate.
#[derive(Debug, Clone, Serialize)]
pub struct PredictedTrack {
    pub camera: usize,
    pub task: usize,
    pub pixels: Vec<PixelCoord>,
}

/// Centroid of every predicted map of the chosen candidate, per pair.
pub fn predicted_tracks(payload: &DiagnosticPayload) -> Vec<PredictedTrack> {
    let Some(dists) = payload
        .rollouts
        .get(payload.chosen_index)
        .and_then(|r| r.distributions.as_ref())
    else {
        return Vec::new();
    };
    let Some(first) = dists.first() else {
        return Vec::new();
    };

    let mut tracks = Vec::new();
    for camera in 0..first.num_cameras() {
        for task in 0..first.num_tasks() {
            tracks.push(PredictedTrack {
                camera,
                task,
                pixels: dists.iter().map(|m| centroid(m.get(camera, task))).collect(),
            });
        }
    }
    tracks
}

#[derive(Debug, Serialize)]
struct StepSummary<'a> {
    step: usize,
    iteration: usize,
    chosen_index: usize,
    chosen_cost: f64,
    population: usize,
    designated_pixels: &'a [PixelCoord],
    goal_pixels: &'a [PixelCoord],
    predicted: Vec<PredictedTrack>,
    chosen_actions: Vec<f64>,
}

/// Writes `step_<n>.json` summaries into a directory.
pub struct JsonSink {
    dir: PathBuf,
}

impl JsonSink {
    /// Creates the sink, making sure `dir` exists.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, step: usize) -> PathBuf {
        self.dir.join(format!("step_{:04}.json", step))
    }
}

impl DiagnosticsSink for JsonSink {
    fn render(&mut self, payload: &DiagnosticPayload) -> Result<(), SinkError> {
        let chosen_actions = payload
            .actions
            .get(payload.chosen_index)
            .map(|a| a.to_flat().iter().copied().collect())
            .unwrap_or_default();
        let summary = StepSummary {
            step: payload.step,
            iteration: payload.iteration,
            chosen_index: payload.chosen_index,
            chosen_cost: payload.scores.get(payload.chosen_index).copied().unwrap_or(f64::INFINITY),
            population: payload.scores.len(),
            designated_pixels: &payload.designated_pixels,
            goal_pixels: &payload.goal_pixels,
            predicted: predicted_tracks(payload),
            chosen_actions,
        };

        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| SinkError::Serialization(e.to_string()))?;
        let mut file = File::create(self.path_for(payload.step))?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// Rerun sink for live visualization.
pub struct RerunSink {
    #[cfg(feature = "visualization")]
    rec: Option<RecordingStream>,

    /// Whether visualization is enabled
    enabled: bool,
}

impl RerunSink {
    /// Creates a sink with visualization disabled.
    pub fn disabled() -> Self {
        Self {
            #[cfg(feature = "visualization")]
            rec: None,
            enabled: false,
        }
    }

    /// Creates a sink with visualization enabled.
    #[cfg(feature = "visualization")]
    pub fn new(name: &str) -> Self {
        match rerun::RecordingStreamBuilder::new(name).spawn() {
            Ok(rec) => {
                tracing::info!("Rerun visualization enabled - open Rerun Viewer to see the planner");
                Self {
                    rec: Some(rec),
                    enabled: true,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to initialize Rerun: {:?}", e);
                Self::disabled()
            }
        }
    }

    /// Creates a sink - returns disabled if visualization feature not enabled.
    #[cfg(not(feature = "visualization"))]
    pub fn new(_name: &str) -> Self {
        tracing::info!("Rerun visualization not available (compile with --features visualization)");
        Self::disabled()
    }

    /// Returns whether visualization is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[cfg(feature = "visualization")]
    fn log(&self, payload: &DiagnosticPayload) -> Result<(), SinkError> {
        let Some(ref rec) = self.rec else {
            return Ok(());
        };
        rec.set_time_sequence("step", payload.step as i64);

        let cost = payload.scores.get(payload.chosen_index).copied().unwrap_or(f64::INFINITY);
        rec.log("metrics/chosen_cost", &rerun::Scalar::new(cost))
            .map_err(|e| SinkError::render(e.to_string()))?;

        let to_xy = |p: &PixelCoord| [p.col as f32, p.row as f32];
        rec.log(
            "image/goals",
            &Points2D::new(payload.goal_pixels.iter().map(to_xy))
                .with_colors([Color::from_rgb(0, 255, 0)])
                .with_radii([Radius::new_scene_units(1.5)]),
        )
        .map_err(|e| SinkError::render(e.to_string()))?;
        rec.log(
            "image/designated",
            &Points2D::new(payload.designated_pixels.iter().map(to_xy))
                .with_colors([Color::from_rgb(255, 100, 100)])
                .with_radii([Radius::new_scene_units(1.5)]),
        )
        .map_err(|e| SinkError::render(e.to_string()))?;

        for track in predicted_tracks(payload) {
            let strip: Vec<[f32; 2]> = track.pixels.iter().map(to_xy).collect();
            rec.log(
                format!("image/predicted/cam{}_task{}", track.camera, track.task),
                &LineStrips2D::new([strip]).with_colors([Color::from_rgb(100, 100, 255)]),
            )
            .map_err(|e| SinkError::render(e.to_string()))?;
        }
        Ok(())
    }

    #[cfg(not(feature = "visualization"))]
    fn log(&self, _payload: &DiagnosticPayload) -> Result<(), SinkError> {
        Ok(())
    }
}

impl DiagnosticsSink for RerunSink {
    fn render(&mut self, payload: &DiagnosticPayload) -> Result<(), SinkError> {
        self.log(payload)
    }

    fn name(&self) -> &str {
        "rerun"
    }
}

/// Deliberately broken renderer.
///
/// Step `n` panics when `n % 3 == 0`, returns an error when `n % 3 == 1`,
/// and succeeds otherwise.
#[derive(Debug, Default)]
pub struct FaultySink;

impl DiagnosticsSink for FaultySink {
    fn render(&mut self, payload: &DiagnosticPayload) -> Result<(), SinkError> {
        match payload.step % 3 {
            0 => panic!("renderer crashed on step {}", payload.step),
            1 => Err(SinkError::render(format!("renderer failed on step {}", payload.step))),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "faulty"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use vismpc_env::{ActionSequence, PredictedRollout, ScoreTrace, TaskMaps};

    fn payload(step: usize) -> DiagnosticPayload {
        let maps = vec![
            TaskMaps::one_hot(1, 1, 8, 8, &[PixelCoord::new(2.0, 3.0)]),
            TaskMaps::one_hot(1, 1, 8, 8, &[PixelCoord::new(4.0, 5.0)]),
        ];
        DiagnosticPayload {
            step,
            iteration: 2,
            chosen_index: 1,
            scores: vec![4.0, 1.5],
            score_trace: ScoreTrace::zeros(1, 1, 2),
            actions: vec![ActionSequence::new(DMatrix::zeros(2, 4)); 2],
            rollouts: vec![
                PredictedRollout {
                    frames: Vec::new(),
                    distributions: None,
                    states: Vec::new(),
                },
                PredictedRollout {
                    frames: Vec::new(),
                    distributions: Some(maps),
                    states: Vec::new(),
                },
            ],
            context_frames: Vec::new(),
            designated_pixels: vec![PixelCoord::new(1.0, 1.0)],
            goal_pixels: vec![PixelCoord::new(6.0, 6.0)],
        }
    }

    #[test]
    fn test_predicted_tracks_follow_chosen_candidate() {
        let tracks = predicted_tracks(&payload(0));
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].pixels, vec![PixelCoord::new(2.0, 3.0), PixelCoord::new(4.0, 5.0)]);
    }

    #[test]
    fn test_json_sink_writes_step_file() {
        let dir = std::env::temp_dir().join(format!("vismpc_json_sink_{}", uuid::Uuid::new_v4()));
        let mut sink = JsonSink::new(&dir).unwrap();
        sink.render(&payload(7)).unwrap();

        let text = std::fs::read_to_string(dir.join("step_0007.json")).unwrap();
        let _ = std::fs::remove_dir_all(&dir);

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["chosen_index"], 1);
        assert_eq!(value["chosen_cost"], 1.5);
        assert_eq!(value["population"], 2);
    }

    #[test]
    fn test_disabled_rerun_sink_is_a_no_op() {
        let mut sink = RerunSink::disabled();
        assert!(!sink.is_enabled());
        assert!(sink.render(&payload(0)).is_ok());
    }

    #[test]
    fn test_faulty_sink_errors_on_second_step_of_three() {
        let mut sink = FaultySink;
        assert!(sink.render(&payload(1)).is_err());
        assert!(sink.render(&payload(2)).is_ok());
    }
}
