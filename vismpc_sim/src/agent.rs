//! Simulated robot and the agent loop that drives it.
//!
//! - `SimulatedRobot` owns the true scene: where every tracked point is in
//!   every camera, the integrated end-effector state, and the recent frames
//!   it reports as context.
//! - `SimulatedAgent` runs an episode: observe, plan, execute the first
//!   action, repeat. A kinematically infeasible action aborts the rollout
//!   and the agent retries the whole rollout, up to `max_tries` times.

use std::collections::VecDeque;

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vismpc_core::CemPlanner;
use vismpc_env::{ContextInput, Frame, Observation, PixelCoord};

use crate::error::{RobotError, SimError};
use crate::exporter::{EpisodeExport, StepRecord};
use crate::oracle::{clamp_to_image, draw_point, pixel_motion, MAX_TASKS};

/// Scene layout and kinematic limits of the simulated robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    pub num_cameras: usize,
    pub num_tasks: usize,
    pub height: usize,
    pub width: usize,
    pub context_length: usize,
    pub action_dim: usize,
    pub pixels_per_unit: f64,
    /// Reachable half-extent of the integrated state, per action dimension
    pub workspace: Vec<f64>,
    /// Probability that a single action has no IK solution
    pub ik_failure_rate: f64,
    /// Initial tracked pixel per (camera, task), camera-major
    pub start_pixels: Vec<PixelCoord>,
    /// Goal pixel per (camera, task), camera-major
    pub goal_pixels: Vec<PixelCoord>,
}

/// The simulated robot and its scene.
pub struct SimulatedRobot {
    config: RobotConfig,
    rng: ChaCha8Rng,
    pixels: Vec<PixelCoord>,
    state: DVector<f64>,
    history: VecDeque<(Vec<Frame>, DVector<f64>)>,
    step: usize,
}

impl SimulatedRobot {
    pub fn new(config: RobotConfig, seed: u64) -> Result<Self, SimError> {
        let pairs = config.num_cameras * config.num_tasks;
        if config.start_pixels.len() != pairs || config.goal_pixels.len() != pairs {
            return Err(SimError::Setup(format!(
                "robot needs {} start and goal pixels, got {} and {}",
                pairs,
                config.start_pixels.len(),
                config.goal_pixels.len()
            )));
        }
        if config.num_tasks > MAX_TASKS {
            return Err(SimError::Setup(format!(
                "at most {} tasks can be rendered, got {}",
                MAX_TASKS, config.num_tasks
            )));
        }
        if config.workspace.len() != config.action_dim {
            return Err(SimError::Setup(format!(
                "workspace has {} extents for {} action dimensions",
                config.workspace.len(),
                config.action_dim
            )));
        }

        let mut robot = Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            pixels: config.start_pixels.clone(),
            state: DVector::zeros(config.action_dim),
            history: VecDeque::with_capacity(config.context_length),
            step: 0,
            config,
        };
        robot.reset();
        Ok(robot)
    }

    /// Puts the scene back at its initial layout.
    ///
    /// The IK failure stream is not reseeded, so a retried rollout sees
    /// fresh failures.
    pub fn reset(&mut self) {
        self.pixels = self.config.start_pixels.clone();
        self.state = DVector::zeros(self.config.action_dim);
        self.step = 0;
        self.history.clear();
        let frames = self.render();
        for _ in 0..self.config.context_length {
            self.history.push_back((frames.clone(), self.state.clone()));
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn object_pixels(&self) -> &[PixelCoord] {
        &self.pixels
    }

    pub fn goal_pixels(&self) -> &[PixelCoord] {
        &self.config.goal_pixels
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.state
    }

    /// Mean pixel distance between tracked points and their goals.
    pub fn distance_to_goal(&self) -> f64 {
        let n = self.pixels.len().max(1) as f64;
        self.pixels
            .iter()
            .zip(&self.config.goal_pixels)
            .map(|(p, g)| p.distance(g))
            .sum::<f64>()
            / n
    }

    /// The observation handed to the planner for the current step.
    pub fn observe(&self) -> Observation {
        let (frames, states) = self.history.iter().cloned().unzip();
        Observation {
            step: self.step,
            context: ContextInput { frames, states },
            designated_pixels: self.pixels.clone(),
            goal_pixels: self.config.goal_pixels.clone(),
        }
    }

    /// Executes one action. On error the scene is left unchanged.
    pub fn execute(&mut self, action: &DVector<f64>) -> Result<(), RobotError> {
        if action.len() != self.config.action_dim {
            return Err(RobotError::ActionShape {
                expected: self.config.action_dim,
                actual: action.len(),
            });
        }

        let next = &self.state + action;
        if let Some(dim) = (0..next.len()).find(|&d| next[d].abs() > self.config.workspace[d]) {
            return Err(RobotError::OutOfWorkspace { step: self.step, dim });
        }
        if self.config.ik_failure_rate > 0.0 && self.rng.gen::<f64>() < self.config.ik_failure_rate {
            return Err(RobotError::NoIkSolution { step: self.step });
        }

        let cfg = &self.config;
        for cam in 0..cfg.num_cameras {
            let (drow, dcol) = pixel_motion(cam, action, cfg.pixels_per_unit);
            for task in 0..cfg.num_tasks {
                let p = &mut self.pixels[cam * cfg.num_tasks + task];
                *p = clamp_to_image(PixelCoord::new(p.row + drow, p.col + dcol), cfg.height, cfg.width);
            }
        }
        self.state = next;
        self.step += 1;

        let frames = self.render();
        self.history.push_back((frames, self.state.clone()));
        while self.history.len() > self.config.context_length {
            self.history.pop_front();
        }
        Ok(())
    }

    fn render(&self) -> Vec<Frame> {
        let cfg = &self.config;
        (0..cfg.num_cameras)
            .map(|cam| {
                let mut frame = Frame::blank(cfg.height, cfg.width);
                for task in 0..cfg.num_tasks {
                    draw_point(&mut frame, task, self.pixels[cam * cfg.num_tasks + task]);
                }
                frame
            })
            .collect()
    }
}

/// How an episode ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    /// Rollout attempts used (1 = no retry)
    pub tries: usize,
    pub steps: usize,
    pub initial_distance: f64,
    pub final_distance: f64,
}

/// Runs the planner against a [`SimulatedRobot`].
pub struct SimulatedAgent {
    planner: CemPlanner,
    max_tries: usize,
}

impl SimulatedAgent {
    pub fn new(planner: CemPlanner, max_tries: usize) -> Self {
        Self {
            planner,
            max_tries: max_tries.max(1),
        }
    }

    pub fn planner(&self) -> &CemPlanner {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut CemPlanner {
        &mut self.planner
    }

    /// Runs one episode of `steps` control steps, retrying infeasible
    /// rollouts from scratch.
    ///
    /// Planning errors end the episode immediately; they are never retried.
    pub fn run_episode(
        &mut self,
        robot: &mut SimulatedRobot,
        steps: usize,
        export: &mut EpisodeExport,
    ) -> Result<EpisodeSummary, SimError> {
        for attempt in 1..=self.max_tries {
            robot.reset();
            self.planner.reset();
            let initial_distance = robot.distance_to_goal();

            match self.run_rollout(robot, steps, attempt, export) {
                Ok(()) => {
                    info!(
                        attempt,
                        final_distance = robot.distance_to_goal(),
                        "episode complete"
                    );
                    return Ok(EpisodeSummary {
                        tries: attempt,
                        steps,
                        initial_distance,
                        final_distance: robot.distance_to_goal(),
                    });
                }
                Err(SimError::Robot(e)) if e.is_infeasible() => {
                    warn!(attempt, max_tries = self.max_tries, error = %e, "rollout infeasible, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(SimError::RetriesExhausted {
            tries: self.max_tries,
        })
    }

    fn run_rollout(
        &mut self,
        robot: &mut SimulatedRobot,
        steps: usize,
        attempt: usize,
        export: &mut EpisodeExport,
    ) -> Result<(), SimError> {
        for _ in 0..steps {
            let observation = robot.observe();
            let outcome = self.planner.plan(&observation)?;
            let action = outcome.actions.first_action();
            robot.execute(&action)?;

            debug!(
                step = observation.step,
                distance = robot.distance_to_goal(),
                "action executed"
            );
            export.record(StepRecord::new(attempt, &observation, &outcome, robot));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::sync::Arc;
    use vismpc_core::PlannerConfig;
    use vismpc_env::ReplicatedService;

    use crate::oracle::{SyntheticTracker, TrackerConfig};

    fn robot_config() -> RobotConfig {
        RobotConfig {
            num_cameras: 2,
            num_tasks: 1,
            height: 24,
            width: 24,
            context_length: 2,
            action_dim: 4,
            pixels_per_unit: 10.0,
            workspace: vec![1.0; 4],
            ik_failure_rate: 0.0,
            start_pixels: vec![PixelCoord::new(12.0, 12.0); 2],
            goal_pixels: vec![PixelCoord::new(20.0, 20.0), PixelCoord::new(20.0, 4.0)],
        }
    }

    fn agent(max_tries: usize) -> SimulatedAgent {
        let config = PlannerConfig {
            iterations: 2,
            num_samples: 40,
            batch_capacity: 20,
            num_replicas: 2,
            num_cameras: 2,
            horizon: 3,
            image_height: 24,
            image_width: 24,
            seed: Some(3),
            ..Default::default()
        };
        let tracker = TrackerConfig {
            num_cameras: 2,
            height: 24,
            width: 24,
            horizon: 3,
            pixels_per_unit: 10.0,
            ..Default::default()
        };
        let service = ReplicatedService::new(vec![SyntheticTracker::new(tracker); 2], 20).unwrap();
        SimulatedAgent::new(CemPlanner::new(config, Arc::new(service)).unwrap(), max_tries)
    }

    #[test]
    fn test_execute_moves_points_per_camera() {
        let mut robot = SimulatedRobot::new(robot_config(), 0).unwrap();
        robot
            .execute(&DVector::from_vec(vec![0.1, 0.2, 0.0, 0.0]))
            .unwrap();

        assert_eq!(robot.object_pixels()[0], PixelCoord::new(13.0, 14.0));
        assert_eq!(robot.object_pixels()[1], PixelCoord::new(13.0, 10.0));
        assert_eq!(robot.step(), 1);
        assert_relative_eq!(robot.state()[1], 0.2);
    }

    #[test]
    fn test_observation_carries_context_window() {
        let mut robot = SimulatedRobot::new(robot_config(), 0).unwrap();
        robot.execute(&DVector::from_vec(vec![0.3, 0.0, 0.0, 0.0])).unwrap();

        let obs = robot.observe();
        assert_eq!(obs.context.context_length(), 2);
        assert_eq!(obs.context.frames[1].len(), 2);
        assert_relative_eq!(obs.designated_pixels[0].row, 15.0, epsilon = 1e-9);
        assert_relative_eq!(obs.context.states[1][0], 0.3);
        assert_relative_eq!(obs.context.frames[1][0].get(15, 12, 0), 1.0);
    }

    #[test]
    fn test_workspace_violation_leaves_scene_untouched() {
        let mut robot = SimulatedRobot::new(robot_config(), 0).unwrap();
        let err = robot
            .execute(&DVector::from_vec(vec![0.0, 0.0, 1.5, 0.0]))
            .unwrap_err();

        assert!(matches!(err, RobotError::OutOfWorkspace { step: 0, dim: 2 }));
        assert!(err.is_infeasible());
        assert_eq!(robot.step(), 0);
        assert_eq!(robot.object_pixels()[0], PixelCoord::new(12.0, 12.0));
    }

    proptest! {
        #[test]
        fn prop_points_stay_inside_image(
            moves in prop::collection::vec((-0.4f64..0.4, -0.4f64..0.4), 1..30)
        ) {
            let mut config = robot_config();
            config.workspace = vec![100.0; 4];
            let mut robot = SimulatedRobot::new(config, 0).unwrap();
            for (dr, dc) in moves {
                robot.execute(&DVector::from_vec(vec![dr, dc, 0.0, 0.0])).unwrap();
                for p in robot.object_pixels() {
                    prop_assert!(p.row >= 0.0 && p.row <= 23.0);
                    prop_assert!(p.col >= 0.0 && p.col <= 23.0);
                }
            }
        }
    }

    #[test]
    fn test_wrong_pixel_count_rejected() {
        let mut config = robot_config();
        config.goal_pixels.pop();
        assert!(matches!(SimulatedRobot::new(config, 0), Err(SimError::Setup(_))));
    }

    #[test]
    fn test_episode_reduces_distance() {
        let mut robot = SimulatedRobot::new(robot_config(), 1).unwrap();
        let mut agent = agent(1);
        let mut export = EpisodeExport::new("test", 3);

        let summary = agent.run_episode(&mut robot, 4, &mut export).unwrap();

        assert_eq!(summary.tries, 1);
        assert!(summary.final_distance < summary.initial_distance);
        assert_eq!(export.steps.len(), 4);
    }

    #[test]
    fn test_infeasible_rollouts_exhaust_retries() {
        let mut config = robot_config();
        config.ik_failure_rate = 1.0;
        let mut robot = SimulatedRobot::new(config, 1).unwrap();
        let mut agent = agent(3);
        let mut export = EpisodeExport::new("test", 3);

        let err = agent.run_episode(&mut robot, 4, &mut export).unwrap_err();

        assert!(matches!(err, SimError::RetriesExhausted { tries: 3 }));
        assert!(export.steps.is_empty());
    }
}
