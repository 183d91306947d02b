//! Closed-loop planning scenarios.

use vismpc_core::PlannerConfig;
use vismpc_env::PixelCoord;

use crate::agent::RobotConfig;
use crate::oracle::{PixelSource, TrackerConfig};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: single camera, single point, straight reach to the goal
    Reach,

    /// SIM-002: two cameras, two weighted points on one rigid object
    MultiTask,

    /// SIM-003: recurrent pixel distribution fed from the model's own
    /// predictions
    Propagation,

    /// SIM-004: reach while the diagnostics renderer fails and panics
    BrokenRenderer,
}

/// Everything needed to build and judge one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioSetup {
    pub planner: PlannerConfig,
    pub tracker: TrackerConfig,
    pub robot: RobotConfig,
    /// Control steps per episode
    pub steps: usize,
    /// Rollout attempts before giving up on kinematic failures
    pub max_tries: usize,
    /// Mean pixel distance to goal that counts as success
    pub success_radius: f64,
    /// Attach the deliberately broken renderer
    pub faulty_renderer: bool,
}

const HEIGHT: usize = 48;
const WIDTH: usize = 64;
const PIXELS_PER_UNIT: f64 = 40.0;

fn base_planner(seed: u64) -> PlannerConfig {
    PlannerConfig {
        iterations: 3,
        num_samples: 200,
        batch_capacity: 100,
        num_replicas: 2,
        horizon: 8,
        image_height: HEIGHT,
        image_width: WIDTH,
        seed: Some(seed),
        ..Default::default()
    }
}

fn base_tracker(planner: &PlannerConfig) -> TrackerConfig {
    TrackerConfig {
        num_cameras: planner.num_cameras,
        num_tasks: planner.num_tasks,
        height: HEIGHT,
        width: WIDTH,
        horizon: planner.horizon,
        pixels_per_unit: PIXELS_PER_UNIT,
        ..Default::default()
    }
}

fn base_robot(planner: &PlannerConfig, start: Vec<PixelCoord>, goal: Vec<PixelCoord>) -> RobotConfig {
    RobotConfig {
        num_cameras: planner.num_cameras,
        num_tasks: planner.num_tasks,
        height: HEIGHT,
        width: WIDTH,
        context_length: planner.context_length,
        action_dim: planner.action_dim,
        pixels_per_unit: PIXELS_PER_UNIT,
        workspace: vec![1.5, 1.5, 0.5, 3.0],
        ik_failure_rate: 0.0,
        start_pixels: start,
        goal_pixels: goal,
    }
}

fn reach(seed: u64) -> ScenarioSetup {
    let planner = base_planner(seed);
    let tracker = base_tracker(&planner);
    let mut robot = base_robot(
        &planner,
        vec![PixelCoord::new(10.0, 10.0)],
        vec![PixelCoord::new(36.0, 50.0)],
    );
    robot.ik_failure_rate = 0.01;
    ScenarioSetup {
        planner,
        tracker,
        robot,
        steps: 20,
        max_tries: 5,
        success_radius: 3.0,
        faulty_renderer: false,
    }
}

fn multi_task(seed: u64) -> ScenarioSetup {
    let mut planner = base_planner(seed);
    planner.num_cameras = 2;
    planner.num_tasks = 2;
    // The first point is the one that matters.
    planner.task_weights = Some(vec![2.0, 1.0, 2.0, 1.0]);
    let tracker = base_tracker(&planner);

    // One rigid object: both points share the displacement (20, 30), and
    // camera 1 sees it mirrored.
    let start = vec![
        PixelCoord::new(10.0, 10.0),
        PixelCoord::new(18.0, 14.0),
        PixelCoord::new(10.0, 53.0),
        PixelCoord::new(18.0, 49.0),
    ];
    let goal = vec![
        PixelCoord::new(30.0, 40.0),
        PixelCoord::new(38.0, 44.0),
        PixelCoord::new(30.0, 23.0),
        PixelCoord::new(38.0, 19.0),
    ];
    let robot = base_robot(&planner, start, goal);
    ScenarioSetup {
        planner,
        tracker,
        robot,
        steps: 16,
        max_tries: 1,
        success_radius: 3.0,
        faulty_renderer: false,
    }
}

fn propagation(seed: u64) -> ScenarioSetup {
    let mut planner = base_planner(seed);
    planner.reseed_designated_pixels = false;
    planner.predictor_propagation = true;
    let mut tracker = base_tracker(&planner);
    tracker.source = PixelSource::Frames;
    let robot = base_robot(
        &planner,
        vec![PixelCoord::new(38.0, 12.0)],
        vec![PixelCoord::new(14.0, 48.0)],
    );
    ScenarioSetup {
        planner,
        tracker,
        robot,
        steps: 18,
        max_tries: 1,
        success_radius: 3.0,
        faulty_renderer: false,
    }
}

fn broken_renderer(seed: u64) -> ScenarioSetup {
    let mut setup = reach(seed);
    setup.planner.verbose = true;
    setup.planner.visualization_queue = 2;
    setup.robot.ik_failure_rate = 0.0;
    setup.max_tries = 1;
    setup.faulty_renderer = true;
    setup
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Reach,
            ScenarioId::MultiTask,
            ScenarioId::Propagation,
            ScenarioId::BrokenRenderer,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Reach => "reach",
            ScenarioId::MultiTask => "multi_task",
            ScenarioId::Propagation => "propagation",
            ScenarioId::BrokenRenderer => "broken_renderer",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Reach => "1 camera, 1 point, 2 replicas, occasional IK failures",
            ScenarioId::MultiTask => "2 cameras (one mirrored), 2 weighted points on a rigid object",
            ScenarioId::Propagation => "Recurrent distribution propagated from the chosen prediction",
            ScenarioId::BrokenRenderer => "Renderer errors and panics must not disturb planning",
        }
    }

    /// Builds the configuration for this scenario.
    pub fn setup(&self, seed: u64) -> ScenarioSetup {
        match self {
            ScenarioId::Reach => reach(seed),
            ScenarioId::MultiTask => multi_task(seed),
            ScenarioId::Propagation => propagation(seed),
            ScenarioId::BrokenRenderer => broken_renderer(seed),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reach" | "sim-001" => Ok(ScenarioId::Reach),
            "multi_task" | "multitask" | "sim-002" => Ok(ScenarioId::MultiTask),
            "propagation" | "sim-003" => Ok(ScenarioId::Propagation),
            "broken_renderer" | "brokenrenderer" | "sim-004" => Ok(ScenarioId::BrokenRenderer),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
