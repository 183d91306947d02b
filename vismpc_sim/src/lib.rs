//! VisMPC Simulation Harness
//!
//! Closed-loop scenarios for the visual MPC planner, fully seeded so a run
//! can be replayed exactly.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                          │
//! │                                                              │
//! │  ┌─────────────────┐  observe   ┌──────────────────────────┐ │
//! │  │ SimulatedRobot  │──────────► │ SimulatedAgent           │ │
//! │  │ (true pixels,   │ ◄──────────│  └ CemPlanner            │ │
//! │  │  frames, IK)    │  execute   │     └ ReplicatedService  │ │
//! │  └─────────────────┘            │        └ SyntheticTracker│ │
//! │                                 └────────────┬─────────────┘ │
//! │                                              │ payloads      │
//! │                             JsonSink / RerunSink / FaultySink│
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use vismpc_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_steps(10).run(ScenarioId::Reach);
//! assert!(result.passed);
//! ```

pub mod agent;
pub mod error;
pub mod exporter;
pub mod oracle;
pub mod runner;
pub mod scenarios;
pub mod visualizer;

pub use agent::{EpisodeSummary, RobotConfig, SimulatedAgent, SimulatedRobot};
pub use error::{RobotError, SimError};
pub use exporter::{EpisodeExport, StepRecord};
pub use oracle::{FaultMode, PixelSource, SyntheticTracker, TrackerConfig};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use visualizer::{FaultySink, JsonSink, RerunSink};
