//! VisMPC Environment Abstraction Layer
//!
//! This crate is the boundary between the sampling-based planner and the
//! world it plans against. Everything on the far side of it is an external
//! collaborator:
//!
//! - **Prediction**: a trained video-prediction model, served as a fixed
//!   size batch across one or more parallel replicas ("towers")
//! - **Robot**: supplies observations (context frames, low-dim state,
//!   designated and goal pixels) and executes the chosen action
//! - **Diagnostics**: renders or saves visualizations of a planning step
//!
//! # Core Concept: Capability Interfaces
//!
//! The planner only sees "a batched inference provider with a maximum batch
//! size and a replica count". How replicas are physically realized (one
//! process, several devices, a remote service) is the provider's business.
//!
//! ```text
//! ┌────────────┐  PredictionRequest   ┌──────────────────────────────┐
//! │  Planner   │─────────────────────►│ PredictionService            │
//! │            │◄─────────────────────│  ┌────────┐ ┌────────┐       │
//! └────────────┘  Vec<PredictedRollout>│  │replica0│ │replica1│ ...  │
//!                                      │  └────────┘ └────────┘       │
//!                                      └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vismpc_env::{PredictionService, ReplicatedService};
//!
//! let service = ReplicatedService::new(vec![model_a, model_b], 200)?;
//! assert_eq!(service.replica_count(), 2);
//! let rollouts = service.predict(&request)?;
//! ```

mod error;
mod replicated;
mod service;
mod sink;
mod types;

pub use error::{ServiceError, SinkError};
pub use replicated::ReplicatedService;
pub use service::{PredictionService, ReplicaModel};
pub use sink::{DiagnosticPayload, DiagnosticsSink};
pub use types::{
    ActionSequence, ContextInput, Frame, Observation, PixelCoord, PredictedRollout,
    PredictionRequest, ScoreTrace, TaskMaps,
};
