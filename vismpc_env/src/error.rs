//! Error types for the planner's external collaborators.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a prediction service or one of its replicas.
///
/// All of these are fatal to the control step that observed them; the
/// planner propagates them and never retries inference itself.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The model backend cannot be reached or is not loaded.
    #[error("Prediction service unavailable: {0}")]
    Unavailable(String),

    /// The model weights could not be located.
    #[error("Model file {0} not found")]
    ModelNotFound(PathBuf),

    /// A tensor handed to or returned by the model had the wrong shape.
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Which input or output was malformed
        what: &'static str,
        /// Expected extent
        expected: usize,
        /// Observed extent
        actual: usize,
    },

    /// A single replica failed while serving its sub-slice of the batch.
    #[error("Replica {replica} failed: {reason}")]
    ReplicaFailed {
        /// Replica index within the service
        replica: usize,
        /// Failure description
        reason: String,
    },
}

impl ServiceError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a shape mismatch error.
    pub fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}

/// Errors raised by a diagnostics sink while rendering a payload.
///
/// These never reach the planning path: the visualization worker logs
/// and drops them.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Rendering backend failed
    #[error("Render error: {0}")]
    Render(String),

    /// Writing the rendered output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SinkError {
    /// Creates a render error.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }
}
