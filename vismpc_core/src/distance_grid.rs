//! Per-goal distance fields over image coordinates.

use nalgebra::DMatrix;
use vismpc_env::PixelCoord;

use crate::error::ConfigError;

/// Euclidean distance from every pixel to one goal pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceGrid {
    goal: PixelCoord,
    field: DMatrix<f32>,
}

impl DistanceGrid {
    /// Builds the field for an image of `height x width`.
    pub fn new(height: usize, width: usize, goal: PixelCoord) -> Self {
        let field = DMatrix::from_fn(height, width, |r, c| {
            goal.distance(&PixelCoord::new(r as f64, c as f64)) as f32
        });
        Self { goal, field }
    }

    /// Wraps a precomputed field. Any cost surface works, including negative
    /// values; lower is better.
    pub fn from_field(goal: PixelCoord, field: DMatrix<f32>) -> Self {
        Self { goal, field }
    }

    pub fn goal(&self) -> PixelCoord {
        self.goal
    }

    pub fn field(&self) -> &DMatrix<f32> {
        &self.field
    }
}

/// One [`DistanceGrid`] per (camera, task), camera-major.
///
/// Built once per control step from that step's goal pixels and shared by
/// every CEM iteration of the step.
#[derive(Debug, Clone)]
pub struct DistanceGrids {
    num_cameras: usize,
    num_tasks: usize,
    grids: Vec<DistanceGrid>,
}

impl DistanceGrids {
    /// Builds grids for all (camera, task) goal pixels.
    pub fn build(
        num_cameras: usize,
        num_tasks: usize,
        height: usize,
        width: usize,
        goal_pixels: &[PixelCoord],
    ) -> Result<Self, ConfigError> {
        if goal_pixels.len() != num_cameras * num_tasks {
            return Err(ConfigError::TaskCountMismatch {
                what: "goal pixels",
                expected: num_cameras * num_tasks,
                actual: goal_pixels.len(),
            });
        }
        let grids = goal_pixels
            .iter()
            .map(|goal| DistanceGrid::new(height, width, *goal))
            .collect();
        tracing::debug!(pairs = goal_pixels.len(), height, width, "built distance grids");
        Ok(Self {
            num_cameras,
            num_tasks,
            grids,
        })
    }

    /// Wraps precomputed grids, camera-major.
    pub fn from_grids(
        num_cameras: usize,
        num_tasks: usize,
        grids: Vec<DistanceGrid>,
    ) -> Result<Self, ConfigError> {
        if grids.len() != num_cameras * num_tasks {
            return Err(ConfigError::TaskCountMismatch {
                what: "distance grids",
                expected: num_cameras * num_tasks,
                actual: grids.len(),
            });
        }
        Ok(Self {
            num_cameras,
            num_tasks,
            grids,
        })
    }

    pub fn num_cameras(&self) -> usize {
        self.num_cameras
    }

    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    pub fn get(&self, camera: usize, task: usize) -> &DistanceGrid {
        &self.grids[camera * self.num_tasks + task]
    }
}
