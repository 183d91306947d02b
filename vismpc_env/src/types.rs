//! Common types exchanged with the planner's collaborators.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// An image coordinate (row, column) in the model's image frame.
///
/// Coordinates are real-valued so goal pixels can sit between pixel
/// centers; [`PixelCoord::clamped_index`] snaps them onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelCoord {
    /// Row (0 = top)
    pub row: f64,
    /// Column (0 = left)
    pub col: f64,
}

impl PixelCoord {
    /// Creates a new pixel coordinate.
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    /// Returns the nearest in-bounds integer index for an image of the
    /// given size.
    pub fn clamped_index(&self, height: usize, width: usize) -> (usize, usize) {
        let clamp = |v: f64, extent: usize| -> usize {
            let max = extent.saturating_sub(1) as f64;
            v.round().clamp(0.0, max) as usize
        };
        (clamp(self.row, height), clamp(self.col, width))
    }

    /// Euclidean distance to another coordinate in pixels.
    pub fn distance(&self, other: &PixelCoord) -> f64 {
        ((self.row - other.row).powi(2) + (self.col - other.col).powi(2)).sqrt()
    }
}

/// An ordered sequence of `H` action vectors of dimension `A`.
///
/// Stored as an `H x A` matrix, one row per timestep. Immutable once
/// sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSequence {
    steps: DMatrix<f64>,
}

impl ActionSequence {
    /// Wraps an `H x A` matrix.
    pub fn new(steps: DMatrix<f64>) -> Self {
        Self { steps }
    }

    /// Builds a sequence from a flattened vector laid out step-major
    /// (`index = t * A + a`).
    pub fn from_flat(horizon: usize, action_dim: usize, flat: &DVector<f64>) -> Self {
        Self {
            steps: DMatrix::from_fn(horizon, action_dim, |t, a| flat[t * action_dim + a]),
        }
    }

    /// Returns the step-major flattened vector of length `H * A`.
    pub fn to_flat(&self) -> DVector<f64> {
        let (h, a) = self.steps.shape();
        DVector::from_fn(h * a, |i, _| self.steps[(i / a, i % a)])
    }

    /// Number of timesteps `H`.
    pub fn horizon(&self) -> usize {
        self.steps.nrows()
    }

    /// Action dimensionality `A`.
    pub fn action_dim(&self) -> usize {
        self.steps.ncols()
    }

    /// The action at timestep `t`.
    pub fn action(&self, t: usize) -> DVector<f64> {
        self.steps.row(t).transpose()
    }

    /// The first action, which is the one the robot executes.
    pub fn first_action(&self) -> DVector<f64> {
        self.action(0)
    }

    /// Sum over timesteps of the squared action magnitude.
    pub fn squared_magnitude_sum(&self) -> f64 {
        self.steps.norm_squared()
    }

    /// Borrow the underlying `H x A` matrix.
    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.steps
    }
}

/// An RGB frame with channels interleaved and values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub height: usize,
    pub width: usize,
    pub pixels: Vec<f32>,
}

impl Frame {
    /// Creates a black frame.
    pub fn blank(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            pixels: vec![0.0; height * width * 3],
        }
    }

    fn offset(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.width + col) * 3 + channel
    }

    /// Reads one channel of one pixel.
    pub fn get(&self, row: usize, col: usize, channel: usize) -> f32 {
        self.pixels[self.offset(row, col, channel)]
    }

    /// Writes one channel of one pixel.
    pub fn set(&mut self, row: usize, col: usize, channel: usize, value: f32) {
        let idx = self.offset(row, col, channel);
        self.pixels[idx] = value;
    }
}

/// One 2-D map per (camera, task) pair, all of the same image size.
///
/// Used both for predicted pixel distributions and for the designated
/// pixel input fed back into the model. Maps are indexed camera-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMaps {
    num_cameras: usize,
    num_tasks: usize,
    maps: Vec<DMatrix<f32>>,
}

impl TaskMaps {
    /// Creates all-zero maps.
    pub fn zeros(num_cameras: usize, num_tasks: usize, height: usize, width: usize) -> Self {
        Self {
            num_cameras,
            num_tasks,
            maps: vec![DMatrix::zeros(height, width); num_cameras * num_tasks],
        }
    }

    /// Wraps camera-major maps. Returns `None` when the count does not
    /// match `num_cameras * num_tasks`.
    pub fn from_maps(num_cameras: usize, num_tasks: usize, maps: Vec<DMatrix<f32>>) -> Option<Self> {
        (maps.len() == num_cameras * num_tasks).then_some(Self {
            num_cameras,
            num_tasks,
            maps,
        })
    }

    /// Builds one-hot maps with a single unit pixel at each designated
    /// coordinate (clamped to the image).
    pub fn one_hot(
        num_cameras: usize,
        num_tasks: usize,
        height: usize,
        width: usize,
        pixels: &[PixelCoord],
    ) -> Self {
        let mut out = Self::zeros(num_cameras, num_tasks, height, width);
        for (map, pixel) in out.maps.iter_mut().zip(pixels) {
            let (r, c) = pixel.clamped_index(height, width);
            map[(r, c)] = 1.0;
        }
        out
    }

    pub fn num_cameras(&self) -> usize {
        self.num_cameras
    }

    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    /// Map for one (camera, task) pair.
    pub fn get(&self, camera: usize, task: usize) -> &DMatrix<f32> {
        &self.maps[camera * self.num_tasks + task]
    }

    /// Mutable map for one (camera, task) pair.
    pub fn get_mut(&mut self, camera: usize, task: usize) -> &mut DMatrix<f32> {
        &mut self.maps[camera * self.num_tasks + task]
    }

    /// Iterates maps camera-major.
    pub fn iter(&self) -> impl Iterator<Item = &DMatrix<f32>> {
        self.maps.iter()
    }
}

/// Real observations preceding the prediction: `[context][camera]` frames
/// and one low-dim state per context step.
///
/// Broadcast identically to every candidate in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextInput {
    pub frames: Vec<Vec<Frame>>,
    pub states: Vec<DVector<f64>>,
}

impl ContextInput {
    /// Number of context steps.
    pub fn context_length(&self) -> usize {
        self.frames.len()
    }
}

/// One batched inference call.
///
/// `actions` has exactly one row per batch slot. The context and the
/// optional recurrent pixel distribution (one [`TaskMaps`] per context
/// step) are shared by every row.
#[derive(Debug, Clone, Copy)]
pub struct PredictionRequest<'a> {
    pub context: &'a ContextInput,
    pub actions: &'a [ActionSequence],
    pub pixel_distribution: Option<&'a [TaskMaps]>,
}

impl<'a> PredictionRequest<'a> {
    /// Narrows the request to a contiguous sub-slice of its action rows.
    pub fn slice(&self, start: usize, len: usize) -> PredictionRequest<'a> {
        PredictionRequest {
            context: self.context,
            actions: &self.actions[start..start + len],
            pixel_distribution: self.pixel_distribution,
        }
    }
}

/// The model's prediction for one candidate.
///
/// All sequences are indexed by future timestep (beyond the context).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedRollout {
    /// `[t][camera]` predicted frames
    pub frames: Vec<Vec<Frame>>,
    /// `[t]` predicted pixel distributions, absent for models without a
    /// pixel-flow head
    pub distributions: Option<Vec<TaskMaps>>,
    /// `[t]` predicted low-dim states
    pub states: Vec<DVector<f64>>,
}

impl PredictedRollout {
    /// The predicted distribution at the last future timestep.
    pub fn terminal_distribution(&self) -> Option<&TaskMaps> {
        self.distributions.as_ref().and_then(|d| d.last())
    }
}

/// Per-timestep, per-(camera, task) expected distances of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTrace {
    pub num_cameras: usize,
    pub num_tasks: usize,
    pub horizon: usize,
    values: Vec<f64>,
}

impl ScoreTrace {
    /// Creates an all-zero trace.
    pub fn zeros(num_cameras: usize, num_tasks: usize, horizon: usize) -> Self {
        Self {
            num_cameras,
            num_tasks,
            horizon,
            values: vec![0.0; num_cameras * num_tasks * horizon],
        }
    }

    fn offset(&self, camera: usize, task: usize, t: usize) -> usize {
        (camera * self.num_tasks + task) * self.horizon + t
    }

    pub fn get(&self, camera: usize, task: usize, t: usize) -> f64 {
        self.values[self.offset(camera, task, t)]
    }

    pub fn set(&mut self, camera: usize, task: usize, t: usize, value: f64) {
        let idx = self.offset(camera, task, t);
        self.values[idx] = value;
    }

    /// The per-timestep series for one (camera, task) pair.
    pub fn series(&self, camera: usize, task: usize) -> &[f64] {
        let start = self.offset(camera, task, 0);
        &self.values[start..start + self.horizon]
    }
}

/// What the robot hands the planner at each control step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Control step index within the episode
    pub step: usize,
    /// Most recent real frames and states
    pub context: ContextInput,
    /// Tracked pixel per (camera, task), camera-major
    pub designated_pixels: Vec<PixelCoord>,
    /// Goal pixel per (camera, task), camera-major
    pub goal_pixels: Vec<PixelCoord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_action_sequence_flat_layout() {
        let flat = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let seq = ActionSequence::from_flat(3, 2, &flat);

        assert_eq!(seq.horizon(), 3);
        assert_eq!(seq.action_dim(), 2);
        assert_eq!(seq.action(1), DVector::from_vec(vec![3.0, 4.0]));
        assert_eq!(seq.to_flat(), flat);
        assert_relative_eq!(seq.squared_magnitude_sum(), 91.0);
    }

    #[test]
    fn test_pixel_clamping() {
        let p = PixelCoord::new(-3.0, 70.4);
        assert_eq!(p.clamped_index(48, 64), (0, 63));

        let inside = PixelCoord::new(10.4, 20.6);
        assert_eq!(inside.clamped_index(48, 64), (10, 21));
    }

    #[test]
    fn test_one_hot_maps() {
        let pixels = [PixelCoord::new(1.0, 2.0), PixelCoord::new(3.0, 0.0)];
        let maps = TaskMaps::one_hot(1, 2, 4, 4, &pixels);

        assert_eq!(maps.get(0, 0)[(1, 2)], 1.0);
        assert_eq!(maps.get(0, 1)[(3, 0)], 1.0);
        assert_relative_eq!(maps.get(0, 1).sum(), 1.0);
    }

    #[test]
    fn test_request_slice_shares_context() {
        let context = ContextInput {
            frames: vec![vec![Frame::blank(2, 2)]],
            states: vec![DVector::zeros(3)],
        };
        let actions: Vec<ActionSequence> = (0..4)
            .map(|i| ActionSequence::new(DMatrix::from_element(2, 2, i as f64)))
            .collect();
        let request = PredictionRequest {
            context: &context,
            actions: &actions,
            pixel_distribution: None,
        };

        let sub = request.slice(2, 2);
        assert_eq!(sub.actions.len(), 2);
        assert_eq!(sub.actions[0].as_matrix()[(0, 0)], 2.0);
        assert!(std::ptr::eq(sub.context, &context));
    }

    #[test]
    fn test_score_trace_series() {
        let mut trace = ScoreTrace::zeros(2, 2, 3);
        trace.set(1, 0, 2, 5.0);
        assert_eq!(trace.series(1, 0), &[0.0, 0.0, 5.0]);
        assert_eq!(trace.get(0, 1, 2), 0.0);
    }
}
