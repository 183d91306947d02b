//! Synthetic prediction model for simulation.
//!
//! The `SyntheticTracker` stands in for the trained video-prediction
//! network. It knows the true image-space kinematics of the simulated
//! scene, so its predictions are exact up to a Gaussian blur:
//! - Each tracked point moves by the first two action components, scaled
//!   by `pixels_per_unit` (camera 1, 3, ... see the scene mirrored left to
//!   right)
//! - The predicted pixel distribution is a normalized Gaussian blob
//! - The low-dim state integrates the actions

use std::path::PathBuf;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use vismpc_env::{
    ActionSequence, Frame, PixelCoord, PredictedRollout, PredictionRequest, ReplicaModel,
    ServiceError, TaskMaps,
};

/// Maximum number of tasks a frame can carry (one RGB channel each).
pub const MAX_TASKS: usize = 3;

/// Image-space displacement of a tracked point in `camera` for one action.
pub fn pixel_motion(camera: usize, action: &DVector<f64>, pixels_per_unit: f64) -> (f64, f64) {
    let drow = action[0] * pixels_per_unit;
    let dcol = action[1] * pixels_per_unit;
    if camera % 2 == 1 {
        (drow, -dcol)
    } else {
        (drow, dcol)
    }
}

/// Keeps a coordinate inside the image.
pub fn clamp_to_image(p: PixelCoord, height: usize, width: usize) -> PixelCoord {
    PixelCoord::new(
        p.row.clamp(0.0, height.saturating_sub(1) as f64),
        p.col.clamp(0.0, width.saturating_sub(1) as f64),
    )
}

/// Draws task `k`'s point into channel `k` of `frame` as a small cross.
pub fn draw_point(frame: &mut Frame, task: usize, p: PixelCoord) {
    let (r, c) = p.clamped_index(frame.height, frame.width);
    frame.set(r, c, task, 1.0);
    let neighbours = [(r.wrapping_sub(1), c), (r + 1, c), (r, c.wrapping_sub(1)), (r, c + 1)];
    for (nr, nc) in neighbours {
        if nr < frame.height && nc < frame.width {
            frame.set(nr, nc, task, 0.5);
        }
    }
}

/// Where the tracker reads the current point positions from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelSource {
    /// Mass-weighted centroid of the last recurrent input map
    Recurrent,
    /// Brightest pixel of the task's channel in the last context frame
    Frames,
}

/// Injected failures for exercising error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    None,
    /// Every call fails as if the model backend were down
    Unavailable,
    /// Every call fails as if the weights file were missing
    MissingWeights,
    /// Every call returns one rollout too few
    ShortRows,
}

/// Shape and kinematics of the synthetic model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub num_cameras: usize,
    pub num_tasks: usize,
    pub height: usize,
    pub width: usize,
    pub horizon: usize,
    pub pixels_per_unit: f64,
    /// Std-dev of the predicted blob, in pixels
    pub blob_sigma: f64,
    pub source: PixelSource,
    /// Also render predicted frames (memory heavy for large populations)
    pub render_frames: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            num_cameras: 1,
            num_tasks: 1,
            height: 48,
            width: 64,
            horizon: 13,
            pixels_per_unit: 40.0,
            blob_sigma: 1.5,
            source: PixelSource::Recurrent,
            render_frames: false,
        }
    }
}

/// One replica of the synthetic prediction model.
#[derive(Debug, Clone)]
pub struct SyntheticTracker {
    config: TrackerConfig,
    fault: FaultMode,
}

impl SyntheticTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            fault: FaultMode::None,
        }
    }

    pub fn with_fault(mut self, fault: FaultMode) -> Self {
        self.fault = fault;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Normalized Gaussian blob centred on `p`, truncated at 4 sigma.
    pub fn blob(&self, p: PixelCoord) -> DMatrix<f32> {
        let (h, w) = (self.config.height, self.config.width);
        let sigma = self.config.blob_sigma.max(1e-3);
        let p = clamp_to_image(p, h, w);
        let reach = (4.0 * sigma).ceil() as isize;
        let (cr, cc) = p.clamped_index(h, w);

        let mut map = DMatrix::zeros(h, w);
        let mut mass = 0.0f64;
        for dr in -reach..=reach {
            for dc in -reach..=reach {
                let r = cr as isize + dr;
                let c = cc as isize + dc;
                if r < 0 || c < 0 || r >= h as isize || c >= w as isize {
                    continue;
                }
                let d2 = (r as f64 - p.row).powi(2) + (c as f64 - p.col).powi(2);
                let v = (-d2 / (2.0 * sigma * sigma)).exp();
                map[(r as usize, c as usize)] = v as f32;
                mass += v;
            }
        }
        if mass > 0.0 {
            map /= mass as f32;
        }
        map
    }

    fn start_pixels(&self, request: &PredictionRequest<'_>) -> Result<Vec<PixelCoord>, ServiceError> {
        let pairs = self.config.num_cameras * self.config.num_tasks;
        match self.config.source {
            PixelSource::Recurrent => {
                let window = request
                    .pixel_distribution
                    .and_then(|w| w.last())
                    .ok_or_else(|| ServiceError::unavailable("tracker needs a pixel distribution input"))?;
                if window.num_cameras() * window.num_tasks() != pairs {
                    return Err(ServiceError::shape(
                        "pixel distribution maps",
                        pairs,
                        window.num_cameras() * window.num_tasks(),
                    ));
                }
                Ok(window.iter().map(centroid).collect())
            }
            PixelSource::Frames => {
                if self.config.num_tasks > MAX_TASKS {
                    return Err(ServiceError::shape("tasks per frame", MAX_TASKS, self.config.num_tasks));
                }
                let last = request
                    .context
                    .frames
                    .last()
                    .ok_or_else(|| ServiceError::shape("context frames", 1, 0))?;
                if last.len() != self.config.num_cameras {
                    return Err(ServiceError::shape("context cameras", self.config.num_cameras, last.len()));
                }
                let mut out = Vec::with_capacity(pairs);
                for frame in last {
                    for task in 0..self.config.num_tasks {
                        out.push(brightest(frame, task));
                    }
                }
                Ok(out)
            }
        }
    }

    fn rollout(
        &self,
        actions: &ActionSequence,
        start: &[PixelCoord],
        start_state: &DVector<f64>,
    ) -> PredictedRollout {
        let cfg = &self.config;
        let steps = cfg.horizon.min(actions.horizon());
        let mut pixels = start.to_vec();
        let mut state = start_state.clone();

        let mut distributions = Vec::with_capacity(steps);
        let mut states = Vec::with_capacity(steps);
        let mut frames = Vec::new();

        for t in 0..steps {
            let a = actions.action(t);
            for cam in 0..cfg.num_cameras {
                let (drow, dcol) = pixel_motion(cam, &a, cfg.pixels_per_unit);
                for task in 0..cfg.num_tasks {
                    let p = &mut pixels[cam * cfg.num_tasks + task];
                    *p = clamp_to_image(PixelCoord::new(p.row + drow, p.col + dcol), cfg.height, cfg.width);
                }
            }

            let maps = pixels.iter().map(|p| self.blob(*p)).collect();
            // Map count always matches cameras * tasks here.
            if let Some(maps) = TaskMaps::from_maps(cfg.num_cameras, cfg.num_tasks, maps) {
                distributions.push(maps);
            }

            let n = state.len().min(a.len());
            for d in 0..n {
                state[d] += a[d];
            }
            states.push(state.clone());

            if cfg.render_frames {
                frames.push(self.render(&pixels));
            }
        }

        PredictedRollout {
            frames,
            distributions: Some(distributions),
            states,
        }
    }

    /// Renders one frame per camera with every task's point drawn in.
    pub fn render(&self, pixels: &[PixelCoord]) -> Vec<Frame> {
        let cfg = &self.config;
        (0..cfg.num_cameras)
            .map(|cam| {
                let mut frame = Frame::blank(cfg.height, cfg.width);
                for task in 0..cfg.num_tasks.min(MAX_TASKS) {
                    draw_point(&mut frame, task, pixels[cam * cfg.num_tasks + task]);
                }
                frame
            })
            .collect()
    }
}

impl ReplicaModel for SyntheticTracker {
    fn predict_rows(&self, request: &PredictionRequest<'_>) -> Result<Vec<PredictedRollout>, ServiceError> {
        match self.fault {
            FaultMode::Unavailable => return Err(ServiceError::unavailable("synthetic fault")),
            FaultMode::MissingWeights => {
                return Err(ServiceError::ModelNotFound(PathBuf::from("synthetic_tracker.weights")))
            }
            FaultMode::ShortRows | FaultMode::None => {}
        }

        let start = self.start_pixels(request)?;
        let start_state = request
            .context
            .states
            .last()
            .cloned()
            .unwrap_or_else(|| DVector::zeros(0));

        let mut rollouts: Vec<PredictedRollout> = request
            .actions
            .iter()
            .map(|a| self.rollout(a, &start, &start_state))
            .collect();

        if self.fault == FaultMode::ShortRows {
            rollouts.pop();
        }
        Ok(rollouts)
    }
}

/// Mass-weighted centroid of a map (image centre if the map is empty).
pub fn centroid(map: &DMatrix<f32>) -> PixelCoord {
    let mut mass = 0.0f64;
    let mut row = 0.0f64;
    let mut col = 0.0f64;
    for c in 0..map.ncols() {
        for r in 0..map.nrows() {
            let v = map[(r, c)] as f64;
            mass += v;
            row += v * r as f64;
            col += v * c as f64;
        }
    }
    if mass > 0.0 {
        PixelCoord::new(row / mass, col / mass)
    } else {
        PixelCoord::new(map.nrows() as f64 / 2.0, map.ncols() as f64 / 2.0)
    }
}

/// Brightest pixel of one channel.
pub fn brightest(frame: &Frame, channel: usize) -> PixelCoord {
    let mut best = (0, 0);
    let mut best_value = f32::MIN;
    for r in 0..frame.height {
        for c in 0..frame.width {
            let v = frame.get(r, c, channel);
            if v > best_value {
                best_value = v;
                best = (r, c);
            }
        }
    }
    PixelCoord::new(best.0 as f64, best.1 as f64)
}
