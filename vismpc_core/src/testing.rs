//! Test doubles shared by the core's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{self, Receiver, Sender};
use nalgebra::{DMatrix, DVector};
use vismpc_env::{
    ActionSequence, ContextInput, DiagnosticPayload, DiagnosticsSink, Frame, Observation,
    PixelCoord, PredictedRollout, PredictionRequest, PredictionService, ReplicaModel, ScoreTrace,
    ServiceError, SinkError, TaskMaps,
};

use crate::config::PlannerConfig;

// =============================================================================
// INDEX TAGGING
// =============================================================================

/// `n` sequences where every entry of sequence `i` equals `i`.
pub(crate) fn tagged_population(n: usize, horizon: usize, action_dim: usize) -> Vec<ActionSequence> {
    (0..n)
        .map(|i| ActionSequence::new(DMatrix::from_element(horizon, action_dim, i as f64)))
        .collect()
}

/// The population index a tagged rollout was produced for.
pub(crate) fn rollout_tag(rollout: &PredictedRollout) -> usize {
    rollout.states[0][0] as usize
}

fn tag_rows(request: &PredictionRequest<'_>) -> Vec<PredictedRollout> {
    request
        .actions
        .iter()
        .map(|a| PredictedRollout {
            frames: vec![],
            distributions: None,
            states: vec![DVector::from_element(1, a.as_matrix()[(0, 0)])],
        })
        .collect()
}

/// Replica that echoes each row's tag into its predicted state.
pub(crate) struct TaggingReplica;

impl ReplicaModel for TaggingReplica {
    fn predict_rows(&self, request: &PredictionRequest<'_>) -> Result<Vec<PredictedRollout>, ServiceError> {
        Ok(tag_rows(request))
    }
}

/// Single-call service that tags rollouts and counts calls.
pub(crate) struct TaggingService {
    capacity: usize,
    replicas: usize,
    calls: AtomicUsize,
    fail_on: Option<usize>,
}

impl TaggingService {
    pub(crate) fn new(capacity: usize, replicas: usize) -> Self {
        Self {
            capacity,
            replicas,
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// Fails the call with this zero-based index.
    pub(crate) fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PredictionService for TaggingService {
    fn batch_capacity(&self) -> usize {
        self.capacity
    }

    fn replica_count(&self) -> usize {
        self.replicas
    }

    fn predict(&self, request: &PredictionRequest<'_>) -> Result<Vec<PredictedRollout>, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(call) {
            return Err(ServiceError::unavailable("injected failure"));
        }
        if request.actions.len() != self.capacity {
            return Err(ServiceError::shape("action batch", self.capacity, request.actions.len()));
        }
        Ok(tag_rows(request))
    }
}

// =============================================================================
// DRIFTING POINT MODEL
// =============================================================================

/// A service whose tracked points move by the first two action components
/// times `gain` pixels per step, predicted as one-hot maps.
///
/// Starts from the last map of the recurrent input (or the image centre) and
/// records every recurrent input it receives.
pub(crate) struct DriftService {
    capacity: usize,
    replicas: usize,
    num_cameras: usize,
    num_tasks: usize,
    height: usize,
    width: usize,
    horizon: usize,
    gain: f64,
    calls: AtomicUsize,
    fail_on: Option<usize>,
    inputs: Mutex<Vec<Option<Vec<TaskMaps>>>>,
}

impl DriftService {
    pub(crate) fn for_config(config: &PlannerConfig, gain: f64) -> Self {
        Self {
            capacity: config.batch_capacity,
            replicas: config.num_replicas,
            num_cameras: config.num_cameras,
            num_tasks: config.num_tasks,
            height: config.image_height,
            width: config.image_width,
            horizon: config.horizon,
            gain,
            calls: AtomicUsize::new(0),
            fail_on: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn inputs(&self) -> Vec<Option<Vec<TaskMaps>>> {
        self.inputs.lock().unwrap().clone()
    }

    fn start_pixels(&self, window: Option<&[TaskMaps]>) -> Vec<PixelCoord> {
        let centre = PixelCoord::new(self.height as f64 / 2.0, self.width as f64 / 2.0);
        match window.and_then(|w| w.last()) {
            Some(maps) => maps
                .iter()
                .map(|m| {
                    let (r, c) = m.iamax_full();
                    PixelCoord::new(r as f64, c as f64)
                })
                .collect(),
            None => vec![centre; self.num_cameras * self.num_tasks],
        }
    }
}

impl PredictionService for DriftService {
    fn batch_capacity(&self) -> usize {
        self.capacity
    }

    fn replica_count(&self) -> usize {
        self.replicas
    }

    fn predict(&self, request: &PredictionRequest<'_>) -> Result<Vec<PredictedRollout>, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(call) {
            return Err(ServiceError::unavailable("injected failure"));
        }
        self.inputs
            .lock()
            .unwrap()
            .push(request.pixel_distribution.map(|w| w.to_vec()));

        let start = self.start_pixels(request.pixel_distribution);
        let rollouts = request
            .actions
            .iter()
            .map(|seq| {
                let mut pixels = start.clone();
                let distributions = (0..self.horizon)
                    .map(|t| {
                        let a = seq.action(t);
                        for p in pixels.iter_mut() {
                            p.row += a[0] * self.gain;
                            p.col += a[1] * self.gain;
                        }
                        TaskMaps::one_hot(self.num_cameras, self.num_tasks, self.height, self.width, &pixels)
                    })
                    .collect();
                PredictedRollout {
                    frames: vec![],
                    distributions: Some(distributions),
                    states: vec![],
                }
            })
            .collect();
        Ok(rollouts)
    }
}

// =============================================================================
// OBSERVATIONS & PAYLOADS
// =============================================================================

/// A blank context of `context_length` steps with `num_cameras` frames each.
pub(crate) fn test_context(context_length: usize, num_cameras: usize, height: usize, width: usize) -> ContextInput {
    ContextInput {
        frames: vec![vec![Frame::blank(height, width); num_cameras]; context_length],
        states: vec![DVector::zeros(2); context_length],
    }
}

/// An observation matching `config`, with every tracked pixel at the image
/// centre and every goal at `goal`.
pub(crate) fn test_observation(config: &PlannerConfig, step: usize, goal: PixelCoord) -> Observation {
    let centre = PixelCoord::new(config.image_height as f64 / 2.0, config.image_width as f64 / 2.0);
    Observation {
        step,
        context: test_context(config.context_length, config.num_cameras, config.image_height, config.image_width),
        designated_pixels: vec![centre; config.num_pairs()],
        goal_pixels: vec![goal; config.num_pairs()],
    }
}

pub(crate) fn payload_for_step(step: usize) -> DiagnosticPayload {
    DiagnosticPayload {
        step,
        iteration: 0,
        chosen_index: 0,
        scores: vec![0.0],
        score_trace: ScoreTrace::zeros(1, 1, 1),
        actions: vec![],
        rollouts: vec![],
        context_frames: vec![],
        designated_pixels: vec![],
        goal_pixels: vec![],
    }
}

// =============================================================================
// SINKS
// =============================================================================

/// Records the step of every rendered payload.
#[derive(Default)]
pub(crate) struct RecordingSink {
    steps: Arc<Mutex<Vec<usize>>>,
}

impl RecordingSink {
    pub(crate) fn handle(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.steps)
    }
}

impl DiagnosticsSink for RecordingSink {
    fn render(&mut self, payload: &DiagnosticPayload) -> Result<(), SinkError> {
        self.steps.lock().unwrap().push(payload.step);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fails every render.
pub(crate) struct FailingSink;

impl DiagnosticsSink for FailingSink {
    fn render(&mut self, _payload: &DiagnosticPayload) -> Result<(), SinkError> {
        Err(SinkError::render("cannot render"))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Panics on every render.
pub(crate) struct PanickingSink;

impl DiagnosticsSink for PanickingSink {
    fn render(&mut self, payload: &DiagnosticPayload) -> Result<(), SinkError> {
        panic!("renderer exploded on step {}", payload.step);
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Signals when a render starts, then blocks until the gate sender is
/// dropped.
pub(crate) struct GatedSink {
    inner: RecordingSink,
    started: Sender<()>,
    gate: Receiver<()>,
}

impl GatedSink {
    pub(crate) fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = channel::unbounded();
        let (gate_tx, gate_rx) = channel::unbounded();
        let sink = Self {
            inner: RecordingSink::default(),
            started: started_tx,
            gate: gate_rx,
        };
        (sink, started_rx, gate_tx)
    }

    pub(crate) fn handle(&self) -> Arc<Mutex<Vec<usize>>> {
        self.inner.handle()
    }
}

impl DiagnosticsSink for GatedSink {
    fn render(&mut self, payload: &DiagnosticPayload) -> Result<(), SinkError> {
        let _ = self.started.send(());
        let _ = self.gate.recv();
        self.inner.render(payload)
    }

    fn name(&self) -> &str {
        "gated"
    }
}
