//! Visualization Offload
//! =====================
//!
//! Background rendering of diagnostic payloads. The planner hands a
//! payload over and moves on; a single worker thread drains a bounded FIFO
//! and calls the [`DiagnosticsSink`].
//!
//! ```text
//!  planner ──submit──► [ bounded queue ] ──► worker ──► sink.render()
//!                        │ full?                     │ Err / panic
//!                        └► overflow policy          └► warn!, counted, swallowed
//! ```
//!
//! Nothing flows back to the planner: `submit` never waits on rendering and
//! a failing or panicking sink only shows up in the logs and in
//! [`OffloadStats`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use serde::Serialize;
use vismpc_env::{DiagnosticPayload, DiagnosticsSink, SinkError};

use crate::config::OverflowPolicy;

/// What happened to a submitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmitOutcome {
    /// Enqueued without displacing anything
    Queued,
    /// Enqueued after evicting the oldest queued payload
    QueuedAfterEviction,
    /// Discarded (queue full, or the worker is gone)
    Dropped,
}

/// Counters since the offload was started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OffloadStats {
    pub submitted: u64,
    pub rendered: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    rendered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> OffloadStats {
        OffloadStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rendered: self.rendered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A bounded queue plus one rendering thread, owned by a planner.
///
/// The worker is started by [`VisualizationOffload::start`] and stopped by
/// [`VisualizationOffload::shutdown`] or on drop, after it has drained
/// whatever is still queued.
pub struct VisualizationOffload {
    sender: Option<Sender<DiagnosticPayload>>,
    // Producer-side handle on the same queue, used to evict the oldest
    // payload under `DropOldest`.
    evictor: Receiver<DiagnosticPayload>,
    policy: OverflowPolicy,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
}

impl VisualizationOffload {
    /// Spawns the worker thread.
    pub fn start(
        sink: Box<dyn DiagnosticsSink>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Result<Self, SinkError> {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let evictor = receiver.clone();

        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new()
            .name(format!("vismpc-viz-{}", sink.name()))
            .spawn(move || run_worker(sink, receiver, worker_counters))?;

        tracing::debug!(capacity, ?policy, "visualization worker started");

        Ok(Self {
            sender: Some(sender),
            evictor,
            policy,
            counters,
            worker: Some(worker),
        })
    }

    /// Hands a payload to the worker without waiting for it to be rendered.
    ///
    /// Under `BlockFor` this waits at most the configured duration for
    /// room in the queue.
    pub fn submit(&self, payload: DiagnosticPayload) -> SubmitOutcome {
        let Some(sender) = &self.sender else {
            return SubmitOutcome::Dropped;
        };
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.policy {
            OverflowPolicy::DropOldest => self.submit_drop_oldest(sender, payload),
            OverflowPolicy::BlockFor { millis } => {
                match sender.send_timeout(payload, Duration::from_millis(millis)) {
                    Ok(()) => SubmitOutcome::Queued,
                    Err(SendTimeoutError::Timeout(p)) => {
                        tracing::debug!(step = p.step, "visualization queue full, payload dropped");
                        SubmitOutcome::Dropped
                    }
                    Err(SendTimeoutError::Disconnected(_)) => SubmitOutcome::Dropped,
                }
            }
        };

        if outcome == SubmitOutcome::Dropped {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    fn submit_drop_oldest(
        &self,
        sender: &Sender<DiagnosticPayload>,
        mut payload: DiagnosticPayload,
    ) -> SubmitOutcome {
        let mut evicted = false;
        // The worker races us for the queue, so a couple of rounds may be
        // needed before a slot is ours.
        for _ in 0..4 {
            match sender.try_send(payload) {
                Ok(()) => {
                    return if evicted {
                        SubmitOutcome::QueuedAfterEviction
                    } else {
                        SubmitOutcome::Queued
                    };
                }
                Err(TrySendError::Full(p)) => {
                    payload = p;
                    if let Ok(old) = self.evictor.try_recv() {
                        tracing::debug!(step = old.step, "visualization queue full, evicted oldest");
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted = true;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return SubmitOutcome::Dropped,
            }
        }
        SubmitOutcome::Dropped
    }

    /// Current counters.
    pub fn stats(&self) -> OffloadStats {
        self.counters.snapshot()
    }

    /// Number of payloads waiting for the worker.
    pub fn queued(&self) -> usize {
        self.evictor.len()
    }

    /// Closes the queue, lets the worker drain it, and joins the worker.
    pub fn shutdown(&mut self) -> OffloadStats {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("visualization worker terminated abnormally");
            }
        }
        self.counters.snapshot()
    }
}

impl Drop for VisualizationOffload {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    mut sink: Box<dyn DiagnosticsSink>,
    receiver: Receiver<DiagnosticPayload>,
    counters: Arc<Counters>,
) {
    for payload in receiver.iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| sink.render(&payload)));
        match result {
            Ok(Ok(())) => {
                counters.rendered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(sink = sink.name(), step = payload.step, error = %e, "diagnostics rendering failed");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(sink = sink.name(), step = payload.step, "diagnostics sink panicked");
            }
        }
    }
    tracing::debug!(sink = sink.name(), "visualization worker stopped");
}
