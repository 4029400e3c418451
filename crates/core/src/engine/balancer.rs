//! Load Balancer - Least-Loaded Worker Selection
//!
//! Tracks per-worker load as an exponential moving average of normalized
//! recent latency and selects the best worker for the next dispatch. The
//! EMA weights favor stability over responsiveness: one slow task does not
//! starve a worker of future dispatch, sustained slowness does.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::WorkerId;

use super::{EngineError, EngineResult};

/// Weight of the previous EMA value
const EMA_RETAIN: f64 = 0.7;

/// Weight of the newest normalized latency sample
const EMA_SAMPLE: f64 = 0.3;

/// Latency (ms) at which the normalized load signal saturates at 1.0
const LOAD_SATURATION_MS: f64 = 100.0;

/// Penalty per queued task when comparing workers
const QUEUE_DEPTH_WEIGHT: f64 = 0.1;

/// Fixed-point scale for the atomic load field
const LOAD_SCALE: f64 = 1000.0;

/// Capacity of each worker's latency ring buffer
const LATENCY_WINDOW: usize = 100;

/// Per-worker load state, one cache-friendly slot per worker index
#[derive(Debug, Default)]
struct WorkerLoadState {
    /// EMA load in [0, 1], fixed-point (multiply by 1000)
    load: AtomicU32,

    /// Tasks currently assigned/pending for this worker
    queue_depth: AtomicU32,

    /// Recent raw latencies for introspection, oldest evicted first
    recent_latencies: Mutex<VecDeque<f64>>,
}

/// Read-only view of one worker's load state
#[derive(Debug, Clone, Serialize)]
pub struct WorkerLoadSnapshot {
    /// Worker slot
    pub worker_id: WorkerId,

    /// EMA load in [0, 1]
    pub load: f64,

    /// Tasks currently assigned/pending
    pub queue_depth: usize,

    /// Number of latency samples currently retained
    pub samples: usize,
}

/// Least-loaded worker selection over a preallocated slot table
pub struct LoadBalancer {
    slots: Vec<WorkerLoadState>,
}

impl LoadBalancer {
    /// Create balancer with room for `max_workers` slots
    ///
    /// # Errors
    ///
    /// Returns error if `max_workers` is zero
    pub fn new(max_workers: usize) -> EngineResult<Self> {
        if max_workers == 0 {
            return Err(EngineError::ConfigError {
                field: "max_workers must be > 0".to_string(),
            });
        }

        let mut slots = Vec::with_capacity(max_workers);
        for _ in 0..max_workers {
            slots.push(WorkerLoadState::default());
        }

        Ok(Self { slots })
    }

    /// Select the least-loaded worker among slots `0..worker_count`
    ///
    /// The combined score is `load + queue_depth * 0.1`; ties break toward
    /// the lowest worker id. Unseen workers score zero.
    ///
    /// # Errors
    ///
    /// Returns error if `worker_count` is zero
    pub fn select_worker(&self, worker_count: usize) -> EngineResult<WorkerId> {
        let count = worker_count.min(self.slots.len());
        if count == 0 {
            return Err(EngineError::NoWorkersAvailable);
        }

        let mut best = 0_usize;
        let mut best_score = f64::INFINITY;

        for (index, slot) in self.slots.iter().enumerate().take(count) {
            let load = f64::from(slot.load.load(Ordering::Relaxed)) / LOAD_SCALE;
            let depth = f64::from(slot.queue_depth.load(Ordering::Relaxed));
            let score = QUEUE_DEPTH_WEIGHT.mul_add(depth, load);

            if score < best_score {
                best_score = score;
                best = index;
            }
        }

        Ok(WorkerId::from_raw(best as u64))
    }

    /// Select the least-loaded worker among slots `0..worker_count` with no
    /// pending work, `None` when every worker is busy
    ///
    /// Dispatch paths that hand a task to a worker only once it can take the
    /// work immediately use this instead of [`select_worker`](Self::select_worker),
    /// so one busy low-load worker never stalls dispatch while others idle.
    #[must_use]
    pub fn select_idle_worker(&self, worker_count: usize) -> Option<WorkerId> {
        let count = worker_count.min(self.slots.len());
        let mut best: Option<(usize, f64)> = None;

        for (index, slot) in self.slots.iter().enumerate().take(count) {
            if slot.queue_depth.load(Ordering::Relaxed) > 0 {
                continue;
            }
            let load = f64::from(slot.load.load(Ordering::Relaxed)) / LOAD_SCALE;
            if best.map_or(true, |(_, score)| load < score) {
                best = Some((index, load));
            }
        }

        best.map(|(index, _)| WorkerId::from_raw(index as u64))
    }

    /// Note a task handed to `worker_id` so its pending depth is visible to
    /// selection before the completion is recorded
    pub fn record_dispatch(&self, worker_id: WorkerId) {
        if let Some(slot) = self.slot(worker_id) {
            slot.queue_depth.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Roll back a dispatch whose task could not be delivered
    pub fn record_requeue(&self, worker_id: WorkerId) {
        if let Some(slot) = self.slot(worker_id) {
            let _ = slot.queue_depth.fetch_update(
                Ordering::Relaxed,
                Ordering::Relaxed,
                |depth| depth.checked_sub(1),
            );
        }
    }

    /// Tasks currently assigned/pending for `worker_id`
    ///
    /// Zero means the worker is idle: nothing queued on its channel and
    /// nothing executing.
    #[must_use]
    pub fn queue_depth(&self, worker_id: WorkerId) -> usize {
        self.slot(worker_id)
            .map_or(0, |slot| slot.queue_depth.load(Ordering::Relaxed) as usize)
    }

    /// Record a completed task for `worker_id`
    ///
    /// Applies `load = load*0.7 + min(elapsed_ms/100, 1.0)*0.3`, stores the
    /// worker-observed `queue_depth`, and appends the raw latency to the
    /// bounded ring buffer.
    pub fn record_completion(&self, worker_id: WorkerId, elapsed_ms: f64, queue_depth: usize) {
        let Some(slot) = self.slot(worker_id) else {
            return;
        };

        let normalized = (elapsed_ms.max(0.0_f64) / LOAD_SATURATION_MS).min(1.0_f64);
        let previous = f64::from(slot.load.load(Ordering::Relaxed)) / LOAD_SCALE;
        let updated = EMA_RETAIN.mul_add(previous, EMA_SAMPLE * normalized);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        slot.load.store(
            (updated.clamp(0.0_f64, 1.0_f64) * LOAD_SCALE) as u32,
            Ordering::Relaxed,
        );
        slot.queue_depth
            .store(u32::try_from(queue_depth).unwrap_or(u32::MAX), Ordering::Relaxed);

        let mut ring = slot.recent_latencies.lock();
        if ring.len() == LATENCY_WINDOW {
            ring.pop_front();
        }
        ring.push_back(elapsed_ms);
    }

    /// Snapshot load state for slots `0..worker_count`
    #[must_use]
    pub fn snapshot(&self, worker_count: usize) -> Vec<WorkerLoadSnapshot> {
        self.slots
            .iter()
            .enumerate()
            .take(worker_count.min(self.slots.len()))
            .map(|(index, slot)| WorkerLoadSnapshot {
                worker_id: WorkerId::from_raw(index as u64),
                load: f64::from(slot.load.load(Ordering::Relaxed)) / LOAD_SCALE,
                queue_depth: slot.queue_depth.load(Ordering::Relaxed) as usize,
                samples: slot.recent_latencies.lock().len(),
            })
            .collect()
    }

    /// Recent raw latencies for one worker, oldest first
    #[must_use]
    pub fn recent_latencies(&self, worker_id: WorkerId) -> Vec<f64> {
        self.slot(worker_id)
            .map(|slot| slot.recent_latencies.lock().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of preallocated slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, worker_id: WorkerId) -> Option<&WorkerLoadState> {
        self.slots.get(usize::try_from(worker_id.raw()).ok()?)
    }
}
