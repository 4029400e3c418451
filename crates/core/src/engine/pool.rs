//! Worker Pool - Priority-Aware Task Execution
//!
//! Owns the per-priority queues, the worker threads, the result cache, and
//! the scale-up/scale-down policy. A dispatcher thread drains the queues in
//! strict priority order and hands each task to the least-loaded worker;
//! submitters block on per-task completion channels instead of polling.
//!
//! Scaling is driven by queue occupancy with an asymmetric dead zone: the
//! pool grows as soon as the target exceeds the active count but only
//! shrinks once the target drops below 80% of it, so bursty load does not
//! thrash the pool size.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::PoolConfig;
use crate::types::{TaskPriority, WorkerId};

use super::{
    balancer::LoadBalancer, registry::OperationRegistry, EngineError, EngineResult, Task,
    TaskResult, QUEUE_FULL_ERROR, TIMEOUT_ERROR,
};

/// Queue occupancy at which the pool jumps straight to `max_workers`
const SCALE_SATURATION: f64 = 0.8;

/// Queue occupancy at which interpolated scaling begins
const SCALE_KNEE: f64 = 0.5;

/// Scale-down dead zone: shrink only when target < active * this factor
const SCALE_DOWN_FACTOR: f64 = 0.8;

/// Worker/dispatcher idle poll interval
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Backoff between dispatch attempts when no worker slot is usable
const DISPATCH_RETRY: Duration = Duration::from_micros(500);

/// How long an undelivered result stays cached before eviction
const STALE_RESULT_TTL: Duration = Duration::from_secs(30);

/// Cadence of the stale-result cleanup pass
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on joining a single worker thread at shutdown
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Priority queue for tasks
struct PriorityQueue {
    /// Critical priority tasks
    critical: SegQueue<Task>,

    /// High priority tasks
    high: SegQueue<Task>,

    /// Medium priority tasks
    medium: SegQueue<Task>,

    /// Low priority tasks
    low: SegQueue<Task>,

    /// Total queue size
    total_size: AtomicU64,

    /// Maximum capacity
    max_capacity: usize,
}

impl PriorityQueue {
    /// Create new priority queue
    const fn new(max_capacity: usize) -> Self {
        Self {
            critical: SegQueue::new(),
            high: SegQueue::new(),
            medium: SegQueue::new(),
            low: SegQueue::new(),
            total_size: AtomicU64::new(0),
            max_capacity,
        }
    }

    /// Push task to the queue matching its priority
    fn push(&self, task: Task) -> EngineResult<()> {
        let current_size = self.total_size.load(Ordering::Relaxed);
        if current_size >= self.max_capacity as u64 {
            return Err(EngineError::QueueFull {
                capacity: self.max_capacity,
            });
        }

        match task.priority {
            TaskPriority::Critical => self.critical.push(task),
            TaskPriority::High => self.high.push(task),
            TaskPriority::Medium => self.medium.push(task),
            TaskPriority::Low => self.low.push(task),
        }

        self.total_size.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Pop highest priority task, FIFO within a level
    fn pop(&self) -> Option<Task> {
        if self.is_empty() {
            return None;
        }

        if let Some(task) = self.critical.pop() {
            self.total_size.fetch_sub(1, Ordering::Relaxed);
            return Some(task);
        }

        if let Some(task) = self.high.pop() {
            self.total_size.fetch_sub(1, Ordering::Relaxed);
            return Some(task);
        }

        if let Some(task) = self.medium.pop() {
            self.total_size.fetch_sub(1, Ordering::Relaxed);
            return Some(task);
        }

        if let Some(task) = self.low.pop() {
            self.total_size.fetch_sub(1, Ordering::Relaxed);
            return Some(task);
        }

        None
    }

    /// Get current queue size
    fn len(&self) -> usize {
        usize::try_from(self.total_size.load(Ordering::Relaxed)).unwrap_or(usize::MAX)
    }

    /// Check if queue is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get queue sizes by priority (critical, high, medium, low)
    fn stats(&self) -> (usize, usize, usize, usize) {
        (
            self.critical.len(),
            self.high.len(),
            self.medium.len(),
            self.low.len(),
        )
    }
}

/// Result cache plus the per-task completion channels
///
/// A submitter registers a waiter before its task is enqueued; the worker
/// publishes the finished result into the cache and signals the waiter.
/// Results whose submitter already gave up are evicted by age.
struct ResultCache {
    results: DashMap<String, (TaskResult, Instant)>,
    waiters: DashMap<String, Sender<TaskResult>>,
}

impl ResultCache {
    fn new() -> Self {
        Self {
            results: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    /// Register a completion channel for `task_id`; `None` when the id is
    /// already in flight
    fn try_register_waiter(&self, task_id: &str) -> Option<Receiver<TaskResult>> {
        match self.waiters.entry(task_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (sender, receiver) = channel::bounded(1);
                vacant.insert(sender);
                Some(receiver)
            }
        }
    }

    fn remove_waiter(&self, task_id: &str) -> Option<Sender<TaskResult>> {
        self.waiters.remove(task_id).map(|(_, sender)| sender)
    }

    /// Publish a finished result; returns true when a submitter was still
    /// waiting and received it
    fn publish(&self, result: TaskResult) -> bool {
        let task_id = result.task_id.clone();
        self.results
            .insert(task_id.clone(), (result.clone(), Instant::now()));

        self.waiters
            .remove(&task_id)
            .is_some_and(|(_, waiter)| waiter.send(result).is_ok())
    }

    fn take_result(&self, task_id: &str) {
        self.results.remove(task_id);
    }

    fn evict_stale(&self, ttl: Duration) -> usize {
        let before = self.results.len();
        self.results.retain(|_, (_, published)| published.elapsed() < ttl);
        before.saturating_sub(self.results.len())
    }
}

/// Pool-wide cumulative counters
#[derive(Debug, Default)]
struct PoolCounters {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_rejected: AtomicU64,
    in_flight: AtomicU64,
}

impl PoolCounters {
    fn reset(&self) {
        self.tasks_submitted.store(0, Ordering::Relaxed);
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.tasks_rejected.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Workers currently dispatched to
    pub active_workers: usize,

    /// Tasks waiting in the priority queues
    pub queue_depth: usize,

    /// Queue capacity
    pub queue_capacity: usize,

    /// `queue_depth / queue_capacity`
    pub queue_utilization: f64,

    /// Tasks accepted since the last reset
    pub tasks_submitted: u64,

    /// Tasks finished successfully since the last reset
    pub tasks_completed: u64,

    /// Tasks failed or timed out since the last reset
    pub tasks_failed: u64,

    /// Submissions rejected at capacity since the last reset
    pub tasks_rejected: u64,

    /// `completed / (completed + failed)`, 1.0 when nothing finished yet
    pub success_rate: f64,
}

/// Tri-state pool health derived from the cumulative failure rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealthStatus {
    /// Failure rate at or below 10%
    Healthy,
    /// Failure rate between 10% and 25%
    Degraded,
    /// Failure rate above 25%
    Unhealthy,
}

impl PoolHealthStatus {
    /// Classify a failure rate in [0, 1]
    #[must_use]
    pub fn from_failure_rate(rate: f64) -> Self {
        if rate <= 0.10_f64 {
            Self::Healthy
        } else if rate <= 0.25_f64 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

/// Pool health report
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    /// Derived tri-state status
    pub status: PoolHealthStatus,

    /// Failure rate the status was derived from
    pub failure_rate: f64,

    /// Counters and occupancy backing the status
    pub stats: PoolStats,
}

/// Shutdown signal shared with a worker thread
#[derive(Debug, Clone, Default)]
struct WorkerSignals {
    /// Finish the backlog, then exit
    stopping: Arc<AtomicBool>,

    /// Exit as soon as the current task finishes, abandoning the backlog
    shutdown: Arc<AtomicBool>,
}

/// A live worker slot
struct WorkerHandle {
    id: WorkerId,
    sender: Sender<Task>,
    signals: WorkerSignals,
    thread: Option<thread::JoinHandle<()>>,
}

/// Priority-aware, dynamically sized worker pool
pub struct WorkerPool {
    config: PoolConfig,
    registry: Arc<OperationRegistry>,
    balancer: Arc<LoadBalancer>,
    queue: Arc<PriorityQueue>,
    cache: Arc<ResultCache>,
    counters: Arc<PoolCounters>,
    workers: Arc<Mutex<Vec<WorkerHandle>>>,
    /// Replaced worker slots still draining their backlog
    retired: Mutex<Vec<WorkerHandle>>,
    active_workers: Arc<AtomicUsize>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
    dispatcher_running: Arc<AtomicBool>,
    is_running: AtomicBool,
    accepting: AtomicBool,
}

impl WorkerPool {
    /// Create new worker pool (not yet running)
    ///
    /// # Errors
    ///
    /// Returns error if the pool bounds or queue capacity are invalid
    pub fn new(config: PoolConfig, registry: Arc<OperationRegistry>) -> EngineResult<Self> {
        if config.min_workers == 0 || config.min_workers > config.max_workers {
            return Err(EngineError::ConfigError {
                field: "min_workers must be in 1..=max_workers".to_string(),
            });
        }
        if config.queue_capacity == 0 {
            return Err(EngineError::ConfigError {
                field: "queue_capacity must be > 0".to_string(),
            });
        }

        let balancer = Arc::new(LoadBalancer::new(config.max_workers)?);
        let queue = Arc::new(PriorityQueue::new(config.queue_capacity));

        Ok(Self {
            config,
            registry,
            balancer,
            queue,
            cache: Arc::new(ResultCache::new()),
            counters: Arc::new(PoolCounters::default()),
            workers: Arc::new(Mutex::new(Vec::new())),
            retired: Mutex::new(Vec::new()),
            active_workers: Arc::new(AtomicUsize::new(0)),
            dispatcher: Mutex::new(None),
            dispatcher_running: Arc::new(AtomicBool::new(false)),
            is_running: AtomicBool::new(false),
            accepting: AtomicBool::new(false),
        })
    }

    /// Start workers and the dispatcher
    ///
    /// # Errors
    ///
    /// Returns error if the pool is already running or a thread fails to
    /// start
    pub fn start(&self) -> EngineResult<()> {
        if self.is_running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyRunning);
        }

        {
            let mut workers = self.workers.lock();
            for slot in 0..self.config.min_workers {
                workers.push(self.spawn_worker(slot)?);
            }
        }
        self.active_workers
            .store(self.config.min_workers, Ordering::Release);

        self.dispatcher_running.store(true, Ordering::Release);
        let queue = Arc::clone(&self.queue);
        let balancer = Arc::clone(&self.balancer);
        let workers = Arc::clone(&self.workers);
        let cache = Arc::clone(&self.cache);
        let counters = Arc::clone(&self.counters);
        let active = Arc::clone(&self.active_workers);
        let running = Arc::clone(&self.dispatcher_running);

        let handle = thread::Builder::new()
            .name("mnema-dispatcher".to_string())
            .spawn(move || {
                Self::dispatcher_loop(&queue, &balancer, &workers, &cache, &counters, &active, &running);
            })
            .map_err(|e| EngineError::ConfigError {
                field: format!("Failed to start dispatcher thread: {e}"),
            })?;
        *self.dispatcher.lock() = Some(handle);

        self.accepting.store(true, Ordering::Release);
        tracing::info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            queue_capacity = self.config.queue_capacity,
            "worker pool started"
        );
        Ok(())
    }

    /// Submit a task and block until its result or the task's own timeout
    ///
    /// # Errors
    ///
    /// Returns error if the pool is not accepting work or the task id is
    /// already in flight; queue-full and timeout outcomes are reported as
    /// failed results, not errors
    pub fn submit(&self, task: Task) -> EngineResult<TaskResult> {
        let timeout = task.timeout;
        self.submit_with_timeout(task, timeout)
    }

    /// Submit a task with an explicit wait budget
    ///
    /// # Errors
    ///
    /// Returns error if the pool is not accepting work or the task id is
    /// already in flight
    pub fn submit_with_timeout(&self, task: Task, timeout: Duration) -> EngineResult<TaskResult> {
        if !self.is_running() || !self.accepting.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }

        // Full queue: report immediately instead of blocking the submitter.
        if self.queue.len() >= self.config.queue_capacity {
            self.counters.tasks_rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(TaskResult::failure(
                task.task_id,
                "unknown",
                QUEUE_FULL_ERROR,
                0.0_f64,
                None,
            ));
        }

        let task_id = task.task_id.clone();
        let Some(receiver) = self.cache.try_register_waiter(&task_id) else {
            return Err(EngineError::DuplicateTask { task_id });
        };

        if self.queue.push(task).is_err() {
            // Lost the capacity race to a concurrent submitter.
            self.cache.remove_waiter(&task_id);
            self.counters.tasks_rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(TaskResult::failure(
                task_id,
                "unknown",
                QUEUE_FULL_ERROR,
                0.0_f64,
                None,
            ));
        }
        self.counters.tasks_submitted.fetch_add(1, Ordering::Relaxed);

        if self.config.enable_dynamic_scaling {
            self.autoscale();
        }

        match receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.cache.take_result(&task_id);
                Ok(result)
            }
            Err(_) => self.finish_timed_out(&task_id, &receiver, timeout),
        }
    }

    /// Resolve a submission whose deadline elapsed
    ///
    /// Removing the waiter decides who accounts for the task: if the worker
    /// already claimed it, the real result is moments away on the channel.
    fn finish_timed_out(
        &self,
        task_id: &str,
        receiver: &Receiver<TaskResult>,
        timeout: Duration,
    ) -> EngineResult<TaskResult> {
        if self.cache.remove_waiter(task_id).is_none() {
            if let Ok(result) = receiver.recv_timeout(Duration::from_millis(5)) {
                self.cache.take_result(task_id);
                return Ok(result);
            }
        }

        self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(task_id, ?timeout, "task abandoned after timeout");
        Ok(TaskResult::failure(
            task_id,
            "unknown",
            TIMEOUT_ERROR,
            timeout.as_secs_f64() * 1000.0_f64,
            None,
        ))
    }

    /// Resize the pool to `target` workers, clamped to the configured bounds
    ///
    /// Scale-down never abandons work: replaced workers finish their backlog
    /// before exiting.
    ///
    /// # Errors
    ///
    /// Returns error if the pool is not running or a worker thread fails to
    /// start
    pub fn resize(&self, target: usize) -> EngineResult<usize> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }

        let target = target.clamp(self.config.min_workers, self.config.max_workers);
        let mut workers = self.workers.lock();
        let active = workers.len();

        if target > active {
            for slot in active..target {
                workers.push(self.spawn_worker(slot)?);
            }
            tracing::info!(from = active, to = target, "scaled worker pool up");
        } else if target < active {
            let mut retired = self.retired.lock();
            for handle in workers.drain(target..) {
                handle.signals.stopping.store(true, Ordering::Release);
                retired.push(handle);
            }
            tracing::info!(from = active, to = target, "scaled worker pool down");
        }

        self.active_workers.store(target, Ordering::Release);
        Ok(target)
    }

    /// Stop the pool
    ///
    /// With `wait` set, queued and in-flight tasks drain before workers are
    /// torn down; otherwise they are abandoned.
    ///
    /// # Errors
    ///
    /// Returns error if the pool is not running
    pub fn shutdown(&self, wait: bool) -> EngineResult<()> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        self.accepting.store(false, Ordering::Release);

        if wait {
            while !self.queue.is_empty() || self.counters.in_flight.load(Ordering::Acquire) > 0 {
                thread::sleep(IDLE_POLL);
            }
        }

        self.dispatcher_running.store(false, Ordering::Release);
        if let Some(handle) = self.dispatcher.lock().take() {
            if !join_with_timeout(handle, JOIN_TIMEOUT) {
                tracing::warn!("dispatcher did not stop within the join timeout");
            }
        }

        let drained: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock();
            let mut retired = self.retired.lock();
            workers.drain(..).chain(retired.drain(..)).collect()
        };

        for handle in &drained {
            if wait {
                handle.signals.stopping.store(true, Ordering::Release);
            } else {
                handle.signals.shutdown.store(true, Ordering::Release);
            }
        }
        for mut handle in drained {
            if let Some(thread) = handle.thread.take() {
                if !join_with_timeout(thread, JOIN_TIMEOUT) {
                    tracing::warn!(worker = %handle.id, "worker did not stop within the join timeout");
                }
            }
        }

        self.active_workers.store(0, Ordering::Release);
        self.is_running.store(false, Ordering::Release);
        tracing::info!(waited = wait, "worker pool stopped");
        Ok(())
    }

    /// Check if pool is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Number of workers currently dispatched to
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    /// Tasks waiting in the priority queues
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Queue sizes by priority (critical, high, medium, low)
    #[must_use]
    pub fn queue_stats(&self) -> (usize, usize, usize, usize) {
        self.queue.stats()
    }

    /// Per-worker load snapshots for the active slots
    #[must_use]
    pub fn worker_loads(&self) -> Vec<super::WorkerLoadSnapshot> {
        self.balancer.snapshot(self.active_workers())
    }

    /// Point-in-time statistics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> PoolStats {
        let queue_depth = self.queue.len();
        let completed = self.counters.tasks_completed.load(Ordering::Relaxed);
        let failed = self.counters.tasks_failed.load(Ordering::Relaxed);
        let finished = completed + failed;

        PoolStats {
            active_workers: self.active_workers(),
            queue_depth,
            queue_capacity: self.config.queue_capacity,
            queue_utilization: queue_depth as f64 / self.config.queue_capacity as f64,
            tasks_submitted: self.counters.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: completed,
            tasks_failed: failed,
            tasks_rejected: self.counters.tasks_rejected.load(Ordering::Relaxed),
            success_rate: if finished == 0 {
                1.0_f64
            } else {
                completed as f64 / finished as f64
            },
        }
    }

    /// Health derived from the cumulative failure rate since the last reset
    #[must_use]
    pub fn health(&self) -> PoolHealth {
        let stats = self.stats();
        let failure_rate = 1.0_f64 - stats.success_rate;
        PoolHealth {
            status: PoolHealthStatus::from_failure_rate(failure_rate),
            failure_rate,
            stats,
        }
    }

    /// Zero the cumulative counters
    pub fn reset(&self) {
        self.counters.reset();
    }

    /// Target worker count for a queue occupancy ratio
    fn scale_target(&self, occupancy: f64) -> usize {
        scale_target(occupancy, self.config.min_workers, self.config.max_workers)
    }

    /// Queue-depth driven resize, invoked from `submit`
    fn autoscale(&self) {
        #[allow(clippy::cast_precision_loss)]
        let occupancy = self.queue.len() as f64 / self.config.queue_capacity as f64;
        let target = self.scale_target(occupancy);
        let active = self.active_workers();

        if let Some(target) = scaling_decision(active, target) {
            if let Err(e) = self.resize(target) {
                tracing::warn!(error = %e, "automatic resize failed");
            }
        }
    }

    /// Spawn a worker for `slot`
    fn spawn_worker(&self, slot: usize) -> EngineResult<WorkerHandle> {
        let worker_id = WorkerId::from_raw(slot as u64);
        let (sender, receiver) = channel::unbounded();
        let signals = WorkerSignals::default();

        let registry = Arc::clone(&self.registry);
        let balancer = Arc::clone(&self.balancer);
        let cache = Arc::clone(&self.cache);
        let counters = Arc::clone(&self.counters);
        let thread_signals = signals.clone();

        let thread = thread::Builder::new()
            .name(format!("mnema-worker-{slot}"))
            .spawn(move || {
                Self::worker_loop(
                    worker_id,
                    &receiver,
                    &registry,
                    &balancer,
                    &cache,
                    &counters,
                    &thread_signals,
                );
            })
            .map_err(|e| EngineError::WorkerError {
                worker_id,
                reason: format!("Failed to start worker thread: {e}"),
            })?;

        Ok(WorkerHandle {
            id: worker_id,
            sender,
            signals,
            thread: Some(thread),
        })
    }

    /// Worker main loop: pull, invoke, publish, record
    fn worker_loop(
        worker_id: WorkerId,
        task_receiver: &Receiver<Task>,
        registry: &Arc<OperationRegistry>,
        balancer: &Arc<LoadBalancer>,
        cache: &Arc<ResultCache>,
        counters: &Arc<PoolCounters>,
        signals: &WorkerSignals,
    ) {
        loop {
            if signals.shutdown.load(Ordering::Acquire) {
                break;
            }
            if signals.stopping.load(Ordering::Acquire) && task_receiver.is_empty() {
                break;
            }

            match task_receiver.recv_timeout(IDLE_POLL) {
                Ok(task) => {
                    let result = Self::run_task(&task, worker_id, registry);
                    let elapsed_ms = result.elapsed_ms;
                    let delivered = cache.publish(result.clone());

                    if delivered {
                        if result.success {
                            counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
                        } else {
                            counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
                        }
                    } else {
                        // Submitter already received a timeout and accounted
                        // for the task; the cached result ages out.
                        tracing::debug!(
                            task_id = %task.task_id,
                            worker = %worker_id,
                            "result published after submitter gave up"
                        );
                    }

                    // Recorded even for abandoned tasks: the worker genuinely
                    // spent this time.
                    balancer.record_completion(worker_id, elapsed_ms, task_receiver.len());
                    counters.in_flight.fetch_sub(1, Ordering::AcqRel);
                }
                Err(channel::RecvTimeoutError::Timeout) => {}
                Err(channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Resolve and invoke the task's operation
    fn run_task(task: &Task, worker_id: WorkerId, registry: &Arc<OperationRegistry>) -> TaskResult {
        let started = Instant::now();

        let Some(operation) = registry.get(&task.operation_name) else {
            return TaskResult::failure(
                task.task_id.clone(),
                "unknown",
                format!("operation not found: {}", task.operation_name),
                elapsed_ms(started),
                Some(worker_id),
            );
        };

        match operation.invoke(&task.arguments) {
            Ok(value) => TaskResult::success(
                task.task_id.clone(),
                operation.layer(),
                value,
                elapsed_ms(started),
                worker_id,
            ),
            Err(e) => TaskResult::failure(
                task.task_id.clone(),
                operation.layer(),
                e.to_string(),
                elapsed_ms(started),
                Some(worker_id),
            ),
        }
    }

    /// Dispatcher main loop: drain the queues in priority order and hand
    /// each task to the least-loaded idle worker
    ///
    /// A task is only popped once a worker can take it immediately, so
    /// everything still waiting stays in the priority queues and a CRITICAL
    /// submission overtakes queued LOW work right up to the moment a worker
    /// frees.
    #[allow(clippy::too_many_arguments)]
    fn dispatcher_loop(
        queue: &Arc<PriorityQueue>,
        balancer: &Arc<LoadBalancer>,
        workers: &Arc<Mutex<Vec<WorkerHandle>>>,
        cache: &Arc<ResultCache>,
        counters: &Arc<PoolCounters>,
        active_workers: &Arc<AtomicUsize>,
        running: &Arc<AtomicBool>,
    ) {
        let mut last_cleanup = Instant::now();

        while running.load(Ordering::Acquire) {
            if last_cleanup.elapsed() >= CLEANUP_INTERVAL {
                let evicted = cache.evict_stale(STALE_RESULT_TTL);
                if evicted > 0 {
                    tracing::debug!(evicted, "evicted stale task results");
                }
                last_cleanup = Instant::now();
            }

            let count = active_workers.load(Ordering::Acquire);
            let Some(selected) = balancer.select_idle_worker(count) else {
                // Every worker is busy; leave queued work in the priority
                // queues until one frees.
                thread::sleep(DISPATCH_RETRY);
                continue;
            };

            let Some(task) = queue.pop() else {
                thread::sleep(IDLE_POLL);
                continue;
            };
            counters.in_flight.fetch_add(1, Ordering::AcqRel);

            let mut pending = Some((selected, task));
            while let Some((selected, task)) = pending.take() {
                if !running.load(Ordering::Acquire) {
                    tracing::warn!(task_id = %task.task_id, "task dropped during shutdown");
                    counters.in_flight.fetch_sub(1, Ordering::AcqRel);
                    break;
                }

                // Recorded before the send so a completion racing this
                // dispatch cannot leave the depth permanently skewed.
                balancer.record_dispatch(selected);
                let send_result = {
                    let workers = workers.lock();
                    match workers.get(usize::try_from(selected.raw()).unwrap_or(usize::MAX)) {
                        Some(handle) => handle.sender.send(task),
                        None => Err(channel::SendError(task)),
                    }
                };

                if let Err(channel::SendError(returned)) = send_result {
                    balancer.record_requeue(selected);
                    thread::sleep(DISPATCH_RETRY);
                    let count = active_workers.load(Ordering::Acquire);
                    let next = balancer.select_idle_worker(count).unwrap_or(selected);
                    pending = Some((next, returned));
                }
            }
        }
    }
}

/// Milliseconds elapsed since `started`
fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0_f64
}

/// Target worker count as a function of queue occupancy
///
/// Saturated queues (>= 80%) demand the full pool; the 50-80% band
/// interpolates between the bounds; anything lighter runs at the minimum.
fn scale_target(occupancy: f64, min_workers: usize, max_workers: usize) -> usize {
    if occupancy >= SCALE_SATURATION {
        max_workers
    } else if occupancy >= SCALE_KNEE {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let interpolated =
            min_workers + (((max_workers - min_workers) as f64) * occupancy).ceil() as usize;
        interpolated.min(max_workers)
    } else {
        min_workers
    }
}

/// Hysteresis: grow eagerly, shrink only past a 20% dead zone
#[allow(clippy::cast_precision_loss)]
fn scaling_decision(active: usize, target: usize) -> Option<usize> {
    if target > active || (target as f64) < (active as f64) * SCALE_DOWN_FACTOR {
        Some(target)
    } else {
        None
    }
}

/// Join a thread, giving up after `timeout`
fn join_with_timeout(handle: thread::JoinHandle<()>, timeout: Duration) -> bool {
    let (sender, receiver) = std::sync::mpsc::channel();
    let _joiner = thread::spawn(move || {
        let result = handle.join();
        let _ = sender.send(result);
    });
    receiver.recv_timeout(timeout).is_ok()
}
