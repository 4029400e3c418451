//! Engine Integration Tests
//!
//! End-to-end worker pool scenarios: priority drain order, queue-full
//! rejection, the timeout contract, resizing, health, and shutdown modes.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use serde_json::json;

use mnema_core::engine::{
    EngineError, OperationRegistry, PoolHealthStatus, Task, WorkerPool, QUEUE_FULL_ERROR,
    TIMEOUT_ERROR,
};
use mnema_core::types::TaskPriority;
use mnema_core::PoolConfig;

/// Execution log shared with the `mark` operation
type ExecutionLog = Arc<Mutex<Vec<String>>>;

fn single_worker_config(queue_capacity: usize) -> PoolConfig {
    PoolConfig {
        min_workers: 1,
        max_workers: 1,
        queue_capacity,
        enable_dynamic_scaling: false,
    }
}

/// Registry with a blocking `hold` operation and an order-recording `mark`
/// operation; the returned sender releases one `hold` invocation per send
fn gated_registry(log: &ExecutionLog) -> (Arc<OperationRegistry>, channel::Sender<()>) {
    let registry = Arc::new(OperationRegistry::new());
    let (release, gate): (channel::Sender<()>, Receiver<()>) = channel::bounded(8);

    registry.register_fn("hold", "test", move |_| {
        let _ = gate.recv_timeout(Duration::from_secs(5));
        Ok(json!(null))
    });

    let log = Arc::clone(log);
    registry.register_fn("mark", "test", move |args| {
        let id = args
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();
        log.lock().push(id);
        Ok(json!(null))
    });

    (registry, release)
}

fn submit_in_thread(
    pool: &Arc<WorkerPool>,
    task: Task,
) -> thread::JoinHandle<Result<mnema_core::TaskResult, EngineError>> {
    let pool = Arc::clone(pool);
    thread::spawn(move || pool.submit(task))
}

#[test]
fn test_pool_creation_and_start_stop() {
    let registry = Arc::new(OperationRegistry::new());
    let pool = WorkerPool::new(single_worker_config(16), registry).expect("valid config");

    assert!(!pool.is_running());
    pool.start().expect("start");
    assert!(pool.is_running());
    assert_eq!(pool.active_workers(), 1);

    assert!(matches!(pool.start(), Err(EngineError::AlreadyRunning)));

    pool.shutdown(true).expect("shutdown");
    assert!(!pool.is_running());
    assert!(matches!(pool.shutdown(true), Err(EngineError::NotRunning)));
}

#[test]
fn test_invalid_pool_bounds_rejected() {
    let registry = Arc::new(OperationRegistry::new());
    let inverted = PoolConfig {
        min_workers: 4,
        max_workers: 2,
        queue_capacity: 16,
        enable_dynamic_scaling: false,
    };
    assert!(WorkerPool::new(inverted, Arc::clone(&registry)).is_err());

    let no_queue = PoolConfig {
        min_workers: 1,
        max_workers: 2,
        queue_capacity: 0,
        enable_dynamic_scaling: false,
    };
    assert!(WorkerPool::new(no_queue, registry).is_err());
}

#[test]
fn test_echo_roundtrip() {
    let registry = Arc::new(OperationRegistry::new());
    registry.register_fn("echo", "core", |args| Ok(args.clone()));

    let pool = WorkerPool::new(single_worker_config(16), registry).expect("valid config");
    pool.start().expect("start");

    let result = pool
        .submit(Task::new("t-1", "echo", json!({"q": "recent meetings"})))
        .expect("submit");
    assert!(result.success);
    assert_eq!(result.result, Some(json!({"q": "recent meetings"})));
    assert_eq!(result.layer_name, "core");
    assert!(result.worker_id.is_some());
    assert!(result.elapsed_ms >= 0.0_f64);

    pool.shutdown(true).expect("shutdown");
}

#[test]
fn test_unknown_operation_fails_task_not_pool() {
    let registry = Arc::new(OperationRegistry::new());
    registry.register_fn("echo", "core", |args| Ok(args.clone()));

    let pool = WorkerPool::new(single_worker_config(16), registry).expect("valid config");
    pool.start().expect("start");

    let result = pool
        .submit(Task::new("t-1", "missing", json!(null)))
        .expect("submit");
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .is_some_and(|e| e.contains("operation not found")));

    // the pool keeps serving after a per-task failure
    let ok = pool
        .submit(Task::new("t-2", "echo", json!(1)))
        .expect("submit");
    assert!(ok.success);

    pool.shutdown(true).expect("shutdown");
}

/// Scenario: with one busy worker, 3 CRITICAL and 2 LOW queued tasks run
/// all-critical-first no matter the submission interleaving.
#[test]
fn test_critical_drains_before_low_with_one_worker() {
    let log: ExecutionLog = Arc::new(Mutex::new(Vec::new()));
    let (registry, release) = gated_registry(&log);

    let pool = Arc::new(WorkerPool::new(single_worker_config(16), registry).expect("valid config"));
    pool.start().expect("start");

    // Occupy the single worker so everything below stays queued.
    let holder = submit_in_thread(
        &pool,
        Task::new("hold", "hold", json!(null)).with_timeout(Duration::from_secs(10)),
    );
    thread::sleep(Duration::from_millis(50));

    // Lows submitted before criticals; criticals must still run first.
    let mut submitters = Vec::new();
    for (id, priority) in [
        ("l1", TaskPriority::Low),
        ("l2", TaskPriority::Low),
        ("c1", TaskPriority::Critical),
        ("c2", TaskPriority::Critical),
        ("c3", TaskPriority::Critical),
    ] {
        submitters.push(submit_in_thread(
            &pool,
            Task::new(id, "mark", json!({"id": id}))
                .with_priority(priority)
                .with_timeout(Duration::from_secs(10)),
        ));
        thread::sleep(Duration::from_millis(20));
    }

    release.send(()).expect("release gate");
    assert!(holder.join().expect("holder thread").expect("hold").success);
    for submitter in submitters {
        assert!(submitter.join().expect("thread").expect("submit").success);
    }

    let order = log.lock().clone();
    assert_eq!(order, vec!["c1", "c2", "c3", "l1", "l2"]);

    pool.shutdown(true).expect("shutdown");
}

/// Scenario: with the queue at capacity and no free worker, the next
/// submission returns `queue full` immediately instead of blocking.
#[test]
fn test_full_queue_rejects_without_blocking() {
    let log: ExecutionLog = Arc::new(Mutex::new(Vec::new()));
    let (registry, release) = gated_registry(&log);

    let pool = Arc::new(WorkerPool::new(single_worker_config(4), registry).expect("valid config"));
    pool.start().expect("start");

    let holder = submit_in_thread(
        &pool,
        Task::new("hold", "hold", json!(null)).with_timeout(Duration::from_secs(10)),
    );
    thread::sleep(Duration::from_millis(50));

    let mut submitters = Vec::new();
    for i in 0..4 {
        submitters.push(submit_in_thread(
            &pool,
            Task::new(format!("q-{i}"), "mark", json!({"id": format!("q-{i}")}))
                .with_timeout(Duration::from_secs(10)),
        ));
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(pool.queue_depth(), 4);

    let started = Instant::now();
    let rejected = pool
        .submit(Task::new("overflow", "mark", json!({"id": "overflow"})))
        .expect("submit");
    assert!(!rejected.success);
    assert_eq!(rejected.error.as_deref(), Some(QUEUE_FULL_ERROR));
    assert!(rejected.worker_id.is_none());
    assert!(
        started.elapsed() < Duration::from_millis(100),
        "rejection must not block"
    );

    release.send(()).expect("release gate");
    assert!(holder.join().expect("holder thread").expect("hold").success);
    for submitter in submitters {
        assert!(submitter.join().expect("thread").expect("submit").success);
    }

    let stats = pool.stats();
    assert_eq!(stats.tasks_rejected, 1);
    assert!(!log.lock().iter().any(|id| id == "overflow"));

    pool.shutdown(true).expect("shutdown");
}

#[test]
fn test_timeout_surfaces_as_failed_result() {
    let log: ExecutionLog = Arc::new(Mutex::new(Vec::new()));
    let (registry, release) = gated_registry(&log);

    let pool = WorkerPool::new(single_worker_config(16), registry).expect("valid config");
    pool.start().expect("start");

    let started = Instant::now();
    let result = pool
        .submit(Task::new("slow", "hold", json!(null)).with_timeout(Duration::from_millis(50)))
        .expect("submit");

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(TIMEOUT_ERROR));
    assert!(result.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_secs(2));

    // the submitter accounted for the abandoned task
    assert_eq!(pool.stats().tasks_failed, 1);

    // the worker's late completion still feeds load tracking
    release.send(()).expect("release gate");
    thread::sleep(Duration::from_millis(100));
    let loads = pool.worker_loads();
    assert_eq!(loads.len(), 1);
    assert!(loads[0].samples >= 1, "late result must be recorded");

    pool.shutdown(true).expect("shutdown");
}

#[test]
fn test_duplicate_in_flight_task_id_rejected() {
    let log: ExecutionLog = Arc::new(Mutex::new(Vec::new()));
    let (registry, release) = gated_registry(&log);

    let pool = Arc::new(WorkerPool::new(single_worker_config(16), registry).expect("valid config"));
    pool.start().expect("start");

    let holder = submit_in_thread(
        &pool,
        Task::new("dup", "hold", json!(null)).with_timeout(Duration::from_secs(10)),
    );
    thread::sleep(Duration::from_millis(50));

    let duplicate = pool.submit(Task::new("dup", "mark", json!({"id": "dup"})));
    assert!(matches!(duplicate, Err(EngineError::DuplicateTask { .. })));

    release.send(()).expect("release gate");
    assert!(holder.join().expect("holder thread").expect("hold").success);

    // once delivered, the id is free again
    let reused = pool
        .submit(Task::new("dup", "mark", json!({"id": "dup"})))
        .expect("submit");
    assert!(reused.success);

    pool.shutdown(true).expect("shutdown");
}

#[test]
fn test_resize_clamps_to_bounds() {
    let registry = Arc::new(OperationRegistry::new());
    let config = PoolConfig {
        min_workers: 2,
        max_workers: 4,
        queue_capacity: 16,
        enable_dynamic_scaling: false,
    };
    let pool = WorkerPool::new(config, registry).expect("valid config");

    assert!(matches!(pool.resize(3), Err(EngineError::NotRunning)));

    pool.start().expect("start");
    assert_eq!(pool.active_workers(), 2);

    assert_eq!(pool.resize(100).expect("resize"), 4);
    assert_eq!(pool.active_workers(), 4);

    assert_eq!(pool.resize(0).expect("resize"), 2);
    assert_eq!(pool.active_workers(), 2);

    assert_eq!(pool.resize(3).expect("resize"), 3);
    assert_eq!(pool.active_workers(), 3);

    pool.shutdown(true).expect("shutdown");
}

#[test]
fn test_health_tracks_failure_rate() {
    let registry = Arc::new(OperationRegistry::new());
    registry.register_fn("echo", "core", |args| Ok(args.clone()));
    registry.register_fn("broken", "core", |_| {
        Err(EngineError::OperationFailed {
            name: "broken".to_string(),
            reason: "store unavailable".to_string(),
        })
    });

    let pool = WorkerPool::new(single_worker_config(16), registry).expect("valid config");
    pool.start().expect("start");

    for i in 0..8 {
        let ok = pool
            .submit(Task::new(format!("ok-{i}"), "echo", json!(i)))
            .expect("submit");
        assert!(ok.success);
    }
    for i in 0..2 {
        let failed = pool
            .submit(Task::new(format!("bad-{i}"), "broken", json!(null)))
            .expect("submit");
        assert!(!failed.success);
        assert!(failed
            .error
            .as_deref()
            .is_some_and(|e| e.contains("store unavailable")));
    }

    let health = pool.health();
    assert!((health.failure_rate - 0.2_f64).abs() < 0.01_f64);
    assert_eq!(health.status, PoolHealthStatus::Degraded);
    assert_eq!(health.stats.tasks_submitted, 10);
    assert_eq!(health.stats.tasks_completed, 8);
    assert_eq!(health.stats.tasks_failed, 2);

    pool.reset();
    let health = pool.health();
    assert_eq!(health.status, PoolHealthStatus::Healthy);
    assert_eq!(health.stats.tasks_submitted, 0);

    pool.shutdown(true).expect("shutdown");
}

#[test]
fn test_graceful_shutdown_drains_in_flight_work() {
    let registry = Arc::new(OperationRegistry::new());
    registry.register_fn("slow", "core", |args| {
        thread::sleep(Duration::from_millis(100));
        Ok(args.clone())
    });

    let pool = Arc::new(WorkerPool::new(single_worker_config(16), registry).expect("valid config"));
    pool.start().expect("start");

    let mut submitters = Vec::new();
    for i in 0..3 {
        submitters.push(submit_in_thread(
            &pool,
            Task::new(format!("slow-{i}"), "slow", json!(i))
                .with_timeout(Duration::from_secs(10)),
        ));
    }
    thread::sleep(Duration::from_millis(30));

    pool.shutdown(true).expect("shutdown");

    for submitter in submitters {
        let result = submitter.join().expect("thread").expect("submit");
        assert!(result.success, "queued work must drain on graceful shutdown");
    }
    assert_eq!(pool.stats().tasks_completed, 3);
}

#[test]
fn test_immediate_shutdown_abandons_queued_work() {
    let registry = Arc::new(OperationRegistry::new());
    let (release, gate): (channel::Sender<()>, Receiver<()>) = channel::bounded(1);
    registry.register_fn("hold", "test", move |_| {
        let _ = gate.recv_timeout(Duration::from_millis(500));
        Ok(json!(null))
    });
    registry.register_fn("echo", "core", |args| Ok(args.clone()));

    let pool = Arc::new(WorkerPool::new(single_worker_config(16), registry).expect("valid config"));
    pool.start().expect("start");

    let holder = submit_in_thread(
        &pool,
        Task::new("hold", "hold", json!(null)).with_timeout(Duration::from_secs(2)),
    );
    thread::sleep(Duration::from_millis(50));

    let mut queued = Vec::new();
    for i in 0..2 {
        queued.push(submit_in_thread(
            &pool,
            Task::new(format!("q-{i}"), "echo", json!(i))
                .with_timeout(Duration::from_millis(300)),
        ));
    }
    thread::sleep(Duration::from_millis(30));

    pool.shutdown(false).expect("shutdown");
    assert!(!pool.is_running());

    // abandoned submitters resolve through their own timeouts
    for submitter in queued {
        let result = submitter.join().expect("thread").expect("submit");
        assert!(!result.success);
        assert!(result.is_timeout());
    }
    drop(release);
    let _ = holder.join().expect("holder thread");
}

#[test]
fn test_dynamic_scaling_reacts_to_occupancy() {
    let log: ExecutionLog = Arc::new(Mutex::new(Vec::new()));
    let (registry, release) = gated_registry(&log);

    let config = PoolConfig {
        min_workers: 1,
        max_workers: 4,
        queue_capacity: 10,
        enable_dynamic_scaling: true,
    };
    let pool = Arc::new(WorkerPool::new(config, registry).expect("valid config"));
    pool.start().expect("start");
    assert_eq!(pool.active_workers(), 1);

    // saturate: one held task per worker slot, then load the queue past
    // the interpolation knee
    let mut holders = Vec::new();
    for i in 0..4 {
        holders.push(submit_in_thread(
            &pool,
            Task::new(format!("hold-{i}"), "hold", json!(null))
                .with_timeout(Duration::from_secs(10)),
        ));
        thread::sleep(Duration::from_millis(30));
    }
    let mut submitters = Vec::new();
    for i in 0..7 {
        submitters.push(submit_in_thread(
            &pool,
            Task::new(format!("q-{i}"), "mark", json!({"id": format!("q-{i}")}))
                .with_timeout(Duration::from_secs(10)),
        ));
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(50));

    let scaled = pool.active_workers();
    assert!(
        scaled > 1,
        "queue occupancy past the knee must scale the pool up, got {scaled}"
    );
    assert!(scaled <= 4);

    for _ in 0..4 {
        release.send(()).expect("release gate");
    }
    for holder in holders {
        assert!(holder.join().expect("thread").expect("hold").success);
    }
    for submitter in submitters {
        assert!(submitter.join().expect("thread").expect("submit").success);
    }

    pool.shutdown(true).expect("shutdown");
}
