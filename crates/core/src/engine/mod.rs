//! Mnema Execution Engine
//!
//! Priority-aware worker pool with least-loaded dispatch for the Mnema
//! knowledge store. Tasks are admitted into per-priority queues, handed to
//! the least-loaded worker, and their results delivered back to the waiting
//! submitter through per-task completion channels.
//!
//! # Architecture
//!
//! ```text
//! submit()                dispatcher               workers
//!    │                        │                       │
//!    ▼                        ▼                       ▼
//! ┌──────────────┐   pop   ┌──────────────┐  send  ┌─────────────┐
//! │ PriorityQueue│ ──────► │ LoadBalancer │ ─────► │ worker N    │
//! │ C > H > M > L│         │ least-loaded │        │ invoke op   │
//! └──────────────┘         └──────────────┘        └──────┬──────┘
//!        ▲                                                │ publish
//!        │                 ┌──────────────┐               ▼
//!        └──── backlog ────│ ResultCache  │ ◄─────── TaskResult
//!                          └──────────────┘  signal waiting submitter
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{TaskPriority, WorkerId};

pub mod balancer;
pub mod pool;
pub mod registry;

pub use balancer::{LoadBalancer, WorkerLoadSnapshot};
pub use pool::{PoolHealth, PoolHealthStatus, PoolStats, WorkerPool};
pub use registry::{FnOperation, Operation, OperationRegistry};

/// Error string carried by results of submissions rejected at capacity
pub const QUEUE_FULL_ERROR: &str = "queue full";

/// Error string carried by results of submissions that ran out of time
pub const TIMEOUT_ERROR: &str = "timeout";

/// Engine-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Engine is not running
    #[error("Engine is not running")]
    NotRunning,

    /// Engine is already running
    #[error("Engine is already running")]
    AlreadyRunning,

    /// Task queue is full
    #[error("Task queue is full (capacity: {capacity})")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// A task with the same id is already in flight
    #[error("Duplicate task id in flight: {task_id}")]
    DuplicateTask {
        /// Task identifier
        task_id: String,
    },

    /// Operation is not registered
    #[error("Operation not found: {name}")]
    OperationNotFound {
        /// Operation name
        name: String,
    },

    /// Registered handler failed
    #[error("Operation failed: {name} - {reason}")]
    OperationFailed {
        /// Operation name
        name: String,
        /// Failure reason
        reason: String,
    },

    /// No workers available for dispatch
    #[error("No workers available")]
    NoWorkersAvailable,

    /// Worker error
    #[error("Worker error: {worker_id}, reason: {reason}")]
    WorkerError {
        /// Worker identifier
        worker_id: WorkerId,
        /// Error reason
        reason: String,
    },

    /// Operation timeout
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Duration in milliseconds
        duration_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {field}")]
    ConfigError {
        /// Field name
        field: String,
    },
}

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// A unit of submitted work
#[derive(Debug, Clone)]
pub struct Task {
    /// Caller-assigned identifier, unique among in-flight tasks
    pub task_id: String,

    /// Key into the operation registry
    pub operation_name: String,

    /// Opaque payload handed to the operation
    pub arguments: Value,

    /// Priority class, immutable once enqueued
    pub priority: TaskPriority,

    /// Budget the submitter is willing to wait for a result
    pub timeout: Duration,

    /// Creation timestamp, used to compute age
    pub created_at: Instant,
}

impl Task {
    /// Default submitter wait budget
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create new task with medium priority and the default timeout
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        operation_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            operation_name: operation_name.into(),
            arguments,
            priority: TaskPriority::default(),
            timeout: Self::DEFAULT_TIMEOUT,
            created_at: Instant::now(),
        }
    }

    /// Set priority class
    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set submitter wait budget
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get task age
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Outcome of a task, created exactly once when the task finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task identifier
    pub task_id: String,

    /// Provenance label of the layer that served the operation
    pub layer_name: String,

    /// Whether the operation completed successfully
    pub success: bool,

    /// Operation payload, present iff `success`
    pub result: Option<Value>,

    /// Failure message, present iff not `success`
    pub error: Option<String>,

    /// Wall-clock execution time in milliseconds
    pub elapsed_ms: f64,

    /// Worker that executed the task; `None` when no worker ever ran it
    pub worker_id: Option<WorkerId>,
}

impl TaskResult {
    /// Create successful result
    #[must_use]
    pub fn success(
        task_id: impl Into<String>,
        layer_name: impl Into<String>,
        result: Value,
        elapsed_ms: f64,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            layer_name: layer_name.into(),
            success: true,
            result: Some(result),
            error: None,
            elapsed_ms,
            worker_id: Some(worker_id),
        }
    }

    /// Create failed result
    #[must_use]
    pub fn failure(
        task_id: impl Into<String>,
        layer_name: impl Into<String>,
        error: impl Into<String>,
        elapsed_ms: f64,
        worker_id: Option<WorkerId>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            layer_name: layer_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            elapsed_ms,
            worker_id,
        }
    }

    /// Whether this result reports a submitter-side timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}
