//! Mnema Core Prelude
//!
//! Common imports for Mnema core functionality.
//! Import this module to get access to the most commonly used types and traits.

// Re-export core types
pub use crate::config::{CoreConfig, PoolConfig, ProfilerConfig, TunerConfig};
pub use crate::error::{CoreError, CoreResult};
pub use crate::types::{TaskPriority, WorkerId};

// Re-export subsystem types
pub use crate::engine::{
    EngineError, EngineResult, FnOperation, LoadBalancer, Operation, OperationRegistry,
    PoolHealth, PoolHealthStatus, PoolStats, Task, TaskResult, WorkerLoadSnapshot, WorkerPool,
};
pub use crate::profiler::{
    AggregateMetrics, CacheEffectiveness, PerformanceProfiler, QueryMetric,
};
pub use crate::tuner::{
    AutoTuner, MetricsSummary, TunerReport, TuningConfig, TuningStrategy, MAX_CONCURRENT,
    MIN_CONCURRENT,
};
pub use crate::{init, init_with_config, CoreInstance};

// Re-export commonly used external types
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant, SystemTime};
pub use tracing::{debug, error, info, warn};
pub use uuid::Uuid;

// Re-export performance types
pub use dashmap::DashMap;
pub use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

// Re-export validation
pub use garde::Validate;

/// Common result type alias
pub type Result<T> = CoreResult<T>;
