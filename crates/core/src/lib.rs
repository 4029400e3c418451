//! Mnema Core - Self-Tuning Concurrent Execution Engine
//!
//! This crate provides the execution core of the Mnema knowledge store: a
//! priority-aware worker pool with least-loaded dispatch, a rolling
//! performance profiler, and a feedback auto-tuner that adjusts concurrency
//! and timeouts from observed latency.
//!
//! # Features
//!
//! - **Strict priority admission**: CRITICAL drains before HIGH before
//!   MEDIUM before LOW, FIFO within a level
//! - **Zero-panic policy**: All operations return `Result<T, E>`
//! - **Safe dynamic resizing**: scale-down drains in-flight work, scale
//!   decisions carry a hysteresis dead zone against thrash
//! - **Decoupled control loop**: the tuner derives configs, the caller
//!   applies them; metrics flow the other way
//!
//! # Architecture
//!
//! The core is organized into several key modules:
//!
//! - [`engine`] - Worker pool, load balancer, and operation registry
//! - [`profiler`] - Rolling window of completed-operation metrics
//! - [`tuner`] - Strategy-biased feedback control over the profiler
//! - [`types`] - Worker identities and priority classes
//!
//! # Example
//!
//! ```rust
//! use mnema_core::{init_with_config, CoreConfig, CoreResult};
//!
//! fn main() -> CoreResult<()> {
//!     let config = CoreConfig::test()?;
//!     let core = init_with_config(config)?;
//!
//!     core.registry().register_fn("echo", "core", |args| Ok(args.clone()));
//!
//!     // In production you would call core.start(), submit tasks, and
//!     // core.stop(); we skip that here to avoid spawning threads in docs.
//!     Ok(())
//! }
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::large_stack_arrays,
    clippy::indexing_slicing,
    missing_docs
)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::correctness,
    clippy::suspicious,
    clippy::perf,
    clippy::style,
    clippy::complexity,
    clippy::unreachable,
    clippy::default_numeric_fallback,
    clippy::redundant_pattern_matching,
    clippy::manual_let_else,
    clippy::blocks_in_conditions,
    clippy::unnecessary_wraps,
    clippy::needless_pass_by_ref_mut,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::float_cmp,
    clippy::disallowed_methods
)]
#![allow(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Public modules
pub mod config;
pub mod error;
pub mod prelude;
pub mod types;

// Core functionality modules
pub mod engine;
pub mod profiler;
pub mod tuner;

// Re-exports for convenience
pub use config::{CoreConfig, PoolConfig, ProfilerConfig, TunerConfig};
pub use error::{CoreError, CoreResult};
pub use types::{TaskPriority, WorkerId};

// Re-export subsystem types for external use
pub use engine::{
    EngineError, EngineResult, Operation, OperationRegistry, PoolHealth, PoolHealthStatus,
    PoolStats, Task, TaskResult, WorkerPool,
};
pub use profiler::{AggregateMetrics, PerformanceProfiler, QueryMetric};
pub use tuner::{AutoTuner, TunerReport, TuningConfig, TuningStrategy};

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize Mnema core with the development configuration
///
/// This is a convenience function for quick setup. For custom bounds,
/// construct a [`CoreConfig`] and use [`init_with_config`].
///
/// # Errors
///
/// Returns error if initialization fails or configuration is invalid.
pub fn init() -> CoreResult<CoreInstance> {
    let config = CoreConfig::development()?;
    CoreInstance::new(config)
}

/// Initialize Mnema core with a custom configuration
///
/// # Errors
///
/// Returns error if initialization fails or configuration is invalid.
pub fn init_with_config(config: CoreConfig) -> CoreResult<CoreInstance> {
    CoreInstance::new(config)
}

/// Main Mnema core instance
///
/// Owns the worker pool, the operation registry, the profiler, and the
/// auto-tuner, and wires the two decoupled loops between them: every
/// [`submit`](Self::submit) feeds an observation into the profiler, and
/// [`tune`](Self::tune) applies the tuner's derived config back onto the
/// pool on the configured cadence.
pub struct CoreInstance {
    config: CoreConfig,
    registry: Arc<OperationRegistry>,
    pool: WorkerPool,
    profiler: Arc<PerformanceProfiler>,
    tuner: AutoTuner,
    last_tune: Mutex<Instant>,
}

impl CoreInstance {
    /// Create new core instance
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid or initialization fails.
    pub fn new(config: CoreConfig) -> CoreResult<Self> {
        config.validate()?;

        let registry = Arc::new(OperationRegistry::new());
        let pool = WorkerPool::new(config.pool.clone(), Arc::clone(&registry))?;
        let profiler = Arc::new(PerformanceProfiler::new(config.profiler.window_capacity));
        let tuner = AutoTuner::new(Arc::clone(&profiler), &config.tuner);

        Ok(Self {
            config,
            registry,
            pool,
            profiler,
            tuner,
            last_tune: Mutex::new(Instant::now()),
        })
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Get operation registry reference
    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Get worker pool reference
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Get profiler reference
    #[must_use]
    pub fn profiler(&self) -> &PerformanceProfiler {
        &self.profiler
    }

    /// Get auto-tuner reference
    #[must_use]
    pub const fn tuner(&self) -> &AutoTuner {
        &self.tuner
    }

    /// Start the worker pool
    ///
    /// # Errors
    ///
    /// Returns error if the pool is already running or fails to start.
    pub fn start(&self) -> CoreResult<()> {
        tracing::info!("Starting Mnema Core v{VERSION}");
        self.pool.start()?;
        Ok(())
    }

    /// Stop the worker pool, draining queued and in-flight work
    ///
    /// # Errors
    ///
    /// Returns error if the pool is not running.
    pub fn stop(&self) -> CoreResult<()> {
        tracing::info!("Stopping Mnema Core");
        self.pool.shutdown(true)?;
        Ok(())
    }

    /// Check if core is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Submit a task and record the observation
    ///
    /// Blocks until the task's result or its timeout, then feeds a
    /// [`QueryMetric`] for the completed operation into the profiler. This
    /// is the observation half of the feedback loop; [`tune`](Self::tune)
    /// is the control half.
    ///
    /// # Errors
    ///
    /// Returns error if the pool is not running or the task id is already
    /// in flight; queue-full and timeout outcomes come back as failed
    /// results.
    pub fn submit(&self, task: Task) -> CoreResult<TaskResult> {
        let operation_name = task.operation_name.clone();
        let result = self.pool.submit(task)?;

        let concurrency = self.pool.active_workers();
        self.profiler.record(
            QueryMetric::new(operation_name.clone(), operation_name, result.elapsed_ms)
                .with_success(result.success)
                .with_layer(result.layer_name.clone(), result.elapsed_ms)
                .with_concurrency(concurrency, concurrency > 1),
        );

        Ok(result)
    }

    /// Run one control-loop step if the adjustment interval has elapsed
    ///
    /// Derives an optimized config from the profiler and applies its
    /// concurrency onto the pool via [`WorkerPool::resize`]. Returns the
    /// applied config, or `None` when called inside the interval.
    ///
    /// # Errors
    ///
    /// Returns error if the pool resize fails.
    pub fn tune(&self) -> CoreResult<Option<TuningConfig>> {
        {
            let mut last = self.last_tune.lock();
            if last.elapsed() < self.config.tuner.adjustment_interval {
                return Ok(None);
            }
            *last = Instant::now();
        }

        let config = self.tuner.get_optimized_config(None);
        self.pool.resize(config.max_concurrent)?;
        Ok(Some(config))
    }

    /// Pool health derived from the cumulative failure rate
    #[must_use]
    pub fn health(&self) -> PoolHealth {
        self.pool.health()
    }
}
