//! Auto-Tuner - Strategy-Biased Feedback Control
//!
//! Turns the profiler's rolling aggregates into a new [`TuningConfig`], but
//! only once enough evidence exists. Insufficient samples are a normal,
//! silent no-op: premature tuning is worse than no tuning. The tuner never
//! mutates the pool; the caller applies the returned config on its own
//! cadence, keeping the feedback loop observable and testable.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::TunerConfig;
use crate::profiler::{AggregateMetrics, PerformanceProfiler};

/// Lower bound on per-call fan-out
pub const MIN_CONCURRENT: usize = 1;

/// Upper bound on per-call fan-out
pub const MAX_CONCURRENT: usize = 64;

/// p99 at or below this is a fast, interactive workload
const FAST_P99_MS: f64 = 100.0;

/// p99 at or above this calls for backing off concurrency
const SLOW_P99_MS: f64 = 500.0;

/// Floor on derived timeouts, guards degenerate windows
const TIMEOUT_FLOOR: Duration = Duration::from_millis(100);

/// Optimization bias applied when deriving a new config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuningStrategy {
    /// Fail fast: tightest timeouts, responsiveness over completion
    Latency,

    /// Tolerate tail latency to maximize completion rate
    Throughput,

    /// Middle ground between the two
    Balanced,
}

impl TuningStrategy {
    /// Timeout as a multiple of observed p99
    ///
    /// The multipliers are strictly ordered so that under identical metrics
    /// `Latency` always derives the shortest timeout and `Throughput` the
    /// longest.
    #[must_use]
    pub const fn timeout_multiplier(&self) -> f64 {
        match self {
            Self::Latency => 2.0,
            Self::Balanced => 3.0,
            Self::Throughput => 5.0,
        }
    }

    /// Short label for logging and reports
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::Throughput => "throughput",
            Self::Balanced => "balanced",
        }
    }
}

impl Default for TuningStrategy {
    fn default() -> Self {
        Self::Balanced
    }
}

/// Concurrency and timeout settings derived by the tuner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Per-call fan-out bound, always in `[MIN_CONCURRENT, MAX_CONCURRENT]`
    pub max_concurrent: usize,

    /// Suggested submitter wait budget
    pub timeout: Duration,

    /// Bias the config was derived under
    pub strategy: TuningStrategy,
}

impl TuningConfig {
    /// Starting config before any evidence has been collected
    #[must_use]
    pub fn initial(strategy: TuningStrategy) -> Self {
        Self {
            max_concurrent: (MAX_CONCURRENT / 8).max(MIN_CONCURRENT),
            timeout: Duration::from_secs(30),
            strategy,
        }
    }
}

/// Condensed view of the evidence behind the current config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Records in the profiler window
    pub total_count: usize,

    /// Mean latency over the window
    pub avg_latency_ms: f64,

    /// Tail latency over the window
    pub p99_ms: f64,

    /// Cache hits over the window
    pub cache_hit_rate: f64,
}

/// Strategy, current config, and the metrics they rest on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerReport {
    /// Active optimization bias
    pub strategy: TuningStrategy,

    /// Config most recently derived (or the initial one)
    pub current_config: TuningConfig,

    /// Evidence summary; `None` while the window is empty
    pub metrics_summary: Option<MetricsSummary>,
}

/// Feedback controller over an injected profiler
///
/// Pure function of the profiler window plus `current_config` and the
/// chosen strategy; it owns no clock, the caller re-tunes on its own
/// `adjustment_interval` cadence.
pub struct AutoTuner {
    profiler: Arc<PerformanceProfiler>,
    min_samples: usize,
    strategy: RwLock<TuningStrategy>,
    current: RwLock<TuningConfig>,
}

impl AutoTuner {
    /// Create tuner over a shared profiler
    #[must_use]
    pub fn new(profiler: Arc<PerformanceProfiler>, config: &TunerConfig) -> Self {
        Self {
            profiler,
            min_samples: config.min_samples.max(1),
            strategy: RwLock::new(config.strategy),
            current: RwLock::new(TuningConfig::initial(config.strategy)),
        }
    }

    /// Derive a new config from the window, or return the current one
    /// unchanged when fewer than `min_samples` records match
    ///
    /// With a `query_type` the evidence is restricted to that operation
    /// class; without one the whole window counts.
    pub fn get_optimized_config(&self, query_type: Option<&str>) -> TuningConfig {
        let aggregate = match query_type {
            Some(kind) => self.profiler.aggregate_by_type(kind),
            None => self.profiler.aggregate(),
        };

        let Some(aggregate) = aggregate else {
            return self.current.read().clone();
        };
        if aggregate.total_count < self.min_samples {
            tracing::debug!(
                samples = aggregate.total_count,
                required = self.min_samples,
                "insufficient evidence, keeping current config"
            );
            return self.current.read().clone();
        }

        let strategy = *self.strategy.read();
        let updated = self.derive(&aggregate, strategy);

        let mut current = self.current.write();
        if *current != updated {
            tracing::info!(
                max_concurrent = updated.max_concurrent,
                timeout_ms = updated.timeout.as_millis(),
                strategy = strategy.as_str(),
                p99_ms = aggregate.p99_ms,
                "tuning config adjusted"
            );
        }
        *current = updated.clone();
        updated
    }

    /// Switch bias for subsequent derivations without touching collected
    /// metrics
    pub fn update_strategy(&self, strategy: TuningStrategy) {
        *self.strategy.write() = strategy;
        self.current.write().strategy = strategy;
    }

    /// Active optimization bias
    #[must_use]
    pub fn strategy(&self) -> TuningStrategy {
        *self.strategy.read()
    }

    /// Config most recently derived (or the initial one)
    #[must_use]
    pub fn current_config(&self) -> TuningConfig {
        self.current.read().clone()
    }

    /// Strategy, current config, and evidence summary
    #[must_use]
    pub fn report(&self) -> TunerReport {
        let metrics_summary = self.profiler.aggregate().map(|a| MetricsSummary {
            total_count: a.total_count,
            avg_latency_ms: a.avg_latency_ms,
            p99_ms: a.p99_ms,
            cache_hit_rate: a.cache_hit_rate,
        });

        TunerReport {
            strategy: *self.strategy.read(),
            current_config: self.current.read().clone(),
            metrics_summary,
        }
    }

    /// p99 drives both knobs: low tails grow concurrency by half toward the
    /// bound, high tails halve it; the timeout is a strategy-biased multiple
    /// of p99
    fn derive(&self, aggregate: &AggregateMetrics, strategy: TuningStrategy) -> TuningConfig {
        let current = self.current.read().max_concurrent;

        let max_concurrent = if aggregate.p99_ms <= FAST_P99_MS {
            current + (current / 2).max(1)
        } else if aggregate.p99_ms >= SLOW_P99_MS {
            current / 2
        } else {
            current
        }
        .clamp(MIN_CONCURRENT, MAX_CONCURRENT);

        let tail_ms = aggregate.p99_ms.max(0.0_f64);
        let timeout = Duration::from_secs_f64(tail_ms * strategy.timeout_multiplier() / 1000.0_f64)
            .max(TIMEOUT_FLOOR);

        TuningConfig {
            max_concurrent,
            timeout,
            strategy,
        }
    }
}
