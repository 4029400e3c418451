//! Performance Profiler - Rolling Operation Metrics
//!
//! Session-durable record of completed operations and derived statistics.
//! Records are append-only and retained in a bounded rolling window, oldest
//! evicted first; every aggregate is recomputed from one locked snapshot so
//! percentiles never mix windows.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed operation, fed to the profiler by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetric {
    /// Metric identifier (uuid v4 unless overridden)
    pub id: String,

    /// Human label of the operation
    pub text: String,

    /// Operation class, the key for per-type aggregation
    #[serde(rename = "type")]
    pub query_type: String,

    /// Wall-clock completion time
    pub timestamp: DateTime<Utc>,

    /// End-to-end latency in milliseconds
    pub latency_ms: f64,

    /// Resident memory attributed to the operation
    pub memory_mb: f64,

    /// Whether a cache served the result
    pub cache_hit: bool,

    /// Number of records the operation returned
    pub result_count: usize,

    /// Provenance labels of the layers consulted
    pub layers_queried: Vec<String>,

    /// Per-layer latency breakdown in milliseconds
    pub layer_latencies: HashMap<String, f64>,

    /// Whether the operation succeeded
    pub success: bool,

    /// Whether layers were consulted in parallel
    pub parallel_execution: bool,

    /// Workers active when the operation ran
    pub concurrency_level: usize,
}

impl QueryMetric {
    /// Create a metric with generated id and current timestamp
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        query_type: impl Into<String>,
        latency_ms: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            query_type: query_type.into(),
            timestamp: Utc::now(),
            latency_ms,
            memory_mb: 0.0_f64,
            cache_hit: false,
            result_count: 0,
            layers_queried: Vec::new(),
            layer_latencies: HashMap::new(),
            success: true,
            parallel_execution: false,
            concurrency_level: 1,
        }
    }

    /// Override the generated id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Mark whether a cache served the result
    #[must_use]
    pub const fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    /// Mark success or failure
    #[must_use]
    pub const fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Attach one consulted layer and its latency share
    #[must_use]
    pub fn with_layer(mut self, layer: impl Into<String>, latency_ms: f64) -> Self {
        let layer = layer.into();
        self.layer_latencies.insert(layer.clone(), latency_ms);
        self.layers_queried.push(layer);
        self
    }

    /// Set the returned record count
    #[must_use]
    pub const fn with_result_count(mut self, result_count: usize) -> Self {
        self.result_count = result_count;
        self
    }

    /// Set attributed memory
    #[must_use]
    pub const fn with_memory_mb(mut self, memory_mb: f64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Record the concurrency conditions the operation ran under
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency_level: usize, parallel: bool) -> Self {
        self.concurrency_level = concurrency_level;
        self.parallel_execution = parallel;
        self
    }
}

/// Statistics derived from a set of matching metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMetrics {
    /// Number of matching records
    pub total_count: usize,

    /// Mean latency in milliseconds
    pub avg_latency_ms: f64,

    /// Median latency
    pub p50_ms: f64,

    /// 90th percentile latency
    pub p90_ms: f64,

    /// 95th percentile latency
    pub p95_ms: f64,

    /// 99th percentile latency
    pub p99_ms: f64,

    /// Cache hits over matching records
    pub cache_hit_rate: f64,
}

impl AggregateMetrics {
    /// Aggregate raw latency samples; `None` for an empty set
    #[must_use]
    fn from_samples(mut latencies: Vec<f64>, cache_hits: usize) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }

        let total_count = latencies.len();
        let sum: f64 = latencies.iter().sum();
        latencies.sort_by(f64::total_cmp);

        #[allow(clippy::cast_precision_loss)]
        Some(Self {
            total_count,
            avg_latency_ms: sum / total_count as f64,
            p50_ms: percentile(&latencies, 50.0_f64),
            p90_ms: percentile(&latencies, 90.0_f64),
            p95_ms: percentile(&latencies, 95.0_f64),
            p99_ms: percentile(&latencies, 99.0_f64),
            cache_hit_rate: cache_hits as f64 / total_count as f64,
        })
    }
}

/// Cache effectiveness across the window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEffectiveness {
    /// Hits over the full window
    pub overall: f64,

    /// Hit rate per operation class
    pub by_type: HashMap<String, f64>,
}

/// Deterministic percentile over ascending-sorted samples
///
/// Index `ceil(pct/100 * n) - 1`, clamped to `[0, n-1]`.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0_f64;
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = ((pct / 100.0_f64) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted.get(index).copied().unwrap_or(0.0_f64)
}

/// Thread-safe rolling window of completed-operation metrics
pub struct PerformanceProfiler {
    window: RwLock<VecDeque<QueryMetric>>,
    capacity: usize,
}

impl PerformanceProfiler {
    /// Create profiler with a bounded window
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            window: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
        }
    }

    /// Append a metric, evicting the oldest record at capacity
    pub fn record(&self, metric: QueryMetric) {
        let mut window = self.window.write();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(metric);
    }

    /// Number of retained records
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.read().len()
    }

    /// Check if the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.read().is_empty()
    }

    /// Window capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all retained records
    pub fn clear(&self) {
        self.window.write().clear();
    }

    /// Aggregate over every record in the window
    #[must_use]
    pub fn aggregate(&self) -> Option<AggregateMetrics> {
        let window = self.window.read();
        let latencies = window.iter().map(|m| m.latency_ms).collect();
        let hits = window.iter().filter(|m| m.cache_hit).count();
        AggregateMetrics::from_samples(latencies, hits)
    }

    /// Aggregate over records of one operation class
    #[must_use]
    pub fn aggregate_by_type(&self, query_type: &str) -> Option<AggregateMetrics> {
        let window = self.window.read();
        let matching: Vec<&QueryMetric> = window
            .iter()
            .filter(|m| m.query_type == query_type)
            .collect();

        let latencies = matching.iter().map(|m| m.latency_ms).collect();
        let hits = matching.iter().filter(|m| m.cache_hit).count();
        AggregateMetrics::from_samples(latencies, hits)
    }

    /// Aggregate over records that consulted one layer, using that layer's
    /// latency share where the breakdown recorded it
    #[must_use]
    pub fn aggregate_by_layer(&self, layer: &str) -> Option<AggregateMetrics> {
        let window = self.window.read();
        let matching: Vec<&QueryMetric> = window
            .iter()
            .filter(|m| {
                m.layer_latencies.contains_key(layer)
                    || m.layers_queried.iter().any(|l| l == layer)
            })
            .collect();

        let latencies = matching
            .iter()
            .map(|m| m.layer_latencies.get(layer).copied().unwrap_or(m.latency_ms))
            .collect();
        let hits = matching.iter().filter(|m| m.cache_hit).count();
        AggregateMetrics::from_samples(latencies, hits)
    }

    /// Cache hit rates over the full window and per operation class
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_effectiveness(&self) -> CacheEffectiveness {
        let window = self.window.read();
        let total = window.len();
        let hits = window.iter().filter(|m| m.cache_hit).count();

        let mut per_type: HashMap<String, (usize, usize)> = HashMap::new();
        for metric in window.iter() {
            let entry = per_type.entry(metric.query_type.clone()).or_insert((0, 0));
            entry.0 += 1;
            if metric.cache_hit {
                entry.1 += 1;
            }
        }

        CacheEffectiveness {
            overall: if total == 0 {
                0.0_f64
            } else {
                hits as f64 / total as f64
            },
            by_type: per_type
                .into_iter()
                .map(|(kind, (count, kind_hits))| (kind, kind_hits as f64 / count as f64))
                .collect(),
        }
    }

    /// Operation texts by descending frequency in the window
    #[must_use]
    pub fn trending(&self, limit: usize) -> Vec<(String, usize)> {
        let window = self.window.read();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for metric in window.iter() {
            *counts.entry(metric.text.clone()).or_insert(0) += 1;
        }
        drop(window);

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    /// `(id, latency_ms)` of records strictly above the requested latency
    /// percentile, longest first
    #[must_use]
    pub fn slow(&self, pct: f64, limit: usize) -> Vec<(String, f64)> {
        let window = self.window.read();
        if window.is_empty() {
            return Vec::new();
        }

        let mut sorted: Vec<f64> = window.iter().map(|m| m.latency_ms).collect();
        sorted.sort_by(f64::total_cmp);
        let threshold = percentile(&sorted, pct);

        let mut tail: Vec<(String, f64)> = window
            .iter()
            .filter(|m| m.latency_ms > threshold)
            .map(|m| (m.id.clone(), m.latency_ms))
            .collect();
        drop(window);

        tail.sort_by(|a, b| f64::total_cmp(&b.1, &a.1));
        tail.truncate(limit);
        tail
    }
}
