//! Mnema Core Configuration System
//!
//! Production-ready configuration with validation. All knobs are
//! construction-time; nothing here is mutated at runtime.

use crate::error::{CoreError, CoreResult};
use crate::tuner::TuningStrategy;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Core configuration for the Mnema execution engine
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CoreConfig {
    /// Worker pool configuration
    #[garde(dive)]
    pub pool: PoolConfig,

    /// Performance profiler configuration
    #[garde(dive)]
    pub profiler: ProfilerConfig,

    /// Auto-tuner configuration
    #[garde(dive)]
    pub tuner: TunerConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PoolConfig {
    /// Minimum number of worker threads
    #[garde(range(min = 1, max = 256))]
    pub min_workers: usize,

    /// Maximum number of worker threads
    #[garde(range(min = 1, max = 256))]
    pub max_workers: usize,

    /// Task queue capacity across all priority levels
    #[garde(range(min = 1, max = 1_000_000))]
    pub queue_capacity: usize,

    /// Resize the pool automatically from queue occupancy
    #[garde(skip)]
    pub enable_dynamic_scaling: bool,
}

/// Performance profiler configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProfilerConfig {
    /// Rolling metric window capacity, oldest records evicted first
    #[garde(range(min = 10, max = 1_000_000))]
    pub window_capacity: usize,
}

/// Auto-tuner configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TunerConfig {
    /// Minimum matching samples before any tuning decision
    #[garde(range(min = 1, max = 100_000))]
    pub min_samples: usize,

    /// Cadence at which the owning control loop re-tunes
    #[garde(skip)]
    pub adjustment_interval: Duration,

    /// Optimization bias
    #[garde(skip)]
    pub strategy: TuningStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: num_cpus::get().clamp(2, 16),
            queue_capacity: 1_000,
            enable_dynamic_scaling: true,
        }
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            window_capacity: 10_000,
        }
    }
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            adjustment_interval: Duration::from_secs(30),
            strategy: TuningStrategy::Balanced,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            profiler: ProfilerConfig::default(),
            tuner: TunerConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Configuration for local development
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn development() -> CoreResult<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Small, deterministic configuration for tests
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn test() -> CoreResult<Self> {
        let config = Self {
            pool: PoolConfig {
                min_workers: 1,
                max_workers: 2,
                queue_capacity: 100,
                enable_dynamic_scaling: false,
            },
            profiler: ProfilerConfig {
                window_capacity: 1_000,
            },
            tuner: TunerConfig {
                min_samples: 10,
                adjustment_interval: Duration::from_millis(10),
                strategy: TuningStrategy::Balanced,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if any field is out of range or the pool bounds are
    /// inconsistent
    pub fn validate(&self) -> CoreResult<()> {
        garde::Validate::validate(self, &())
            .map_err(|e| CoreError::validation("config", format!("Validation failed: {e}")))?;

        // Additional business logic validation
        if self.pool.min_workers > self.pool.max_workers {
            return Err(CoreError::validation(
                "pool",
                "min_workers cannot be larger than max_workers",
            ));
        }

        if self.tuner.adjustment_interval.is_zero() {
            return Err(CoreError::validation(
                "tuner",
                "adjustment_interval must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.pool.min_workers <= config.pool.max_workers);
    }

    #[test]
    fn test_test_profile_is_valid() {
        let config = CoreConfig::test();
        assert!(config.is_ok());
    }

    #[test]
    fn test_inverted_worker_bounds_rejected() {
        let mut config = CoreConfig::default();
        config.pool.min_workers = 8;
        config.pool.max_workers = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = CoreConfig::default();
        config.pool.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = CoreConfig::default();
        config.tuner.adjustment_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
