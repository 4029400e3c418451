//! Mnema Core Error System
//!
//! Error types for the execution core. Task-level failures (handler errors,
//! timeouts, queue-full rejections) travel inside `TaskResult` so callers
//! handle them uniformly; the types here cover the pool and configuration
//! surface itself. Nothing panics in production paths.

use std::time::Duration;
use thiserror::Error;

/// Core result type for all operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration could not be built
    #[error("Configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration
        message: String,
    },

    /// A configuration field failed validation
    #[error("Validation failed for field '{field}': {reason}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The worker pool or dispatch machinery failed
    #[error("Engine execution failed: {operation} - {reason}")]
    Engine {
        /// Operation that failed
        operation: String,
        /// Why it failed
        reason: String,
    },

    /// An operation exceeded its wait budget at the core surface
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Budget that was exhausted
        duration: Duration,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task payloads or metric records failed to (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error (use sparingly)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

// Convenience constructors for common errors
impl CoreError {
    /// Create configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create engine error
    pub fn engine(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create internal error (use sparingly)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

// Convert from module-specific errors
impl From<crate::engine::EngineError> for CoreError {
    fn from(err: crate::engine::EngineError) -> Self {
        Self::engine("engine_module", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CoreError::config("invalid queue capacity");
        assert!(matches!(err, CoreError::Configuration { .. }));

        let err = CoreError::validation("max_workers", "must be >= min_workers");
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn test_error_conversion() {
        let engine_err = crate::engine::EngineError::NotRunning;
        let core_err: CoreError = engine_err.into();
        assert!(matches!(core_err, CoreError::Engine { .. }));
        assert!(core_err.to_string().contains("not running"));
    }

    #[test]
    fn test_timeout_display() {
        let err = CoreError::timeout("submit", Duration::from_millis(250));
        assert!(err.to_string().contains("submit"));
    }
}
