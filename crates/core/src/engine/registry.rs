//! Operation Registry
//!
//! Capability lookup from operation name to an invocable handler. The pool
//! resolves and invokes handlers through this registry without knowing what
//! an operation does.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::{EngineError, EngineResult};

/// An invocable operation exposed to the pool
///
/// Implementations must be cheap to share; the registry hands out `Arc`
/// clones to every worker.
pub trait Operation: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    /// Provenance label copied into [`super::TaskResult::layer_name`]
    fn layer(&self) -> &str;

    /// Execute the operation against opaque arguments
    ///
    /// # Errors
    ///
    /// Returns error if the handler fails; the pool wraps it into a failed
    /// task result rather than propagating.
    fn invoke(&self, arguments: &Value) -> EngineResult<Value>;
}

/// Closure-backed [`Operation`] adapter
pub struct FnOperation<F> {
    name: String,
    layer: String,
    handler: F,
}

impl<F> FnOperation<F>
where
    F: Fn(&Value) -> EngineResult<Value> + Send + Sync,
{
    /// Wrap a closure as a named operation
    pub fn new(name: impl Into<String>, layer: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            layer: layer.into(),
            handler,
        }
    }
}

impl<F> Operation for FnOperation<F>
where
    F: Fn(&Value) -> EngineResult<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn layer(&self) -> &str {
        &self.layer
    }

    fn invoke(&self, arguments: &Value) -> EngineResult<Value> {
        (self.handler)(arguments)
    }
}

/// Concurrent name → handler registry
#[derive(Default)]
pub struct OperationRegistry {
    operations: DashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
        }
    }

    /// Register an operation under its own name, replacing any previous
    /// handler with that name
    pub fn register(&self, operation: Arc<dyn Operation>) {
        self.operations
            .insert(operation.name().to_string(), operation);
    }

    /// Register a closure as an operation
    pub fn register_fn<F>(&self, name: impl Into<String>, layer: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> EngineResult<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnOperation::new(name, layer, handler)));
    }

    /// Remove an operation
    ///
    /// # Errors
    ///
    /// Returns error if no operation with that name is registered
    pub fn unregister(&self, name: &str) -> EngineResult<()> {
        self.operations
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::OperationNotFound {
                name: name.to_string(),
            })
    }

    /// Look up an operation by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Check whether an operation is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Number of registered operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_invoke() {
        let registry = OperationRegistry::new();
        registry.register_fn("echo", "core", |args| Ok(args.clone()));

        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 1);

        let op = registry.get("echo");
        assert!(op.is_some(), "registered operation should resolve");
        if let Some(op) = op {
            assert_eq!(op.layer(), "core");
            let out = op.invoke(&json!({"k": 1}));
            assert_eq!(out.ok(), Some(json!({"k": 1})));
        }
    }

    #[test]
    fn test_register_replaces_same_name() {
        let registry = OperationRegistry::new();
        registry.register_fn("op", "a", |_| Ok(json!(1)));
        registry.register_fn("op", "b", |_| Ok(json!(2)));

        assert_eq!(registry.len(), 1);
        if let Some(op) = registry.get("op") {
            assert_eq!(op.layer(), "b");
        }
    }

    #[test]
    fn test_unregister_missing() {
        let registry = OperationRegistry::new();
        let result = registry.unregister("absent");
        assert!(matches!(
            result,
            Err(EngineError::OperationNotFound { .. })
        ));
    }

    #[test]
    fn test_failing_handler() {
        let registry = OperationRegistry::new();
        registry.register_fn("broken", "core", |_| {
            Err(EngineError::OperationFailed {
                name: "broken".to_string(),
                reason: "store unavailable".to_string(),
            })
        });

        if let Some(op) = registry.get("broken") {
            assert!(op.invoke(&Value::Null).is_err());
        }
    }
}
