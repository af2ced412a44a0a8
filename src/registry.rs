//! Handler registry
//!
//! Adapted from the teacher's workflow-type-keyed `WorkflowRegistry` /
//! `WorkflowFactory` pattern (`register::<W>()` keyed by `W::TYPE`), but
//! re-keyed to handler *name* rather than workflow type: a DAG step names
//! the handler it wants by string, and the registry resolves that name to
//! a boxed async handler plus its retry policy, per SPEC_FULL.md §4.8.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::CapabilityError;
use crate::reliability::RetryPolicy;

/// A registered handler: takes step input as JSON, returns output as JSON.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value, CapabilityError>;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, CapabilityError>> + Send,
{
    async fn call(&self, input: Value) -> Result<Value, CapabilityError> {
        (self)(input).await
    }
}

struct Entry {
    handler: Arc<dyn Handler>,
    retry_policy: RetryPolicy,
}

/// Maps handler names to their implementation and retry policy.
///
/// A DAG `Task` node names a handler by string; the orchestrator resolves
/// it through this registry at dispatch time rather than binding to a
/// concrete type at compile time, so workflow definitions stay purely data
/// (handler name + input template).
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Entry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a handler under `name` with its retry policy.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        retry_policy: RetryPolicy,
        handler: impl Handler + 'static,
    ) {
        self.entries.insert(
            name.into(),
            Entry {
                handler: Arc::new(handler),
                retry_policy,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn retry_policy(&self, name: &str) -> Option<&RetryPolicy> {
        self.entries.get(name).map(|e| &e.retry_policy)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.entries.get(name).map(|e| Arc::clone(&e.handler))
    }

    /// Invoke the named handler, or a [`RegistryError::UnknownHandler`] if
    /// it isn't registered. Unlike the teacher's silent-skip worker loop,
    /// an unknown handler is always a hard error here.
    pub async fn call(&self, name: &str, input: Value) -> Result<Value, RegistryError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownHandler(name.to_string()))?;

        entry
            .handler
            .call(input)
            .await
            .map_err(RegistryError::Handler)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    #[error(transparent)]
    Handler(#[from] CapabilityError),
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn double(input: Value) -> Result<Value, CapabilityError> {
        let n = input
            .get("n")
            .and_then(Value::as_i64)
            .ok_or_else(|| CapabilityError::permanent("missing n"))?;
        Ok(serde_json::json!({ "n": n * 2 }))
    }

    #[tokio::test]
    async fn register_and_call() {
        let mut registry = HandlerRegistry::new();
        registry.register("double", RetryPolicy::exponential(), double);

        assert!(registry.contains("double"));
        assert!(!registry.contains("unknown"));

        let output = registry
            .call("double", serde_json::json!({ "n": 21 }))
            .await
            .unwrap();
        assert_eq!(output, serde_json::json!({ "n": 42 }));
    }

    #[tokio::test]
    async fn unknown_handler_is_hard_error() {
        let registry = HandlerRegistry::new();
        let result = registry.call("nope", serde_json::json!({})).await;
        assert!(matches!(result, Err(RegistryError::UnknownHandler(_))));
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let mut registry = HandlerRegistry::new();
        registry.register("double", RetryPolicy::exponential(), double);

        let result = registry.call("double", serde_json::json!({})).await;
        assert!(matches!(result, Err(RegistryError::Handler(_))));
    }

    #[test]
    fn retry_policy_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register("double", RetryPolicy::exponential().with_max_attempts(7), double);
        assert_eq!(registry.retry_policy("double").unwrap().max_attempts, 7);
    }

    #[test]
    fn debug_lists_handler_names() {
        let mut registry = HandlerRegistry::new();
        registry.register("double", RetryPolicy::exponential(), double);
        let debug_str = format!("{:?}", registry);
        assert!(debug_str.contains("double"));
    }
}
