//! # Invoker
//!
//! The cache never executes application code by itself. When a value has to
//! be regenerated it hands the stored [`RecomputationDescriptor`] to an
//! [`Invoker`] supplied at integration time.
//!
//! [`OperationTable`] is a ready-made invoker that maps
//! `(target, operation)` pairs to async closures.

use crate::error::{BoxError, RecomputeError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use reheat_core::RecomputationDescriptor;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Executes a recomputation descriptor and returns the serialized value.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Runs the call `descriptor` describes.
    ///
    /// # Errors
    ///
    /// Unknown targets or operations, and failures of the call itself.
    async fn invoke(
        &self,
        descriptor: &RecomputationDescriptor,
    ) -> Result<Vec<u8>, RecomputeError>;
}

type Operation = Arc<
    dyn Fn(RecomputationDescriptor) -> BoxFuture<'static, Result<Vec<u8>, RecomputeError>>
        + Send
        + Sync,
>;

/// [`Invoker`] dispatching on the descriptor's target and operation names.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use reheat::{Invoker, OperationTable};
/// use reheat_core::{CacheKey, Invocation};
/// use serde_json::json;
///
/// let table = OperationTable::new();
/// table.register_json("OrderService", "find_order", |descriptor| async move {
///     let id: u64 = serde_json::from_value(descriptor.arguments[0].clone())?;
///     Ok(format!("order #{id}"))
/// });
///
/// let descriptor = Invocation::new("OrderService", "find_order")
///     .with_arg("u64", json!(7))
///     .descriptor(CacheKey::from("7"));
///
/// let bytes = table.invoke(&descriptor).await.unwrap();
/// assert_eq!(bytes, br#""order #7""#.to_vec());
/// # });
/// ```
#[derive(Default)]
pub struct OperationTable {
    targets: RwLock<HashMap<String, HashMap<String, Operation>>>,
}

impl OperationTable {
    /// Empty table; every lookup fails until operations are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation returning the raw bytes to cache.
    pub fn register<F, Fut>(&self, target: &str, operation: &str, f: F)
    where
        F: Fn(RecomputationDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, BoxError>> + Send + 'static,
    {
        let name = operation.to_string();
        self.insert(
            target,
            operation,
            Arc::new(move |descriptor: RecomputationDescriptor| {
                let operation = name.clone();
                f(descriptor)
                    .map(move |result| {
                        result.map_err(|source| RecomputeError::Failed { operation, source })
                    })
                    .boxed()
            }),
        );
    }

    /// Registers an operation whose result is cached as JSON.
    pub fn register_json<F, Fut, T>(&self, target: &str, operation: &str, f: F)
    where
        F: Fn(RecomputationDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let name = operation.to_string();
        self.insert(
            target,
            operation,
            Arc::new(move |descriptor: RecomputationDescriptor| {
                let operation = name.clone();
                f(descriptor)
                    .map(move |result| match result {
                        Ok(value) => serde_json::to_vec(&value)
                            .map_err(|source| RecomputeError::Encode { operation, source }),
                        Err(source) => Err(RecomputeError::Failed { operation, source }),
                    })
                    .boxed()
            }),
        );
    }

    /// Whether `(target, operation)` is registered.
    pub fn contains(&self, target: &str, operation: &str) -> bool {
        self.targets
            .read()
            .get(target)
            .map_or(false, |operations| operations.contains_key(operation))
    }

    fn insert(&self, target: &str, operation: &str, f: Operation) {
        self.targets
            .write()
            .entry(target.to_string())
            .or_default()
            .insert(operation.to_string(), f);
    }

    fn lookup(&self, target: &str, operation: &str) -> Result<Operation, RecomputeError> {
        let targets = self.targets.read();
        let operations = targets
            .get(target)
            .ok_or_else(|| RecomputeError::UnknownTarget(target.to_string()))?;
        operations
            .get(operation)
            .cloned()
            .ok_or_else(|| RecomputeError::UnknownOperation {
                target: target.to_string(),
                operation: operation.to_string(),
            })
    }
}

#[async_trait]
impl Invoker for OperationTable {
    async fn invoke(
        &self,
        descriptor: &RecomputationDescriptor,
    ) -> Result<Vec<u8>, RecomputeError> {
        // Not holding the table lock across the call
        let operation = self.lookup(&descriptor.target, &descriptor.operation)?;
        operation(descriptor.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reheat_core::{CacheKey, Invocation};
    use serde_json::json;

    fn descriptor(target: &str, operation: &str) -> RecomputationDescriptor {
        Invocation::new(target, operation)
            .with_arg("u64", json!(3))
            .descriptor(CacheKey::from("3"))
    }

    #[tokio::test]
    async fn test_dispatches_on_target_and_operation() {
        let table = OperationTable::new();
        table.register("Math", "square", |d| async move {
            let n: u64 = serde_json::from_value(d.arguments[0].clone())?;
            Ok((n * n).to_string().into_bytes())
        });
        table.register("Math", "double", |d| async move {
            let n: u64 = serde_json::from_value(d.arguments[0].clone())?;
            Ok((n * 2).to_string().into_bytes())
        });

        assert_eq!(table.invoke(&descriptor("Math", "square")).await.unwrap(), b"9");
        assert_eq!(table.invoke(&descriptor("Math", "double")).await.unwrap(), b"6");
        assert!(table.contains("Math", "square"));
        assert!(!table.contains("Math", "cube"));
    }

    #[tokio::test]
    async fn test_unknown_target_and_operation() {
        let table = OperationTable::new();
        table.register("Math", "square", |_| async { Ok(Vec::new()) });

        assert!(matches!(
            table.invoke(&descriptor("Text", "square")).await,
            Err(RecomputeError::UnknownTarget(target)) if target == "Text"
        ));
        assert!(matches!(
            table.invoke(&descriptor("Math", "cube")).await,
            Err(RecomputeError::UnknownOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_operation_errors_are_wrapped() {
        let table = OperationTable::new();
        table.register("Math", "divide", |_| async {
            Err::<Vec<u8>, BoxError>("division by zero".into())
        });

        let err = table.invoke(&descriptor("Math", "divide")).await.unwrap_err();
        assert!(matches!(
            err,
            RecomputeError::Failed { ref operation, .. } if operation == "divide"
        ));
        assert_eq!(
            std::error::Error::source(&err).map(|e| e.to_string()),
            Some("division by zero".to_string())
        );
    }

    #[tokio::test]
    async fn test_register_json_serializes_result() {
        let table = OperationTable::new();
        table.register_json("Orders", "summary", |d| async move {
            Ok(json!({ "key": d.key.as_str(), "count": 2 }))
        });

        let bytes = table.invoke(&descriptor("Orders", "summary")).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({ "key": "3", "count": 2 }));
    }
}
