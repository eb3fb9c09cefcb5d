//! Dispatch: resolve handler and operation by name, coerce the payload,
//! invoke, and settle deferred results to exactly one outcome.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use serde_json::Value;
use tower::Service;

use super::operation::{DispatchError, DispatchRequest, OperationHandle, OperationOutput};
use super::registry::HandlerRegistry;

/// Resolves and invokes operations by name.
///
/// Cheap to clone; clones share the registry and the resolution cache.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    /// Resolved operation handles keyed by `(handler, operation)`.
    ///
    /// Append-only for the process lifetime: operations are static after
    /// startup, so entries are never invalidated. Duplicate fills under
    /// concurrent misses are harmless -- every fill is a pure function of
    /// the key.
    resolved: Arc<DashMap<(String, String), Arc<OperationHandle>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given registry.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            resolved: Arc::new(DashMap::new()),
        }
    }

    /// Resolves `(handler, operation)` to a cached handle.
    fn resolve(
        &self,
        handler: &str,
        operation: &str,
    ) -> Result<Arc<OperationHandle>, DispatchError> {
        let cache_key = (handler.to_string(), operation.to_string());
        if let Some(entry) = self.resolved.get(&cache_key) {
            return Ok(Arc::clone(entry.value()));
        }

        let registered = self
            .registry
            .get(handler)
            .ok_or_else(|| DispatchError::HandlerNotFound {
                name: handler.to_string(),
            })?;
        let handle =
            registered
                .operation(operation)
                .ok_or_else(|| DispatchError::OperationNotFound {
                    name: operation.to_string(),
                })?;

        self.resolved.insert(cache_key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Dispatches one request to exactly one outcome.
    ///
    /// Lookup and coercion failures are classified here and never reach the
    /// operation body. No timeout is imposed on deferred results -- the
    /// caller owns cancellation.
    ///
    /// # Errors
    ///
    /// Returns the classified [`DispatchError`] for lookup, coercion,
    /// invocation, and settlement failures.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<Value, DispatchError> {
        let handle = self.resolve(&request.handler, &request.operation)?;

        let argument = handle
            .coerce(Value::Object(request.payload))
            .map_err(|err| DispatchError::InvalidPayload {
                message: err.to_string(),
            })?;

        settle(handle.invoke(argument)).await
    }
}

/// Settles an operation output to a single outcome, awaiting deferred
/// handles with no dispatcher-imposed timeout.
///
/// A settled failure is unwrapped one level (the wrapper's cause when
/// present); a cancelled handle maps to `ResolutionInterrupted`; a panicked
/// operation surfaces as `Internal`.
async fn settle(output: OperationOutput) -> Result<Value, DispatchError> {
    match output {
        OperationOutput::Ready(Ok(value)) => Ok(value),
        OperationOutput::Ready(Err(failure)) => Err(DispatchError::Operation(failure.into_cause())),
        OperationOutput::Deferred(handle) => match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(DispatchError::Operation(failure.into_cause())),
            Err(join_err) if join_err.is_cancelled() => Err(DispatchError::ResolutionInterrupted),
            Err(join_err) => Err(DispatchError::Internal(Box::new(join_err))),
        },
    }
}

impl Service<DispatchRequest> for Dispatcher {
    type Response = Value;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: DispatchRequest) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { dispatcher.dispatch(request).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::dispatch::operation::{OperationFailure, OperationKind};
    use switchboard_core::DownstreamError;

    #[derive(Debug, Deserialize)]
    struct OrderQuery {
        id: String,
    }

    /// Registry with a spy counter tracking every successful invocation.
    fn spy_registry(invocations: Arc<AtomicU32>) -> Arc<HandlerRegistry> {
        let registry = HandlerRegistry::new();
        let blocking_spy = Arc::clone(&invocations);
        let deferred_spy = Arc::clone(&invocations);
        registry.register("orders", move |ops| {
            let blocking_spy = Arc::clone(&blocking_spy);
            ops.blocking("getOrder", move |query: OrderQuery| {
                blocking_spy.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "id": query.id, "state": "open" }))
            });
            let deferred_spy = Arc::clone(&deferred_spy);
            ops.deferred("refreshOrder", move |query: OrderQuery| {
                let deferred_spy = Arc::clone(&deferred_spy);
                async move {
                    deferred_spy.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "id": query.id, "refreshed": true }))
                }
            });
        });
        Arc::new(registry)
    }

    fn payload(entries: Value) -> serde_json::Map<String, Value> {
        entries.as_object().cloned().expect("payload must be an object")
    }

    #[tokio::test]
    async fn dispatch_matches_direct_invocation() {
        let invocations = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(spy_registry(Arc::clone(&invocations)));

        let request = DispatchRequest::new("orders", "getOrder", payload(json!({ "id": "42" })));
        let value = dispatcher.dispatch(request).await.unwrap();

        assert_eq!(value, json!({ "id": "42", "state": "open" }));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_handler_fails_without_invoking_anything() {
        let invocations = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(spy_registry(Arc::clone(&invocations)));

        let request = DispatchRequest::new("payments", "getOrder", payload(json!({ "id": "42" })));
        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::HandlerNotFound { ref name } if name == "payments"));
        assert_eq!(err.status(), 404);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_operation_fails_without_invoking_anything() {
        let invocations = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(spy_registry(Arc::clone(&invocations)));

        let request = DispatchRequest::new("orders", "cancelOrder", payload(json!({ "id": "42" })));
        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::OperationNotFound { ref name } if name == "cancelOrder"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn incompatible_payload_never_reaches_the_operation() {
        let invocations = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(spy_registry(Arc::clone(&invocations)));

        // `id` must be a string; a number cannot be coerced.
        let request = DispatchRequest::new("orders", "getOrder", payload(json!({ "id": 42 })));
        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::InvalidPayload { .. }));
        assert_eq!(err.status(), 400);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_payload_fields_are_ignored() {
        // Pinned coercion policy: extra fields are dropped, not rejected.
        let invocations = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(spy_registry(Arc::clone(&invocations)));

        let request = DispatchRequest::new(
            "orders",
            "getOrder",
            payload(json!({ "id": "42", "extra": { "x": 1 } })),
        );
        let value = dispatcher.dispatch(request).await.unwrap();

        assert_eq!(value, json!({ "id": "42", "state": "open" }));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deferred_operation_settles_to_its_value() {
        let invocations = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(spy_registry(Arc::clone(&invocations)));

        let request =
            DispatchRequest::new("orders", "refreshOrder", payload(json!({ "id": "42" })));
        let value = dispatcher.dispatch(request).await.unwrap();

        assert_eq!(value, json!({ "id": "42", "refreshed": true }));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deferred_failure_surfaces_inner_cause() {
        // A deferred operation reports its wrapper once; the dispatcher must
        // surface the wrapped cause, not the wrapper.
        let registry = HandlerRegistry::new();
        registry.register("orders", |ops| {
            ops.deferred("failOrder", |_query: OrderQuery| async move {
                Err::<Value, _>(OperationFailure::wrap(DownstreamError::BadRequest {
                    status: 400,
                    message: "order id is malformed".to_string(),
                }))
            });
        });
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let request = DispatchRequest::new("orders", "failOrder", payload(json!({ "id": "x" })));
        let err = dispatcher.dispatch(request).await.unwrap_err();

        let DispatchError::Operation(cause) = err else {
            panic!("expected an operation failure, got {err:?}");
        };
        let downstream = cause
            .downcast_ref::<DownstreamError>()
            .expect("the inner cause should surface, not the wrapper");
        assert!(downstream.is_client_fault());
        assert_eq!(DispatchError::Operation(cause).status(), 400);
    }

    #[tokio::test]
    async fn causeless_deferred_failure_surfaces_the_wrapper_itself() {
        let registry = HandlerRegistry::new();
        registry.register("orders", |ops| {
            ops.deferred("failOrder", |_query: OrderQuery| async move {
                Err::<Value, _>(OperationFailure::message("refresh failed"))
            });
        });
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let request = DispatchRequest::new("orders", "failOrder", payload(json!({ "id": "x" })));
        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::Operation(_)));
        assert_eq!(err.public_message(), "refresh failed");
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn cancelled_deferred_handle_maps_to_resolution_interrupted() {
        let handle = tokio::spawn(async {
            std::future::pending::<Result<Value, OperationFailure>>().await
        });
        handle.abort();

        let err = settle(OperationOutput::Deferred(handle)).await.unwrap_err();
        assert!(matches!(err, DispatchError::ResolutionInterrupted));
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn panicked_deferred_operation_maps_to_internal() {
        let handle: tokio::task::JoinHandle<Result<Value, OperationFailure>> =
            tokio::spawn(async { panic!("operation blew up") });

        let err = settle(OperationOutput::Deferred(handle)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Internal(_)));
        assert_eq!(err.public_message(), "internal server error");
    }

    #[tokio::test]
    async fn resolution_cache_fills_once_and_serves_repeat_calls() {
        let invocations = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(spy_registry(Arc::clone(&invocations)));

        for _ in 0..3 {
            let request =
                DispatchRequest::new("orders", "getOrder", payload(json!({ "id": "7" })));
            dispatcher.dispatch(request).await.unwrap();
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.resolved.len(), 1);
        let cached = dispatcher
            .resolved
            .get(&("orders".to_string(), "getOrder".to_string()))
            .expect("handle should be cached");
        assert_eq!(cached.value().kind(), OperationKind::Blocking);
    }

    #[tokio::test]
    async fn concurrent_dispatches_of_the_same_key_all_succeed() {
        let invocations = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(spy_registry(Arc::clone(&invocations)));

        let mut joins = Vec::new();
        for i in 0..8 {
            let dispatcher = dispatcher.clone();
            joins.push(tokio::spawn(async move {
                let request = DispatchRequest::new(
                    "orders",
                    "getOrder",
                    payload(json!({ "id": i.to_string() })),
                );
                dispatcher.dispatch(request).await
            }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 8);
        assert_eq!(dispatcher.resolved.len(), 1);
    }
}
