//! Handler registry: explicit startup-time registration of named operations.
//!
//! Replaces runtime name introspection with an explicit mapping. A handler
//! registers under a stable string key and populates an operation table with
//! statically-typed closures; after startup the registry is read-only in
//! practice (re-registration is supported but logged as a replacement).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::operation::{OperationFailure, OperationHandle};

/// Registry of dispatchable handlers, keyed by stable string key.
///
/// Concurrent lookups are lock-free; registration normally happens once at
/// startup before the server accepts traffic.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<RegisteredHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Registers a handler under `key`, populating its operation table.
    ///
    /// Registering the same key twice replaces the previous handler; this is
    /// a startup-time programming error and is logged as such.
    pub fn register(&self, key: &str, build: impl FnOnce(&mut OperationTable)) {
        let mut table = OperationTable {
            handler_key: key.to_string(),
            operations: HashMap::new(),
        };
        build(&mut table);

        let registered = Arc::new(RegisteredHandler {
            key: key.to_string(),
            operations: table.operations,
        });
        if self.handlers.insert(key.to_string(), registered).is_some() {
            tracing::warn!(handler = %key, "handler re-registered, previous definition replaced");
        }
    }

    /// Looks up a handler by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<RegisteredHandler>> {
        self.handlers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A registered handler and its named operations.
#[derive(Debug)]
pub struct RegisteredHandler {
    key: String,
    operations: HashMap<String, Arc<OperationHandle>>,
}

impl RegisteredHandler {
    /// Stable key this handler is addressed by.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Looks up one operation by name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<Arc<OperationHandle>> {
        self.operations.get(name).map(Arc::clone)
    }

    /// Names of all registered operations, sorted for stable log output.
    #[must_use]
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builder for a handler's operation table during registration.
pub struct OperationTable {
    handler_key: String,
    operations: HashMap<String, Arc<OperationHandle>>,
}

impl OperationTable {
    /// Registers a synchronous operation under `name`.
    pub fn blocking<I, O, F>(&mut self, name: &str, op: F) -> &mut Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Result<O, OperationFailure> + Send + Sync + 'static,
    {
        let handle = OperationHandle::blocking(&self.handler_key, name, op);
        self.insert(name, handle);
        self
    }

    /// Registers an operation whose result settles through a deferred handle.
    pub fn deferred<I, O, F, Fut>(&mut self, name: &str, op: F) -> &mut Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, OperationFailure>> + Send + 'static,
    {
        let handle = OperationHandle::deferred(&self.handler_key, name, op);
        self.insert(name, handle);
        self
    }

    fn insert(&mut self, name: &str, handle: OperationHandle) {
        if self
            .operations
            .insert(name.to_string(), Arc::new(handle))
            .is_some()
        {
            tracing::warn!(
                handler = %self.handler_key,
                operation = %name,
                "operation re-registered, previous definition replaced"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::dispatch::operation::OperationKind;

    #[derive(Debug, Deserialize)]
    struct OrderQuery {
        id: String,
    }

    fn orders_registry() -> HandlerRegistry {
        let registry = HandlerRegistry::new();
        registry.register("orders", |ops| {
            ops.blocking("getOrder", |query: OrderQuery| Ok(json!({ "id": query.id })));
            ops.deferred("refreshOrder", |query: OrderQuery| async move {
                Ok(json!({ "id": query.id, "refreshed": true }))
            });
        });
        registry
    }

    #[test]
    fn registered_handler_is_resolvable_by_key() {
        let registry = orders_registry();
        let handler = registry.get("orders").expect("handler should resolve");
        assert_eq!(handler.key(), "orders");
        assert_eq!(handler.operation_names(), vec!["getOrder", "refreshOrder"]);
    }

    #[test]
    fn unknown_handler_resolves_to_none() {
        let registry = orders_registry();
        assert!(registry.get("payments").is_none());
    }

    #[test]
    fn operations_carry_their_kind() {
        let registry = orders_registry();
        let handler = registry.get("orders").unwrap();
        assert_eq!(
            handler.operation("getOrder").unwrap().kind(),
            OperationKind::Blocking
        );
        assert_eq!(
            handler.operation("refreshOrder").unwrap().kind(),
            OperationKind::Deferred
        );
    }

    #[test]
    fn unknown_operation_resolves_to_none() {
        let registry = orders_registry();
        let handler = registry.get("orders").unwrap();
        assert!(handler.operation("cancelOrder").is_none());
    }

    #[test]
    fn duplicate_operation_name_replaces_previous_registration() {
        let registry = HandlerRegistry::new();
        registry.register("orders", |ops| {
            ops.blocking("getOrder", |_query: OrderQuery| Ok(json!("first")));
            ops.blocking("getOrder", |_query: OrderQuery| Ok(json!("second")));
        });

        let handler = registry.get("orders").unwrap();
        assert_eq!(handler.operation_names(), vec!["getOrder"]);
    }

    #[test]
    fn registry_len_counts_handlers() {
        let registry = orders_registry();
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
        registry.register("payments", |ops| {
            ops.blocking("charge", |query: OrderQuery| Ok(json!({ "id": query.id })));
        });
        assert_eq!(registry.len(), 2);
    }
}
