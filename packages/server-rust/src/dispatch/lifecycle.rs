//! Lifecycle management for gateway components.
//!
//! Handlers with startup or teardown needs (connection pools, warmed caches,
//! background refreshers) register a [`ManagedComponent`]; the gateway module
//! initializes components in registration order before serving and shuts
//! them down in reverse order afterwards.

use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::config::GatewayConfig;

/// Context handed to components during initialization.
#[derive(Debug, Clone)]
pub struct GatewayContext {
    /// Shared gateway configuration.
    pub config: Arc<GatewayConfig>,
}

/// A lifecycle-managed gateway component.
///
/// The `Any` bound enables type-based lookup via
/// [`LifecycleRegistry::get::<T>()`](LifecycleRegistry::get).
#[async_trait]
pub trait ManagedComponent: Send + Sync + Any {
    /// Unique name of this component (e.g. `"orders-pool"`).
    fn name(&self) -> &'static str;

    /// Initialize the component before the gateway starts serving.
    async fn init(&self, ctx: &GatewayContext) -> anyhow::Result<()>;

    /// Shut the component down after the gateway drains.
    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Registry of lifecycle-managed components.
///
/// Lookup works by name or by concrete type; registration order determines
/// init sequencing, and shutdown runs in reverse.
pub struct LifecycleRegistry {
    by_name: DashMap<&'static str, Arc<dyn ManagedComponent>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    init_order: RwLock<Vec<&'static str>>,
}

impl LifecycleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            init_order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a component, making it reachable by name and by type.
    pub fn register<T: ManagedComponent>(&self, component: T) {
        let name = component.name();
        let shared = Arc::new(component);
        self.by_name.insert(name, shared.clone());
        self.by_type.insert(TypeId::of::<T>(), shared);
        self.init_order.write().push(name);
    }

    /// Retrieves a component by its concrete type.
    #[must_use]
    pub fn get<T: ManagedComponent>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Retrieves a component by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedComponent>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Initializes all components in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first component `init()` failure, halting the sequence.
    pub async fn init_all(&self, ctx: &GatewayContext) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        for name in &order {
            if let Some(component) = self.get_by_name(name) {
                component.init(ctx).await?;
            }
        }
        Ok(())
    }

    /// Shuts all components down in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns the first component `shutdown()` failure, halting the sequence.
    pub async fn shutdown_all(&self) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        for name in order.iter().rev() {
            if let Some(component) = self.get_by_name(name) {
                component.shutdown().await?;
            }
        }
        Ok(())
    }
}

impl Default for LifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
