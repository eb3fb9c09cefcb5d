//! HTTP handler definitions for the gateway.
//!
//! Defines `AppState` (the shared state carried through axum extractors)
//! and re-exports the handler functions used when building the router.

pub mod dispatch;
pub mod health;

pub use dispatch::dispatch_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use crate::dispatch::HandlerRegistry;
use crate::instrument::DispatchPipeline;

use super::{NetworkConfig, ShutdownController};

/// Shared application state passed to all axum handlers via `State`.
///
/// Holds `Arc` references (and the boxed pipeline, which clones cheaply) so
/// per-request cloning stays inexpensive.
#[derive(Clone)]
pub struct AppState {
    /// Instrumented dispatch pipeline wrapping the dispatcher.
    pub pipeline: DispatchPipeline,
    /// Handler registry, exposed for health reporting.
    pub registry: Arc<HandlerRegistry>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration.
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
