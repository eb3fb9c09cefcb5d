//! Pipeline composition: the explicit decorator stack around the dispatcher.
//!
//! Instrumentation composes at construction time as tower layers -- no
//! runtime interception. Layer order (outermost to innermost):
//!
//! 1. [`InstrumentLayer`] -- inbound request/response logs and counters
//! 2. [`LatencyLayer`] -- wall-clock timing per dispatch (closest to the
//!    dispatcher so it measures the call, not the logging)

use serde_json::Value;
use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::inbound::InstrumentLayer;
use super::latency::LatencyLayer;
use super::metrics::MetricsRecorder;
use crate::dispatch::{DispatchError, DispatchRequest, Dispatcher};

/// API path tag applied to dispatch-surface emissions.
pub const DISPATCH_API_PATH: &str = "/api/1.0/dev/downstream/{service}/{method}";

/// Composed dispatch pipeline type carried in the HTTP state.
///
/// The sync-clone box keeps the pipeline shareable across axum's state.
pub type DispatchPipeline = BoxCloneSyncService<DispatchRequest, Value, DispatchError>;

/// Wraps the dispatcher with the instrumentation stack.
#[must_use]
pub fn build_dispatch_pipeline(
    dispatcher: Dispatcher,
    recorder: MetricsRecorder,
    latency_metric: Option<String>,
) -> DispatchPipeline {
    let latency = match latency_metric {
        Some(name) => LatencyLayer::new(recorder.clone()).with_metric_name(name),
        None => LatencyLayer::new(recorder.clone()),
    };

    let svc = ServiceBuilder::new()
        .layer(InstrumentLayer::new(recorder, DISPATCH_API_PATH))
        .layer(latency)
        .service(dispatcher);

    BoxCloneSyncService::new(svc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
