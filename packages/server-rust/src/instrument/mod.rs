//! Instrumentation pipeline: metrics facade, latency timing, inbound call
//! logging, and downstream call logging.
//!
//! All layers route error classification through the core root-cause
//! resolver and emit through the [`MetricsRecorder`] facade. None of them
//! alters control flow; results and failures pass through unchanged.

pub mod downstream;
pub mod inbound;
pub mod latency;
pub mod metrics;
pub mod pipeline;

// Re-export key types for convenient access.
pub use downstream::{DownstreamInstrument, MapPropertySource, PropertySource};
pub use inbound::InstrumentLayer;
pub use latency::LatencyLayer;
pub use metrics::{MetricsError, MetricsRecorder, MetricsSink, PrometheusSink, RecordingSink};
pub use pipeline::{build_dispatch_pipeline, DispatchPipeline, DISPATCH_API_PATH};
