//! Gateway-level configuration shared by dispatch and instrumentation.

use std::collections::HashMap;

/// Configuration for the dispatch framework and its instrumentation.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Explicit latency metric name for the dispatch pipeline. When unset,
    /// the timer derives its name per call as `{handler}.{operation}`.
    pub latency_metric: Option<String>,
    /// Property entries backing `${key}` indirection in downstream host and
    /// path values.
    pub properties: HashMap<String, String>,
}
