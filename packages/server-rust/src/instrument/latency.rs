//! Latency measurement layer for the dispatch pipeline.
//!
//! Records wall-clock duration per dispatch under a timer metric, whether
//! the call succeeds or fails, without touching the result. Independent of
//! the inbound and downstream instrumentation layers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use serde_json::Value;
use tower::{Layer, Service};

use super::metrics::MetricsRecorder;
use crate::dispatch::{DispatchError, DispatchRequest};

/// Tower layer timing each dispatch.
///
/// Without an explicit metric name, the timer derives one per call as
/// `{handler}.{operation}`.
#[derive(Debug, Clone)]
pub struct LatencyLayer {
    recorder: MetricsRecorder,
    metric_name: Option<Arc<str>>,
    tags: Arc<Vec<(String, String)>>,
}

impl LatencyLayer {
    /// Creates a layer deriving the metric name from each request.
    #[must_use]
    pub fn new(recorder: MetricsRecorder) -> Self {
        Self {
            recorder,
            metric_name: None,
            tags: Arc::new(Vec::new()),
        }
    }

    /// Uses a fixed metric name instead of the derived one.
    #[must_use]
    pub fn with_metric_name(mut self, name: impl Into<String>) -> Self {
        self.metric_name = Some(Arc::from(name.into()));
        self
    }

    /// Attaches a static tag set to every timing.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<(String, String)>) -> Self {
        self.tags = Arc::new(tags);
        self
    }
}

impl<S> Layer<S> for LatencyLayer {
    type Service = LatencyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LatencyService {
            inner,
            recorder: self.recorder.clone(),
            metric_name: self.metric_name.clone(),
            tags: Arc::clone(&self.tags),
        }
    }
}

/// Service wrapper recording dispatch durations.
#[derive(Debug, Clone)]
pub struct LatencyService<S> {
    inner: S,
    recorder: MetricsRecorder,
    metric_name: Option<Arc<str>>,
    tags: Arc<Vec<(String, String)>>,
}

impl<S> Service<DispatchRequest> for LatencyService<S>
where
    S: Service<DispatchRequest, Response = Value, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: DispatchRequest) -> Self::Future {
        let metric = self.metric_name.as_ref().map_or_else(
            || format!("{}.{}", request.handler, request.operation),
            ToString::to_string,
        );
        let recorder = self.recorder.clone();
        let tags = Arc::clone(&self.tags);

        let fut = self.inner.call(request);
        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;
            let borrowed: Vec<(&str, &str)> = tags
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect();
            recorder.record_duration(&metric, &borrowed, start.elapsed());
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
