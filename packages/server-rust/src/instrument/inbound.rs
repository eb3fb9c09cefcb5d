//! Inbound call instrumentation for the dispatch pipeline.
//!
//! Outermost layer: logs every request and response, counts requests and
//! classified failures per API path, and passes results through unchanged.
//! Conversion of failures into HTTP responses happens only at the axum
//! boundary, so this layer never alters control flow.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tower::{Layer, Service};

use switchboard_core::{render_chain, Loggable};

use super::metrics::MetricsRecorder;
use crate::dispatch::{DispatchError, DispatchRequest};

/// Tower layer instrumenting inbound API calls.
#[derive(Debug, Clone)]
pub struct InstrumentLayer {
    recorder: MetricsRecorder,
    api_path: Arc<str>,
}

impl InstrumentLayer {
    /// Creates a layer tagging emissions with the given API path.
    #[must_use]
    pub fn new(recorder: MetricsRecorder, api_path: &str) -> Self {
        Self {
            recorder,
            api_path: Arc::from(api_path),
        }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            recorder: self.recorder.clone(),
            api_path: Arc::clone(&self.api_path),
        }
    }
}

/// Service wrapper emitting request/response logs and counters.
#[derive(Debug, Clone)]
pub struct InstrumentService<S> {
    inner: S,
    recorder: MetricsRecorder,
    api_path: Arc<str>,
}

impl<S> Service<DispatchRequest> for InstrumentService<S>
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
        let api = Arc::clone(&self.api_path);
        let recorder = self.recorder.clone();
        let operation = request.operation.clone();
        let call_id = request.call_id;
        let args = Loggable::Structured(Value::Object(request.payload.clone())).render();

        tracing::info!(
            api = %api,
            operation = %operation,
            call_id,
            args = %args,
            "inbound request"
        );
        recorder.increment("Controller_Request", &[("api", api.as_ref())]);

        let fut = self.inner.call(request);
        Box::pin(async move {
            match fut.await {
                Ok(value) => {
                    tracing::info!(
                        api = %api,
                        operation = %operation,
                        call_id,
                        result = %value,
                        args = %args,
                        "inbound response"
                    );
                    Ok(value)
                }
                Err(err) => {
                    tracing::error!(
                        api = %api,
                        operation = %operation,
                        call_id,
                        args = %args,
                        trace = %render_chain(&err),
                        "inbound call failed"
                    );
                    recorder.increment(
                        "Controller_Exception",
                        &[("api", api.as_ref()), ("error", err.kind_name())],
                    );
                    Err(err)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
