//! Downstream call instrumentation.
//!
//! Wraps every outbound call the gateway makes to another service: logs the
//! request, logs the response, and on the fallback path resolves the root
//! cause, extracts its structured status, and tags the failure counter with
//! host, path, and kind. A failure inside the fallback handling itself is
//! caught, logged, and counted separately -- it never masks the original
//! downstream failure.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use switchboard_core::{kind_label, render_args, render_chain, root_cause, DownstreamError, Loggable};

use super::metrics::MetricsRecorder;

/// Resolves configured property keys for `${key}` indirection in host and
/// path values.
pub trait PropertySource: Send + Sync + 'static {
    /// Looks up a configured property by key.
    fn get(&self, key: &str) -> Option<String>;
}

/// Property source over a fixed map, loaded from gateway config.
#[derive(Debug, Clone, Default)]
pub struct MapPropertySource {
    entries: HashMap<String, String>,
}

impl MapPropertySource {
    /// Creates a source over the given entries.
    #[must_use]
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }
}

impl PropertySource for MapPropertySource {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

/// Instruments outbound downstream calls with logs and counters.
///
/// Cheap to clone; clones share the recorder and property source.
#[derive(Clone)]
pub struct DownstreamInstrument {
    recorder: MetricsRecorder,
    properties: Arc<dyn PropertySource>,
}

impl fmt::Debug for DownstreamInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownstreamInstrument").finish_non_exhaustive()
    }
}

impl DownstreamInstrument {
    /// Creates an instrument over the given recorder and property source.
    #[must_use]
    pub fn new(recorder: MetricsRecorder, properties: Arc<dyn PropertySource>) -> Self {
        Self {
            recorder,
            properties,
        }
    }

    /// Resolves a `${key}` placeholder through the property source.
    /// Non-placeholder values and unresolved keys pass through verbatim.
    fn resolve_property(&self, value: &str) -> String {
        value
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .and_then(|key| self.properties.get(key))
            .unwrap_or_else(|| value.to_string())
    }

    /// Logs an outbound request and counts it under `Outgoing_Request`.
    pub fn log_request(&self, site: &str, host: &str, path: &str, args: &[Loggable]) {
        let dns = self.resolve_property(host);
        let path = self.resolve_property(path);
        let request = render_args(args);

        self.recorder
            .increment("Outgoing_Request", &[("dns", &dns), ("path", &path)]);
        tracing::info!(
            site = %site,
            dns = %dns,
            path = %path,
            request = %request,
            "downstream request"
        );
    }

    /// Logs a completed outbound call and counts it under
    /// `Outgoing_Response`.
    pub fn log_response(
        &self,
        site: &str,
        host: &str,
        path: &str,
        response: &Loggable,
        args: &[Loggable],
    ) {
        let dns = self.resolve_property(host);
        let path = self.resolve_property(path);
        let request = render_args(args);

        self.recorder
            .increment("Outgoing_Response", &[("dns", &dns), ("path", &path)]);
        tracing::info!(
            site = %site,
            dns = %dns,
            path = %path,
            response = %response.render(),
            request = %request,
            "downstream response"
        );
    }

    /// Logs a fallback taken after a failed outbound call and counts it
    /// under `Outgoing_Fallback`, tagged with the root cause's kind and,
    /// when known, its structured status code.
    ///
    /// A secondary failure inside the handling is caught, logged, and
    /// counted once under `OUTGOING_FALLBACK_HANDLING_FAILURE`; the original
    /// failure's semantics for the caller are untouched.
    pub fn log_fallback(
        &self,
        site: &str,
        host: &str,
        path: &str,
        error: &(dyn StdError + 'static),
        args: &[Loggable],
    ) {
        if let Err(secondary) = self.try_log_fallback(site, host, path, error, args) {
            tracing::error!(
                site = %site,
                error = %secondary,
                "downstream fallback handling failed"
            );
            self.recorder.increment(
                "OUTGOING_FALLBACK_HANDLING_FAILURE",
                &[("error", "MetricsError"), ("site", site)],
            );
        }
    }

    fn try_log_fallback(
        &self,
        site: &str,
        host: &str,
        path: &str,
        error: &(dyn StdError + 'static),
        args: &[Loggable],
    ) -> Result<(), super::metrics::MetricsError> {
        let root = root_cause(error);
        let status = root
            .downcast_ref::<DownstreamError>()
            .and_then(DownstreamError::status);

        let dns = self.resolve_property(host);
        let path = self.resolve_property(path);
        let request = render_args(args);
        let kind = kind_label(root);

        let status_text = status.map(|code| code.to_string());
        let mut tags: Vec<(&str, &str)> =
            vec![("dns", &dns), ("path", &path), ("error", kind)];
        if let Some(ref code) = status_text {
            tags.push(("statusCode", code));
        }

        self.recorder.try_increment("Outgoing_Fallback", &tags)?;

        tracing::error!(
            site = %site,
            dns = %dns,
            path = %path,
            status_code = ?status,
            request = %request,
            trace = %render_chain(root),
            "downstream fallback"
        );
        Ok(())
    }

    /// Around-call decorator: logs the request, runs the call, logs the
    /// response on success or the fallback on failure. The call's own result
    /// returns unchanged.
    pub async fn call<T, E, Fut>(
        &self,
        site: &str,
        host: &str,
        path: &str,
        args: Vec<Loggable>,
        call: Fut,
    ) -> Result<T, E>
    where
        T: Serialize,
        E: StdError + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>>,
    {
        self.log_request(site, host, path, &args);
        match call.await {
            Ok(response) => {
                self.log_response(site, host, path, &Loggable::capture(&response), &args);
                Ok(response)
            }
            Err(err) => {
                self.log_fallback(site, host, path, &err, &args);
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use thiserror::Error;

    use super::*;
    use crate::instrument::metrics::{MetricsSink, RecordingSink};
    use switchboard_core::BoxError;

    #[derive(Debug, Error)]
    #[error("call wrapper failed")]
    struct Wrapper {
        #[source]
        source: BoxError,
    }

    fn instrument(sink: &Arc<RecordingSink>) -> DownstreamInstrument {
        let mut entries = HashMap::new();
        entries.insert("orders.host".to_string(), "orders.internal".to_string());
        DownstreamInstrument::new(
            MetricsRecorder::new(Arc::clone(sink) as Arc<dyn MetricsSink>),
            Arc::new(MapPropertySource::new(entries)),
        )
    }

    #[test]
    fn request_log_resolves_property_placeholders() {
        let sink = Arc::new(RecordingSink::new());
        let instrument = instrument(&sink);

        instrument.log_request("Orders.fetch", "${orders.host}", "/v1/orders", &[]);

        assert_eq!(
            sink.counter(
                "Outgoing_Request",
                &[("dns", "orders.internal"), ("path", "/v1/orders")],
            ),
            1
        );
    }

    #[test]
    fn unresolved_placeholder_passes_through_verbatim() {
        let sink = Arc::new(RecordingSink::new());
        let instrument = instrument(&sink);

        instrument.log_request("Orders.fetch", "${missing.key}", "/v1/orders", &[]);

        assert_eq!(
            sink.counter(
                "Outgoing_Request",
                &[("dns", "${missing.key}"), ("path", "/v1/orders")],
            ),
            1
        );
    }

    #[test]
    fn fallback_tags_status_code_when_root_cause_carries_one() {
        let sink = Arc::new(RecordingSink::new());
        let instrument = instrument(&sink);

        let error = Wrapper {
            source: Box::new(DownstreamError::Upstream {
                status: 503,
                message: "unavailable".to_string(),
            }),
        };
        instrument.log_fallback(
            "Orders.fetch",
            "${orders.host}",
            "/v1/orders",
            &error,
            &[Loggable::Absent],
        );

        assert_eq!(
            sink.counter(
                "Outgoing_Fallback",
                &[
                    ("dns", "orders.internal"),
                    ("path", "/v1/orders"),
                    ("error", "Upstream"),
                    ("statusCode", "503"),
                ],
            ),
            1
        );
        assert_eq!(sink.counter_total("OUTGOING_FALLBACK_HANDLING_FAILURE"), 0);
    }

    #[test]
    fn fallback_omits_status_tag_for_unclassified_root_cause() {
        let sink = Arc::new(RecordingSink::new());
        let instrument = instrument(&sink);

        let error = Wrapper {
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "peer reset",
            )),
        };
        instrument.log_fallback("Orders.fetch", "host", "/v1/orders", &error, &[]);

        assert_eq!(
            sink.counter(
                "Outgoing_Fallback",
                &[
                    ("dns", "host"),
                    ("path", "/v1/orders"),
                    ("error", "Unclassified"),
                ],
            ),
            1
        );
    }

    #[test]
    fn fallback_never_panics_on_malformed_arguments() {
        let sink = Arc::new(RecordingSink::new());
        let instrument = instrument(&sink);

        let error = DownstreamError::Decode {
            message: "garbled".to_string(),
        };
        instrument.log_fallback("Orders.fetch", "", "", &error, &[Loggable::Absent]);

        assert_eq!(sink.counter_total("Outgoing_Fallback"), 1);
    }

    #[test]
    fn forced_emission_failure_increments_dedicated_counter_once() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_on("Outgoing_Fallback");
        let instrument = instrument(&sink);

        let error = DownstreamError::Upstream {
            status: 500,
            message: "boom".to_string(),
        };
        instrument.log_fallback("Orders.fetch", "host", "/v1/orders", &error, &[]);

        assert_eq!(sink.counter_total("Outgoing_Fallback"), 0);
        assert_eq!(
            sink.counter(
                "OUTGOING_FALLBACK_HANDLING_FAILURE",
                &[("error", "MetricsError"), ("site", "Orders.fetch")],
            ),
            1
        );
    }

    #[tokio::test]
    async fn around_call_logs_response_on_success() {
        let sink = Arc::new(RecordingSink::new());
        let instrument = instrument(&sink);

        let result: Result<serde_json::Value, DownstreamError> = instrument
            .call(
                "Orders.fetch",
                "${orders.host}",
                "/v1/orders",
                vec![Loggable::Structured(json!({ "id": "42" }))],
                async { Ok(json!({ "id": "42", "state": "open" })) },
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(sink.counter_total("Outgoing_Request"), 1);
        assert_eq!(sink.counter_total("Outgoing_Response"), 1);
        assert_eq!(sink.counter_total("Outgoing_Fallback"), 0);
    }

    #[tokio::test]
    async fn around_call_returns_the_original_failure_even_when_handling_fails() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_on("Outgoing_Fallback");
        let instrument = instrument(&sink);

        let result: Result<serde_json::Value, DownstreamError> = instrument
            .call("Orders.fetch", "host", "/v1/orders", Vec::new(), async {
                Err(DownstreamError::BadRequest {
                    status: 400,
                    message: "rejected".to_string(),
                })
            })
            .await;

        // Original classification is untouched by the secondary failure.
        let err = result.unwrap_err();
        assert!(err.is_client_fault());
        assert_eq!(sink.counter_total("OUTGOING_FALLBACK_HANDLING_FAILURE"), 1);
    }
}
