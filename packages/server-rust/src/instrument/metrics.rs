//! Metrics facade: the two-method backend interface and the recorder built
//! on top of it.
//!
//! Instrumentation consumes a backend through exactly two primitives:
//! counter increment and duration recording. Emission is fire-and-forget --
//! a backend failure must never reach the caller's result -- except on the
//! downstream fallback path, which surfaces the failure to its own
//! secondary-failure handling via [`MetricsRecorder::try_increment`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

/// Failure reported by a metrics backend.
#[derive(Debug, Clone, Error)]
#[error("metrics backend failure: {message}")]
pub struct MetricsError {
    /// Backend error message.
    pub message: String,
}

/// Backend interface consumed by the instrumentation layers.
pub trait MetricsSink: Send + Sync + 'static {
    /// Increments the counter `name` by one with the given tag set.
    ///
    /// # Errors
    ///
    /// Returns a [`MetricsError`] when the backend rejects the emission.
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]) -> Result<(), MetricsError>;

    /// Records one duration observation under `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`MetricsError`] when the backend rejects the emission.
    fn record_duration(
        &self,
        name: &str,
        tags: &[(&str, &str)],
        duration: Duration,
    ) -> Result<(), MetricsError>;
}

/// Production sink over the `metrics` crate facade.
///
/// Emissions flow to whatever recorder is installed -- the Prometheus
/// exporter in a deployed gateway (see the network module), or nothing at
/// all, in which case they are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

fn to_labels(tags: &[(&str, &str)]) -> Vec<metrics::Label> {
    tags.iter()
        .map(|(key, value)| metrics::Label::new((*key).to_string(), (*value).to_string()))
        .collect()
}

impl MetricsSink for PrometheusSink {
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]) -> Result<(), MetricsError> {
        metrics::counter!(name.to_string(), to_labels(tags)).increment(1);
        Ok(())
    }

    fn record_duration(
        &self,
        name: &str,
        tags: &[(&str, &str)],
        duration: Duration,
    ) -> Result<(), MetricsError> {
        metrics::histogram!(name.to_string(), to_labels(tags)).record(duration.as_secs_f64());
        Ok(())
    }
}

/// In-memory sink for tests and local inspection.
///
/// Counts every emission keyed by metric name plus sorted tag set, and can
/// be armed to fail on a specific metric name to exercise secondary-failure
/// handling in callers.
#[derive(Debug, Default)]
pub struct RecordingSink {
    counters: Mutex<HashMap<String, u64>>,
    durations: Mutex<HashMap<String, u64>>,
    fail_on: Mutex<Option<String>>,
}

fn storage_key(name: &str, tags: &[(&str, &str)]) -> String {
    let mut sorted: Vec<(&str, &str)> = tags.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the sink to fail every emission of the metric `name`.
    pub fn fail_on(&self, name: &str) {
        *self.fail_on.lock() = Some(name.to_string());
    }

    /// Count recorded for `name` with exactly this tag set.
    #[must_use]
    pub fn counter(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .get(&storage_key(name, tags))
            .copied()
            .unwrap_or(0)
    }

    /// Total count recorded for `name` across all tag sets.
    #[must_use]
    pub fn counter_total(&self, name: &str) -> u64 {
        let prefix = format!("{name}{{");
        self.counters
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, count)| count)
            .sum()
    }

    /// Number of duration observations recorded for `name` across tag sets.
    #[must_use]
    pub fn duration_count(&self, name: &str) -> u64 {
        let prefix = format!("{name}{{");
        self.durations
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, count)| count)
            .sum()
    }

    fn check_armed(&self, name: &str) -> Result<(), MetricsError> {
        if self.fail_on.lock().as_deref() == Some(name) {
            return Err(MetricsError {
                message: format!("emission of {name} rejected by test arming"),
            });
        }
        Ok(())
    }
}

impl MetricsSink for RecordingSink {
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]) -> Result<(), MetricsError> {
        self.check_armed(name)?;
        *self
            .counters
            .lock()
            .entry(storage_key(name, tags))
            .or_insert(0) += 1;
        Ok(())
    }

    fn record_duration(
        &self,
        name: &str,
        tags: &[(&str, &str)],
        _duration: Duration,
    ) -> Result<(), MetricsError> {
        self.check_armed(name)?;
        *self
            .durations
            .lock()
            .entry(storage_key(name, tags))
            .or_insert(0) += 1;
        Ok(())
    }
}

/// Shared recorder over a [`MetricsSink`].
///
/// Cheap to clone; clones share the sink.
#[derive(Clone)]
pub struct MetricsRecorder {
    sink: Arc<dyn MetricsSink>,
}

impl fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRecorder").finish_non_exhaustive()
    }
}

impl MetricsRecorder {
    /// Creates a recorder over the given sink.
    #[must_use]
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    /// Fire-and-forget counter increment; backend failures are logged and
    /// swallowed.
    pub fn increment(&self, name: &str, tags: &[(&str, &str)]) {
        if let Err(err) = self.sink.increment_counter(name, tags) {
            tracing::warn!(metric = name, error = %err, "counter emission failed");
        }
    }

    /// Counter increment that surfaces backend failure to the caller.
    ///
    /// Only the downstream fallback path uses this; it owns the
    /// secondary-failure policy.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`MetricsError`].
    pub(crate) fn try_increment(
        &self,
        name: &str,
        tags: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        self.sink.increment_counter(name, tags)
    }

    /// Fire-and-forget duration recording; backend failures are logged and
    /// swallowed.
    pub fn record_duration(&self, name: &str, tags: &[(&str, &str)], duration: Duration) {
        if let Err(err) = self.sink.record_duration(name, tags, duration) {
            tracing::warn!(metric = name, error = %err, "duration emission failed");
        }
    }

    /// Times `thunk` under `name`, recording the wall-clock duration whether
    /// or not the thunk's result is a failure; the result passes through
    /// unchanged.
    pub fn measure<T>(&self, name: &str, tags: &[(&str, &str)], thunk: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = thunk();
        self.record_duration(name, tags, start.elapsed());
        result
    }

    /// Async variant of [`measure`](Self::measure).
    pub async fn measure_async<T, Fut>(&self, name: &str, tags: &[(&str, &str)], fut: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.record_duration(name, tags, start.elapsed());
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn recording_sink_counts_by_name_and_tag_set() {
        let sink = RecordingSink::new();
        sink.increment_counter("Outgoing_Request", &[("dns", "a"), ("path", "/x")])
            .unwrap();
        sink.increment_counter("Outgoing_Request", &[("path", "/x"), ("dns", "a")])
            .unwrap();
        sink.increment_counter("Outgoing_Request", &[("dns", "b"), ("path", "/x")])
            .unwrap();

        // Tag order does not matter; tag values do.
        assert_eq!(
            sink.counter("Outgoing_Request", &[("dns", "a"), ("path", "/x")]),
            2
        );
        assert_eq!(sink.counter_total("Outgoing_Request"), 3);
    }

    #[test]
    fn armed_sink_rejects_only_the_named_metric() {
        let sink = RecordingSink::new();
        sink.fail_on("Outgoing_Fallback");

        assert!(sink
            .increment_counter("Outgoing_Fallback", &[])
            .is_err());
        assert!(sink.increment_counter("Outgoing_Request", &[]).is_ok());
    }

    #[test]
    fn recorder_swallows_backend_failures() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_on("Controller_Request");
        let recorder = MetricsRecorder::new(sink.clone());

        // Must not panic or propagate.
        recorder.increment("Controller_Request", &[("api", "/x")]);
        assert_eq!(sink.counter_total("Controller_Request"), 0);
    }

    #[test]
    fn measure_records_duration_on_success_and_failure() {
        let sink = Arc::new(RecordingSink::new());
        let recorder = MetricsRecorder::new(sink.clone());

        let ok: Result<u32, &str> = recorder.measure("op.time", &[], || Ok(7));
        let err: Result<u32, &str> = recorder.measure("op.time", &[], || Err("boom"));

        assert_eq!(ok, Ok(7));
        assert_eq!(err, Err("boom"));
        assert_eq!(sink.duration_count("op.time"), 2);
    }

    #[tokio::test]
    async fn measure_async_times_the_future() {
        let sink = Arc::new(RecordingSink::new());
        let recorder = MetricsRecorder::new(sink.clone());

        let value = recorder.measure_async("op.async", &[], async { 41 + 1 }).await;

        assert_eq!(value, 42);
        assert_eq!(sink.duration_count("op.async"), 1);
    }

    proptest! {
        #[test]
        fn storage_key_ignores_tag_order(
            tags in proptest::collection::vec(("[a-z]{1,5}", "[a-z]{1,5}"), 0..5)
        ) {
            let forward: Vec<(&str, &str)> = tags
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect();
            let mut reversed = forward.clone();
            reversed.reverse();
            prop_assert_eq!(storage_key("m", &forward), storage_key("m", &reversed));
        }
    }
}
