//! Metrics sinks.
//!
//! The orchestrator reports through [`MetricsSink`]; these adapters cover
//! the process-wide `metrics` recorder, logging-only deployments, tests, and
//! callers that want no metrics at all.

#[cfg(any(test, feature = "inmemory"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "inmemory"))]
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use metrics::{counter, histogram, Label};

use dinecache_core::cache::MetricsSink;

/// Metric counted on every cache hit, tagged with `layer`.
pub const CACHE_HIT: &str = "cache.hit";
/// Metric counted on every cache miss, tagged with `layer`.
pub const CACHE_MISS: &str = "cache.miss";
/// Timer recorded for every `get`.
pub const CACHE_GET: &str = "cache.get";
/// Metric counted on every durable tier failure, tagged with `op`.
pub const L2_ERROR: &str = "cache.l2.error";
/// Metric counted when the durable tier is marked degraded.
pub const L2_DEGRADED: &str = "cache.l2.degraded";
/// Metric counted when the durable tier recovers.
pub const L2_RECOVERED: &str = "cache.l2.recovered";

fn labels(tags: &[(&str, &str)]) -> Vec<Label> {
    tags.iter()
        .map(|(key, value)| Label::new((*key).to_string(), (*value).to_string()))
        .collect()
}

/// Forwards to the globally installed `metrics` recorder.
///
/// Counters map to `counter!`, timings to a `histogram!` in seconds. Without
/// an installed recorder every call is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl MetricsSink for RecorderMetrics {
    fn increment(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        counter!(name.to_string(), labels(tags)).increment(value);
    }

    fn timing(&self, name: &str, elapsed: Duration, tags: &[(&str, &str)]) {
        histogram!(name.to_string(), labels(tags)).record(elapsed.as_secs_f64());
    }
}

/// Emits metrics as `trace` events under the `dinecache::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        tracing::trace!(
            target: "dinecache::metrics",
            metric = name,
            value,
            tags = ?tags,
            "counter"
        );
    }

    fn timing(&self, name: &str, elapsed: Duration, tags: &[(&str, &str)]) {
        tracing::trace!(
            target: "dinecache::metrics",
            metric = name,
            elapsed_us = elapsed.as_micros() as u64,
            tags = ?tags,
            "timing"
        );
    }
}

/// Discards every metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _value: u64, _tags: &[(&str, &str)]) {}

    fn timing(&self, _name: &str, _elapsed: Duration, _tags: &[(&str, &str)]) {}
}

/// Series identity: metric name plus sorted tags.
#[cfg(any(test, feature = "inmemory"))]
type SeriesKey = (String, Vec<(String, String)>);

#[cfg(any(test, feature = "inmemory"))]
fn series(name: &str, tags: &[(&str, &str)]) -> SeriesKey {
    let mut tags: Vec<(String, String)> = tags
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    tags.sort();
    (name.to_string(), tags)
}

/// Keeps counters and timing sample counts in memory.
#[cfg(any(test, feature = "inmemory"))]
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counters: Mutex<HashMap<SeriesKey, u64>>,
    timings: Mutex<HashMap<SeriesKey, Vec<Duration>>>,
}

#[cfg(any(test, feature = "inmemory"))]
impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter value for an exact name and tag set.
    pub fn count(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&series(name, tags))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the counter value summed over every tag set.
    pub fn total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((series_name, _), _)| series_name == name)
            .map(|(_, value)| *value)
            .sum()
    }

    /// Returns how many timings were recorded under `name`, across tag sets.
    pub fn timing_samples(&self, name: &str) -> usize {
        self.timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((series_name, _), _)| series_name == name)
            .map(|(_, samples)| samples.len())
            .sum()
    }
}

#[cfg(any(test, feature = "inmemory"))]
impl MetricsSink for CountingMetrics {
    fn increment(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(series(name, tags)).or_default();
        *counter = counter.saturating_add(value);
    }

    fn timing(&self, name: &str, elapsed: Duration, tags: &[(&str, &str)]) {
        self.timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(series(name, tags))
            .or_default()
            .push(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metrics::{
        Counter, CounterFn, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
        SharedString, Unit,
    };

    use super::*;

    /// Captured values keyed by `name{label=value,...}`.
    #[derive(Debug, Default)]
    struct Captured {
        counters: Mutex<HashMap<String, u64>>,
        histograms: Mutex<HashMap<String, Vec<f64>>>,
    }

    struct Handle {
        series: String,
        captured: Arc<Captured>,
    }

    impl CounterFn for Handle {
        fn increment(&self, value: u64) {
            *self
                .captured
                .counters
                .lock()
                .unwrap()
                .entry(self.series.clone())
                .or_default() += value;
        }

        fn absolute(&self, value: u64) {
            self.captured
                .counters
                .lock()
                .unwrap()
                .insert(self.series.clone(), value);
        }
    }

    impl HistogramFn for Handle {
        fn record(&self, value: f64) {
            self.captured
                .histograms
                .lock()
                .unwrap()
                .entry(self.series.clone())
                .or_default()
                .push(value);
        }
    }

    #[derive(Default)]
    struct CapturingRecorder {
        captured: Arc<Captured>,
    }

    impl CapturingRecorder {
        fn handle(&self, key: &Key) -> Arc<Handle> {
            let labels: Vec<String> = key
                .labels()
                .map(|label| format!("{}={}", label.key(), label.value()))
                .collect();
            Arc::new(Handle {
                series: format!("{}{{{}}}", key.name(), labels.join(",")),
                captured: self.captured.clone(),
            })
        }
    }

    impl Recorder for CapturingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            Counter::from_arc(self.handle(key))
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::from_arc(self.handle(key))
        }
    }

    #[test]
    fn test_recorder_metrics_forwards_counters_and_timings() {
        let recorder = CapturingRecorder::default();

        metrics::with_local_recorder(&recorder, || {
            let sink = RecorderMetrics;
            sink.increment(CACHE_HIT, 1, &[("layer", "l1")]);
            sink.increment(CACHE_HIT, 2, &[("layer", "l1")]);
            sink.increment(L2_DEGRADED, 1, &[]);
            sink.timing(CACHE_GET, Duration::from_millis(250), &[]);
        });

        let counters = recorder.captured.counters.lock().unwrap();
        assert_eq!(counters.get("cache.hit{layer=l1}"), Some(&3));
        assert_eq!(counters.get("cache.l2.degraded{}"), Some(&1));
        let histograms = recorder.captured.histograms.lock().unwrap();
        assert_eq!(histograms.get("cache.get{}"), Some(&vec![0.25]));
    }

    #[test]
    fn test_recorder_metrics_without_recorder_is_silent() {
        RecorderMetrics.increment(CACHE_MISS, 1, &[("layer", "l2")]);
        RecorderMetrics.timing(CACHE_GET, Duration::ZERO, &[]);
    }

    #[test]
    fn test_counting_metrics_by_tags() {
        let metrics = CountingMetrics::new();

        metrics.increment(CACHE_HIT, 1, &[("layer", "l1")]);
        metrics.increment(CACHE_HIT, 2, &[("layer", "l1")]);
        metrics.increment(CACHE_HIT, 1, &[("layer", "l2")]);

        assert_eq!(metrics.count(CACHE_HIT, &[("layer", "l1")]), 3);
        assert_eq!(metrics.count(CACHE_HIT, &[("layer", "l2")]), 1);
        assert_eq!(metrics.count(CACHE_MISS, &[("layer", "l1")]), 0);
        assert_eq!(metrics.total(CACHE_HIT), 4);
    }

    #[test]
    fn test_tag_order_is_irrelevant() {
        let metrics = CountingMetrics::new();

        metrics.increment(L2_ERROR, 1, &[("op", "get"), ("layer", "l2")]);

        assert_eq!(metrics.count(L2_ERROR, &[("layer", "l2"), ("op", "get")]), 1);
    }

    #[test]
    fn test_timings_are_recorded() {
        let metrics = CountingMetrics::new();

        metrics.timing(CACHE_GET, Duration::from_micros(40), &[]);
        metrics.timing(CACHE_GET, Duration::from_micros(90), &[]);

        assert_eq!(metrics.timing_samples(CACHE_GET), 2);
    }

    #[test]
    fn test_tracing_and_noop_sinks_accept_everything() {
        let sinks: [&dyn MetricsSink; 2] = [&TracingMetrics, &NoopMetrics];
        for sink in sinks {
            sink.increment(CACHE_MISS, 1, &[("layer", "l1_only")]);
            sink.timing(CACHE_GET, Duration::ZERO, &[]);
        }
    }
}
