use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Can go up or down.
struct Gauge {
    // f64 bits, so the value can be swapped atomically
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }
    fn increment(&self, delta: f64) {
        loop {
            let current = self.value.load(Ordering::Relaxed);
            let current_f = f64::from_bits(current as u64);
            let new_f = current_f + delta;
            if self
                .value
                .compare_exchange_weak(
                    current,
                    new_f.to_bits() as i64,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

/// Upper bound on retained histogram observations; older ones are evicted.
const HISTOGRAM_WINDOW: usize = 4096;

/// In-memory histogram over a sliding window of recent observations.
struct Histogram {
    observations: Mutex<Vec<f64>>,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            observations: Mutex::new(Vec::new()),
            count: AtomicU64::new(0),
        }
    }
    fn observe(&self, value: f64) {
        let mut obs = self.observations.lock();
        if obs.len() >= HISTOGRAM_WINDOW {
            obs.remove(0);
        }
        obs.push(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock().clone();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = obs.len();
        let sum: f64 = obs.iter().sum();
        let p50 = obs[n / 2];
        let p95 = obs[((n as f64 * 0.95) as usize).min(n - 1)];
        let p99 = obs[((n as f64 * 0.99) as usize).min(n - 1)];
        HistogramSummary {
            count: self.count.load(Ordering::Relaxed),
            sum,
            p50,
            p95,
            p99,
        }
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric key: name + labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.into(),
            labels: sorted,
        }
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

/// One metric in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricValue {
    Counter {
        name: String,
        labels: BTreeMap<String, String>,
        value: u64,
    },
    Gauge {
        name: String,
        labels: BTreeMap<String, String>,
        value: f64,
    },
    Histogram {
        name: String,
        labels: BTreeMap<String, String>,
        summary: HistogramSummary,
    },
}

impl MetricValue {
    pub fn name(&self) -> &str {
        match self {
            Self::Counter { name, .. } | Self::Gauge { name, .. } | Self::Histogram { name, .. } => name,
        }
    }
}

/// Point-in-time view of every recorded metric.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub metrics: Vec<MetricValue>,
}

/// Thread-safe in-memory metrics recorder.
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        let counters = self.counters.read();
        if let Some(c) = counters.get(&key) {
            c.increment(n);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        let c = counters.entry(key).or_insert_with(Counter::new);
        c.increment(n);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.set(value);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        let g = gauges.entry(key).or_insert_with(Gauge::new);
        g.set(value);
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.increment(delta);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        let g = gauges.entry(key).or_insert_with(Gauge::new);
        g.increment(delta);
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let histograms = self.histograms.read();
        if let Some(h) = histograms.get(&key) {
            h.observe(value);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write();
        let h = histograms.entry(key).or_insert_with(Histogram::new);
        h.observe(value);
    }

    /// Get a histogram summary.
    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        let histograms = self.histograms.read();
        histograms
            .get(&key)
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    /// Get current value of a counter.
    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map_or(0, |c| c.get())
    }

    /// Get current value of a gauge.
    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map_or(0.0, |g| g.get())
    }

    /// Capture every metric, sorted by name.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut metrics = Vec::new();

        for (key, counter) in self.counters.read().iter() {
            metrics.push(MetricValue::Counter {
                name: key.name.clone(),
                labels: key.label_map(),
                value: counter.get(),
            });
        }
        for (key, gauge) in self.gauges.read().iter() {
            metrics.push(MetricValue::Gauge {
                name: key.name.clone(),
                labels: key.label_map(),
                value: gauge.get(),
            });
        }
        for (key, histogram) in self.histograms.read().iter() {
            metrics.push(MetricValue::Histogram {
                name: key.name.clone(),
                labels: key.label_map(),
                summary: histogram.summary(),
            });
        }

        metrics.sort_by(|a, b| a.name().cmp(b.name()));
        MetricsSnapshot {
            timestamp: Utc::now().to_rfc3339(),
            metrics,
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basic() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("scan.requests.total", &[("outcome", "ok")], 1);
        recorder.counter_inc("scan.requests.total", &[("outcome", "ok")], 1);
        recorder.counter_inc("scan.requests.total", &[("outcome", "error")], 1);

        assert_eq!(recorder.counter_get("scan.requests.total", &[("outcome", "ok")]), 2);
        assert_eq!(recorder.counter_get("scan.requests.total", &[("outcome", "error")]), 1);
        assert_eq!(recorder.counter_get("scan.requests.total", &[("outcome", "panic")]), 0);
    }

    #[test]
    fn gauge_set_and_increment() {
        let recorder = MetricsRecorder::new();
        recorder.gauge_set("ws.connections.active", &[], 10.0);
        assert_eq!(recorder.gauge_get("ws.connections.active", &[]), 10.0);

        recorder.gauge_inc("ws.connections.active", &[], 5.0);
        assert_eq!(recorder.gauge_get("ws.connections.active", &[]), 15.0);

        recorder.gauge_inc("ws.connections.active", &[], -3.0);
        assert_eq!(recorder.gauge_get("ws.connections.active", &[]), 12.0);
    }

    #[test]
    fn histogram_observations() {
        let recorder = MetricsRecorder::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0] {
            recorder.histogram_observe("scan.duration_ms", &[], v);
        }

        let summary = recorder.histogram_summary("scan.duration_ms", &[]);
        assert_eq!(summary.count, 10);
        assert_eq!(summary.sum, 550.0);
        assert!(summary.p50 >= 50.0 && summary.p50 <= 60.0);
        assert!(summary.p95 >= 90.0);
    }

    #[test]
    fn histogram_window_evicts_oldest() {
        let recorder = MetricsRecorder::new();
        for _ in 0..HISTOGRAM_WINDOW {
            recorder.histogram_observe("h", &[], 1.0);
        }
        recorder.histogram_observe("h", &[], 1.0);
        let summary = recorder.histogram_summary("h", &[]);
        assert_eq!(summary.count, HISTOGRAM_WINDOW as u64 + 1);
        assert_eq!(summary.sum, HISTOGRAM_WINDOW as f64);
    }

    #[test]
    fn histogram_empty() {
        let recorder = MetricsRecorder::new();
        let summary = recorder.histogram_summary("nonexistent", &[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.sum, 0.0);
    }

    #[test]
    fn label_ordering_independent() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("test", &[("a", "1"), ("b", "2")], 1);
        recorder.counter_inc("test", &[("b", "2"), ("a", "1")], 1);

        assert_eq!(recorder.counter_get("test", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn snapshot_covers_all_kinds() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("delivery.dropped.total", &[("reason", "queue_full")], 3);
        recorder.gauge_set("pipeline.queue_depth", &[], 2.0);
        recorder.histogram_observe("scan.duration_ms", &[], 120.0);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.metrics.len(), 3);
        let names: Vec<&str> = snapshot.metrics.iter().map(MetricValue::name).collect();
        assert_eq!(
            names,
            vec!["delivery.dropped.total", "pipeline.queue_depth", "scan.duration_ms"]
        );

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["metrics"][0]["type"], "counter");
        assert_eq!(json["metrics"][0]["labels"]["reason"], "queue_full");
        assert_eq!(json["metrics"][0]["value"], 3);
    }

    #[test]
    fn concurrent_counter_increments() {
        use std::sync::Arc;
        use std::thread;

        let recorder = Arc::new(MetricsRecorder::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let r = recorder.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    r.counter_inc("concurrent.test", &[], 1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(recorder.counter_get("concurrent.test", &[]), 10_000);
    }
}
