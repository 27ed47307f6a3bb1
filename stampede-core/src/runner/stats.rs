use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stampede_metrics::{
    Collector, MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, TrendValues,
};

use crate::HttpTransportErrorKind;

/// Metric names registered for every run; thresholds may reference these
/// without declaring anything.
pub const BUILTIN_METRICS: &[&str] = &[
    "http_reqs",
    "http_req_duration",
    "http_req_failed",
    "checks",
    "errors",
    "iterations",
    "iteration_duration",
    "dropped_iterations",
    "data_received",
    "data_sent",
];

#[derive(Debug, Default)]
struct CheckCounters {
    total: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub name: String,
    pub total: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct ScenarioCounters {
    requests_total: AtomicU64,
    failed_requests_total: AtomicU64,
    iterations_total: AtomicU64,
    dropped_iterations_total: AtomicU64,
    checks_failed_total: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct ScenarioSummary {
    pub scenario: String,
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub iterations_total: u64,
    pub dropped_iterations_total: u64,
    pub checks_failed_total: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpRequestMeta<'a> {
    pub method: &'a str,
    pub name: &'a str,
    pub status: Option<u16>,
    /// Set when the request failed before producing a status.
    pub transport_error_kind: Option<HttpTransportErrorKind>,
    pub elapsed: Duration,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_duration: Duration,
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub iterations_total: u64,
    pub dropped_iterations_total: u64,
    pub checks_total: u64,
    pub checks_failed: u64,
    pub checks_by_name: Vec<CheckSummary>,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    pub rps: f64,
    pub req_per_sec_avg: f64,
    pub req_per_sec_stdev: f64,
    pub req_per_sec_max: f64,
    pub latency: Option<TrendValues>,
    pub scenarios: Vec<ScenarioSummary>,
    pub metrics: Vec<MetricSeriesSummary>,
}

// Welford accumulator over per-tick request rates.
#[derive(Debug, Default, Clone, Copy)]
struct RpsAgg {
    count: u64,
    mean: f64,
    m2: f64,
    max: f64,
}

impl RpsAgg {
    fn record(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }

        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / (self.count as f64);
        self.m2 += delta * (sample - self.mean);
        self.max = self.max.max(sample);
    }

    fn summary(&self) -> (f64, f64, f64) {
        if self.count == 0 {
            return (0.0, 0.0, 0.0);
        }
        let stdev = if self.count >= 2 {
            (self.m2 / ((self.count - 1) as f64)).sqrt()
        } else {
            0.0
        };
        (self.mean, stdev, self.max)
    }
}

/// All mutable run state: atomic counters plus the injected collector. This
/// is the only structure VUs share; everything funnels through append-only
/// paths that are safe for concurrent callers.
#[derive(Debug)]
pub struct RunStats {
    collector: Arc<Collector>,

    requests_total: AtomicU64,
    http_errors_total: AtomicU64,
    status_2xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    iterations_total: AtomicU64,
    dropped_iterations_total: AtomicU64,
    checks_total: AtomicU64,
    checks_failed: AtomicU64,
    bytes_received_total: AtomicU64,
    bytes_sent_total: AtomicU64,

    checks_by_name: Mutex<HashMap<Arc<str>, Arc<CheckCounters>>>,
    scenarios: Mutex<Vec<(Arc<str>, Arc<ScenarioCounters>)>>,
    rps_samples: Mutex<RpsAgg>,

    metric_http_reqs: MetricHandle,
    metric_http_req_duration: MetricHandle,
    metric_http_req_failed: MetricHandle,
    metric_checks: MetricHandle,
    metric_errors: MetricHandle,
    metric_iterations: MetricHandle,
    metric_iteration_duration: MetricHandle,
    metric_dropped_iterations: MetricHandle,
    metric_data_received: MetricHandle,
    metric_data_sent: MetricHandle,
}

fn scenario_of(tags: &[(String, String)]) -> Option<&str> {
    tags.iter()
        .find(|(k, _)| k == "scenario")
        .map(|(_, v)| v.as_str())
}

impl RunStats {
    #[must_use]
    pub fn new(collector: Arc<Collector>) -> Self {
        let metric_http_reqs = collector.handle(MetricKind::Counter, "http_reqs");
        let metric_http_req_duration = collector.handle(MetricKind::Trend, "http_req_duration");
        let metric_http_req_failed = collector.handle(MetricKind::Rate, "http_req_failed");
        let metric_checks = collector.handle(MetricKind::Rate, "checks");
        let metric_errors = collector.handle(MetricKind::Rate, "errors");
        let metric_iterations = collector.handle(MetricKind::Counter, "iterations");
        let metric_iteration_duration = collector.handle(MetricKind::Trend, "iteration_duration");
        let metric_dropped_iterations = collector.handle(MetricKind::Counter, "dropped_iterations");
        let metric_data_received = collector.handle(MetricKind::Counter, "data_received");
        let metric_data_sent = collector.handle(MetricKind::Counter, "data_sent");

        Self {
            collector,
            requests_total: AtomicU64::new(0),
            http_errors_total: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            iterations_total: AtomicU64::new(0),
            dropped_iterations_total: AtomicU64::new(0),
            checks_total: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            bytes_received_total: AtomicU64::new(0),
            bytes_sent_total: AtomicU64::new(0),
            checks_by_name: Mutex::new(HashMap::new()),
            scenarios: Mutex::new(Vec::new()),
            rps_samples: Mutex::new(RpsAgg::default()),
            metric_http_reqs,
            metric_http_req_duration,
            metric_http_req_failed,
            metric_checks,
            metric_errors,
            metric_iterations,
            metric_iteration_duration,
            metric_dropped_iterations,
            metric_data_received,
            metric_data_sent,
        }
    }

    #[must_use]
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Register a custom metric up-front so thresholds may reference it.
    pub fn declare_metric(&self, kind: MetricKind, name: &str) -> MetricHandle {
        self.collector.handle(kind, name)
    }

    pub fn ensure_scenario(&self, name: &str) {
        let _ = self.scenario_counters(name);
    }

    fn scenario_counters(&self, name: &str) -> Arc<ScenarioCounters> {
        let mut list = self
            .scenarios
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((_, counters)) = list.iter().find(|(n, _)| n.as_ref() == name) {
            return counters.clone();
        }

        let counters = Arc::new(ScenarioCounters::default());
        list.push((Arc::from(name), counters.clone()));
        counters
    }

    fn named_failure_counters(&self, name: &str) -> Arc<CheckCounters> {
        let mut map = self
            .checks_by_name
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(v) = map.get(name) {
            return v.clone();
        }

        let v = Arc::new(CheckCounters::default());
        map.insert(Arc::from(name), v.clone());
        v
    }

    // Named failures (transport errors, error statuses, iteration errors)
    // share the per-name table with checks but do not feed check metrics.
    fn record_named_failure(&self, name: &str) {
        let counters = self.named_failure_counters(name);
        counters.total.fetch_add(1, Ordering::Relaxed);
        counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(
        &self,
        scenario: &str,
        meta: HttpRequestMeta<'_>,
        tags: &[(String, String)],
    ) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let transport_error = meta.transport_error_kind.is_some();
        if let Some(kind) = meta.transport_error_kind {
            self.http_errors_total.fetch_add(1, Ordering::Relaxed);
            self.record_named_failure(&format!("http_error:{kind}"));
        } else if let Some(status) = meta.status {
            match status {
                200..=299 => {
                    self.status_2xx.fetch_add(1, Ordering::Relaxed);
                }
                400..=499 => {
                    self.status_4xx.fetch_add(1, Ordering::Relaxed);
                    self.record_named_failure(&format!("http_status:{status}"));
                }
                500..=599 => {
                    self.status_5xx.fetch_add(1, Ordering::Relaxed);
                    self.record_named_failure(&format!("http_status:{status}"));
                }
                _ => {}
            }
        }

        if meta.bytes_received != 0 {
            self.bytes_received_total
                .fetch_add(meta.bytes_received, Ordering::Relaxed);
            self.metric_data_received.add(meta.bytes_received as f64);
        }
        if meta.bytes_sent != 0 {
            self.bytes_sent_total
                .fetch_add(meta.bytes_sent, Ordering::Relaxed);
            self.metric_data_sent.add(meta.bytes_sent as f64);
        }

        let mut merged: Vec<(String, String)> = Vec::with_capacity(tags.len() + 3);
        merged.extend_from_slice(tags);
        merged.push(("method".to_string(), meta.method.to_string()));
        merged.push(("name".to_string(), meta.name.to_string()));
        if let Some(status) = meta.status {
            merged.push(("status".to_string(), status.to_string()));
        }

        let duration_ms = meta.elapsed.as_secs_f64() * 1000.0;
        self.metric_http_reqs.add_with_tags(1.0, &merged);
        self.metric_http_req_duration
            .add_with_tags(duration_ms, &merged);

        let failed = transport_error || meta.status.is_some_and(|s| s >= 400);
        self.metric_http_req_failed
            .add_bool_with_tags(failed, &merged);

        let counters = self.scenario_counters(scenario);
        counters.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            counters
                .failed_requests_total
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_check(&self, name: &str, passed: bool, tags: &[(String, String)]) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);

        let counters = self.named_failure_counters(name);
        counters.total.fetch_add(1, Ordering::Relaxed);

        if !passed {
            self.checks_failed.fetch_add(1, Ordering::Relaxed);
            counters.failed.fetch_add(1, Ordering::Relaxed);

            if let Some(scenario) = scenario_of(tags) {
                self.scenario_counters(scenario)
                    .checks_failed_total
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        // Per-check series under the `checks` metric; the untagged base
        // series only sees whole-evaluation samples.
        let mut merged: Vec<(String, String)> = Vec::with_capacity(tags.len() + 1);
        merged.extend_from_slice(tags);
        merged.push(("check".to_string(), name.to_string()));
        self.collector
            .series(MetricKind::Rate, "checks", &merged)
            .add_bool(passed);
    }

    pub fn record_check_evaluation(&self, all_passed: bool, tags: &[(String, String)]) {
        self.metric_checks.add_bool_with_tags(all_passed, tags);
        self.metric_errors.add_bool_with_tags(!all_passed, tags);
    }

    pub fn record_iteration(&self, scenario: &str, elapsed: Duration, tags: &[(String, String)]) {
        self.iterations_total.fetch_add(1, Ordering::Relaxed);
        self.metric_iterations.add_with_tags(1.0, tags);
        self.metric_iteration_duration
            .add_with_tags(elapsed.as_secs_f64() * 1000.0, tags);

        self.scenario_counters(scenario)
            .iterations_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_iteration_error(&self, message: &str) {
        self.record_named_failure(&format!("iteration_error:{message}"));
    }

    pub fn record_dropped_iterations(&self, scenario: &str, n: u64) {
        if n == 0 {
            return;
        }

        self.dropped_iterations_total.fetch_add(n, Ordering::Relaxed);
        self.metric_dropped_iterations.add_with_tags(
            n as f64,
            &[("scenario".to_string(), scenario.to_string())],
        );

        self.scenario_counters(scenario)
            .dropped_iterations_total
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_rps_sample(&self, rps_now: f64) {
        let mut agg = self
            .rps_samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        agg.record(rps_now);
    }

    #[must_use]
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed_requests_total(&self) -> u64 {
        self.http_errors_total.load(Ordering::Relaxed)
            + self.status_4xx.load(Ordering::Relaxed)
            + self.status_5xx.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn iterations_total(&self) -> u64 {
        self.iterations_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped_iterations_total(&self) -> u64 {
        self.dropped_iterations_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn checks_failed_total(&self) -> u64 {
        self.checks_failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn summarize(&self, elapsed: Duration) -> RunSummary {
        let secs = elapsed.as_secs_f64().max(1e-9);
        let requests_total = self.requests_total();

        let checks_by_name = {
            let map = self
                .checks_by_name
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut out: Vec<CheckSummary> = map
                .iter()
                .map(|(name, c)| CheckSummary {
                    name: name.to_string(),
                    total: c.total.load(Ordering::Relaxed),
                    failed: c.failed.load(Ordering::Relaxed),
                })
                .collect();
            out.sort_by(|a, b| a.name.cmp(&b.name));
            out
        };

        let scenarios = {
            let list = self
                .scenarios
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            list.iter()
                .map(|(name, c)| ScenarioSummary {
                    scenario: name.to_string(),
                    requests_total: c.requests_total.load(Ordering::Relaxed),
                    failed_requests_total: c.failed_requests_total.load(Ordering::Relaxed),
                    iterations_total: c.iterations_total.load(Ordering::Relaxed),
                    dropped_iterations_total: c.dropped_iterations_total.load(Ordering::Relaxed),
                    checks_failed_total: c.checks_failed_total.load(Ordering::Relaxed),
                })
                .collect()
        };

        let (req_per_sec_avg, req_per_sec_stdev, req_per_sec_max) = {
            let agg = self
                .rps_samples
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            agg.summary()
        };

        let latency = match self.collector.snapshot("http_req_duration") {
            Some(MetricValue::Trend(v)) if v.count > 0 => Some(v),
            _ => None,
        };

        RunSummary {
            run_duration: elapsed,
            requests_total,
            failed_requests_total: self.failed_requests_total(),
            iterations_total: self.iterations_total(),
            dropped_iterations_total: self.dropped_iterations_total(),
            checks_total: self.checks_total.load(Ordering::Relaxed),
            checks_failed: self.checks_failed.load(Ordering::Relaxed),
            checks_by_name,
            bytes_received_total: self.bytes_received_total.load(Ordering::Relaxed),
            bytes_sent_total: self.bytes_sent_total.load(Ordering::Relaxed),
            rps: requests_total as f64 / secs,
            req_per_sec_avg,
            req_per_sec_stdev,
            req_per_sec_max,
            latency,
            scenarios,
            metrics: self.collector.summarize(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn stats() -> RunStats {
        RunStats::new(Arc::new(Collector::default()))
    }

    fn scenario_tags(name: &str) -> Vec<(String, String)> {
        vec![("scenario".to_string(), name.to_string())]
    }

    #[test]
    fn http_request_updates_totals_and_metrics() {
        let stats = stats();
        stats.record_http_request(
            "warmup",
            HttpRequestMeta {
                method: "GET",
                name: "/health",
                status: Some(200),
                transport_error_kind: None,
                elapsed: Duration::from_millis(12),
                bytes_received: 100,
                bytes_sent: 50,
            },
            &scenario_tags("warmup"),
        );

        assert_eq!(stats.requests_total(), 1);
        assert_eq!(stats.failed_requests_total(), 0);

        let MetricValue::Rate { total, trues, .. } =
            stats.collector().snapshot("http_req_failed").unwrap()
        else {
            panic!("expected rate");
        };
        assert_eq!((total, trues), (1, 0));

        let MetricValue::Trend(v) = stats.collector().snapshot("http_req_duration").unwrap()
        else {
            panic!("expected trend");
        };
        assert_eq!(v.count, 1);
    }

    #[test]
    fn transport_error_is_a_failed_request_and_named_failure() {
        let stats = stats();
        stats.record_http_request(
            "warmup",
            HttpRequestMeta {
                method: "GET",
                name: "/health",
                status: None,
                transport_error_kind: Some(HttpTransportErrorKind::Timeout),
                elapsed: Duration::from_millis(500),
                bytes_received: 0,
                bytes_sent: 0,
            },
            &scenario_tags("warmup"),
        );

        assert_eq!(stats.failed_requests_total(), 1);

        let summary = stats.summarize(Duration::from_secs(1));
        let named = summary
            .checks_by_name
            .iter()
            .find(|c| c.name == "http_error:timeout")
            .unwrap();
        assert_eq!(named.failed, 1);
        assert_eq!(summary.scenarios[0].failed_requests_total, 1);
    }

    #[test]
    fn error_statuses_count_as_failures() {
        let stats = stats();
        for status in [200, 404, 500] {
            stats.record_http_request(
                "s",
                HttpRequestMeta {
                    method: "GET",
                    name: "/x",
                    status: Some(status),
                    transport_error_kind: None,
                    elapsed: Duration::from_millis(1),
                    bytes_received: 0,
                    bytes_sent: 0,
                },
                &scenario_tags("s"),
            );
        }

        assert_eq!(stats.requests_total(), 3);
        assert_eq!(stats.failed_requests_total(), 2);
    }

    #[test]
    fn summarize_collects_scenario_breakdown() {
        let stats = stats();
        stats.ensure_scenario("a");
        stats.ensure_scenario("b");
        stats.record_iteration("a", Duration::from_millis(5), &scenario_tags("a"));
        stats.record_dropped_iterations("b", 3);

        let summary = stats.summarize(Duration::from_secs(2));
        assert_eq!(summary.scenarios.len(), 2);
        assert_eq!(summary.scenarios[0].iterations_total, 1);
        assert_eq!(summary.scenarios[1].dropped_iterations_total, 3);
        assert_eq!(summary.iterations_total, 1);
        assert_eq!(summary.dropped_iterations_total, 3);
    }

    #[test]
    fn builtin_metrics_exist_after_construction() {
        let stats = stats();
        for name in BUILTIN_METRICS {
            assert!(
                stats.collector().contains(name),
                "missing builtin metric {name}"
            );
        }
    }
}
