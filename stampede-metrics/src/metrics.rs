use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically accumulating sum.
    Counter,
    /// Last-written value.
    Gauge,
    /// Boolean series summarized as trues/total.
    Rate,
    /// Duration-like series with percentile estimates.
    Trend,
}

/// Storage strategy for trend series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PercentileMode {
    /// HDR histogram with 3 significant figures. Constant memory, suited to
    /// high-volume duration metrics.
    #[default]
    Approximate,
    /// Every sample is kept and percentiles use the nearest-rank method
    /// (rank = ceil(q * n) over ascending samples). Memory grows with the
    /// sample count; intended for small volumes and deterministic tests.
    Exact,
}

/// One raw observation, immutable once handed to the collector.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub kind: MetricKind,
    pub value: SampleValue,
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter {
        value: f64,
    },
    Gauge {
        value: f64,
    },
    Rate {
        total: u64,
        trues: u64,
        rate: Option<f64>,
    },
    Trend(TrendValues),
}

#[derive(Debug, Clone, Default)]
pub struct TrendValues {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

// Trend values are stored scaled by 1000 (three decimal places on
// milliseconds). Upper bound matches one minute of scaled milliseconds.
const TREND_SCALE: f64 = 1000.0;
const TREND_MAX_SCALED: u64 = 60_000_000_000;

fn new_trend_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(1, TREND_MAX_SCALED, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to init histogram: {err}"),
    }
}

#[derive(Debug)]
enum TrendStore {
    Hist(Mutex<Histogram<u64>>),
    Samples(Mutex<Vec<u64>>),
}

#[derive(Debug)]
struct TrendCell {
    count: AtomicU64,
    sum_scaled: AtomicU64,
    min_scaled: AtomicU64,
    max_scaled: AtomicU64,
    store: TrendStore,
}

impl TrendCell {
    fn new(mode: PercentileMode) -> Self {
        let store = match mode {
            PercentileMode::Approximate => TrendStore::Hist(Mutex::new(new_trend_histogram())),
            PercentileMode::Exact => TrendStore::Samples(Mutex::new(Vec::new())),
        };

        Self {
            count: AtomicU64::new(0),
            sum_scaled: AtomicU64::new(0),
            min_scaled: AtomicU64::new(u64::MAX),
            max_scaled: AtomicU64::new(0),
            store,
        }
    }

    fn record(&self, value: f64) {
        if !value.is_finite() || value < 0.0 {
            return;
        }

        // Sub-resolution samples clamp to the smallest trackable value so the
        // recorded count stays exact.
        let scaled = ((value * TREND_SCALE).round() as u64).clamp(1, TREND_MAX_SCALED);

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_scaled.fetch_add(scaled, Ordering::Relaxed);
        self.min_scaled.fetch_min(scaled, Ordering::Relaxed);
        self.max_scaled.fetch_max(scaled, Ordering::Relaxed);

        match &self.store {
            TrendStore::Hist(h) => {
                let mut h = h.lock();
                let _ = h.record(scaled);
            }
            TrendStore::Samples(s) => {
                s.lock().push(scaled);
            }
        }
    }

    fn quantile(&self, q: f64) -> Option<f64> {
        if self.count.load(Ordering::Relaxed) == 0 {
            return None;
        }

        let scaled = match &self.store {
            TrendStore::Hist(h) => h.lock().value_at_quantile(q),
            TrendStore::Samples(s) => {
                let mut sorted = s.lock().clone();
                if sorted.is_empty() {
                    return None;
                }
                sorted.sort_unstable();

                // Nearest rank: the smallest value with at least q * n samples
                // at or below it.
                let n = sorted.len();
                let rank = ((q * n as f64).ceil() as usize).clamp(1, n);
                sorted[rank - 1]
            }
        };

        Some(scaled as f64 / TREND_SCALE)
    }

    fn summarize(&self) -> TrendValues {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return TrendValues::default();
        }

        let sum = self.sum_scaled.load(Ordering::Relaxed) as f64;
        let min = self.min_scaled.load(Ordering::Relaxed);
        let max = self.max_scaled.load(Ordering::Relaxed);

        TrendValues {
            count,
            min: Some(min as f64 / TREND_SCALE),
            max: Some(max as f64 / TREND_SCALE),
            avg: Some(sum / (count as f64) / TREND_SCALE),
            p50: self.quantile(0.50),
            p90: self.quantile(0.90),
            p95: self.quantile(0.95),
            p99: self.quantile(0.99),
        }
    }
}

#[derive(Debug, Default)]
struct ScalarCell {
    value: Mutex<f64>,
}

impl ScalarCell {
    fn add(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        *self.value.lock() += v;
    }

    fn set(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        *self.value.lock() = v;
    }

    fn get(&self) -> f64 {
        *self.value.lock()
    }
}

#[derive(Debug, Default)]
struct RateCell {
    total: AtomicU64,
    trues: AtomicU64,
}

impl RateCell {
    fn add(&self, v: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if v {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn summarize(&self) -> MetricValue {
        let total = self.total.load(Ordering::Relaxed);
        let trues = self.trues.load(Ordering::Relaxed);
        let rate = if total == 0 {
            None
        } else {
            Some(trues as f64 / total as f64)
        };
        MetricValue::Rate { total, trues, rate }
    }
}

#[derive(Debug)]
enum Storage {
    Counter(ScalarCell),
    Gauge(ScalarCell),
    Rate(RateCell),
    Trend(TrendCell),
}

/// One series: a metric name plus a concrete tag set.
#[derive(Debug)]
pub struct Series {
    kind: MetricKind,
    name: std::sync::Arc<str>,
    tags: TagSet,
    storage: Storage,
}

impl Series {
    pub(crate) fn new(
        kind: MetricKind,
        name: std::sync::Arc<str>,
        tags: TagSet,
        mode: PercentileMode,
    ) -> Self {
        let storage = match kind {
            MetricKind::Counter => Storage::Counter(ScalarCell::default()),
            MetricKind::Gauge => Storage::Gauge(ScalarCell::default()),
            MetricKind::Rate => Storage::Rate(RateCell::default()),
            MetricKind::Trend => Storage::Trend(TrendCell::new(mode)),
        };

        Self {
            kind,
            name,
            tags,
            storage,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, value: f64) {
        match &self.storage {
            Storage::Counter(c) => c.add(value),
            Storage::Gauge(g) => g.set(value),
            Storage::Trend(t) => t.record(value),
            // Rate series take booleans; see `add_bool`.
            Storage::Rate(_) => {}
        }
    }

    pub fn add_bool(&self, value: bool) {
        if let Storage::Rate(r) = &self.storage {
            r.add(value);
        }
    }

    /// Percentile estimate for trend series; `None` for other kinds or when
    /// no samples were recorded.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Option<f64> {
        match &self.storage {
            Storage::Trend(t) => t.quantile(q.clamp(0.0, 1.0)),
            _ => None,
        }
    }

    #[must_use]
    pub fn values(&self) -> MetricValue {
        match &self.storage {
            Storage::Counter(c) => MetricValue::Counter { value: c.get() },
            Storage::Gauge(g) => MetricValue::Gauge { value: g.get() },
            Storage::Rate(r) => r.summarize(),
            Storage::Trend(t) => MetricValue::Trend(t.summarize()),
        }
    }

    #[must_use]
    pub fn summarize(&self) -> MetricSeriesSummary {
        MetricSeriesSummary {
            name: self.name.to_string(),
            kind: self.kind,
            tags: self.tags.to_vec(),
            values: self.values(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;

    fn trend(mode: PercentileMode) -> Series {
        Series::new(MetricKind::Trend, Arc::from("t"), TagSet::default(), mode)
    }

    #[test]
    fn trend_counts_every_recorded_sample() {
        let s = trend(PercentileMode::Exact);
        s.add(0.0);
        s.add(0.0001);
        s.add(5.0);

        let MetricValue::Trend(v) = s.values() else {
            panic!("expected trend values");
        };
        assert_eq!(v.count, 3);
        assert_eq!(v.max, Some(5.0));
    }

    #[test]
    fn trend_ignores_non_finite_and_negative_values() {
        let s = trend(PercentileMode::Exact);
        s.add(f64::NAN);
        s.add(f64::INFINITY);
        s.add(-1.0);
        s.add(2.0);

        let MetricValue::Trend(v) = s.values() else {
            panic!("expected trend values");
        };
        assert_eq!(v.count, 1);
        assert_eq!(v.min, Some(2.0));
        assert_eq!(v.avg, Some(2.0));
    }

    #[test]
    fn exact_p95_uses_nearest_rank() {
        // Nine fast samples and one slow one: the nearest-rank p95 of ten
        // samples is the 10th ordered value, i.e. the outlier.
        let s = trend(PercentileMode::Exact);
        for v in [100.0, 100.0, 100.0, 100.0, 600.0, 100.0, 100.0, 100.0, 100.0, 100.0] {
            s.add(v);
        }

        assert_eq!(s.quantile(0.95), Some(600.0));
        assert_eq!(s.quantile(0.50), Some(100.0));
    }

    #[test]
    fn approximate_p95_agrees_on_the_outlier() {
        let s = trend(PercentileMode::Approximate);
        for v in [100.0, 100.0, 100.0, 100.0, 600.0, 100.0, 100.0, 100.0, 100.0, 100.0] {
            s.add(v);
        }

        let p95 = s.quantile(0.95).unwrap();
        assert!((p95 - 600.0).abs() < 1.0, "p95={p95}");
    }

    #[test]
    fn rate_summarizes_trues_over_total() {
        let s = Series::new(
            MetricKind::Rate,
            Arc::from("r"),
            TagSet::default(),
            PercentileMode::default(),
        );
        s.add_bool(true);
        s.add_bool(false);
        s.add_bool(true);

        let MetricValue::Rate { total, trues, rate } = s.values() else {
            panic!("expected rate values");
        };
        assert_eq!(total, 3);
        assert_eq!(trues, 2);
        assert_eq!(rate, Some(2.0 / 3.0));
    }

    #[test]
    fn counter_accumulates_and_gauge_overwrites() {
        let c = Series::new(
            MetricKind::Counter,
            Arc::from("c"),
            TagSet::default(),
            PercentileMode::default(),
        );
        c.add(2.0);
        c.add(3.0);
        let MetricValue::Counter { value } = c.values() else {
            panic!("expected counter");
        };
        assert_eq!(value, 5.0);

        let g = Series::new(
            MetricKind::Gauge,
            Arc::from("g"),
            TagSet::default(),
            PercentileMode::default(),
        );
        g.add(2.0);
        g.add(7.0);
        let MetricValue::Gauge { value } = g.values() else {
            panic!("expected gauge");
        };
        assert_eq!(value, 7.0);
    }

    #[test]
    fn empty_trend_has_no_stats() {
        let s = trend(PercentileMode::Exact);
        let MetricValue::Trend(v) = s.values() else {
            panic!("expected trend values");
        };
        assert_eq!(v.count, 0);
        assert!(v.min.is_none());
        assert!(v.p95.is_none());
        assert_eq!(s.quantile(0.95), None);
    }
}
