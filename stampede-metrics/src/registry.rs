use dashmap::DashMap;
use std::sync::Arc;

use crate::metrics::{
    MetricKind, MetricSeriesSummary, MetricValue, PercentileMode, Sample, SampleValue, Series,
};
use crate::tags::TagSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    kind: MetricKind,
    name: Arc<str>,
    tags: TagSet,
}

/// The collector: every series of every metric, keyed by (kind, name, tags).
///
/// Recording is safe for any number of concurrent writers; the map is sharded
/// so appending to one metric does not block recording to another. Series are
/// append-only: samples fold into their aggregate on arrival and are never
/// removed.
///
/// There is no process-wide instance; embedders create one collector per run
/// (or per test) and pass it to everything that records or reads metrics.
#[derive(Debug)]
pub struct Collector {
    mode: PercentileMode,
    series: DashMap<SeriesKey, Arc<Series>, ahash::RandomState>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(PercentileMode::default())
    }
}

impl Collector {
    #[must_use]
    pub fn new(mode: PercentileMode) -> Self {
        Self {
            mode,
            series: DashMap::with_hasher(ahash::RandomState::default()),
        }
    }

    #[must_use]
    pub fn percentile_mode(&self) -> PercentileMode {
        self.mode
    }

    /// Get-or-create the series for (kind, name, tags).
    pub fn series(&self, kind: MetricKind, name: &str, tags: &[(String, String)]) -> Arc<Series> {
        let name: Arc<str> = Arc::from(name);
        let tags = TagSet::from_pairs(tags);
        let key = SeriesKey {
            kind,
            name: name.clone(),
            tags: tags.clone(),
        };

        self.series
            .entry(key)
            .or_insert_with(|| Arc::new(Series::new(kind, name, tags, self.mode)))
            .clone()
    }

    /// A writer handle bound to the untagged base series of a metric.
    pub fn handle(self: &Arc<Self>, kind: MetricKind, name: &str) -> MetricHandle {
        let base = self.series(kind, name, &[]);
        MetricHandle {
            collector: self.clone(),
            base,
        }
    }

    /// Record one sample. The untagged base series always receives the value;
    /// a tagged sample additionally feeds its tagged sub-series.
    pub fn record(&self, sample: Sample) {
        let base = self.series(sample.kind, &sample.name, &[]);
        let tagged = (!sample.tags.is_empty())
            .then(|| self.series(sample.kind, &sample.name, &sample.tags));

        match sample.value {
            SampleValue::Num(v) => {
                base.add(v);
                if let Some(s) = tagged {
                    s.add(v);
                }
            }
            SampleValue::Bool(v) => {
                base.add_bool(v);
                if let Some(s) = tagged {
                    s.add_bool(v);
                }
            }
        }
    }

    /// Whether any series exists under this metric name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.series.iter().any(|e| e.key().name.as_ref() == name)
    }

    /// Consistent view of the untagged base series for `name`. Views across
    /// different metrics are not taken atomically.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> Option<MetricValue> {
        self.base_series(name).map(|s| s.values())
    }

    /// Percentile estimate over the untagged base series (trend metrics only).
    #[must_use]
    pub fn quantile(&self, name: &str, q: f64) -> Option<f64> {
        self.base_series(name).and_then(|s| s.quantile(q))
    }

    fn base_series(&self, name: &str) -> Option<Arc<Series>> {
        self.series
            .iter()
            .find(|e| e.key().name.as_ref() == name && e.key().tags.is_empty())
            .map(|e| e.value().clone())
    }

    #[must_use]
    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let mut out: Vec<MetricSeriesSummary> = self
            .series
            .iter()
            .map(|e| e.value().summarize())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

/// Cheap-to-clone writer for one metric's base series, with tagged fanout.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    collector: Arc<Collector>,
    base: Arc<Series>,
}

impl MetricHandle {
    pub fn add(&self, value: f64) {
        self.base.add(value);
    }

    pub fn add_with_tags(&self, value: f64, tags: &[(String, String)]) {
        self.base.add(value);
        if tags.is_empty() {
            return;
        }
        self.collector
            .series(self.base.kind(), self.base.name(), tags)
            .add(value);
    }

    pub fn add_bool(&self, value: bool) {
        self.base.add_bool(value);
    }

    pub fn add_bool_with_tags(&self, value: bool, tags: &[(String, String)]) {
        self.base.add_bool(value);
        if tags.is_empty() {
            return;
        }
        self.collector
            .series(self.base.kind(), self.base.name(), tags)
            .add_bool(value);
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.base.kind()
    }
}
