pub mod metrics;
pub mod registry;
pub mod tags;

pub use metrics::{
    MetricKind, MetricSeriesSummary, MetricValue, PercentileMode, Sample, SampleValue, Series,
    TrendValues,
};
pub use registry::{Collector, MetricHandle};
pub use tags::TagSet;
