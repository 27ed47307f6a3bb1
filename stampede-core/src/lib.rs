mod http;

pub mod runner;

pub use http::{
    Error, HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind, Result,
};
pub use stampede_metrics::{
    Collector, MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, PercentileMode, Sample,
    SampleValue, TagSet, TrendValues,
};
