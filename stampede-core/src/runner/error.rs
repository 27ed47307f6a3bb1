pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`iterations` must be a positive integer")]
    InvalidIterations,

    #[error(
        "invalid `executor` (expected `constant-vus`, `ramping-vus`, or `constant-arrival-rate`)"
    )]
    InvalidExecutor,

    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    InvalidStages,

    #[error("`rate` must be a positive integer")]
    InvalidRate,

    #[error("`timeUnit` must be a positive duration")]
    InvalidTimeUnit,

    #[error("`preAllocatedVUs` must be a positive integer")]
    InvalidPreAllocatedVus,

    #[error("`maxVUs` must be >= `preAllocatedVUs`")]
    InvalidMaxVus,

    #[error("`duration` is required for executor `{0}`")]
    MissingDuration(&'static str),

    #[error("invalid threshold on `{metric}`: {message}")]
    Threshold { metric: String, message: String },

    #[error("threshold references unknown metric `{0}`")]
    UnknownThresholdMetric(String),
}
