mod checks;
mod config;
mod error;
mod gate;
mod pacer;
mod phase;
mod progress;
mod run;
mod schedule;
mod stats;
mod thresholds;
mod vu;

pub use checks::{Checks, run_checks};
pub use config::{
    DEFAULT_GRACEFUL_STOP, Options, RunConfig, ScenarioConfig, ScenarioExecutor,
    ScenarioExecutorKind, ScenarioOptions, Stage, scenarios_from_options,
};
pub use error::{Error, Result};
pub use gate::{IterationGate, StopSignal};
pub use pacer::ArrivalPacer;
pub use phase::RunPhase;
pub use progress::{ProgressFn, ProgressUpdate, ScenarioProgress};
pub use run::{HookFn, RunHooks, RunOutcome, RunSettings, run_scenarios};
pub use schedule::RampSchedule;
pub use stats::{
    BUILTIN_METRICS, CheckSummary, HttpRequestMeta, RunStats, RunSummary, ScenarioSummary,
};
pub use thresholds::{
    ThresholdExpr, ThresholdExprSpec, ThresholdOp, ThresholdOutcome, ThresholdSet, ThresholdStat,
    abort_breached, evaluate_thresholds, parse_threshold_expr, validate_thresholds,
};
pub use vu::{HttpResult, IterationContext, StartSignal, VuContext, VuWork};
