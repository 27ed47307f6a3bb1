use std::time::Duration;

use stampede_metrics::PercentileMode;

use super::error::{Error, Result};
use super::thresholds::ThresholdSet;

/// Scenarios that omit `gracefulStop` get this window.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// CLI-level overrides; these take precedence over plan values.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub iterations: Option<u64>,
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum ScenarioExecutor {
    /// Maintain exactly `vus` running VUs for the scenario window.
    ConstantVus { vus: u64 },

    /// Track a piecewise-linear VU target across `stages`.
    RampingVus { start_vus: u64, stages: Vec<Stage> },

    /// Open model: start `rate` iterations per `time_unit`, drawing from a
    /// bounded worker pool. Arrivals that find no free worker are dropped.
    ConstantArrivalRate {
        rate: u64,
        time_unit: Duration,
        pre_allocated_vus: u64,
        max_vus: u64,
    },
}

/// Executor kind (the string form used by plans/CLI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ScenarioExecutorKind {
    #[strum(serialize = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(serialize = "ramping-vus")]
    RampingVus,

    #[strum(serialize = "constant-arrival-rate")]
    ConstantArrivalRate,
}

/// A validated scenario, immutable once the run starts.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: String,
    pub executor: ScenarioExecutor,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,
    /// Offset from run start before this scenario begins.
    pub start_time: Duration,
    /// Grace window for in-flight iterations once the scenario window closes.
    pub graceful_stop: Duration,
    pub tags: Vec<(String, String)>,
}

impl ScenarioConfig {
    /// The largest VU population this scenario can reach.
    #[must_use]
    pub fn max_vus(&self) -> u64 {
        match &self.executor {
            ScenarioExecutor::ConstantVus { vus } => *vus,
            ScenarioExecutor::RampingVus { start_vus, stages } => {
                let max_stage = stages.iter().map(|st| st.target).max().unwrap_or(0);
                max_stage.max(*start_vus)
            }
            ScenarioExecutor::ConstantArrivalRate { max_vus, .. } => *max_vus,
        }
    }

    /// When the scenario stops starting new iterations, relative to run start.
    /// `None` for iteration-bound scenarios without a duration.
    #[must_use]
    pub fn window_end(&self) -> Option<Duration> {
        self.duration.map(|d| self.start_time.saturating_add(d))
    }
}

/// Raw per-scenario options, before validation.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    pub name: String,
    pub executor: Option<String>,
    pub tags: Vec<(String, String)>,

    pub vus: Option<u64>,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,

    pub start_time: Option<Duration>,
    pub graceful_stop: Option<Duration>,

    // ramping-vus
    pub start_vus: Option<u64>,
    pub stages: Vec<Stage>,

    // constant-arrival-rate
    pub rate: Option<u64>,
    pub time_unit: Option<Duration>,
    pub pre_allocated_vus: Option<u64>,
    pub max_vus: Option<u64>,
}

/// The whole test plan as handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub vus: Option<u64>,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,
    pub scenarios: Vec<ScenarioOptions>,
    pub thresholds: Vec<ThresholdSet>,
    pub percentile_mode: PercentileMode,
}

fn stages_total(stages: &[Stage]) -> Duration {
    stages
        .iter()
        .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration))
}

fn constant_vus_scenario(
    s: ScenarioOptions,
    opts: &Options,
    cfg: &RunConfig,
) -> Result<ScenarioConfig> {
    let vus = cfg.vus.or(s.vus).or(opts.vus).unwrap_or(1);
    if vus == 0 {
        return Err(Error::InvalidVus);
    }

    let iterations = cfg.iterations.or(s.iterations).or(opts.iterations);
    if iterations == Some(0) {
        return Err(Error::InvalidIterations);
    }

    let duration = cfg.duration.or(s.duration).or(opts.duration);

    // Neither bound set => run each VU for a single shared iteration budget.
    let iterations = iterations.or(if duration.is_none() { Some(1) } else { None });

    Ok(ScenarioConfig {
        name: s.name,
        executor: ScenarioExecutor::ConstantVus { vus },
        iterations,
        duration,
        start_time: s.start_time.unwrap_or(Duration::ZERO),
        graceful_stop: s.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
        tags: s.tags,
    })
}

/// Validate raw options into runnable scenarios.
///
/// CLI flags have the highest priority: if the user explicitly requested a run
/// shape via `--vus`/`--iterations`/`--duration`, a ramping or arrival-rate
/// scenario collapses to constant VUs and its shape-specific fields are
/// ignored.
pub fn scenarios_from_options(opts: Options, cfg: RunConfig) -> Result<Vec<ScenarioConfig>> {
    let cli_overrides_set = cfg.vus.is_some() || cfg.iterations.is_some() || cfg.duration.is_some();

    if opts.scenarios.is_empty() {
        let s = ScenarioOptions {
            name: "default".to_string(),
            ..ScenarioOptions::default()
        };
        return Ok(vec![constant_vus_scenario(s, &opts, &cfg)?]);
    }

    let mut opts = opts;
    let scenarios = std::mem::take(&mut opts.scenarios);
    let mut out = Vec::with_capacity(scenarios.len());

    for s in scenarios {
        let executor_name = s.executor.as_deref().unwrap_or("constant-vus");
        let kind: ScenarioExecutorKind =
            executor_name.parse().map_err(|_| Error::InvalidExecutor)?;

        if cli_overrides_set && kind != ScenarioExecutorKind::ConstantVus {
            out.push(constant_vus_scenario(s, &opts, &cfg)?);
            continue;
        }

        match kind {
            ScenarioExecutorKind::ConstantVus => {
                out.push(constant_vus_scenario(s, &opts, &cfg)?);
            }
            ScenarioExecutorKind::RampingVus => {
                if s.iterations.is_some() || opts.iterations.is_some() {
                    return Err(Error::InvalidIterations);
                }
                if s.stages.is_empty() {
                    return Err(Error::InvalidStages);
                }

                let start_vus = s.start_vus.unwrap_or(0);
                let max_stage = s.stages.iter().map(|st| st.target).max().unwrap_or(0);
                if max_stage.max(start_vus) == 0 {
                    return Err(Error::InvalidVus);
                }

                let total = stages_total(&s.stages);
                if total.is_zero() {
                    return Err(Error::InvalidStages);
                }

                out.push(ScenarioConfig {
                    name: s.name,
                    executor: ScenarioExecutor::RampingVus {
                        start_vus,
                        stages: s.stages,
                    },
                    iterations: None,
                    duration: Some(total),
                    start_time: s.start_time.unwrap_or(Duration::ZERO),
                    graceful_stop: s.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
                    tags: s.tags,
                });
            }
            ScenarioExecutorKind::ConstantArrivalRate => {
                if s.iterations.is_some() || opts.iterations.is_some() {
                    return Err(Error::InvalidIterations);
                }

                let rate = s.rate.unwrap_or(0);
                if rate == 0 {
                    return Err(Error::InvalidRate);
                }

                let time_unit = s.time_unit.unwrap_or(Duration::from_secs(1));
                if time_unit.is_zero() {
                    return Err(Error::InvalidTimeUnit);
                }

                let pre_allocated_vus = s.pre_allocated_vus.unwrap_or(1);
                if pre_allocated_vus == 0 {
                    return Err(Error::InvalidPreAllocatedVus);
                }

                let max_vus = s.max_vus.unwrap_or(pre_allocated_vus);
                if max_vus < pre_allocated_vus {
                    return Err(Error::InvalidMaxVus);
                }

                let duration = s
                    .duration
                    .ok_or(Error::MissingDuration("constant-arrival-rate"))?;
                if duration.is_zero() {
                    return Err(Error::MissingDuration("constant-arrival-rate"));
                }

                out.push(ScenarioConfig {
                    name: s.name,
                    executor: ScenarioExecutor::ConstantArrivalRate {
                        rate,
                        time_unit,
                        pre_allocated_vus,
                        max_vus,
                    },
                    iterations: None,
                    duration: Some(duration),
                    start_time: s.start_time.unwrap_or(Duration::ZERO),
                    graceful_stop: s.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
                    tags: s.tags,
                });
            }
        }
    }

    Ok(out)
}
