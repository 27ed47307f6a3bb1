use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::Barrier;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use stampede_metrics::{Collector, PercentileMode};

use crate::HttpClient;

use super::config::{ScenarioConfig, ScenarioExecutor};
use super::error::Result;
use super::gate::{IterationGate, StopSignal};
use super::pacer::ArrivalPacer;
use super::phase::{PhaseTracker, RunPhase};
use super::progress::{ProgressFn, ProgressUpdate, ScenarioProgress};
use super::schedule::RampSchedule;
use super::stats::{RunStats, RunSummary};
use super::thresholds::{
    ThresholdOutcome, ThresholdSet, abort_breached, evaluate_thresholds, validate_thresholds,
};
use super::vu::{IterationContext, StartSignal, VuContext, VuWork, run_vu};

pub type HookFn = Box<dyn FnOnce() + Send>;

/// Lifecycle callbacks. Setup runs before any VU starts; teardown runs
/// exactly once while evaluating, whether or not the run passed.
#[derive(Default)]
pub struct RunHooks {
    pub setup: Option<HookFn>,
    pub teardown: Option<HookFn>,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub percentile_mode: PercentileMode,
    /// Cadence of progress updates and abort-threshold evaluation.
    pub supervisor_interval: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            percentile_mode: PercentileMode::default(),
            supervisor_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub thresholds: Vec<ThresholdOutcome>,
    /// The expression that aborted the run mid-flight, if any.
    pub aborted: Option<ThresholdOutcome>,
    /// True iff every threshold passed and no abort occurred.
    pub passed: bool,
}

struct ScenarioRuntime {
    cfg: ScenarioConfig,
    gate: Option<Arc<IterationGate>>,
    schedule: Option<Arc<RampSchedule>>,
    pacer: Option<Arc<ArrivalPacer>>,
    handles: Vec<JoinHandle<()>>,
}

enum SupervisedWork {
    Constant { vus: u64 },
    Ramping { schedule: Arc<RampSchedule> },
    Arrival { pacer: Arc<ArrivalPacer> },
}

struct SupervisedScenario {
    name: String,
    max_vus: u64,
    start_time: Duration,
    work: SupervisedWork,
}

/// Run a full test: spawn VUs per scenario, keep populations on target,
/// enforce graceful-stop windows, evaluate thresholds, and summarize.
pub async fn run_scenarios<F, Fut, E>(
    scenarios: Vec<ScenarioConfig>,
    thresholds: Vec<ThresholdSet>,
    settings: RunSettings,
    hooks: RunHooks,
    iteration: F,
    progress: Option<ProgressFn>,
) -> Result<RunOutcome>
where
    F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let collector = Arc::new(Collector::new(settings.percentile_mode));
    let stats = Arc::new(RunStats::new(collector.clone()));

    for s in &scenarios {
        stats.ensure_scenario(&s.name);
    }

    // Configuration errors abort before a single VU is spawned.
    validate_thresholds(&thresholds, &collector)?;

    let phase = Arc::new(PhaseTracker::new());

    if let Some(setup) = hooks.setup {
        setup();
    }

    let client = Arc::new(HttpClient::default());
    let stop = Arc::new(StopSignal::new());
    let start_signal = Arc::new(StartSignal::new());
    let run_started: Arc<OnceLock<Instant>> = Arc::new(OnceLock::new());

    let total_vus: usize = scenarios.iter().map(|s| s.max_vus() as usize).sum();
    let ready_barrier = Arc::new(Barrier::new(total_vus.saturating_add(1)));

    let mut next_vu_id: u64 = 1;
    let mut runtimes: Vec<ScenarioRuntime> = Vec::with_capacity(scenarios.len());

    for cfg in scenarios {
        let (work, gate, schedule, pacer) = match &cfg.executor {
            ScenarioExecutor::ConstantVus { .. } => {
                let gate = Arc::new(IterationGate::new(cfg.iterations, cfg.duration));
                (
                    VuWork::Constant { gate: gate.clone() },
                    Some(gate),
                    None,
                    None,
                )
            }
            ScenarioExecutor::RampingVus { start_vus, stages } => {
                let schedule = Arc::new(RampSchedule::new(*start_vus, stages.clone()));
                (
                    VuWork::Ramping {
                        schedule: schedule.clone(),
                    },
                    None,
                    Some(schedule),
                    None,
                )
            }
            ScenarioExecutor::ConstantArrivalRate {
                pre_allocated_vus,
                max_vus,
                ..
            } => {
                let pacer = Arc::new(ArrivalPacer::new(*pre_allocated_vus, *max_vus));
                (
                    VuWork::ArrivalRate {
                        pacer: pacer.clone(),
                    },
                    None,
                    None,
                    Some(pacer),
                )
            }
        };

        let mut tags = cfg.tags.clone();
        if !tags.iter().any(|(k, _)| k == "scenario") {
            tags.push(("scenario".to_string(), cfg.name.clone()));
        }
        let tags = Arc::new(tags);
        let scenario_name: Arc<str> = Arc::from(cfg.name.as_str());

        let scenario_vus = cfg.max_vus();
        let mut handles = Vec::with_capacity(scenario_vus as usize);
        for scenario_vu in 1..=scenario_vus {
            let ctx = VuContext {
                vu_id: next_vu_id,
                scenario: scenario_name.clone(),
                scenario_vu,
                tags: tags.clone(),
                client: client.clone(),
                stats: stats.clone(),
                work: work.clone(),
                start_time: cfg.start_time,
                run_started: run_started.clone(),
                ready_barrier: ready_barrier.clone(),
                start_signal: start_signal.clone(),
                stop: stop.clone(),
            };
            next_vu_id = next_vu_id.saturating_add(1);

            let iteration = iteration.clone();
            handles.push(tokio::spawn(run_vu(ctx, iteration)));
        }

        runtimes.push(ScenarioRuntime {
            cfg,
            gate,
            schedule,
            pacer,
            handles,
        });
    }

    // All VUs are parked on the barrier; anchor the clock and let them go.
    ready_barrier.wait().await;
    let started = Instant::now();
    let _ = run_started.set(started);

    for rt in &runtimes {
        if let Some(gate) = &rt.gate {
            gate.open_at(started + rt.cfg.start_time);
        }
    }

    phase.advance(RunPhase::Running);
    start_signal.start();

    // Arrival pacers convert wall-clock time into iteration tokens.
    let mut driver_handles: Vec<JoinHandle<()>> = Vec::new();
    for rt in &runtimes {
        let (Some(pacer), ScenarioExecutor::ConstantArrivalRate {
            rate, time_unit, ..
        }) = (&rt.pacer, &rt.cfg.executor)
        else {
            continue;
        };

        let pacer = pacer.clone();
        let stop = stop.clone();
        let stats = stats.clone();
        let scenario = rt.cfg.name.clone();
        let scenario_started = started + rt.cfg.start_time;
        let duration = rt.cfg.duration.unwrap_or(Duration::ZERO);
        let (rate, time_unit) = (*rate, *time_unit);

        driver_handles.push(tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep_until(scenario_started.into()) => {}
                () = stop.wait() => {
                    pacer.mark_done();
                    return;
                }
            }

            let tick = Duration::from_millis(10);
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut carry = 0.0f64;
            let mut last_dropped = 0u64;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    () = stop.wait() => break,
                }

                let elapsed = Instant::now().saturating_duration_since(scenario_started);
                if elapsed >= duration {
                    break;
                }

                carry += rate as f64 * (tick.as_secs_f64() / time_unit.as_secs_f64().max(1e-9));
                let due = carry.floor() as u64;
                carry -= due as f64;

                pacer.offer(due);
                pacer.relax();

                let dropped = pacer.dropped_total();
                let delta = dropped.saturating_sub(last_dropped);
                if delta != 0 {
                    stats.record_dropped_iterations(&scenario, delta);
                    last_dropped = dropped;
                }
            }

            pacer.mark_done();
        }));
    }

    // Supervisor: per-tick progress plus mid-run abort thresholds.
    let abort_outcome: Arc<Mutex<Option<ThresholdOutcome>>> = Arc::new(Mutex::new(None));
    let supervised: Vec<SupervisedScenario> = runtimes
        .iter()
        .map(|rt| SupervisedScenario {
            name: rt.cfg.name.clone(),
            max_vus: rt.cfg.max_vus(),
            start_time: rt.cfg.start_time,
            work: match (&rt.cfg.executor, &rt.schedule, &rt.pacer) {
                (_, Some(schedule), _) => SupervisedWork::Ramping {
                    schedule: schedule.clone(),
                },
                (_, _, Some(pacer)) => SupervisedWork::Arrival {
                    pacer: pacer.clone(),
                },
                (ScenarioExecutor::ConstantVus { vus }, ..) => {
                    SupervisedWork::Constant { vus: *vus }
                }
                _ => SupervisedWork::Constant { vus: 0 },
            },
        })
        .collect();

    let supervisor = {
        let stats = stats.clone();
        let collector = collector.clone();
        let stop = stop.clone();
        let thresholds = thresholds.clone();
        let abort_outcome = abort_outcome.clone();
        let phase = phase.clone();
        let interval_len = settings.supervisor_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_len);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            interval.tick().await;

            let mut tick_id: u64 = 0;
            let mut last_at = Instant::now();
            let mut last_requests = stats.requests_total();

            loop {
                interval.tick().await;
                tick_id = tick_id.saturating_add(1);

                let now = Instant::now();
                let dt = now.duration_since(last_at);
                last_at = now;

                let requests = stats.requests_total();
                let rps_now =
                    requests.saturating_sub(last_requests) as f64 / dt.as_secs_f64().max(1e-9);
                last_requests = requests;
                stats.record_rps_sample(rps_now);

                if !stop.is_stopped()
                    && let Some(breach) = abort_breached(&thresholds, &collector)
                {
                    {
                        let mut slot = abort_outcome
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        if slot.is_none() {
                            *slot = Some(breach);
                        }
                    }
                    stop.stop();
                }

                if let Some(progress) = &progress {
                    let elapsed = started.elapsed();
                    let scenarios = supervised
                        .iter()
                        .map(|s| {
                            let scenario_elapsed =
                                elapsed.saturating_sub(s.start_time);
                            let active = s.start_time <= elapsed;
                            let current_target = match &s.work {
                                SupervisedWork::Constant { vus } => {
                                    if active { *vus } else { 0 }
                                }
                                SupervisedWork::Ramping { schedule } => {
                                    if active {
                                        schedule.target_at(scenario_elapsed)
                                    } else {
                                        0
                                    }
                                }
                                SupervisedWork::Arrival { pacer } => pacer.active_vus(),
                            };
                            let dropped = match &s.work {
                                SupervisedWork::Arrival { pacer } => pacer.dropped_total(),
                                _ => 0,
                            };

                            ScenarioProgress {
                                name: s.name.clone(),
                                current_target,
                                max_vus: s.max_vus,
                                dropped_iterations_total: dropped,
                            }
                        })
                        .collect();

                    (progress)(ProgressUpdate {
                        tick: tick_id,
                        elapsed,
                        phase: phase.current(),
                        requests_total: requests,
                        failed_requests_total: stats.failed_requests_total(),
                        iterations_total: stats.iterations_total(),
                        checks_failed_total: stats.checks_failed_total(),
                        rps_now,
                        scenarios,
                    });
                }
            }
        })
    };

    // Flip to graceful-stop once every scenario window has elapsed (or the
    // run aborts). Iteration-bound scenarios have no window; for those the
    // flip happens when their VUs drain.
    let phase_watcher = {
        let stop = stop.clone();
        let phase = phase.clone();
        let global_end = runtimes
            .iter()
            .filter_map(|rt| rt.cfg.window_end())
            .max()
            .map(|d| started + d);

        tokio::spawn(async move {
            match global_end {
                Some(end) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(end.into()) => {}
                        () = stop.wait() => {}
                    }
                }
                None => stop.wait().await,
            }
            phase.advance(RunPhase::GracefulStop);
        })
    };

    // Reap each scenario: wait for its VUs, then force-terminate whatever is
    // still running once the graceful-stop window expires.
    let mut reapers: Vec<JoinHandle<()>> = Vec::new();
    for rt in runtimes {
        let stop = stop.clone();
        let graceful_stop = rt.cfg.graceful_stop;
        let window_end = rt.cfg.window_end().map(|d| started + d);
        let handles = rt.handles;

        reapers.push(tokio::spawn(async move {
            let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
            let joiner = async move {
                for h in handles {
                    let _ = h.await;
                }
            };
            tokio::pin!(joiner);

            let deadline_fut = async {
                match window_end {
                    Some(end) => {
                        tokio::select! {
                            () = tokio::time::sleep_until(end.into()) => {}
                            () = stop.wait() => {}
                        }
                    }
                    None => stop.wait().await,
                }
                tokio::time::Instant::now() + graceful_stop
            };
            tokio::pin!(deadline_fut);

            tokio::select! {
                () = &mut joiner => {}
                deadline = &mut deadline_fut => {
                    tokio::select! {
                        () = &mut joiner => {}
                        () = tokio::time::sleep_until(deadline) => {
                            // Forced termination: cancellation lands on the
                            // VUs' next suspension point. Samples already
                            // recorded stay valid.
                            for handle in &aborts {
                                handle.abort();
                            }
                            joiner.await;
                        }
                    }
                }
            }
        }));
    }

    for reaper in reapers {
        reaper.await?;
    }
    for driver in driver_handles {
        let _ = driver.await;
    }

    phase.advance(RunPhase::GracefulStop);
    phase_watcher.abort();
    let _ = phase_watcher.await;
    supervisor.abort();
    let _ = supervisor.await;

    phase.advance(RunPhase::Evaluating);

    if let Some(teardown) = hooks.teardown {
        teardown();
    }

    let outcomes = evaluate_thresholds(&thresholds, &collector);
    let summary = stats.summarize(started.elapsed());

    let aborted = abort_outcome
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    let passed = aborted.is_none() && outcomes.iter().all(|o| o.passed);

    phase.advance(RunPhase::Done);

    Ok(RunOutcome {
        summary,
        thresholds: outcomes,
        aborted,
        passed,
    })
}
