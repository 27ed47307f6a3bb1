use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{Barrier, Notify};

use crate::{HttpClient, HttpRequest, HttpTransportErrorKind};

use super::checks::{Checks, run_checks};
use super::gate::{IterationGate, StopSignal};
use super::pacer::ArrivalPacer;
use super::schedule::RampSchedule;
use super::stats::{HttpRequestMeta, RunStats};
use stampede_metrics::{MetricHandle, MetricKind};

/// Opens once the runner has anchored the clock; VUs block on it so
/// initialization never counts against the measured run time.
#[derive(Debug, Default)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        while !self.started.load(Ordering::Acquire) {
            let notified = self.notify.notified();
            if self.started.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone)]
pub enum VuWork {
    Constant { gate: Arc<IterationGate> },
    Ramping { schedule: Arc<RampSchedule> },
    ArrivalRate { pacer: Arc<ArrivalPacer> },
}

/// Everything one VU task needs for its whole lifecycle.
#[derive(Debug, Clone)]
pub struct VuContext {
    pub(crate) vu_id: u64,
    pub(crate) scenario: Arc<str>,
    pub(crate) scenario_vu: u64,
    pub(crate) tags: Arc<Vec<(String, String)>>,
    pub(crate) client: Arc<HttpClient>,
    pub(crate) stats: Arc<RunStats>,
    pub(crate) work: VuWork,
    pub(crate) start_time: Duration,
    pub(crate) run_started: Arc<OnceLock<Instant>>,
    pub(crate) ready_barrier: Arc<Barrier>,
    pub(crate) start_signal: Arc<StartSignal>,
    pub(crate) stop: Arc<StopSignal>,
}

/// Handed to the scenario function once per iteration.
#[derive(Debug, Clone)]
pub struct IterationContext {
    vu_id: u64,
    scenario: Arc<str>,
    scenario_vu: u64,
    iteration: u64,
    tags: Arc<Vec<(String, String)>>,
    client: Arc<HttpClient>,
    stats: Arc<RunStats>,
}

/// Outcome of one HTTP call as seen by a scenario function. Transport errors
/// are folded in rather than raised: the call is recorded as a failed sample
/// and the iteration carries on, mirroring how checks consume it.
#[derive(Debug, Clone)]
pub struct HttpResult {
    pub status: Option<u16>,
    pub body: Bytes,
    pub error: Option<HttpTransportErrorKind>,
    pub duration: Duration,
}

impl HttpResult {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.error.is_none() && self.status.is_some_and(|s| s < 400)
    }

    #[must_use]
    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

impl IterationContext {
    #[must_use]
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    #[must_use]
    pub fn scenario_vu(&self) -> u64 {
        self.scenario_vu
    }

    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Perform one HTTP call, recording duration, byte, and failure samples.
    pub async fn http(&self, req: HttpRequest) -> HttpResult {
        let method = req.method.as_str().to_string();
        let name = req.metric_name().to_string();

        let started = Instant::now();
        let result = self.client.request(req).await;
        let elapsed = started.elapsed();

        match result {
            Ok(res) => {
                self.stats.record_http_request(
                    &self.scenario,
                    HttpRequestMeta {
                        method: &method,
                        name: &name,
                        status: Some(res.status),
                        transport_error_kind: None,
                        elapsed,
                        bytes_received: res.bytes_received,
                        bytes_sent: res.bytes_sent,
                    },
                    &self.tags,
                );

                HttpResult {
                    status: Some(res.status),
                    body: res.body,
                    error: None,
                    duration: elapsed,
                }
            }
            Err(err) => {
                let kind = err.transport_error_kind();
                self.stats.record_http_request(
                    &self.scenario,
                    HttpRequestMeta {
                        method: &method,
                        name: &name,
                        status: None,
                        transport_error_kind: Some(kind),
                        elapsed,
                        bytes_received: 0,
                        bytes_sent: 0,
                    },
                    &self.tags,
                );

                HttpResult {
                    status: None,
                    body: Bytes::new(),
                    error: Some(kind),
                    duration: elapsed,
                }
            }
        }
    }

    /// Evaluate named checks against a subject; see [`run_checks`].
    pub fn check<T>(&self, subject: &T, checks: &Checks<'_, T>) -> bool {
        run_checks(&self.stats, &self.tags, subject, checks)
    }

    /// Cooperative pause inside an iteration. A suspension point: forced
    /// termination after the graceful-stop window lands here.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Writer handle for a custom metric.
    pub fn metric(&self, kind: MetricKind, name: &str) -> MetricHandle {
        self.stats.declare_metric(kind, name)
    }
}

async fn run_one<F, Fut, E>(ctx: &VuContext, iteration: &F, iter_count: &mut u64)
where
    F: Fn(IterationContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), E>> + Send,
    E: std::fmt::Display,
{
    let ictx = IterationContext {
        vu_id: ctx.vu_id,
        scenario: ctx.scenario.clone(),
        scenario_vu: ctx.scenario_vu,
        iteration: *iter_count,
        tags: ctx.tags.clone(),
        client: ctx.client.clone(),
        stats: ctx.stats.clone(),
    };
    *iter_count += 1;

    let started = Instant::now();
    if let Err(err) = iteration(ictx).await {
        // Iteration failures are recorded and recovered; the VU carries on.
        ctx.stats.record_iteration_error(&err.to_string());
    }
    ctx.stats
        .record_iteration(&ctx.scenario, started.elapsed(), &ctx.tags);
}

/// Drive one VU for the lifetime of its scenario.
pub(crate) async fn run_vu<F, Fut, E>(ctx: VuContext, iteration: F)
where
    F: Fn(IterationContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), E>> + Send,
    E: std::fmt::Display,
{
    ctx.ready_barrier.wait().await;
    ctx.start_signal.wait().await;

    let run_started = ctx.run_started.get().copied().unwrap_or_else(Instant::now);
    let scenario_started = run_started + ctx.start_time;

    if ctx.start_time > Duration::ZERO {
        tokio::select! {
            () = tokio::time::sleep_until(scenario_started.into()) => {}
            () = ctx.stop.wait() => return,
        }
    }

    let mut iter_count: u64 = 0;

    match ctx.work.clone() {
        VuWork::Constant { gate } => {
            while gate.next(&ctx.stop) {
                run_one(&ctx, &iteration, &mut iter_count).await;
            }
        }
        VuWork::Ramping { schedule } => loop {
            if ctx.stop.is_stopped() {
                break;
            }

            let elapsed = Instant::now().saturating_duration_since(scenario_started);
            if schedule.is_done(elapsed) {
                break;
            }

            if ctx.scenario_vu > schedule.target_at(elapsed) {
                let wait = schedule.next_recheck_in(elapsed, ctx.scenario_vu);
                tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                continue;
            }

            run_one(&ctx, &iteration, &mut iter_count).await;
        },
        VuWork::ArrivalRate { pacer } => loop {
            // On a stop request pending arrival tokens are abandoned; on a
            // natural end they drain before the claim below returns false.
            if ctx.stop.is_stopped() {
                break;
            }

            // Reserve VUs idle until the pacer activates them.
            if ctx.scenario_vu > pacer.active_vus() {
                if pacer.is_done() {
                    break;
                }
                tokio::select! {
                    () = pacer.wait_for_update() => {}
                    // Re-check periodically so a missed wake-up cannot strand us.
                    () = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
                continue;
            }

            if !pacer.claim().await {
                break;
            }
            run_one(&ctx, &iteration, &mut iter_count).await;
            pacer.complete();
        },
    }
}
