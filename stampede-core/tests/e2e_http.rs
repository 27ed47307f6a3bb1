#![allow(clippy::unwrap_used)]

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use stampede_core::HttpRequest;
use stampede_core::runner::{
    Checks, IterationContext, RunHooks, RunOutcome, RunSettings, ScenarioConfig, ScenarioExecutor,
    Stage, ThresholdSet, run_scenarios,
};
use support::TestServer;

type BoxedIteration =
    std::pin::Pin<Box<dyn Future<Output = Result<(), std::convert::Infallible>> + Send>>;

fn constant_scenario(name: &str, vus: u64, duration: Duration) -> ScenarioConfig {
    ScenarioConfig {
        name: name.to_string(),
        executor: ScenarioExecutor::ConstantVus { vus },
        iterations: None,
        duration: Some(duration),
        start_time: Duration::ZERO,
        graceful_stop: Duration::from_secs(1),
        tags: Vec::new(),
    }
}

fn health_iteration(base_url: String) -> impl Fn(IterationContext) -> BoxedIteration + Clone {
    move |ctx: IterationContext| -> BoxedIteration {
        let url = format!("{base_url}/health");
        Box::pin(async move {
            let res = ctx.http(HttpRequest::get(url).with_name("/health")).await;
            let checks = Checks::new()
                .add("status is correct", |r: &stampede_core::runner::HttpResult| {
                    r.status == Some(200)
                })
                .add("response body is not empty", |r: &stampede_core::runner::HttpResult| {
                    !r.body.is_empty()
                });
            let _ = ctx.check(&res, &checks);
            Ok(())
        })
    }
}

async fn run_single(
    scenario: ScenarioConfig,
    thresholds: Vec<ThresholdSet>,
    base_url: String,
) -> stampede_core::runner::Result<RunOutcome> {
    run_scenarios(
        vec![scenario],
        thresholds,
        RunSettings::default(),
        RunHooks::default(),
        health_iteration(base_url),
        None,
    )
    .await
}

#[tokio::test]
async fn constant_vus_scenario_passes_its_thresholds() {
    let server = TestServer::start().await.unwrap();

    let thresholds = vec![
        ThresholdSet::parse("http_req_failed", &[("rate<0.01", false)]).unwrap(),
        ThresholdSet::parse("checks", &[("rate>0.99", false)]).unwrap(),
    ];

    let outcome = run_single(
        constant_scenario("warmup", 2, Duration::from_millis(300)),
        thresholds,
        server.base_url(),
    )
    .await
    .unwrap();

    let seen = server.stats().requests_total();
    server.shutdown().await;

    assert!(seen > 0, "expected the server to see requests");
    assert!(outcome.passed, "outcome: {:?}", outcome.thresholds);
    assert!(outcome.aborted.is_none());
    assert!(outcome.summary.iterations_total > 0);
    assert_eq!(outcome.summary.failed_requests_total, 0);
    assert_eq!(outcome.summary.scenarios.len(), 1);
    assert_eq!(outcome.summary.scenarios[0].scenario, "warmup");
}

#[tokio::test]
async fn iteration_bound_scenario_runs_the_shared_budget() {
    let server = TestServer::start().await.unwrap();

    let scenario = ScenarioConfig {
        iterations: Some(10),
        duration: None,
        ..constant_scenario("fixed", 3, Duration::ZERO)
    };

    let outcome = run_single(scenario, Vec::new(), server.base_url())
        .await
        .unwrap();
    server.shutdown().await;

    assert_eq!(outcome.summary.iterations_total, 10);
    assert_eq!(outcome.summary.requests_total, 10);
    assert!(outcome.passed);
}

#[tokio::test]
async fn ramping_scenario_completes_its_stages() {
    let server = TestServer::start().await.unwrap();

    let scenario = ScenarioConfig {
        name: "rampup".to_string(),
        executor: ScenarioExecutor::RampingVus {
            start_vus: 0,
            stages: vec![
                Stage {
                    duration: Duration::from_millis(150),
                    target: 4,
                },
                Stage {
                    duration: Duration::from_millis(150),
                    target: 0,
                },
            ],
        },
        iterations: None,
        duration: Some(Duration::from_millis(300)),
        start_time: Duration::ZERO,
        graceful_stop: Duration::from_secs(1),
        tags: Vec::new(),
    };

    let outcome = run_single(scenario, Vec::new(), server.base_url())
        .await
        .unwrap();
    server.shutdown().await;

    assert!(outcome.passed);
    assert!(outcome.summary.iterations_total > 0);
}

#[tokio::test]
async fn arrival_rate_scenario_starts_iterations_without_drops() {
    let server = TestServer::start().await.unwrap();

    let scenario = ScenarioConfig {
        name: "stress".to_string(),
        executor: ScenarioExecutor::ConstantArrivalRate {
            rate: 20,
            time_unit: Duration::from_secs(1),
            pre_allocated_vus: 10,
            max_vus: 20,
        },
        iterations: None,
        duration: Some(Duration::from_millis(500)),
        start_time: Duration::ZERO,
        graceful_stop: Duration::from_secs(1),
        tags: Vec::new(),
    };

    let outcome = run_single(scenario, Vec::new(), server.base_url())
        .await
        .unwrap();
    server.shutdown().await;

    assert!(outcome.passed);
    // ~10 arrivals are due over the window; allow generous scheduling slack.
    assert!(
        outcome.summary.iterations_total >= 3,
        "iterations={}",
        outcome.summary.iterations_total
    );
    assert_eq!(outcome.summary.dropped_iterations_total, 0);
}

#[tokio::test]
async fn abort_on_fail_threshold_stops_the_run_early() {
    let server = TestServer::start().await.unwrap();
    let base_url = server.base_url();

    let scenario = constant_scenario("failing", 2, Duration::from_secs(30));
    let thresholds = vec![ThresholdSet::parse("errors", &[("rate<0.5", true)]).unwrap()];

    let iteration = move |ctx: IterationContext| -> BoxedIteration {
        let url = format!("{base_url}/error");
        Box::pin(async move {
            let res = ctx.http(HttpRequest::get(url)).await;
            let checks = Checks::new().add(
                "status is correct",
                |r: &stampede_core::runner::HttpResult| r.status == Some(200),
            );
            let _ = ctx.check(&res, &checks);
            Ok(())
        })
    };

    let settings = RunSettings {
        supervisor_interval: Duration::from_millis(100),
        ..RunSettings::default()
    };

    let outcome = run_scenarios(
        vec![scenario],
        thresholds,
        settings,
        RunHooks::default(),
        iteration,
        None,
    )
    .await
    .unwrap();
    server.shutdown().await;

    assert!(!outcome.passed);
    let aborted = outcome.aborted.unwrap();
    assert_eq!(aborted.metric, "errors");
    assert!(
        outcome.summary.run_duration < Duration::from_secs(10),
        "run should stop well before the 30s window: {:?}",
        outcome.summary.run_duration
    );
}

#[tokio::test]
async fn unknown_threshold_metric_fails_before_any_vu_runs() {
    let server = TestServer::start().await.unwrap();

    let thresholds = vec![ThresholdSet::parse("nonexistent", &[("rate<0.01", false)]).unwrap()];
    let result = run_single(
        constant_scenario("warmup", 2, Duration::from_millis(200)),
        thresholds,
        server.base_url(),
    )
    .await;

    let seen = server.stats().requests_total();
    server.shutdown().await;

    assert!(matches!(
        result,
        Err(stampede_core::runner::Error::UnknownThresholdMetric(_))
    ));
    assert_eq!(seen, 0, "no VU may run on configuration errors");
}

#[tokio::test]
async fn graceful_stop_forces_termination_of_stuck_iterations() {
    let server = TestServer::start().await.unwrap();

    let scenario = ScenarioConfig {
        graceful_stop: Duration::from_millis(200),
        ..constant_scenario("stuck", 2, Duration::from_millis(200))
    };

    let iteration = move |ctx: IterationContext| -> BoxedIteration {
        Box::pin(async move {
            // Far longer than window + grace; the reaper must cut this off.
            ctx.sleep(Duration::from_secs(60)).await;
            Ok(())
        })
    };

    let started = std::time::Instant::now();
    let outcome = run_scenarios(
        vec![scenario],
        Vec::new(),
        RunSettings::default(),
        RunHooks::default(),
        iteration,
        None,
    )
    .await
    .unwrap();
    server.shutdown().await;

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "forced termination took too long: {:?}",
        started.elapsed()
    );
    // The stuck iterations never completed, so none were recorded.
    assert_eq!(outcome.summary.iterations_total, 0);
    assert!(outcome.passed);
}

#[tokio::test]
async fn start_offsets_sequence_scenarios() {
    let server = TestServer::start().await.unwrap();

    let first = constant_scenario("first", 1, Duration::from_millis(150));
    let second = ScenarioConfig {
        start_time: Duration::from_millis(300),
        ..constant_scenario("second", 1, Duration::from_millis(150))
    };

    let outcome = run_scenarios(
        vec![first, second],
        Vec::new(),
        RunSettings::default(),
        RunHooks::default(),
        health_iteration(server.base_url()),
        None,
    )
    .await
    .unwrap();
    server.shutdown().await;

    assert!(outcome.summary.run_duration >= Duration::from_millis(400));
    assert_eq!(outcome.summary.scenarios.len(), 2);
    for s in &outcome.summary.scenarios {
        assert!(
            s.iterations_total > 0,
            "scenario {} ran no iterations",
            s.scenario
        );
    }
}

#[tokio::test]
async fn setup_and_teardown_hooks_run_exactly_once() {
    let server = TestServer::start().await.unwrap();

    let setup_calls = Arc::new(AtomicU64::new(0));
    let teardown_calls = Arc::new(AtomicU64::new(0));
    let hooks = RunHooks {
        setup: Some(Box::new({
            let calls = setup_calls.clone();
            move || {
                calls.fetch_add(1, Ordering::Relaxed);
            }
        })),
        teardown: Some(Box::new({
            let calls = teardown_calls.clone();
            move || {
                calls.fetch_add(1, Ordering::Relaxed);
            }
        })),
    };

    let scenario = ScenarioConfig {
        iterations: Some(2),
        duration: None,
        ..constant_scenario("hooked", 1, Duration::ZERO)
    };

    let outcome = run_scenarios(
        vec![scenario],
        Vec::new(),
        RunSettings::default(),
        hooks,
        health_iteration(server.base_url()),
        None,
    )
    .await
    .unwrap();
    server.shutdown().await;

    assert!(outcome.passed);
    assert_eq!(setup_calls.load(Ordering::Relaxed), 1);
    assert_eq!(teardown_calls.load(Ordering::Relaxed), 1);
}
