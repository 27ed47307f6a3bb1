use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use stampede_core::runner::{ProgressFn, ProgressUpdate, RunOutcome, ScenarioConfig};

pub(crate) struct JsonOutput;

impl super::OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _scenarios: &[ScenarioConfig]) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            emit_json_line(&build_progress_line(&u));
        }))
    }

    fn print_summary(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(outcome));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct JsonProgressLine {
    kind: &'static str,
    tick: u64,
    elapsed_secs: u64,
    phase: String,
    rps_now: f64,
    requests_total: u64,
    failed_requests_total: u64,
    iterations_total: u64,
    checks_failed_total: u64,
    scenarios: Vec<JsonScenarioProgress>,
}

#[derive(Debug, Serialize)]
struct JsonScenarioProgress {
    name: String,
    current_target: u64,
    max_vus: u64,
    dropped_iterations_total: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs(),
        phase: u.phase.to_string(),
        rps_now: u.rps_now,
        requests_total: u.requests_total,
        failed_requests_total: u.failed_requests_total,
        iterations_total: u.iterations_total,
        checks_failed_total: u.checks_failed_total,
        scenarios: u
            .scenarios
            .iter()
            .map(|s| JsonScenarioProgress {
                name: s.name.clone(),
                current_target: s.current_target,
                max_vus: s.max_vus,
                dropped_iterations_total: s.dropped_iterations_total,
            })
            .collect(),
    }
}

#[derive(Debug, Serialize)]
struct JsonSummaryLine {
    kind: &'static str,
    passed: bool,
    aborted_by: Option<String>,
    run_duration_ms: u64,
    totals: JsonTotals,
    latency: Option<JsonLatency>,
    scenarios: Vec<JsonScenarioSummary>,
    thresholds: Vec<JsonThreshold>,
}

#[derive(Debug, Serialize)]
struct JsonTotals {
    requests_total: u64,
    failed_requests_total: u64,
    iterations_total: u64,
    dropped_iterations_total: u64,
    checks_total: u64,
    checks_failed: u64,
    bytes_received_total: u64,
    bytes_sent_total: u64,
    rps: f64,
}

#[derive(Debug, Serialize)]
struct JsonLatency {
    count: u64,
    min: Option<f64>,
    max: Option<f64>,
    avg: Option<f64>,
    p50: Option<f64>,
    p90: Option<f64>,
    p95: Option<f64>,
    p99: Option<f64>,
}

#[derive(Debug, Serialize)]
struct JsonScenarioSummary {
    scenario: String,
    requests_total: u64,
    failed_requests_total: u64,
    iterations_total: u64,
    dropped_iterations_total: u64,
    checks_failed_total: u64,
}

#[derive(Debug, Serialize)]
struct JsonThreshold {
    metric: String,
    expression: String,
    passed: bool,
    observed: Option<f64>,
    abort_on_fail: bool,
    error: Option<String>,
}

fn build_summary_line(outcome: &RunOutcome) -> JsonSummaryLine {
    let summary = &outcome.summary;

    JsonSummaryLine {
        kind: "summary",
        passed: outcome.passed,
        aborted_by: outcome
            .aborted
            .as_ref()
            .map(|t| format!("{} {}", t.metric, t.expression)),
        run_duration_ms: summary.run_duration.as_millis() as u64,
        totals: JsonTotals {
            requests_total: summary.requests_total,
            failed_requests_total: summary.failed_requests_total,
            iterations_total: summary.iterations_total,
            dropped_iterations_total: summary.dropped_iterations_total,
            checks_total: summary.checks_total,
            checks_failed: summary.checks_failed,
            bytes_received_total: summary.bytes_received_total,
            bytes_sent_total: summary.bytes_sent_total,
            rps: summary.rps,
        },
        latency: summary.latency.as_ref().map(|l| JsonLatency {
            count: l.count,
            min: l.min,
            max: l.max,
            avg: l.avg,
            p50: l.p50,
            p90: l.p90,
            p95: l.p95,
            p99: l.p99,
        }),
        scenarios: summary
            .scenarios
            .iter()
            .map(|s| JsonScenarioSummary {
                scenario: s.scenario.clone(),
                requests_total: s.requests_total,
                failed_requests_total: s.failed_requests_total,
                iterations_total: s.iterations_total,
                dropped_iterations_total: s.dropped_iterations_total,
                checks_failed_total: s.checks_failed_total,
            })
            .collect(),
        thresholds: outcome
            .thresholds
            .iter()
            .map(|t| JsonThreshold {
                metric: t.metric.clone(),
                expression: t.expression.clone(),
                passed: t.passed,
                observed: t.observed,
                abort_on_fail: t.abort_on_fail,
                error: t.error.clone(),
            })
            .collect(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
