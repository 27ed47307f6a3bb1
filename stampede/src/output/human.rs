use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use stampede_core::runner::{
    ProgressFn, RunOutcome, ScenarioConfig, ScenarioExecutor, ThresholdOutcome,
};

pub(crate) struct HumanReadableOutput;

impl super::OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, scenarios: &[ScenarioConfig]) {
        println!("plan: {}", plan_path.display());
        for s in scenarios {
            println!("scenario: {} {}", s.name, describe_executor(s));
        }
    }

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(|u| {
            eprintln!(
                "[{:>4}s] phase={} rps={:.1} iterations={} requests={} failed={}",
                u.elapsed.as_secs(),
                u.phase,
                u.rps_now,
                u.iterations_total,
                u.requests_total,
                u.failed_requests_total,
            );
        }))
    }

    fn print_summary(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        print!("{}", render(outcome));
        Ok(())
    }
}

fn describe_executor(s: &ScenarioConfig) -> String {
    match &s.executor {
        ScenarioExecutor::ConstantVus { vus } => {
            let mut out = format!("executor=constant-vus vus={vus}");
            if let Some(d) = s.duration {
                let _ = write!(out, " duration={}", format_duration(d));
            }
            if let Some(i) = s.iterations {
                let _ = write!(out, " iterations={i}");
            }
            out
        }
        ScenarioExecutor::RampingVus { stages, .. } => format!(
            "executor=ramping-vus stages={} duration={}",
            stages.len(),
            format_duration(s.duration.unwrap_or_default())
        ),
        ScenarioExecutor::ConstantArrivalRate {
            rate,
            time_unit,
            max_vus,
            ..
        } => format!(
            "executor=constant-arrival-rate rate={rate}/{} maxVUs={max_vus} duration={}",
            format_duration(*time_unit),
            format_duration(s.duration.unwrap_or_default())
        ),
    }
}

fn render(outcome: &RunOutcome) -> String {
    let summary = &outcome.summary;
    let mut out = String::new();

    out.push_str("summary\n");
    for s in &summary.scenarios {
        writeln!(&mut out, "scenario: {}", s.scenario).ok();
        writeln!(
            &mut out,
            "  requests: {} (failed {})",
            s.requests_total, s.failed_requests_total
        )
        .ok();
        writeln!(
            &mut out,
            "  iterations: {} (dropped {})",
            s.iterations_total, s.dropped_iterations_total
        )
        .ok();
        if s.checks_failed_total > 0 {
            writeln!(&mut out, "  checks_failed_total: {}", s.checks_failed_total).ok();
        }
    }

    out.push_str("totals\n");
    writeln!(
        &mut out,
        "  requests: {} (failed {})",
        summary.requests_total, summary.failed_requests_total
    )
    .ok();
    writeln!(
        &mut out,
        "  iterations: {} (dropped {})",
        summary.iterations_total, summary.dropped_iterations_total
    )
    .ok();
    writeln!(
        &mut out,
        "  checks: {} (failed {})",
        summary.checks_total, summary.checks_failed
    )
    .ok();
    writeln!(
        &mut out,
        "  bytes: recv {} sent {}",
        format_bytes(summary.bytes_received_total),
        format_bytes(summary.bytes_sent_total)
    )
    .ok();
    writeln!(
        &mut out,
        "  rps: {:.1} (avg {:.1} max {:.1})",
        summary.rps, summary.req_per_sec_avg, summary.req_per_sec_max
    )
    .ok();

    if let Some(l) = &summary.latency {
        writeln!(
            &mut out,
            "  latency: p50={} p90={} p95={} p99={} avg={} max={} (n={})",
            format_ms(l.p50),
            format_ms(l.p90),
            format_ms(l.p95),
            format_ms(l.p99),
            format_ms(l.avg),
            format_ms(l.max),
            l.count
        )
        .ok();
    } else {
        out.push_str("  latency: n/a\n");
    }

    let failed_checks: Vec<_> = summary
        .checks_by_name
        .iter()
        .filter(|c| c.failed > 0)
        .collect();
    if !failed_checks.is_empty() {
        out.push_str("failed checks\n");
        for c in failed_checks {
            writeln!(&mut out, "  {}: {}/{}", c.name, c.failed, c.total).ok();
        }
    }

    if !outcome.thresholds.is_empty() {
        out.push_str("thresholds\n");
        for t in &outcome.thresholds {
            writeln!(&mut out, "  {}", describe_threshold(t)).ok();
        }
    }

    match &outcome.aborted {
        Some(t) => {
            writeln!(
                &mut out,
                "result: FAILED (aborted by {} {})",
                t.metric, t.expression
            )
            .ok();
        }
        None if outcome.passed => {
            out.push_str("result: PASSED\n");
        }
        None => {
            out.push_str("result: FAILED\n");
        }
    }

    out
}

fn describe_threshold(t: &ThresholdOutcome) -> String {
    let status = if t.passed { "ok" } else { "FAILED" };
    let observed = match t.observed {
        Some(v) => format!("{v:.3}"),
        None => "-".to_string(),
    };
    match &t.error {
        Some(err) => format!("{status} {} {} observed={observed} ({err})", t.metric, t.expression),
        None => format!("{status} {} {} observed={observed}", t.metric, t.expression),
    }
}

fn format_ms(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.1}ms"),
        None => "-".to_string(),
    }
}

fn format_duration(d: std::time::Duration) -> String {
    humantime::format_duration(d).to_string()
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
