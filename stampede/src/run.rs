use std::sync::Arc;

use anyhow::Context as _;

use stampede_core::runner::{
    RunConfig, RunHooks, RunOutcome, RunSettings, scenarios_from_options,
};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::iteration::IterationPlan;
use crate::output;
use crate::plan;

pub async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let out = output::formatter(args.output);

    let plan = plan::load_plan(&args.plan).await?;
    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| plan.base_url.clone());

    let options = plan.to_options()?;
    let thresholds = options.thresholds.clone();
    let percentile_mode = options.percentile_mode;

    let cfg = RunConfig {
        iterations: args.iterations,
        vus: args.vus,
        duration: args.duration,
    };
    let scenarios =
        scenarios_from_options(options, cfg).context("invalid scenario configuration")?;

    out.print_header(&args.plan, &scenarios);

    let iteration = Arc::new(IterationPlan::from_plan(&plan, &base_url)?);
    let settings = RunSettings {
        percentile_mode,
        ..RunSettings::default()
    };
    let hooks = RunHooks {
        setup: None,
        teardown: Some(Box::new(|| eprintln!("load test completed"))),
    };

    let outcome = stampede_core::runner::run_scenarios(
        scenarios,
        thresholds,
        settings,
        hooks,
        iteration.into_fn(),
        out.progress(),
    )
    .await?;

    out.print_summary(&outcome)?;
    print_threshold_failures(&outcome);

    Ok(ExitCode::from_outcome(&outcome))
}

fn print_threshold_failures(outcome: &RunOutcome) {
    let failed: Vec<_> = outcome.thresholds.iter().filter(|t| !t.passed).collect();
    if failed.is_empty() {
        return;
    }

    eprintln!("thresholds_failed: {}", failed.len());
    for t in failed {
        match t.observed {
            Some(observed) => eprintln!(
                "threshold_failed: metric={} expr={} observed={observed}",
                t.metric, t.expression
            ),
            None => eprintln!(
                "threshold_failed: metric={} expr={} observed=-",
                t.metric, t.expression
            ),
        }
    }

    if let Some(t) = &outcome.aborted {
        eprintln!("run_aborted: metric={} expr={}", t.metric, t.expression);
    }
}
