use std::path::Path;

use crate::cli::OutputFormat;
use stampede_core::runner::{ProgressFn, RunOutcome, ScenarioConfig};

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan_path: &Path, scenarios: &[ScenarioConfig]);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, outcome: &RunOutcome) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
