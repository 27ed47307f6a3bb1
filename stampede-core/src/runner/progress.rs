use std::sync::Arc;
use std::time::Duration;

use super::phase::RunPhase;

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// One supervisor tick's worth of live state.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub tick: u64,
    pub elapsed: Duration,
    pub phase: RunPhase,
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub iterations_total: u64,
    pub checks_failed_total: u64,
    pub rps_now: f64,
    pub scenarios: Vec<ScenarioProgress>,
}

#[derive(Debug, Clone)]
pub struct ScenarioProgress {
    pub name: String,
    /// VUs the scenario wants active right now (executor-dependent).
    pub current_target: u64,
    pub max_vus: u64,
    pub dropped_iterations_total: u64,
}
