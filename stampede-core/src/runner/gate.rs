use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Run-wide stop request. Once raised it never clears; VUs finish their
/// current iteration and do not start another.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        while !self.is_stopped() {
            // Register for wakeups before the recheck so a concurrent
            // `stop` cannot slip between the check and the await.
            let notified = self.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Decides whether a VU may start another iteration.
///
/// A gate closes when the scenario's duration deadline passes, when a shared
/// iteration budget is exhausted, or when the run is stopped.
#[derive(Debug)]
pub struct IterationGate {
    started: AtomicU64,
    iterations: Option<u64>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
}

impl IterationGate {
    #[must_use]
    pub fn new(iterations: Option<u64>, duration: Option<Duration>) -> Self {
        Self {
            started: AtomicU64::new(0),
            iterations,
            duration,
            deadline: OnceLock::new(),
        }
    }

    /// Anchor the duration deadline. Idempotent; the first call wins.
    pub fn open_at(&self, scenario_start: Instant) {
        if let Some(duration) = self.duration {
            let _ = self.deadline.set(scenario_start + duration);
        }
    }

    pub fn next(&self, stop: &StopSignal) -> bool {
        if stop.is_stopped() {
            return false;
        }

        if self.duration.is_some() {
            // The deadline is normally anchored by the runner before the
            // start signal; fall back to the first observed iteration.
            let now = Instant::now();
            if self.deadline.get().is_none() {
                self.open_at(now);
            }

            if let Some(deadline) = self.deadline.get()
                && now >= *deadline
            {
                return false;
            }
        }

        if let Some(total) = self.iterations {
            let idx = self.started.fetch_add(1, Ordering::Relaxed);
            if idx >= total {
                return false;
            }
        }

        true
    }
}
