use tokio::sync::watch;

/// Orchestrator lifecycle. Phases only move forward:
/// `Idle -> Running -> GracefulStop -> Evaluating -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    GracefulStop,
    Evaluating,
    Done,
}

#[derive(Debug)]
pub(crate) struct PhaseTracker {
    tx: watch::Sender<RunPhase>,
}

impl PhaseTracker {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(RunPhase::Idle);
        Self { tx }
    }

    pub(crate) fn current(&self) -> RunPhase {
        *self.tx.borrow()
    }

    #[allow(dead_code)]
    pub(crate) fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.tx.subscribe()
    }

    /// Forward-only: a stale transition request is a no-op, so phases can be
    /// advanced from multiple places without racing backwards.
    pub(crate) fn advance(&self, next: RunPhase) {
        self.tx.send_if_modified(|cur| {
            if next > *cur {
                *cur = next;
                true
            } else {
                false
            }
        });
    }
}
