use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Token source for a constant-arrival-rate scenario.
///
/// A driver task converts wall-clock time into arrival tokens via `offer`;
/// worker VUs pick tokens up via `claim`. Acquisition is non-blocking from
/// the driver's point of view: an arrival that finds no free worker first
/// activates a reserve worker (up to `max_vus`) and is otherwise dropped and
/// counted, never queued behind the pool's capacity.
#[derive(Debug)]
pub struct ArrivalPacer {
    scheduled_total: AtomicU64,
    claimed_total: AtomicU64,
    dropped_total: AtomicU64,

    /// Workers currently inside an iteration.
    busy: AtomicU64,
    active_vus: AtomicU64,
    pre_allocated_vus: u64,
    max_vus: u64,

    done: AtomicBool,
    notify: Notify,
}

impl ArrivalPacer {
    #[must_use]
    pub fn new(pre_allocated_vus: u64, max_vus: u64) -> Self {
        Self {
            scheduled_total: AtomicU64::new(0),
            claimed_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            active_vus: AtomicU64::new(pre_allocated_vus),
            pre_allocated_vus,
            max_vus,
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn started_total(&self) -> u64 {
        self.claimed_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn active_vus(&self) -> u64 {
        self.active_vus.load(Ordering::Relaxed)
    }

    /// Free capacity: active workers minus those busy or already spoken for.
    fn free_capacity(&self) -> u64 {
        let claimed = self.claimed_total.load(Ordering::Relaxed);
        let scheduled = self.scheduled_total.load(Ordering::Relaxed);
        let pending = scheduled.saturating_sub(claimed);
        let busy = self.busy.load(Ordering::Relaxed);

        self.active_vus
            .load(Ordering::Relaxed)
            .saturating_sub(pending.saturating_add(busy))
    }

    /// Hand `due` arrivals to the pool. Each arrival either becomes a pending
    /// token or is dropped.
    pub fn offer(&self, due: u64) {
        if due == 0 {
            return;
        }

        let mut scheduled = 0u64;
        let mut dropped = 0u64;

        for _ in 0..due {
            if self.free_capacity() == 0 {
                // Pull a reserve worker into the pool before giving up.
                let active = self.active_vus.load(Ordering::Relaxed);
                if active < self.max_vus {
                    self.active_vus.store(active + 1, Ordering::Relaxed);
                } else {
                    dropped += 1;
                    continue;
                }
            }
            self.scheduled_total.fetch_add(1, Ordering::Relaxed);
            scheduled += 1;
        }

        if dropped != 0 {
            self.dropped_total.fetch_add(dropped, Ordering::Relaxed);
        }
        if scheduled != 0 {
            self.notify.notify_waiters();
        }
    }

    /// Shrink the pool back toward `pre_allocated_vus` when idle.
    pub fn relax(&self) {
        let claimed = self.claimed_total.load(Ordering::Relaxed);
        let scheduled = self.scheduled_total.load(Ordering::Relaxed);
        let busy = self.busy.load(Ordering::Relaxed);
        if scheduled == claimed && busy <= self.pre_allocated_vus {
            self.active_vus
                .store(self.pre_allocated_vus, Ordering::Relaxed);
            self.notify.notify_waiters();
        }
    }

    /// Claim the next arrival token. Returns `false` once the pacer is done
    /// and every scheduled token has been claimed.
    pub async fn claim(&self) -> bool {
        loop {
            let claimed = self.claimed_total.load(Ordering::Relaxed);
            let scheduled = self.scheduled_total.load(Ordering::Relaxed);

            if claimed < scheduled {
                if self
                    .claimed_total
                    .compare_exchange_weak(
                        claimed,
                        claimed + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    self.busy.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                continue;
            }

            if self.is_done() {
                return false;
            }

            // Bounded wait: a wake-up lost to the check-then-wait race is
            // recovered on the next recheck.
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
    }

    /// Mark the claimed iteration finished, releasing its worker slot.
    pub fn complete(&self) {
        self.busy.fetch_sub(1, Ordering::Relaxed);
    }

    pub async fn wait_for_update(&self) {
        self.notify.notified().await;
    }
}
