use std::time::Duration;

use super::config::Stage;

/// Piecewise-linear VU (or rate) target over a sequence of stages.
///
/// Within stage `i` the target interpolates linearly from the previous
/// stage's target (or `start` for the first stage) to the stage's own target.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    ends: Vec<Duration>,
}

impl RampSchedule {
    #[must_use]
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for st in &stages {
            acc = acc.saturating_add(st.duration);
            ends.push(acc);
        }

        Self {
            start,
            stages,
            ends,
        }
    }

    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.ends.last().copied().unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Stage index covering `elapsed`, with its offset bounds and endpoints.
    fn stage_bounds(&self, elapsed: Duration) -> Option<(usize, Duration, Duration, u64, u64)> {
        if self.stages.is_empty() {
            return None;
        }

        let idx = self.ends.partition_point(|end| *end <= elapsed);
        let idx = idx.min(self.stages.len() - 1);

        let stage_end = self.ends[idx];
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.ends[idx - 1]
        };
        let from = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        let to = self.stages[idx].target;

        Some((idx, stage_start, stage_end, from, to))
    }

    #[must_use]
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if elapsed >= self.total_duration() {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        }

        let Some((_, stage_start, stage_end, from, to)) = self.stage_bounds(elapsed) else {
            return self.start;
        };

        let span = stage_end.saturating_sub(stage_start);
        if span.is_zero() {
            return to;
        }

        let frac = elapsed.saturating_sub(stage_start).as_secs_f64() / span.as_secs_f64();
        let cur = from as f64 + (to as f64 - from as f64) * frac.clamp(0.0, 1.0);
        cur.round().max(0.0) as u64
    }

    /// How long an idle VU with index `vu_index` should sleep before
    /// rechecking whether the ramp has reached it.
    #[must_use]
    pub fn next_recheck_in(&self, elapsed: Duration, vu_index: u64) -> Duration {
        const DEFAULT_SLEEP: Duration = Duration::from_millis(50);

        if self.is_done(elapsed) {
            return Duration::ZERO;
        }

        // Active VUs poll quickly so ramp-downs are picked up promptly.
        if vu_index <= self.target_at(elapsed) {
            return Duration::from_millis(1);
        }

        let Some((_, stage_start, stage_end, from, to)) = self.stage_bounds(elapsed) else {
            return DEFAULT_SLEEP;
        };

        // Flat or descending stage: nothing changes for this VU before the
        // stage boundary.
        if to <= from || vu_index > to {
            return stage_end.saturating_sub(elapsed).min(DEFAULT_SLEEP);
        }

        // Ascending stage: solve for the offset where the ramp reaches us.
        let span = stage_end.saturating_sub(stage_start).as_secs_f64();
        let frac = (vu_index - from) as f64 / (to - from) as f64;
        let reach_at = stage_start + Duration::from_secs_f64(span * frac.clamp(0.0, 1.0));

        reach_at.saturating_sub(elapsed).min(DEFAULT_SLEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ramp() -> RampSchedule {
        RampSchedule::new(
            0,
            vec![
                Stage {
                    duration: secs(30),
                    target: 20,
                },
                Stage {
                    duration: secs(60),
                    target: 20,
                },
                Stage {
                    duration: secs(30),
                    target: 0,
                },
            ],
        )
    }

    #[test]
    fn target_interpolates_linearly_within_a_stage() {
        let s = ramp();

        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(15)), 10);
        assert_eq!(s.target_at(secs(30)), 20);
        // Plateau stage.
        assert_eq!(s.target_at(secs(60)), 20);
        // Ramp-down midpoint.
        assert_eq!(s.target_at(secs(105)), 10);
        // Past the end the final target holds.
        assert_eq!(s.target_at(secs(120)), 0);
        assert_eq!(s.target_at(secs(999)), 0);
    }

    #[test]
    fn interpolation_stays_within_one_vu_of_the_line() {
        let s = ramp();
        for ms in (0..120_000).step_by(250) {
            let elapsed = Duration::from_millis(ms as u64);
            let expected = if ms <= 30_000 {
                20.0 * ms as f64 / 30_000.0
            } else if ms <= 90_000 {
                20.0
            } else {
                20.0 * (120_000 - ms) as f64 / 30_000.0
            };
            let got = s.target_at(elapsed) as f64;
            assert!(
                (got - expected).abs() <= 1.0,
                "t={ms}ms got={got} expected={expected}"
            );
        }
    }

    #[test]
    fn total_duration_sums_stages() {
        let s = ramp();
        assert_eq!(s.total_duration(), secs(120));
        assert!(!s.is_done(secs(119)));
        assert!(s.is_done(secs(120)));
    }

    #[test]
    fn recheck_hint_for_idle_vu_waits_for_the_ramp() {
        let s = ramp();

        // VU 10 becomes active at t=15s; at t=14.99s the hint is tiny.
        let hint = s.next_recheck_in(Duration::from_millis(14_990), 10);
        assert!(hint <= Duration::from_millis(50));

        // An active VU polls fast.
        assert_eq!(s.next_recheck_in(secs(40), 5), Duration::from_millis(1));

        // VU above the whole ramp waits for the stage boundary (capped).
        let hint = s.next_recheck_in(secs(5), 25);
        assert!(hint <= Duration::from_millis(50));
    }

    #[test]
    fn empty_stages_hold_the_start_value() {
        let s = RampSchedule::new(7, Vec::new());
        assert_eq!(s.target_at(Duration::ZERO), 7);
        assert_eq!(s.total_duration(), Duration::ZERO);
        assert!(s.is_done(Duration::ZERO));
    }
}
