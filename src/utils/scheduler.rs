//! scheduler.rs
//! Sleep-to-deadline pacing for periodic loops.
//!
//! Release k is due at `start + k / f`; lateness never accumulates across ticks.
//! When a loop falls more than one period behind, the missed releases are skipped
//! instead of being fired back to back.

use std::time::{Duration, Instant};

use spin_sleep::{SpinSleeper, SpinStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    OnTime,
    /// Woke after the deadline. `skipped` releases were dropped to resynchronise.
    Overrun { late: Duration, skipped: u64 },
}

pub struct DeadlineScheduler {
    start: Instant,
    period_ns: u64,
    k: u64,
    sleeper: SpinSleeper,
}

impl DeadlineScheduler {
    pub fn new(freq_hz: f64) -> Self {
        let period_ns = (1e9 / freq_hz.max(1e-3)).round().max(1.0) as u64;
        Self {
            start: Instant::now(),
            period_ns,
            k: 0,
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns)
    }

    /// Re-anchors the schedule; the first release is one period after `now`.
    pub fn restart(&mut self, now: Instant) {
        self.start = now;
        self.k = 0;
    }

    fn deadline(&self, k: u64) -> Instant {
        self.start + Duration::from_nanos(k.saturating_mul(self.period_ns))
    }

    /// Blocks until the next release.
    pub fn wait_next(&mut self) -> Release {
        self.k += 1;
        let target = self.deadline(self.k);
        let now = Instant::now();
        if now < target {
            self.sleeper.sleep(target - now);
            return Release::OnTime;
        }

        let late = now - target;
        let behind = late.as_nanos() as u64 / self.period_ns;
        if behind > 0 {
            self.k += behind;
        }
        Release::Overrun { late, skipped: behind }
    }
}
