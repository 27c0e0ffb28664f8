//! Per-loop counters for recovered errors, scheduling and safety events.
//!
//! Each loop owns its counters (no sharing on the hot path). The supervisor
//! collects them after join and logs one summary line per component.

use serde::Serialize;

/// Running min/max/mean of per-iteration execution time.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExecStats {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub sum_us: u64,
}

impl ExecStats {
    #[inline]
    pub fn record(&mut self, us: u64) {
        if self.count == 0 || us < self.min_us {
            self.min_us = us;
        }
        self.max_us = self.max_us.max(us);
        self.sum_us = self.sum_us.saturating_add(us);
        self.count += 1;
    }

    pub fn mean_us(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_us as f64 / self.count as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LoopCounters {
    pub ticks: u64,
    pub overruns: u64,
    pub skipped_releases: u64,
    pub stale_reads: u64,
    pub device_errors: u64,
    pub negative_torque_clamps: u64,
    pub profile_errors: u64,
    pub current_clamps: u64,
    pub messages_applied: u64,
    pub deferred_torque_updates: u64,
    pub applied_torque_updates: u64,
    pub inbox_drops: u64,
    pub snapshots_dropped: u64,
    pub safety_trips: u64,
    pub exec: ExecStats,
}

impl LoopCounters {
    pub fn overrun_ratio(&self) -> f64 {
        if self.ticks == 0 { 0.0 } else { self.overruns as f64 / self.ticks as f64 }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EstimatorCounters {
    pub samples: u64,
    pub empty_samples: u64,
    pub timeouts: u64,
    pub unknown_topics: u64,
    pub parse_errors: u64,
    pub heel_strikes: u64,
    pub toe_offs: u64,
    pub rejected_strides: u64,
    pub rejected_stances: u64,
    pub filter_resets: u64,
    pub send_failures: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RemoteCounters {
    pub requests: u64,
    pub rejected: u64,
    pub transport_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_stats_track_extremes() {
        let mut s = ExecStats::default();
        assert_eq!(s.mean_us(), None);
        for us in [40, 12, 95] {
            s.record(us);
        }
        assert_eq!((s.min_us, s.max_us, s.count), (12, 95, 3));
        assert!((s.mean_us().unwrap() - 49.0).abs() < 1e-9);
    }
}
