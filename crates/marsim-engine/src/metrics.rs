//! Loop health counters.
//!
//! [`LoopMetrics`] is a point-in-time copy of counters that the simulation
//! thread maintains in atomics, readable from any thread without blocking
//! the loop.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the simulation loop's counters.
///
/// Counters are cumulative since construction unless noted. `sim_time_ms`
/// and `step_count` restart at zero on world reset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopMetrics {
    /// Ticks executed (including ticks whose physics step failed).
    pub ticks: u64,
    /// Successful physics steps since the last reset.
    pub step_count: u64,
    /// Simulated time since the last reset, in milliseconds.
    pub sim_time_ms: f64,
    /// Wall-clock duration of the most recent tick, in microseconds.
    pub last_tick_us: u64,
    /// Paced ticks that overran their interval.
    pub behind_schedule: u64,
    /// Total overrun of late ticks, in microseconds.
    pub drift_us: u64,
    /// Graphics handshakes acknowledged by the renderer.
    pub graphics_syncs: u64,
    /// Graphics handshakes that timed out.
    pub missed_syncs: u64,
    /// Plugin callbacks that returned an error or panicked.
    pub plugin_errors: u64,
    /// Physics errors (step failures and externally reported errors).
    pub physics_errors: u64,
    /// Queued requests executed.
    pub requests_executed: u64,
    /// Queued requests that failed.
    pub requests_failed: u64,
}

/// Atomic backing store written by the simulation thread.
#[derive(Default)]
pub(crate) struct MetricsCell {
    ticks: AtomicU64,
    step_count: AtomicU64,
    sim_time_us: AtomicU64,
    last_tick_us: AtomicU64,
    behind_schedule: AtomicU64,
    drift_us: AtomicU64,
    physics_errors: AtomicU64,
    requests_executed: AtomicU64,
    requests_failed: AtomicU64,
}

impl MetricsCell {
    pub fn record_tick(&self, step_count: u64, sim_time_ms: f64, tick_us: u64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.step_count.store(step_count, Ordering::Relaxed);
        self.sim_time_us
            .store((sim_time_ms * 1000.0) as u64, Ordering::Relaxed);
        self.last_tick_us.store(tick_us, Ordering::Relaxed);
    }

    pub fn record_clock(&self, step_count: u64, sim_time_ms: f64) {
        self.step_count.store(step_count, Ordering::Relaxed);
        self.sim_time_us
            .store((sim_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_pacing(&self, behind_schedule: u64, drift_us: u64) {
        self.behind_schedule
            .store(behind_schedule, Ordering::Relaxed);
        self.drift_us.store(drift_us, Ordering::Relaxed);
    }

    pub fn record_physics_error(&self) {
        self.physics_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requests(&self, executed: u64, failed: u64) {
        self.requests_executed
            .fetch_add(executed, Ordering::Relaxed);
        self.requests_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Copy the loop-owned counters. Plugin and graphics counters live
    /// with their owners and are filled in by the caller.
    pub fn snapshot(&self) -> LoopMetrics {
        LoopMetrics {
            ticks: self.ticks.load(Ordering::Relaxed),
            step_count: self.step_count.load(Ordering::Relaxed),
            sim_time_ms: self.sim_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
            last_tick_us: self.last_tick_us.load(Ordering::Relaxed),
            behind_schedule: self.behind_schedule.load(Ordering::Relaxed),
            drift_us: self.drift_us.load(Ordering::Relaxed),
            physics_errors: self.physics_errors.load(Ordering::Relaxed),
            requests_executed: self.requests_executed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            ..LoopMetrics::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = LoopMetrics::default();
        assert_eq!(m.ticks, 0);
        assert_eq!(m.step_count, 0);
        assert_eq!(m.sim_time_ms, 0.0);
        assert_eq!(m.behind_schedule, 0);
        assert_eq!(m.missed_syncs, 0);
        assert_eq!(m.plugin_errors, 0);
    }

    #[test]
    fn cell_snapshot_reflects_records() {
        let cell = MetricsCell::default();
        cell.record_tick(1, 10.0, 250);
        cell.record_tick(2, 20.0, 300);
        cell.record_pacing(1, 1500);
        cell.record_physics_error();
        cell.record_requests(3, 1);

        let m = cell.snapshot();
        assert_eq!(m.ticks, 2);
        assert_eq!(m.step_count, 2);
        assert!((m.sim_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(m.last_tick_us, 300);
        assert_eq!(m.behind_schedule, 1);
        assert_eq!(m.drift_us, 1500);
        assert_eq!(m.physics_errors, 1);
        assert_eq!(m.requests_executed, 3);
        assert_eq!(m.requests_failed, 1);
    }

    #[test]
    fn clock_reset_keeps_tick_count() {
        let cell = MetricsCell::default();
        cell.record_tick(5, 50.0, 10);
        cell.record_clock(0, 0.0);
        let m = cell.snapshot();
        assert_eq!(m.ticks, 1);
        assert_eq!(m.step_count, 0);
        assert_eq!(m.sim_time_ms, 0.0);
    }
}
