//! Wall-clock pacing of simulation ticks.
//!
//! Every tick advances simulated time by `calc_ms`. With real-time pacing
//! on, the loop sleeps out the rest of the interval so simulated time never
//! outruns the wall clock. A tick that overran is not compensated by extra
//! ticks; simulated time simply lags, and the overrun is counted. Fast step
//! disables pacing entirely.

use std::time::{Duration, Instant};

/// What the loop should do after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pacing {
    /// Pacing is off; start the next tick immediately.
    Unpaced,
    /// Suspend for the remainder of the interval.
    Sleep(Duration),
    /// The tick used exactly its interval.
    OnTime,
    /// The tick overran its interval by the given amount.
    Behind(Duration),
}

/// Tracks tick timing and decides how long to wait between ticks.
#[derive(Debug)]
pub struct RealtimeGovernor {
    calc_ms: f64,
    realtime: bool,
    fast_step: bool,
    tick_start: Option<Instant>,
    behind_schedule: u64,
    drift: Duration,
}

impl RealtimeGovernor {
    /// A governor for `calc_ms` simulated milliseconds per tick.
    pub fn new(calc_ms: f64, realtime: bool, fast_step: bool) -> Self {
        Self {
            calc_ms,
            realtime,
            fast_step,
            tick_start: None,
            behind_schedule: 0,
            drift: Duration::ZERO,
        }
    }

    /// Simulated milliseconds per tick.
    pub fn calc_ms(&self) -> f64 {
        self.calc_ms
    }

    /// Simulated seconds per tick, as passed to the physics engine.
    pub fn dt_seconds(&self) -> f64 {
        self.calc_ms / 1000.0
    }

    /// Target wall-clock duration of one tick.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.calc_ms / 1000.0)
    }

    /// Whether wall-clock pacing is in effect.
    pub fn is_paced(&self) -> bool {
        self.realtime && !self.fast_step
    }

    /// Change the tick length. Non-positive or non-finite values are ignored.
    pub fn set_calc_ms(&mut self, calc_ms: f64) {
        if calc_ms.is_finite() && calc_ms > 0.0 {
            self.calc_ms = calc_ms;
        }
    }

    /// Toggle real-time pacing.
    pub fn set_realtime(&mut self, realtime: bool) {
        self.realtime = realtime;
    }

    /// Toggle fast step.
    pub fn set_fast_step(&mut self, fast_step: bool) {
        self.fast_step = fast_step;
    }

    /// Record the wall-clock start of a tick.
    pub fn begin_tick(&mut self, now: Instant) {
        self.tick_start = Some(now);
    }

    /// Decide pacing at `now`, the end of the tick begun by
    /// [`begin_tick`](Self::begin_tick).
    pub fn plan(&mut self, now: Instant) -> Pacing {
        if !self.is_paced() {
            return Pacing::Unpaced;
        }
        let Some(start) = self.tick_start else {
            return Pacing::Unpaced;
        };
        let elapsed = now.saturating_duration_since(start);
        let interval = self.interval();
        match interval.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => Pacing::Sleep(remaining),
            Some(_) => Pacing::OnTime,
            None => {
                let over = elapsed - interval;
                self.behind_schedule += 1;
                self.drift += over;
                Pacing::Behind(over)
            }
        }
    }

    /// Ticks that overran their interval.
    pub fn behind_schedule(&self) -> u64 {
        self.behind_schedule
    }

    /// Total overrun accumulated by late ticks.
    pub fn drift(&self) -> Duration {
        self.drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeps_for_remainder_when_early() {
        let mut g = RealtimeGovernor::new(10.0, true, false);
        let t0 = Instant::now();
        g.begin_tick(t0);
        assert_eq!(
            g.plan(t0 + Duration::from_millis(2)),
            Pacing::Sleep(Duration::from_millis(8))
        );
        assert_eq!(g.behind_schedule(), 0);
    }

    #[test]
    fn late_tick_counts_and_does_not_catch_up() {
        let mut g = RealtimeGovernor::new(10.0, true, false);
        let t0 = Instant::now();
        g.begin_tick(t0);
        assert_eq!(
            g.plan(t0 + Duration::from_millis(25)),
            Pacing::Behind(Duration::from_millis(15))
        );
        // Next tick is planned from its own start, not from the lost time.
        let t1 = t0 + Duration::from_millis(25);
        g.begin_tick(t1);
        assert_eq!(
            g.plan(t1 + Duration::from_millis(4)),
            Pacing::Sleep(Duration::from_millis(6))
        );
        assert_eq!(g.behind_schedule(), 1);
        assert_eq!(g.drift(), Duration::from_millis(15));
    }

    #[test]
    fn exact_interval_is_on_time() {
        let mut g = RealtimeGovernor::new(10.0, true, false);
        let t0 = Instant::now();
        g.begin_tick(t0);
        assert_eq!(g.plan(t0 + Duration::from_millis(10)), Pacing::OnTime);
    }

    #[test]
    fn fast_step_bypasses_pacing() {
        let mut g = RealtimeGovernor::new(10.0, true, true);
        let t0 = Instant::now();
        g.begin_tick(t0);
        assert_eq!(g.plan(t0), Pacing::Unpaced);
        assert!(!g.is_paced());
    }

    #[test]
    fn realtime_off_is_unpaced() {
        let mut g = RealtimeGovernor::new(10.0, false, false);
        let t0 = Instant::now();
        g.begin_tick(t0);
        assert_eq!(g.plan(t0 + Duration::from_millis(50)), Pacing::Unpaced);
        assert_eq!(g.behind_schedule(), 0);
    }

    #[test]
    fn invalid_calc_ms_ignored() {
        let mut g = RealtimeGovernor::new(10.0, true, false);
        g.set_calc_ms(0.0);
        g.set_calc_ms(f64::NAN);
        assert_eq!(g.calc_ms(), 10.0);
        g.set_calc_ms(4.0);
        assert!((g.dt_seconds() - 0.004).abs() < 1e-12);
    }
}
