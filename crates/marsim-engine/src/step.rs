//! Run/stop/step state machine and the wake primitive for the parked
//! simulation thread.
//!
//! Public transitions (`start`, `stop`, `single_step`, `exit`) may be called
//! from any thread. Each takes the status lock once, so callers always
//! observe a complete status. The simulation thread owns the two boundary
//! transitions (`settle`, `finish_step`).
//!
//! Parking uses a run-token channel rather than a condition variable: every
//! transition that gives the loop work sends a token, and the loop's only
//! idle suspension point is a blocking receive. Tokens persist in the
//! channel, so a wake that races with the loop's idle check is never lost.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use marsim_core::SimulationStatus;

struct ControlState {
    status: SimulationStatus,
    exited: bool,
}

/// Owns [`SimulationStatus`] and the run-token channel.
pub(crate) struct StepController {
    state: Mutex<ControlState>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl StepController {
    /// A controller in the initial `Stopped` status.
    pub fn new() -> Self {
        // One slot is enough: a pending token already guarantees the loop
        // will re-examine the status.
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            state: Mutex::new(ControlState {
                status: SimulationStatus::Stopped,
                exited: false,
            }),
            wake_tx,
            wake_rx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status.
    pub fn status(&self) -> SimulationStatus {
        self.lock().status
    }

    /// Whether `exit` has been called.
    #[cfg(test)]
    pub fn is_exited(&self) -> bool {
        self.lock().exited
    }

    /// `Stopped`/`Stopping`/`Stepping` → `Running`. No-op while running or
    /// after exit. Returns whether the status changed.
    pub fn start(&self) -> bool {
        let mut st = self.lock();
        if st.exited || st.status == SimulationStatus::Running {
            return false;
        }
        let from = st.status;
        st.status = SimulationStatus::Running;
        drop(st);
        log::info!("simulation {from} -> running");
        self.wake();
        true
    }

    /// `Running`/`Stepping` → `Stopping`. No-op while stopped or already
    /// stopping. Returns whether the status changed.
    pub fn stop(&self) -> bool {
        let mut st = self.lock();
        match st.status {
            SimulationStatus::Running | SimulationStatus::Stepping => {
                let from = st.status;
                st.status = SimulationStatus::Stopping;
                drop(st);
                log::info!("simulation {from} -> stopping");
                true
            }
            _ => false,
        }
    }

    /// `Stopped`/`Stopping` → `Stepping`. Rejected while running (the loop
    /// is already stepping continuously), while a step is pending, and
    /// after exit. Returns whether the status changed.
    pub fn single_step(&self) -> bool {
        let mut st = self.lock();
        if st.exited {
            return false;
        }
        match st.status {
            SimulationStatus::Stopped | SimulationStatus::Stopping => {
                st.status = SimulationStatus::Stepping;
                drop(st);
                log::debug!("simulation single step requested");
                self.wake();
                true
            }
            _ => false,
        }
    }

    /// Any status → `Stopped`, permanently. Wakes a parked loop so it can
    /// observe the exit.
    pub fn exit(&self) {
        let mut st = self.lock();
        st.status = SimulationStatus::Stopped;
        st.exited = true;
        drop(st);
        self.wake();
    }

    /// Tick-boundary transition run by the loop: `Stopping` → `Stopped`.
    /// Returns the status after the transition.
    pub fn settle(&self) -> SimulationStatus {
        let mut st = self.lock();
        if st.status == SimulationStatus::Stopping {
            st.status = SimulationStatus::Stopped;
            drop(st);
            log::info!("simulation stopping -> stopped");
            return SimulationStatus::Stopped;
        }
        st.status
    }

    /// End of a stepping tick: `Stepping` → `Stopped`. Any other status was
    /// set by a caller during the tick and is left alone.
    pub fn finish_step(&self) {
        let mut st = self.lock();
        if st.status == SimulationStatus::Stepping {
            st.status = SimulationStatus::Stopped;
        }
    }

    /// Send a run token. Never blocks.
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Block until a run token arrives. Simulation thread only.
    pub fn wait_for_wake(&self) {
        // The controller holds both ends, so the channel never disconnects.
        let _ = self.wake_rx.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use SimulationStatus::*;

    #[test]
    fn initial_status_is_stopped() {
        let c = StepController::new();
        assert_eq!(c.status(), Stopped);
        assert!(!c.is_exited());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let c = StepController::new();
        assert!(!c.stop(), "stop while stopped has no effect");
        assert_eq!(c.status(), Stopped);

        assert!(c.start());
        assert!(!c.start(), "start while running has no effect");
        assert_eq!(c.status(), Running);

        assert!(c.stop());
        assert!(!c.stop());
        assert_eq!(c.status(), Stopping);
        assert_eq!(c.settle(), Stopped);
    }

    #[test]
    fn single_step_rejected_while_running() {
        let c = StepController::new();
        c.start();
        assert!(!c.single_step());
        assert_eq!(c.status(), Running);
    }

    #[test]
    fn single_step_from_stopping_and_finish() {
        let c = StepController::new();
        c.start();
        c.stop();
        assert!(c.single_step());
        assert_eq!(c.status(), Stepping);
        c.finish_step();
        assert_eq!(c.status(), Stopped);
    }

    #[test]
    fn finish_step_keeps_start_issued_mid_step() {
        let c = StepController::new();
        c.single_step();
        c.start();
        c.finish_step();
        assert_eq!(c.status(), Running);
    }

    #[test]
    fn exit_forces_stopped_and_blocks_further_starts() {
        let c = StepController::new();
        c.start();
        c.exit();
        assert_eq!(c.status(), Stopped);
        assert!(!c.start());
        assert!(!c.single_step());
        assert_eq!(c.status(), Stopped);
    }

    #[test]
    fn wake_before_wait_is_not_lost() {
        let c = StepController::new();
        c.wake();
        c.wake();
        // Returns immediately thanks to the buffered token.
        c.wait_for_wake();
    }

    #[test]
    fn start_wakes_parked_waiter() {
        let c = Arc::new(StepController::new());
        let waiter = {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                c.wait_for_wake();
                c.status()
            })
        };
        thread::sleep(Duration::from_millis(20));
        c.start();
        assert_eq!(waiter.join().unwrap(), Running);
    }
}
