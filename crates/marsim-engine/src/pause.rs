//! Recursive pause count for physics stepping.
//!
//! Any number of external threads may pause stepping for inspection. The
//! simulation thread does not begin a physics step while the count is
//! non-zero, and `lock` does not return while a step is in progress, so a
//! caller holding a pause sees a quiescent world.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct PauseState {
    count: u32,
    stepping: bool,
    released: bool,
}

pub(crate) struct PauseGate {
    state: Mutex<PauseState>,
    cv: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PauseState {
                count: 0,
                stepping: false,
                released: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PauseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, PauseState>) -> MutexGuard<'a, PauseState> {
        self.cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the pause count and wait for any in-progress step to end.
    pub fn lock(&self) {
        let mut st = self.lock_state();
        st.count += 1;
        while st.stepping && !st.released {
            st = self.wait(st);
        }
    }

    /// Decrement the pause count. Returns `false` (and changes nothing) if
    /// the count was already zero.
    pub fn unlock(&self) -> bool {
        let mut st = self.lock_state();
        if st.count == 0 {
            return false;
        }
        st.count -= 1;
        if st.count == 0 {
            self.cv.notify_all();
        }
        true
    }

    /// Current pause count.
    pub fn count(&self) -> u32 {
        self.lock_state().count
    }

    /// Wait until the count is zero, then mark a step in progress.
    /// Returns `false` if the gate was released for shutdown.
    pub fn begin_step(&self) -> bool {
        let mut st = self.lock_state();
        while st.count > 0 && !st.released {
            st = self.wait(st);
        }
        if st.released {
            return false;
        }
        st.stepping = true;
        true
    }

    /// Mark the step finished and wake waiting lockers.
    pub fn end_step(&self) {
        let mut st = self.lock_state();
        st.stepping = false;
        self.cv.notify_all();
    }

    /// Permanently open the gate so no waiter blocks during shutdown.
    pub fn release(&self) {
        let mut st = self.lock_state();
        st.released = true;
        self.cv.notify_all();
    }
}

/// RAII pause returned by
/// [`SimulatorHandle::pause_physics`](crate::SimulatorHandle::pause_physics).
/// Physics stepping resumes when every guard (and every manual lock) is
/// released.
#[must_use = "physics resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    gate: Arc<PauseGate>,
}

impl PauseGuard {
    pub(crate) fn new(gate: Arc<PauseGate>) -> Self {
        gate.lock();
        Self { gate }
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.gate.unlock();
    }
}
