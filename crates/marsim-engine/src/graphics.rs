//! Handshake between the simulation thread and an external renderer.
//!
//! In sync mode the loop announces a frame, then blocks until the renderer
//! calls `finished_draw`, or until the configured timeout passes. A timeout
//! is counted and logged, never fatal. Outside sync mode the loop never
//! waits and the renderer reads the latest frame whenever it likes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Result of one bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SyncOutcome {
    Acknowledged,
    TimedOut,
    Released,
}

pub(crate) struct GraphicsSyncGate {
    sync: AtomicBool,
    allow_draw: AtomicBool,
    released: AtomicBool,
    ack_tx: Sender<()>,
    ack_rx: Receiver<()>,
    timeout: Duration,
    completed: AtomicU64,
    missed: AtomicU64,
}

impl GraphicsSyncGate {
    pub fn new(sync: bool, timeout: Duration) -> Self {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        Self {
            sync: AtomicBool::new(sync),
            allow_draw: AtomicBool::new(false),
            released: AtomicBool::new(false),
            ack_tx,
            ack_rx,
            timeout,
            completed: AtomicU64::new(0),
            missed: AtomicU64::new(0),
        }
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync.load(Ordering::Acquire)
    }

    pub fn set_sync(&self, sync: bool) {
        self.sync.store(sync, Ordering::Release);
    }

    /// Whether a frame is waiting to be drawn.
    pub fn allow_draw(&self) -> bool {
        self.allow_draw.load(Ordering::Acquire)
    }

    /// Announce a new frame. Discards acknowledgements left over from
    /// frames nobody was waiting for.
    pub fn frame_ready(&self) {
        while self.ack_rx.try_recv().is_ok() {}
        self.allow_draw.store(true, Ordering::Release);
    }

    /// Renderer side: the announced frame has been drawn.
    pub fn finished_draw(&self) {
        self.allow_draw.store(false, Ordering::Release);
        let _ = self.ack_tx.try_send(());
    }

    /// Block until `finished_draw`, the timeout, or `release`.
    pub fn wait_for_draw(&self) -> SyncOutcome {
        if self.released.load(Ordering::Acquire) {
            return SyncOutcome::Released;
        }
        match self.ack_rx.recv_timeout(self.timeout) {
            Ok(()) if self.released.load(Ordering::Acquire) => SyncOutcome::Released,
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                SyncOutcome::Acknowledged
            }
            Err(RecvTimeoutError::Timeout) => {
                self.missed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "renderer did not acknowledge frame within {:?}; continuing",
                    self.timeout
                );
                SyncOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => SyncOutcome::Released,
        }
    }

    /// Wake a waiting loop for shutdown; later waits return immediately.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
        let _ = self.ack_tx.try_send(());
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

/// Decides which ticks hand a frame to the renderer in sync mode: one every
/// `interval_ms` of simulated time.
#[derive(Debug)]
pub(crate) struct SyncSchedule {
    interval_ms: f64,
    accumulated_ms: f64,
}

impl SyncSchedule {
    pub fn new(interval_ms: f64) -> Self {
        Self {
            interval_ms,
            accumulated_ms: 0.0,
        }
    }

    pub fn set_interval_ms(&mut self, interval_ms: f64) {
        if interval_ms.is_finite() && interval_ms > 0.0 {
            self.interval_ms = interval_ms;
        }
    }

    /// Account for `dt_ms` of simulated time; true when a sync is due.
    pub fn advance(&mut self, dt_ms: f64) -> bool {
        self.accumulated_ms += dt_ms;
        if self.accumulated_ms + 1e-9 >= self.interval_ms {
            self.accumulated_ms = 0.0;
            true
        } else {
            false
        }
    }
}
