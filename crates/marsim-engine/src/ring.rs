//! Recently published frames.
//!
//! The simulation thread publishes one [`Frame`] per tick. Renderers that
//! free-run read the newest one; a renderer that fell behind can catch up
//! on everything published after the last tick it drew, as long as the
//! ring still holds it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use marsim_core::{Frame, TickId};

/// Bounded history of published frames, oldest first.
pub(crate) struct FrameRing {
    frames: Mutex<VecDeque<Arc<Frame>>>,
    capacity: usize,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<Arc<Frame>>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a frame, dropping the oldest one when full.
    pub fn push(&self, frame: Frame) -> Arc<Frame> {
        let frame = Arc::new(frame);
        let mut frames = self.frames();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        frames.push_back(Arc::clone(&frame));
        frame
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.frames().back().cloned()
    }

    /// Up to `n` newest frames, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Arc<Frame>> {
        let frames = self.frames();
        let skip = frames.len().saturating_sub(n);
        frames.iter().skip(skip).cloned().collect()
    }

    /// Retained frames from ticks after `tick`, oldest first.
    pub fn since(&self, tick: TickId) -> Vec<Arc<Frame>> {
        self.frames()
            .iter()
            .filter(|f| f.tick > tick)
            .cloned()
            .collect()
    }
}
