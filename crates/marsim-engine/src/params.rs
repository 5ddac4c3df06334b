//! Typed pending writes to world parameters, applied at tick boundaries.
//!
//! External setters and property callbacks push [`ParamUpdate`]s under a
//! short-held lock. The simulation thread takes the whole batch at the
//! start of a tick and applies it before stepping, so no step ever observes
//! a partially written gravity vector or parameter set.

use std::sync::{Mutex, PoisonError};

use marsim_core::{ConfigKey, NodeId, PropertyValue, Vector3};
use smallvec::SmallVec;

/// A single pending change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ParamUpdate {
    Gravity(Vector3),
    GravityX(f64),
    GravityY(f64),
    GravityZ(f64),
    Erp(f64),
    Cfm(f64),
    Scale(Vector3),
    Connect(NodeId, NodeId),
    Disconnect(NodeId, NodeId),
    CalcMs(f64),
    Realtime(bool),
    FastStep(bool),
    SyncGraphics(bool),
    SyncIntervalMs(f64),
}

impl ParamUpdate {
    /// Translate a property change. Returns `None` if the value has the
    /// wrong type or is out of range.
    pub fn from_property(key: ConfigKey, value: &PropertyValue) -> Option<Self> {
        let positive = |v: f64| (v.is_finite() && v > 0.0).then_some(v);
        let finite = |v: f64| v.is_finite().then_some(v);
        Some(match key {
            ConfigKey::CalcMs => Self::CalcMs(positive(value.as_f64()?)?),
            ConfigKey::Realtime => Self::Realtime(value.as_bool()?),
            ConfigKey::FastStep => Self::FastStep(value.as_bool()?),
            ConfigKey::SyncGraphics => Self::SyncGraphics(value.as_bool()?),
            ConfigKey::SyncIntervalMs => Self::SyncIntervalMs(positive(value.as_f64()?)?),
            ConfigKey::GravityX => Self::GravityX(finite(value.as_f64()?)?),
            ConfigKey::GravityY => Self::GravityY(finite(value.as_f64()?)?),
            ConfigKey::GravityZ => Self::GravityZ(finite(value.as_f64()?)?),
            ConfigKey::WorldErp => {
                let v = value.as_f64()?;
                Self::Erp((0.0..=1.0).contains(&v).then_some(v)?)
            }
            ConfigKey::WorldCfm => {
                let v = finite(value.as_f64()?)?;
                Self::Cfm((v >= 0.0).then_some(v)?)
            }
        })
    }
}

/// Batch type handed to the simulation thread.
pub(crate) type ParamBatch = SmallVec<[ParamUpdate; 8]>;

pub(crate) struct PendingParams {
    queue: Mutex<ParamBatch>,
}

impl PendingParams {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(SmallVec::new()),
        }
    }

    pub fn push(&self, update: ParamUpdate) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(update);
    }

    /// Take every pending update, in submission order.
    pub fn take(&self) -> ParamBatch {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_empty(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
