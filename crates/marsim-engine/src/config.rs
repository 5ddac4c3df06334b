//! Simulator configuration, validation, and error types.
//!
//! [`SimConfig`] is the input for constructing a
//! [`Simulator`](crate::Simulator). [`validate()`](SimConfig::validate)
//! checks structural invariants at startup. Runtime changes arrive later as
//! property updates and are applied at tick boundaries.

use std::error::Error;
use std::fmt;

use marsim_core::{ConfigKey, PhysicsError, PropertyValue, Vector3, WorldParameters};

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while validating a [`SimConfig`] or starting the
/// simulator.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// `calc_ms` is NaN, infinite, zero, or negative.
    InvalidCalcMs {
        /// The invalid value.
        value: f64,
    },
    /// `sync_interval_ms` is NaN, infinite, zero, or negative.
    InvalidSyncInterval {
        /// The invalid value.
        value: f64,
    },
    /// `sync_timeout_ms` is zero.
    InvalidSyncTimeout,
    /// Gravity has a non-finite component.
    InvalidGravity,
    /// World parameters are out of range.
    InvalidWorldParameter {
        /// Which parameter and why.
        reason: String,
    },
    /// Frame ring capacity is below the minimum of 2.
    RingTooSmall {
        /// The configured size.
        configured: usize,
    },
    /// Request queue capacity is zero.
    RequestQueueZero,
    /// A property value has the wrong type or range for its key.
    InvalidProperty {
        /// The key being set.
        key: ConfigKey,
        /// The rejected value, rendered.
        value: String,
    },
    /// The physics engine could not create its world.
    PhysicsInit(PhysicsError),
    /// The simulation thread could not be spawned.
    ThreadSpawnFailed {
        /// OS error description.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCalcMs { value } => {
                write!(f, "calc_ms must be finite and positive, got {value}")
            }
            Self::InvalidSyncInterval { value } => {
                write!(f, "sync_interval_ms must be finite and positive, got {value}")
            }
            Self::InvalidSyncTimeout => write!(f, "sync_timeout_ms must be at least 1"),
            Self::InvalidGravity => write!(f, "gravity components must be finite"),
            Self::InvalidWorldParameter { reason } => {
                write!(f, "invalid world parameter: {reason}")
            }
            Self::RingTooSmall { configured } => {
                write!(f, "frame_ring_size {configured} is below minimum of 2")
            }
            Self::RequestQueueZero => write!(f, "max_pending_requests must be at least 1"),
            Self::InvalidProperty { key, value } => {
                write!(f, "invalid value {value} for property {key}")
            }
            Self::PhysicsInit(e) => write!(f, "physics init: {e}"),
            Self::ThreadSpawnFailed { reason } => {
                write!(f, "simulation thread spawn failed: {reason}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::PhysicsInit(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PhysicsError> for ConfigError {
    fn from(e: PhysicsError) -> Self {
        Self::PhysicsInit(e)
    }
}

// ── SimConfig ──────────────────────────────────────────────────────

/// Complete startup configuration for a simulator.
#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    /// Simulated milliseconds per tick. Default: 10.
    pub calc_ms: f64,
    /// Pace ticks against the wall clock. Default: true.
    pub realtime: bool,
    /// Run ticks back-to-back, ignoring `realtime`. Default: false.
    pub fast_step: bool,
    /// Block after a frame until the renderer acknowledges it. Default: false.
    pub sync_graphics: bool,
    /// Simulated milliseconds between graphics handshakes. Default: 40.
    pub sync_interval_ms: f64,
    /// Longest wait for a renderer acknowledgement. Default: 100.
    pub sync_timeout_ms: u64,
    /// Initial gravity. Default: (0, 0, -9.81).
    pub gravity: Vector3,
    /// Initial solver parameters.
    pub world: WorldParameters,
    /// Number of frames retained for readers. Default: 8. Minimum: 2.
    pub frame_ring_size: usize,
    /// Requests that may wait for the simulation thread. Default: 256.
    pub max_pending_requests: usize,
    /// Enter `Running` as soon as the thread is up. Default: false.
    pub start_running: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            calc_ms: 10.0,
            realtime: true,
            fast_step: false,
            sync_graphics: false,
            sync_interval_ms: 40.0,
            sync_timeout_ms: 100,
            gravity: Vector3::new(0.0, 0.0, -9.81),
            world: WorldParameters::default(),
            frame_ring_size: 8,
            max_pending_requests: 256,
            start_running: false,
        }
    }
}

impl SimConfig {
    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.calc_ms.is_finite() || self.calc_ms <= 0.0 {
            return Err(ConfigError::InvalidCalcMs {
                value: self.calc_ms,
            });
        }
        if !self.sync_interval_ms.is_finite() || self.sync_interval_ms <= 0.0 {
            return Err(ConfigError::InvalidSyncInterval {
                value: self.sync_interval_ms,
            });
        }
        if self.sync_timeout_ms == 0 {
            return Err(ConfigError::InvalidSyncTimeout);
        }
        if !self.gravity.is_finite() {
            return Err(ConfigError::InvalidGravity);
        }
        self.world
            .validate()
            .map_err(|reason| ConfigError::InvalidWorldParameter { reason })?;
        if self.frame_ring_size < 2 {
            return Err(ConfigError::RingTooSmall {
                configured: self.frame_ring_size,
            });
        }
        if self.max_pending_requests == 0 {
            return Err(ConfigError::RequestQueueZero);
        }
        Ok(())
    }

    /// Apply one property to this configuration, e.g. when importing
    /// stored settings before startup. The result is not re-validated.
    pub fn apply_property(&mut self, key: ConfigKey, value: &PropertyValue) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidProperty {
            key,
            value: value.to_string(),
        };
        match key {
            ConfigKey::CalcMs => self.calc_ms = value.as_f64().ok_or_else(invalid)?,
            ConfigKey::Realtime => self.realtime = value.as_bool().ok_or_else(invalid)?,
            ConfigKey::FastStep => self.fast_step = value.as_bool().ok_or_else(invalid)?,
            ConfigKey::SyncGraphics => self.sync_graphics = value.as_bool().ok_or_else(invalid)?,
            ConfigKey::SyncIntervalMs => {
                self.sync_interval_ms = value.as_f64().ok_or_else(invalid)?
            }
            ConfigKey::GravityX => self.gravity.x = value.as_f64().ok_or_else(invalid)?,
            ConfigKey::GravityY => self.gravity.y = value.as_f64().ok_or_else(invalid)?,
            ConfigKey::GravityZ => self.gravity.z = value.as_f64().ok_or_else(invalid)?,
            ConfigKey::WorldErp => self.world.erp = value.as_f64().ok_or_else(invalid)?,
            ConfigKey::WorldCfm => self.world.cfm = value.as_f64().ok_or_else(invalid)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_calc_ms() {
        for v in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = SimConfig {
                calc_ms: v,
                ..Default::default()
            };
            assert!(matches!(
                cfg.validate(),
                Err(ConfigError::InvalidCalcMs { .. })
            ));
        }
    }

    #[test]
    fn rejects_small_ring_and_zero_queue() {
        let cfg = SimConfig {
            frame_ring_size: 1,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::RingTooSmall { configured: 1 })
        );
        let cfg = SimConfig {
            max_pending_requests: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::RequestQueueZero));
    }

    #[test]
    fn rejects_bad_world_and_gravity() {
        let cfg = SimConfig {
            gravity: Vector3::new(0.0, f64::NAN, 0.0),
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidGravity));

        let mut cfg = SimConfig::default();
        cfg.world.erp = -0.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidWorldParameter { .. })
        ));
    }

    #[test]
    fn rejects_zero_sync_timeout_and_interval() {
        let cfg = SimConfig {
            sync_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSyncTimeout));
        let cfg = SimConfig {
            sync_interval_ms: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidSyncInterval { .. })
        ));
    }

    #[test]
    fn apply_property_updates_fields() {
        let mut cfg = SimConfig::default();
        cfg.apply_property(ConfigKey::CalcMs, &PropertyValue::Double(2.5))
            .unwrap();
        cfg.apply_property(ConfigKey::FastStep, &PropertyValue::Bool(true))
            .unwrap();
        cfg.apply_property(ConfigKey::GravityY, &PropertyValue::Int(3))
            .unwrap();
        assert_eq!(cfg.calc_ms, 2.5);
        assert!(cfg.fast_step);
        assert_eq!(cfg.gravity.y, 3.0);

        let err = cfg
            .apply_property(ConfigKey::Realtime, &PropertyValue::Text("on".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProperty { .. }));
    }
}
