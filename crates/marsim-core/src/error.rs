//! Error types for the simulation coordinator.
//!
//! Organised by where the failure originates: the physics engine, a plugin
//! callback, or a queued world request. None of these terminate the
//! simulation loop; they are recorded and surfaced through status queries
//! or returned to the caller that issued the request.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Errors raised by the physics engine.
///
/// A step failure sets the persistent fault flag (`has_sim_fault`) but the
/// loop keeps ticking; callers decide whether to stop or reset.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicsError {
    /// The solver produced non-finite state.
    SolverDiverged {
        /// Description of what diverged.
        reason: String,
    },
    /// The world configuration is invalid for the solver.
    InvalidConfiguration {
        /// Description of the invalid setting.
        reason: String,
    },
    /// The engine could not create its world. Unrecoverable.
    InitFailed {
        /// Description of the failure.
        reason: String,
    },
    /// A node id referenced by a call does not exist.
    UnknownNode {
        /// The missing node.
        node: crate::NodeId,
    },
}

impl PhysicsError {
    /// Whether continued simulation is meaningless after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InitFailed { .. })
    }
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SolverDiverged { reason } => write!(f, "solver diverged: {reason}"),
            Self::InvalidConfiguration { reason } => {
                write!(f, "invalid physics configuration: {reason}")
            }
            Self::InitFailed { reason } => write!(f, "physics init failed: {reason}"),
            Self::UnknownNode { node } => write!(f, "unknown node {node}"),
        }
    }
}

impl Error for PhysicsError {}

/// Errors raised inside a plugin callback.
///
/// Caught at the registry boundary; never aborts a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PluginError {
    /// The plugin reported a failure.
    ExecutionFailed {
        /// Description of the failure.
        reason: String,
    },
    /// The plugin panicked; the payload message if it was a string.
    Panicked {
        /// Panic message, or `"<non-string panic>"`.
        message: String,
    },
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionFailed { reason } => write!(f, "plugin failed: {reason}"),
            Self::Panicked { message } => write!(f, "plugin panicked: {message}"),
        }
    }
}

impl Error for PluginError {}

/// Errors from queued world requests (load, save, reset, ...).
///
/// Reported only to the caller that issued the request: through the
/// completion signal for blocking calls, or through the request fault flag
/// for non-blocking ones. A failed load leaves the previous world intact.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestError {
    /// The scene file does not exist or cannot be opened.
    FileNotFound {
        /// The offending path.
        path: PathBuf,
    },
    /// The scene could not be parsed or instantiated.
    LoadFailed {
        /// Description of the failure.
        reason: String,
    },
    /// The requested robot is not present in the scene.
    RobotNotFound {
        /// The robot name that was requested.
        name: String,
    },
    /// The scene could not be written.
    SaveFailed {
        /// Description of the failure.
        reason: String,
    },
    /// Resetting or clearing the world failed in the physics engine.
    Physics(PhysicsError),
    /// Too many requests are waiting for the simulation thread.
    QueueFull,
    /// A blocking request was issued from the simulation thread itself.
    WouldDeadlock,
    /// The simulator is shutting down; the request was not executed.
    ShuttingDown,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound { path } => write!(f, "scene file not found: {}", path.display()),
            Self::LoadFailed { reason } => write!(f, "scene load failed: {reason}"),
            Self::RobotNotFound { name } => write!(f, "robot '{name}' not found in scene"),
            Self::SaveFailed { reason } => write!(f, "scene save failed: {reason}"),
            Self::Physics(e) => write!(f, "physics: {e}"),
            Self::QueueFull => write!(f, "request queue full"),
            Self::WouldDeadlock => {
                write!(f, "blocking request issued from the simulation thread")
            }
            Self::ShuttingDown => write!(f, "simulator is shutting down"),
        }
    }
}

impl Error for RequestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Physics(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PhysicsError> for RequestError {
    fn from(e: PhysicsError) -> Self {
        Self::Physics(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_init_failure_is_fatal() {
        assert!(PhysicsError::InitFailed {
            reason: "no world".into()
        }
        .is_fatal());
        assert!(!PhysicsError::SolverDiverged {
            reason: "nan".into()
        }
        .is_fatal());
    }

    #[test]
    fn request_error_wraps_physics_source() {
        let e: RequestError = PhysicsError::UnknownNode {
            node: crate::NodeId(7),
        }
        .into();
        assert!(e.source().is_some());
        assert_eq!(e.to_string(), "physics: unknown node 7");
    }
}
