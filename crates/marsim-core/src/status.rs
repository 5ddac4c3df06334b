//! The run/stop/step status of the simulation.

use std::fmt;

/// Lifecycle status of the simulation thread.
///
/// Exactly one value holds at any instant. Transitions are owned by the
/// step controller in `marsim-engine`:
///
/// ```text
/// STOPPED --start--> RUNNING --stop--> STOPPING --tick boundary--> STOPPED
/// STOPPED/STOPPING --single_step--> STEPPING --one tick--> STOPPED
/// any --exit--> STOPPED
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SimulationStatus {
    /// Status could not be determined (unrecognised status code).
    Unknown,
    /// No ticks are executing; the simulation thread is parked.
    #[default]
    Stopped,
    /// Ticks execute continuously.
    Running,
    /// A stop was requested; the current tick completes, then `Stopped`.
    Stopping,
    /// Exactly one tick executes, then `Stopped`.
    Stepping,
}

impl SimulationStatus {
    /// Integer code compatible with scripting front ends (`-1..=3`).
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Stepping => 3,
        }
    }

    /// Inverse of [`code`](Self::code). Unrecognised codes map to `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Stopped,
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stepping,
            _ => Self::Unknown,
        }
    }

    /// Whether the simulation thread executes a tick in this status.
    pub fn is_ticking(self) -> bool {
        matches!(self, Self::Running | Self::Stepping)
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stepping => "stepping",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_stopped() {
        assert_eq!(SimulationStatus::default(), SimulationStatus::Stopped);
    }

    #[test]
    fn codes_round_trip_and_unknown_fallback() {
        for s in [
            SimulationStatus::Stopped,
            SimulationStatus::Running,
            SimulationStatus::Stopping,
            SimulationStatus::Stepping,
        ] {
            assert_eq!(SimulationStatus::from_code(s.code()), s);
        }
        assert_eq!(SimulationStatus::from_code(42), SimulationStatus::Unknown);
        assert_eq!(SimulationStatus::Unknown.code(), -1);
    }

    #[test]
    fn only_running_and_stepping_tick() {
        assert!(SimulationStatus::Running.is_ticking());
        assert!(SimulationStatus::Stepping.is_ticking());
        assert!(!SimulationStatus::Stopping.is_ticking());
        assert!(!SimulationStatus::Stopped.is_ticking());
    }
}
