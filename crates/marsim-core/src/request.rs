//! Scene load requests.

use std::path::PathBuf;

/// A request to load a scene file into the world.
///
/// Created by any caller of `load_scene`, queued, and consumed exactly once
/// by the simulation thread in FIFO order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadRequest {
    /// Scene file to load.
    pub filename: PathBuf,
    /// Name under which the loaded robot is registered. Empty means use
    /// the name stored in the scene.
    pub robot_name: String,
    /// Whether the simulation was running when the load was requested.
    /// If set, the simulation is restarted after the load completes.
    pub was_running: bool,
}

impl LoadRequest {
    /// A request for `filename` with no robot name that does not restart
    /// the simulation afterwards.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            robot_name: String::new(),
            was_running: false,
        }
    }

    /// Set the robot name.
    pub fn robot(mut self, name: impl Into<String>) -> Self {
        self.robot_name = name.into();
        self
    }

    /// Set the previously-running flag.
    pub fn was_running(mut self, was_running: bool) -> Self {
        self.was_running = was_running;
        self
    }
}
