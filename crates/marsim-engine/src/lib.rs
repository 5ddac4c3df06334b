//! Real-time simulation coordinator.
//!
//! A dedicated simulation thread advances a physics world at a controlled
//! rate, executes world-mutating requests (scene load/save, reset) strictly
//! between ticks, drives the plugin lifecycle, publishes per-tick frames,
//! and optionally hands each frame to a renderer before continuing.
//!
//! Start with [`Simulator::new`]; share a [`SimulatorHandle`] with other
//! threads.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod governor;
mod graphics;
pub mod metrics;
mod params;
mod pause;
pub mod plugin;
pub mod registry;
mod request;
mod ring;
mod sim_loop;
pub mod simulator;
mod step;

pub use config::{ConfigError, SimConfig};
pub use governor::{Pacing, RealtimeGovernor};
pub use metrics::LoopMetrics;
pub use pause::PauseGuard;
pub use plugin::{ControlCenter, Plugin, PluginContext, UpdateMode};
pub use registry::{PluginFault, PluginInfo, PluginState};
pub use simulator::{Collaborators, ShutdownReport, Simulator, SimulatorHandle};
