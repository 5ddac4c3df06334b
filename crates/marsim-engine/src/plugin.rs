//! The [`Plugin`] trait, its per-tick context, and the shared
//! [`ControlCenter`].
//!
//! Plugins are user extensions ticked by the simulator. A plugin takes
//! part in physics ticks (run on the simulation thread right after each
//! step), in gui ticks (run on the renderer thread from
//! `post_graphics_update`), in both, or in neither, per its
//! [`UpdateMode`].

use std::sync::Arc;

use marsim_core::{
    DataBus, PhysicsEngine, PhysicsError, PluginError, PluginId, PropertyService, TickId,
};

use crate::simulator::SimulatorHandle;

/// Which ticks a plugin takes part in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UpdateMode {
    /// Registered but never ticked.
    None,
    /// Ticked after every physics step.
    #[default]
    Physics,
    /// Ticked from the renderer's `post_graphics_update`.
    Gui,
    /// Ticked in both.
    Both,
}

impl UpdateMode {
    /// Takes part in physics ticks.
    pub fn physics(self) -> bool {
        matches!(self, Self::Physics | Self::Both)
    }

    /// Takes part in gui ticks.
    pub fn gui(self) -> bool {
        matches!(self, Self::Gui | Self::Both)
    }
}

/// A simulator extension.
///
/// Callbacks receive `&mut self`: the registry serializes calls into one
/// plugin, even when it takes part in both physics and gui ticks.
///
/// Errors returned from a callback, and panics raised inside one, are
/// caught at the registry boundary, recorded, and never abort the tick or
/// affect other plugins.
///
/// # Examples
///
/// ```
/// use marsim_engine::{Plugin, PluginContext};
/// use marsim_core::PluginError;
///
/// struct Odometer {
///     travelled_ms: f64,
/// }
///
/// impl Plugin for Odometer {
///     fn name(&self) -> &str { "odometer" }
///
///     fn update(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
///         self.travelled_ms += ctx.elapsed_ms();
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send + 'static {
    /// Human-readable name for logs and fault records.
    fn name(&self) -> &str;

    /// Physics tick: called on the simulation thread after each step.
    fn update(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError>;

    /// Gui tick: called on the renderer thread. Default: nothing.
    fn gui_update(&mut self, control: &ControlCenter) -> Result<(), PluginError> {
        let _ = control;
        Ok(())
    }

    /// A physics error was reported. Default: nothing.
    fn handle_error(&mut self, error: &PhysicsError) {
        let _ = error;
    }

    /// The world was reset or replaced. Default: nothing.
    fn reset(&mut self) {}
}

/// Everything a plugin may touch during a physics tick.
pub struct PluginContext<'a> {
    pub(crate) control: &'a ControlCenter,
    pub(crate) physics: &'a mut dyn PhysicsEngine,
    pub(crate) plugin: PluginId,
    pub(crate) tick: TickId,
    pub(crate) elapsed_ms: f64,
    pub(crate) sim_time_ms: f64,
}

impl<'a> PluginContext<'a> {
    /// The shared control center.
    pub fn control(&self) -> &ControlCenter {
        self.control
    }

    /// The physics engine, owned by the simulation thread for the tick.
    pub fn physics(&mut self) -> &mut dyn PhysicsEngine {
        &mut *self.physics
    }

    /// The id under which the running plugin is registered.
    pub fn plugin_id(&self) -> PluginId {
        self.plugin
    }

    /// The tick being executed.
    pub fn tick(&self) -> TickId {
        self.tick
    }

    /// Simulated milliseconds advanced by this tick.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    /// Simulated time since the last reset, after this tick's step.
    pub fn sim_time_ms(&self) -> f64 {
        self.sim_time_ms
    }
}

/// Long-lived shared context handed to plugins and listeners.
///
/// Created once by the [`Simulator`](crate::Simulator) and shared by
/// reference; holders never own the simulator itself.
pub struct ControlCenter {
    sim: SimulatorHandle,
    data_bus: Arc<dyn DataBus>,
    properties: Arc<dyn PropertyService>,
}

impl ControlCenter {
    pub(crate) fn new(
        sim: SimulatorHandle,
        data_bus: Arc<dyn DataBus>,
        properties: Arc<dyn PropertyService>,
    ) -> Self {
        Self {
            sim,
            data_bus,
            properties,
        }
    }

    /// The simulator's public entry points.
    pub fn sim(&self) -> &SimulatorHandle {
        &self.sim
    }

    /// The telemetry bus.
    pub fn data_bus(&self) -> &Arc<dyn DataBus> {
        &self.data_bus
    }

    /// The configuration property service.
    pub fn properties(&self) -> &Arc<dyn PropertyService> {
        &self.properties
    }
}
