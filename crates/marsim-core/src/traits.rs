//! Collaborator traits consumed by the coordinator.
//!
//! The physics solver, scene I/O, data-publishing bus, renderer, and
//! property service live outside this workspace. The coordinator only
//! depends on these interfaces.

use std::path::Path;
use std::sync::Arc;

use crate::error::{PhysicsError, RequestError};
use crate::id::{NodeId, TickId};
use crate::math::{Vector3, WorldParameters};
use crate::property::PropertyValue;
use crate::request::LoadRequest;
use crate::status::SimulationStatus;

/// Channel under which the per-tick [`PhysicsUpdate`] is published.
pub const PHYSICS_UPDATE_CHANNEL: &str = "simulator/physics_update";

/// The physics solver, treated as an opaque stepping interface.
///
/// Every call originates from the simulation thread. The engine is moved
/// into that thread at startup and never shared.
pub trait PhysicsEngine: Send + 'static {
    /// Create the solver world. Called once at startup and again after
    /// [`free_world`](Self::free_world) on reset.
    fn init_world(&mut self) -> Result<(), PhysicsError>;

    /// Destroy the solver world and everything in it.
    fn free_world(&mut self);

    /// Advance the world by `dt` simulated seconds.
    fn step(&mut self, dt: f64) -> Result<(), PhysicsError>;

    /// Replace the gravity vector.
    fn set_gravity(&mut self, gravity: Vector3);

    /// Replace the solver parameters.
    fn set_world_parameters(&mut self, params: &WorldParameters);

    /// Run collision detection and return the number of contacts.
    fn check_collisions(&mut self) -> usize;

    /// Rigidly join two nodes.
    fn connect_nodes(&mut self, a: NodeId, b: NodeId) -> Result<(), PhysicsError>;

    /// Remove a joint previously created by [`connect_nodes`](Self::connect_nodes).
    fn disconnect_nodes(&mut self, a: NodeId, b: NodeId) -> Result<(), PhysicsError>;
}

/// Scene file parsing and serialization.
///
/// Implementations must leave the world untouched when a load fails.
pub trait SceneStore: Send + 'static {
    /// Load the requested scene into `physics`.
    fn load(
        &mut self,
        physics: &mut dyn PhysicsEngine,
        request: &LoadRequest,
    ) -> Result<(), RequestError>;

    /// Write the current world to `path`.
    fn save(&mut self, physics: &mut dyn PhysicsEngine, path: &Path) -> Result<(), RequestError>;

    /// Rebuild loaded scenes into a freshly initialised world.
    fn reset(&mut self, physics: &mut dyn PhysicsEngine) -> Result<(), RequestError> {
        let _ = physics;
        Ok(())
    }

    /// Forget loaded scenes. With `clear_all`, also forget persistent
    /// environment objects.
    fn clear(&mut self, physics: &mut dyn PhysicsEngine, clear_all: bool) {
        let _ = (physics, clear_all);
    }
}

/// Record published once per tick on [`PHYSICS_UPDATE_CHANNEL`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsUpdate {
    /// Tick that produced this record.
    pub tick: TickId,
    /// Simulated time since the last reset, in milliseconds.
    pub sim_time_ms: f64,
    /// Successful physics steps since the last reset.
    pub step_count: u64,
}

/// Telemetry bus. Subscribers are outside the scope of this workspace.
pub trait DataBus: Send + Sync {
    /// Publish a physics update on `channel`.
    fn publish(&self, channel: &str, update: &PhysicsUpdate);
}

/// Immutable per-tick state published for readers on other threads.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Tick that produced this frame.
    pub tick: TickId,
    /// Simulated time since the last reset, in milliseconds.
    pub sim_time_ms: f64,
    /// Successful physics steps since the last reset.
    pub step_count: u64,
    /// Status at the end of the tick.
    pub status: SimulationStatus,
    /// Gravity in effect during the tick.
    pub gravity: Vector3,
}

/// Renderer side of the graphics handshake.
pub trait GraphicsConsumer: Send + Sync {
    /// A frame is ready to be drawn. In sync mode the simulation thread
    /// waits for `finished_draw` after this call.
    fn frame_ready(&self, frame: &Frame);
}

/// Receives configuration property changes.
pub trait PropertyListener: Send + Sync {
    /// `key` changed to `value`.
    fn property_changed(&self, key: &str, value: &PropertyValue);
}

/// Configuration property broadcast service.
pub trait PropertyService: Send + Sync {
    /// Current value of `key`, if set.
    fn get(&self, key: &str) -> Option<PropertyValue>;
    /// Store `value` under `key` and notify listeners.
    fn set(&self, key: &str, value: PropertyValue);
    /// Register a listener for all subsequent changes.
    fn subscribe(&self, listener: Arc<dyn PropertyListener>);
}

/// A [`DataBus`] that drops every record.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBus;

impl DataBus for NullBus {
    fn publish(&self, _channel: &str, _update: &PhysicsUpdate) {}
}
