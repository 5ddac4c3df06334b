//! Core types and collaborator traits for the marsim simulation coordinator.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! vocabulary shared by the coordinator and its collaborators: the
//! simulation status, identifiers, world parameters, scene requests, error
//! types, configuration properties, and the traits through which the
//! physics engine, scene store, data bus, and renderer are consumed.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod math;
pub mod property;
pub mod request;
pub mod status;
pub mod traits;

pub use error::{PhysicsError, PluginError, RequestError};
pub use id::{NodeId, PluginId, TickId};
pub use math::{Vector3, WorldParameters};
pub use property::{ConfigKey, MemoryProperties, PropertyValue, KEY_PREFIX};
pub use request::LoadRequest;
pub use status::SimulationStatus;
pub use traits::{
    DataBus, Frame, GraphicsConsumer, NullBus, PhysicsEngine, PhysicsUpdate, PropertyListener,
    PropertyService, SceneStore, PHYSICS_UPDATE_CHANNEL,
};
