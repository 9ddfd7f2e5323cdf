//! Built-in vehicular model types for the vanetsim engine.
//!
//! - [`FixedCarModel`] -- a vehicle at a fixed GPS position that announces
//!   itself with a beacon at the start of every run.
//! - [`NetworkCarModel`] -- a vehicle backed by a network peer. It counts
//!   the messages it receives and echoes each one back to its sender.
//! - [`RoadMapModel`] -- road geometry other models depend on.
//!
//! Vehicle types report the [`CAR_MODEL_TAG`] capability, so
//! [`ModelGraph::add_network_cars`](vanetsim_core::graph::ModelGraph::add_network_cars)
//! and registry queries find them without knowing their concrete names.

mod car;
mod map;

pub use car::{Beacon, FixedCarModel, Message, NetworkCarModel};
pub use map::RoadMapModel;

use vanetsim_core::id::EventKind;
use vanetsim_core::registry::{ModelRegistry, RegistryError};

pub use vanetsim_core::graph::CAR_MODEL_TAG;

/// Capability tag of models that talk to a network peer.
pub const NETWORK_MODEL_TAG: &str = "NetworkModel";
/// Capability tag of road map models.
pub const MAP_MODEL_TAG: &str = "MapModel";

pub const FIXED_CAR: &str = "FixedCar";
pub const NETWORK_CAR: &str = "NetworkCar";
pub const ROAD_MAP: &str = "RoadMap";

/// Periodic position announcement; payload [`Beacon`].
pub const BEACON: EventKind = EventKind(1);
/// Application message between vehicles; payload [`Message`].
pub const MESSAGE: EventKind = EventKind(2);

/// Register every built-in model type.
pub fn register_builtin_models(registry: &mut ModelRegistry) -> Result<(), RegistryError> {
    registry.register_model(FIXED_CAR, |name| Box::new(FixedCarModel::new(name)))?;
    registry.register_model(NETWORK_CAR, |name| Box::new(NetworkCarModel::new(name)))?;
    registry.register_model(ROAD_MAP, |name| Box::new(RoadMapModel::new(name)))?;
    Ok(())
}
