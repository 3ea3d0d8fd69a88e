//! External broadphase islands
//!
//! Objects generated with the terrain (rocks, buildings, props) do not live in
//! the global collision index. Each terrain region keeps them in its own
//! island, an [`ExternalBroadphase`] with a bounded AABB tree, and the
//! provider tells us which islands a query touches.
//!
//! Group/mask filtering uses rapier's [`InteractionGroups`], so an island pair
//! overlaps exactly when the two objects would interact in rapier.

mod island;
mod query;
mod registry;
mod sensor;

pub use island::{ExternalBroadphase, IslandEntry, ObjectKind};
pub use query::wake_up_in_radius;
pub use registry::{BroadphaseRegistry, RebuildReport};
pub use sensor::{SensorPair, SensorTable};

pub use rapier3d::geometry::{Group, InteractionGroups};

use rapier3d::data::Index;

/// Identifier of a collision object owned by the embedding engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IslandHandle(pub(crate) Index);
