//! Planet-scale terrain and vegetation collision
//!
//! A collision layer that sits beside a rigid-body solver and handles the
//! geometry a conventional broadphase cannot hold: procedurally generated
//! terrain triangles streamed in per query, tree instances grouped into
//! batches per terrain cell, and per-terrain-island broadphase indices that
//! come and go with streaming.
//!
//! # Architecture
//!
//! - [`spatial`] - AABB trees, the static/dynamic [`CollisionIndex`] and volume queries
//! - [`terrain`] - terrain provider seam and the per-step [`TerrainContactPipeline`]
//! - [`trees`] - tree batches, the batch cache, collision pairs and flex handling
//! - [`broadphase`] - external broadphase islands, sensors and combined queries
//! - [`debug`] - per-step stats and debug geometry capture
//!
//! Bodies, manifolds, tree batches and islands live in rapier's generational
//! [`rapier3d::data::Arena`], so stale handles resolve to `None`.
//!
//! Positions are `f64` ([`glam::DVec3`]) everywhere a value can be planet-sized.
//! Narrow-phase work runs in `f32` relative to a nearby anchor point.

pub mod body;
pub mod broadphase;
pub mod config;
pub mod debug;
pub mod error;
pub mod manifold;
pub mod math;
pub mod shape;
pub mod spatial;
pub mod terrain;
pub mod trees;

pub use body::{ActivationState, Body, BodyHandle, BodySet, Material};
pub use broadphase::{BroadphaseRegistry, ExternalBroadphase, IslandHandle, ObjectId, SensorTable};
pub use config::PhysicsConfig;
pub use debug::{DebugCapture, DebugLine, DebugLineKind, PhysicsStats};
pub use error::{PhysicsError, Result};
pub use manifold::{
    ContactManifold, ContactPoint, ManifoldDispatcher, ManifoldHandle, ManifoldPartner,
    ManifoldPool,
};
pub use math::{DAabb, DIsometry};
pub use shape::{CollisionShape, CompoundChild, ConvexHull, ShapeAxis};
pub use spatial::{AabbTree, CollisionIndex, FrustumPolicy, NodeTest};
pub use terrain::{
    FlatPatchProvider, RegionAabbOutput, RegionQuery, TerrainContactPipeline, TerrainHit, TerrainProvider,
    Triangle, TriangleBuffer,
};
pub use trees::{
    BrakingDeflection, BreakState, Tree, TreeBatch, TreeBatchCache, TreeCollisionContext,
    TreeDeflection, TreeRef,
};

// Re-export for convenience
pub use glam;
pub use rapier3d;
