//! Terrain contact generation
//!
//! The planet surface is never a collision mesh. Each step every active body
//! is flattened into convex leaves, each leaf asks the [`TerrainProvider`] for
//! the triangles and tree batches inside its query box, and the resulting
//! contacts land in the body's single terrain manifold.
//!
//! # Architecture
//!
//! - [`leaf`] - compound flattening and per-leaf query boxes
//! - [`provider`] - the [`TerrainProvider`] seam
//! - [`triangle`] - anchor-relative triangle buffers
//! - [`narrow`] - [`ContactStrategy`] leaf vs triangle contacts
//! - [`pipeline`] - [`TerrainContactPipeline`], the per-step driver
//! - [`flat`] - a flat plane provider for tests and benchmarks

pub mod flat;
pub mod leaf;
pub mod narrow;
pub mod pipeline;
pub mod provider;
pub mod triangle;

pub use flat::FlatPatchProvider;
pub use leaf::{CompoundFlattener, Leaf, LeafVolume, LeafShape};
pub use narrow::{ContactStrategy, TriangleContact};
pub use pipeline::TerrainContactPipeline;
pub use provider::{RegionAabbOutput, RegionOutput, RegionQuery, TerrainHit, TerrainProvider};
pub use triangle::{Triangle, TriangleBuffer};
