//! Spatial query engine
//!
//! Hierarchical bounding volumes and the queries run against them. Both the
//! global object index and every terrain-island broadphase are [`AabbTree`]s,
//! and every query (sphere, box, frustum, ray, first hit) is one generic
//! [`traverse`] with a different node predicate.
//!
//! # Architecture
//!
//! - [`tree`] - incremental AABB tree with fat leaves and optional capacity
//! - [`traverse`](mod@traverse) - explicit-stack walk over any number of roots
//! - [`query`] - sphere / box / frustum / ray instantiations and [`CollisionIndex`]

pub mod query;
pub mod traverse;
pub mod tree;

pub use query::{
    first_in_sphere, frustum_accepts, query_aabb, query_frustum, query_ray, query_sphere,
    CollisionIndex, FrustumPolicy, IndexProxy, MAX_FRUSTUM_PLANES,
};
pub use traverse::{traverse, NodeTest, NodeView};
pub use tree::{AabbTree, LeafEntry, ProxyId};
