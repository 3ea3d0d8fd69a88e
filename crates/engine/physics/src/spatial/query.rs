//! Volume queries built on [`traverse`]
//!
//! Every query is an instantiation of the same walk with a different node
//! predicate. Results are appended to a caller-owned buffer.

use std::ops::ControlFlow;

use glam::{DVec3, Vec4};

use super::traverse::{traverse, NodeTest};
use super::tree::{AabbTree, LeafEntry, ProxyId};
use crate::math::DAabb;

/// Maximum number of planes a frustum query accepts
pub const MAX_FRUSTUM_PLANES: usize = 8;

/// Finer per-object frustum test applied to a leaf's own bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrustumPolicy {
    /// Only objects entirely inside every plane
    Strict,
    /// Any object touching the frustum
    #[default]
    Inclusive,
}

fn sphere_node_test(aabb: &DAabb, center: DVec3, r2: f64) -> NodeTest {
    if aabb.distance_squared_to_point(center) > r2 {
        NodeTest::Reject
    } else if aabb.max_distance_squared_to_point(center) <= r2 {
        NodeTest::Accept
    } else {
        NodeTest::Descend
    }
}

fn frustum_node_test(aabb: &DAabb, origin: DVec3, planes: &[Vec4]) -> NodeTest {
    let mut inside = true;
    for plane in planes {
        let (dist, radius) = aabb.plane_extent(origin, *plane);
        if dist + radius < 0.0 {
            return NodeTest::Reject;
        }
        if dist - radius < 0.0 {
            inside = false;
        }
    }
    if inside {
        NodeTest::Accept
    } else {
        NodeTest::Descend
    }
}

/// Whether an object's own bounds pass the frustum under `policy`
pub fn frustum_accepts(bounds: &DAabb, origin: DVec3, planes: &[Vec4], policy: FrustumPolicy) -> bool {
    planes.iter().all(|plane| {
        let (mp, np) = bounds.plane_extent(origin, *plane);
        match policy {
            FrustumPolicy::Inclusive => mp + np >= 0.0,
            FrustumPolicy::Strict => mp - np >= 0.0,
        }
    })
}

fn clamp_planes(planes: &[Vec4]) -> &[Vec4] {
    debug_assert!(
        planes.len() <= MAX_FRUSTUM_PLANES,
        "frustum query with {} planes",
        planes.len()
    );
    if planes.len() > MAX_FRUSTUM_PLANES {
        tracing::warn!(
            planes = planes.len(),
            "frustum query truncated to {MAX_FRUSTUM_PLANES} planes"
        );
        &planes[..MAX_FRUSTUM_PLANES]
    } else {
        planes
    }
}

/// Leaves whose bounds intersect a sphere
pub fn query_sphere<T: Copy>(roots: &[&AabbTree<T>], center: DVec3, radius: f64, out: &mut Vec<T>) {
    let r2 = radius * radius;
    let _ = traverse(roots, |node| sphere_node_test(node.aabb, center, r2), |leaf| {
        if leaf.bounds.distance_squared_to_point(center) <= r2 {
            out.push(leaf.data);
        }
        ControlFlow::Continue(())
    });
}

/// Leaves whose bounds intersect a box
pub fn query_aabb<T: Copy>(roots: &[&AabbTree<T>], aabb: &DAabb, out: &mut Vec<T>) {
    let _ = traverse(
        roots,
        |node| {
            if !node.aabb.intersects(aabb) {
                NodeTest::Reject
            } else if aabb.contains(node.aabb) {
                NodeTest::Accept
            } else {
                NodeTest::Descend
            }
        },
        |leaf| {
            if leaf.bounds.intersects(aabb) {
                out.push(leaf.data);
            }
            ControlFlow::Continue(())
        },
    );
}

/// Leaves inside a frustum given as planes relative to `origin`.
///
/// A plane `(n, w)` keeps points `p` with `n · (p - origin) + w >= 0`.
pub fn query_frustum<T: Copy>(
    roots: &[&AabbTree<T>],
    origin: DVec3,
    planes: &[Vec4],
    policy: FrustumPolicy,
    out: &mut Vec<T>,
) {
    let planes = clamp_planes(planes);
    let _ = traverse(roots, |node| frustum_node_test(node.aabb, origin, planes), |leaf: &LeafEntry<T>| {
        if frustum_accepts(&leaf.bounds, origin, planes, policy) {
            out.push(leaf.data);
        }
        ControlFlow::Continue(())
    });
}

/// Leaves whose bounds a ray enters within `range`, with the entry distance.
///
/// `direction` must be normalized. Hits are appended in traversal order.
pub fn query_ray<T: Copy>(
    roots: &[&AabbTree<T>],
    origin: DVec3,
    direction: DVec3,
    range: f64,
    out: &mut Vec<(T, f64)>,
) {
    let _ = traverse(
        roots,
        |node| match node.aabb.ray_entry(origin, direction, range) {
            Some(_) => NodeTest::Descend,
            None => NodeTest::Reject,
        },
        |leaf| {
            if let Some(distance) = leaf.bounds.ray_entry(origin, direction, range) {
                out.push((leaf.data, distance));
            }
            ControlFlow::Continue(())
        },
    );
}

/// First leaf in a sphere that passes `filter`
pub fn first_in_sphere<T: Copy>(
    roots: &[&AabbTree<T>],
    center: DVec3,
    radius: f64,
    mut filter: impl FnMut(&T) -> bool,
) -> Option<T> {
    let r2 = radius * radius;
    let mut found = None;
    let _ = traverse(roots, |node| sphere_node_test(node.aabb, center, r2), |leaf| {
        if leaf.bounds.distance_squared_to_point(center) <= r2 && filter(&leaf.data) {
            found = Some(leaf.data);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });
    found
}

/// Handle of an object in a [`CollisionIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexProxy {
    Dynamic(ProxyId),
    Static(ProxyId),
}

/// Global object index with separate trees for moving and static objects
#[derive(Debug, Clone)]
pub struct CollisionIndex<T> {
    dynamic: AabbTree<T>,
    fixed: AabbTree<T>,
    capacity: Option<usize>,
}

impl<T: Copy> Default for CollisionIndex<T> {
    fn default() -> Self {
        Self::new(0.1, None)
    }
}

impl<T: Copy> CollisionIndex<T> {
    pub fn new(margin: f64, capacity: Option<usize>) -> Self {
        Self {
            dynamic: AabbTree::new(margin),
            fixed: AabbTree::new(0.0),
            capacity,
        }
    }

    pub fn from_config(config: &crate::config::PhysicsConfig) -> Self {
        Self::new(config.fat_margin, Some(config.world_capacity))
    }

    pub fn len(&self) -> usize {
        self.dynamic.len() + self.fixed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|c| self.len() >= c)
    }

    /// Insert an object, `None` when the index is at capacity
    pub fn insert(&mut self, data: T, bounds: DAabb, is_static: bool) -> Option<IndexProxy> {
        if self.is_full() {
            return None;
        }
        if is_static {
            self.fixed.insert(data, bounds).map(IndexProxy::Static)
        } else {
            self.dynamic.insert(data, bounds).map(IndexProxy::Dynamic)
        }
    }

    pub fn remove(&mut self, proxy: IndexProxy) -> Option<T> {
        match proxy {
            IndexProxy::Dynamic(id) => self.dynamic.remove(id),
            IndexProxy::Static(id) => self.fixed.remove(id),
        }
    }

    pub fn update(&mut self, proxy: IndexProxy, bounds: DAabb) -> bool {
        match proxy {
            IndexProxy::Dynamic(id) => self.dynamic.update(id, bounds),
            IndexProxy::Static(id) => self.fixed.update(id, bounds),
        }
    }

    pub fn get(&self, proxy: IndexProxy) -> Option<&LeafEntry<T>> {
        match proxy {
            IndexProxy::Dynamic(id) => self.dynamic.get(id),
            IndexProxy::Static(id) => self.fixed.get(id),
        }
    }

    /// Dynamic root first, then static
    pub fn roots(&self) -> [&AabbTree<T>; 2] {
        [&self.dynamic, &self.fixed]
    }

    pub fn query_sphere(&self, center: DVec3, radius: f64, out: &mut Vec<T>) {
        query_sphere(&self.roots(), center, radius, out);
    }

    pub fn query_aabb(&self, aabb: &DAabb, out: &mut Vec<T>) {
        query_aabb(&self.roots(), aabb, out);
    }

    pub fn query_frustum(&self, origin: DVec3, planes: &[Vec4], policy: FrustumPolicy, out: &mut Vec<T>) {
        query_frustum(&self.roots(), origin, planes, policy, out);
    }

    pub fn first_in_sphere(&self, center: DVec3, radius: f64, filter: impl FnMut(&T) -> bool) -> Option<T> {
        first_in_sphere(&self.roots(), center, radius, filter)
    }

    pub fn query_ray(&self, origin: DVec3, direction: DVec3, range: f64, out: &mut Vec<(T, f64)>) {
        query_ray(&self.roots(), origin, direction, range, out);
    }
}
