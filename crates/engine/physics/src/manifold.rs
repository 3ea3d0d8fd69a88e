//! Contact manifolds and the dispatcher that owns them
//!
//! The dynamics engine normally owns manifolds. The [`ManifoldDispatcher`]
//! trait is the seam to it; [`ManifoldPool`] is a self-contained
//! implementation used when no external engine is attached.

use glam::{DVec3, Vec3};
use rapier3d::data::{Arena, Index};

use crate::body::{BodyHandle, Material};
use crate::trees::TreeRef;

/// Maximum number of points a manifold keeps
pub const MANIFOLD_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManifoldHandle(pub(crate) Index);

/// What the body is touching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifoldPartner {
    Terrain,
    /// A tree proxy, linked against a specific cache epoch
    Tree { tree: TreeRef, epoch: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// Point on the body, body-local
    pub local_point_a: Vec3,
    /// Point on the partner, in the partner's local frame
    pub local_point_b: Vec3,
    /// Point on the partner in world space
    pub world_point_b: DVec3,
    /// Contact normal pointing from the partner toward the body
    pub normal_on_b: Vec3,
    /// Signed separation, negative when penetrating
    pub distance: f32,
    pub material: Material,
    /// Source triangle index for terrain contacts
    pub triangle: Option<u32>,
}

impl ContactPoint {
    /// World position of the body-side point
    pub fn world_point_a(&self) -> DVec3 {
        self.world_point_b + (self.normal_on_b * self.distance).as_dvec3()
    }
}

#[derive(Debug, Clone)]
pub struct ContactManifold {
    body: BodyHandle,
    partner: ManifoldPartner,
    breaking_threshold: f32,
    points: Vec<ContactPoint>,
}

impl ContactManifold {
    pub fn new(body: BodyHandle, partner: ManifoldPartner, breaking_threshold: f32) -> Self {
        Self {
            body,
            partner,
            breaking_threshold,
            points: Vec::with_capacity(MANIFOLD_CAPACITY),
        }
    }

    #[inline]
    pub fn body(&self) -> BodyHandle {
        self.body
    }

    #[inline]
    pub fn partner(&self) -> ManifoldPartner {
        self.partner
    }

    #[inline]
    pub fn breaking_threshold(&self) -> f32 {
        self.breaking_threshold
    }

    #[inline]
    pub fn points(&self) -> &[ContactPoint] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Add a contact point.
    ///
    /// A point within the breaking threshold of an existing one replaces it
    /// when deeper. A full manifold keeps its deepest point and swaps out
    /// whichever other point leaves the largest contact area. A newcomer
    /// deeper than every kept point may replace any of them.
    pub fn add_point(&mut self, point: ContactPoint) {
        let merge_sq = self.breaking_threshold * self.breaking_threshold;
        if let Some(existing) = self
            .points
            .iter_mut()
            .find(|p| (p.local_point_a - point.local_point_a).length_squared() < merge_sq)
        {
            if point.distance < existing.distance {
                *existing = point;
            }
            return;
        }

        if self.points.len() < MANIFOLD_CAPACITY {
            self.points.push(point);
            return;
        }

        let slot = self.replacement_slot(&point);
        self.points[slot] = point;
    }

    /// Slot whose replacement by `point` maximizes the manifold area
    fn replacement_slot(&self, point: &ContactPoint) -> usize {
        let keep = self
            .deepest()
            .filter(|&i| self.points[i].distance <= point.distance);

        let mut best = (0, f32::NEG_INFINITY);
        for slot in 0..self.points.len() {
            if Some(slot) == keep {
                continue;
            }
            let mut quad = [Vec3::ZERO; MANIFOLD_CAPACITY];
            for (i, q) in quad.iter_mut().enumerate() {
                *q = if i == slot {
                    point.local_point_a
                } else {
                    self.points[i].local_point_a
                };
            }
            let area = quad_area_squared(&quad);
            if area > best.1 {
                best = (slot, area);
            }
        }
        best.0
    }

    /// Index of the most penetrating point
    pub fn deepest(&self) -> Option<usize> {
        self.points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
            .map(|(i, _)| i)
    }
}

/// Squared area measure of four points, independent of their order
fn quad_area_squared(q: &[Vec3; MANIFOLD_CAPACITY]) -> f32 {
    [(0, 2, 1, 3), (0, 1, 2, 3), (0, 3, 1, 2)]
        .into_iter()
        .map(|(a, b, c, d)| (q[a] - q[b]).cross(q[c] - q[d]).length_squared())
        .fold(0.0, f32::max)
}

/// Seam to whatever owns contact manifolds
pub trait ManifoldDispatcher {
    fn new_manifold(
        &mut self,
        body: BodyHandle,
        partner: ManifoldPartner,
        breaking_threshold: f32,
    ) -> ManifoldHandle;

    /// Returns false for a handle that was already released
    fn release_manifold(&mut self, handle: ManifoldHandle) -> bool;

    fn manifold(&self, handle: ManifoldHandle) -> Option<&ContactManifold>;

    fn manifold_mut(&mut self, handle: ManifoldHandle) -> Option<&mut ContactManifold>;

    /// Re-point the partner side of a manifold
    fn set_partner(&mut self, handle: ManifoldHandle, partner: ManifoldPartner) -> bool {
        match self.manifold_mut(handle) {
            Some(m) => {
                m.partner = partner;
                true
            }
            None => false,
        }
    }
}

/// Arena-backed dispatcher with allocation counters
#[derive(Debug, Default)]
pub struct ManifoldPool {
    manifolds: Arena<ContactManifold>,
    allocations: u64,
    releases: u64,
}

impl ManifoldPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live manifolds
    pub fn len(&self) -> usize {
        self.manifolds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifolds.is_empty()
    }

    /// Total manifolds ever allocated
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }

    pub fn iter(&self) -> impl Iterator<Item = (ManifoldHandle, &ContactManifold)> {
        self.manifolds.iter().map(|(i, m)| (ManifoldHandle(i), m))
    }
}

impl ManifoldDispatcher for ManifoldPool {
    fn new_manifold(
        &mut self,
        body: BodyHandle,
        partner: ManifoldPartner,
        breaking_threshold: f32,
    ) -> ManifoldHandle {
        self.allocations += 1;
        let index = self
            .manifolds
            .insert(ContactManifold::new(body, partner, breaking_threshold));
        ManifoldHandle(index)
    }

    fn release_manifold(&mut self, handle: ManifoldHandle) -> bool {
        let released = self.manifolds.remove(handle.0).is_some();
        if released {
            self.releases += 1;
        }
        released
    }

    fn manifold(&self, handle: ManifoldHandle) -> Option<&ContactManifold> {
        self.manifolds.get(handle.0)
    }

    fn manifold_mut(&mut self, handle: ManifoldHandle) -> Option<&mut ContactManifold> {
        self.manifolds.get_mut(handle.0)
    }
}
