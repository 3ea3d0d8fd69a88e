use glam::{DVec3, Mat3, Vec3, Vec4};

use super::triangle::TriangleBuffer;
use crate::broadphase::IslandHandle;
use crate::math::DAabb;
use crate::trees::{BatchHandle, TreeBatchCache};

/// Oriented box a leaf needs terrain for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionQuery {
    pub center: DVec3,
    /// Box axes scaled by the half extents
    pub basis: Mat3,
    /// Smallest feature the returned triangles should resolve
    pub lod_dimension: f32,
    pub frame: u32,
}

impl RegionQuery {
    pub fn half_extents(&self) -> Vec3 {
        Vec3::new(
            self.basis.x_axis.length(),
            self.basis.y_axis.length(),
            self.basis.z_axis.length(),
        )
    }

    /// Radius of the sphere enclosing the box
    pub fn bounding_radius(&self) -> f32 {
        self.half_extents().length()
    }

    /// World-space axis-aligned half extents of the box
    pub fn aabb_half_extents(&self) -> Vec3 {
        self.basis.x_axis.abs() + self.basis.y_axis.abs() + self.basis.z_axis.abs()
    }

    /// World-space bounds of the box
    pub fn aabb(&self) -> DAabb {
        DAabb::from_oriented_box(self.center, self.basis)
    }
}

/// What a provider fills in for one region query
#[derive(Debug, Clone, Default)]
pub struct RegionOutput {
    pub triangles: TriangleBuffer,
    /// Tree batches of the cells the box overlaps
    pub batches: Vec<BatchHandle>,
}

impl RegionOutput {
    pub fn clear(&mut self) {
        self.triangles.clear();
        self.batches.clear();
    }
}

/// Region query result with the box's relation to the surface and the
/// islands it overlaps
#[derive(Debug, Clone, Default)]
pub struct RegionAabbOutput {
    pub region: RegionOutput,
    /// The box centre is below the terrain surface
    pub under_terrain: bool,
    /// Surface point above the centre, set with `under_terrain`
    pub under_contact: Option<DVec3>,
    /// Surface normal at `under_contact`
    pub under_normal: Vec3,
    pub broadphases: Vec<IslandHandle>,
}

impl RegionAabbOutput {
    pub fn clear(&mut self) {
        self.region.clear();
        self.under_terrain = false;
        self.under_contact = None;
        self.under_normal = Vec3::ZERO;
        self.broadphases.clear();
    }
}

/// Ray or elevation hit on the terrain surface
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TerrainHit {
    pub point: DVec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// Source of terrain geometry, trees and object islands.
///
/// Only [`query_region`](TerrainProvider::query_region) is required; the rest
/// default to "nothing here".
pub trait TerrainProvider {
    /// Fill `out` with the triangles and tree batches intersecting the box.
    ///
    /// Tree batches must be inserted into `cache`, which may relocate it.
    /// Returns `false` when the box misses the terrain entirely, in which case
    /// no batches may be reported either.
    fn query_region(&mut self, query: &RegionQuery, out: &mut RegionOutput, cache: &mut TreeBatchCache) -> bool;

    /// [`query_region`](TerrainProvider::query_region) plus where the box
    /// sits relative to the surface and which islands it overlaps.
    ///
    /// The default answers the region and island parts and never reports the
    /// box as under the terrain.
    fn query_region_aabb(
        &mut self,
        query: &RegionQuery,
        out: &mut RegionAabbOutput,
        cache: &mut TreeBatchCache,
    ) -> bool {
        let hit = self.query_region(query, &mut out.region, cache);
        self.broadphases_in_box(query.center, query.basis, query.frame, &mut out.broadphases);
        hit
    }

    /// Cast a ray against the terrain surface
    fn ray_intersect(&mut self, _origin: DVec3, _direction: Vec3, _range: f32) -> Option<TerrainHit> {
        None
    }

    /// Surface point below `position`, measured along the local up
    fn elevation_above(&mut self, _position: DVec3, _max_distance: f32) -> Option<TerrainHit> {
        None
    }

    /// Islands whose region overlaps the sphere
    fn broadphases_in_radius(&mut self, _center: DVec3, _radius: f64, _frame: u32, _out: &mut Vec<IslandHandle>) {}

    /// Islands whose region is inside the frustum
    fn broadphases_in_frustum(&mut self, _origin: DVec3, _planes: &[Vec4], _frame: u32, _out: &mut Vec<IslandHandle>) {}

    /// Islands whose region overlaps an oriented box
    ///
    /// `basis` holds the box axes scaled by the half extents.
    fn broadphases_in_box(&mut self, _center: DVec3, _basis: Mat3, _frame: u32, _out: &mut Vec<IslandHandle>) {}

    /// Islands whose region a ray crosses within `range`
    fn broadphases_on_ray(&mut self, _origin: DVec3, _direction: Vec3, _range: f32, _out: &mut Vec<IslandHandle>) {}
}
