//! Flat test terrain
//!
//! An infinite horizontal plane at `y = surface`, solid below, tessellated on
//! demand into square tiles, with optional tree cells and islands. Good
//! enough for tests and benchmarks; real providers stream curved terrain.

use glam::{DVec3, Mat3, Vec3, Vec4};

use super::provider::{RegionAabbOutput, RegionOutput, RegionQuery, TerrainHit, TerrainProvider};
use crate::broadphase::IslandHandle;
use crate::math::DAabb;
use crate::spatial::{frustum_accepts, FrustumPolicy};
use crate::trees::{BatchHandle, CellKey, Tree, TreeBatch, TreeBatchCache};

/// Tiles per axis a single query may produce
const MAX_TILES_PER_AXIS: i64 = 64;

#[derive(Debug)]
struct TreeCell {
    key: CellKey,
    bounds: DAabb,
    trees: Vec<Tree>,
    batch: Option<BatchHandle>,
}

#[derive(Debug)]
pub struct FlatPatchProvider {
    surface: f64,
    tile: f64,
    cells: Vec<TreeCell>,
    islands: Vec<(IslandHandle, DAabb)>,
    queries: usize,
}

impl FlatPatchProvider {
    /// # Arguments
    /// * `surface` - Height of the plane
    /// * `tile` - Edge length of the square tiles triangles are cut from
    pub fn new(surface: f64, tile: f64) -> Self {
        debug_assert!(tile > 0.0, "tile size must be positive");
        Self {
            surface,
            tile,
            cells: Vec::new(),
            islands: Vec::new(),
            queries: 0,
        }
    }

    pub fn surface(&self) -> f64 {
        self.surface
    }

    /// Number of region queries answered
    pub fn queries(&self) -> usize {
        self.queries
    }

    /// Add a tree cell; its batch is inserted into the cache on first query.
    ///
    /// Returns the cell index.
    pub fn add_tree_cell(&mut self, mesh_id: u32, trees: Vec<Tree>) -> usize {
        let bounds = DAabb::from_points(trees.iter().flat_map(|t| {
            let r = DVec3::splat(t.radius as f64);
            [t.pos - r, t.top() + r]
        }))
        .unwrap_or(DAabb::new(DVec3::ZERO, DVec3::ZERO));

        self.cells.push(TreeCell {
            key: CellKey {
                mesh_id,
                version: 0,
                index_in_mesh: self.cells.len() as u32,
            },
            bounds,
            trees,
            batch: None,
        });
        self.cells.len() - 1
    }

    /// Batch currently loaded for a cell
    pub fn cell_batch(&self, cell: usize) -> Option<BatchHandle> {
        self.cells.get(cell).and_then(|c| c.batch)
    }

    /// Evict a cell's batch; the next query touching it loads a new version
    pub fn unload_cell(&mut self, cell: usize, cache: &mut TreeBatchCache) -> bool {
        let Some(cell) = self.cells.get_mut(cell) else {
            return false;
        };
        let Some(batch) = cell.batch.take() else {
            return false;
        };
        cache.remove(batch);
        cell.key.version += 1;
        true
    }

    pub fn add_island(&mut self, handle: IslandHandle, bounds: DAabb) {
        self.islands.push((handle, bounds));
    }

    fn load_cell(cell: &mut TreeCell, cache: &mut TreeBatchCache) -> Option<BatchHandle> {
        if let Some(batch) = cell.batch.filter(|b| cache.contains(*b)) {
            return Some(batch);
        }
        match TreeBatch::with_trees(cell.key, cell.trees.iter().cloned()) {
            Ok(batch) => {
                let handle = cache.insert(batch).handle;
                cell.batch = Some(handle);
                Some(handle)
            }
            Err(err) => {
                tracing::warn!(%err, "tree cell does not fit a batch");
                None
            }
        }
    }

    fn tessellate(&self, aabb: &DAabb, out: &mut RegionOutput) {
        let tile = self.tile;
        let x0 = (aabb.min.x / tile).floor() as i64;
        let z0 = (aabb.min.z / tile).floor() as i64;
        let x1 = ((aabb.max.x / tile).ceil() as i64).min(x0 + MAX_TILES_PER_AXIS);
        let z1 = ((aabb.max.z / tile).ceil() as i64).min(z0 + MAX_TILES_PER_AXIS);

        out.triangles.anchor = DVec3::new(aabb.center().x, self.surface, aabb.center().z);
        let y = self.surface;
        let mut index = 0;
        for xi in x0..x1 {
            for zi in z0..z1 {
                let (xa, xb) = (xi as f64 * tile, (xi + 1) as f64 * tile);
                let (za, zb) = (zi as f64 * tile, (zi + 1) as f64 * tile);
                out.triangles
                    .push_world(DVec3::new(xa, y, za), DVec3::new(xa, y, zb), DVec3::new(xb, y, za))
                    .index = index;
                out.triangles
                    .push_world(DVec3::new(xb, y, za), DVec3::new(xa, y, zb), DVec3::new(xb, y, zb))
                    .index = index + 1;
                index += 2;
            }
        }
    }
}

impl TerrainProvider for FlatPatchProvider {
    fn query_region(&mut self, query: &RegionQuery, out: &mut RegionOutput, cache: &mut TreeBatchCache) -> bool {
        self.queries += 1;
        let aabb = query.aabb();

        if aabb.min.y <= self.surface {
            self.tessellate(&aabb, out);
        }

        for cell in &mut self.cells {
            if cell.bounds.intersects(&aabb) {
                if let Some(batch) = Self::load_cell(cell, cache) {
                    out.batches.push(batch);
                }
            }
        }

        !out.triangles.is_empty() || !out.batches.is_empty()
    }

    fn query_region_aabb(
        &mut self,
        query: &RegionQuery,
        out: &mut RegionAabbOutput,
        cache: &mut TreeBatchCache,
    ) -> bool {
        let hit = self.query_region(query, &mut out.region, cache);

        out.under_terrain = query.center.y < self.surface;
        if out.under_terrain {
            out.under_contact = Some(DVec3::new(query.center.x, self.surface, query.center.z));
            out.under_normal = Vec3::Y;
        }
        self.broadphases_in_box(query.center, query.basis, query.frame, &mut out.broadphases);
        hit
    }

    fn ray_intersect(&mut self, origin: DVec3, direction: Vec3, range: f32) -> Option<TerrainHit> {
        if direction.y.abs() < f32::EPSILON {
            return None;
        }
        let t = (self.surface - origin.y) / direction.y as f64;
        if t < 0.0 || t > range as f64 {
            return None;
        }
        Some(TerrainHit {
            point: origin + direction.as_dvec3() * t,
            normal: Vec3::Y,
            distance: t as f32,
        })
    }

    fn elevation_above(&mut self, position: DVec3, max_distance: f32) -> Option<TerrainHit> {
        let height = position.y - self.surface;
        if height < 0.0 || height > max_distance as f64 {
            return None;
        }
        Some(TerrainHit {
            point: DVec3::new(position.x, self.surface, position.z),
            normal: Vec3::Y,
            distance: height as f32,
        })
    }

    fn broadphases_in_radius(&mut self, center: DVec3, radius: f64, _frame: u32, out: &mut Vec<IslandHandle>) {
        out.extend(
            self.islands
                .iter()
                .filter(|(_, bounds)| bounds.distance_squared_to_point(center) <= radius * radius)
                .map(|(handle, _)| *handle),
        );
    }

    fn broadphases_in_frustum(&mut self, origin: DVec3, planes: &[Vec4], _frame: u32, out: &mut Vec<IslandHandle>) {
        out.extend(
            self.islands
                .iter()
                .filter(|(_, bounds)| frustum_accepts(bounds, origin, planes, FrustumPolicy::Inclusive))
                .map(|(handle, _)| *handle),
        );
    }

    fn broadphases_in_box(&mut self, center: DVec3, basis: Mat3, _frame: u32, out: &mut Vec<IslandHandle>) {
        let aabb = DAabb::from_oriented_box(center, basis);
        out.extend(
            self.islands
                .iter()
                .filter(|(_, bounds)| bounds.intersects(&aabb))
                .map(|(handle, _)| *handle),
        );
    }

    fn broadphases_on_ray(&mut self, origin: DVec3, direction: Vec3, range: f32, out: &mut Vec<IslandHandle>) {
        let Some(direction) = direction.as_dvec3().try_normalize() else {
            return;
        };
        out.extend(
            self.islands
                .iter()
                .filter(|(_, bounds)| bounds.ray_entry(origin, direction, range as f64).is_some())
                .map(|(handle, _)| *handle),
        );
    }
}
