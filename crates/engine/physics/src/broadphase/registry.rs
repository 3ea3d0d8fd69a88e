use glam::{DVec3, Mat3, Vec3, Vec4};
use rapier3d::data::Arena;
use rapier3d::geometry::InteractionGroups;

use super::island::{ExternalBroadphase, IslandEntry, ObjectKind};
use super::sensor::SensorTable;
use super::{IslandHandle, ObjectId};
use crate::config::PhysicsConfig;
use crate::error::{PhysicsError, Result};
use crate::math::DAabb;
use crate::spatial::{self, AabbTree, CollisionIndex, FrustumPolicy, ProxyId};
use crate::terrain::TerrainProvider;

/// What a [`BroadphaseRegistry::rebuild`] changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub updated: usize,
    pub removed: usize,
    pub overlaps_added: usize,
    pub overlaps_removed: usize,
}

/// Owns every terrain island and the sensor table their overlaps feed
#[derive(Debug)]
pub struct BroadphaseRegistry {
    islands: Arena<ExternalBroadphase>,
    sensors: SensorTable,
    island_capacity: usize,
    margin: f64,

    islands_scratch: Vec<IslandHandle>,
    objects_scratch: Vec<ObjectId>,
}

impl BroadphaseRegistry {
    /// # Arguments
    /// * `island_capacity` - Proxy capacity of each island
    /// * `margin` - Fat margin of island trees
    pub fn new(island_capacity: usize, margin: f64) -> Self {
        Self {
            islands: Arena::new(),
            sensors: SensorTable::new(),
            island_capacity,
            margin,
            islands_scratch: Vec::new(),
            objects_scratch: Vec::new(),
        }
    }

    pub fn from_config(config: &PhysicsConfig) -> Self {
        Self::new(config.island_capacity, config.fat_margin)
    }

    pub fn len(&self) -> usize {
        self.islands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.islands.is_empty()
    }

    pub fn get(&self, handle: IslandHandle) -> Option<&ExternalBroadphase> {
        self.islands.get(handle.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (IslandHandle, &ExternalBroadphase)> {
        self.islands.iter().map(|(i, island)| (IslandHandle(i), island))
    }

    pub fn sensors(&self) -> &SensorTable {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut SensorTable {
        &mut self.sensors
    }

    /// Allocate an island covering `[min, max]`
    pub fn create(&mut self, min: DVec3, max: DVec3) -> IslandHandle {
        let island = ExternalBroadphase::new(DAabb::new(min, max), self.margin, self.island_capacity);
        let handle = IslandHandle(self.islands.insert(island));
        tracing::debug!(?handle, ?min, ?max, "broadphase island created");
        handle
    }

    /// Free an island.
    ///
    /// Sensor pairs of its objects go with it. Returns the procedural objects
    /// the caller now has to destroy.
    pub fn delete(&mut self, handle: IslandHandle) -> Option<Vec<ObjectId>> {
        let island = self.islands.remove(handle.0)?;
        for object in island.entries.keys() {
            self.sensors.remove_all_for(*object);
        }
        tracing::debug!(
            ?handle,
            objects = island.entries.len(),
            procedural = island.procedural.len(),
            "broadphase island deleted"
        );
        Some(island.procedural)
    }

    pub fn add_object(
        &mut self,
        handle: IslandHandle,
        object: ObjectId,
        bounds: DAabb,
        groups: InteractionGroups,
    ) -> Result<ProxyId> {
        self.insert(handle, object, bounds, groups, ObjectKind::Regular)
    }

    /// Add an object the island owns; [`delete`](Self::delete) hands it back
    pub fn add_procedural_object(
        &mut self,
        handle: IslandHandle,
        object: ObjectId,
        bounds: DAabb,
        groups: InteractionGroups,
    ) -> Result<ProxyId> {
        self.insert(handle, object, bounds, groups, ObjectKind::Procedural)
    }

    pub fn add_sensor_object(
        &mut self,
        handle: IslandHandle,
        object: ObjectId,
        bounds: DAabb,
        groups: InteractionGroups,
    ) -> Result<ProxyId> {
        self.insert(handle, object, bounds, groups, ObjectKind::Sensor)
    }

    fn insert(
        &mut self,
        handle: IslandHandle,
        object: ObjectId,
        bounds: DAabb,
        groups: InteractionGroups,
        kind: ObjectKind,
    ) -> Result<ProxyId> {
        let island = self.islands.get_mut(handle.0).ok_or(PhysicsError::UnknownIsland)?;
        if island.entries.contains_key(&object) {
            return Err(PhysicsError::DuplicateObject(object));
        }
        let proxy = island.tree.insert(object, bounds).ok_or(PhysicsError::IslandFull {
            capacity: self.island_capacity,
        })?;

        island.revision = island.revision.wrapping_add(1);
        island.entries.insert(
            object,
            IslandEntry {
                object,
                groups,
                kind,
                revision: island.revision,
                proxy,
            },
        );
        if kind == ObjectKind::Procedural {
            island.procedural.push(object);
        }
        island.dirty = true;
        Ok(proxy)
    }

    /// Remove an object and every overlap and sensor pair it was part of
    pub fn remove_object(&mut self, handle: IslandHandle, object: ObjectId) -> bool {
        let Some(island) = self.islands.get_mut(handle.0) else {
            return false;
        };
        let Some(entry) = island.entries.remove(&object) else {
            return false;
        };
        island.tree.remove(entry.proxy);
        island.procedural.retain(|o| *o != object);
        island.overlaps.retain(|(a, b)| *a != object && *b != object);
        self.sensors.remove_all_for(object);
        true
    }

    /// Flag an island for [`rebuild`](Self::rebuild) after terrain regeneration
    pub fn mark_dirty(&mut self, handle: IslandHandle) -> bool {
        match self.islands.get_mut(handle.0) {
            Some(island) => {
                island.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Refresh proxies from `bounds_of` and recompute overlaps.
    ///
    /// Objects `bounds_of` no longer knows are removed. New overlaps with a
    /// sensor add sensor pairs, vanished ones remove them.
    pub fn rebuild(
        &mut self,
        handle: IslandHandle,
        mut bounds_of: impl FnMut(ObjectId) -> Option<DAabb>,
    ) -> Result<RebuildReport> {
        let island = self.islands.get_mut(handle.0).ok_or(PhysicsError::UnknownIsland)?;
        let mut report = RebuildReport::default();

        let mut gone = Vec::new();
        for entry in island.entries.values() {
            match bounds_of(entry.object) {
                Some(bounds) => {
                    island.tree.update(entry.proxy, bounds);
                    report.updated += 1;
                }
                None => gone.push(entry.object),
            }
        }
        for object in &gone {
            if let Some(entry) = island.entries.remove(object) {
                island.tree.remove(entry.proxy);
            }
            island.procedural.retain(|o| o != object);
            self.sensors.remove_all_for(*object);
        }
        report.removed = gone.len();

        let overlaps = island.compute_overlaps(&mut self.objects_scratch);
        for &(a, b) in island.overlaps.difference(&overlaps) {
            report.overlaps_removed += 1;
            for_sensor_pair(island, a, b, |sensor, trigger| {
                self.sensors.remove(sensor, trigger);
            });
        }
        for &(a, b) in overlaps.difference(&island.overlaps) {
            report.overlaps_added += 1;
            for_sensor_pair(island, a, b, |sensor, trigger| {
                self.sensors.add(sensor, trigger);
            });
        }
        island.overlaps = overlaps;
        island.dirty = false;

        tracing::debug!(?handle, ?report, "broadphase island rebuilt");
        Ok(report)
    }

    /// Objects inserted after `revision`, in object order
    pub fn objects_since(&self, handle: IslandHandle, revision: u32, out: &mut Vec<ObjectId>) -> bool {
        let Some(island) = self.islands.get(handle.0) else {
            return false;
        };
        out.extend(
            island
                .entries
                .values()
                .filter(|e| e.revision > revision)
                .map(|e| e.object),
        );
        true
    }

    /// Tight bounds of every proxy in an island
    pub fn handle_aabbs(&self, handle: IslandHandle, out: &mut Vec<DAabb>) -> bool {
        let Some(island) = self.islands.get(handle.0) else {
            return false;
        };
        out.extend(island.tree.leaves().map(|(_, leaf)| leaf.bounds));
        true
    }

    /// Reset per-frame usage flags
    pub fn begin_frame(&mut self) {
        for (_, island) in self.islands.iter_mut() {
            island.used_this_frame = false;
        }
    }

    /// Snapshot the sensor table for this frame
    pub fn consolidate(&mut self) {
        self.sensors.consolidate();
    }

    pub fn triggered_sensors(&self) -> &[super::SensorPair] {
        self.sensors.triggered_sensors()
    }

    /// Objects in a sphere across the global index and the islands the
    /// provider reports for it
    pub fn query_sphere(
        &mut self,
        index: &CollisionIndex<ObjectId>,
        provider: &mut dyn TerrainProvider,
        center: DVec3,
        radius: f64,
        frame: u32,
        out: &mut Vec<ObjectId>,
    ) {
        self.islands_scratch.clear();
        provider.broadphases_in_radius(center, radius, frame, &mut self.islands_scratch);
        let roots = self.roots(index);
        spatial::query_sphere(&roots, center, radius, out);
    }

    /// Objects inside a frustum across the global index and the provider's
    /// islands for it
    #[allow(clippy::too_many_arguments)]
    pub fn query_frustum(
        &mut self,
        index: &CollisionIndex<ObjectId>,
        provider: &mut dyn TerrainProvider,
        origin: DVec3,
        planes: &[Vec4],
        policy: FrustumPolicy,
        frame: u32,
        out: &mut Vec<ObjectId>,
    ) {
        self.islands_scratch.clear();
        provider.broadphases_in_frustum(origin, planes, frame, &mut self.islands_scratch);
        let roots = self.roots(index);
        spatial::query_frustum(&roots, origin, planes, policy, out);
    }

    /// Objects overlapping an oriented box across the global index and the
    /// provider's islands for it
    pub fn query_box(
        &mut self,
        index: &CollisionIndex<ObjectId>,
        provider: &mut dyn TerrainProvider,
        center: DVec3,
        basis: Mat3,
        frame: u32,
        out: &mut Vec<ObjectId>,
    ) {
        self.islands_scratch.clear();
        provider.broadphases_in_box(center, basis, frame, &mut self.islands_scratch);
        let aabb = DAabb::from_oriented_box(center, basis);
        let roots = self.roots(index);
        spatial::query_aabb(&roots, &aabb, out);
    }

    /// Objects on the segment `from`-`to` in the global index and, when
    /// given, one island. Hits are appended nearest first with their distance
    /// from `from`.
    ///
    /// Returns false if `island` was deleted.
    pub fn ray_test(
        &mut self,
        index: &CollisionIndex<ObjectId>,
        island: Option<IslandHandle>,
        from: DVec3,
        to: DVec3,
        out: &mut Vec<(ObjectId, f64)>,
    ) -> bool {
        self.islands_scratch.clear();
        if let Some(handle) = island {
            if !self.islands.contains(handle.0) {
                return false;
            }
            self.islands_scratch.push(handle);
        }
        let Some(direction) = (to - from).try_normalize() else {
            return true;
        };
        let range = from.distance(to);
        self.cast(index, from, direction, range, out);
        true
    }

    /// Objects along a ray across the global index and the islands the
    /// provider reports on it, nearest first
    pub fn cast_ray(
        &mut self,
        index: &CollisionIndex<ObjectId>,
        provider: &mut dyn TerrainProvider,
        origin: DVec3,
        direction: Vec3,
        range: f32,
        out: &mut Vec<(ObjectId, f64)>,
    ) {
        let Some(direction) = direction.try_normalize() else {
            return;
        };
        self.islands_scratch.clear();
        provider.broadphases_on_ray(origin, direction, range, &mut self.islands_scratch);
        self.cast(index, origin, direction.as_dvec3(), range as f64, out);
    }

    fn cast(
        &mut self,
        index: &CollisionIndex<ObjectId>,
        origin: DVec3,
        direction: DVec3,
        range: f64,
        out: &mut Vec<(ObjectId, f64)>,
    ) {
        let start = out.len();
        let roots = self.roots(index);
        spatial::query_ray(&roots, origin, direction, range, out);
        out[start..].sort_by(|a, b| a.1.total_cmp(&b.1));
    }

    /// First object in a sphere other than `exclude`
    pub fn first_in_sphere(
        &mut self,
        index: &CollisionIndex<ObjectId>,
        provider: &mut dyn TerrainProvider,
        center: DVec3,
        radius: f64,
        frame: u32,
        exclude: Option<ObjectId>,
    ) -> Option<ObjectId> {
        self.islands_scratch.clear();
        provider.broadphases_in_radius(center, radius, frame, &mut self.islands_scratch);
        let roots = self.roots(index);
        spatial::first_in_sphere(&roots, center, radius, |object| Some(*object) != exclude)
    }

    /// Global roots followed by the scratch islands, marking those used
    fn roots<'a>(&'a mut self, index: &'a CollisionIndex<ObjectId>) -> Vec<&'a AabbTree<ObjectId>> {
        for handle in &self.islands_scratch {
            match self.islands.get_mut(handle.0) {
                Some(island) => {
                    island.used_this_frame = true;
                    if island.dirty {
                        tracing::trace!(?handle, "querying dirty broadphase island");
                    }
                }
                None => tracing::warn!(?handle, "provider reported a deleted broadphase island"),
            }
        }

        let islands = &self.islands;
        let mut roots: Vec<&AabbTree<ObjectId>> = index.roots().to_vec();
        roots.extend(
            self.islands_scratch
                .iter()
                .filter_map(|handle| islands.get(handle.0))
                .map(|island| &island.tree),
        );
        roots
    }
}

fn for_sensor_pair(island: &ExternalBroadphase, a: ObjectId, b: ObjectId, mut f: impl FnMut(ObjectId, ObjectId)) {
    let is_sensor = |o: ObjectId| island.entries.get(&o).is_some_and(|e| e.kind == ObjectKind::Sensor);
    if is_sensor(a) {
        f(a, b);
    }
    if is_sensor(b) {
        f(b, a);
    }
}
