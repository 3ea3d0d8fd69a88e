use std::time::Instant;

use glam::{DVec3, Mat3, Vec3};

use super::leaf::{CompoundFlattener, Leaf, LeafVolume};
use super::narrow::{ContactStrategy, TriangleContact};
use super::provider::{RegionAabbOutput, RegionOutput, RegionQuery, TerrainHit, TerrainProvider};
use super::triangle::Triangle;
use crate::body::{ActivationState, Body, BodyHandle, BodySet, Material};
use crate::config::PhysicsConfig;
use crate::debug::{DebugCapture, DebugLine, PhysicsStats};
use crate::manifold::{ContactPoint, ManifoldDispatcher, ManifoldPartner, ManifoldPool};
use crate::math::DIsometry;
use crate::trees::flex::{step_pair, PairScratch};
use crate::trees::{CandidateQuery, TreeBatchCache, TreeCollisionPairTable, TreeDeflection};

/// Collides bodies against provider terrain and trees once per step.
///
/// Owns the manifold dispatcher, the tree batch cache and the pair table.
/// Run [`step`](Self::step) before the solver; it leaves every body with at
/// most one terrain manifold and every nearby tree with one pair manifold.
pub struct TerrainContactPipeline<D: ManifoldDispatcher = ManifoldPool> {
    config: PhysicsConfig,
    dispatcher: D,
    cache: TreeBatchCache,
    pairs: TreeCollisionPairTable,

    flattener: CompoundFlattener,
    leaves: Vec<Leaf>,
    region: RegionOutput,
    contacts: Vec<(usize, TriangleContact)>,
    handles: Vec<BodyHandle>,
    pair_scratch: PairScratch,

    frame: u32,
    stats: PhysicsStats,
    debug: DebugCapture,
}

impl TerrainContactPipeline<ManifoldPool> {
    pub fn new(config: PhysicsConfig) -> Self {
        Self::with_dispatcher(config, ManifoldPool::new())
    }
}

impl<D: ManifoldDispatcher> TerrainContactPipeline<D> {
    pub fn with_dispatcher(config: PhysicsConfig, dispatcher: D) -> Self {
        let pairs = TreeCollisionPairTable::new(config.contact_breaking_threshold, config.tree_collision_time);
        let debug = DebugCapture::new(config.debug_capture);
        Self {
            config,
            dispatcher,
            cache: TreeBatchCache::new(),
            pairs,
            flattener: CompoundFlattener::new(),
            leaves: Vec::new(),
            region: RegionOutput::default(),
            contacts: Vec::new(),
            handles: Vec::new(),
            pair_scratch: PairScratch::default(),
            frame: 0,
            stats: PhysicsStats::default(),
            debug,
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    pub fn cache(&self) -> &TreeBatchCache {
        &self.cache
    }

    /// Mutable cache access for providers that manage batches out of band.
    ///
    /// Relocations are repaired at the start of the next step.
    pub fn cache_mut(&mut self) -> &mut TreeBatchCache {
        &mut self.cache
    }

    pub fn pairs(&self) -> &TreeCollisionPairTable {
        &self.pairs
    }

    /// Statistics of the last step
    pub fn stats(&self) -> &PhysicsStats {
        &self.stats
    }

    pub fn debug(&self) -> &DebugCapture {
        &self.debug
    }

    pub fn debug_mut(&mut self) -> &mut DebugCapture {
        &mut self.debug
    }

    pub fn debug_lines(&self) -> Vec<DebugLine> {
        self.debug.lines()
    }

    /// Frames stepped so far
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Terrain contacts, then tree pairs, for one step
    pub fn step(
        &mut self,
        bodies: &mut BodySet,
        provider: &mut dyn TerrainProvider,
        deflection: &mut dyn TreeDeflection,
        dt: f32,
    ) {
        let started = Instant::now();
        self.stats.reset();
        if self.debug.is_enabled() {
            self.debug.clear();
        }

        self.collide_terrain(bodies, provider);
        self.process_tree_collisions(bodies, deflection, dt);

        self.stats.total_time_ms = elapsed_ms(started);
        self.frame = self.frame.wrapping_add(1);
    }

    /// Refresh the terrain manifold of every active dynamic body and mark the
    /// tree pairs near it
    pub fn collide_terrain(&mut self, bodies: &mut BodySet, provider: &mut dyn TerrainProvider) {
        self.repair_if_relocated();

        bodies.collect_handles(&mut self.handles);
        let handles = std::mem::take(&mut self.handles);
        let mut leaves = std::mem::take(&mut self.leaves);

        for &handle in &handles {
            let Some(body) = bodies.get_mut(handle) else {
                continue;
            };
            if !body.is_dynamic() || body.activation != ActivationState::Active || !body.shape.is_terrain_collidable() {
                continue;
            }
            self.stats.bodies_processed += 1;
            self.collide_body(handle, body, provider, &mut leaves);
        }

        self.leaves = leaves;
        self.handles = handles;
    }

    fn collide_body(
        &mut self,
        handle: BodyHandle,
        body: &mut Body,
        provider: &mut dyn TerrainProvider,
        leaves: &mut Vec<Leaf>,
    ) {
        let mut manifold = body.terrain_manifold;
        if let Some(m) = manifold {
            match self.dispatcher.manifold_mut(m) {
                Some(existing) => existing.clear(),
                None => {
                    debug_assert!(false, "body holds a released terrain manifold");
                    tracing::warn!(?handle, "dropping stale terrain manifold");
                    manifold = None;
                    body.terrain_manifold = None;
                }
            }
        }

        let body_iso = body.isometry();
        let skipped = self.flattener.flatten(&body.shape, body_iso, leaves);
        self.stats.leaves_skipped += skipped as u32;

        for leaf in leaves.iter() {
            self.stats.leaves_processed += 1;
            let volume = LeafVolume::new(leaf, &self.config);
            let query = RegionQuery {
                center: volume.center,
                basis: volume.basis,
                lod_dimension: volume.lod_dimension,
                frame: self.frame,
            };

            self.region.clear();
            let query_started = Instant::now();
            let hit = provider.query_region(&query, &mut self.region, &mut self.cache);
            self.stats.terrain_query_time_ms += elapsed_ms(query_started);
            self.repair_if_relocated();

            if !hit {
                debug_assert!(self.region.batches.is_empty(), "terrain miss reported tree batches");
                continue;
            }

            if !self.region.triangles.is_empty() {
                let triangles_started = Instant::now();
                let anchor = self.region.triangles.anchor;
                let triangles = &self.region.triangles.triangles;
                self.stats.triangles_processed += triangles.len() as u32;
                if self.debug.is_enabled() {
                    self.debug.record_triangles(anchor, triangles);
                }

                self.contacts.clear();
                ContactStrategy::for_leaf(leaf, anchor).generate(
                    triangles,
                    self.config.contact_prediction,
                    &mut self.contacts,
                );

                if !self.contacts.is_empty() {
                    let m = match manifold {
                        Some(m) => m,
                        None => {
                            let m = self.dispatcher.new_manifold(
                                handle,
                                ManifoldPartner::Terrain,
                                self.config.contact_breaking_threshold,
                            );
                            tracing::trace!(?handle, "terrain manifold allocated");
                            body.terrain_manifold = Some(m);
                            manifold = Some(m);
                            m
                        }
                    };
                    match self.dispatcher.manifold_mut(m) {
                        Some(target) => {
                            for (index, contact) in self.contacts.drain(..) {
                                target.add_point(terrain_point(
                                    &body_iso,
                                    anchor,
                                    &triangles[index],
                                    &contact,
                                    &body.material,
                                ));
                            }
                        }
                        None => {
                            tracing::warn!(
                                ?handle,
                                contacts = self.contacts.len(),
                                "terrain manifold missing, contacts dropped"
                            );
                            self.contacts.clear();
                        }
                    }
                }
                self.stats.triangle_time_ms += elapsed_ms(triangles_started);
            }

            if !self.region.batches.is_empty() {
                let candidate = CandidateQuery {
                    center: volume.center,
                    radius: volume.radius,
                };
                let debug = self.debug.is_enabled().then_some(&mut self.debug);
                let tested = self.pairs.mark_candidates(
                    handle,
                    candidate,
                    &self.region.batches,
                    &mut self.cache,
                    &mut self.dispatcher,
                    self.frame,
                    debug,
                );
                self.stats.trees_processed += tested as u32;
                // Building proxies never relocates, but the provider may have
                self.repair_if_relocated();
            }
        }

        if let Some(m) = manifold {
            let points = self.dispatcher.manifold(m).map_or(0, |m| m.len());
            if points == 0 {
                self.dispatcher.release_manifold(m);
                body.terrain_manifold = None;
                tracing::trace!(?handle, "terrain manifold released");
            } else {
                self.stats.terrain_manifolds += 1;
                self.stats.terrain_contacts += points as u32;
            }
        }
    }

    /// Sweep stale tree pairs and advance the live ones
    pub fn process_tree_collisions(&mut self, bodies: &mut BodySet, deflection: &mut dyn TreeDeflection, dt: f32) {
        let started = Instant::now();
        self.repair_if_relocated();

        let config = &self.config;
        let scratch = &mut self.pair_scratch;
        let mut debug = self.debug.is_enabled().then_some(&mut self.debug);

        let swept = self.pairs.process_step(&mut self.cache, &mut self.dispatcher, |pair, cache, dispatcher| {
            let Some(body) = bodies.get_mut(pair.body) else {
                return;
            };
            let flex = step_pair(pair, body, cache, dispatcher, &mut *deflection, &mut *scratch, config, dt);
            if let (Some(flex), Some(debug)) = (flex, debug.as_deref_mut()) {
                debug.record_flex(pair.tree_identifier, flex);
            }
        });

        self.stats.pairs_swept += swept as u32;
        self.stats.tree_pairs = self.pairs.len() as u32;
        self.stats.tree_time_ms += elapsed_ms(started);
    }

    /// Remove a body, releasing its terrain manifold and tree pairs
    pub fn remove_body(&mut self, bodies: &mut BodySet, handle: BodyHandle) -> Option<Body> {
        let mut body = bodies.remove(handle)?;
        if let Some(m) = body.terrain_manifold.take() {
            self.dispatcher.release_manifold(m);
        }
        let pairs = self.pairs.remove_body(handle, &mut self.cache, &mut self.dispatcher);
        tracing::debug!(?handle, pairs, "body removed from terrain pipeline");
        Some(body)
    }

    pub fn ray_test_terrain(
        &mut self,
        provider: &mut dyn TerrainProvider,
        origin: DVec3,
        direction: Vec3,
        range: f32,
    ) -> Option<TerrainHit> {
        let direction = direction.try_normalize()?;
        if range <= 0.0 {
            return None;
        }
        provider.ray_intersect(origin, direction, range)
    }

    /// Terrain, tree batches and islands for an arbitrary oriented box.
    ///
    /// Batches the provider loads land in the pipeline's cache; a relocation
    /// is repaired before returning.
    pub fn query_terrain_box(
        &mut self,
        provider: &mut dyn TerrainProvider,
        center: DVec3,
        basis: Mat3,
        lod_dimension: f32,
        out: &mut RegionAabbOutput,
    ) -> bool {
        out.clear();
        let query = RegionQuery {
            center,
            basis,
            lod_dimension,
            frame: self.frame,
        };
        let hit = provider.query_region_aabb(&query, out, &mut self.cache);
        self.repair_if_relocated();
        hit
    }

    pub fn elevation_above_terrain(
        &mut self,
        provider: &mut dyn TerrainProvider,
        position: DVec3,
        max_distance: f32,
    ) -> Option<TerrainHit> {
        if max_distance <= 0.0 {
            return None;
        }
        provider.elevation_above(position, max_distance)
    }

    fn repair_if_relocated(&mut self) {
        if self.cache.is_linked() {
            return;
        }
        self.pairs.repair(&mut self.cache, &mut self.dispatcher);
        self.stats.cache_relocations += 1;
    }
}

fn terrain_point(
    body_iso: &DIsometry,
    anchor: DVec3,
    triangle: &Triangle,
    contact: &TriangleContact,
    body_material: &Material,
) -> ContactPoint {
    let on_body = anchor + contact.point_on_body.as_dvec3();
    ContactPoint {
        local_point_a: body_iso.inverse_transform_point(on_body),
        local_point_b: contact.point_on_triangle,
        world_point_b: anchor + contact.point_on_triangle.as_dvec3(),
        normal_on_b: contact.normal,
        distance: contact.distance,
        material: triangle.material.combine(body_material),
        triangle: Some(triangle.index),
    }
}

fn elapsed_ms(started: Instant) -> f32 {
    started.elapsed().as_secs_f32() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{ContactManifold, ManifoldHandle};
    use crate::shape::CollisionShape;
    use crate::terrain::FlatPatchProvider;
    use crate::trees::BrakingDeflection;

    const SURFACE: f64 = 6.0e6;

    /// Allocates manifolds but never hands out mutable access to them
    #[derive(Default)]
    struct ReadOnlyPool(ManifoldPool);

    impl ManifoldDispatcher for ReadOnlyPool {
        fn new_manifold(
            &mut self,
            body: BodyHandle,
            partner: ManifoldPartner,
            breaking_threshold: f32,
        ) -> ManifoldHandle {
            self.0.new_manifold(body, partner, breaking_threshold)
        }

        fn release_manifold(&mut self, handle: ManifoldHandle) -> bool {
            self.0.release_manifold(handle)
        }

        fn manifold(&self, handle: ManifoldHandle) -> Option<&ContactManifold> {
            self.0.manifold(handle)
        }

        fn manifold_mut(&mut self, _handle: ManifoldHandle) -> Option<&mut ContactManifold> {
            None
        }
    }

    #[test]
    fn test_contacts_do_not_outlive_a_missing_manifold() {
        let mut pipeline = TerrainContactPipeline::with_dispatcher(PhysicsConfig::default(), ReadOnlyPool::default());
        let mut provider = FlatPatchProvider::new(SURFACE, 1.0);
        let mut bodies = BodySet::new();
        let handle = bodies.insert(Body::dynamic(
            CollisionShape::sphere(0.5),
            1.0,
            DVec3::new(0.3, SURFACE + 0.45, 0.3),
        ));

        pipeline.step(&mut bodies, &mut provider, &mut BrakingDeflection, 1.0 / 60.0);

        assert!(pipeline.contacts.is_empty());
        assert!(bodies.get(handle).unwrap().terrain_manifold().is_none());
        assert!(pipeline.dispatcher().0.is_empty());
        assert_eq!(pipeline.stats().terrain_contacts, 0);
    }

    #[test]
    fn test_terrain_box_reports_under_surface() {
        let mut pipeline = TerrainContactPipeline::new(PhysicsConfig::default());
        let mut provider = FlatPatchProvider::new(SURFACE, 1.0);
        provider.add_tree_cell(
            1,
            vec![crate::trees::Tree::new(4, DVec3::new(1.0, SURFACE, 0.0), 0.2, 6.0, 3.0e7)],
        );
        let mut out = RegionAabbOutput::default();

        let basis = Mat3::from_diagonal(Vec3::splat(1.5));
        let hit = pipeline.query_terrain_box(&mut provider, DVec3::new(0.0, SURFACE - 1.0, 0.0), basis, 0.5, &mut out);
        assert!(hit);
        assert!(out.under_terrain);
        assert!((out.under_contact.unwrap().y - SURFACE).abs() < 1e-9);
        assert_eq!(out.region.batches.len(), 1);
        assert!(pipeline.cache().contains(out.region.batches[0]));
        assert!(pipeline.cache().is_linked());
    }
}
