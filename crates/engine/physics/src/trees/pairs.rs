//! Body/tree collision pairs
//!
//! Pairs follow a mark-and-sweep lifecycle across steps:
//!
//! 1. while bodies query terrain, every tree near a body is a candidate and
//!    its pair is found or created and marked `reused`;
//! 2. once per step [`TreeCollisionPairTable::process_step`] sweeps unmarked
//!    pairs, runs the survivors and clears their marks for the next step.
//!
//! A pair is keyed by body and tree identifier, so a tree keeps its pair when
//! its cell is reloaded into a different batch.

use glam::{DVec3, Vec3};

use super::cache::{BatchHandle, TreeBatchCache, TreeRef};
use super::flex::TreeCollisionContext;
use crate::body::BodyHandle;
use crate::debug::DebugCapture;
use crate::manifold::{ManifoldDispatcher, ManifoldHandle, ManifoldPartner};
use crate::math::distance_squared_point_segment;

/// Sphere a body leaf is tested against tree trunks with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateQuery {
    pub center: DVec3,
    pub radius: f32,
}

#[derive(Debug, Clone)]
pub struct TreeCollisionPair {
    pub body: BodyHandle,
    pub tree: TreeRef,
    pub tree_identifier: u16,
    pub manifold: ManifoldHandle,
    pub context: TreeCollisionContext,
    pub(crate) reused: bool,
}

impl TreeCollisionPair {
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.reused
    }
}

#[derive(Debug)]
pub struct TreeCollisionPairTable {
    pairs: Vec<TreeCollisionPair>,
    breaking_threshold: f32,
    collision_time: f32,
}

impl TreeCollisionPairTable {
    /// # Arguments
    /// * `breaking_threshold` - Contact-breaking threshold of pair manifolds
    /// * `collision_time` - Custom handling duration of a yielding tree
    pub fn new(breaking_threshold: f32, collision_time: f32) -> Self {
        Self {
            pairs: Vec::new(),
            breaking_threshold,
            collision_time,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TreeCollisionPair> {
        self.pairs.iter()
    }

    pub fn find(&self, body: BodyHandle, tree_identifier: u16) -> Option<&TreeCollisionPair> {
        self.pairs
            .iter()
            .find(|p| p.body == body && p.tree_identifier == tree_identifier)
    }

    /// Test every tree of `batches` against a body leaf and mark the pairs of
    /// those in reach.
    ///
    /// Builds batch proxies on first use. Broken trees are skipped.
    ///
    /// # Returns
    /// Number of trees tested.
    #[allow(clippy::too_many_arguments)]
    pub fn mark_candidates<D: ManifoldDispatcher + ?Sized>(
        &mut self,
        body: BodyHandle,
        query: CandidateQuery,
        batches: &[BatchHandle],
        cache: &mut TreeBatchCache,
        dispatcher: &mut D,
        frame: u32,
        mut debug: Option<&mut DebugCapture>,
    ) -> usize {
        let epoch = cache.epoch();
        let mut tested = 0;

        for &handle in batches {
            let Some(batch) = cache.get_or_build(handle, frame) else {
                debug_assert!(false, "terrain provider returned an evicted tree batch");
                tracing::warn!(?handle, "skipping evicted tree batch");
                continue;
            };

            for (index, tree) in batch.trees().iter().enumerate() {
                tested += 1;
                if tree.is_broken() {
                    continue;
                }
                if let Some(debug) = debug.as_deref_mut() {
                    debug.record_tree(tree);
                }

                // f32 is enough relative to the trunk base
                let rel = (query.center - tree.pos).as_vec3();
                let trunk = tree.axis().as_vec3() * tree.height;
                let reach = tree.radius + query.radius;
                if distance_squared_point_segment(rel, Vec3::ZERO, trunk) > reach * reach {
                    continue;
                }

                let tree_ref = TreeRef::new(handle, index);
                self.mark(body, tree_ref, tree.identifier, epoch, dispatcher);
            }
        }

        tested
    }

    fn mark<D: ManifoldDispatcher + ?Sized>(
        &mut self,
        body: BodyHandle,
        tree: TreeRef,
        tree_identifier: u16,
        epoch: u64,
        dispatcher: &mut D,
    ) {
        if let Some(pair) = self
            .pairs
            .iter_mut()
            .find(|p| p.body == body && p.tree_identifier == tree_identifier)
        {
            if pair.tree != tree {
                // Same tree, its cell was reloaded into another batch
                pair.tree = tree;
                dispatcher.set_partner(pair.manifold, ManifoldPartner::Tree { tree, epoch });
            }
            pair.reused = true;
            return;
        }

        let manifold = dispatcher.new_manifold(
            body,
            ManifoldPartner::Tree { tree, epoch },
            self.breaking_threshold,
        );
        tracing::trace!(?body, tree = tree_identifier, "tree pair created");
        self.pairs.push(TreeCollisionPair {
            body,
            tree,
            tree_identifier,
            manifold,
            context: TreeCollisionContext::new(tree_identifier, self.collision_time),
            reused: true,
        });
    }

    /// Remove every pair not marked since the last step.
    ///
    /// Pairs whose tree has been evicted go too. Returns the number removed.
    pub fn sweep<D: ManifoldDispatcher + ?Sized>(
        &mut self,
        cache: &mut TreeBatchCache,
        dispatcher: &mut D,
    ) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|pair| {
            if pair.reused && cache.tree(pair.tree).is_some() {
                return true;
            }
            deactivate(pair, cache, dispatcher);
            false
        });
        before - self.pairs.len()
    }

    /// One step of the pair lifecycle: sweep, process survivors, clear marks.
    ///
    /// # Returns
    /// Number of pairs swept.
    pub fn process_step<D, F>(&mut self, cache: &mut TreeBatchCache, dispatcher: &mut D, mut process: F) -> usize
    where
        D: ManifoldDispatcher + ?Sized,
        F: FnMut(&mut TreeCollisionPair, &mut TreeBatchCache, &mut D),
    {
        let removed = self.sweep(cache, dispatcher);
        for pair in &mut self.pairs {
            process(pair, cache, dispatcher);
            pair.reused = false;
        }
        removed
    }

    /// Re-link proxies and manifold partners after the cache moved
    pub fn repair<D: ManifoldDispatcher + ?Sized>(&self, cache: &mut TreeBatchCache, dispatcher: &mut D) {
        let batches = cache.relink_proxies();
        let epoch = cache.epoch();
        for pair in &self.pairs {
            let partner = ManifoldPartner::Tree {
                tree: pair.tree,
                epoch,
            };
            if !dispatcher.set_partner(pair.manifold, partner) {
                tracing::warn!(tree = pair.tree_identifier, "tree pair lost its manifold");
            }
        }
        tracing::debug!(
            epoch,
            batches,
            pairs = self.pairs.len(),
            "re-linked tree batches after cache relocation"
        );
    }

    /// Drop every pair of a body
    pub fn remove_body<D: ManifoldDispatcher + ?Sized>(
        &mut self,
        body: BodyHandle,
        cache: &mut TreeBatchCache,
        dispatcher: &mut D,
    ) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|pair| {
            if pair.body != body {
                return true;
            }
            deactivate(pair, cache, dispatcher);
            false
        });
        before - self.pairs.len()
    }
}

fn deactivate<D: ManifoldDispatcher + ?Sized>(
    pair: &TreeCollisionPair,
    cache: &mut TreeBatchCache,
    dispatcher: &mut D,
) {
    dispatcher.release_manifold(pair.manifold);
    if let Some(tree) = cache.tree_mut(pair.tree) {
        tree.break_state.clear();
    }
    tracing::trace!(body = ?pair.body, tree = pair.tree_identifier, "tree pair removed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::ManifoldPool;
    use crate::trees::batch::{CellKey, TreeBatch};
    use crate::trees::tree::Tree;
    use rapier3d::data::Index;

    const SURFACE: f64 = 6.0e6;

    fn body(i: u32) -> BodyHandle {
        BodyHandle(Index::from_raw_parts(i, 0))
    }

    fn cell(version: u32) -> CellKey {
        CellKey {
            mesh_id: 3,
            version,
            index_in_mesh: 0,
        }
    }

    fn forest(version: u32) -> TreeBatch {
        let trees = (0..3u16).map(|i| {
            Tree::new(
                100 + i,
                DVec3::new(i as f64 * 10.0, SURFACE, 0.0),
                0.3,
                8.0,
                3.0e7,
            )
        });
        TreeBatch::with_trees(cell(version), trees).unwrap()
    }

    fn near_first_tree() -> CandidateQuery {
        CandidateQuery {
            center: DVec3::new(0.5, SURFACE + 1.0, 0.0),
            radius: 0.5,
        }
    }

    #[test]
    fn test_candidate_creates_single_pair() {
        let mut cache = TreeBatchCache::new();
        let mut pool = ManifoldPool::new();
        let mut table = TreeCollisionPairTable::new(0.02, 0.15);
        let batch = cache.insert(forest(0)).handle;

        for _ in 0..5 {
            let tested = table.mark_candidates(body(0), near_first_tree(), &[batch], &mut cache, &mut pool, 0, None);
            assert_eq!(tested, 3);
        }

        assert_eq!(table.len(), 1);
        assert_eq!(pool.len(), 1);
        let pair = table.find(body(0), 100).unwrap();
        assert!(pair.is_marked());
        assert!(cache.get(batch).unwrap().is_built());
    }

    #[test]
    fn test_unmarked_pair_is_swept() {
        let mut cache = TreeBatchCache::new();
        let mut pool = ManifoldPool::new();
        let mut table = TreeCollisionPairTable::new(0.02, 0.15);
        let batch = cache.insert(forest(0)).handle;

        table.mark_candidates(body(0), near_first_tree(), &[batch], &mut cache, &mut pool, 0, None);
        let mut processed = 0;
        assert_eq!(table.process_step(&mut cache, &mut pool, |_, _, _| processed += 1), 0);
        assert_eq!(processed, 1);
        assert!(!table.iter().next().unwrap().is_marked());

        // Nothing marked this step
        assert_eq!(table.process_step(&mut cache, &mut pool, |_, _, _| {}), 1);
        assert!(table.is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_sweep_clears_transient_state_but_not_broken() {
        let mut cache = TreeBatchCache::new();
        let mut pool = ManifoldPool::new();
        let mut table = TreeCollisionPairTable::new(0.02, 0.15);
        let batch = cache.insert(forest(0)).handle;

        let query = CandidateQuery {
            center: DVec3::new(5.0, SURFACE + 1.0, 0.0),
            radius: 6.0,
        };
        table.mark_candidates(body(0), query, &[batch], &mut cache, &mut pool, 0, None);
        assert_eq!(table.len(), 2);

        cache.tree_mut(TreeRef::new(batch, 0)).unwrap().break_state.set_bend(0.5, 0.0);
        cache.tree_mut(TreeRef::new(batch, 1)).unwrap().break_state.set_broken();

        table.process_step(&mut cache, &mut pool, |_, _, _| {});
        table.process_step(&mut cache, &mut pool, |_, _, _| {});
        assert!(table.is_empty());

        assert_eq!(cache.tree(TreeRef::new(batch, 0)).unwrap().break_state.bytes(), [0, 0]);
        assert!(cache.tree(TreeRef::new(batch, 1)).unwrap().is_broken());
    }

    #[test]
    fn test_broken_tree_is_not_a_candidate() {
        let mut cache = TreeBatchCache::new();
        let mut pool = ManifoldPool::new();
        let mut table = TreeCollisionPairTable::new(0.02, 0.15);
        let batch = cache.insert(forest(0)).handle;
        cache.tree_mut(TreeRef::new(batch, 0)).unwrap().break_state.set_broken();

        table.mark_candidates(body(0), near_first_tree(), &[batch], &mut cache, &mut pool, 0, None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_broken_tree_is_not_drawn() {
        let mut cache = TreeBatchCache::new();
        let mut pool = ManifoldPool::new();
        let mut table = TreeCollisionPairTable::new(0.02, 0.15);
        let mut debug = DebugCapture::new(true);
        let batch = cache.insert(forest(0)).handle;
        cache.tree_mut(TreeRef::new(batch, 1)).unwrap().break_state.set_broken();

        let tested = table.mark_candidates(
            body(0),
            near_first_tree(),
            &[batch],
            &mut cache,
            &mut pool,
            0,
            Some(&mut debug),
        );
        assert_eq!(tested, 3);
        assert_eq!(debug.tree_count(), 2);
        assert!(debug
            .lines()
            .iter()
            .all(|line| (line.from.x - 10.0).abs() > 1e-9));
    }

    #[test]
    fn test_reloaded_cell_keeps_pair() {
        let mut cache = TreeBatchCache::new();
        let mut pool = ManifoldPool::new();
        let mut table = TreeCollisionPairTable::new(0.02, 0.15);
        let old = cache.insert(forest(0)).handle;
        table.mark_candidates(body(0), near_first_tree(), &[old], &mut cache, &mut pool, 0, None);
        table.process_step(&mut cache, &mut pool, |_, _, _| {});

        cache.remove(old);
        let new = cache.insert(forest(1)).handle;
        table.mark_candidates(body(0), near_first_tree(), &[new], &mut cache, &mut pool, 1, None);

        assert_eq!(table.len(), 1);
        let pair = table.find(body(0), 100).unwrap();
        assert_eq!(pair.tree.batch(), new);
        let partner = pool.manifold(pair.manifold).unwrap().partner();
        assert!(matches!(partner, ManifoldPartner::Tree { tree, .. } if tree == pair.tree));

        table.process_step(&mut cache, &mut pool, |_, _, _| {});
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_pairs_are_per_body() {
        let mut cache = TreeBatchCache::new();
        let mut pool = ManifoldPool::new();
        let mut table = TreeCollisionPairTable::new(0.02, 0.15);
        let batch = cache.insert(forest(0)).handle;

        table.mark_candidates(body(0), near_first_tree(), &[batch], &mut cache, &mut pool, 0, None);
        table.mark_candidates(body(1), near_first_tree(), &[batch], &mut cache, &mut pool, 0, None);
        assert_eq!(table.len(), 2);

        assert_eq!(table.remove_body(body(0), &mut cache, &mut pool), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_repair_relinks_partners() {
        let mut cache = TreeBatchCache::with_capacity(1);
        let mut pool = ManifoldPool::new();
        let mut table = TreeCollisionPairTable::new(0.02, 0.15);
        let batch = cache.insert(forest(0)).handle;
        table.mark_candidates(body(0), near_first_tree(), &[batch], &mut cache, &mut pool, 0, None);

        for v in 1..4 {
            cache.insert(forest(v));
        }
        assert!(!cache.is_linked());
        table.repair(&mut cache, &mut pool);
        assert!(cache.is_linked());

        let pair = table.find(body(0), 100).unwrap();
        let partner = pool.manifold(pair.manifold).unwrap().partner();
        assert_eq!(
            partner,
            ManifoldPartner::Tree {
                tree: pair.tree,
                epoch: cache.epoch()
            }
        );
        assert!(cache.proxy(pair.tree).is_some());
    }
}
