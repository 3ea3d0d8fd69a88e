//! Tree batch cache
//!
//! Batches are inserted by the terrain provider while it answers region
//! queries and live until the provider evicts them. They are stored in a
//! rapier [`Arena`], whose backing storage moves when an insertion grows its
//! capacity. [`TreeBatchCache::epoch`] advances when that happens and the
//! pipeline re-links proxies and manifold partners before using anything it
//! held across the insertion.

use std::fmt;

use rapier3d::data::{Arena, Index};

use super::batch::{TreeBatch, TreeProxy, TREES_PER_BATCH};
use super::tree::Tree;

const TREE_BITS: u64 = 4;
const TREE_MASK: u64 = (1 << TREE_BITS) - 1;
const BATCH_SHIFT: u64 = TREE_BITS;
const BATCH_BITS: u64 = 28;
const BATCH_MASK: u64 = (1 << BATCH_BITS) - 1;
const GENERATION_SHIFT: u64 = BATCH_SHIFT + BATCH_BITS;

const _: () = assert!(TREES_PER_BATCH as u64 <= TREE_MASK + 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchHandle(pub(crate) Index);

/// One tree, addressed through its batch
///
/// Packed into a `u64` as `[generation:32][batch index:28][tree:4]`, the
/// format the renderer and pair table exchange.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeRef(u64);

impl TreeRef {
    pub fn new(batch: BatchHandle, tree: usize) -> Self {
        debug_assert!(tree < TREES_PER_BATCH, "tree index {tree} out of range");
        let (slot, generation) = batch.0.into_raw_parts();
        debug_assert!(
            (slot as u64) <= BATCH_MASK,
            "batch index {slot} exceeds 28 bits"
        );
        let packed = ((generation as u64) << GENERATION_SHIFT)
            | (((slot as u64) & BATCH_MASK) << BATCH_SHIFT)
            | ((tree as u64) & TREE_MASK);
        Self(packed)
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn batch(self) -> BatchHandle {
        let slot = ((self.0 >> BATCH_SHIFT) & BATCH_MASK) as u32;
        let generation = (self.0 >> GENERATION_SHIFT) as u32;
        BatchHandle(Index::from_raw_parts(slot, generation))
    }

    #[inline]
    pub fn tree_index(self) -> usize {
        (self.0 & TREE_MASK) as usize
    }
}

impl fmt::Debug for TreeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (slot, generation) = self.batch().0.into_raw_parts();
        write!(f, "TreeRef({slot}v{generation}#{})", self.tree_index())
    }
}

/// Result of inserting a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchInsertion {
    pub handle: BatchHandle,
    pub relocated: bool,
}

#[derive(Debug, Default)]
pub struct TreeBatchCache {
    batches: Arena<TreeBatch>,
    /// Times the arena storage has grown
    epoch: u64,
    relinked_epoch: u64,
}

impl TreeBatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            batches: Arena::with_capacity(capacity),
            epoch: 0,
            relinked_epoch: 0,
        }
    }

    /// Insert a batch, reusing a free slot when one exists.
    ///
    /// Growing the arena reallocates it; the insertion then reports
    /// `relocated` and the epoch advances.
    pub fn insert(&mut self, batch: TreeBatch) -> BatchInsertion {
        let capacity = self.batches.capacity();
        let index = self.batches.insert(batch);
        let relocated = self.batches.capacity() != capacity;
        if relocated {
            self.epoch += 1;
            tracing::trace!(
                epoch = self.epoch,
                capacity = self.batches.capacity(),
                batches = self.batches.len(),
                "tree batch cache grew"
            );
        }
        BatchInsertion {
            handle: BatchHandle(index),
            relocated,
        }
    }

    /// Evict a batch. Its trees, broken or not, are forgotten.
    pub fn remove(&mut self, handle: BatchHandle) -> Option<TreeBatch> {
        self.batches.remove(handle.0)
    }

    #[inline]
    pub fn get(&self, handle: BatchHandle) -> Option<&TreeBatch> {
        self.batches.get(handle.0)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: BatchHandle) -> Option<&mut TreeBatch> {
        self.batches.get_mut(handle.0)
    }

    #[inline]
    pub fn contains(&self, handle: BatchHandle) -> bool {
        self.batches.contains(handle.0)
    }

    pub fn tree(&self, tree: TreeRef) -> Option<&Tree> {
        self.get(tree.batch())?.tree(tree.tree_index())
    }

    pub fn tree_mut(&mut self, tree: TreeRef) -> Option<&mut Tree> {
        self.get_mut(tree.batch())?.tree_mut(tree.tree_index())
    }

    /// Proxy of a built tree
    pub fn proxy(&self, tree: TreeRef) -> Option<&TreeProxy> {
        let proxy = self.get(tree.batch())?.proxy(tree.tree_index())?;
        debug_assert_eq!(
            proxy.linked_epoch,
            self.epoch(),
            "tree proxy used across a cache relocation without repair"
        );
        Some(proxy)
    }

    /// Build the batch's proxies if needed and mark it used this frame
    pub fn get_or_build(&mut self, handle: BatchHandle, frame: u32) -> Option<&TreeBatch> {
        let epoch = self.epoch();
        let batch = self.batches.get_mut(handle.0)?;
        batch.touch(frame, epoch);
        Some(batch)
    }

    /// Times the backing storage has moved
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Proxies were re-linked after the latest relocation
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.relinked_epoch == self.epoch()
    }

    /// Re-link every built proxy to the current epoch
    pub fn relink_proxies(&mut self) -> usize {
        let epoch = self.epoch();
        let mut relinked = 0;
        for (_, batch) in self.batches.iter_mut() {
            if batch.is_built() {
                batch.relink(epoch);
                relinked += 1;
            }
        }
        self.relinked_epoch = epoch;
        relinked
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.batches.capacity()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BatchHandle, &TreeBatch)> {
        self.batches.iter().map(|(i, b)| (BatchHandle(i), b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trees::batch::CellKey;
    use glam::DVec3;

    fn batch(index: u32) -> TreeBatch {
        let cell = CellKey {
            mesh_id: 0,
            version: 0,
            index_in_mesh: index,
        };
        let trees = (0..4u16).map(|i| {
            Tree::new(
                (index * 16) as u16 + i,
                DVec3::new(i as f64 * 5.0, 6.0e6, index as f64 * 5.0),
                0.2,
                6.0,
                3.0e7,
            )
        });
        TreeBatch::with_trees(cell, trees).unwrap()
    }

    #[test]
    fn test_tree_ref_packing() {
        let handle = BatchHandle(Index::from_raw_parts(0x0ABC_DEF, 7));
        let tree = TreeRef::new(handle, 13);
        assert_eq!(tree.batch(), handle);
        assert_eq!(tree.tree_index(), 13);
        assert_eq!(tree.raw() >> 32, 7);
        assert_eq!(TreeRef::from_raw(tree.raw()), tree);
    }

    #[test]
    fn test_handles_survive_relocation() {
        let mut cache = TreeBatchCache::with_capacity(1);
        let first = cache.insert(batch(0)).handle;
        cache.get_or_build(first, 1);
        let origin = cache.get(first).unwrap().proxy(2).unwrap().origin();

        let epoch = cache.epoch();
        let mut relocated = false;
        for i in 1..8 {
            relocated |= cache.insert(batch(i)).relocated;
        }
        assert!(relocated);
        assert_ne!(cache.epoch(), epoch);
        assert!(!cache.is_linked());

        assert_eq!(cache.relink_proxies(), 1);
        assert!(cache.is_linked());

        let tree = TreeRef::new(first, 2);
        assert_eq!(cache.tree(tree).unwrap().identifier, 2);
        assert_eq!(cache.proxy(tree).unwrap().origin(), origin);
    }

    #[test]
    fn test_slot_reuse_keeps_epoch() {
        let mut cache = TreeBatchCache::with_capacity(2);
        let a = cache.insert(batch(0));
        let b = cache.insert(batch(1));
        assert!(!a.relocated && !b.relocated);
        assert_eq!(cache.capacity(), 2);

        cache.remove(a.handle);
        let again = cache.insert(batch(2));
        assert!(!again.relocated);
        assert_eq!(cache.epoch(), 0);

        let grown = cache.insert(batch(3));
        assert!(grown.relocated);
        assert_eq!(cache.epoch(), 1);
        assert!(cache.capacity() > 2);
    }

    #[test]
    fn test_evicted_batch_is_gone() {
        let mut cache = TreeBatchCache::new();
        let h = cache.insert(batch(0)).handle;
        let tree = TreeRef::new(h, 0);
        assert!(cache.remove(h).is_some());
        assert!(cache.tree(tree).is_none());

        // Slot is reused with a new generation
        let again = cache.insert(batch(1)).handle;
        assert_eq!(again.0.into_raw_parts().0, h.0.into_raw_parts().0);
        assert_ne!(again, h);
        assert!(cache.tree(tree).is_none());
        assert!(cache.tree(TreeRef::new(again, 0)).is_some());
    }
}
