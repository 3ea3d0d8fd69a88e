use std::collections::{BTreeMap, BTreeSet};

use rapier3d::geometry::InteractionGroups;

use super::ObjectId;
use crate::math::DAabb;
use crate::spatial::{AabbTree, ProxyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Regular,
    /// Created by the island's owner and freed with it
    Procedural,
    /// Reports overlaps to the sensor table instead of colliding
    Sensor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IslandEntry {
    pub object: ObjectId,
    pub groups: InteractionGroups,
    pub kind: ObjectKind,
    /// Island revision at insertion
    pub revision: u32,
    pub proxy: ProxyId,
}

/// One island: bounds, its own tree and the objects in it
#[derive(Debug)]
pub struct ExternalBroadphase {
    pub(crate) bounds: DAabb,
    pub(crate) tree: AabbTree<ObjectId>,
    pub(crate) entries: BTreeMap<ObjectId, IslandEntry>,
    pub(crate) procedural: Vec<ObjectId>,
    /// Overlapping pairs, lower id first
    pub(crate) overlaps: BTreeSet<(ObjectId, ObjectId)>,
    pub(crate) revision: u32,
    pub(crate) dirty: bool,
    pub(crate) used_this_frame: bool,
}

impl ExternalBroadphase {
    pub(crate) fn new(bounds: DAabb, margin: f64, capacity: usize) -> Self {
        Self {
            bounds,
            tree: AabbTree::with_capacity_limit(margin, capacity),
            entries: BTreeMap::new(),
            procedural: Vec::new(),
            overlaps: BTreeSet::new(),
            revision: 0,
            dirty: false,
            used_this_frame: false,
        }
    }

    pub fn bounds(&self) -> DAabb {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tree.is_full()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.tree.capacity()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Set after terrain regeneration until the next rebuild
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn was_used_this_frame(&self) -> bool {
        self.used_this_frame
    }

    pub fn entry(&self, object: ObjectId) -> Option<&IslandEntry> {
        self.entries.get(&object)
    }

    /// Entries in object order
    pub fn entries(&self) -> impl Iterator<Item = &IslandEntry> {
        self.entries.values()
    }

    pub fn procedural_objects(&self) -> &[ObjectId] {
        &self.procedural
    }

    pub fn overlaps(&self) -> impl Iterator<Item = (ObjectId, ObjectId)> + '_ {
        self.overlaps.iter().copied()
    }

    pub fn tree(&self) -> &AabbTree<ObjectId> {
        &self.tree
    }

    /// Tight bounds of an object's proxy
    pub fn object_bounds(&self, object: ObjectId) -> Option<DAabb> {
        let entry = self.entries.get(&object)?;
        self.tree.get(entry.proxy).map(|leaf| leaf.bounds)
    }

    /// Overlapping pairs from the current proxies, honouring group filters
    pub(crate) fn compute_overlaps(&self, candidates: &mut Vec<ObjectId>) -> BTreeSet<(ObjectId, ObjectId)> {
        let mut pairs = BTreeSet::new();
        let roots = [&self.tree];

        for entry in self.entries.values() {
            let Some(bounds) = self.tree.get(entry.proxy).map(|leaf| leaf.bounds) else {
                continue;
            };
            candidates.clear();
            crate::spatial::query_aabb(&roots, &bounds, candidates);

            for &other in candidates.iter() {
                if other <= entry.object {
                    continue;
                }
                let Some(other_entry) = self.entries.get(&other) else {
                    continue;
                };
                if entry.groups.test(other_entry.groups) {
                    pairs.insert((entry.object, other));
                }
            }
        }
        pairs
    }
}
