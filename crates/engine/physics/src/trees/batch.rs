use glam::{DVec3, Quat, Vec3};
use rapier3d::parry::shape::Capsule;

use super::tree::Tree;
use crate::error::{PhysicsError, Result};
use crate::math::DIsometry;

/// Maximum number of trees in one batch
pub const TREES_PER_BATCH: usize = 16;

/// Streaming cell a batch was generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellKey {
    pub mesh_id: u32,
    pub version: u32,
    pub index_in_mesh: u32,
}

/// Collision stand-in for one tree: a capsule along the trunk
#[derive(Debug, Clone, Copy)]
pub struct TreeProxy {
    pub shape: Capsule,
    /// Capsule centre and orientation (local Y along the trunk)
    pub transform: DIsometry,
    /// Cache epoch the proxy was last linked against
    pub(crate) linked_epoch: u64,
}

impl TreeProxy {
    fn for_tree(tree: &Tree, epoch: u64) -> Self {
        let axis = tree.axis();
        let half_height = tree.height * 0.5;
        let origin = tree.pos + axis * half_height as f64;
        let rotation = Quat::from_rotation_arc(Vec3::Y, axis.as_vec3());

        Self {
            shape: Capsule::new_y(half_height, tree.radius),
            transform: DIsometry::new(origin, rotation),
            linked_epoch: epoch,
        }
    }

    #[inline]
    pub fn half_height(&self) -> f32 {
        self.shape.half_height()
    }

    #[inline]
    pub fn origin(&self) -> DVec3 {
        self.transform.translation
    }
}

/// Up to [`TREES_PER_BATCH`] trees of one streaming cell
#[derive(Debug, Clone)]
pub struct TreeBatch {
    pub cell: CellKey,
    trees: Vec<Tree>,
    proxies: Vec<TreeProxy>,
    last_frame_used: Option<u32>,
}

impl TreeBatch {
    pub fn new(cell: CellKey) -> Self {
        Self {
            cell,
            trees: Vec::with_capacity(TREES_PER_BATCH),
            proxies: Vec::new(),
            last_frame_used: None,
        }
    }

    /// Build a batch from trees, failing if there are too many
    pub fn with_trees(cell: CellKey, trees: impl IntoIterator<Item = Tree>) -> Result<Self> {
        let mut batch = Self::new(cell);
        for tree in trees {
            batch.try_push(tree)?;
        }
        Ok(batch)
    }

    pub fn try_push(&mut self, tree: Tree) -> Result<()> {
        if self.trees.len() >= TREES_PER_BATCH {
            return Err(PhysicsError::BatchFull(TREES_PER_BATCH));
        }
        debug_assert!(self.proxies.is_empty(), "tree added to a built batch");
        self.trees.push(tree);
        Ok(())
    }

    #[inline]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    #[inline]
    pub fn tree(&self, index: usize) -> Option<&Tree> {
        self.trees.get(index)
    }

    #[inline]
    pub fn tree_mut(&mut self, index: usize) -> Option<&mut Tree> {
        self.trees.get_mut(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Proxies have been built at least once
    #[inline]
    pub fn is_built(&self) -> bool {
        self.last_frame_used.is_some()
    }

    #[inline]
    pub fn last_frame_used(&self) -> Option<u32> {
        self.last_frame_used
    }

    #[inline]
    pub fn proxy(&self, index: usize) -> Option<&TreeProxy> {
        self.proxies.get(index)
    }

    pub fn proxies(&self) -> &[TreeProxy] {
        &self.proxies
    }

    /// Build proxies on first use and stamp the frame
    pub(crate) fn touch(&mut self, frame: u32, epoch: u64) {
        if self.last_frame_used.is_none() {
            self.proxies = self
                .trees
                .iter()
                .map(|t| TreeProxy::for_tree(t, epoch))
                .collect();
        }
        self.last_frame_used = Some(frame);
    }

    pub(crate) fn relink(&mut self, epoch: u64) {
        for proxy in &mut self.proxies {
            proxy.linked_epoch = epoch;
        }
    }
}
