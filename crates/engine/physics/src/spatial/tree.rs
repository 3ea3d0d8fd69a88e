//! Dynamic AABB tree
//!
//! Incremental bounding volume hierarchy over `f64` boxes. Leaves store a fat
//! box (tight bounds grown by a margin) so small motions do not force a
//! re-insertion. Internal nodes always have two children.

use crate::math::DAabb;

/// Null node sentinel
pub(crate) const NULL_NODE: u32 = u32::MAX;

/// Identifier of a leaf inside one [`AabbTree`]
///
/// Node slots are recycled; the generation tells a removed leaf's id apart
/// from whatever leaf later took its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProxyId {
    index: u32,
    generation: u32,
}

impl ProxyId {
    #[inline]
    pub fn raw(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Payload and tight bounds of a leaf
#[derive(Debug, Clone)]
pub struct LeafEntry<T> {
    pub data: T,
    pub bounds: DAabb,
}

#[derive(Debug, Clone)]
pub(crate) struct Node<T> {
    /// Fat box for leaves, union of children otherwise
    pub(crate) aabb: DAabb,
    pub(crate) parent: u32,
    pub(crate) left: u32,
    pub(crate) right: u32,
    /// 0 for leaves, -1 for free nodes
    pub(crate) height: i32,
    pub(crate) leaf: Option<LeafEntry<T>>,
    /// Bumped every time the slot is freed
    generation: u32,
}

impl<T> Node<T> {
    fn internal(generation: u32) -> Self {
        Self {
            aabb: DAabb::new(glam::DVec3::ZERO, glam::DVec3::ZERO),
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            height: 0,
            leaf: None,
            generation,
        }
    }

    #[inline]
    pub(crate) fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct AabbTree<T> {
    nodes: Vec<Node<T>>,
    free_list: Vec<u32>,
    root: u32,
    margin: f64,
    capacity: Option<usize>,
    proxies: usize,
}

impl<T> Default for AabbTree<T> {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl<T> AabbTree<T> {
    /// Create an empty, unbounded tree
    ///
    /// # Arguments
    /// * `margin` - Amount leaves are fattened by in every direction
    pub fn new(margin: f64) -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: NULL_NODE,
            margin,
            capacity: None,
            proxies: 0,
        }
    }

    /// Create an empty tree holding at most `capacity` leaves
    pub fn with_capacity_limit(margin: f64, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(margin)
        }
    }

    /// Number of leaves
    #[inline]
    pub fn len(&self) -> usize {
        self.proxies
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.proxies == 0
    }

    #[inline]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|c| self.proxies >= c)
    }

    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Insert a leaf, `None` when the tree is at capacity
    pub fn insert(&mut self, data: T, bounds: DAabb) -> Option<ProxyId> {
        if self.is_full() {
            return None;
        }

        let node_id = self.alloc_node();
        let node = &mut self.nodes[node_id as usize];
        node.aabb = bounds.expanded(self.margin);
        node.height = 0;
        node.leaf = Some(LeafEntry { data, bounds });

        self.insert_leaf(node_id);
        self.proxies += 1;
        Some(ProxyId {
            index: node_id,
            generation: self.nodes[node_id as usize].generation,
        })
    }

    /// Remove a leaf, `None` for an id that is no longer live
    pub fn remove(&mut self, proxy: ProxyId) -> Option<T> {
        let id = self.live_leaf(proxy)?;

        self.remove_leaf(id);
        let entry = self.nodes[id as usize].leaf.take();
        self.free_node(id);
        self.proxies -= 1;
        entry.map(|e| e.data)
    }

    /// Move a leaf. Returns true if the tree structure changed.
    ///
    /// Only re-inserts if the tight box has left the fat box.
    pub fn update(&mut self, proxy: ProxyId, bounds: DAabb) -> bool {
        let margin = self.margin;
        let Some(id) = self.live_leaf(proxy) else {
            return false;
        };
        let node = &mut self.nodes[id as usize];
        let Some(leaf) = node.leaf.as_mut() else {
            return false;
        };

        leaf.bounds = bounds;
        if node.aabb.contains(&bounds) {
            return false;
        }

        self.remove_leaf(id);
        self.nodes[id as usize].aabb = bounds.expanded(margin);
        self.insert_leaf(id);
        true
    }

    #[inline]
    pub fn get(&self, proxy: ProxyId) -> Option<&LeafEntry<T>> {
        let node = self.nodes.get(proxy.index as usize)?;
        if node.generation != proxy.generation {
            return None;
        }
        node.leaf.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, proxy: ProxyId) -> Option<&mut T> {
        let node = self.nodes.get_mut(proxy.index as usize)?;
        if node.generation != proxy.generation {
            return None;
        }
        node.leaf.as_mut().map(|l| &mut l.data)
    }

    /// Fat box of a leaf
    pub fn fat_aabb(&self, proxy: ProxyId) -> Option<DAabb> {
        let node = self.nodes.get(proxy.index as usize)?;
        (node.is_leaf() && node.generation == proxy.generation).then_some(node.aabb)
    }

    /// All leaves in storage order
    pub fn leaves(&self) -> impl Iterator<Item = (ProxyId, &LeafEntry<T>)> {
        self.nodes.iter().enumerate().filter_map(|(i, n)| {
            n.leaf.as_ref().map(|l| {
                let proxy = ProxyId {
                    index: i as u32,
                    generation: n.generation,
                };
                (proxy, l)
            })
        })
    }

    /// Drop every leaf. Slots are kept, so ids handed out before stay stale.
    pub fn clear(&mut self) {
        self.free_list.clear();
        for id in 0..self.nodes.len() as u32 {
            self.free_node(id);
        }
        self.root = NULL_NODE;
        self.proxies = 0;
    }

    #[inline]
    pub(crate) fn root(&self) -> u32 {
        self.root
    }

    #[inline]
    pub(crate) fn node(&self, id: u32) -> &Node<T> {
        &self.nodes[id as usize]
    }

    /// Check parent links, heights and bounds of every reachable node
    pub fn validate(&self) -> bool {
        if self.root == NULL_NODE {
            return self.proxies == 0;
        }
        if self.nodes[self.root as usize].parent != NULL_NODE {
            return false;
        }

        let mut leaves = 0;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            if node.is_leaf() {
                leaves += 1;
                if node.height != 0 {
                    return false;
                }
                continue;
            }

            let (l, r) = (node.left, node.right);
            if l == NULL_NODE || r == NULL_NODE {
                return false;
            }
            let (ln, rn) = (&self.nodes[l as usize], &self.nodes[r as usize]);
            if ln.parent != id || rn.parent != id {
                return false;
            }
            if node.height != 1 + ln.height.max(rn.height) {
                return false;
            }
            if !node.aabb.contains(&ln.aabb) || !node.aabb.contains(&rn.aabb) {
                return false;
            }
            stack.push(l);
            stack.push(r);
        }
        leaves == self.proxies
    }

    // =========== Internal methods ===========

    /// Node of a live leaf, `None` for a removed or recycled id
    fn live_leaf(&self, proxy: ProxyId) -> Option<u32> {
        let node = self.nodes.get(proxy.index as usize)?;
        if !node.is_leaf() {
            return None;
        }
        if node.generation != proxy.generation {
            tracing::warn!(
                ?proxy,
                generation = node.generation,
                "stale proxy id refers to a recycled leaf"
            );
            return None;
        }
        Some(proxy.index)
    }

    fn alloc_node(&mut self) -> u32 {
        if let Some(id) = self.free_list.pop() {
            let generation = self.nodes[id as usize].generation;
            self.nodes[id as usize] = Node::internal(generation);
            id
        } else {
            let id = self.nodes.len() as u32;
            self.nodes.push(Node::internal(0));
            id
        }
    }

    fn free_node(&mut self, id: u32) {
        let node = &mut self.nodes[id as usize];
        node.generation = node.generation.wrapping_add(1);
        node.height = -1;
        node.leaf = None;
        node.left = NULL_NODE;
        node.right = NULL_NODE;
        node.parent = NULL_NODE;
        self.free_list.push(id);
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Find the best sibling by surface area heuristic
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut sibling = self.root;
        while !self.nodes[sibling as usize].is_leaf() {
            let node = &self.nodes[sibling as usize];
            let area = node.aabb.perimeter();
            let combined_area = leaf_aabb.union(&node.aabb).perimeter();

            let cost = 2.0 * combined_area;
            let inheritance = 2.0 * (combined_area - area);

            let cost_left = self.child_insertion_cost(node.left, &leaf_aabb, inheritance);
            let cost_right = self.child_insertion_cost(node.right, &leaf_aabb, inheritance);

            if cost < cost_left && cost < cost_right {
                break;
            }
            sibling = if cost_left < cost_right {
                node.left
            } else {
                node.right
            };
        }

        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node();
        {
            let sibling_node = &self.nodes[sibling as usize];
            let aabb = leaf_aabb.union(&sibling_node.aabb);
            let height = sibling_node.height + 1;
            let parent = &mut self.nodes[new_parent as usize];
            parent.parent = old_parent;
            parent.aabb = aabb;
            parent.height = height;
            parent.left = sibling;
            parent.right = leaf;
        }

        if old_parent != NULL_NODE {
            let op = &mut self.nodes[old_parent as usize];
            if op.left == sibling {
                op.left = new_parent;
            } else {
                op.right = new_parent;
            }
        } else {
            self.root = new_parent;
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        self.fix_upwards(new_parent);
    }

    fn child_insertion_cost(&self, child: u32, leaf_aabb: &DAabb, inheritance: f64) -> f64 {
        let node = &self.nodes[child as usize];
        let combined = leaf_aabb.union(&node.aabb).perimeter();
        if node.is_leaf() {
            combined + inheritance
        } else {
            combined - node.aabb.perimeter() + inheritance
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };

        if grand_parent != NULL_NODE {
            let gp = &mut self.nodes[grand_parent as usize];
            if gp.left == parent {
                gp.left = sibling;
            } else {
                gp.right = sibling;
            }
            self.nodes[sibling as usize].parent = grand_parent;
            self.free_node(parent);
            self.fix_upwards(grand_parent);
        } else {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        }
    }

    fn refit(&mut self, id: u32) {
        let (l, r) = {
            let n = &self.nodes[id as usize];
            (n.left, n.right)
        };
        let aabb = self.nodes[l as usize]
            .aabb
            .union(&self.nodes[r as usize].aabb);
        let height = 1 + self.nodes[l as usize]
            .height
            .max(self.nodes[r as usize].height);
        let node = &mut self.nodes[id as usize];
        node.aabb = aabb;
        node.height = height;
    }

    fn fix_upwards(&mut self, start: u32) {
        let mut id = start;
        while id != NULL_NODE {
            id = self.balance(id);
            self.refit(id);
            id = self.nodes[id as usize].parent;
        }
    }

    /// Rotate the taller child up when the subtree is out of balance
    fn balance(&mut self, a: u32) -> u32 {
        let node = &self.nodes[a as usize];
        if node.is_leaf() || node.height < 2 {
            return a;
        }

        let b = node.left;
        let c = node.right;
        let balance = self.nodes[c as usize].height - self.nodes[b as usize].height;

        if balance > 1 {
            self.rotate_up(a, c, b, false)
        } else if balance < -1 {
            self.rotate_up(a, b, c, true)
        } else {
            a
        }
    }

    /// Promote `up` (a child of `a`) to `a`'s position. `other` is `a`'s
    /// remaining child; `up_is_left` says which side `up` was on.
    fn rotate_up(&mut self, a: u32, up: u32, other: u32, up_is_left: bool) -> u32 {
        let f = self.nodes[up as usize].left;
        let g = self.nodes[up as usize].right;

        // `up` takes `a`'s place under the old parent
        let parent = self.nodes[a as usize].parent;
        self.nodes[up as usize].parent = parent;
        self.nodes[a as usize].parent = up;
        if parent != NULL_NODE {
            let p = &mut self.nodes[parent as usize];
            if p.left == a {
                p.left = up;
            } else {
                p.right = up;
            }
        } else {
            self.root = up;
        }

        // The taller grandchild stays with `up`, the shorter one moves to `a`
        let (keep, give) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };

        if up_is_left {
            self.nodes[up as usize].left = a;
            self.nodes[up as usize].right = keep;
            self.nodes[a as usize].left = give;
            self.nodes[a as usize].right = other;
        } else {
            self.nodes[up as usize].left = a;
            self.nodes[up as usize].right = keep;
            self.nodes[a as usize].left = other;
            self.nodes[a as usize].right = give;
        }
        self.nodes[give as usize].parent = a;
        self.nodes[keep as usize].parent = up;

        self.refit(a);
        self.refit(up);
        up
    }
}
