use std::ops::ControlFlow;

use super::tree::{AabbTree, LeafEntry, NULL_NODE};
use crate::math::DAabb;

/// Outcome of testing a node's volume against a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTest {
    /// Nothing below this node can match
    Reject,
    /// Partial overlap: test children, visit a leaf
    Descend,
    /// Volume fully inside the query: every leaf below is visited without
    /// further volume tests
    Accept,
}

/// What the accept predicate sees of a node
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a, T> {
    pub aabb: &'a DAabb,
    pub leaf: Option<&'a LeafEntry<T>>,
}

impl<T> NodeView<'_, T> {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }
}

/// Depth-first walk over one or more trees with an explicit stack.
///
/// `accept` prunes or admits subtrees, `visit` is called for every admitted
/// leaf and may break to stop the whole traversal early. Roots are walked in
/// the order given.
pub fn traverse<'a, T, A, V>(roots: &[&'a AabbTree<T>], mut accept: A, mut visit: V) -> ControlFlow<()>
where
    A: FnMut(&NodeView<'a, T>) -> NodeTest,
    V: FnMut(&'a LeafEntry<T>) -> ControlFlow<()>,
{
    // (tree, node, subtree already accepted)
    let mut stack: Vec<(usize, u32, bool)> = Vec::with_capacity(64);

    for (tree_idx, tree) in roots.iter().enumerate() {
        if tree.root() == NULL_NODE {
            continue;
        }
        stack.push((tree_idx, tree.root(), false));

        while let Some((t, id, accepted)) = stack.pop() {
            let tree: &'a AabbTree<T> = roots[t];
            let node = tree.node(id);

            let whole = if accepted {
                true
            } else {
                let view = NodeView {
                    aabb: &node.aabb,
                    leaf: node.leaf.as_ref(),
                };
                match accept(&view) {
                    NodeTest::Reject => continue,
                    NodeTest::Descend => false,
                    NodeTest::Accept => true,
                }
            };

            match node.leaf.as_ref() {
                Some(leaf) => visit(leaf)?,
                None => {
                    stack.push((t, node.right, whole));
                    stack.push((t, node.left, whole));
                }
            }
        }
    }

    ControlFlow::Continue(())
}
