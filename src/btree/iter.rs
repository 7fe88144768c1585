//! # Ordered Cursor
//!
//! [`Iter`] walks leaves in key order by keeping the root-to-leaf path as a
//! stack of `(node, index)` pairs. Advancing past the end of a leaf pops up to
//! the first ancestor with a next child and descends along its leftmost edge.
//!
//! ```text
//! path: [(root, 1), (internal, 0), (leaf, 3)]
//!                                       ^ next pair yielded
//! ```
//!
//! Nodes are borrowed straight from the page backend, so the tree cannot be
//! modified while an iterator is alive. The empty sentinel key is skipped.

use smallvec::SmallVec;

use super::node::{NodeRef, NodeType};
use super::tree::BTree;
use crate::config::MAX_TREE_DEPTH;
use crate::storage::PageIo;

pub struct Iter<'a, S: PageIo> {
    tree: &'a BTree<S>,
    path: SmallVec<[(NodeRef<'a>, u16); MAX_TREE_DEPTH]>,
}

impl<'a, S: PageIo> Iter<'a, S> {
    fn empty(tree: &'a BTree<S>) -> Self {
        Self {
            tree,
            path: SmallVec::new(),
        }
    }

    /// Pushes the leftmost path below `node`.
    fn descend_leftmost(&mut self, mut node: NodeRef<'a>) {
        loop {
            self.path.push((node, 0));
            match node.node_type() {
                NodeType::Leaf => return,
                NodeType::Internal => node = self.tree.node(node.ptr(0)),
            }
        }
    }

    /// Moves the cursor one entry forward.
    fn advance(&mut self) {
        while let Some((node, idx)) = self.path.last_mut() {
            *idx += 1;
            if *idx < node.nkeys() {
                let (node, idx) = (*node, *idx);
                if node.node_type() == NodeType::Internal {
                    let child = self.tree.node(node.ptr(idx));
                    self.descend_leftmost(child);
                }
                return;
            }
            self.path.pop();
        }
    }

    fn current(&self) -> Option<(&'a [u8], &'a [u8])> {
        let (leaf, idx) = *self.path.last()?;
        Some((leaf.key(idx), leaf.value(idx)))
    }

    fn skip_sentinel(&mut self) {
        if matches!(self.current(), Some((key, _)) if key.is_empty()) {
            self.advance();
        }
    }
}

impl<'a, S: PageIo> Iterator for Iter<'a, S> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.current()?;
        self.advance();
        Some(item)
    }
}

impl<S: PageIo> BTree<S> {
    /// Iterates over every pair in ascending key order.
    pub fn iter(&self) -> Iter<'_, S> {
        let mut iter = Iter::empty(self);
        if self.root() != 0 {
            iter.descend_leftmost(self.node(self.root()));
            iter.skip_sentinel();
        }
        iter
    }

    /// Iterates in ascending order starting at the first key `>= key`.
    pub fn seek(&self, key: &[u8]) -> Iter<'_, S> {
        let mut iter = Iter::empty(self);
        if self.root() == 0 {
            return iter;
        }

        let mut node = self.node(self.root());
        loop {
            let idx = node.lookup_le(key);
            iter.path.push((node, idx));
            match node.node_type() {
                NodeType::Leaf => break,
                NodeType::Internal => node = self.node(node.ptr(idx)),
            }
        }

        if matches!(iter.current(), Some((found, _)) if found < key) {
            iter.advance();
        }
        iter.skip_sentinel();
        iter
    }
}
