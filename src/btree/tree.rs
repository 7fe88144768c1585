//! # Copy-on-Write B+Tree
//!
//! The tree is a root page number plus a [`PageIo`] backend. It never
//! modifies a page: every insert or delete rebuilds the nodes on the path from
//! the root to the affected leaf into fresh pages, and hands the pages they
//! replace back to the backend through `reclaim`.
//!
//! ```text
//!   before              after set("k")
//!
//!   R1                  R2  (new root)
//!   ├── A               ├── A         (shared)
//!   └── B               └── B'  (new leaf, B reclaimed)
//! ```
//!
//! ## Insert
//!
//! 1. Empty tree: a single leaf `["" (sentinel), key]`.
//! 2. Otherwise descend with [`NodeRef::lookup_le`]. At the leaf, replace the
//!    value if the key exists, else splice the key in after the floor entry.
//! 3. Each internal node on the way back up is rebuilt with the child slot
//!    replaced by the 1-3 pages that [`split3`] cut the new child into.
//! 4. If the root itself splits, a new internal root references the parts.
//!
//! The sentinel guarantees `lookup_le` always lands on a valid slot. A key
//! that sorts before its leaf's first key is inserted at index 0 and the new
//! first key flows up into the parent. That only happens under a separator
//! lower than its child's first key; every rewrite here refreshes separators,
//! but files whose separators lag their children are still handled.
//!
//! ## Delete
//!
//! Mirrors insert. After removing the key, a child that shrank to
//! `MERGE_THRESHOLD` bytes or less is combined with a neighbour: if the two fit
//! in one page they merge, otherwise they are re-split, which moves entries
//! across (borrowing). A root left with a single child is replaced by that
//! child, and a tree holding nothing but the sentinel goes back to root 0.
//!
//! ## Reclaim Ordering
//!
//! A page is reclaimed only after the pages replacing it have been allocated.

use smallvec::SmallVec;

use super::node::{split3, Node, NodeRef, NodeType};
use crate::config::{MAX_KEY_SIZE, MERGE_THRESHOLD, NODE_HEADER_SIZE, PAGE_SIZE};
use crate::error::{KeyError, Result};
use crate::storage::PageIo;

/// How [`BTree::update`] treats existing and missing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Insert or replace.
    #[default]
    Upsert,
    /// Only replace an existing key.
    UpdateOnly,
    /// Only add a missing key.
    InsertOnly,
}

/// A single-key write and what it did.
#[derive(Debug, Clone)]
pub struct UpdateRequest<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub mode: UpdateMode,
    /// A new key was added.
    pub added: bool,
    /// The tree changed (new key, or a different value for an existing key).
    pub updated: bool,
    /// Value held by the key before the request, if it existed.
    pub old: Option<Vec<u8>>,
}

impl<'a> UpdateRequest<'a> {
    pub fn new(key: &'a [u8], value: &'a [u8]) -> Self {
        Self::with_mode(key, value, UpdateMode::Upsert)
    }

    pub fn with_mode(key: &'a [u8], value: &'a [u8], mode: UpdateMode) -> Self {
        Self {
            key,
            value,
            mode,
            added: false,
            updated: false,
            old: None,
        }
    }
}

/// Shape of a tree as reported by [`BTree::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub depth: usize,
    pub internal_nodes: usize,
    pub leaves: usize,
    /// Stored keys, not counting the sentinel.
    pub keys: usize,
}

type Kids = SmallVec<[(u64, Vec<u8>); 3]>;

#[derive(Debug)]
pub struct BTree<S: PageIo> {
    root: u64,
    store: S,
}

impl<S: PageIo> BTree<S> {
    pub fn new(store: S) -> Self {
        Self::with_root(store, 0)
    }

    pub fn with_root(store: S, root: u64) -> Self {
        Self { root, store }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: u64) {
        self.root = root;
    }

    pub fn is_empty(&self) -> bool {
        self.root == 0
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub(crate) fn node(&self, page_no: u64) -> NodeRef<'_> {
        NodeRef::new(self.store.fetch(page_no))
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        if self.root == 0 || key.is_empty() {
            return None;
        }

        let mut node = self.node(self.root);
        loop {
            let idx = node.lookup_le(key);
            match node.node_type() {
                NodeType::Leaf => {
                    return (node.key(idx) == key).then(|| node.value(idx));
                }
                NodeType::Internal => node = self.node(node.ptr(idx)),
            }
        }
    }

    /// Upserts `key`. Returns true if the key was new.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut req = UpdateRequest::new(key, value);
        self.update(&mut req)?;
        Ok(req.added)
    }

    /// Applies `req` and returns whether the tree changed. Size limits are
    /// checked before any page is touched.
    pub fn update(&mut self, req: &mut UpdateRequest<'_>) -> Result<bool> {
        KeyError::check(req.key, req.value)?;
        req.added = false;
        req.updated = false;
        req.old = None;

        if self.root == 0 {
            if req.mode == UpdateMode::UpdateOnly {
                return Ok(false);
            }
            let mut root = Node::page();
            root.set_header(NodeType::Leaf, 2);
            root.append_kv(0, 0, &[], &[]);
            root.append_kv(1, 0, req.key, req.value);
            self.root = self.store.allocate(root.into_page());
            req.added = true;
            req.updated = true;
            return Ok(true);
        }

        let Some(candidate) = self.tree_insert(self.root, req) else {
            return Ok(false);
        };

        let old_root = self.root;
        self.root = self.install_root(candidate);
        self.store.reclaim(old_root);
        Ok(true)
    }

    /// Removes `key`. Returns false if it was not present; keys that could
    /// never have been stored (empty or over the size limit) are simply absent.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        if self.root == 0 || key.is_empty() || key.len() > MAX_KEY_SIZE {
            return false;
        }

        let Some(candidate) = self.tree_delete(self.root, key) else {
            return false;
        };

        let old_root = self.root;
        self.root = self.shrink_root(candidate);
        self.store.reclaim(old_root);
        true
    }

    fn tree_insert(&mut self, page_no: u64, req: &mut UpdateRequest<'_>) -> Option<Node> {
        let node = self.node(page_no);
        let idx = node.lookup_le(req.key);

        match node.node_type() {
            NodeType::Leaf => {
                let existing = node.key(idx);
                if existing == req.key {
                    let old = node.value(idx);
                    req.old = Some(old.to_vec());
                    if req.mode == UpdateMode::InsertOnly || old == req.value {
                        return None;
                    }
                    req.updated = true;
                    return Some(Node::leaf_update(node, idx, req.key, req.value));
                }

                if req.mode == UpdateMode::UpdateOnly {
                    return None;
                }
                let pos = if existing < req.key { idx + 1 } else { idx };
                req.added = true;
                req.updated = true;
                Some(Node::leaf_insert(node, pos, req.key, req.value))
            }
            NodeType::Internal => {
                let kid_ptr = node.ptr(idx);
                let kid = self.tree_insert(kid_ptr, req)?;
                let kids = self.allocate_split(kid);
                let new = self.replace_kids(page_no, idx, 1, &kids);
                self.store.reclaim(kid_ptr);
                Some(new)
            }
        }
    }

    fn tree_delete(&mut self, page_no: u64, key: &[u8]) -> Option<Node> {
        let node = self.node(page_no);
        let idx = node.lookup_le(key);

        match node.node_type() {
            NodeType::Leaf => (node.key(idx) == key).then(|| Node::leaf_delete(node, idx)),
            NodeType::Internal => {
                let kid_ptr = node.ptr(idx);
                let updated = self.tree_delete(kid_ptr, key)?;
                Some(self.node_delete(page_no, idx, kid_ptr, updated))
            }
        }
    }

    /// Rebuilds internal node `page_no` after child `idx` became `updated`.
    fn node_delete(&mut self, page_no: u64, idx: u16, kid_ptr: u64, updated: Node) -> Node {
        let (first, replaced, combined) = match self.rebalance_sibling(page_no, idx, updated.as_ref()) {
            Some(Sibling::Left(sibling_ptr)) => {
                let combined = Node::merge(self.node(sibling_ptr), updated.as_ref());
                (idx - 1, sibling_ptr, combined)
            }
            Some(Sibling::Right(sibling_ptr)) => {
                let combined = Node::merge(updated.as_ref(), self.node(sibling_ptr));
                (idx, sibling_ptr, combined)
            }
            None if updated.as_ref().nkeys() == 0 => {
                let parent = self.node(page_no);
                assert!(
                    parent.nkeys() == 1 && idx == 0,
                    "empty child {} left behind in a parent with {} children",
                    idx,
                    parent.nkeys()
                );
                let mut new = Node::page();
                new.set_header(NodeType::Internal, 0);
                self.store.reclaim(kid_ptr);
                return new;
            }
            None => {
                let kids = self.allocate_split(updated);
                let new = self.replace_kids(page_no, idx, 1, &kids);
                self.store.reclaim(kid_ptr);
                return new;
            }
        };

        let kids = self.allocate_split(combined);
        let new = self.replace_kids(page_no, first, 2, &kids);
        self.store.reclaim(replaced);
        self.store.reclaim(kid_ptr);
        new
    }

    /// Picks the neighbour an underfull child should be combined with:
    /// a sibling it merges into if there is one, else one to borrow from.
    fn rebalance_sibling(&self, page_no: u64, idx: u16, updated: NodeRef<'_>) -> Option<Sibling> {
        if !updated.fits_page() || updated.size() > MERGE_THRESHOLD {
            return None;
        }

        let parent = self.node(page_no);
        let left = (idx > 0).then(|| Sibling::Left(parent.ptr(idx - 1)));
        let right = (idx + 1 < parent.nkeys()).then(|| Sibling::Right(parent.ptr(idx + 1)));

        let fits = |sibling: &Sibling| {
            let merged = self.node(sibling.page()).size() + updated.size() - NODE_HEADER_SIZE;
            merged <= PAGE_SIZE
        };

        if let Some(sibling) = left.iter().chain(right.iter()).find(|s| fits(*s)) {
            return Some(*sibling);
        }
        if updated.nkeys() == 0 {
            return None;
        }
        left.or(right)
    }

    /// Allocates the 1-3 pages `candidate` splits into, returning each
    /// page number with its first key.
    fn allocate_split(&mut self, candidate: Node) -> Kids {
        split3(candidate)
            .into_iter()
            .map(|part| {
                let first = part.as_ref().key(0).to_vec();
                (self.store.allocate(part.into_page()), first)
            })
            .collect()
    }

    fn replace_kids(&self, page_no: u64, idx: u16, replaced: u16, kids: &Kids) -> Node {
        let refs: SmallVec<[(u64, &[u8]); 3]> =
            kids.iter().map(|(ptr, key)| (*ptr, key.as_slice())).collect();
        Node::internal_replace(self.node(page_no), idx, replaced, &refs)
    }

    fn install_root(&mut self, candidate: Node) -> u64 {
        let kids = self.allocate_split(candidate);
        if kids.len() == 1 {
            return kids[0].0;
        }

        let mut root = Node::page();
        root.set_header(NodeType::Internal, kids.len() as u16);
        for (i, (ptr, key)) in kids.iter().enumerate() {
            root.append_kv(i as u16, *ptr, key, &[]);
        }
        let root = self.store.allocate(root.into_page());
        tracing::trace!(root, children = kids.len(), "root split, tree grew a level");
        root
    }

    fn shrink_root(&mut self, candidate: Node) -> u64 {
        let view = candidate.as_ref();
        match (view.node_type(), view.nkeys()) {
            (NodeType::Internal, 0) => 0,
            (NodeType::Internal, 1) => {
                let mut page_no = view.ptr(0);
                loop {
                    let node = self.node(page_no);
                    match (node.node_type(), node.nkeys()) {
                        (NodeType::Internal, 1) => {
                            let next = node.ptr(0);
                            self.store.reclaim(page_no);
                            page_no = next;
                        }
                        // A lone leaf with one entry holds only the sentinel.
                        (NodeType::Leaf, 1) => {
                            self.store.reclaim(page_no);
                            return 0;
                        }
                        _ => {
                            tracing::trace!(root = page_no, "root collapsed to its only child");
                            return page_no;
                        }
                    }
                }
            }
            (NodeType::Leaf, n) if n <= 1 => 0,
            _ => self.install_root(candidate),
        }
    }

    /// Walks every reachable node and checks the structural invariants:
    /// pages fit, keys ascend within and across nodes, every leaf sits at the
    /// same depth, and no page is reachable twice.
    pub fn verify(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        if self.root == 0 {
            return Ok(stats);
        }

        let mut seen = hashbrown::HashSet::new();
        let mut leaf_depth = None;
        self.verify_node(self.root, 1, b"", None, &mut seen, &mut leaf_depth, &mut stats)?;
        stats.depth = leaf_depth.unwrap_or(0);
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_node(
        &self,
        page_no: u64,
        depth: usize,
        lower: &[u8],
        upper: Option<&[u8]>,
        seen: &mut hashbrown::HashSet<u64>,
        leaf_depth: &mut Option<usize>,
        stats: &mut TreeStats,
    ) -> Result<()> {
        eyre::ensure!(seen.insert(page_no), "page {} is reachable twice", page_no);

        let node = self.node(page_no);
        let n = node.nkeys();
        eyre::ensure!(
            node.fits_page(),
            "page {} holds a {} byte node",
            page_no,
            node.size()
        );
        eyre::ensure!(n > 0, "page {} is an empty node", page_no);
        eyre::ensure!(
            node.key(0) >= lower,
            "page {} first key sorts before its separator",
            page_no
        );
        for i in 1..n {
            eyre::ensure!(
                node.key(i - 1) < node.key(i),
                "page {} keys {} and {} are out of order",
                page_no,
                i - 1,
                i
            );
        }
        if let Some(upper) = upper {
            eyre::ensure!(
                node.key(n - 1) < upper,
                "page {} last key reaches past the next separator",
                page_no
            );
        }

        match node.node_type() {
            NodeType::Leaf => {
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) => {
                        eyre::ensure!(
                            d == depth,
                            "leaf {} at depth {} but other leaves at depth {}",
                            page_no,
                            depth,
                            d
                        );
                    }
                }
                stats.leaves += 1;
                stats.keys += (0..n).filter(|&i| !node.key(i).is_empty()).count();
            }
            NodeType::Internal => {
                stats.internal_nodes += 1;
                for i in 0..n {
                    let child_upper = if i + 1 < n { Some(node.key(i + 1)) } else { upper };
                    self.verify_node(
                        node.ptr(i),
                        depth + 1,
                        node.key(i),
                        child_upper,
                        seen,
                        leaf_depth,
                        stats,
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Sibling {
    Left(u64),
    Right(u64),
}

impl Sibling {
    fn page(&self) -> u64 {
        match *self {
            Sibling::Left(p) | Sibling::Right(p) => p,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::btree::MemoryPages;
    use crate::config::MAX_VALUE_SIZE;

    fn tree() -> BTree<MemoryPages> {
        BTree::new(MemoryPages::new())
    }

    fn key(i: u32) -> Vec<u8> {
        format!("key{:06}", i).into_bytes()
    }

    /// Every page the tree references is live and nothing else is.
    fn assert_no_leaks(tree: &BTree<MemoryPages>) {
        let stats = tree.verify().unwrap();
        assert_eq!(
            tree.store().len(),
            stats.leaves + stats.internal_nodes,
            "live pages must equal reachable pages"
        );
    }

    #[test]
    fn empty_tree_lookups() {
        let mut tree = tree();

        assert!(tree.is_empty());
        assert_eq!(tree.get(b"missing"), None);
        assert!(!tree.delete(b"missing"));
        assert_eq!(tree.verify().unwrap(), TreeStats::default());
    }

    #[test]
    fn first_insert_creates_sentinel_leaf() {
        let mut tree = tree();

        assert!(tree.insert(b"hello", b"world").unwrap());

        let root = tree.node(tree.root());
        assert_eq!(root.node_type(), NodeType::Leaf);
        assert_eq!(root.nkeys(), 2);
        assert_eq!(root.key(0), b"");
        assert_eq!(root.key(1), b"hello");
        assert_eq!(tree.get(b"hello"), Some(&b"world"[..]));
    }

    #[test]
    fn sentinel_is_not_visible() {
        let mut tree = tree();
        tree.insert(b"a", b"1").unwrap();

        assert_eq!(tree.get(b""), None);
        assert!(!tree.delete(b""));
    }

    #[test]
    fn example_scenario() {
        let mut tree = tree();
        tree.insert(b"0", b"first value").unwrap();
        tree.insert(b"1", b"second value").unwrap();

        assert_eq!(tree.get(b"0"), Some(&b"first value"[..]));
        assert!(tree.delete(b"0"));
        assert_eq!(tree.get(b"0"), None);
        assert_eq!(tree.get(b"1"), Some(&b"second value"[..]));
    }

    #[test]
    fn overwrite_keeps_key_count() {
        let mut tree = tree();
        assert!(tree.insert(b"k", b"v1").unwrap());
        assert!(!tree.insert(b"k", b"v2").unwrap());

        assert_eq!(tree.get(b"k"), Some(&b"v2"[..]));
        assert_eq!(tree.verify().unwrap().keys, 1);
    }

    #[test]
    fn rejects_oversized_input_without_touching_pages() {
        let mut tree = tree();
        tree.insert(b"a", b"1").unwrap();
        let root = tree.root();
        let counters = tree.store().counters();

        let err = tree.insert(&vec![0u8; MAX_KEY_SIZE + 1], b"v").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KeyError>(),
            Some(KeyError::KeyTooLarge { .. })
        ));
        let err = tree.insert(b"k", &vec![0u8; MAX_VALUE_SIZE + 1]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KeyError>(),
            Some(KeyError::ValueTooLarge { .. })
        ));

        assert_eq!(tree.root(), root);
        assert_eq!(tree.store().counters(), counters);
    }

    #[test]
    fn update_modes() {
        let mut tree = tree();

        let mut req = UpdateRequest::with_mode(b"k", b"v", UpdateMode::UpdateOnly);
        assert!(!tree.update(&mut req).unwrap());
        assert!(tree.is_empty());

        let mut req = UpdateRequest::with_mode(b"k", b"v", UpdateMode::InsertOnly);
        assert!(tree.update(&mut req).unwrap());
        assert!(req.added);

        let mut req = UpdateRequest::with_mode(b"k", b"other", UpdateMode::InsertOnly);
        assert!(!tree.update(&mut req).unwrap());
        assert_eq!(req.old.as_deref(), Some(&b"v"[..]));
        assert_eq!(tree.get(b"k"), Some(&b"v"[..]));

        let mut req = UpdateRequest::with_mode(b"k", b"new", UpdateMode::UpdateOnly);
        assert!(tree.update(&mut req).unwrap());
        assert!(req.updated && !req.added);
        assert_eq!(tree.get(b"k"), Some(&b"new"[..]));

        let mut req = UpdateRequest::with_mode(b"missing", b"x", UpdateMode::UpdateOnly);
        assert!(!tree.update(&mut req).unwrap());
        assert_eq!(tree.get(b"missing"), None);
    }

    #[test]
    fn identical_value_is_a_no_op() {
        let mut tree = tree();
        tree.insert(b"k", b"same").unwrap();
        let root = tree.root();
        let counters = tree.store().counters();

        let mut req = UpdateRequest::new(b"k", b"same");
        assert!(!tree.update(&mut req).unwrap());

        assert_eq!(tree.root(), root);
        assert_eq!(tree.store().counters(), counters);
    }

    #[test]
    fn every_write_replaces_the_root() {
        let mut tree = tree();
        tree.insert(b"a", b"1").unwrap();
        let first = tree.root();

        tree.insert(b"b", b"2").unwrap();

        assert_ne!(tree.root(), first);
        assert!(!tree.store().contains(first));
        assert_no_leaks(&tree);
    }

    #[test]
    fn leaf_split_grows_a_new_root() {
        let mut tree = tree();
        let value = vec![b'v'; 1000];

        for i in 0..3 {
            tree.insert(&key(i), &value).unwrap();
        }
        assert_eq!(tree.node(tree.root()).node_type(), NodeType::Leaf);

        tree.insert(&key(3), &value).unwrap();

        let root = tree.node(tree.root());
        assert_eq!(root.node_type(), NodeType::Internal);
        assert_eq!(root.nkeys(), 2);
        assert_eq!(root.key(0), b"");
        let stats = tree.verify().unwrap();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.leaves, 2);
        assert_eq!(stats.keys, 4);
        assert_no_leaks(&tree);
    }

    #[test]
    fn maximal_records_split_three_ways() {
        let mut tree = tree();
        let side = vec![1u8; 1990];
        let big_key = vec![b'b'; MAX_KEY_SIZE];
        let big_value = vec![2u8; MAX_VALUE_SIZE];

        tree.insert(b"a", &side).unwrap();
        tree.insert(b"c", &side).unwrap();
        assert_eq!(tree.verify().unwrap().leaves, 1);

        tree.insert(&big_key, &big_value).unwrap();

        let stats = tree.verify().unwrap();
        assert_eq!(stats.leaves, 3);
        assert_eq!(tree.node(tree.root()).nkeys(), 3);
        assert_eq!(tree.get(&big_key), Some(big_value.as_slice()));
        assert_no_leaks(&tree);
    }

    #[test]
    fn deleting_a_separator_refreshes_it() {
        let mut tree = tree();
        let value = vec![b'v'; 900];
        for i in 0..20 {
            tree.insert(&key(i * 10), &value).unwrap();
        }
        let root = tree.node(tree.root());
        assert_eq!(root.node_type(), NodeType::Internal);
        let separator = root.key(1).to_vec();

        assert!(tree.delete(&separator));

        let root = tree.node(tree.root());
        let refreshed = root.key(1);
        assert!(refreshed > separator.as_slice());
        assert_eq!(tree.node(root.ptr(1)).key(0), refreshed);

        // Sorts between the deleted separator and its replacement, so it
        // lands at the end of the left neighbour.
        let mut between = separator.clone();
        between.push(b'!');
        tree.insert(&between, b"x").unwrap();

        tree.verify().unwrap();
        assert_eq!(tree.get(&between), Some(&b"x"[..]));
        assert_no_leaks(&tree);
    }

    fn leaf_page(entries: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut node = Node::page();
        node.set_header(NodeType::Leaf, entries.len() as u16);
        for (i, (k, v)) in entries.iter().enumerate() {
            node.append_kv(i as u16, 0, k, v);
        }
        node.into_page()
    }

    #[test]
    fn key_below_lagging_separator_becomes_first_key() {
        let mut pages = MemoryPages::new();
        let left = pages.allocate(leaf_page(&[(b"", b""), (b"a", b"1")]));
        let right = pages.allocate(leaf_page(&[(b"p", b"2"), (b"q", b"3")]));
        let mut root = Node::page();
        root.set_header(NodeType::Internal, 2);
        root.append_kv(0, left, b"", &[]);
        root.append_kv(1, right, b"m", &[]);
        let root = pages.allocate(root.into_page());
        let mut tree = BTree::with_root(pages, root);

        // "n" routes past separator "m" into a leaf starting at "p".
        assert!(tree.insert(b"n", b"4").unwrap());

        let root = tree.node(tree.root());
        assert_eq!(root.key(1), b"n");
        let leaf = tree.node(root.ptr(1));
        let keys: Vec<&[u8]> = (0..leaf.nkeys()).map(|i| leaf.key(i)).collect();
        assert_eq!(keys, vec![&b"n"[..], b"p", b"q"]);

        tree.verify().unwrap();
        let all: Vec<&[u8]> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(all, vec![&b"a"[..], b"n", b"p", b"q"]);
        assert_eq!(tree.get(b"n"), Some(&b"4"[..]));
    }

    #[test]
    fn delete_everything_frees_all_pages() {
        let mut tree = tree();
        let value = vec![b'v'; 200];
        for i in 0..500 {
            tree.insert(&key(i), &value).unwrap();
        }
        assert!(tree.verify().unwrap().depth >= 2);

        for i in 0..500 {
            assert!(tree.delete(&key(i)), "key {} should exist", i);
            tree.verify().unwrap();
        }

        assert!(tree.is_empty());
        assert!(tree.store().is_empty());
    }

    #[test]
    fn delete_missing_key_changes_nothing() {
        let mut tree = tree();
        tree.insert(b"a", b"1").unwrap();
        let root = tree.root();

        assert!(!tree.delete(b"b"));
        assert!(!tree.delete(&vec![0u8; MAX_KEY_SIZE + 1]));

        assert_eq!(tree.root(), root);
    }

    #[test]
    fn deletes_keep_nodes_occupied() {
        let mut tree = tree();
        for i in 0..3000 {
            tree.insert(&key(i), &key(i)).unwrap();
        }
        let full = tree.verify().unwrap();

        for i in (0..3000).filter(|i| i % 10 != 0) {
            assert!(tree.delete(&key(i)));
        }

        let stats = tree.verify().unwrap();
        assert_eq!(stats.keys, 300);
        assert!(
            stats.leaves < full.leaves / 2,
            "underfull leaves should have merged: {} of {}",
            stats.leaves,
            full.leaves
        );
        assert_no_leaks(&tree);
    }

    #[test]
    fn randomized_against_btreemap() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut tree = tree();
        let mut model = BTreeMap::new();

        for step in 0..4000 {
            let k = format!("{:05}", rng.gen_range(0..800)).into_bytes();
            if rng.gen_bool(0.6) {
                let len = rng.gen_range(0..=MAX_VALUE_SIZE / 4);
                let v = vec![(step % 251) as u8; len];
                tree.insert(&k, &v).unwrap();
                model.insert(k, v);
            } else {
                assert_eq!(tree.delete(&k), model.remove(&k).is_some());
            }

            if step % 500 == 0 {
                assert_eq!(tree.verify().unwrap().keys, model.len());
            }
        }

        for (k, v) in &model {
            assert_eq!(tree.get(k), Some(v.as_slice()));
        }
        let collected: Vec<(Vec<u8>, Vec<u8>)> =
            tree.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
        assert_eq!(collected, expected);
        assert_no_leaks(&tree);
    }

    #[test]
    fn large_keys_with_separator_growth_stay_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = tree();
        let mut model = BTreeMap::new();

        for _ in 0..600 {
            let mut k = vec![0u8; rng.gen_range(1..=MAX_KEY_SIZE)];
            rng.fill(k.as_mut_slice());
            let v = vec![1u8; rng.gen_range(0..=MAX_VALUE_SIZE)];
            tree.insert(&k, &v).unwrap();
            model.insert(k, v);
        }
        tree.verify().unwrap();

        let keys: Vec<Vec<u8>> = model.keys().cloned().collect();
        for k in keys.iter().step_by(2) {
            assert!(tree.delete(k));
            model.remove(k);
        }

        assert_eq!(tree.verify().unwrap().keys, model.len());
        for (k, v) in &model {
            assert_eq!(tree.get(k), Some(v.as_slice()));
        }
        assert_no_leaks(&tree);
    }
}
