//! # B+Tree Node Codec
//!
//! A node is the interpretation of one page's bytes as either a leaf (keys and
//! values) or an internal node (keys and child page numbers). This module only
//! encodes and decodes that layout; it knows nothing about files or allocation.
//!
//! ## Layout
//!
//! ```text
//! | type | nkeys | pointers   | offsets    | key-values | unused |
//! | 2B   | 2B    | nkeys * 8B | nkeys * 2B | ...        |        |
//!
//! key-value record:
//! | klen | vlen | key | val |
//! | 2B   | 2B   | ... | ... |
//! ```
//!
//! All integers are little-endian. For internal nodes every record has an
//! empty value and pointer `i` holds the child page number; for leaves the
//! pointer slots stay zero.
//!
//! ## Offset Table
//!
//! Entry `i` (1-based) stores where record `i` starts, relative to the first
//! record. The offset of record 0 is always 0 and is not stored, so the entry
//! for `nkeys` is the total record size and [`NodeRef::size`] is O(1):
//!
//! ```text
//! kv_pos(i) = 4 + 10 * nkeys + offset(i)
//! size      = kv_pos(nkeys)
//! ```
//!
//! ## Owned vs Borrowed
//!
//! [`NodeRef`] borrows a page (straight out of an mmap window on the read
//! path). [`Node`] owns a scratch buffer that new nodes are built into.
//! Because a node is always rebuilt from an old one plus a change, a scratch
//! buffer is two pages long; [`split3`] cuts it back into one to three
//! page-sized nodes before anything is written.
//!
//! ## Invariant Violations
//!
//! Index checks and type-tag checks panic. A bad index here means either a
//! bug in the tree engine or a corrupted page, and neither can be repaired
//! by the caller.

use smallvec::SmallVec;
use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{NODE_HEADER_SIZE, OFFSET_SIZE, PAGE_SIZE, POINTER_SIZE, RECORD_HEADER_SIZE};

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal = 1,
    Leaf = 2,
}

impl NodeType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(NodeType::Internal),
            2 => Some(NodeType::Leaf),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct NodeHeader {
    node_type: U16,
    nkeys: U16,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

impl NodeHeader {
    le_accessors! {
        node_type: u16,
        nkeys: u16,
    }
}

/// Read-only view of a node, usually borrowed from a committed page.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    data: &'a [u8],
}

impl<'a> NodeRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert!(
            data.len() >= PAGE_SIZE,
            "node buffer of {} bytes is shorter than a page",
            data.len()
        );
        Self { data }
    }

    fn header(&self) -> &'a NodeHeader {
        match NodeHeader::ref_from_prefix(self.data) {
            Ok((header, _)) => header,
            Err(_) => panic!("node buffer too short for header"),
        }
    }

    pub fn node_type(&self) -> NodeType {
        let raw = self.header().node_type();
        match NodeType::from_u16(raw) {
            Some(t) => t,
            None => panic!("corrupted node: unknown type tag {}", raw),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type() == NodeType::Leaf
    }

    pub fn nkeys(&self) -> u16 {
        self.header().nkeys()
    }

    pub fn ptr(&self, idx: u16) -> u64 {
        assert!(
            idx < self.nkeys(),
            "pointer index {} out of bounds (nkeys={})",
            idx,
            self.nkeys()
        );
        let pos = pointer_pos(idx);
        u64::from_le_bytes(read_array(self.data, pos))
    }

    pub fn offset(&self, idx: u16) -> u16 {
        if idx == 0 {
            return 0;
        }
        let pos = offset_pos(self.nkeys(), idx);
        u16::from_le_bytes(read_array(self.data, pos))
    }

    pub fn kv_pos(&self, idx: u16) -> usize {
        assert!(
            idx <= self.nkeys(),
            "record index {} out of bounds (nkeys={})",
            idx,
            self.nkeys()
        );
        records_start(self.nkeys()) + self.offset(idx) as usize
    }

    fn record_lens(&self, pos: usize) -> (usize, usize) {
        let klen = u16::from_le_bytes(read_array(self.data, pos)) as usize;
        let vlen = u16::from_le_bytes(read_array(self.data, pos + 2)) as usize;
        (klen, vlen)
    }

    pub fn key(&self, idx: u16) -> &'a [u8] {
        assert!(
            idx < self.nkeys(),
            "key index {} out of bounds (nkeys={})",
            idx,
            self.nkeys()
        );
        let pos = self.kv_pos(idx);
        let (klen, _) = self.record_lens(pos);
        let start = pos + RECORD_HEADER_SIZE;
        &self.data[start..start + klen]
    }

    pub fn value(&self, idx: u16) -> &'a [u8] {
        assert!(self.is_leaf(), "internal nodes store no values");
        assert!(
            idx < self.nkeys(),
            "value index {} out of bounds (nkeys={})",
            idx,
            self.nkeys()
        );
        let pos = self.kv_pos(idx);
        let (klen, vlen) = self.record_lens(pos);
        let start = pos + RECORD_HEADER_SIZE + klen;
        &self.data[start..start + vlen]
    }

    /// First free byte of the node, i.e. its serialized size.
    pub fn size(&self) -> usize {
        self.kv_pos(self.nkeys())
    }

    pub fn fits_page(&self) -> bool {
        self.size() <= PAGE_SIZE
    }

    /// Largest index whose key is `<= key`.
    ///
    /// Index 0 is never compared: it is the separator copied from the parent
    /// (or the empty sentinel), so it is the answer whenever every other key
    /// is larger than `key`.
    pub fn lookup_le(&self, key: &[u8]) -> u16 {
        let (mut lo, mut hi) = (1u16, self.nkeys());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key(mid) <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo - 1
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

/// Owned node under construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Node {
    data: Vec<u8>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let node = self.as_ref();
        f.debug_struct("Node")
            .field("type", &node.node_type())
            .field("nkeys", &node.nkeys())
            .field("size", &node.size())
            .finish()
    }
}

impl Node {
    /// A one-page buffer, for nodes that can never overflow.
    pub fn page() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE],
        }
    }

    /// A two-page buffer, for nodes that may overflow before being split.
    pub fn scratch() -> Self {
        Self {
            data: vec![0u8; 2 * PAGE_SIZE],
        }
    }

    pub fn from_page(data: Vec<u8>) -> Self {
        assert_eq!(data.len(), PAGE_SIZE, "page must be exactly {} bytes", PAGE_SIZE);
        Self { data }
    }

    pub fn as_ref(&self) -> NodeRef<'_> {
        NodeRef { data: &self.data }
    }

    pub fn set_header(&mut self, node_type: NodeType, nkeys: u16) {
        let header = match NodeHeader::mut_from_prefix(&mut self.data) {
            Ok((header, _)) => header,
            Err(_) => panic!("node buffer too short for header"),
        };
        header.set_node_type(node_type as u16);
        header.set_nkeys(nkeys);
    }

    pub fn set_ptr(&mut self, idx: u16, ptr: u64) {
        let nkeys = self.as_ref().nkeys();
        assert!(idx < nkeys, "pointer index {} out of bounds (nkeys={})", idx, nkeys);
        let pos = pointer_pos(idx);
        self.data[pos..pos + POINTER_SIZE].copy_from_slice(&ptr.to_le_bytes());
    }

    pub fn set_offset(&mut self, idx: u16, offset: u16) {
        let nkeys = self.as_ref().nkeys();
        let pos = offset_pos(nkeys, idx);
        self.data[pos..pos + OFFSET_SIZE].copy_from_slice(&offset.to_le_bytes());
    }

    /// Writes record `idx`. Records must be appended in index order because
    /// each one starts where the previous one's offset entry says.
    pub fn append_kv(&mut self, idx: u16, ptr: u64, key: &[u8], value: &[u8]) {
        self.set_ptr(idx, ptr);

        let pos = self.as_ref().kv_pos(idx);
        let record_len = RECORD_HEADER_SIZE + key.len() + value.len();
        assert!(
            pos + record_len <= self.data.len(),
            "record of {} bytes overflows the node buffer",
            record_len
        );

        self.data[pos..pos + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        self.data[pos + 2..pos + 4].copy_from_slice(&(value.len() as u16).to_le_bytes());
        let key_start = pos + RECORD_HEADER_SIZE;
        self.data[key_start..key_start + key.len()].copy_from_slice(key);
        let value_start = key_start + key.len();
        self.data[value_start..value_start + value.len()].copy_from_slice(value);

        let next = self.as_ref().offset(idx) as usize + record_len;
        self.set_offset(idx + 1, next as u16);
    }

    /// Copies records `src..src + n` of `old` to `dst..dst + n`.
    pub fn append_range(&mut self, old: NodeRef<'_>, dst: u16, src: u16, n: u16) {
        if n == 0 {
            return;
        }
        assert!(
            src + n <= old.nkeys(),
            "source range {}..{} out of bounds (nkeys={})",
            src,
            src + n,
            old.nkeys()
        );
        let nkeys = self.as_ref().nkeys();
        assert!(
            dst + n <= nkeys,
            "destination range {}..{} out of bounds (nkeys={})",
            dst,
            dst + n,
            nkeys
        );

        for i in 0..n {
            self.set_ptr(dst + i, old.ptr(src + i));
        }

        let dst_begin = self.as_ref().offset(dst);
        let src_begin = old.offset(src);
        for i in 1..=n {
            let offset = dst_begin + (old.offset(src + i) - src_begin);
            self.set_offset(dst + i, offset);
        }

        let begin = old.kv_pos(src);
        let end = old.kv_pos(src + n);
        let at = self.as_ref().kv_pos(dst);
        self.data[at..at + (end - begin)].copy_from_slice(&old.data[begin..end]);
    }

    /// Consumes the node and returns its page image. Panics if it does not fit.
    pub fn into_page(mut self) -> Vec<u8> {
        let size = self.as_ref().size();
        assert!(
            size <= PAGE_SIZE,
            "node of {} bytes does not fit in a {} byte page",
            size,
            PAGE_SIZE
        );
        self.data.truncate(PAGE_SIZE);
        self.data
    }

    // ------------------------------------------------------------------------
    // Copy-on-write constructors
    // ------------------------------------------------------------------------

    pub fn leaf_insert(old: NodeRef<'_>, idx: u16, key: &[u8], value: &[u8]) -> Self {
        let n = old.nkeys();
        let mut new = Self::scratch();
        new.set_header(NodeType::Leaf, n + 1);
        new.append_range(old, 0, 0, idx);
        new.append_kv(idx, 0, key, value);
        new.append_range(old, idx + 1, idx, n - idx);
        new
    }

    pub fn leaf_update(old: NodeRef<'_>, idx: u16, key: &[u8], value: &[u8]) -> Self {
        let n = old.nkeys();
        let mut new = Self::scratch();
        new.set_header(NodeType::Leaf, n);
        new.append_range(old, 0, 0, idx);
        new.append_kv(idx, 0, key, value);
        new.append_range(old, idx + 1, idx + 1, n - (idx + 1));
        new
    }

    pub fn leaf_delete(old: NodeRef<'_>, idx: u16) -> Self {
        let n = old.nkeys();
        let mut new = Self::scratch();
        new.set_header(NodeType::Leaf, n - 1);
        new.append_range(old, 0, 0, idx);
        new.append_range(old, idx, idx + 1, n - (idx + 1));
        new
    }

    /// Replaces `replaced` consecutive children of `old` starting at `idx`
    /// with `kids`, each given as (page number, first key).
    pub fn internal_replace(old: NodeRef<'_>, idx: u16, replaced: u16, kids: &[(u64, &[u8])]) -> Self {
        let n = old.nkeys();
        assert!(
            idx + replaced <= n,
            "replacing children {}..{} out of bounds (nkeys={})",
            idx,
            idx + replaced,
            n
        );
        let inc = kids.len() as u16;
        let mut new = Self::scratch();
        new.set_header(NodeType::Internal, n - replaced + inc);
        new.append_range(old, 0, 0, idx);
        for (i, (ptr, key)) in kids.iter().enumerate() {
            new.append_kv(idx + i as u16, *ptr, key, &[]);
        }
        new.append_range(old, idx + inc, idx + replaced, n - (idx + replaced));
        new
    }

    /// Concatenates two siblings of the same type.
    pub fn merge(left: NodeRef<'_>, right: NodeRef<'_>) -> Self {
        assert_eq!(
            left.node_type(),
            right.node_type(),
            "cannot merge nodes of different types"
        );
        let (ln, rn) = (left.nkeys(), right.nkeys());
        let mut new = Self::scratch();
        new.set_header(left.node_type(), ln + rn);
        new.append_range(left, 0, 0, ln);
        new.append_range(right, ln, 0, rn);
        new
    }
}

/// One to three nodes produced from a single candidate node.
pub type Split = SmallVec<[Node; 3]>;

/// Splits `old` into a left and a right node. The right node always fits a
/// page; the left one may still overflow when records are very uneven.
fn split2(old: NodeRef<'_>) -> (Node, Node) {
    let n = old.nkeys();
    assert!(n >= 2, "cannot split a node with {} keys", n);

    let left_bytes = |nleft: u16| records_start(nleft) + old.offset(nleft) as usize;
    let right_bytes = |nleft: u16| old.size() - left_bytes(nleft) + NODE_HEADER_SIZE;

    let mut nleft = n / 2;
    while nleft > 1 && left_bytes(nleft) > PAGE_SIZE {
        nleft -= 1;
    }
    while right_bytes(nleft) > PAGE_SIZE {
        nleft += 1;
    }
    assert!(
        nleft >= 1 && nleft < n,
        "split point {} leaves an empty half (nkeys={})",
        nleft,
        n
    );
    let nright = n - nleft;

    let mut left = Node::scratch();
    left.set_header(old.node_type(), nleft);
    left.append_range(old, 0, 0, nleft);

    let mut right = Node::page();
    right.set_header(old.node_type(), nright);
    right.append_range(old, 0, nleft, nright);

    assert!(right.as_ref().fits_page(), "right half of split overflows");
    (left, right)
}

/// Cuts a candidate node into as many page-sized nodes as needed (1 to 3).
/// Every returned node fits in a page.
pub fn split3(old: Node) -> Split {
    let mut out = Split::new();
    if old.as_ref().fits_page() {
        out.push(old);
        return out;
    }

    let (left, right) = split2(old.as_ref());
    if left.as_ref().fits_page() {
        out.push(left);
        out.push(right);
        return out;
    }

    let (leftleft, middle) = split2(left.as_ref());
    assert!(
        leftleft.as_ref().fits_page(),
        "node of {} bytes still overflows after a three-way split",
        old.as_ref().size()
    );
    out.push(leftleft);
    out.push(middle);
    out.push(right);
    out
}

fn pointer_pos(idx: u16) -> usize {
    NODE_HEADER_SIZE + POINTER_SIZE * idx as usize
}

fn offset_pos(nkeys: u16, idx: u16) -> usize {
    assert!(
        (1..=nkeys).contains(&idx),
        "offset index {} out of bounds (nkeys={})",
        idx,
        nkeys
    );
    NODE_HEADER_SIZE + POINTER_SIZE * nkeys as usize + OFFSET_SIZE * (idx as usize - 1)
}

fn records_start(nkeys: u16) -> usize {
    NODE_HEADER_SIZE + (POINTER_SIZE + OFFSET_SIZE) * nkeys as usize
}

fn read_array<const N: usize>(data: &[u8], pos: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[pos..pos + N]);
    out
}
