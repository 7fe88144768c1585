//! # Free List
//!
//! Reclaimed page numbers are kept in a persistent FIFO queue that lives in
//! ordinary pages. Each queue node holds a link to the next node and a fixed
//! number of page-number slots:
//!
//! ```text
//! Offset  Size      Description
//! ------  --------  ----------------------------------------
//! 0       2         node type (3 = free-list node)
//! 2       6         reserved
//! 8       8         next: page number of the next node (0 = none)
//! 16      8*510     page numbers
//! ```
//!
//! ## Sequence Numbers
//!
//! Every push gets a sequence number one greater than the last, and sequence
//! `s` lives in slot `s % FREE_NODE_CAPACITY` of its node. The queue state is
//! therefore four numbers stored in the meta page:
//!
//! ```text
//!   head_page/head_seq                    tail_page/tail_seq
//!        v                                       v
//!   [ node A: .. 7 9 12 ] -> [ node B: 4 30 31 _ _ _ ]
//!             ^^^^^^^^^ pop         push ^
//! ```
//!
//! ## Reuse Barrier
//!
//! `pop` never passes `max_seq`, the tail sequence at the last commit. Pages
//! reclaimed by the operation in flight are still referenced by the committed
//! tree, so they must not be overwritten before the commit that drops them is
//! durable.
//!
//! ## Node Recycling
//!
//! When the head moves past the last slot of a node, that node is no longer
//! part of the queue and is pushed at the tail like any reclaimed page. When
//! the tail fills a node, the next node comes from the head of the queue if a
//! reusable page exists, and from the end of the file otherwise.
//!
//! ## In-Place Updates
//!
//! Unlike tree pages, queue nodes are updated in place (through the pending
//! page buffer of the store). This is safe: a push only writes slots at or
//! after the committed `tail_seq` and the tail's `next` link, none of which the
//! committed state reads.

use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::meta::Meta;
use crate::config::{FREE_NODE_CAPACITY, FREE_NODE_HEADER_SIZE, PAGE_SIZE, POINTER_SIZE};

/// Type tag of a free-list node; tree nodes use 1 and 2.
pub const FREE_NODE_TYPE: u16 = 3;

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FreeNodeHeader {
    node_type: U16,
    reserved: [u8; 6],
    next: U64,
}

const _: () = assert!(std::mem::size_of::<FreeNodeHeader>() == FREE_NODE_HEADER_SIZE);

impl FreeNodeHeader {
    le_accessors! {
        node_type: u16,
        next: u64,
    }

    fn from_page(page: &[u8]) -> &Self {
        match Self::ref_from_prefix(page) {
            Ok((header, _)) if header.node_type() == FREE_NODE_TYPE => header,
            Ok((header, _)) => panic!("page is not a free-list node (type {})", header.node_type()),
            Err(_) => panic!("page too short for a free-list node header"),
        }
    }

    fn from_page_mut(page: &mut [u8]) -> &mut Self {
        match Self::mut_from_prefix(page) {
            Ok((header, _)) => header,
            Err(_) => panic!("page too short for a free-list node header"),
        }
    }
}

/// Page access the queue needs from the store.
pub trait FreePages {
    /// Current image of a page, including changes not yet committed.
    fn read(&self, page_no: u64) -> &[u8];

    /// Mutable image of a page; the change is written at the next commit.
    fn update(&mut self, page_no: u64) -> &mut [u8];

    /// Replaces the content of a page that is being reused.
    fn write(&mut self, page_no: u64, page: Vec<u8>);

    /// Stores a page past the end of the file and returns its number.
    fn append(&mut self, page: Vec<u8>) -> u64;
}

/// An empty queue node image.
pub fn empty_node() -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    FreeNodeHeader::from_page_mut(&mut page).set_node_type(FREE_NODE_TYPE);
    page
}

fn slot(seq: u64) -> usize {
    (seq % FREE_NODE_CAPACITY as u64) as usize
}

fn slot_pos(seq: u64) -> usize {
    FREE_NODE_HEADER_SIZE + slot(seq) * POINTER_SIZE
}

fn get_slot(page: &[u8], seq: u64) -> u64 {
    FreeNodeHeader::from_page(page);
    let pos = slot_pos(seq);
    let mut bytes = [0u8; POINTER_SIZE];
    bytes.copy_from_slice(&page[pos..pos + POINTER_SIZE]);
    u64::from_le_bytes(bytes)
}

fn set_slot(page: &mut [u8], seq: u64, page_no: u64) {
    FreeNodeHeader::from_page(page);
    let pos = slot_pos(seq);
    page[pos..pos + POINTER_SIZE].copy_from_slice(&page_no.to_le_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    head_page: u64,
    head_seq: u64,
    tail_page: u64,
    tail_seq: u64,
    max_seq: u64,
}

impl FreeList {
    pub fn from_meta(meta: &Meta) -> Self {
        Self {
            head_page: meta.head_page(),
            head_seq: meta.head_seq(),
            tail_page: meta.tail_page(),
            tail_seq: meta.tail_seq(),
            max_seq: meta.tail_seq(),
        }
    }

    pub fn write_meta(&self, meta: &mut Meta) {
        meta.set_head_page(self.head_page);
        meta.set_head_seq(self.head_seq);
        meta.set_tail_page(self.tail_page);
        meta.set_tail_seq(self.tail_seq);
    }

    /// Page numbers in the queue, including ones not yet reusable.
    pub fn len(&self) -> u64 {
        self.tail_seq - self.head_seq
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Page numbers `pop` may hand out before the next commit.
    pub fn reusable(&self) -> u64 {
        self.max_seq - self.head_seq
    }

    /// Makes everything pushed so far reusable. Called once a commit is durable.
    pub fn set_max_seq(&mut self) {
        self.max_seq = self.tail_seq;
    }

    /// Takes a reusable page number from the head, if there is one.
    pub fn pop<P: FreePages + ?Sized>(&mut self, io: &mut P) -> Option<u64> {
        let (page_no, recycled) = self.take(io);
        if let Some(node) = recycled {
            self.push(io, node);
        }
        page_no
    }

    /// Appends `page_no` at the tail.
    pub fn push<P: FreePages + ?Sized>(&mut self, io: &mut P, page_no: u64) {
        set_slot(io.update(self.tail_page), self.tail_seq, page_no);
        self.tail_seq += 1;
        if slot(self.tail_seq) != 0 {
            return;
        }

        let (reused, recycled) = self.take(io);
        let next = match reused {
            Some(next) => {
                io.write(next, empty_node());
                next
            }
            None => io.append(empty_node()),
        };
        FreeNodeHeader::from_page_mut(io.update(self.tail_page)).set_next(next);
        self.tail_page = next;
        tracing::trace!(node = next, seq = self.tail_seq, "free list grew a tail node");

        if let Some(node) = recycled {
            self.push(io, node);
        }
    }

    /// Pops without recycling. Returns the page number and, when the head
    /// node was exhausted, that node's page number.
    fn take<P: FreePages + ?Sized>(&mut self, io: &mut P) -> (Option<u64>, Option<u64>) {
        if self.head_seq == self.max_seq {
            return (None, None);
        }

        let node = io.read(self.head_page);
        let page_no = get_slot(node, self.head_seq);
        self.head_seq += 1;

        let mut recycled = None;
        if slot(self.head_seq) == 0 {
            let next = FreeNodeHeader::from_page(node).next();
            assert_ne!(next, 0, "free list head node {} has no successor", self.head_page);
            recycled = Some(self.head_page);
            self.head_page = next;
        }
        (Some(page_no), recycled)
    }
}
