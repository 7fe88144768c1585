//! # Storage Module
//!
//! Maps page numbers to durable bytes in a single file.
//!
//! ## Components
//!
//! - `driver`: the [`PageIo`] trait, the only thing the tree needs from storage
//! - `meta`: the meta record on page 0 (root, page count, free list state)
//! - `mmap`: append-only read-only memory-mapped windows over the file
//! - `freelist`: persistent queue of reclaimed page numbers
//! - `pager`: [`PageStore`], tying the above together with the commit protocol
//!
//! ## Safety Model
//!
//! Slices returned by `fetch` borrow the store immutably. Anything that can
//! add a window or change pending pages needs `&mut`, so the borrow checker
//! rules out a page reference outliving a mutation. Windows are never
//! unmapped while the store is open.
//!
//! ## Durability
//!
//! ```text
//! write pages -> fsync -> write meta -> fsync
//! ```
//!
//! The meta page is the only page ever overwritten with live data. Tree pages
//! are copy-on-write, and free-list nodes are only appended to past the
//! committed tail.

mod driver;
mod freelist;
mod meta;
mod mmap;
mod pager;

pub use driver::PageIo;
pub use freelist::{FreeList, FreePages, FREE_NODE_TYPE};
pub use meta::Meta;
pub use mmap::MmapWindows;
pub use pager::{PageStore, Stats, StoreOptions};

#[cfg(test)]
pub(crate) use pager::CommitStep;
