//! # Copy-on-Write B+Tree
//!
//! The index is a B+tree whose nodes are whole pages. It never updates a page
//! in place: each write produces new nodes for the root-to-leaf path it
//! touches and releases the old ones.
//!
//! ## Node Types
//!
//! - **Leaf nodes** hold key/value pairs in ascending key order.
//! - **Internal nodes** hold one `(first key, child page)` entry per child.
//!   Entry `i`'s key is the smallest key in child `i`'s subtree.
//!
//! The leftmost leaf always starts with the empty key. That sentinel is an
//! internal detail; it cannot be written, read or iterated over.
//!
//! ## Module Organization
//!
//! - `node`: byte layout of a node, copy-on-write constructors, `split3`
//! - `tree`: lookup, insert/update, delete with merge and borrow
//! - `iter`: ordered cursor with seek
//! - `memory`: in-memory page backend used by tests and benchmarks
//!
//! ## Page Access
//!
//! The tree reaches pages only through [`PageIo`](crate::storage::PageIo),
//! so the same engine runs over the file-backed store and the in-memory
//! backend.

mod iter;
mod memory;
mod node;
mod tree;

pub use iter::Iter;
pub use memory::MemoryPages;
pub use node::{split3, Node, NodeRef, NodeType, Split};
pub use tree::{BTree, TreeStats, UpdateMode, UpdateRequest};
