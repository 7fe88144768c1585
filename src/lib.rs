//! # cowkv - Copy-on-Write B+Tree Key-Value Store
//!
//! An embedded, single-process key-value store kept in one file. The index is
//! a B+tree that never modifies a page in place; every write builds a new
//! root-to-leaf path and a commit installs the new root atomically.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cowkv::Kv;
//!
//! let mut kv = Kv::open("./data.db")?;
//! kv.set(b"0", b"first value")?;
//! kv.set(b"1", b"second value")?;
//!
//! assert_eq!(kv.get(b"0"), Some(&b"first value"[..]));
//! assert!(kv.delete(b"0")?);
//!
//! for (key, value) in kv.scan() {
//!     println!("{:?} = {:?}", key, value);
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │          Kv (get/set/delete)        │
//! ├─────────────────────────────────────┤
//! │   BTree engine (COW split/merge)    │
//! ├──────────────────┬──────────────────┤
//! │   Node codec     │  PageIo trait    │
//! ├──────────────────┴──────────────────┤
//! │  PageStore: mmap windows, free list │
//! │  meta page, write-fsync-meta-fsync  │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! | meta (page 0) | free-list node (page 1) | nodes and free-list nodes ... |
//! ```
//!
//! Every page is 4096 bytes. A crash at any point leaves the file at the last
//! completed commit.
//!
//! ## Module Overview
//!
//! - [`config`]: on-disk format constants and limits
//! - [`error`]: `Result` alias and the typed [`KeyError`]
//! - [`btree`]: node codec, tree engine, cursor, in-memory page backend
//! - [`storage`]: page store, meta page, free list, mmap windows
//! - [`kv`]: the [`Kv`] facade and its builder
//!
//! ## Logging
//!
//! The crate emits `tracing` events (open, file growth, commits, rollbacks)
//! and leaves installing a subscriber to the application.

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod error;
pub mod kv;
pub mod storage;

pub use btree::{UpdateMode, UpdateRequest};
pub use error::{KeyError, Result};
pub use kv::{Kv, KvBuilder};
pub use storage::Stats;
