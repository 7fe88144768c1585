//! # Key-Value Store
//!
//! [`Kv`] is the public face of the crate: a [`BTree`] running on a
//! [`PageStore`], where every successful write is followed by a commit.
//!
//! ```ignore
//! let mut kv = Kv::open("./data.db")?;
//! kv.set(b"hello", b"world")?;
//! assert_eq!(kv.get(b"hello"), Some(&b"world"[..]));
//! assert!(kv.delete(b"hello")?);
//! ```
//!
//! ## Visibility
//!
//! Reads always walk from the root the last commit installed. A write that
//! fails to commit is rolled back in memory, leaving the tree on its previous
//! root. If the failure came before the meta page was touched, the file still
//! holds that state and the handle stays writable. If it came during the meta
//! update, the write's outcome is settled by the next open, and until then
//! every write on this handle fails.
//!
//! ## Limits
//!
//! Keys are 1 to `MAX_KEY_SIZE` bytes and values at most `MAX_VALUE_SIZE`.
//! Violations are reported as [`KeyError`] before anything changes.

mod builder;

use std::path::Path;

pub use builder::KvBuilder;

use crate::btree::{BTree, Iter, TreeStats, UpdateMode, UpdateRequest};
use crate::config::MAX_KEY_SIZE;
use crate::error::{KeyError, Result};
use crate::storage::{PageStore, Stats};

#[derive(Debug)]
pub struct Kv {
    tree: BTree<PageStore>,
}

impl Kv {
    /// Opens the file at `path`, creating it if needed, with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder().path(path).open()
    }

    pub fn builder() -> KvBuilder {
        KvBuilder::new()
    }

    pub(crate) fn with_store(store: PageStore) -> Self {
        let root = store.root();
        Self {
            tree: BTree::with_root(store, root),
        }
    }

    pub fn path(&self) -> &Path {
        self.tree.store().path()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.tree.get(key)
    }

    /// Inserts or replaces `key`.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.update(key, value, UpdateMode::Upsert).map(|_| ())
    }

    /// Writes `key` according to `mode`. Returns whether the store changed.
    pub fn update(&mut self, key: &[u8], value: &[u8], mode: UpdateMode) -> Result<bool> {
        let mut req = UpdateRequest::with_mode(key, value, mode);
        self.apply(&mut req)
    }

    /// Like [`update`](Self::update), but leaves the outcome (`added`,
    /// `updated`, previous value) in `req`.
    pub fn apply(&mut self, req: &mut UpdateRequest<'_>) -> Result<bool> {
        self.tree.store().ensure_writable()?;
        if !self.tree.update(req)? {
            return Ok(false);
        }
        self.commit()?;
        Ok(true)
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        if key.is_empty() {
            eyre::bail!(KeyError::EmptyKey);
        }
        self.tree.store().ensure_writable()?;
        if key.len() > MAX_KEY_SIZE || !self.tree.delete(key) {
            return Ok(false);
        }
        self.commit()?;
        Ok(true)
    }

    /// Every pair in ascending key order.
    pub fn scan(&self) -> Iter<'_, PageStore> {
        self.tree.iter()
    }

    /// Pairs in ascending key order, starting at the first key `>= key`.
    pub fn seek(&self, key: &[u8]) -> Iter<'_, PageStore> {
        self.tree.seek(key)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            root: self.tree.root(),
            ..self.tree.store().stats()
        }
    }

    /// Walks the whole tree and checks its structural invariants.
    pub fn verify(&self) -> Result<TreeStats> {
        self.tree.verify()
    }

    fn commit(&mut self) -> Result<()> {
        let root = self.tree.root();
        if let Err(err) = self.tree.store_mut().commit(root) {
            let committed = self.tree.store().root();
            self.tree.set_root(committed);
            return Err(err);
        }
        Ok(())
    }
}
