//! # Kv Builder
//!
//! ```ignore
//! let kv = Kv::builder()
//!     .path("./data.db")
//!     .create_if_missing(false)
//!     .mmap_window(16 << 20)
//!     .open()?;
//! ```
//!
//! | Option              | Default  | Description                                  |
//! |---------------------|----------|----------------------------------------------|
//! | `path`              | required | Database file                                |
//! | `create_if_missing` | true     | Create and initialize the file if absent     |
//! | `mmap_window`       | 64 MiB   | First mmap window; later ones double the map |

use std::path::{Path, PathBuf};

use eyre::Result;

use super::Kv;
use crate::storage::{PageStore, StoreOptions};

#[derive(Debug, Clone, Default)]
pub struct KvBuilder {
    path: Option<PathBuf>,
    options: StoreOptions,
}

impl KvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// When false, opening a file that does not exist fails instead of
    /// creating it.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.options.create_if_missing = create;
        self
    }

    /// Size in bytes of the first memory-mapped window. Rounded up to whole
    /// pages.
    pub fn mmap_window(mut self, bytes: usize) -> Self {
        self.options.mmap_window = bytes;
        self
    }

    /// Opens or creates the store.
    ///
    /// # Errors
    ///
    /// Returns an error if no path was given, the file cannot be opened or
    /// created, or it is not a valid database file.
    pub fn open(self) -> Result<Kv> {
        let path = self
            .path
            .ok_or_else(|| eyre::eyre!("no database path configured: call path() before open()"))?;
        let store = PageStore::open(&path, &self.options)?;
        Ok(Kv::with_store(store))
    }
}
