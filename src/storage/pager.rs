//! # Page Store
//!
//! `PageStore` turns page numbers into durable bytes. It is the file-backed
//! [`PageIo`] implementation the tree runs on.
//!
//! ## File Layout
//!
//! ```text
//! page 0        meta record (see `storage::meta`)
//! page 1        first free-list node
//! page 2..      tree nodes and later free-list nodes, in allocation order
//! ```
//!
//! ## Write Path
//!
//! Nothing is written until `commit`. `allocate` picks a page number (a
//! reusable one from the free list, else the next one past the end) and
//! parks the page image in a pending map; free-list node updates are parked
//! there too. `fetch` looks in the pending map before the mmap windows, so
//! the tree can read back nodes it built during the current operation.
//!
//! ## Commit Protocol
//!
//! ```text
//! 1. write pending pages      (positioned writes, file grown as needed)
//! 2. fsync                    data is durable before anything points at it
//! 3. write meta page          new root, page count, free list state
//! 4. fsync                    the meta update itself is durable
//! ```
//!
//! A crash anywhere before step 3 completes leaves the previous meta on disk,
//! and the previous meta only references pages that copy-on-write never
//! touched. If step 1 or 2 returns an error, the in-memory state is rolled
//! back to the last committed meta, the pending pages are discarded and the
//! store stays writable.
//!
//! Once step 3 has been issued the file may hold either meta, so an error in
//! step 3 or 4 leaves the store failed: reads keep serving the last known
//! committed tree, whose pages are intact under both metas, and every later
//! commit is refused until the file is reopened. Reopening settles which
//! meta won.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;

use super::driver::PageIo;
use super::freelist::{empty_node, FreeList, FreePages};
use super::meta::Meta;
use super::mmap::MmapWindows;
use crate::btree::NodeRef;
use crate::config::{INITIAL_FREE_NODE, INITIAL_PAGE_COUNT, META_PAGE, META_SIZE, PAGE_SIZE};

/// Options for [`PageStore::open`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub create_if_missing: bool,
    pub mmap_window: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            mmap_window: crate::config::DEFAULT_MMAP_WINDOW,
        }
    }
}

/// Point-in-time counters of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Root page of the tree (0 when empty).
    pub root: u64,
    /// Pages in use, including the meta page and free-list nodes.
    pub page_count: u64,
    /// Page numbers waiting on the free list.
    pub free_pages: u64,
    /// Bytes covered by mmap windows.
    pub mapped_bytes: usize,
}

/// Commit protocol steps that can be made to fail in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitStep {
    SyncPages,
    WriteMeta,
    SyncMeta,
}

/// File, mappings and pages not yet written.
#[derive(Debug)]
struct Pages {
    file: File,
    path: PathBuf,
    windows: MmapWindows,
    pending: HashMap<u64, Vec<u8>>,
    /// Pages durable on disk.
    flushed: u64,
    /// Pages past `flushed` handed out since the last commit.
    appended: u64,
}

impl Pages {
    fn page_count(&self) -> u64 {
        self.flushed + self.appended
    }

    fn get(&self, page_no: u64) -> &[u8] {
        if let Some(page) = self.pending.get(&page_no) {
            return page;
        }
        assert!(
            page_no < self.flushed,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count()
        );
        match self.windows.page(page_no) {
            Some(page) => page,
            None => panic!("page {} is not mapped", page_no),
        }
    }

    fn next_page(&mut self) -> u64 {
        let page_no = self.page_count();
        self.appended += 1;
        page_no
    }

    fn write_pending(&mut self) -> Result<()> {
        let total = self.page_count();
        self.windows.extend_to(&self.file, &self.path, total)?;

        let mut page_nos: Vec<u64> = self.pending.keys().copied().collect();
        page_nos.sort_unstable();
        for page_no in page_nos {
            write_page(&self.file, &self.path, page_no, &self.pending[&page_no])?;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to fsync '{}'", self.path.display()))
    }
}

impl FreePages for Pages {
    fn read(&self, page_no: u64) -> &[u8] {
        self.get(page_no)
    }

    fn update(&mut self, page_no: u64) -> &mut [u8] {
        if !self.pending.contains_key(&page_no) {
            let page = self.get(page_no).to_vec();
            self.pending.insert(page_no, page);
        }
        match self.pending.get_mut(&page_no) {
            Some(page) => page,
            None => unreachable!("page {} was just buffered", page_no),
        }
    }

    fn write(&mut self, page_no: u64, page: Vec<u8>) {
        self.pending.insert(page_no, page);
    }

    fn append(&mut self, page: Vec<u8>) -> u64 {
        let page_no = self.next_page();
        self.pending.insert(page_no, page);
        page_no
    }
}

fn write_page(file: &File, path: &Path, page_no: u64, page: &[u8]) -> Result<()> {
    let offset = page_no * PAGE_SIZE as u64;
    let mut file = file;
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.write_all(page))
        .wrap_err_with(|| {
            format!(
                "failed to write page {} at offset {} of '{}'",
                page_no,
                offset,
                path.display()
            )
        })
}

#[derive(Debug)]
pub struct PageStore {
    pages: Pages,
    free: FreeList,
    /// The meta record as of the last successful commit.
    meta: Meta,
    /// Set when a meta update failed after being issued.
    failed: bool,
    #[cfg(test)]
    fail_at: Option<CommitStep>,
}

impl PageStore {
    pub fn open<P: AsRef<Path>>(path: P, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create_if_missing)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let mut file_len = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        if file_len == 0 {
            initialize(&file, path)?;
            file_len = INITIAL_PAGE_COUNT * PAGE_SIZE as u64;
            tracing::info!(path = %path.display(), "created database file");
        }

        ensure!(
            file_len % PAGE_SIZE as u64 == 0,
            "database file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_len,
            PAGE_SIZE
        );
        ensure!(
            file_len >= INITIAL_PAGE_COUNT * PAGE_SIZE as u64,
            "database file '{}' is too short ({} bytes)",
            path.display(),
            file_len
        );

        let meta = read_meta(&file, path)?;
        ensure!(
            meta.page_used() * PAGE_SIZE as u64 <= file_len,
            "meta page of '{}' claims {} pages but the file holds {}",
            path.display(),
            meta.page_used(),
            file_len / PAGE_SIZE as u64
        );

        // Mapping may extend the file, so it only happens once the meta
        // page proved this is one of ours.
        let mut windows = MmapWindows::new(options.mmap_window);
        windows.extend_to(&file, path, file_len / PAGE_SIZE as u64)?;

        let free = FreeList::from_meta(&meta);
        tracing::info!(
            path = %path.display(),
            pages = meta.page_used(),
            root = meta.root(),
            free_pages = free.len(),
            "opened database file"
        );

        Ok(Self {
            pages: Pages {
                file,
                path: path.to_path_buf(),
                windows,
                pending: HashMap::new(),
                flushed: meta.page_used(),
                appended: 0,
            },
            free,
            meta,
            failed: false,
            #[cfg(test)]
            fail_at: None,
        })
    }

    /// Root of the last committed tree.
    pub fn root(&self) -> u64 {
        self.meta.root()
    }

    pub fn path(&self) -> &Path {
        &self.pages.path
    }

    pub fn page_count(&self) -> u64 {
        self.pages.page_count()
    }

    /// Changes buffered since the last commit.
    pub fn pending_pages(&self) -> usize {
        self.pages.pending.len()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            root: self.meta.root(),
            page_count: self.page_count(),
            free_pages: self.free.len(),
            mapped_bytes: self.pages.windows.mapped_bytes(),
        }
    }

    /// Makes sure at least `min_bytes` of the file are mapped, growing the
    /// file and adding windows as needed.
    pub fn grow(&mut self, min_bytes: u64) -> Result<()> {
        let pages = min_bytes.div_ceil(PAGE_SIZE as u64);
        self.pages
            .windows
            .extend_to(&self.pages.file, &self.pages.path, pages)
    }

    /// Errors if an earlier meta update failed and the store needs reopening.
    pub fn ensure_writable(&self) -> Result<()> {
        ensure!(
            !self.failed,
            "'{}' had a failed meta update and must be reopened before further writes",
            self.pages.path.display()
        );
        Ok(())
    }

    /// Durably installs `root` together with every page produced since the
    /// last commit.
    ///
    /// On error nothing of the attempt remains in memory. If the error came
    /// after the meta write was issued, the store also refuses further
    /// commits until it is reopened.
    pub fn commit(&mut self, root: u64) -> Result<()> {
        if let Err(err) = self.ensure_writable() {
            self.rollback();
            return Err(err);
        }

        let written = self.pages.pending.len();
        if let Err(err) = self.write_data() {
            tracing::warn!(
                path = %self.pages.path.display(),
                error = %err,
                "commit failed before the meta update, rolling back to last committed state"
            );
            self.rollback();
            return Err(err);
        }

        let mut meta = self.meta;
        meta.set_root(root);
        meta.set_page_used(self.pages.page_count());
        self.free.write_meta(&mut meta);
        meta.seal();

        if let Err(err) = self.write_meta(&meta) {
            tracing::error!(
                path = %self.pages.path.display(),
                error = %err,
                "meta update failed, refusing writes until the file is reopened"
            );
            self.rollback();
            self.failed = true;
            return Err(err.wrap_err("meta update failed; the store must be reopened"));
        }

        self.meta = meta;
        self.pages.flushed = meta.page_used();
        self.pages.appended = 0;
        self.pages.pending.clear();
        self.free.set_max_seq();
        tracing::trace!(root, pages_written = written, page_count = meta.page_used(), "committed");
        Ok(())
    }

    /// Steps 1 and 2: every pending page is durable once this returns.
    fn write_data(&mut self) -> Result<()> {
        self.pages.write_pending()?;
        self.fail_point(CommitStep::SyncPages)?;
        self.pages.sync()
    }

    /// Steps 3 and 4.
    fn write_meta(&self, meta: &Meta) -> Result<()> {
        self.fail_point(CommitStep::WriteMeta)?;
        write_page(&self.pages.file, &self.pages.path, META_PAGE, &meta.to_page())?;
        self.fail_point(CommitStep::SyncMeta)?;
        self.pages.sync()
    }

    #[cfg(test)]
    fn fail_point(&self, step: CommitStep) -> Result<()> {
        if self.fail_at == Some(step) {
            eyre::bail!("injected failure at {:?}", step);
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    fn fail_point(&self, _step: CommitStep) -> Result<()> {
        Ok(())
    }

    /// Discards every change since the last commit.
    pub fn rollback(&mut self) {
        self.free = FreeList::from_meta(&self.meta);
        self.pages.pending.clear();
        self.pages.appended = 0;
    }

    #[cfg(test)]
    pub(crate) fn fail_commit_at(&mut self, step: Option<CommitStep>) {
        self.fail_at = step;
    }
}

fn read_meta(file: &File, path: &Path) -> Result<Meta> {
    let mut bytes = [0u8; META_SIZE];
    let mut file = file;
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_exact(&mut bytes))
        .wrap_err_with(|| format!("failed to read meta page of '{}'", path.display()))?;
    Meta::from_bytes(&bytes).wrap_err_with(|| format!("corrupt meta page in '{}'", path.display()))
}

/// Writes the meta page and the first free-list node of a new file.
fn initialize(file: &File, path: &Path) -> Result<()> {
    write_page(file, path, META_PAGE, &Meta::new().to_page())?;
    write_page(file, path, INITIAL_FREE_NODE, &empty_node())?;
    file.sync_all()
        .wrap_err_with(|| format!("failed to fsync '{}'", path.display()))
}

impl PageIo for PageStore {
    fn fetch(&self, page_no: u64) -> &[u8] {
        self.pages.get(page_no)
    }

    fn allocate(&mut self, page: Vec<u8>) -> u64 {
        assert_eq!(page.len(), PAGE_SIZE, "allocated page must be exactly one page");
        assert!(
            NodeRef::new(&page).fits_page(),
            "allocated node overflows its page"
        );

        let page_no = match self.free.pop(&mut self.pages) {
            Some(page_no) => page_no,
            None => self.pages.next_page(),
        };
        self.pages.pending.insert(page_no, page);
        page_no
    }

    fn reclaim(&mut self, page_no: u64) {
        assert!(
            page_no != META_PAGE && page_no < self.pages.page_count(),
            "reclaiming page {} outside the data range (page_count={})",
            page_no,
            self.pages.page_count()
        );
        self.pages.pending.remove(&page_no);
        self.free.push(&mut self.pages, page_no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{Node, NodeType};
    use tempfile::tempdir;

    fn options() -> StoreOptions {
        StoreOptions {
            create_if_missing: true,
            mmap_window: 16 * PAGE_SIZE,
        }
    }

    fn leaf(tag: u8) -> Vec<u8> {
        let mut node = Node::page();
        node.set_header(NodeType::Leaf, 1);
        node.append_kv(0, 0, &[tag], &[tag; 8]);
        node.into_page()
    }

    #[test]
    fn create_initializes_meta_and_free_node() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");

        let store = PageStore::open(&path, &options()).unwrap();

        assert_eq!(store.root(), 0);
        assert_eq!(store.page_count(), INITIAL_PAGE_COUNT);
        assert_eq!(store.stats().free_pages, 0);
        assert!(store.stats().mapped_bytes >= 16 * PAGE_SIZE);
    }

    #[test]
    fn open_missing_file_without_create_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let options = StoreOptions {
            create_if_missing: false,
            ..options()
        };

        let err = PageStore::open(&path, &options).unwrap_err();

        assert!(err.to_string().contains("failed to open database file"));
        assert!(err.downcast_ref::<std::io::Error>().is_some());
        assert!(!path.exists());
    }

    #[test]
    fn allocated_pages_are_readable_before_commit() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("kv.db"), &options()).unwrap();

        let page_no = store.allocate(leaf(7));

        assert_eq!(page_no, INITIAL_PAGE_COUNT);
        assert_eq!(NodeRef::new(store.fetch(page_no)).key(0), &[7]);
        assert_eq!(store.pending_pages(), 1);
    }

    #[test]
    fn commit_persists_root_and_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");

        let root = {
            let mut store = PageStore::open(&path, &options()).unwrap();
            let root = store.allocate(leaf(9));
            store.commit(root).unwrap();
            assert_eq!(store.pending_pages(), 0);
            root
        };

        let store = PageStore::open(&path, &options()).unwrap();
        assert_eq!(store.root(), root);
        assert_eq!(store.page_count(), INITIAL_PAGE_COUNT + 1);
        assert_eq!(NodeRef::new(store.fetch(root)).value(0), &[9; 8]);
    }

    #[test]
    fn reclaimed_pages_are_reused_only_after_commit() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("kv.db"), &options()).unwrap();
        let first = store.allocate(leaf(1));
        store.commit(first).unwrap();

        let second = store.allocate(leaf(2));
        store.reclaim(first);
        let third = store.allocate(leaf(3));
        assert_ne!(third, first, "page freed in the same operation was reused");
        store.commit(third).unwrap();

        let fourth = store.allocate(leaf(4));
        assert!(fourth == first || fourth == second);
    }

    #[test]
    fn page_allocated_and_reclaimed_before_commit_is_not_written() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("kv.db"), &options()).unwrap();

        let scratch = store.allocate(leaf(1));
        store.reclaim(scratch);

        assert_eq!(store.pending_pages(), 1, "only the free-list node update remains");
        assert_eq!(store.stats().free_pages, 1);
    }

    #[test]
    fn failed_data_sync_rolls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let mut store = PageStore::open(&path, &options()).unwrap();
        let root = store.allocate(leaf(1));
        store.commit(root).unwrap();
        let before = store.stats();

        let new_root = store.allocate(leaf(2));
        store.reclaim(root);
        store.fail_commit_at(Some(CommitStep::SyncPages));
        let err = store.commit(new_root).unwrap_err();

        assert!(err.to_string().contains("injected"));
        assert_eq!(store.stats(), before);
        assert_eq!(store.pending_pages(), 0);
        store.ensure_writable().unwrap();

        store.fail_commit_at(None);
        let retry = store.allocate(leaf(3));
        store.commit(retry).unwrap();
        drop(store);

        let store = PageStore::open(&path, &options()).unwrap();
        assert_eq!(store.root(), retry);
        assert_eq!(NodeRef::new(store.fetch(retry)).key(0), &[3]);
    }

    #[test]
    fn failed_meta_sync_refuses_writes_until_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let mut store = PageStore::open(&path, &options()).unwrap();
        let root = store.allocate(leaf(1));
        store.commit(root).unwrap();

        let written = store.allocate(leaf(2));
        store.reclaim(root);
        store.fail_commit_at(Some(CommitStep::SyncMeta));
        assert!(store.commit(written).is_err());

        // Reads keep serving the last committed tree.
        assert_eq!(store.root(), root);
        assert_eq!(NodeRef::new(store.fetch(root)).key(0), &[1]);
        assert!(store.ensure_writable().is_err());

        // No page may be reused while the file could hold either meta.
        store.fail_commit_at(None);
        let refused = store.allocate(leaf(3));
        let err = store.commit(refused).unwrap_err();
        assert!(err.to_string().contains("must be reopened"));
        assert_eq!(store.root(), root);
        assert_eq!(store.pending_pages(), 0);
        drop(store);

        // The meta write reached the file before the sync failed.
        let mut store = PageStore::open(&path, &options()).unwrap();
        assert_eq!(store.root(), written);
        assert_eq!(NodeRef::new(store.fetch(written)).key(0), &[2]);
        let next = store.allocate(leaf(4));
        store.reclaim(written);
        store.commit(next).unwrap();
    }

    #[test]
    fn failed_meta_write_keeps_old_meta_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let mut store = PageStore::open(&path, &options()).unwrap();
        let root = store.allocate(leaf(1));
        store.commit(root).unwrap();

        let lost = store.allocate(leaf(2));
        store.fail_commit_at(Some(CommitStep::WriteMeta));
        assert!(store.commit(lost).is_err());
        assert!(store.ensure_writable().is_err());
        drop(store);

        let store = PageStore::open(&path, &options()).unwrap();
        assert_eq!(store.root(), root);
        store.ensure_writable().unwrap();
    }

    #[test]
    fn growth_maps_new_windows() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("kv.db"), &options()).unwrap();
        let mapped = store.stats().mapped_bytes;

        let mut last = 0;
        for i in 0..40u8 {
            last = store.allocate(leaf(i));
        }
        store.commit(last).unwrap();

        assert!(store.stats().mapped_bytes > mapped);
        assert_eq!(NodeRef::new(store.fetch(last)).key(0), &[39]);
    }

    #[test]
    fn grow_maps_requested_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let mut store = PageStore::open(&path, &options()).unwrap();

        store.grow(100 * PAGE_SIZE as u64).unwrap();

        assert!(store.stats().mapped_bytes >= 100 * PAGE_SIZE);
        assert!(std::fs::metadata(&path).unwrap().len() >= 100 * PAGE_SIZE as u64);
        assert_eq!(store.page_count(), INITIAL_PAGE_COUNT);
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 10]).unwrap();

        let err = PageStore::open(&path, &options()).unwrap_err();

        assert!(err.to_string().contains("not a multiple of page size"));
    }

    #[test]
    fn rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        std::fs::write(&path, vec![0xAAu8; 4 * PAGE_SIZE]).unwrap();

        let err = PageStore::open(&path, &options()).unwrap_err();

        assert!(format!("{:#}", err).contains("invalid magic"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * PAGE_SIZE as u64);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn fetch_past_end_panics() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("kv.db"), &options()).unwrap();
        store.fetch(99);
    }
}
