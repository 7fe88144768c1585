//! # Page I/O Abstraction
//!
//! The tree engine never touches files. Everything it needs from storage is
//! captured by the three operations of [`PageIo`]:
//!
//! ```text
//! fn fetch(&self, page_no: u64) -> &[u8];       // read a committed or pending page
//! fn allocate(&mut self, page: Vec<u8>) -> u64; // store a new page, get its number
//! fn reclaim(&mut self, page_no: u64);          // the page is no longer referenced
//! ```
//!
//! ## Backends
//!
//! | Backend       | Module             | Durable | Page numbers             |
//! |---------------|--------------------|---------|--------------------------|
//! | `PageStore`   | `storage::pager`   | Yes     | file offsets / PAGE_SIZE |
//! | `MemoryPages` | `btree::memory`    | No      | in-memory counter        |
//!
//! Both are interchangeable behind the trait; tree tests run against the
//! in-memory one.
//!
//! ## Infallible by Construction
//!
//! None of the operations return `Result`. `allocate` and `reclaim` only
//! record intent in memory; every byte hits the disk later in
//! `PageStore::commit`, which is where I/O errors surface. A `fetch` of a
//! page number that does not exist means the index is corrupted and panics.

/// Page-level capabilities the B+tree depends on.
pub trait PageIo {
    /// Returns the page image for `page_no`. Panics on an unknown page number.
    fn fetch(&self, page_no: u64) -> &[u8];

    /// Stores a new page and returns its number. `page` must be exactly one
    /// page long.
    fn allocate(&mut self, page: Vec<u8>) -> u64;

    /// Marks `page_no` as no longer referenced by the tree being built.
    fn reclaim(&mut self, page_no: u64);
}

impl<T: PageIo + ?Sized> PageIo for &mut T {
    fn fetch(&self, page_no: u64) -> &[u8] {
        (**self).fetch(page_no)
    }

    fn allocate(&mut self, page: Vec<u8>) -> u64 {
        (**self).allocate(page)
    }

    fn reclaim(&mut self, page_no: u64) {
        (**self).reclaim(page_no)
    }
}
