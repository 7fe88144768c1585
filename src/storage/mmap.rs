//! # Memory-Mapped Windows
//!
//! Committed pages are read through read-only memory maps. Instead of
//! remapping the whole file when it grows, new windows are appended after the
//! existing ones, so a `&[u8]` handed out by [`MmapWindows::page`] stays valid
//! for as long as the borrow of the windows lasts:
//!
//! ```text
//! file:     | window 0 (64 MiB)  | window 1 (64 MiB) | window 2 (128 MiB)  ...
//! mapped:   |<------ 64 ------>|<------ 128 ----->|<-------- 256 -------->
//! ```
//!
//! The first window covers `max(file length, initial window)`; every later
//! window doubles the total mapped size. The file is extended with `set_len`
//! before a window is mapped over it, so every mapped byte is backed by the
//! file.
//!
//! Pages are never written through the maps. All writes go through positioned
//! file writes in the pager, which the shared mapping observes through the OS
//! page cache.

use std::fs::File;
use std::path::Path;

use eyre::{Result, WrapErr};
use memmap2::{Mmap, MmapOptions};

use crate::config::PAGE_SIZE;

#[derive(Debug)]
struct Window {
    first_page: u64,
    map: Mmap,
}

impl Window {
    fn pages(&self) -> u64 {
        (self.map.len() / PAGE_SIZE) as u64
    }
}

#[derive(Debug)]
pub struct MmapWindows {
    windows: Vec<Window>,
    initial: usize,
    mapped: usize,
}

impl MmapWindows {
    /// `initial` is rounded up to whole pages; it is at least one page.
    pub fn new(initial: usize) -> Self {
        let initial = initial.max(PAGE_SIZE).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        Self {
            windows: Vec::new(),
            initial,
            mapped: 0,
        }
    }

    pub fn mapped_bytes(&self) -> usize {
        self.mapped
    }

    pub fn mapped_pages(&self) -> u64 {
        (self.mapped / PAGE_SIZE) as u64
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Returns the mapped page, or `None` if it lies past the mapped range.
    pub fn page(&self, page_no: u64) -> Option<&[u8]> {
        let window = self
            .windows
            .iter()
            .find(|w| page_no >= w.first_page && page_no < w.first_page + w.pages())?;
        let offset = (page_no - window.first_page) as usize * PAGE_SIZE;
        Some(&window.map[offset..offset + PAGE_SIZE])
    }

    /// Maps new windows until `pages` pages are covered, extending the file
    /// first where it is shorter than the mapped range.
    pub fn extend_to(&mut self, file: &File, path: &Path, pages: u64) -> Result<()> {
        let needed = pages as usize * PAGE_SIZE;
        while self.mapped < needed {
            let len = if self.windows.is_empty() {
                let file_len = file
                    .metadata()
                    .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
                    .len() as usize;
                let file_len = file_len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
                file_len.max(self.initial)
            } else {
                self.mapped
            };
            self.map_window(file, path, len)?;
        }
        Ok(())
    }

    fn map_window(&mut self, file: &File, path: &Path, len: usize) -> Result<()> {
        let start = self.mapped as u64;
        let end = start + len as u64;

        let file_len = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();
        if file_len < end {
            file.set_len(end)
                .wrap_err_with(|| format!("failed to extend '{}' to {} bytes", path.display(), end))?;
            tracing::debug!(path = %path.display(), from = file_len, to = end, "extended file");
        }

        // SAFETY: Mmap::map is unsafe because the file could be truncated or
        // modified by another process while mapped. This is sound because:
        // 1. The file was just extended to cover [start, end), and the store
        //    never shrinks it
        // 2. The map is read-only; the store writes through the file handle,
        //    which the shared mapping observes
        // 3. Slices into the map are tied to a borrow of `self`, and windows are
        //    only ever appended, never unmapped while the store is alive
        let map = unsafe {
            MmapOptions::new()
                .offset(start)
                .len(len)
                .map(file)
                .wrap_err_with(|| {
                    format!(
                        "failed to memory-map '{}' at offset {} ({} bytes)",
                        path.display(),
                        start,
                        len
                    )
                })?
        };

        self.windows.push(Window {
            first_page: start / PAGE_SIZE as u64,
            map,
        });
        self.mapped += len;
        tracing::debug!(
            path = %path.display(),
            offset = start,
            len,
            windows = self.windows.len(),
            "mapped new window"
        );
        Ok(())
    }
}
