//! In-memory [`PageIo`] backend.
//!
//! Pages live in a hash map keyed by a monotonically increasing counter. The
//! counter starts at 1 so that 0 keeps meaning "no root". Reclaimed pages are
//! dropped immediately, which makes use-after-reclaim bugs in the tree engine
//! show up as a panic on the next `fetch`.

use hashbrown::HashMap;

use super::node::NodeRef;
use crate::config::PAGE_SIZE;
use crate::storage::PageIo;

#[derive(Debug)]
pub struct MemoryPages {
    pages: HashMap<u64, Vec<u8>>,
    next_page: u64,
    allocated: u64,
    reclaimed: u64,
}

impl MemoryPages {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            next_page: 1,
            allocated: 0,
            reclaimed: 0,
        }
    }

    /// Number of live pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page_no: u64) -> bool {
        self.pages.contains_key(&page_no)
    }

    /// Total `allocate` and `reclaim` calls so far.
    pub fn counters(&self) -> (u64, u64) {
        (self.allocated, self.reclaimed)
    }
}

impl Default for MemoryPages {
    fn default() -> Self {
        Self::new()
    }
}

impl PageIo for MemoryPages {
    fn fetch(&self, page_no: u64) -> &[u8] {
        match self.pages.get(&page_no) {
            Some(page) => page,
            None => panic!("page {} is not allocated", page_no),
        }
    }

    fn allocate(&mut self, page: Vec<u8>) -> u64 {
        assert_eq!(page.len(), PAGE_SIZE, "allocated page must be exactly one page");
        assert!(
            NodeRef::new(&page).fits_page(),
            "allocated node overflows its page"
        );

        let page_no = self.next_page;
        self.next_page += 1;
        self.allocated += 1;
        self.pages.insert(page_no, page);
        page_no
    }

    fn reclaim(&mut self, page_no: u64) {
        assert!(
            self.pages.remove(&page_no).is_some(),
            "reclaiming page {} which is not allocated",
            page_no
        );
        self.reclaimed += 1;
    }
}
