//! # Meta Page
//!
//! Page 0 holds a single fixed-size record describing the committed state of
//! the file. Writing it is the commit point: everything it references was
//! fsynced before it, and it is fsynced again before `commit` returns.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------------
//! 0       16    magic       "cowkv btree\0\0\0\0\0"
//! 16      4     version
//! 20      4     page_size
//! 24      8     root        page number of the tree root (0 = empty)
//! 32      8     page_used   pages in use, meta and free-list nodes included
//! 40      8     head_page   free list: node holding the next page to reuse
//! 48      8     head_seq
//! 56      8     tail_page   free list: node receiving reclaimed pages
//! 64      8     tail_seq
//! 72      4     checksum    crc32 over bytes 0..72
//! 76      20    reserved
//! ```
//!
//! All integers are little-endian. The remainder of page 0 is zero.

use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    CURRENT_VERSION, INITIAL_FREE_NODE, INITIAL_PAGE_COUNT, META_MAGIC, META_SIZE, PAGE_SIZE,
};

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const CHECKSUM_OFFSET: usize = 72;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Meta {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    root: U64,
    page_used: U64,
    head_page: U64,
    head_seq: U64,
    tail_page: U64,
    tail_seq: U64,
    checksum: U32,
    reserved: [u8; 20],
}

const _: () = assert!(std::mem::size_of::<Meta>() == META_SIZE);

impl Meta {
    /// Meta of a freshly created file: empty tree, one empty free-list node.
    pub fn new() -> Self {
        let mut meta = Self {
            magic: *META_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(PAGE_SIZE as u32),
            root: U64::new(0),
            page_used: U64::new(INITIAL_PAGE_COUNT),
            head_page: U64::new(INITIAL_FREE_NODE),
            head_seq: U64::new(0),
            tail_page: U64::new(INITIAL_FREE_NODE),
            tail_seq: U64::new(0),
            checksum: U32::new(0),
            reserved: [0u8; 20],
        };
        meta.seal();
        meta
    }

    /// Parses and validates the meta record at the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= META_SIZE,
            "buffer too small for meta page: {} < {}",
            bytes.len(),
            META_SIZE
        );

        let meta = Self::read_from_bytes(&bytes[..META_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse meta page: {:?}", e))?;

        ensure!(&meta.magic == META_MAGIC, "invalid magic bytes in meta page");
        ensure!(
            meta.version() == CURRENT_VERSION,
            "unsupported version: {} (expected {})",
            meta.version(),
            CURRENT_VERSION
        );
        ensure!(
            meta.checksum() == meta.compute_checksum(),
            "meta page checksum mismatch: stored {:#010x}, computed {:#010x}",
            meta.checksum(),
            meta.compute_checksum()
        );
        ensure!(
            meta.page_size() as usize == PAGE_SIZE,
            "unsupported page size: {} (expected {})",
            meta.page_size(),
            PAGE_SIZE
        );
        ensure!(
            meta.page_used() >= INITIAL_PAGE_COUNT,
            "meta page reports {} pages in use, fewer than a fresh file",
            meta.page_used()
        );
        ensure!(
            meta.root() < meta.page_used()
                && meta.head_page() < meta.page_used()
                && meta.tail_page() < meta.page_used(),
            "meta page references a page beyond page_used={}",
            meta.page_used()
        );
        ensure!(
            meta.head_seq() <= meta.tail_seq(),
            "free list head seq {} is past tail seq {}",
            meta.head_seq(),
            meta.tail_seq()
        );

        Ok(meta)
    }

    /// Recomputes the checksum after the fields were changed.
    pub fn seal(&mut self) {
        self.checksum = U32::new(self.compute_checksum());
    }

    /// Full page image: the record followed by zeroes.
    pub fn to_page(&self) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[..META_SIZE].copy_from_slice(self.as_bytes());
        page
    }

    fn compute_checksum(&self) -> u32 {
        CHECKSUM.checksum(&self.as_bytes()[..CHECKSUM_OFFSET])
    }

    le_accessors! {
        version: u32,
        page_size: u32,
        root: u64,
        page_used: u64,
        head_page: u64,
        head_seq: u64,
        tail_page: u64,
        tail_seq: u64,
        checksum: u32,
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_meta_is_valid() {
        let meta = Meta::new();

        let parsed = Meta::from_bytes(&meta.to_page()).unwrap();

        assert_eq!(parsed, meta);
        assert_eq!(parsed.root(), 0);
        assert_eq!(parsed.page_used(), INITIAL_PAGE_COUNT);
        assert_eq!(parsed.head_page(), INITIAL_FREE_NODE);
        assert_eq!(parsed.tail_page(), INITIAL_FREE_NODE);
    }

    #[test]
    fn fields_survive_encoding() {
        let mut meta = Meta::new();
        meta.set_page_used(1000);
        meta.set_root(17);
        meta.set_head_page(3);
        meta.set_head_seq(510);
        meta.set_tail_page(900);
        meta.set_tail_seq(2000);
        meta.seal();

        let parsed = Meta::from_bytes(&meta.to_page()).unwrap();

        assert_eq!(parsed.root(), 17);
        assert_eq!(parsed.head_seq(), 510);
        assert_eq!(parsed.tail_page(), 900);
        assert_eq!(parsed.tail_seq(), 2000);
    }

    #[test]
    fn layout_is_little_endian_at_fixed_offsets() {
        let mut meta = Meta::new();
        meta.set_root(0x0102);
        meta.seal();

        let page = meta.to_page();

        assert_eq!(&page[..16], META_MAGIC);
        assert_eq!(&page[24..32], &0x0102u64.to_le_bytes());
        assert!(page[META_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut page = Meta::new().to_page();
        page[0] = b'X';

        let err = Meta::from_bytes(&page).unwrap_err();

        assert!(err.to_string().contains("invalid magic"));
    }

    #[test]
    fn rejects_flipped_bit() {
        let mut page = Meta::new().to_page();
        page[30] ^= 0x40;

        let err = Meta::from_bytes(&page).unwrap_err();

        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn rejects_unsealed_change() {
        let mut meta = Meta::new();
        meta.set_root(1);

        assert!(Meta::from_bytes(&meta.to_page()).is_err());
    }

    #[test]
    fn rejects_root_beyond_page_used() {
        let mut meta = Meta::new();
        meta.set_root(5);
        meta.seal();

        let err = Meta::from_bytes(&meta.to_page()).unwrap_err();

        assert!(err.to_string().contains("beyond page_used"));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(Meta::from_bytes(&[0u8; 10]).is_err());
    }
}
