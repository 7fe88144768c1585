//! # Format Constants
//!
//! All numeric constants of the file format live here. Several of them are
//! coupled, so they are grouped and the couplings are checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> NODE_HEADER_SIZE (4 bytes: type + nkeys)
//!       │     │
//!       │     └─> MAX_KEY_SIZE + MAX_VALUE_SIZE
//!       │           header + 1 pointer + 1 offset + 1 record header + the
//!       │           largest key and value must fit in a single page, otherwise
//!       │           a split could produce a node that never fits
//!       │
//!       ├─> FREE_NODE_HEADER_SIZE (16 bytes: type + reserved + next)
//!       │     │
//!       │     └─> FREE_NODE_CAPACITY (derived: page numbers per free-list node)
//!       │
//!       └─> META_SIZE (bytes of page 0 used by the meta record)
//! ```
//!
//! ## Page Numbers
//!
//! Page 0 is always the meta page and page 1 is the free-list node created
//! together with the file. A root pointer of 0 therefore never names a real
//! node and is used as the "empty tree" marker.

// ============================================================================
// PAGE LAYOUT
// ============================================================================

/// Size of every page in the file, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// `[type:2B][nkeys:2B]` at the start of every B+tree node.
pub const NODE_HEADER_SIZE: usize = 4;

/// Each child pointer slot is a little-endian u64 page number.
pub const POINTER_SIZE: usize = 8;

/// Each offset table entry is a little-endian u16.
pub const OFFSET_SIZE: usize = 2;

/// `[keylen:2B][vallen:2B]` preceding every key/value record.
pub const RECORD_HEADER_SIZE: usize = 4;

const _: () = assert!(
    PAGE_SIZE <= u16::MAX as usize + 1,
    "node offsets are u16, so a page must be addressable with 16 bits"
);

// ============================================================================
// KEY / VALUE LIMITS
// ============================================================================

/// Largest key accepted by `set`.
pub const MAX_KEY_SIZE: usize = 1000;

/// Largest value accepted by `set`.
pub const MAX_VALUE_SIZE: usize = 3000;

/// Serialized size of a node holding a single maximal record.
pub const MAX_SINGLE_RECORD_NODE: usize = NODE_HEADER_SIZE
    + POINTER_SIZE
    + OFFSET_SIZE
    + RECORD_HEADER_SIZE
    + MAX_KEY_SIZE
    + MAX_VALUE_SIZE;

const _: () = assert!(
    MAX_SINGLE_RECORD_NODE <= PAGE_SIZE,
    "a node holding one maximal key/value record must fit in a page"
);

/// Nodes at or below this size after a deletion try to merge with a sibling.
pub const MERGE_THRESHOLD: usize = PAGE_SIZE / 4;

/// Deepest tree the cursor keeps on its inline path stack before spilling.
pub const MAX_TREE_DEPTH: usize = 8;

// ============================================================================
// FREE LIST
// ============================================================================

/// `[type:2B][reserved:6B][next:8B]` at the start of every free-list node.
pub const FREE_NODE_HEADER_SIZE: usize = 16;

/// Page numbers stored in one free-list node.
pub const FREE_NODE_CAPACITY: usize = (PAGE_SIZE - FREE_NODE_HEADER_SIZE) / POINTER_SIZE;

const _: () = assert!(FREE_NODE_CAPACITY > 1, "a free-list node must hold page numbers");

// ============================================================================
// META PAGE
// ============================================================================

/// Page number of the meta page.
pub const META_PAGE: u64 = 0;

/// Page number of the free-list node written when a file is created.
pub const INITIAL_FREE_NODE: u64 = 1;

/// Pages present in a freshly created file (meta + first free-list node).
pub const INITIAL_PAGE_COUNT: u64 = 2;

/// Bytes of page 0 occupied by the meta record.
pub const META_SIZE: usize = 96;

pub const META_MAGIC: &[u8; 16] = b"cowkv btree\x00\x00\x00\x00\x00";

pub const CURRENT_VERSION: u32 = 1;

const _: () = assert!(META_SIZE <= PAGE_SIZE);

// ============================================================================
// MMAP
// ============================================================================

/// Size of the first memory-mapped window for a fresh or small file (64 MiB).
/// Each later window doubles the total mapped size.
pub const DEFAULT_MMAP_WINDOW: usize = 64 << 20;
