//! # Configuration
//!
//! Compile-time constants for the on-disk format and the B+tree limits. Values
//! that depend on each other live side by side in [`constants`] and the
//! relationships between them are enforced with compile-time assertions.
//!
//! Runtime options (file path, creation policy, mmap window size) are set on
//! [`KvBuilder`](crate::KvBuilder).

pub mod constants;
pub use constants::*;
