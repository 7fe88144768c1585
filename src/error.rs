//! # Errors
//!
//! Fallible operations return [`eyre::Result`]. I/O failures are wrapped with
//! context (path, page numbers, byte counts) and the original
//! [`std::io::Error`] stays reachable through `Report::downcast_ref`.
//!
//! Input that breaks a size limit is reported with the typed [`KeyError`], so
//! callers can tell it apart from I/O trouble:
//!
//! ```ignore
//! match kv.set(&key, &value) {
//!     Err(e) if e.downcast_ref::<KeyError>().is_some() => { /* reject input */ }
//!     Err(e) => return Err(e),
//!     Ok(()) => {}
//! }
//! ```
//!
//! Broken invariants (a corrupted node, an out-of-range page number, a node
//! that still overflows after splitting) are not errors: they panic, since
//! carrying on would write more damage into the file.

use crate::config::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

pub use eyre::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    KeyTooLarge { len: usize, max: usize },
    ValueTooLarge { len: usize, max: usize },
    /// The empty key is reserved for the sentinel entry of the leftmost leaf.
    EmptyKey,
}

impl KeyError {
    pub fn check(key: &[u8], value: &[u8]) -> std::result::Result<(), KeyError> {
        Self::check_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(KeyError::ValueTooLarge {
                len: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        Ok(())
    }

    pub fn check_key(key: &[u8]) -> std::result::Result<(), KeyError> {
        if key.is_empty() {
            return Err(KeyError::EmptyKey);
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(KeyError::KeyTooLarge {
                len: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::KeyTooLarge { len, max } => {
                write!(f, "key too large: {} bytes exceeds the {} byte limit", len, max)
            }
            KeyError::ValueTooLarge { len, max } => {
                write!(f, "value too large: {} bytes exceeds the {} byte limit", len, max)
            }
            KeyError::EmptyKey => write!(f, "empty keys are reserved"),
        }
    }
}

impl std::error::Error for KeyError {}
