//! Fragments — immutable (disk) and mutable (memory) ordered cell containers.
//!
//! A fragment is the storage unit a [`Tablet`](crate::tablet::Tablet) stacks:
//! the mutable [`mem::MemFragment`] at the top absorbs writes, and a cascade
//! of immutable [`disk::DiskFragment`]s below it hold everything flushed or
//! compacted so far. Both implement [`Fragment`], so the merge layer
//! ([`merge::FragmentMerge`]) doesn't care which kind it's reading from.

pub mod block_iter;
pub mod disk;
pub mod merge;
pub mod mem;
pub mod writer;

#[cfg(test)]
mod tests;

use std::fmt;

use thiserror::Error;

use crate::cell::{Cell, Predicate};
use crate::encoding::EncodingError;

/// Errors raised while reading, writing, or scanning a fragment.
#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("checksum mismatch in fragment")]
    ChecksumMismatch,

    #[error("fragment is corrupt: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A reference to a fragment's persisted location.
///
/// Disk fragments always use the `disk:` scheme (§6); other schemes are a
/// hook for a future loader registry and are not resolved by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentUri(pub String);

impl FragmentUri {
    pub fn disk(path: impl AsRef<std::path::Path>) -> Self {
        Self(format!("disk:{}", path.as_ref().display()))
    }

    /// The filesystem path backing this URI, if it is a `disk:` URI.
    pub fn disk_path(&self) -> Option<&str> {
        self.0.strip_prefix("disk:")
    }
}

impl fmt::Display for FragmentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Common surface implemented by both disk and memory fragments.
///
/// A fragment is lazily and repeatedly scannable: `scan` can be called any
/// number of times, concurrently, against the same fragment — callers don't
/// need external synchronization to read it (§4.1: "not required to be
/// thread-safe per instance, but distinct scans concurrent").
pub trait Fragment: Send + Sync + fmt::Debug {
    /// Persisted location. Memory fragments use a synthetic `mem:<id>` URI.
    fn uri(&self) -> &FragmentUri;

    /// `true` for disk fragments, `false` for the mutable memory fragment.
    fn is_static(&self) -> bool;

    /// `true` if this fragment is the product of a compaction that covered
    /// the full stack and therefore contains no erasures.
    fn is_final(&self) -> bool;

    fn cell_count(&self) -> u64;

    fn byte_size(&self) -> u64;

    /// Lazily stream cells in global order intersected with `predicate`.
    fn scan(&self, predicate: &Predicate) -> Result<Box<dyn Iterator<Item = Cell> + '_>, FragmentError>;

    /// Downcasting hook so a tablet can recover the concrete `MemFragment`
    /// it knows sits at the bottom of its own stack.
    fn as_any(&self) -> &dyn std::any::Any;
}
