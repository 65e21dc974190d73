//! `MemFragment` — the mutable append buffer at the top of a tablet's stack.
//!
//! A lock-protected ordered map that resolves to "latest version wins" on
//! read. This type does not own a WAL handle — durability is the shared,
//! process-wide [`SharedLogger`](crate::wal::SharedLogger)'s job; a
//! `MemFragment` is purely the in-memory half of that contract.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use super::{Fragment, FragmentError, FragmentUri};
use crate::cell::{Cell, Predicate};

/// Key a cell is stored under: `(row, column, Reverse(timestamp))` so that,
/// for a fixed `(row, column)`, the newest version iterates first.
type CellKey = (Vec<u8>, Vec<u8>, Reverse<i64>);

#[derive(Debug, Default)]
struct Inner {
    cells: BTreeMap<CellKey, Option<Vec<u8>>>,
    approximate_size: usize,
}

/// Mutable, in-memory fragment. Appends are O(log n); scans sort-merge the
/// map on demand (the map is already sorted in cell order, so this is a
/// filtered linear walk, not an actual sort).
#[derive(Debug)]
pub struct MemFragment {
    uri: FragmentUri,
    inner: RwLock<Inner>,
    next_seq: AtomicU64,
}

impl MemFragment {
    pub fn new(id: u64) -> Self {
        Self {
            uri: FragmentUri(format!("mem:{id}")),
            inner: RwLock::new(Inner::default()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Record a put. Last writer at an identical `(row, column, timestamp)`
    /// wins: within one mutable buffer there is no "stack order" to
    /// arbitrate duplicates by, only arrival order, which resolves
    /// naturally to "last write wins".
    pub fn put(&self, row: &[u8], column: &[u8], timestamp: i64, value: Vec<u8>) {
        let mut inner = self.inner.write().expect("MemFragment lock poisoned");
        inner.approximate_size += row.len() + column.len() + value.len() + 24;
        inner
            .cells
            .insert((row.to_vec(), column.to_vec(), Reverse(timestamp)), Some(value));
        self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn erase(&self, row: &[u8], column: &[u8], timestamp: i64) {
        let mut inner = self.inner.write().expect("MemFragment lock poisoned");
        inner.approximate_size += row.len() + column.len() + 16;
        inner
            .cells
            .insert((row.to_vec(), column.to_vec(), Reverse(timestamp)), None);
        self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn approximate_size(&self) -> usize {
        self.inner.read().expect("MemFragment lock poisoned").approximate_size
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("MemFragment lock poisoned").cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("MemFragment lock poisoned").cells.len()
    }

    /// Materialize every cell in global order, for flushing to disk via a
    /// [`FragmentWriter`](super::writer::FragmentWriter).
    pub fn iter_for_flush(&self) -> Vec<Cell> {
        let inner = self.inner.read().expect("MemFragment lock poisoned");
        inner
            .cells
            .iter()
            .map(|((row, column, Reverse(timestamp)), value)| Cell {
                row: row.clone(),
                column: column.clone(),
                timestamp: *timestamp,
                value: value.clone(),
            })
            .collect()
    }
}

impl Fragment for MemFragment {
    fn uri(&self) -> &FragmentUri {
        &self.uri
    }

    fn is_static(&self) -> bool {
        false
    }

    fn is_final(&self) -> bool {
        false
    }

    fn cell_count(&self) -> u64 {
        self.len() as u64
    }

    fn byte_size(&self) -> u64 {
        self.approximate_size() as u64
    }

    fn scan(&self, predicate: &Predicate) -> Result<Box<dyn Iterator<Item = Cell> + '_>, FragmentError> {
        let cells = self.iter_for_flush();
        let predicate = predicate.clone();
        Ok(Box::new(cells.into_iter().filter(move |c| predicate.matches(c))))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// An immutable point-in-time copy of a [`MemFragment`]'s contents.
///
/// Scanners snapshot the mutable fragment into one of these at open/reopen
/// time rather than reading it live, so a write that lands after a scanner
/// is opened is not visible to it (§5's "snapshot taken after the
/// mutation's memfrag append returns" ordering guarantee) — without this,
/// scanning the same `MemFragment` object twice in a row could observe two
/// different answers for an already-delivered cursor position.
#[derive(Debug)]
pub struct MemSnapshot {
    uri: FragmentUri,
    cells: Vec<Cell>,
}

impl MemSnapshot {
    pub fn capture(source: &MemFragment) -> Self {
        Self {
            uri: source.uri.clone(),
            cells: source.iter_for_flush(),
        }
    }
}

impl Fragment for MemSnapshot {
    fn uri(&self) -> &FragmentUri {
        &self.uri
    }

    fn is_static(&self) -> bool {
        false
    }

    fn is_final(&self) -> bool {
        false
    }

    fn cell_count(&self) -> u64 {
        self.cells.len() as u64
    }

    fn byte_size(&self) -> u64 {
        self.cells.iter().map(|c| c.row.len() + c.column.len() + c.value.as_ref().map_or(0, Vec::len) + 24).sum::<usize>() as u64
    }

    fn scan(&self, predicate: &Predicate) -> Result<Box<dyn Iterator<Item = Cell> + '_>, FragmentError> {
        let predicate = predicate.clone();
        Ok(Box::new(self.cells.iter().filter(move |c| predicate.matches(c)).cloned()))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
