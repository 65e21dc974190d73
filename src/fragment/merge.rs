//! `FragmentMerge` — k-way merge across a tablet's fragment stack.
//!
//! Heap-based k-way merge of sorted cell streams, fused with a shadowing
//! pass that turns raw MVCC records into the versions a reader should
//! actually see: under the `(row, column, timestamp)` ordering and
//! erasure-shadowing rule of §4.1, an erasure at `(row, column, ts)` shadows
//! every older version of that `(row, column)` pair, not just one with a
//! matching timestamp — and not just the cells immediately following it;
//! the shadow stays in effect for the rest of that key's run even if the
//! erasure itself wasn't the newest version.
//!
//! Sources are given newest-first (the mutable fragment is source 0). When
//! two sources produce a cell with an identical `(row, column, timestamp)`
//! key — the duplicate-timestamp case §8 calls out — the cell from the
//! numerically smaller source index wins, since it sits higher in the stack,
//! and every later cursor producing that same key is dropped outright.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::{Fragment, FragmentError};
use crate::cell::{Cell, Predicate};

struct HeapEntry<'a> {
    cell: Cell,
    source_idx: usize,
    iter: Box<dyn Iterator<Item = Cell> + 'a>,
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (cell order, then stack position): reverse so the
        // smallest cell / newest-stack source pops first.
        self.cell
            .cmp(&other.cell)
            .then_with(|| self.source_idx.cmp(&other.source_idx))
            .reverse()
    }
}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell && self.source_idx == other.source_idx
    }
}

impl Eq for HeapEntry<'_> {}

/// Merges a tablet's fragment stack into a single ordered, de-duplicated,
/// erasure-resolved cell stream.
pub struct FragmentMerge<'a> {
    heap: BinaryHeap<HeapEntry<'a>>,
    /// `(row, column)` of the key currently in progress, set on the first
    /// cell of a run and cleared on the next key transition.
    current_key: Option<(Vec<u8>, Vec<u8>)>,
    /// Timestamp of the most recent erasure seen for `current_key`, if any.
    /// Every later cell of that key with `timestamp <= erasure_floor` is
    /// shadowed, regardless of how many cells separate it from the erasure.
    erasure_floor: Option<i64>,
    /// Full `(row, column, timestamp)` of the last cell considered, used to
    /// collapse an identical key surfacing from a second fragment into the
    /// first (topmost-stack) occurrence.
    last_seen: Option<(Vec<u8>, Vec<u8>, i64)>,
    /// Whether to emit erasure cells themselves, or silently drop them once
    /// they've done their shadowing work (set when compacting a stack with
    /// nothing older left to shadow).
    retain_erasures: bool,
}

impl<'a> FragmentMerge<'a> {
    /// `fragments` must be ordered newest-first (top of stack first).
    pub fn new(
        fragments: &'a [std::sync::Arc<dyn Fragment>],
        predicate: &Predicate,
        retain_erasures: bool,
    ) -> Result<Self, FragmentError> {
        let mut heap = BinaryHeap::new();
        for (idx, frag) in fragments.iter().enumerate() {
            let mut iter = frag.scan(predicate)?;
            if let Some(cell) = iter.next() {
                heap.push(HeapEntry {
                    cell,
                    source_idx: idx,
                    iter,
                });
            }
        }
        Ok(Self {
            heap,
            current_key: None,
            erasure_floor: None,
            last_seen: None,
            retain_erasures,
        })
    }

    fn pop_raw(&mut self) -> Option<Cell> {
        let mut entry = self.heap.pop()?;
        let result = entry.cell.clone();
        if let Some(next) = entry.iter.next() {
            self.heap.push(HeapEntry {
                cell: next,
                source_idx: entry.source_idx,
                iter: entry.iter,
            });
        }
        Some(result)
    }
}

impl Iterator for FragmentMerge<'_> {
    type Item = Cell;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cell = self.pop_raw()?;

            // A second cursor producing the exact (row, column, timestamp)
            // already considered is a duplicate from another fragment; the
            // first one through (topmost stack, per the heap tie-break) wins.
            let is_duplicate = self
                .last_seen
                .as_ref()
                .is_some_and(|(row, column, ts)| *row == cell.row && *column == cell.column && *ts == cell.timestamp);
            if is_duplicate {
                continue;
            }
            self.last_seen = Some((cell.row.clone(), cell.column.clone(), cell.timestamp));

            let same_key = self
                .current_key
                .as_ref()
                .is_some_and(|(row, column)| *row == cell.row && *column == cell.column);
            if !same_key {
                self.current_key = Some((cell.row.clone(), cell.column.clone()));
                self.erasure_floor = None;
            }

            let shadowed = same_key && self.erasure_floor.is_some_and(|floor| cell.timestamp <= floor);
            if shadowed {
                continue;
            }

            if cell.is_erasure() {
                self.erasure_floor = Some(cell.timestamp);
            }

            if cell.is_erasure() && !self.retain_erasures {
                continue;
            }

            return Some(cell);
        }
    }
}
