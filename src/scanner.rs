//! `Scanner` and `SuperScanner` — predicate-scoped readers that survive
//! stack changes underneath them (§4.5).
//!
//! A scan resumes from a `(row, column, timestamp)` position rather than
//! holding a live borrow into the data it's reading. Grounded on
//! `original_source/.../server/ScannerI.cc`'s `inUse` flag for the
//! single-flight `ScannerBusy` contract, plus `Tablet.cc`/`SuperTablet.cc`'s
//! `ReopenScannerOrRemove` walk of a weak scanner list.
//!
//! A scanner never holds a borrowed merge iterator across calls — each
//! `scan_more` rebuilds a fresh [`FragmentMerge`] over the scanner's current
//! stack snapshot and fast-forwards past everything already delivered.
//! `reopen` is then just "replace the stack snapshot"; the next
//! `scan_more` picks the new stack up automatically at the same cursor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use tracing::{debug, trace};

use crate::cell::{Cell, Predicate};
use crate::fragment::merge::FragmentMerge;
use crate::fragment::{Fragment, FragmentError};
use crate::tablet::TabletError;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("scanner is busy serving a concurrent scanMore")]
    Busy,

    #[error("fragment error: {0}")]
    Fragment(#[from] FragmentError),

    #[error("tablet error: {0}")]
    Tablet(Box<TabletError>),
}

impl From<TabletError> for ScannerError {
    fn from(err: TabletError) -> Self {
        ScannerError::Tablet(Box::new(err))
    }
}

#[derive(Debug)]
struct HistoryState {
    row: Vec<u8>,
    column: Vec<u8>,
    count: usize,
}

/// One materialization of a merge stream over a snapshot of a tablet's
/// fragment stack (§4.5). Cheap to reopen: the stack snapshot is a plain
/// `Arc` swap, and the read cursor is just the last cell position looked at.
#[derive(Debug)]
pub struct Scanner {
    predicate: Predicate,
    max_history: usize,
    retain_erasures: bool,
    stack: Mutex<Arc<Vec<Arc<dyn Fragment>>>>,
    /// Last cell position examined (delivered or history-skipped); the next
    /// `scan_more` resumes strictly after it.
    cursor: Mutex<Option<Cell>>,
    history: Mutex<Option<HistoryState>>,
    in_use: AtomicBool,
}

impl Scanner {
    pub fn new(stack: Arc<Vec<Arc<dyn Fragment>>>, predicate: Predicate, max_history: usize, retain_erasures: bool) -> Arc<Self> {
        Arc::new(Self {
            predicate,
            max_history,
            retain_erasures,
            stack: Mutex::new(stack),
            cursor: Mutex::new(None),
            history: Mutex::new(None),
            in_use: AtomicBool::new(false),
        })
    }

    /// Replace the stack snapshot this scanner reads from. Called by the
    /// owning tablet after every stack swap; safe to call while a batch is
    /// in flight — it only takes effect on the *next* `scan_more`.
    pub fn reopen(&self, stack: Arc<Vec<Arc<dyn Fragment>>>) {
        *self.stack.lock().unwrap() = stack;
        trace!("scanner reopened against new fragment stack");
    }

    /// Pull up to `max_cells` cells. Returns `(cells, complete)` where
    /// `complete` is true once the underlying merge stream is exhausted.
    /// Concurrent calls on the same handle fail with [`ScannerError::Busy`].
    pub fn scan_more(&self, max_cells: usize) -> Result<(Vec<Cell>, bool), ScannerError> {
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(ScannerError::Busy);
        }
        let result = self.scan_more_inner(max_cells);
        self.in_use.store(false, Ordering::SeqCst);
        result
    }

    fn scan_more_inner(&self, max_cells: usize) -> Result<(Vec<Cell>, bool), ScannerError> {
        let stack = self.stack.lock().unwrap().clone();
        let mut cursor = self.cursor.lock().unwrap();
        let mut history = self.history.lock().unwrap();

        let merge = FragmentMerge::new(&stack, &self.predicate, self.retain_erasures)?;
        let mut out = Vec::new();
        let mut complete = true;

        for cell in merge {
            if let Some(seen) = cursor.as_ref() {
                if cell.cmp(seen) != std::cmp::Ordering::Greater {
                    continue;
                }
            }

            *cursor = Some(cell.clone());

            let within_history = self.max_history == 0 || {
                let count = match history.as_mut() {
                    Some(h) if h.row == cell.row && h.column == cell.column => {
                        h.count += 1;
                        h.count
                    }
                    _ => {
                        *history = Some(HistoryState { row: cell.row.clone(), column: cell.column.clone(), count: 1 });
                        1
                    }
                };
                count <= self.max_history
            };

            if within_history {
                out.push(cell);
                if out.len() >= max_cells {
                    complete = false;
                    break;
                }
            }
        }

        Ok((out, complete))
    }
}

/// Aggregates per-tablet [`Scanner`]s behind one client-visible handle,
/// opening them lazily as the scan crosses tablet boundaries (§4.4).
pub struct SuperScanner {
    predicate: Predicate,
    /// Tablets intersecting the predicate, ordered by row range, each
    /// paired with the per-tablet scanner once opened.
    pending: Mutex<Vec<(Weak<crate::tablet::Tablet>, Option<Arc<Scanner>>)>>,
    in_use: AtomicBool,
}

impl SuperScanner {
    pub fn new(predicate: Predicate, tablets: Vec<Weak<crate::tablet::Tablet>>) -> Arc<Self> {
        Arc::new(Self {
            predicate,
            pending: Mutex::new(tablets.into_iter().map(|t| (t, None)).collect()),
            in_use: AtomicBool::new(false),
        })
    }

    pub fn scan_more(&self, max_cells: usize) -> Result<(Vec<Cell>, bool), ScannerError> {
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(ScannerError::Busy);
        }
        let result = self.scan_more_inner(max_cells);
        self.in_use.store(false, Ordering::SeqCst);
        result
    }

    fn scan_more_inner(&self, max_cells: usize) -> Result<(Vec<Cell>, bool), ScannerError> {
        let mut pending = self.pending.lock().unwrap();
        let mut out = Vec::new();

        while out.len() < max_cells {
            let Some((tablet_weak, scanner_slot)) = pending.first_mut() else {
                return Ok((out, true));
            };

            let Some(tablet) = tablet_weak.upgrade() else {
                debug!("tablet dropped mid-scan, skipping to next");
                pending.remove(0);
                continue;
            };

            let scanner = match scanner_slot {
                Some(s) => s.clone(),
                None => {
                    let s = tablet.open_scanner(self.predicate.clone())?;
                    *scanner_slot = Some(s.clone());
                    s
                }
            };

            let (mut cells, complete) = scanner.scan_more(max_cells - out.len())?;
            out.append(&mut cells);

            if complete {
                pending.remove(0);
            } else {
                break;
            }
        }

        Ok((out, pending.is_empty()))
    }
}
