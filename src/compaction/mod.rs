//! `SharedCompactor` — the background worker pool that drives `Tablet::do_compaction` (§4.6).
//!
//! Grounded on `original_source/.../server/Compactor.cc` for the
//! request/dequeue/compact contract (its own worker loop is commented out
//! upstream; §9 resolves that gap as an explicit fixed-size thread pool
//! pulling from a priority queue, which is what this module builds).

pub mod standalone;

use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::tablet::Tablet;
use crate::wal::TabletId;

struct QueuedTablet {
    priority: usize,
    tablet: Arc<Tablet>,
}

impl PartialEq for QueuedTablet {
    fn eq(&self, other: &Self) -> bool {
        self.tablet.id() == other.tablet.id()
    }
}
impl Eq for QueuedTablet {}

impl PartialOrd for QueuedTablet {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTablet {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority)
    }
}

struct State {
    queue: BinaryHeap<QueuedTablet>,
    queued_ids: HashSet<TabletId>,
    /// Set while a `Pause` guard is outstanding: workers finish whatever
    /// compaction is in flight, then block before dequeuing the next one.
    paused: bool,
    active: usize,
    shutdown: bool,
}

/// A bounded pool of worker threads compacting tablets by priority
/// (largest static-fragment count first). `request_compaction` is
/// idempotent: a tablet already queued is not re-enqueued.
pub struct SharedCompactor {
    state: Mutex<State>,
    cv: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SharedCompactor {
    /// Starts `worker_count` background threads pulling from the shared queue.
    pub fn start(worker_count: usize) -> Arc<Self> {
        let this = Arc::new(Self {
            state: Mutex::new(State {
                queue: BinaryHeap::new(),
                queued_ids: HashSet::new(),
                paused: false,
                active: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
            workers: Mutex::new(Vec::new()),
        });

        let mut workers = this.workers.lock().unwrap();
        for i in 0..worker_count.max(1) {
            let worker = Arc::clone(&this);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("compactor-{i}"))
                    .spawn(move || worker.worker_loop())
                    .expect("failed to spawn compactor thread"),
            );
        }
        drop(workers);
        this
    }

    /// Enqueues `tablet` for compaction if it is not already queued.
    pub fn request_compaction(&self, tablet: Arc<Tablet>) {
        let mut state = self.state.lock().unwrap();
        let id = tablet.id();
        if !state.queued_ids.insert(id) {
            debug!(?id, "compaction already queued, skipping duplicate request");
            return;
        }
        let priority = tablet.compaction_priority();
        state.queue.push(QueuedTablet { priority, tablet });
        self.cv.notify_one();
    }

    /// Blocks new compactions from starting and waits for any in-progress
    /// compaction to reach a safe boundary (its current `do_compaction` call
    /// returning). Returns a guard that resumes the pool on drop.
    pub fn pause(self: &Arc<Self>) -> PauseGuard {
        let mut state = self.state.lock().unwrap();
        state.paused = true;
        while state.active > 0 {
            state = self.cv.wait(state).unwrap();
        }
        PauseGuard { compactor: Arc::clone(self) }
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        drop(state);
        self.cv.notify_all();

        let mut workers = self.workers.lock().unwrap();
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let (tablet, id) = {
                let mut state = self.state.lock().unwrap();
                loop {
                    if state.shutdown {
                        return;
                    }
                    if !state.paused {
                        if let Some(entry) = state.queue.pop() {
                            state.queued_ids.remove(&entry.tablet.id());
                            state.active += 1;
                            let id = entry.tablet.id();
                            break (entry.tablet, id);
                        }
                    }
                    state = self.cv.wait(state).unwrap();
                }
            };

            match tablet.do_compaction() {
                Ok(true) => info!(?id, "compaction completed"),
                Ok(false) => debug!(?id, "compaction skipped, nothing to merge"),
                Err(e) => {
                    error!(?id, error = %e, "compaction failed");
                    tablet.fail(&e.to_string());
                }
            }

            let mut state = self.state.lock().unwrap();
            state.active -= 1;
            drop(state);
            self.cv.notify_all();
        }
    }
}

/// RAII guard from [`SharedCompactor::pause`]; resumes the pool on drop.
pub struct PauseGuard {
    compactor: Arc<SharedCompactor>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        let mut state = self.compactor.state.lock().unwrap();
        state.paused = false;
        drop(state);
        self.compactor.cv.notify_all();
    }
}

impl Drop for SharedCompactor {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if !state.shutdown {
            state.shutdown = true;
            drop(state);
            self.cv.notify_all();
            let mut workers = self.workers.lock().unwrap();
            for worker in workers.drain(..) {
                let _ = worker.join();
            }
        } else {
            warn!("SharedCompactor dropped twice through shutdown path");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use crate::cell::RowInterval;
    use crate::config::{FileConfigManager, ServerId};
    use crate::tracker::FileTracker;
    use crate::wal::SharedLogger;
    use std::time::Duration;
    use tempfile::TempDir;

    fn new_tablet(tmp: &TempDir, id: u64) -> Arc<Tablet> {
        let logger = Arc::new(SharedLogger::open(tmp.path().join(format!("wal-{id}.log"))).unwrap());
        let config = Arc::new(FileConfigManager::open(tmp.path().join("config")).unwrap());
        let tracker = Arc::new(FileTracker::new());
        Tablet::new(
            "t1",
            RowInterval::everything(),
            TabletId(id),
            ServerId("local".into()),
            logger,
            config,
            tracker,
            Arc::new(NoCache),
        )
    }

    #[test]
    fn duplicate_requests_collapse() {
        let tmp = TempDir::new().unwrap();
        let tablet = new_tablet(&tmp, 1);
        let compactor = SharedCompactor::start(1);

        // Pause so the request doesn't drain before we can inspect the queue.
        let guard = compactor.pause();
        compactor.request_compaction(tablet.clone());
        compactor.request_compaction(tablet.clone());
        {
            let state = compactor.state.lock().unwrap();
            assert_eq!(state.queue.len(), 1);
        }
        drop(guard);
        compactor.shutdown();
    }

    #[test]
    fn worker_drains_queue() {
        let tmp = TempDir::new().unwrap();
        let tablet = new_tablet(&tmp, 1);
        let compactor = SharedCompactor::start(1);
        compactor.request_compaction(tablet.clone());

        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(10));
            if compactor.state.lock().unwrap().queue.is_empty() {
                break;
            }
        }
        assert!(compactor.state.lock().unwrap().queue.is_empty());
        compactor.shutdown();
    }
}
