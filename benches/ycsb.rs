//! YCSB-style macro-benchmarks for kditablet.
//!
//! Measures sustained throughput and latency distributions under
//! realistic mixed workloads inspired by the Yahoo Cloud Serving
//! Benchmark (YCSB), adapted to cell-level `(row, column, timestamp)`
//! access instead of flat key-value access.
//!
//! # Workloads
//!
//! | Name | Mix | Description |
//! |------|-----|-------------|
//! | **A** | 50% read, 50% update | Session store — heavy read/write |
//! | **B** | 95% read, 5% update | Photo tagging — read-mostly |
//! | **C** | 100% read | User profile cache — read-only |
//! | **D** | 95% read, 5% insert | Read-latest — status updates |
//! | **E** | 95% scan, 5% insert | Short ranges — threaded conversations |
//! | **F** | 50% read, 50% read-modify-write | User database — RMW |
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench ycsb               # all workloads
//! cargo bench --bench ycsb -- "load"      # load phase only
//! cargo bench --bench ycsb -- "A"         # workload A only
//! ```

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};

use kditablet::cache::NoCache;
use kditablet::cell::{Bound, Predicate, RowInterval};
use kditablet::config::FileConfigManager;
use kditablet::tablet::super_tablet::SuperTablet;
use kditablet::tracker::FileTracker;
use kditablet::wal::SharedLogger;
use rand::Rng;
use std::hint::black_box;
use std::sync::Arc;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Number of rows loaded into the table before running workloads.
const RECORD_COUNT: u64 = 10_000;

/// Number of operations per workload run.
const OPS_PER_RUN: u64 = 5_000;

/// Value size in bytes.
const VALUE_SIZE: usize = 256;

/// Scan length for workload E.
const SCAN_LENGTH: u64 = 50;

/// Single column family used throughout — these workloads exercise
/// row-level access patterns, not column fan-out.
const COLUMN: &[u8] = b"value";

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn make_row(i: u64) -> Vec<u8> {
    format!("user{i:012}").into_bytes()
}

fn make_value(rng: &mut impl Rng) -> Vec<u8> {
    let mut buf = vec![0u8; VALUE_SIZE];
    rng.fill(&mut buf[..]);
    buf
}

fn single_row(row: Vec<u8>) -> Predicate {
    Predicate { rows: Some(RowInterval::new(Bound::Inclusive(row.clone()), Bound::Inclusive(row))), ..Predicate::everything() }
}

fn row_range(start: Vec<u8>, end_exclusive: Vec<u8>) -> Predicate {
    Predicate { rows: Some(RowInterval::new(Bound::Inclusive(start), Bound::Exclusive(end_exclusive))), ..Predicate::everything() }
}

/// Opens a fresh single-tablet table, for benchmarking.
fn open_bench_table(dir: &std::path::Path) -> Arc<SuperTablet> {
    let logger = Arc::new(SharedLogger::open(dir.join("wal-000001.log")).unwrap());
    let config = Arc::new(FileConfigManager::open(dir.join("config")).unwrap());
    let tracker = Arc::new(FileTracker::new());
    SuperTablet::single("ycsb", logger, config, tracker, Arc::new(NoCache))
}

/// Load phase: insert [`RECORD_COUNT`] sequential rows, one cell each.
///
/// **Scenario:** Writes 10,000 row-cells (256 B values) sequentially, simulating the
/// initial bulk-load of a dataset.
///
/// **What it measures:** Sustained sequential write throughput through the WAL-append
/// plus memfrag-insert path, with no compaction or flush in the loop.
///
/// **Expected behaviour:** Dominated by WAL fsync cost; roughly linear in record count.
fn load_table(table: &SuperTablet) {
    let mut rng = rand::rng();
    for i in 0..RECORD_COUNT {
        let row = make_row(i);
        let value = make_value(&mut rng);
        table.set(&row, COLUMN, 1, value).unwrap();
    }
}

fn read_one(table: &SuperTablet, row: &[u8]) -> usize {
    let scanner = table.scan(single_row(row.to_vec())).unwrap();
    let (cells, _complete) = scanner.scan_more(4).unwrap();
    cells.len()
}

// ------------------------------------------------------------------------------------------------
// Workloads
// ------------------------------------------------------------------------------------------------

/// Workload A — 50% read, 50% update.
///
/// **Real-world analogy:** Session store. A web server reads and updates session data
/// equally — e.g., checking user login state and refreshing session tokens.
///
/// **What it measures:** Performance under a balanced read/write mix with uniform random
/// row access. Updates append a new timestamped version rather than overwriting in place
/// (§3's multi-version model), so every update grows the memfrag.
///
/// **Expected behaviour:** Dominated by write cost. Latency should sit between the pure-
/// read (Workload C) and pure-write baselines.
fn run_workload_a(table: &SuperTablet, ts: &mut i64) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let row = make_row(rng.random_range(0..RECORD_COUNT));
        if rng.random_bool(0.5) {
            let _ = black_box(read_one(table, &row));
        } else {
            *ts += 1;
            let value = make_value(&mut rng);
            table.set(&row, COLUMN, *ts, value).unwrap();
        }
    }
}

/// Workload B — 95% read, 5% update.
///
/// **Real-world analogy:** Photo tagging or social-media metadata. The vast majority of
/// accesses are reads (viewing tags/likes), with occasional writes (adding a tag).
///
/// **What it measures:** Read-dominated throughput with light write pressure.
///
/// **Expected behaviour:** Close to Workload C (pure read), with a small overhead from
/// the 5% writes.
fn run_workload_b(table: &SuperTablet, ts: &mut i64) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let row = make_row(rng.random_range(0..RECORD_COUNT));
        if rng.random_bool(0.95) {
            let _ = black_box(read_one(table, &row));
        } else {
            *ts += 1;
            let value = make_value(&mut rng);
            table.set(&row, COLUMN, *ts, value).unwrap();
        }
    }
}

/// Workload C — 100% read.
///
/// **Real-world analogy:** User profile cache. A CDN or application reads user profile
/// data from the table with no modifications during the measured window.
///
/// **What it measures:** Peak single-row scan throughput with zero write contention —
/// the theoretical ceiling for point-read performance against a single-fragment memfrag.
///
/// **Expected behaviour:** The fastest of all workloads.
fn run_workload_c(table: &SuperTablet) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let row = make_row(rng.random_range(0..RECORD_COUNT));
        let _ = black_box(read_one(table, &row));
    }
}

/// Workload D — 95% read, 5% insert (append-only new rows).
///
/// **Real-world analogy:** Status/timeline feed. Most operations read recent posts, while
/// a small fraction inserts new posts. New rows are appended beyond the initial range.
///
/// **What it measures:** The engine's ability to handle a growing keyspace without any
/// tablet split being triggered (this single-tablet table never requests one).
///
/// **Expected behaviour:** Similar to Workload B, but new rows are plain inserts (a fresh
/// `(row, column, timestamp)` triple) rather than a new version of an existing one.
fn run_workload_d(table: &SuperTablet, insert_base: &mut u64) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        if rng.random_bool(0.95) {
            let row = make_row(rng.random_range(0..RECORD_COUNT + *insert_base));
            let _ = black_box(read_one(table, &row));
        } else {
            let row = make_row(RECORD_COUNT + *insert_base);
            let value = make_value(&mut rng);
            table.set(&row, COLUMN, 1, value).unwrap();
            *insert_base += 1;
        }
    }
}

/// Workload E — 95% scan (short range), 5% insert.
///
/// **Real-world analogy:** Threaded conversations or messaging. Reading a thread requires
/// scanning a range of messages ([`SCAN_LENGTH`] = 50 rows), while posting adds new
/// entries.
///
/// **What it measures:** Short-range scan throughput under light write pressure. Each scan
/// reads 50 consecutive rows through `SuperScanner`, exercising ordered iteration.
///
/// **Expected behaviour:** Significantly slower per-operation than point-read workloads
/// because each scan touches 50 rows.
fn run_workload_e(table: &SuperTablet, insert_base: &mut u64) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        if rng.random_bool(0.95) {
            let start_id = rng.random_range(0..RECORD_COUNT.saturating_sub(SCAN_LENGTH));
            let start = make_row(start_id);
            let end = make_row(start_id + SCAN_LENGTH);
            let scanner = table.scan(row_range(start, end)).unwrap();
            let _ = black_box(scanner.scan_more(SCAN_LENGTH as usize + 1).unwrap());
        } else {
            let row = make_row(RECORD_COUNT + *insert_base);
            let value = make_value(&mut rng);
            table.set(&row, COLUMN, 1, value).unwrap();
            *insert_base += 1;
        }
    }
}

/// Workload F — 50% read, 50% read-modify-write (RMW).
///
/// **Real-world analogy:** User database with counters. Half the operations read a user
/// record; the other half read a record, modify it (e.g., increment a counter), and
/// write back a new version.
///
/// **What it measures:** Read-modify-write pattern cost. Each RMW scans the row, then
/// appends a new timestamped version — effectively two operations per logical unit.
///
/// **Expected behaviour:** Slower than Workload A because the 50% RMW operations are
/// each more expensive than a simple update.
fn run_workload_f(table: &SuperTablet, ts: &mut i64) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let row = make_row(rng.random_range(0..RECORD_COUNT));
        if rng.random_bool(0.5) {
            let _ = black_box(read_one(table, &row));
        } else {
            let _ = read_one(table, &row);
            *ts += 1;
            let value = make_value(&mut rng);
            table.set(&row, COLUMN, *ts, value).unwrap();
        }
    }
}

// ================================================================================================
// Criterion benchmark functions
// ================================================================================================

/// Criterion registration for the load phase.
///
/// Measures the time to insert [`RECORD_COUNT`] row-cells into a fresh table.
/// Sample size is reduced to 10 because each iteration creates and fills an entire
/// table from scratch.
fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/load");
    group.sample_size(10);
    group.bench_function(BenchmarkId::new("sequential", RECORD_COUNT), |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let table = open_bench_table(dir.path());
                (dir, table)
            },
            |(_dir, table)| {
                load_table(&table);
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload A (50% read / 50% update).
fn bench_workload_a(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("A_50read_50update", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let table = open_bench_table(dir.path());
                load_table(&table);
                (dir, table, 1i64)
            },
            |(_dir, table, mut ts)| run_workload_a(&table, &mut ts),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload B (95% read / 5% update).
fn bench_workload_b(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("B_95read_5update", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let table = open_bench_table(dir.path());
                load_table(&table);
                (dir, table, 1i64)
            },
            |(_dir, table, mut ts)| run_workload_b(&table, &mut ts),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload C (100% read).
fn bench_workload_c(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("C_100read", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let table = open_bench_table(dir.path());
                load_table(&table);
                (dir, table)
            },
            |(_dir, table)| run_workload_c(&table),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload D (95% read / 5% insert).
fn bench_workload_d(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("D_95read_5insert", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let table = open_bench_table(dir.path());
                load_table(&table);
                let insert_base = 0u64;
                (dir, table, insert_base)
            },
            |(_dir, table, mut insert_base)| run_workload_d(&table, &mut insert_base),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload E (95% scan / 5% insert).
fn bench_workload_e(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("E_95scan_5insert", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let table = open_bench_table(dir.path());
                load_table(&table);
                let insert_base = 0u64;
                (dir, table, insert_base)
            },
            |(_dir, table, mut insert_base)| run_workload_e(&table, &mut insert_base),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload F (50% read / 50% RMW).
fn bench_workload_f(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("F_50read_50rmw", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let table = open_bench_table(dir.path());
                load_table(&table);
                (dir, table, 1i64)
            },
            |(_dir, table, mut ts)| run_workload_f(&table, &mut ts),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

// ================================================================================================
// Group registration
// ================================================================================================

criterion_group!(
    benches,
    bench_load,
    bench_workload_a,
    bench_workload_b,
    bench_workload_c,
    bench_workload_d,
    bench_workload_e,
    bench_workload_f,
);

criterion_main!(benches);
