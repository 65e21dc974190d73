//! Micro-benchmarks for kditablet's core storage primitives.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- merge     # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use kditablet::cache::NoCache;
use kditablet::cell::{Cell, Predicate, RowInterval};
use kditablet::config::{FileConfigManager, ServerId};
use kditablet::fragment::Fragment;
use kditablet::fragment::disk::DiskFragment;
use kditablet::fragment::merge::FragmentMerge;
use kditablet::fragment::writer::FragmentWriter;
use kditablet::tablet::super_tablet::SuperTablet;
use kditablet::wal::{MutationOp, MutationRecord, SharedLogger, TabletId};
use std::sync::Arc;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Larger value payload (1 KiB).
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

/// Format a zero-padded row key.
fn make_row(i: u64) -> Vec<u8> {
    format!("row-{i:012}").into_bytes()
}

fn open_table(dir: &std::path::Path, table: &str) -> Arc<SuperTablet> {
    let logger = Arc::new(SharedLogger::open(dir.join("wal-000001.log")).unwrap());
    let config = Arc::new(FileConfigManager::open(dir.join("config")).unwrap());
    let tracker = Arc::new(kditablet::tracker::FileTracker::new());
    SuperTablet::single(table, logger, config, tracker, Arc::new(NoCache))
}

/// A predicate matching rows in `[start, end)`.
fn row_range(start: Vec<u8>, end: Vec<u8>) -> Predicate {
    Predicate { rows: Some(RowInterval::new(kditablet::cell::Bound::Inclusive(start), kditablet::cell::Bound::Exclusive(end))), ..Predicate::everything() }
}

/// A predicate matching exactly one row.
fn single_row(row: Vec<u8>) -> Predicate {
    Predicate { rows: Some(RowInterval::new(kditablet::cell::Bound::Inclusive(row.clone()), kditablet::cell::Bound::Inclusive(row))), ..Predicate::everything() }
}

/// Builds a `DiskFragment` holding `count` sequential, single-version cells.
fn build_disk_fragment(dir: &std::path::Path, name: &str, count: u64, value: &[u8]) -> Arc<dyn Fragment> {
    let cells: Vec<Cell> = (0..count).map(|i| Cell::put(make_row(i), b"x".to_vec(), 1, value.to_vec())).collect();
    let path = dir.join(name);
    FragmentWriter::new(&path).build(cells.into_iter(), count as usize, true).unwrap();
    Arc::new(DiskFragment::open(&path).unwrap())
}

// ================================================================================================
// WAL append benchmarks
// ================================================================================================

/// Benchmark group for `SharedLogger::append` latency.
///
/// # Sub-benchmarks
///
/// ## `single_tablet`
///
/// **Scenario:** One thread repeatedly appends a put record tagged with a single
/// `TabletId` to a fresh `SharedLogger`.
///
/// **What it measures:** The baseline cost of one WAL append — encode, write,
/// fsync, generation bump, condvar notify. Every append fsyncs, so this is
/// essentially disk-fsync latency plus encoding overhead.
///
/// ## `concurrent/{2,4,8}_tablets`
///
/// **Scenario:** N threads, each tagged with a distinct `TabletId`, append
/// concurrently to the same `SharedLogger`.
///
/// **What it measures:** How append latency holds up under the `Mutex<Wal<_>>`
/// serialization every tablet shares — the process-wide log is a single
/// point of contention by design (§4.2), so this reveals how much that
/// contention costs as tablet count grows.
///
/// **Expected behaviour:** Wall-clock per append should grow sub-linearly
/// with thread count since every append still pays one fsync; the mutex
/// serializes writers but doesn't multiply fsync cost.
fn bench_wal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_append");

    group.bench_function("single_tablet", |b| {
        let tmp = TempDir::new().unwrap();
        let logger = SharedLogger::open(tmp.path().join("wal-000001.log")).unwrap();
        let mut seq = 0i64;
        b.iter(|| {
            let record = MutationRecord {
                tablet: TabletId(0),
                op: MutationOp::Put { row: make_row(seq as u64), column: b"x".to_vec(), timestamp: seq, value: VALUE_128B.to_vec() },
            };
            logger.append(black_box(&record)).unwrap();
            seq += 1;
        });
    });

    for &num_tablets in &[2u64, 4, 8] {
        group.bench_function(BenchmarkId::new("concurrent", format!("{num_tablets}_tablets")), |b| {
            b.iter_batched(
                || {
                    let tmp = TempDir::new().unwrap();
                    let logger = Arc::new(SharedLogger::open(tmp.path().join("wal-000001.log")).unwrap());
                    (tmp, logger)
                },
                |(_tmp, logger)| {
                    let mut handles = Vec::new();
                    for t in 0..num_tablets {
                        let logger = Arc::clone(&logger);
                        handles.push(std::thread::spawn(move || {
                            for i in 0..50u64 {
                                let record = MutationRecord {
                                    tablet: TabletId(t),
                                    op: MutationOp::Put { row: make_row(i), column: b"x".to_vec(), timestamp: i as i64, value: VALUE_128B.to_vec() },
                                };
                                logger.append(&record).unwrap();
                            }
                        }));
                    }
                    for h in handles {
                        h.join().unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Fragment merge benchmarks
// ================================================================================================

/// Benchmark group for `FragmentMerge` k-way merge throughput.
///
/// # Sub-benchmarks
///
/// ## `stack_depth/{1,3,8}`
///
/// **Scenario:** Merges a stack of N disjoint-row disk fragments (1,000 cells
/// each) with `retain_erasures = true`, collecting the full output.
///
/// **What it measures:** How the heap-based k-way merge's per-cell overhead
/// scales with stack depth — more sources means a larger heap and more
/// comparisons per popped cell.
///
/// **Expected behaviour:** Near-linear growth in total time with stack depth
/// for disjoint data (no shadowing work), with a logarithmic per-cell cost
/// increase from the larger heap.
///
/// ## `overlapping_with_erasures`
///
/// **Scenario:** Merges a stack of 4 fragments covering the *same* 1,000
/// rows, where the top fragment is entirely erasures shadowing the rest.
///
/// **What it measures:** Shadow-tracking overhead — every older version must
/// be popped from the heap and discarded rather than copied into the
/// scan's real output.
fn bench_fragment_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragment_merge");

    for &depth in &[1usize, 3, 8] {
        group.throughput(Throughput::Elements(1_000));
        group.bench_function(BenchmarkId::new("stack_depth", depth), |b| {
            let tmp = TempDir::new().unwrap();
            let fragments: Vec<Arc<dyn Fragment>> = (0..depth)
                .map(|i| {
                    let cells: Vec<Cell> = (0..1_000u64)
                        .map(|j| Cell::put(make_row(i as u64 * 1_000 + j), b"x".to_vec(), 1, VALUE_128B.to_vec()))
                        .collect();
                    let path = tmp.path().join(format!("frag-{i}"));
                    FragmentWriter::new(&path).build(cells.into_iter(), 1_000, true).unwrap();
                    Arc::new(DiskFragment::open(&path).unwrap()) as Arc<dyn Fragment>
                })
                .collect();

            b.iter(|| {
                let merge = FragmentMerge::new(&fragments, &Predicate::everything(), true).unwrap();
                let count = merge.count();
                black_box(count);
            });
        });
    }

    group.bench_function("overlapping_with_erasures", |b| {
        let tmp = TempDir::new().unwrap();
        let mut fragments: Vec<Arc<dyn Fragment>> = Vec::new();
        for layer in 0..3u64 {
            let cells: Vec<Cell> = (0..1_000u64).map(|i| Cell::put(make_row(i), b"x".to_vec(), layer as i64, VALUE_128B.to_vec())).collect();
            let path = tmp.path().join(format!("base-{layer}"));
            FragmentWriter::new(&path).build(cells.into_iter(), 1_000, true).unwrap();
            fragments.push(Arc::new(DiskFragment::open(&path).unwrap()));
        }
        let erasures: Vec<Cell> = (0..1_000u64).map(|i| Cell::erasure(make_row(i), b"x".to_vec(), 10)).collect();
        let path = tmp.path().join("erasures");
        FragmentWriter::new(&path).build(erasures.into_iter(), 1_000, true).unwrap();
        fragments.insert(0, Arc::new(DiskFragment::open(&path).unwrap()));

        b.iter(|| {
            let merge = FragmentMerge::new(&fragments, &Predicate::everything(), false).unwrap();
            let count = merge.count();
            black_box(count);
        });
    });

    group.finish();
}

// ================================================================================================
// Tablet mutation benchmarks
// ================================================================================================

/// Benchmark group for `SuperTablet::set` (write) latency.
///
/// # Sub-benchmarks
///
/// ## `single_tablet/{128B,1K}`
///
/// **Scenario:** A single-tablet table absorbs sequential `set` calls.
///
/// **What it measures:** The combined cost of WAL append (durable) plus
/// `MemFragment` insertion — the full write path for one mutation.
///
/// **Expected behaviour:** Dominated by the WAL fsync, similar to
/// `wal_append/single_tablet`; 1 KiB values add only a small memcpy delta
/// over 128 B values.
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    for &(label, value) in &[("128B", VALUE_128B.as_slice()), ("1K", VALUE_1K.as_slice())] {
        group.bench_function(BenchmarkId::new("single_tablet", label), |b| {
            let tmp = TempDir::new().unwrap();
            let table = open_table(tmp.path(), "bench");
            let mut seq = 0u64;
            b.iter(|| {
                let row = make_row(seq);
                table.set(black_box(&row), b"x", seq as i64, value.to_vec()).unwrap();
                seq += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark group for ordered scan latency against a single tablet's
/// in-memory fragment.
///
/// # Sub-benchmarks
///
/// ## `memtable/{10,100,1000}_rows`
///
/// **Scenario:** Scans a prefix of N rows from a tablet whose 10,000 rows
/// live entirely in the mutable memfrag (no flush has occurred).
///
/// **What it measures:** In-memory ordered iteration cost via
/// `SuperScanner`/`Scanner` — the same merge-and-collect path a client scan
/// takes, but with a stack of depth one.
///
/// **Expected behaviour:** Near-linear scaling with scan size; per-row cost
/// should be low since there's no disk I/O or cross-fragment merging.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    let tmp = TempDir::new().unwrap();
    let table = open_table(tmp.path(), "bench");
    let n = 10_000u64;
    for i in 0..n {
        table.set(&make_row(i), b"x", 1, VALUE_128B.to_vec()).unwrap();
    }

    for &range_size in &[10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(range_size));
        group.bench_function(BenchmarkId::new("memtable", format!("{range_size}_rows")), |b| {
            let mut offset = 0u64;
            b.iter(|| {
                let start = make_row(offset % (n - range_size));
                let end = make_row(offset % (n - range_size) + range_size);
                let scanner = table.scan(black_box(row_range(start, end))).unwrap();
                let (cells, _complete) = scanner.scan_more(range_size as usize + 1).unwrap();
                black_box(&cells);
                offset += 1;
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Compaction benchmarks
// ================================================================================================

/// Benchmark group for `Tablet::do_compaction` (tail merge) latency.
///
/// # Sub-benchmarks
///
/// ## `tail_merge/{1000,5000}`
///
/// **Scenario:** Builds a tablet whose static stack holds N cells spread
/// across several disk fragments (via direct `add_fragment` calls bypassing
/// the WAL, since this isolates the merge-and-write cost), then runs one
/// `do_compaction` pass.
///
/// **What it measures:** End-to-end tail-compaction latency: k-way merge
/// across the compacted fragments, writing the result, and splicing it back
/// into the stack. This is the main background cost the `SharedCompactor`
/// worker pool pays per tablet.
///
/// **Expected behaviour:** Roughly proportional to N; the 5,000-cell case
/// should take noticeably longer than the 1,000-cell case.
fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    group.sample_size(10);

    for &count in &[1_000u64, 5_000] {
        group.bench_function(BenchmarkId::new("tail_merge", count), |b| {
            b.iter_batched(
                || {
                    let tmp = TempDir::new().unwrap();
                    let logger = Arc::new(SharedLogger::open(tmp.path().join("wal-000001.log")).unwrap());
                    let config = Arc::new(FileConfigManager::open(tmp.path().join("config")).unwrap());
                    let tracker = Arc::new(kditablet::tracker::FileTracker::new());
                    let tablet = kditablet::tablet::Tablet::new(
                        "bench",
                        RowInterval::everything(),
                        TabletId(0),
                        ServerId("local".into()),
                        logger,
                        config,
                        tracker,
                        Arc::new(NoCache),
                    );
                    let per_fragment = count / 4;
                    for f in 0..4u64 {
                        for i in 0..per_fragment {
                            tablet.set(&make_row(f * per_fragment + i), b"x", 1, VALUE_128B.to_vec()).unwrap();
                        }
                        let mem = tablet.mem_fragment();
                        let cells: Vec<Cell> = mem.scan(&Predicate::everything()).unwrap().collect();
                        if !cells.is_empty() {
                            let path = tmp.path().join(format!("flush-{f}"));
                            FragmentWriter::new(&path).build(cells.into_iter(), 0, false).unwrap();
                            tablet.add_fragment(Arc::new(DiskFragment::open(&path).unwrap()));
                        }
                    }
                    (tmp, tablet)
                },
                |(_tmp, tablet)| {
                    black_box(tablet.do_compaction().unwrap());
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark group for `Tablet::split_tablet` latency.
///
/// # Sub-benchmarks
///
/// ## `memtable_only/{1000,10000}`
///
/// **Scenario:** A tablet with N rows, all in its mutable memfrag, is split
/// into two halves.
///
/// **What it measures:** The cost of partitioning the memfrag's cells
/// between the new lower-range tablet and the shrunk original, plus
/// persisting both configs — the in-memory half of an online split with no
/// shared disk fragments to refcount.
///
/// **Expected behaviour:** Roughly linear in row count, dominated by the
/// memfrag scan-and-partition rather than the two config writes.
fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");
    group.sample_size(10);

    for &count in &[1_000u64, 10_000] {
        group.bench_function(BenchmarkId::new("memtable_only", count), |b| {
            b.iter_batched(
                || {
                    let tmp = TempDir::new().unwrap();
                    let logger = Arc::new(SharedLogger::open(tmp.path().join("wal-000001.log")).unwrap());
                    let config = Arc::new(FileConfigManager::open(tmp.path().join("config")).unwrap());
                    let tracker = Arc::new(kditablet::tracker::FileTracker::new());
                    let tablet = kditablet::tablet::Tablet::new(
                        "bench",
                        RowInterval::everything(),
                        TabletId(0),
                        ServerId("local".into()),
                        logger,
                        config,
                        tracker,
                        Arc::new(NoCache),
                    );
                    for i in 0..count {
                        tablet.set(&make_row(i), b"x", 1, VALUE_128B.to_vec()).unwrap();
                    }
                    (tmp, tablet)
                },
                |(_tmp, tablet)| {
                    black_box(tablet.split_tablet(TabletId(1)).unwrap());
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Concurrent access benchmarks
// ================================================================================================

/// Benchmark group for concurrent (multi-threaded) `SuperTablet` access.
///
/// `SuperTablet` is `Send + Sync` and designed for shared access via
/// `Arc<SuperTablet>`. These benchmarks verify that read throughput scales
/// with reader count and measure the impact of concurrent writes through
/// the mutation gate.
///
/// # Sub-benchmarks
///
/// ## `readers/{1,2,4}`
///
/// **Scenario:** N threads perform random `scan` calls over single rows
/// against a 10,000-row table. Each thread does 200 scans.
///
/// **What it measures:** Read throughput scaling under the `MutationGate`'s
/// shared interlock — concurrent readers should all hold the `RwLock` in
/// read mode simultaneously.
///
/// **Expected behaviour:** Total wall-clock time should not grow linearly
/// with reader count, since readers don't serialize against each other.
///
/// ## `read_under_write/{1_writer,2_writers}`
///
/// **Scenario:** 2 reader threads scan while 1 or 2 writer threads
/// concurrently `set` new rows.
///
/// **What it measures:** Whether the mutation gate's writer-preference
/// counter causes noticeable reader stalls under write pressure.
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    let n = 10_000u64;

    for &num_readers in &[1u32, 2, 4] {
        group.bench_function(BenchmarkId::new("readers", num_readers), |b| {
            b.iter_batched(
                || {
                    let tmp = TempDir::new().unwrap();
                    let table = open_table(tmp.path(), "bench");
                    for i in 0..n {
                        table.set(&make_row(i), b"x", 1, VALUE_128B.to_vec()).unwrap();
                    }
                    (tmp, table)
                },
                |(_tmp, table)| {
                    let mut handles = Vec::new();
                    for t in 0..num_readers {
                        let table = Arc::clone(&table);
                        handles.push(std::thread::spawn(move || {
                            for i in 0..200u64 {
                                let row = make_row((i + t as u64 * 37) % n);
                                let scanner = table.scan(single_row(row)).unwrap();
                                let _ = black_box(scanner.scan_more(10).unwrap());
                            }
                        }));
                    }
                    for h in handles {
                        h.join().unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    for &num_writers in &[1u32, 2] {
        group.bench_function(BenchmarkId::new("read_under_write", format!("{num_writers}_writer")), |b| {
            b.iter_batched(
                || {
                    let tmp = TempDir::new().unwrap();
                    let table = open_table(tmp.path(), "bench");
                    for i in 0..n {
                        table.set(&make_row(i), b"x", 1, VALUE_128B.to_vec()).unwrap();
                    }
                    (tmp, table)
                },
                |(_tmp, table)| {
                    let mut handles = Vec::new();
                    for t in 0..2u32 {
                        let table = Arc::clone(&table);
                        handles.push(std::thread::spawn(move || {
                            for i in 0..200u64 {
                                let row = make_row((i + t as u64 * 37) % n);
                                let scanner = table.scan(single_row(row)).unwrap();
                                let _ = black_box(scanner.scan_more(10).unwrap());
                            }
                        }));
                    }
                    for w in 0..num_writers {
                        let table = Arc::clone(&table);
                        handles.push(std::thread::spawn(move || {
                            for i in 0..100u64 {
                                let row = make_row(n + w as u64 * 1_000 + i);
                                table.set(&row, b"x", 1, VALUE_128B.to_vec()).unwrap();
                            }
                        }));
                    }
                    for h in handles {
                        h.join().unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Group registration
// ================================================================================================

criterion_group!(
    benches,
    bench_wal_append,
    bench_fragment_merge,
    bench_set,
    bench_scan,
    bench_compaction,
    bench_split,
    bench_concurrent,
);

criterion_main!(benches);
