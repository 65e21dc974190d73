//! # kditablet
//!
//! An embeddable Bigtable-family tablet storage engine: cells are
//! `(row, column, timestamp) -> value|erasure` triples, kept in row-major,
//! column-major, timestamp-descending order. A table is partitioned into
//! row-range **tablets**, each backed by an LSM stack — one mutable
//! in-memory fragment over an ordered cascade of immutable on-disk
//! fragments — durable via a single process-wide write-ahead log.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         SuperTablet                           │
//! │   tablets sorted by row range, routed by binary search         │
//! │  ┌────────────┐   ┌────────────┐        ┌────────────┐        │
//! │  │  Tablet A   │   │  Tablet B   │  ...   │  Tablet N   │        │
//! │  │ MemFragment │   │ MemFragment │        │ MemFragment │        │
//! │  │  + stack of │   │  + stack of │        │  + stack of │        │
//! │  │ DiskFragment│   │ DiskFragment│        │ DiskFragment│        │
//! │  └──────┬──────┘   └──────┬──────┘        └──────┬──────┘        │
//! │         │  set/erase      │                       │               │
//! │         └────────► SharedLogger (one WAL, tagged per tablet) ◄────┘
//! │                                                                 │
//! │   scan -> SuperScanner aggregates per-tablet Scanners lazily    │
//! │   background -> SharedCompactor drains a tablet priority queue  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cell`] | The `Cell`/`RowInterval`/`Predicate` data model and cell ordering |
//! | [`encoding`] | Manual binary `Encode`/`Decode` framework used by every on-disk format |
//! | [`fragment`] | `Fragment` trait, `MemFragment`, `DiskFragment`, and the erasure-aware `FragmentMerge` |
//! | [`wal`] | Generic CRC-protected write-ahead log, and the `SharedLogger` built on it |
//! | [`tracker`] | Reference-counted fragment file registry |
//! | [`config`] | `ConfigManager` interface and its `FileConfigManager` implementation |
//! | [`cache`] | `BlockCache` interface and its `LruBlockCache` implementation |
//! | [`scanner`] | `Scanner`/`SuperScanner`: resumable, reopenable merge readers |
//! | [`tablet`] | `Tablet` and `SuperTablet`: the mutation/scan/compaction/split orchestration |
//! | [`compaction`] | `SharedCompactor` worker pool, and the standalone range-compaction entry point |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is durably appended to a
//!   shared log, tagged by tablet, before it is acknowledged.
//! - **Multi-version cells** — every `(row, column)` pair may carry many
//!   timestamped versions; erasures shadow older versions at merge time.
//! - **Snapshot-isolated scans** — a scanner's view is fixed the moment it
//!   opens (or reopens), even though the tablet's memfrag keeps mutating
//!   underneath it.
//! - **Online split** — a tablet divides into two without taking the table
//!   offline, sharing its immutable fragments by reference count.
//! - **Background compaction** — a priority-ordered worker pool folds a
//!   tablet's static fragments back down, bounded by a tail-merge depth.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kditablet::cache::NoCache;
//! use kditablet::cell::Predicate;
//! use kditablet::config::FileConfigManager;
//! use kditablet::tablet::super_tablet::SuperTablet;
//! use kditablet::tracker::FileTracker;
//! use kditablet::wal::SharedLogger;
//!
//! let logger = Arc::new(SharedLogger::open("/tmp/kditablet/wal-000001.log").unwrap());
//! let config = Arc::new(FileConfigManager::open("/tmp/kditablet/config").unwrap());
//! let tracker = Arc::new(FileTracker::new());
//! let table = SuperTablet::single("example", logger, config, tracker, Arc::new(NoCache));
//!
//! table.set(b"row-1", b"col-a", 1, b"hello".to_vec()).unwrap();
//! table.sync().unwrap();
//!
//! let scanner = table.scan(Predicate::everything()).unwrap();
//! let (cells, _complete) = scanner.scan_more(100).unwrap();
//! assert_eq!(cells[0].value.as_deref(), Some(b"hello".as_slice()));
//! ```

#![allow(dead_code)]

pub mod cache;
pub mod cell;
pub mod compaction;
pub mod config;
pub mod encoding;
pub mod fragment;
pub mod scanner;
pub mod tablet;
pub mod tracker;
pub mod wal;
