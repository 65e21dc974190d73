//! Configuration / metadata store (§6).
//!
//! `ConfigManager` is the interface a tablet server uses to persist and
//! discover which fragments make up each tablet's stack. In a real
//! deployment a networked, strongly-consistent store sits behind this
//! interface, but this crate ships [`FileConfigManager`]: a concrete,
//! crash-safe, single-process implementation backed by a durable snapshot
//! rather than an event-sourced log — a `TabletConfig` list changes rarely
//! enough, and atomically enough (one `replaceFragments` at a time under the
//! tablet's write lock), that replay-from-log recovery buys nothing here.
//! The snapshot's temp-file/fsync/atomic-rename/directory-fsync durability
//! sequence is the same discipline a WAL-backed manifest uses for its own
//! checkpoints, just applied directly to the whole config list each time.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{info, warn};

use crate::cell::RowInterval;
use crate::encoding::{self, Decode, Encode, EncodingError};

const SNAPSHOT_TMP_SUFFIX: &str = ".tmp";

/// The tunables that shape a tablet server's storage engine: compaction
/// triggers, fragment layout, and WAL rolling. Every module that hardcodes
/// one of these as a constant documents it as mirroring the matching field
/// here, so this struct is the single place to look up what a deployment
/// would tune.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Number of tail static fragments a tail compaction merges in one pass.
    /// Mirrors `tablet::TAIL_COMPACTION_DEPTH`.
    pub tail_compaction_depth: usize,
    /// Static-fragment count above which a tablet is eligible for compaction.
    /// Mirrors `tablet::COMPACTION_STACK_THRESHOLD`.
    pub compaction_stack_threshold: usize,
    /// Byte threshold at which a standalone range compaction starts a new
    /// output fragment. Mirrors `compaction::standalone::OUTPUT_SPLIT_SIZE`.
    pub output_split_size: u64,
    /// Target uncompressed size of one data block before a fragment writer
    /// flushes it. Mirrors the constant in `fragment::writer`.
    pub data_block_target_size: usize,
    /// False-positive rate a fragment's block-level bloom filter is sized
    /// for. Mirrors the constant in `fragment::writer`.
    pub bloom_false_positive_rate: f64,
    /// Byte size at which a WAL segment should be rotated. Not yet wired to
    /// an automatic roll trigger — `SharedLogger::rotate_next` is manual
    /// today — but recorded here as the tunable a size-based roll policy
    /// would read.
    pub wal_segment_roll_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tail_compaction_depth: 8,
            compaction_stack_threshold: 5,
            output_split_size: 1 << 30,
            data_block_target_size: 4096,
            bloom_false_positive_rate: 0.01,
            wal_segment_roll_size: 64 << 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("snapshot checksum mismatch for table {0:?}")]
    SnapshotChecksumMismatch(String),

    #[error("no such table: {0:?}")]
    NoSuchTable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Identifies which server currently hosts a tablet. Opaque outside this
/// crate's single-process default implementation, where every tablet is
/// hosted locally and this is purely a persisted label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerId(pub String);

impl Encode for ServerId {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for ServerId {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (s, n) = String::decode_from(buf)?;
        Ok((Self(s), n))
    }
}

/// The persisted unit a `ConfigManager` keeps for one tablet: its row
/// range, the URIs of the fragments making up its stack (newest-first),
/// and which server hosts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletConfig {
    pub rows: RowInterval,
    pub fragment_uris: Vec<String>,
    pub server: ServerId,
}

impl Encode for TabletConfig {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.rows.encode_to(buf)?;
        encoding::encode_vec(&self.fragment_uris, buf)?;
        self.server.encode_to(buf)
    }
}

impl Decode for TabletConfig {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (rows, n) = RowInterval::decode_from(&buf[off..])?;
        off += n;
        let (fragment_uris, n) = encoding::decode_vec::<String>(&buf[off..])?;
        off += n;
        let (server, n) = ServerId::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { rows, fragment_uris, server }, off))
    }
}

#[derive(Debug, Clone, Default)]
struct TableSnapshot {
    tablets: Vec<TabletConfig>,
    next_data_file_id: u64,
}

impl Encode for TableSnapshot {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::encode_vec(&self.tablets, buf)?;
        self.next_data_file_id.encode_to(buf)?;
        buf.extend_from_slice(&[0u8; 4]); // checksum placeholder, patched by caller
        Ok(())
    }
}

impl Decode for TableSnapshot {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (tablets, n) = encoding::decode_vec::<TabletConfig>(&buf[off..])?;
        off += n;
        let (next_data_file_id, n) = u64::decode_from(&buf[off..])?;
        off += n;
        off += 4; // skip trailing checksum, verified separately
        Ok((Self { tablets, next_data_file_id }, off))
    }
}

/// The interface a tablet server uses to discover and persist which
/// fragments make up each tablet's stack, and to mint paths for new ones.
pub trait ConfigManager: Send + Sync {
    fn load_tablet_configs(&self, table: &str) -> Result<Vec<TabletConfig>, ConfigError>;
    fn set_tablet_config(&self, table: &str, config: TabletConfig) -> Result<(), ConfigError>;
    fn get_data_file(&self, table: &str) -> Result<PathBuf, ConfigError>;
}

/// Concrete, crash-safe, single-process [`ConfigManager`]: one directory
/// per table, one snapshot file per table, written with a
/// temp-file/fsync/atomic-rename/directory-fsync sequence.
pub struct FileConfigManager {
    root: PathBuf,
    tables: Mutex<HashMap<String, TableSnapshot>>,
}

impl FileConfigManager {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, tables: Mutex::new(HashMap::new()) })
    }

    fn snapshot_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("manifest-{table}"))
    }

    fn load_from_disk(&self, table: &str) -> Result<TableSnapshot, ConfigError> {
        let path = self.snapshot_path(table);
        if !path.exists() {
            return Ok(TableSnapshot::default());
        }

        let mut buf = Vec::new();
        File::open(&path)?.read_to_end(&mut buf)?;
        if buf.len() < 4 {
            warn!(table, "truncated config snapshot, starting fresh");
            return Ok(TableSnapshot::default());
        }

        let (stored_checksum_bytes, body) = buf.split_at(buf.len() - 4);
        let stored: [u8; 4] = stored_checksum_bytes.try_into().unwrap();
        let stored = u32::from_le_bytes(stored);

        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return Err(ConfigError::SnapshotChecksumMismatch(table.to_string()));
        }

        let (snapshot, _) = TableSnapshot::decode_from(&buf)?;
        Ok(snapshot)
    }

    fn with_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableSnapshot) -> Result<R, ConfigError>,
    ) -> Result<R, ConfigError> {
        let mut tables = self.tables.lock().map_err(|_| ConfigError::Internal("lock poisoned".into()))?;
        if !tables.contains_key(table) {
            let loaded = self.load_from_disk(table)?;
            tables.insert(table.to_string(), loaded);
        }
        let snapshot = tables.get_mut(table).expect("just inserted");
        f(snapshot)
    }

    fn persist(&self, table: &str, snapshot: &TableSnapshot) -> Result<(), ConfigError> {
        let mut bytes = encoding::encode_to_vec(snapshot)?;
        let mut hasher = Crc32::new();
        let body_len = bytes.len() - 4;
        hasher.update(&bytes[..body_len]);
        let checksum = hasher.finalize();
        bytes[body_len..].copy_from_slice(&checksum.to_le_bytes());

        let final_path = self.snapshot_path(table);
        let tmp_path = final_path.with_extension(SNAPSHOT_TMP_SUFFIX.trim_start_matches('.'));
        {
            let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        fsync_dir(&self.root)?;
        info!(table, path = ?final_path, "config snapshot written");
        Ok(())
    }
}

impl ConfigManager for FileConfigManager {
    fn load_tablet_configs(&self, table: &str) -> Result<Vec<TabletConfig>, ConfigError> {
        self.with_table(table, |snap| Ok(snap.tablets.clone()))
    }

    fn set_tablet_config(&self, table: &str, config: TabletConfig) -> Result<(), ConfigError> {
        let snapshot = self.with_table(table, |snap| {
            if let Some(existing) = snap.tablets.iter_mut().find(|t| t.rows == config.rows) {
                *existing = config.clone();
            } else {
                snap.tablets.push(config.clone());
            }
            Ok(snap.clone())
        })?;
        self.persist(table, &snapshot)
    }

    fn get_data_file(&self, table: &str) -> Result<PathBuf, ConfigError> {
        let table_dir = self.root.join(table);
        fs::create_dir_all(&table_dir)?;

        let (id, snapshot) = self.with_table(table, |snap| {
            let id = snap.next_data_file_id;
            snap.next_data_file_id += 1;
            Ok((id, snap.clone()))
        })?;
        self.persist(table, &snapshot)?;

        Ok(table_dir.join(format!("frag-{id:010}.dat")))
    }
}

/// Memory-maps the fragment at `uri`'s path and returns it with its
/// canonical URI. The local implementation never redirects; canonicalization
/// is a hook a networked `ConfigManager` would use to point callers at a
/// replica, not exercised here.
pub fn open_table(uri: &crate::fragment::FragmentUri) -> Result<(crate::fragment::disk::DiskFragment, crate::fragment::FragmentUri), ConfigError> {
    let path = uri.disk_path().ok_or_else(|| ConfigError::Internal(format!("not a disk URI: {uri}")))?;
    let frag = crate::fragment::disk::DiskFragment::open(path).map_err(|e| ConfigError::Internal(e.to_string()))?;
    Ok((frag, uri.clone()))
}

fn fsync_dir(dir: &Path) -> Result<(), ConfigError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}
