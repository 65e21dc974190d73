//! `FragmentWriter` — builds a complete on-disk fragment from a sorted stream.
//!
//! A fixed phase structure (data blocks, bloom, properties, metaindex,
//! index, footer) with an atomic `.tmp` → rename write path, built entirely
//! on `crate::encoding` (see `DESIGN.md`) and narrowed to this crate's
//! single `Cell` record type — no point/range-tombstone split.
//!
//! Durability ordering follows the "durable-before-visible" decision: `sync()`
//! fsyncs the fragment file and its parent directory before returning, so a
//! caller that makes the new fragment visible only after `sync()` returns
//! never points a live tablet stack at a fragment the crash could still lose.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::mem;
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;

use super::disk::{BlockHandle, Footer, Header, IndexEntry, MetaIndexEntry, Properties};
use super::FragmentError;
use crate::cell::Cell;
use crate::encoding::{self, Encode};

const FRAG_MAGIC: [u8; 4] = *b"FRG0";
const FRAG_VERSION: u32 = 1;
const DATA_BLOCK_TARGET_SIZE: usize = 4096;
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

fn write_checksummed_block(writer: &mut (impl Write + Seek), data: &[u8]) -> Result<BlockHandle, FragmentError> {
    let offset = writer.stream_position()?;
    let len = data.len() as u32;
    let mut hasher = Crc32::new();
    hasher.update(data);
    let checksum = hasher.finalize();

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(data)?;
    writer.write_all(&checksum.to_le_bytes())?;

    Ok(BlockHandle {
        offset,
        size: (4 + data.len() + 4) as u64,
    })
}

fn write_header(writer: &mut impl Write) -> Result<(), FragmentError> {
    let header = Header {
        magic: FRAG_MAGIC,
        version: FRAG_VERSION,
        header_crc: 0,
    };
    let zeroed = encoding::encode_to_vec(&header)?;
    let mut hasher = Crc32::new();
    hasher.update(&zeroed);
    let crc = hasher.finalize();

    let header = Header {
        header_crc: crc,
        ..header
    };
    writer.write_all(&encoding::encode_to_vec(&header)?)?;
    Ok(())
}

struct Stats {
    cell_count: u64,
    min_timestamp: i64,
    max_timestamp: i64,
    min_row: Option<Vec<u8>>,
    max_row: Option<Vec<u8>>,
}

impl Stats {
    fn new() -> Self {
        Self {
            cell_count: 0,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            min_row: None,
            max_row: None,
        }
    }

    fn track(&mut self, cell: &Cell) {
        self.cell_count += 1;
        self.min_timestamp = self.min_timestamp.min(cell.timestamp);
        self.max_timestamp = self.max_timestamp.max(cell.timestamp);
        if self.min_row.is_none() {
            self.min_row = Some(cell.row.clone());
        }
        self.max_row = Some(cell.row.clone());
    }
}

/// Builds a complete fragment file on disk, then makes it visible to readers
/// only once durably synced.
pub struct FragmentWriter {
    path: PathBuf,
}

impl FragmentWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Consume a sorted iterator of cells (global cell order, per §3) and
    /// write a complete fragment file. `is_final` marks the output of a
    /// full-stack compaction, which contains no erasures left to resolve.
    pub fn build(self, cells: impl Iterator<Item = Cell>, cell_count_hint: usize, is_final: bool) -> Result<(), FragmentError> {
        let mut cells = cells.peekable();
        if cells.peek().is_none() {
            return Err(FragmentError::Internal("cannot write an empty fragment".into()));
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
        let mut writer = BufWriter::new(&mut file);

        write_header(&mut writer)?;

        let mut bloom = Bloom::new_for_fp_rate(cell_count_hint.max(1), BLOOM_FALSE_POSITIVE_RATE)
            .map_err(|e| FragmentError::Internal(e.to_string()))?;
        let mut stats = Stats::new();
        let mut index_entries = Vec::new();
        let mut current_block = Vec::new();
        let mut block_first_row: Option<Vec<u8>> = None;

        for cell in cells {
            stats.track(&cell);
            bloom.set(&cell.row);
            if block_first_row.is_none() {
                block_first_row = Some(cell.row.clone());
            }
            cell.encode_to(&mut current_block)?;

            if current_block.len() >= DATA_BLOCK_TARGET_SIZE {
                let handle = write_checksummed_block(&mut writer, &mem::take(&mut current_block))?;
                index_entries.push(IndexEntry {
                    separator_row: block_first_row.take().expect("set above"),
                    handle,
                });
            }
        }
        if !current_block.is_empty() {
            let handle = write_checksummed_block(&mut writer, &current_block)?;
            index_entries.push(IndexEntry {
                separator_row: block_first_row.take().expect("set above"),
                handle,
            });
        }

        let bloom_bytes = bloom.as_slice().to_vec();
        let bloom_handle = write_checksummed_block(&mut writer, &bloom_bytes)?;

        let properties = Properties {
            cell_count: stats.cell_count,
            min_row: stats.min_row.unwrap_or_default(),
            max_row: stats.max_row.unwrap_or_default(),
            min_timestamp: stats.min_timestamp,
            max_timestamp: stats.max_timestamp,
            is_final,
        };
        let properties_bytes = encoding::encode_to_vec(&properties)?;
        let properties_handle = write_checksummed_block(&mut writer, &properties_bytes)?;

        let meta_entries = vec![
            MetaIndexEntry {
                name: "filter.bloom".to_string(),
                handle: bloom_handle,
            },
            MetaIndexEntry {
                name: "meta.properties".to_string(),
                handle: properties_handle,
            },
        ];
        let mut meta_buf = Vec::new();
        encoding::encode_vec(&meta_entries, &mut meta_buf)?;
        let metaindex_handle = write_checksummed_block(&mut writer, &meta_buf)?;

        let mut index_buf = Vec::new();
        encoding::encode_vec(&index_entries, &mut index_buf)?;
        let index_handle = write_checksummed_block(&mut writer, &index_buf)?;

        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        let total_file_size = file.metadata()?.len() + 36;
        let footer = Footer {
            metaindex: metaindex_handle,
            index: index_handle,
            total_file_size,
            footer_crc: 0,
        };
        let zeroed = encoding::encode_to_vec(&footer)?;
        let mut hasher = Crc32::new();
        hasher.update(&zeroed);
        let crc = hasher.finalize();
        let footer = Footer { footer_crc: crc, ..footer };
        let mut footer_writer = BufWriter::new(&mut file);
        footer_writer.write_all(&encoding::encode_to_vec(&footer)?)?;
        footer_writer.flush()?;
        drop(footer_writer);
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path)?;
        fsync_parent_dir(&self.path)?;

        Ok(())
    }
}

/// Fsyncs the parent directory of `path` so the rename above is itself
/// durable, not just the file contents — without this a crash can leave the
/// rename undone even though the data it pointed at is safely on disk.
fn fsync_parent_dir(path: &Path) -> Result<(), FragmentError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}
