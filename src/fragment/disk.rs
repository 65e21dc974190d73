//! `DiskFragment` — an immutable, memory-mapped fragment on disk.
//!
//! On-disk layout, narrowed to this crate's single record type (there is no
//! split point/range-tombstone representation here — an erasure is just a
//! [`Cell`] with `value = None`, per §3/§4.1):
//!
//! ```text
//! [HEADER]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [METAINDEX_LEN_LE][METAINDEX_BYTES][METAINDEX_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER]
//! ```
//!
//! The bloom filter is keyed on `row` alone (point lookups in this data model
//! are scans restricted to a single row, not a single `(row, column)` pair),
//! so it can only be used to skip a fragment entirely, not to skip a block.

use std::fs::File;
use std::path::Path;

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;

use super::block_iter::BlockIterator;
use super::{Fragment, FragmentError, FragmentUri};
use crate::cell::{Cell, Predicate};
use crate::encoding::{self, Decode, Encode, EncodingError};

const FRAG_MAGIC: [u8; 4] = *b"FRG0";
const FRAG_VERSION: u32 = 1;
const FRAG_HDR_SIZE: usize = 12;
const FRAG_FOOTER_SIZE: usize = 36;
const BLOCK_LEN_SIZE: usize = 4;
const BLOCK_CRC_SIZE: usize = 4;

pub(crate) struct Header {
    pub(crate) magic: [u8; 4],
    pub(crate) version: u32,
    pub(crate) header_crc: u32,
}

impl Encode for Header {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.header_crc.encode_to(buf)
    }
}

impl Decode for Header {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (header_crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                header_crc,
            },
            off,
        ))
    }
}

#[derive(Clone)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)
    }
}

impl Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { offset, size }, off))
    }
}

pub(crate) struct IndexEntry {
    pub(crate) separator_row: Vec<u8>,
    pub(crate) handle: BlockHandle,
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.separator_row.encode_to(buf)?;
        self.handle.encode_to(buf)
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (separator_row, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                separator_row,
                handle,
            },
            off,
        ))
    }
}

pub(crate) struct MetaIndexEntry {
    pub(crate) name: String,
    pub(crate) handle: BlockHandle,
}

impl Encode for MetaIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.handle.encode_to(buf)
    }
}

impl Decode for MetaIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (name, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { name, handle }, off))
    }
}

/// Fragment-level statistics, written to the properties block.
pub struct Properties {
    pub cell_count: u64,
    pub min_row: Vec<u8>,
    pub max_row: Vec<u8>,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    /// Set when this fragment is the output of a compaction that covered the
    /// entire stack, and therefore contains no erasures left to resolve.
    pub is_final: bool,
}

impl Encode for Properties {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.cell_count.encode_to(buf)?;
        self.min_row.encode_to(buf)?;
        self.max_row.encode_to(buf)?;
        self.min_timestamp.encode_to(buf)?;
        self.max_timestamp.encode_to(buf)?;
        self.is_final.encode_to(buf)
    }
}

impl Decode for Properties {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (cell_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_row, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (max_row, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (min_timestamp, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (max_timestamp, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (is_final, n) = bool::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                cell_count,
                min_row,
                max_row,
                min_timestamp,
                max_timestamp,
                is_final,
            },
            off,
        ))
    }
}

pub(crate) struct Footer {
    pub(crate) metaindex: BlockHandle,
    pub(crate) index: BlockHandle,
    pub(crate) total_file_size: u64,
    pub(crate) footer_crc: u32,
}

impl Encode for Footer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.metaindex.encode_to(buf)?;
        self.index.encode_to(buf)?;
        self.total_file_size.encode_to(buf)?;
        self.footer_crc.encode_to(buf)
    }
}

impl Decode for Footer {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (metaindex, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (index, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (total_file_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (footer_crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                metaindex,
                index,
                total_file_size,
                footer_crc,
            },
            off,
        ))
    }
}

/// An immutable, memory-mapped on-disk fragment.
pub struct DiskFragment {
    uri: FragmentUri,
    mmap: Mmap,
    bloom: Vec<u8>,
    pub properties: Properties,
    index: Vec<IndexEntry>,
}

impl std::fmt::Debug for DiskFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFragment")
            .field("uri", &self.uri)
            .field("cell_count", &self.properties.cell_count)
            .finish()
    }
}

impl DiskFragment {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FragmentError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the file is immutable once written (atomic rename-on-write),
        // never mutated while mapped, and the mapping is read-only.
        let mmap = unsafe { Mmap::map(&file)? };

        let file_len = mmap.len();
        if file_len < FRAG_HDR_SIZE + FRAG_FOOTER_SIZE {
            return Err(FragmentError::Corrupt("fragment file too small".into()));
        }

        let (mut header, _) = encoding::decode_from_slice::<Header>(&mmap[..FRAG_HDR_SIZE])?;
        let stored_header_crc = header.header_crc;
        header.header_crc = 0;
        let header_bytes = encoding::encode_to_vec(&header)?;
        if crc32(&header_bytes) != stored_header_crc {
            return Err(FragmentError::ChecksumMismatch);
        }
        if header.magic != FRAG_MAGIC || header.version != FRAG_VERSION {
            return Err(FragmentError::Corrupt("bad fragment header".into()));
        }

        let footer_start = file_len - FRAG_FOOTER_SIZE;
        let (mut footer, _) = encoding::decode_from_slice::<Footer>(&mmap[footer_start..])?;
        let stored_footer_crc = footer.footer_crc;
        footer.footer_crc = 0;
        let footer_bytes = encoding::encode_to_vec(&footer)?;
        if crc32(&footer_bytes) != stored_footer_crc {
            return Err(FragmentError::ChecksumMismatch);
        }

        let metaindex_bytes = read_block(&mmap, &footer.metaindex)?;
        let (meta_entries, _) = encoding::decode_vec::<MetaIndexEntry>(&metaindex_bytes)?;

        let mut bloom_handle = None;
        let mut properties_handle = None;
        for entry in &meta_entries {
            match entry.name.as_str() {
                "filter.bloom" => bloom_handle = Some(entry.handle.clone()),
                "meta.properties" => properties_handle = Some(entry.handle.clone()),
                other => return Err(FragmentError::Corrupt(format!("unknown metaindex block {other}"))),
            }
        }

        let bloom = match bloom_handle {
            Some(h) => read_block(&mmap, &h)?,
            None => Vec::new(),
        };

        let properties = match properties_handle {
            Some(h) => {
                let bytes = read_block(&mmap, &h)?;
                encoding::decode_from_slice::<Properties>(&bytes)?.0
            }
            None => return Err(FragmentError::Corrupt("fragment missing properties block".into())),
        };

        let index_bytes = read_block(&mmap, &footer.index)?;
        let (index, _) = encoding::decode_vec::<IndexEntry>(&index_bytes)?;

        Ok(Self {
            uri: FragmentUri::disk(path),
            mmap,
            bloom,
            properties,
            index,
        })
    }

    /// `true` if the bloom filter says `row` cannot be present. A missing or
    /// unparseable bloom always answers "maybe" (fail open, never fail closed).
    fn row_definitely_absent(&self, row: &[u8]) -> bool {
        if self.bloom.is_empty() {
            return false;
        }
        match Bloom::<Vec<u8>>::from_slice(&self.bloom) {
            Ok(bloom) => !bloom.check(&row.to_vec()),
            Err(_) => false,
        }
    }

    fn block_for_row(&self, row: &[u8]) -> Option<usize> {
        if self.index.is_empty() {
            return None;
        }
        let idx = match self.index.binary_search_by(|e| e.separator_row.as_slice().cmp(row)) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        Some(idx)
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn read_block(mmap: &Mmap, handle: &BlockHandle) -> Result<Vec<u8>, FragmentError> {
    let start = usize::try_from(handle.offset).map_err(|_| FragmentError::Corrupt("offset overflow".into()))?;
    let size = usize::try_from(handle.size).map_err(|_| FragmentError::Corrupt("size overflow".into()))?;
    if start + size > mmap.len() {
        return Err(FragmentError::Corrupt("block out of range".into()));
    }
    let mut cursor = start;
    let len_bytes: [u8; BLOCK_LEN_SIZE] = mmap[cursor..cursor + BLOCK_LEN_SIZE]
        .try_into()
        .map_err(|_| FragmentError::Corrupt("truncated block length".into()))?;
    let content_len = u32::from_le_bytes(len_bytes) as usize;
    cursor += BLOCK_LEN_SIZE;

    if cursor + content_len + BLOCK_CRC_SIZE > mmap.len() {
        return Err(FragmentError::Corrupt("block out of range".into()));
    }
    let content = &mmap[cursor..cursor + content_len];
    cursor += content_len;

    let crc_bytes: [u8; BLOCK_CRC_SIZE] = mmap[cursor..cursor + BLOCK_CRC_SIZE]
        .try_into()
        .map_err(|_| FragmentError::Corrupt("truncated block checksum".into()))?;
    let stored = u32::from_le_bytes(crc_bytes);
    if crc32(content) != stored {
        return Err(FragmentError::ChecksumMismatch);
    }
    Ok(content.to_vec())
}

impl Fragment for DiskFragment {
    fn uri(&self) -> &FragmentUri {
        &self.uri
    }

    fn is_static(&self) -> bool {
        true
    }

    fn is_final(&self) -> bool {
        self.properties.is_final
    }

    fn cell_count(&self) -> u64 {
        self.properties.cell_count
    }

    fn byte_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn scan(&self, predicate: &Predicate) -> Result<Box<dyn Iterator<Item = Cell> + '_>, FragmentError> {
        if let Some(rows) = &predicate.rows {
            if let crate::cell::Bound::Inclusive(r) | crate::cell::Bound::Exclusive(r) = &rows.lower {
                if rows.lower == rows.upper.clone() && self.row_definitely_absent(r) {
                    return Ok(Box::new(std::iter::empty()));
                }
            }
        }

        let start_block = match &predicate.rows {
            Some(r) => match &r.lower {
                crate::cell::Bound::Inclusive(row) | crate::cell::Bound::Exclusive(row) => {
                    self.block_for_row(row).unwrap_or(0)
                }
                crate::cell::Bound::Unbounded => 0,
            },
            None => 0,
        };

        let predicate = predicate.clone();
        let mut cells = Vec::new();
        for entry in self.index.iter().skip(start_block) {
            let raw = read_block(&self.mmap, &entry.handle)?;
            let iter = BlockIterator::new(&raw)?;
            for cell in iter {
                let cell = cell?;
                if let Some(rows) = &predicate.rows {
                    if let crate::cell::Bound::Inclusive(hi) | crate::cell::Bound::Exclusive(hi) = &rows.upper {
                        if cell.row.as_slice() > hi.as_slice() {
                            return Ok(Box::new(cells.into_iter().filter(move |c| predicate.matches(c))));
                        }
                    }
                }
                cells.push(cell);
            }
        }
        Ok(Box::new(cells.into_iter().filter(move |c| predicate.matches(c))))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
