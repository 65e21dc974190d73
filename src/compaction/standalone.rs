//! Standalone range compaction (§4.6, `Compactor::compact`).
//!
//! Grounded on `original_source/.../server/Compactor.cc::compact`: each
//! input range's fragment list is merged independently, but outputs are
//! packed across ranges into chunked files — a chunk is closed and a new one
//! started once its accumulated size crosses `OUTPUT_SPLIT_SIZE`. A range
//! whose merge produces no cells (every cell in it was erasure-shadowed) is
//! mapped to [`CompactionOutput::Empty`] instead of a file.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::cell::{Predicate, RowInterval};
use crate::fragment::writer::FragmentWriter;
use crate::fragment::merge::FragmentMerge;
use crate::fragment::{Fragment, FragmentError};

/// Matches the source's `OUTPUT_SPLIT_SIZE`: split outputs once they cross 1 GiB.
pub const OUTPUT_SPLIT_SIZE: u64 = 1 << 30;

/// One range's compaction input: the range itself and the fragments that
/// cover it, oldest-to-newest stack order.
pub struct RangeCompactionInput {
    pub range: RowInterval,
    pub fragments: Vec<Arc<dyn Fragment>>,
}

/// Where a compacted range's surviving cells landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutput {
    File(PathBuf),
    /// Every cell in the range was shadowed by an erasure; nothing survived.
    Empty,
}

/// Compacts each range in `inputs` against `predicate`, writing merged cells
/// to files allocated by `next_path`, and closing a file once its running
/// size crosses `output_split_size`. Returns one `CompactionOutput` per
/// input range, in input order.
pub fn compact(
    inputs: Vec<RangeCompactionInput>,
    predicate: &Predicate,
    mut next_path: impl FnMut() -> PathBuf,
    output_split_size: u64,
) -> Result<Vec<(RowInterval, CompactionOutput)>, FragmentError> {
    let mut results = Vec::with_capacity(inputs.len());

    let mut pending_path: Option<PathBuf> = None;
    let mut pending_cells: Vec<crate::cell::Cell> = Vec::new();
    let mut pending_size: u64 = 0;
    let mut pending_ranges: Vec<RowInterval> = Vec::new();

    let mut total_cells = 0u64;
    let mut total_size = 0u64;

    for input in inputs {
        let range_predicate = predicate.clip_rows(&input.range);
        let merge = FragmentMerge::new(&input.fragments, &range_predicate, false)?;

        let before = pending_cells.len();
        for cell in merge {
            pending_size += cell.row.len() as u64 + cell.column.len() as u64 + cell.value.as_ref().map_or(0, Vec::len) as u64 + 24;
            pending_cells.push(cell);
        }
        let cells_in_range = pending_cells.len() - before;

        if cells_in_range == 0 {
            results.push((input.range, CompactionOutput::Empty));
        } else {
            if pending_path.is_none() {
                pending_path = Some(next_path());
            }
            pending_ranges.push(input.range);
        }

        if pending_size >= output_split_size {
            flush_chunk(
                &mut pending_path,
                &mut pending_cells,
                &mut pending_ranges,
                &mut results,
                &mut total_cells,
                &mut total_size,
                pending_size,
            )?;
            pending_size = 0;
        }
    }

    if pending_path.is_some() {
        let size = pending_size;
        flush_chunk(
            &mut pending_path,
            &mut pending_cells,
            &mut pending_ranges,
            &mut results,
            &mut total_cells,
            &mut total_size,
            size,
        )?;
    }

    info!(total_cells, total_size, "standalone compaction complete");
    Ok(results)
}

#[allow(clippy::too_many_arguments)]
fn flush_chunk(
    pending_path: &mut Option<PathBuf>,
    pending_cells: &mut Vec<crate::cell::Cell>,
    pending_ranges: &mut Vec<RowInterval>,
    results: &mut Vec<(RowInterval, CompactionOutput)>,
    total_cells: &mut u64,
    total_size: &mut u64,
    chunk_size: u64,
) -> Result<(), FragmentError> {
    let Some(path) = pending_path.take() else { return Ok(()) };
    let cell_count = pending_cells.len();
    let cells = std::mem::take(pending_cells);
    FragmentWriter::new(&path).build(cells.into_iter(), cell_count, false)?;

    *total_cells += cell_count as u64;
    *total_size += chunk_size;

    for range in pending_ranges.drain(..) {
        results.push((range, CompactionOutput::File(path.clone())));
    }
    Ok(())
}
