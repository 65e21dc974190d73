//! Core data model: cells, row intervals, and scan predicates.
//!
//! Ordering over cells is `lex(row) ASC, lex(column) ASC, timestamp DESC` —
//! the newest version of a `(row, column)` pair sorts first so merges and
//! scans can apply "highest timestamp wins" without a second pass.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::encoding::{Decode, Encode, EncodingError};

/// The atomic unit of storage: `(row, column, timestamp, value | erasure)`.
///
/// `value = None` marks an *erasure* — a tombstone that masks older cells
/// sharing the same `(row, column)` during a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub row: Vec<u8>,
    pub column: Vec<u8>,
    pub timestamp: i64,
    pub value: Option<Vec<u8>>,
}

impl Encode for Cell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.row.encode_to(buf)?;
        self.column.encode_to(buf)?;
        self.timestamp.encode_to(buf)?;
        self.value.encode_to(buf)
    }
}

impl Decode for Cell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (row, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (column, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (value, n) = Option::<Vec<u8>>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Cell {
                row,
                column,
                timestamp,
                value,
            },
            offset,
        ))
    }
}

impl Cell {
    pub fn put(row: impl Into<Vec<u8>>, column: impl Into<Vec<u8>>, timestamp: i64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            column: column.into(),
            timestamp,
            value: Some(value.into()),
        }
    }

    pub fn erasure(row: impl Into<Vec<u8>>, column: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        Self {
            row: row.into(),
            column: column.into(),
            timestamp,
            value: None,
        }
    }

    pub fn is_erasure(&self) -> bool {
        self.value.is_none()
    }

    /// Whether this cell's `(row, column)` key equals `other`'s, ignoring timestamp.
    pub fn same_key(&self, other: &Cell) -> bool {
        self.row == other.row && self.column == other.column
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.column.cmp(&other.column))
            .then_with(|| other.timestamp.cmp(&self.timestamp))
    }
}

// ------------------------------------------------------------------------------------------------
// RowInterval
// ------------------------------------------------------------------------------------------------

/// One side of a [`RowInterval`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    /// No limit on this side.
    Unbounded,
    /// Bounded, including the given row.
    Inclusive(Vec<u8>),
    /// Bounded, excluding the given row.
    Exclusive(Vec<u8>),
}

/// A (possibly unbounded, possibly open-ended) contiguous range of rows.
///
/// Used both for a tablet's extent and for the row component of a
/// [`Predicate`]. `SuperTablet` routing and `Tablet` range validation both
/// operate in terms of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowInterval {
    pub lower: Bound,
    pub upper: Bound,
}

impl Encode for Bound {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Bound::Unbounded => 0u8.encode_to(buf),
            Bound::Inclusive(row) => {
                1u8.encode_to(buf)?;
                row.encode_to(buf)
            }
            Bound::Exclusive(row) => {
                2u8.encode_to(buf)?;
                row.encode_to(buf)
            }
        }
    }
}

impl Decode for Bound {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u8::decode_from(buf)?;
        let bound = match tag {
            0 => Bound::Unbounded,
            1 => {
                let (row, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                Bound::Inclusive(row)
            }
            2 => {
                let (row, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                Bound::Exclusive(row)
            }
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "Bound",
                });
            }
        };
        Ok((bound, offset))
    }
}

impl Encode for RowInterval {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.lower.encode_to(buf)?;
        self.upper.encode_to(buf)
    }
}

impl Decode for RowInterval {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (lower, n) = Bound::decode_from(&buf[offset..])?;
        offset += n;
        let (upper, n) = Bound::decode_from(&buf[offset..])?;
        offset += n;
        Ok((RowInterval { lower, upper }, offset))
    }
}

impl RowInterval {
    pub fn everything() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn new(lower: Bound, upper: Bound) -> Self {
        Self { lower, upper }
    }

    /// `(lo, hi]` — exclusive lower, inclusive upper. The shape used for
    /// tablet extents: every tablet but the first has an exclusive lower
    /// bound at the previous tablet's split row.
    pub fn lo_exclusive_hi_inclusive(lo: Option<Vec<u8>>, hi: Option<Vec<u8>>) -> Self {
        Self {
            lower: lo.map(Bound::Exclusive).unwrap_or(Bound::Unbounded),
            upper: hi.map(Bound::Inclusive).unwrap_or(Bound::Unbounded),
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self.lower, Bound::Unbounded) && matches!(self.upper, Bound::Unbounded)
    }

    pub fn contains(&self, row: &[u8]) -> bool {
        let lower_ok = match &self.lower {
            Bound::Unbounded => true,
            Bound::Inclusive(b) => row >= b.as_slice(),
            Bound::Exclusive(b) => row > b.as_slice(),
        };
        let upper_ok = match &self.upper {
            Bound::Unbounded => true,
            Bound::Inclusive(b) => row <= b.as_slice(),
            Bound::Exclusive(b) => row < b.as_slice(),
        };
        lower_ok && upper_ok
    }

    /// Whether `self` is entirely contained within `other`.
    pub fn contained_in(&self, other: &RowInterval) -> bool {
        let lower_ok = match (&self.lower, &other.lower) {
            (_, Bound::Unbounded) => true,
            (Bound::Unbounded, _) => false,
            (Bound::Inclusive(a), Bound::Inclusive(b)) => a >= b,
            (Bound::Inclusive(a), Bound::Exclusive(b)) => a > b,
            (Bound::Exclusive(a), Bound::Inclusive(b)) => a >= b,
            (Bound::Exclusive(a), Bound::Exclusive(b)) => a >= b,
        };
        let upper_ok = match (&self.upper, &other.upper) {
            (_, Bound::Unbounded) => true,
            (Bound::Unbounded, _) => false,
            (Bound::Inclusive(a), Bound::Inclusive(b)) => a <= b,
            (Bound::Inclusive(a), Bound::Exclusive(b)) => a < b,
            (Bound::Exclusive(a), Bound::Inclusive(b)) => a <= b,
            (Bound::Exclusive(a), Bound::Exclusive(b)) => a <= b,
        };
        lower_ok && upper_ok
    }

    /// Clip `self` against `other`, returning the overlapping interval, or
    /// `None` if they don't overlap.
    pub fn clip(&self, other: &RowInterval) -> Option<RowInterval> {
        let lower = match (&self.lower, &other.lower) {
            (Bound::Unbounded, b) => b.clone(),
            (a, Bound::Unbounded) => a.clone(),
            (Bound::Inclusive(a), Bound::Inclusive(b)) => {
                if a >= b { Bound::Inclusive(a.clone()) } else { Bound::Inclusive(b.clone()) }
            }
            (a @ Bound::Exclusive(av), b @ Bound::Exclusive(bv)) => {
                if av >= bv { a.clone() } else { b.clone() }
            }
            (Bound::Inclusive(a), Bound::Exclusive(b)) => {
                if a > b { Bound::Inclusive(a.clone()) } else { Bound::Exclusive(b.clone()) }
            }
            (Bound::Exclusive(a), Bound::Inclusive(b)) => {
                if a >= b { Bound::Exclusive(a.clone()) } else { Bound::Inclusive(b.clone()) }
            }
        };
        let upper = match (&self.upper, &other.upper) {
            (Bound::Unbounded, b) => b.clone(),
            (a, Bound::Unbounded) => a.clone(),
            (Bound::Inclusive(a), Bound::Inclusive(b)) => {
                if a <= b { Bound::Inclusive(a.clone()) } else { Bound::Inclusive(b.clone()) }
            }
            (a @ Bound::Exclusive(av), b @ Bound::Exclusive(bv)) => {
                if av <= bv { a.clone() } else { b.clone() }
            }
            (Bound::Inclusive(a), Bound::Exclusive(b)) => {
                if a < b { Bound::Inclusive(a.clone()) } else { Bound::Exclusive(b.clone()) }
            }
            (Bound::Exclusive(a), Bound::Inclusive(b)) => {
                if a <= b { Bound::Exclusive(a.clone()) } else { Bound::Inclusive(b.clone()) }
            }
        };
        let clipped = RowInterval { lower, upper };
        if clipped.is_empty() { None } else { Some(clipped) }
    }

    /// Best-effort emptiness check: only detects the common case where both
    /// bounds are concrete and cross.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Inclusive(a), Bound::Inclusive(b)) => a > b,
            (Bound::Inclusive(a), Bound::Exclusive(b))
            | (Bound::Exclusive(a), Bound::Inclusive(b))
            | (Bound::Exclusive(a), Bound::Exclusive(b)) => a >= b,
            _ => false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Predicate
// ------------------------------------------------------------------------------------------------

/// A scan predicate: conjunction of an optional row restriction, an optional
/// column-family set, an optional timestamp range, and `maxHistory`.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    pub rows: Option<RowInterval>,
    pub columns: Option<HashSet<Vec<u8>>>,
    pub min_timestamp: Option<i64>,
    pub max_timestamp: Option<i64>,
    /// Cap on versions retained per `(row, column)`, applied post-merge.
    /// `0` means unlimited.
    pub max_history: usize,
}

impl Predicate {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn matches_column(&self, column: &[u8]) -> bool {
        match &self.columns {
            None => true,
            Some(set) => set.contains(column),
        }
    }

    pub fn matches_timestamp(&self, timestamp: i64) -> bool {
        self.min_timestamp.is_none_or(|min| timestamp >= min)
            && self.max_timestamp.is_none_or(|max| timestamp <= max)
    }

    pub fn matches(&self, cell: &Cell) -> bool {
        let row_ok = match &self.rows {
            None => true,
            Some(r) => r.contains(&cell.row),
        };
        row_ok && self.matches_column(&cell.column) && self.matches_timestamp(cell.timestamp)
    }

    /// A copy of this predicate with `max_history` stripped to zero — used
    /// by `Tablet::scan`/`SuperTablet::scan`, which apply history filtering
    /// as a post-merge step rather than inside the merge itself.
    pub fn without_history(&self) -> (Predicate, usize) {
        let history = self.max_history;
        let mut p = self.clone();
        p.max_history = 0;
        (p, history)
    }

    /// Intersect this predicate's row restriction with `rows`, returning a
    /// new predicate scoped to a single tablet's extent.
    pub fn clip_rows(&self, rows: &RowInterval) -> Predicate {
        let mut p = self.clone();
        p.rows = Some(match &self.rows {
            Some(r) => r.clip(rows).unwrap_or_else(|| RowInterval {
                lower: rows.upper.clone(),
                upper: rows.upper.clone(),
            }),
            None => rows.clone(),
        });
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ordering_is_row_column_ts_desc() {
        let a = Cell::put("a", "x", 1, "1");
        let b = Cell::put("a", "x", 2, "2");
        let c = Cell::put("a", "y", 1, "3");
        let mut v = vec![a.clone(), b.clone(), c.clone()];
        v.sort();
        assert_eq!(v, vec![b, a, c]);
    }

    #[test]
    fn row_interval_contains_bounds() {
        let r = RowInterval::lo_exclusive_hi_inclusive(Some(b"f".to_vec()), Some(b"m".to_vec()));
        assert!(!r.contains(b"f"));
        assert!(r.contains(b"g"));
        assert!(r.contains(b"m"));
        assert!(!r.contains(b"n"));
    }

    #[test]
    fn predicate_clip_rows_narrows_extent() {
        let pred = Predicate::everything();
        let tablet_rows = RowInterval::lo_exclusive_hi_inclusive(Some(b"a".to_vec()), Some(b"m".to_vec()));
        let clipped = pred.clip_rows(&tablet_rows);
        assert_eq!(clipped.rows, Some(tablet_rows));
    }
}
