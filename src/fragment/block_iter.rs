//! Block-local iteration over encoded cells.
//!
//! A data block is a flat concatenation of encoded records with no further
//! framing, and this type decodes them one at a time, surfacing decode
//! errors to the caller instead of silently truncating — a fragment block
//! is never partially written (it is framed by the writer's length/CRC
//! wrapper before it ever reaches disk), so any decode failure here means
//! corruption, not an in-progress write.

use super::FragmentError;
use crate::cell::Cell;
use crate::encoding::{self};

pub struct BlockIterator<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> BlockIterator<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, FragmentError> {
        Ok(Self { data, cursor: 0 })
    }
}

impl Iterator for BlockIterator<'_> {
    type Item = Result<Cell, FragmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.data.len() {
            return None;
        }
        match encoding::decode_from_slice::<Cell>(&self.data[self.cursor..]) {
            Ok((cell, consumed)) => {
                self.cursor += consumed;
                Some(Ok(cell))
            }
            Err(e) => {
                self.cursor = self.data.len();
                Some(Err(FragmentError::Encoding(e)))
            }
        }
    }
}
