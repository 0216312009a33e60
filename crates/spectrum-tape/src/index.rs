//! Sparse block index.
//!
//! One pass over the container records the byte offset of every
//! [`INDEX_STRIDE`]th block. Seeking to an ordinal starts from the nearest
//! recorded entry and decodes at most `INDEX_STRIDE - 1` block headers
//! forward.

use std::io::{Read, Seek};

use log::debug;

use crate::container::{Block, Container};
use crate::error::{Result, TapeError};

/// Number of blocks between index entries.
pub const INDEX_STRIDE: usize = 16;

/// Coarse ordinal-to-offset table for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndex {
    /// `entries[n]` is the offset of block `n * INDEX_STRIDE`.
    entries: Vec<u64>,
    count: usize,
}

impl BlockIndex {
    /// Scan the whole container once.
    ///
    /// Any block whose length cannot be determined fails the whole scan:
    /// later blocks cannot be located without it.
    pub fn build<S: Read + Seek>(container: &mut Container<S>) -> Result<Self> {
        container.seek_to(container.first_block_offset())?;
        let mut entries = Vec::new();
        let mut count = 0usize;
        while let Some(block) = container.decode_next()? {
            if count % INDEX_STRIDE == 0 {
                entries.push(block.offset());
            }
            count += 1;
        }
        debug!("indexed {count} blocks ({} entries)", entries.len());
        Ok(Self { entries, count })
    }

    /// Number of blocks in the container.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn entries(&self) -> &[u64] {
        &self.entries
    }

    /// Byte offset at which block `ordinal` starts.
    pub fn offset_of<S: Read + Seek>(
        &self,
        container: &mut Container<S>,
        ordinal: usize,
    ) -> Result<u64> {
        if ordinal >= self.count {
            return Err(TapeError::BlockOutOfRange {
                ordinal,
                count: self.count,
            });
        }
        let mut offset = *self
            .entries
            .get(ordinal / INDEX_STRIDE)
            .ok_or(TapeError::CorruptIndex { ordinal })?;
        for _ in 0..ordinal % INDEX_STRIDE {
            match container.decode_at(offset)? {
                Some(block) => offset = block.end(),
                None => return Err(TapeError::CorruptIndex { ordinal }),
            }
        }
        Ok(offset)
    }

    /// Decode block `ordinal`.
    pub fn block_at<S: Read + Seek>(
        &self,
        container: &mut Container<S>,
        ordinal: usize,
    ) -> Result<Block> {
        let offset = self.offset_of(container, ordinal)?;
        container
            .decode_at(offset)?
            .ok_or(TapeError::CorruptIndex { ordinal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerFormat;
    use std::io::Cursor;

    /// A TAP image of `n` data blocks where block `i` carries `i % 7 + 1` bytes.
    fn tap_of(n: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..n {
            let body = vec![i as u8; i % 7 + 1];
            format_spectrum_tap::write_block(&mut data, 0xFF, &body).expect("write");
        }
        data
    }

    fn open(data: Vec<u8>) -> Container<Cursor<Vec<u8>>> {
        Container::open(Cursor::new(data), ContainerFormat::Tap).expect("open")
    }

    #[test]
    fn empty_container_has_no_blocks() {
        let mut c = open(Vec::new());
        let index = BlockIndex::build(&mut c).expect("index");
        assert!(index.is_empty());
        assert!(matches!(
            index.offset_of(&mut c, 0),
            Err(TapeError::BlockOutOfRange { ordinal: 0, count: 0 })
        ));
    }

    #[test]
    fn entries_every_stride() {
        let mut c = open(tap_of(40));
        let index = BlockIndex::build(&mut c).expect("index");
        assert_eq!(index.len(), 40);
        assert_eq!(index.entries().len(), 3);
        assert_eq!(index.entries()[0], 0);
    }

    #[test]
    fn seek_matches_linear_scan() {
        let mut c = open(tap_of(37));
        let index = BlockIndex::build(&mut c).expect("index");

        c.seek_to(0).expect("rewind");
        let mut linear = Vec::new();
        while let Some(block) = c.decode_next().expect("decode") {
            linear.push(block);
        }

        // Visit out of order to make sure nothing depends on stream position.
        for ordinal in (0..linear.len()).rev() {
            let block = index.block_at(&mut c, ordinal).expect("seek");
            assert_eq!(block, linear[ordinal]);
        }
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut c = open(tap_of(20));
        let first = BlockIndex::build(&mut c).expect("index");
        let second = BlockIndex::build(&mut c).expect("index");
        assert_eq!(first, second);
    }

    #[test]
    fn truncated_tail_fails_the_scan() {
        let mut data = tap_of(3);
        data.pop();
        let mut c = open(data);
        assert!(matches!(
            BlockIndex::build(&mut c),
            Err(TapeError::EmptyOrTruncated)
        ));
    }

    #[test]
    fn stale_index_is_detected() {
        let mut c = open(tap_of(3));
        let index = BlockIndex::build(&mut c).expect("index");
        // Swap in a shorter image behind the index's back.
        let mut c = open(tap_of(1));
        assert!(matches!(
            index.offset_of(&mut c, 2),
            Err(TapeError::CorruptIndex { ordinal: 2 })
        ));
    }
}
