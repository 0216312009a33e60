//! Block editor: selection, rename, move and remove.
//!
//! Rename patches the header in place. Move and remove write a reordered
//! copy of the container to a temporary file next to it and then replace
//! the original, so an interrupted edit never leaves a half-written tape.

use std::collections::BTreeSet;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use format_spectrum_tap::HEADER_BLOCK_LEN;
use format_tzx::BlockKind;
use log::{info, warn};
use tempfile::NamedTempFile;

use crate::container::{Block, Container};
use crate::error::{Result, TapeError};
use crate::index::BlockIndex;
use crate::listing::standard_header;

/// Block ordinals marked for bulk move/remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection(BTreeSet<usize>);

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip `ordinal`'s membership. Returns whether it is now selected.
    pub fn toggle(&mut self, ordinal: usize) -> bool {
        if self.0.remove(&ordinal) {
            false
        } else {
            self.0.insert(ordinal);
            true
        }
    }

    #[must_use]
    pub fn contains(&self, ordinal: usize) -> bool {
        self.0.contains(&ordinal)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Selected ordinals in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<usize> for Selection {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    /// The name was longer than the header field and was cut short.
    Truncated,
}

/// Rewrite the name field of the header block at `ordinal`, recomputing the
/// checksum. The container length never changes.
pub fn rename<S: Read + Write + Seek>(
    container: &mut Container<S>,
    index: &BlockIndex,
    ordinal: usize,
    name: &str,
) -> Result<RenameOutcome> {
    let (offset, payload) = match index.block_at(container, ordinal)? {
        Block::Tap(tap) => {
            let offset = tap.payload_offset();
            let flag = tap.flag.unwrap_or(0);
            (offset, tap.header.map(|header| (flag, header)))
        }
        Block::Tzx(tzx) => match tzx.kind {
            BlockKind::StandardSpeed { data, .. } if data.len == u32::from(HEADER_BLOCK_LEN) => {
                let mut payload = [0u8; HEADER_BLOCK_LEN as usize];
                container.read_at(data.offset, &mut payload)?;
                (data.offset, standard_header(&payload).map(|h| (payload[0], h)))
            }
            _ => (0, None),
        },
    };
    let Some((flag, mut header)) = payload else {
        return Err(TapeError::NotRenamable { ordinal });
    };

    let truncated = header.set_name(name);
    container.write_at(offset, &header.encode_payload(flag))?;
    if truncated {
        warn!("name {name:?} truncated to {:?}", header.name());
        Ok(RenameOutcome::Truncated)
    } else {
        info!("renamed block {ordinal} to {:?}", header.name());
        Ok(RenameOutcome::Renamed)
    }
}

/// Block order after moving the selection to sit before `before`.
///
/// Selected blocks keep their relative order, as do the others. `before`
/// may equal `count` to move the selection to the end.
pub fn plan_move(count: usize, selection: &Selection, before: usize) -> Result<Vec<usize>> {
    if selection.is_empty() {
        return Err(TapeError::NoSelection);
    }
    check_range(count, selection)?;
    if before > count {
        return Err(TapeError::BlockOutOfRange {
            ordinal: before,
            count,
        });
    }
    let unselected = (0..count).filter(|&o| !selection.contains(o));
    let mut order: Vec<usize> = unselected.clone().filter(|&o| o < before).collect();
    order.extend(selection.iter());
    order.extend(unselected.filter(|&o| o >= before));
    Ok(order)
}

/// Block order after removing `targets`.
pub fn plan_remove(count: usize, targets: &Selection) -> Result<Vec<usize>> {
    if targets.is_empty() {
        return Err(TapeError::NoSelection);
    }
    check_range(count, targets)?;
    Ok((0..count).filter(|&o| !targets.contains(o)).collect())
}

fn check_range(count: usize, selection: &Selection) -> Result<()> {
    match selection.iter().find(|&o| o >= count) {
        Some(ordinal) => Err(TapeError::BlockOutOfRange { ordinal, count }),
        None => Ok(()),
    }
}

/// Write the container's header bytes, then its blocks in `order`.
pub fn rewrite<S: Read + Seek, W: Write>(
    container: &mut Container<S>,
    index: &BlockIndex,
    order: &[usize],
    out: &mut W,
) -> Result<()> {
    // One linear pass for every block's extent; payloads are not read.
    container.seek_to(container.first_block_offset())?;
    let mut extents = Vec::with_capacity(index.len());
    while let Some(block) = container.decode_next()? {
        extents.push((block.offset(), block.total_len()));
    }
    if extents.len() != index.len() {
        return Err(TapeError::CorruptIndex {
            ordinal: extents.len(),
        });
    }

    container.copy_range(0, container.first_block_offset(), out)?;
    for &ordinal in order {
        let &(offset, len) = extents.get(ordinal).ok_or(TapeError::BlockOutOfRange {
            ordinal,
            count: extents.len(),
        })?;
        container.copy_range(offset, len, out)?;
    }
    Ok(())
}

/// Rewrite `path` with its blocks in `order`, atomically replacing it.
pub fn replace_file<S: Read + Seek>(
    path: &Path,
    container: &mut Container<S>,
    index: &BlockIndex,
    order: &[usize],
) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        rewrite(container, index, order, &mut out)?;
        out.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    info!("rewrote {} with {} blocks", path.display(), order.len());
    Ok(())
}
