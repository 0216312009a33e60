//! Container handle: one open tape image of either supported format.

use std::io::{self, Read, Seek, Write};
use std::path::Path;

use format_spectrum_tap::{TapBlock, TapReader};
use format_tzx::{TzxBlock, TzxReader};

use crate::error::{Result, TapeError};

/// Tape image format, decided by the caller (TAP has no signature).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Tap,
    Tzx,
}

impl ContainerFormat {
    /// Guess the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tap" => Some(Self::Tap),
            "tzx" => Some(Self::Tzx),
            _ => None,
        }
    }
}

/// A decoded block of either format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Tap(TapBlock),
    Tzx(TzxBlock),
}

impl Block {
    #[must_use]
    pub fn offset(&self) -> u64 {
        match self {
            Self::Tap(b) => b.offset,
            Self::Tzx(b) => b.offset,
        }
    }

    /// Bytes occupied in the container.
    #[must_use]
    pub fn total_len(&self) -> u64 {
        match self {
            Self::Tap(b) => b.total_len(),
            Self::Tzx(b) => b.len,
        }
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset() + self.total_len()
    }
}

enum Decoder<S> {
    Tap(TapReader<S>),
    Tzx(TzxReader<S>),
}

/// An open, seekable tape image plus its decoder.
pub struct Container<S> {
    decoder: Decoder<S>,
}

impl<S: Read + Seek> Container<S> {
    /// Wrap a stream. TZX streams are checked for their signature here.
    pub fn open(stream: S, format: ContainerFormat) -> Result<Self> {
        let decoder = match format {
            ContainerFormat::Tap => Decoder::Tap(TapReader::new(stream)?),
            ContainerFormat::Tzx => Decoder::Tzx(TzxReader::new(stream)?),
        };
        Ok(Self { decoder })
    }

    #[must_use]
    pub fn format(&self) -> ContainerFormat {
        match self.decoder {
            Decoder::Tap(_) => ContainerFormat::Tap,
            Decoder::Tzx(_) => ContainerFormat::Tzx,
        }
    }

    /// Total size in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        match &self.decoder {
            Decoder::Tap(r) => r.len(),
            Decoder::Tzx(r) => r.len(),
        }
    }

    /// Whether the container holds no blocks' worth of bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.decoder {
            Decoder::Tap(r) => r.is_empty(),
            Decoder::Tzx(r) => r.is_empty(),
        }
    }

    /// Offset of block 0.
    #[must_use]
    pub fn first_block_offset(&self) -> u64 {
        match self.decoder {
            Decoder::Tap(_) => 0,
            Decoder::Tzx(_) => format_tzx::HEADER_LEN,
        }
    }

    /// TZX version, if this is a TZX container.
    #[must_use]
    pub fn version(&self) -> Option<(u8, u8)> {
        match &self.decoder {
            Decoder::Tap(_) => None,
            Decoder::Tzx(r) => Some(r.version()),
        }
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        match &mut self.decoder {
            Decoder::Tap(r) => r.seek_to(offset)?,
            Decoder::Tzx(r) => r.seek_to(offset)?,
        }
        Ok(())
    }

    /// Decode the block at the current position, leaving the stream at the
    /// next block. `None` at the exact end of the container.
    pub fn decode_next(&mut self) -> Result<Option<Block>> {
        Ok(match &mut self.decoder {
            Decoder::Tap(r) => r.next_block()?.map(Block::Tap),
            Decoder::Tzx(r) => r.next_block()?.map(Block::Tzx),
        })
    }

    pub fn decode_at(&mut self, offset: u64) -> Result<Option<Block>> {
        self.seek_to(offset)?;
        self.decode_next()
    }

    /// Read `buf.len()` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.len() {
            return Err(TapeError::EmptyOrTruncated);
        }
        self.seek_to(offset)?;
        self.stream_mut().read_exact(buf)?;
        Ok(())
    }

    pub fn read_byte(&mut self, offset: u64) -> Result<u8> {
        let mut byte = [0u8];
        self.read_at(offset, &mut byte)?;
        Ok(byte[0])
    }

    /// Copy `len` bytes starting at `offset` into `out`.
    pub fn copy_range<W: Write>(&mut self, offset: u64, len: u64, out: &mut W) -> Result<()> {
        self.seek_to(offset)?;
        let copied = io::copy(&mut self.stream_mut().take(len), out)?;
        if copied == len {
            Ok(())
        } else {
            Err(TapeError::EmptyOrTruncated)
        }
    }

    fn stream_mut(&mut self) -> &mut S {
        match &mut self.decoder {
            Decoder::Tap(r) => r.get_mut(),
            Decoder::Tzx(r) => r.get_mut(),
        }
    }

    pub fn into_inner(self) -> S {
        match self.decoder {
            Decoder::Tap(r) => r.into_inner(),
            Decoder::Tzx(r) => r.into_inner(),
        }
    }
}

impl<S: Read + Write + Seek> Container<S> {
    /// Overwrite bytes in place. The container length must not change.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() as u64 > self.len() {
            return Err(TapeError::EmptyOrTruncated);
        }
        self.seek_to(offset)?;
        let stream = self.stream_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }
}
