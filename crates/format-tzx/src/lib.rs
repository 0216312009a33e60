//! TZX tape image block decoder.
//!
//! TZX encodes tape signals as T-state-accurate pulse sequences. Unlike TAP
//! (which only stores the bytes the ROM loader would see), TZX describes the
//! signal itself, supporting turbo loaders, custom protection and direct
//! sample recordings.
//!
//! # Format
//!
//! A TZX file starts with a 10-byte header (`"ZXTape!" + 0x1A + major + minor`)
//! followed by a sequence of blocks. Each block starts with an ID byte that
//! determines its structure.
//!
//! The reader decodes just enough of each block to know its total length and
//! the fields needed for playback. Signal payloads are described by a
//! [`DataSpan`] and skipped with a relative seek, never read into memory.
//!
//! Reference: <https://worldofspectrum.net/TZXformat.html>

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

/// TZX header magic: "ZXTape!" + 0x1A.
pub const MAGIC: &[u8; 8] = b"ZXTape!\x1A";

/// Size of the file header; the first block starts here.
pub const HEADER_LEN: u64 = 10;

/// Errors raised while decoding a TZX stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("I/O error reading TZX: {0}")]
    Io(#[from] io::Error),

    #[error("invalid TZX signature (expected \"ZXTape!\" + 0x1A)")]
    BadSignature,

    #[error("truncated TZX {context} at offset {offset}: need {needed} bytes, {available} remain")]
    Truncated {
        context: &'static str,
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("unsupported TZX block ${id:02X} at offset {offset}")]
    UnsupportedBlock { id: u8, offset: u64 },
}

/// A run of payload bytes inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSpan {
    pub offset: u64,
    pub len: u32,
}

impl DataSpan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.len)
    }
}

/// Sample encoding of a CSW recording block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CswCompression {
    /// Run-length encoded pulse widths.
    Rle,
    /// Zlib-compressed RLE.
    ZRle,
    Other(u8),
}

impl CswCompression {
    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Rle,
            2 => Self::ZRle,
            other => Self::Other(other),
        }
    }
}

/// Kind-specific fields of a TZX block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Block $10: Standard speed data (ROM timing).
    StandardSpeed { pause_ms: u16, data: DataSpan },
    /// Block $11: Turbo speed data (custom timing).
    TurboSpeed {
        pilot_pulse: u16,
        sync1: u16,
        sync2: u16,
        zero_pulse: u16,
        one_pulse: u16,
        pilot_count: u16,
        used_bits: u8,
        pause_ms: u16,
        data: DataSpan,
    },
    /// Block $12: Pure tone (repeated single pulse).
    PureTone { pulse_len: u16, count: u16 },
    /// Block $13: Pulse sequence (arbitrary pulse lengths).
    PulseSequence { pulses: Vec<u16> },
    /// Block $14: Pure data (no pilot or sync, just data bits).
    PureData {
        zero_pulse: u16,
        one_pulse: u16,
        used_bits: u8,
        pause_ms: u16,
        data: DataSpan,
    },
    /// Block $15: Direct recording, one bit per sample.
    DirectRecording {
        tstates_per_sample: u16,
        pause_ms: u16,
        used_bits: u8,
        data: DataSpan,
    },
    /// Block $18: CSW recording.
    CswRecording {
        pause_ms: u16,
        sample_rate: u32,
        compression: CswCompression,
        stored_pulses: u32,
        data: DataSpan,
    },
    /// Block $20: Pause, or stop the tape when the duration is zero.
    Pause { duration_ms: u16 },
    /// Block $21: Group start.
    GroupStart { name: String },
    /// Block $22: Group end.
    GroupEnd,
    /// Block $23: Jump relative to this block.
    Jump { offset: i16 },
    /// Block $24: Loop start.
    LoopStart { repetitions: u16 },
    /// Block $25: Loop end.
    LoopEnd,
    /// Block $26: Call sequence (relative offsets, played in order).
    CallSequence { targets: Vec<i16> },
    /// Block $27: Return from sequence.
    Return,
    /// Block $28: Select block.
    Select,
    /// Block $2A: Stop the tape if in 48K mode.
    StopIf48K,
    /// Block $2B: Set signal level.
    SetSignalLevel { level: bool },
    /// Block $30: Text description.
    TextDescription { text: String },
    /// Block $31: Message.
    Message { text: String },
    /// Block $32: Archive info.
    ArchiveInfo,
    /// Block $33: Hardware type.
    HardwareType,
    /// Block $35: Custom info.
    CustomInfo,
    /// Block $5A: "Glue" block left behind by concatenating files.
    Glue,
}

impl BlockKind {
    /// Block ID byte.
    #[must_use]
    pub fn id(&self) -> u8 {
        match self {
            Self::StandardSpeed { .. } => 0x10,
            Self::TurboSpeed { .. } => 0x11,
            Self::PureTone { .. } => 0x12,
            Self::PulseSequence { .. } => 0x13,
            Self::PureData { .. } => 0x14,
            Self::DirectRecording { .. } => 0x15,
            Self::CswRecording { .. } => 0x18,
            Self::Pause { .. } => 0x20,
            Self::GroupStart { .. } => 0x21,
            Self::GroupEnd => 0x22,
            Self::Jump { .. } => 0x23,
            Self::LoopStart { .. } => 0x24,
            Self::LoopEnd => 0x25,
            Self::CallSequence { .. } => 0x26,
            Self::Return => 0x27,
            Self::Select => 0x28,
            Self::StopIf48K => 0x2A,
            Self::SetSignalLevel { .. } => 0x2B,
            Self::TextDescription { .. } => 0x30,
            Self::Message { .. } => 0x31,
            Self::ArchiveInfo => 0x32,
            Self::HardwareType => 0x33,
            Self::CustomInfo => 0x35,
            Self::Glue => 0x5A,
        }
    }

    /// Payload carried by data-bearing kinds.
    #[must_use]
    pub fn data(&self) -> Option<DataSpan> {
        match self {
            Self::StandardSpeed { data, .. }
            | Self::TurboSpeed { data, .. }
            | Self::PureData { data, .. }
            | Self::DirectRecording { data, .. }
            | Self::CswRecording { data, .. } => Some(*data),
            _ => None,
        }
    }
}

/// Human-readable name of a block ID, including kinds that are recognised
/// but not playable.
#[must_use]
pub fn kind_name(id: u8) -> Option<&'static str> {
    Some(match id {
        0x10 => "Standard",
        0x11 => "Turbo",
        0x12 => "Pure Tone",
        0x13 => "Pulse sequence",
        0x14 => "Pure Data",
        0x15 => "DRB",
        0x18 => "CSW",
        0x19 => "GDB",
        0x20 => "Pause (ms.)",
        0x21 => "Group start",
        0x22 => "Group end",
        0x23 => "Jump to block",
        0x24 => "Loop start",
        0x25 => "Loop end",
        0x26 => "Call sequence",
        0x27 => "Return from sequence",
        0x28 => "Select block",
        0x2A => "Stop if in 48K mode",
        0x2B => "Set signal level",
        0x30 => "Text",
        0x31 => "Message block",
        0x32 => "Archive info",
        0x33 => "Hardware type",
        0x35 => "Custom info",
        0x5A => "Glue block",
        _ => return None,
    })
}

/// Structural descriptor of one TZX block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TzxBlock {
    /// Offset of the ID byte.
    pub offset: u64,
    /// Bytes occupied in the container, including the ID byte.
    pub len: u64,
    pub kind: BlockKind,
}

impl TzxBlock {
    #[must_use]
    pub fn id(&self) -> u8 {
        self.kind.id()
    }

    /// Offset of the block that follows this one.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Streaming TZX block reader.
pub struct TzxReader<R> {
    reader: R,
    len: u64,
    major: u8,
    minor: u8,
}

impl<R: Read + Seek> TzxReader<R> {
    /// Wrap a stream and validate its header. The stream is left at the
    /// first block.
    pub fn new(mut reader: R) -> Result<Self, DecodeError> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        if len < HEADER_LEN {
            return Err(DecodeError::Truncated {
                context: "header",
                offset: 0,
                needed: HEADER_LEN,
                available: len,
            });
        }

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(DecodeError::BadSignature);
        }
        let major = reader.read_u8()?;
        let minor = reader.read_u8()?;

        Ok(Self {
            reader,
            len,
            major,
            minor,
        })
    }

    /// Format version as `(major, minor)`.
    #[must_use]
    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    /// Total stream length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len <= HEADER_LEN
    }

    pub fn position(&mut self) -> io::Result<u64> {
        self.reader.stream_position()
    }

    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Decode the block at the current position and leave the stream at the
    /// start of the next one.
    ///
    /// Returns `Ok(None)` at the exact end of the stream. On error the stream
    /// is returned to where it was.
    pub fn next_block(&mut self) -> Result<Option<TzxBlock>, DecodeError> {
        let offset = self.reader.stream_position()?;
        if offset >= self.len {
            return Ok(None);
        }
        match self.decode(offset) {
            Ok(block) => Ok(Some(block)),
            Err(e) => {
                self.reader.seek(SeekFrom::Start(offset))?;
                Err(e)
            }
        }
    }

    fn decode(&mut self, offset: u64) -> Result<TzxBlock, DecodeError> {
        let id = self.reader.read_u8()?;
        let body = offset + 1;

        let kind = match id {
            0x10 => {
                self.need(body, 4, "Standard Speed header")?;
                let pause_ms = self.u16()?;
                let len = u32::from(self.u16()?);
                BlockKind::StandardSpeed {
                    pause_ms,
                    data: self.span(body + 4, len, "Standard Speed data")?,
                }
            }
            0x11 => {
                self.need(body, 18, "Turbo Speed header")?;
                let pilot_pulse = self.u16()?;
                let sync1 = self.u16()?;
                let sync2 = self.u16()?;
                let zero_pulse = self.u16()?;
                let one_pulse = self.u16()?;
                let pilot_count = self.u16()?;
                let used_bits = self.reader.read_u8()?;
                let pause_ms = self.u16()?;
                let len = self.reader.read_u24::<LittleEndian>()?;
                BlockKind::TurboSpeed {
                    pilot_pulse,
                    sync1,
                    sync2,
                    zero_pulse,
                    one_pulse,
                    pilot_count,
                    used_bits,
                    pause_ms,
                    data: self.span(body + 18, len, "Turbo Speed data")?,
                }
            }
            0x12 => {
                self.need(body, 4, "Pure Tone")?;
                let pulse_len = self.u16()?;
                let count = self.u16()?;
                BlockKind::PureTone { pulse_len, count }
            }
            0x13 => {
                self.need(body, 1, "Pulse Sequence count")?;
                let count = u64::from(self.reader.read_u8()?);
                self.need(body + 1, count * 2, "Pulse Sequence data")?;
                let mut pulses = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    pulses.push(self.u16()?);
                }
                BlockKind::PulseSequence { pulses }
            }
            0x14 => {
                self.need(body, 10, "Pure Data header")?;
                let zero_pulse = self.u16()?;
                let one_pulse = self.u16()?;
                let used_bits = self.reader.read_u8()?;
                let pause_ms = self.u16()?;
                let len = self.reader.read_u24::<LittleEndian>()?;
                BlockKind::PureData {
                    zero_pulse,
                    one_pulse,
                    used_bits,
                    pause_ms,
                    data: self.span(body + 10, len, "Pure Data data")?,
                }
            }
            0x15 => {
                self.need(body, 8, "Direct Recording header")?;
                let tstates_per_sample = self.u16()?;
                let pause_ms = self.u16()?;
                let used_bits = self.reader.read_u8()?;
                let len = self.reader.read_u24::<LittleEndian>()?;
                BlockKind::DirectRecording {
                    tstates_per_sample,
                    pause_ms,
                    used_bits,
                    data: self.span(body + 8, len, "Direct Recording data")?,
                }
            }
            0x18 => {
                self.need(body, 14, "CSW Recording header")?;
                let block_len = self.reader.read_u32::<LittleEndian>()?;
                if block_len < 10 {
                    return Err(DecodeError::Truncated {
                        context: "CSW Recording header",
                        offset: body + 4,
                        needed: 10,
                        available: u64::from(block_len),
                    });
                }
                let pause_ms = self.u16()?;
                let sample_rate = self.reader.read_u24::<LittleEndian>()?;
                let compression = CswCompression::from_byte(self.reader.read_u8()?);
                let stored_pulses = self.reader.read_u32::<LittleEndian>()?;
                BlockKind::CswRecording {
                    pause_ms,
                    sample_rate,
                    compression,
                    stored_pulses,
                    data: self.span(body + 14, block_len - 10, "CSW Recording data")?,
                }
            }
            0x20 => {
                self.need(body, 2, "Pause")?;
                BlockKind::Pause {
                    duration_ms: self.u16()?,
                }
            }
            0x21 => BlockKind::GroupStart {
                name: self.short_text(body, "Group Start name")?,
            },
            0x22 => BlockKind::GroupEnd,
            0x23 => {
                self.need(body, 2, "Jump")?;
                BlockKind::Jump {
                    offset: self.reader.read_i16::<LittleEndian>()?,
                }
            }
            0x24 => {
                self.need(body, 2, "Loop Start")?;
                BlockKind::LoopStart {
                    repetitions: self.u16()?,
                }
            }
            0x25 => BlockKind::LoopEnd,
            0x26 => {
                self.need(body, 2, "Call Sequence count")?;
                let count = u64::from(self.u16()?);
                self.need(body + 2, count * 2, "Call Sequence offsets")?;
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    targets.push(self.reader.read_i16::<LittleEndian>()?);
                }
                BlockKind::CallSequence { targets }
            }
            0x27 => BlockKind::Return,
            0x28 => {
                self.need(body, 2, "Select Block length")?;
                let len = u64::from(self.u16()?);
                self.skip(body + 2, len, "Select Block body")?;
                BlockKind::Select
            }
            0x2A => {
                // 4-byte block length, always 0
                self.skip(body, 4, "Stop If 48K")?;
                BlockKind::StopIf48K
            }
            0x2B => {
                // 4-byte block length (always 1) + 1-byte level
                self.need(body, 5, "Set Signal Level")?;
                self.reader.seek(SeekFrom::Current(4))?;
                BlockKind::SetSignalLevel {
                    level: self.reader.read_u8()? != 0,
                }
            }
            0x30 => BlockKind::TextDescription {
                text: self.short_text(body, "Text Description")?,
            },
            0x31 => {
                // 1-byte display time precedes the text
                self.need(body, 1, "Message time")?;
                self.reader.seek(SeekFrom::Current(1))?;
                BlockKind::Message {
                    text: self.short_text(body + 1, "Message text")?,
                }
            }
            0x32 => {
                self.need(body, 2, "Archive Info length")?;
                let len = u64::from(self.u16()?);
                self.skip(body + 2, len, "Archive Info body")?;
                BlockKind::ArchiveInfo
            }
            0x33 => {
                self.need(body, 1, "Hardware Type count")?;
                let count = u64::from(self.reader.read_u8()?);
                self.skip(body + 1, count * 3, "Hardware Type entries")?;
                BlockKind::HardwareType
            }
            0x35 => {
                self.need(body, 20, "Custom Info header")?;
                self.reader.seek(SeekFrom::Current(16))?;
                let len = u64::from(self.reader.read_u32::<LittleEndian>()?);
                self.skip(body + 20, len, "Custom Info body")?;
                BlockKind::CustomInfo
            }
            0x5A => {
                self.skip(body, 9, "Glue")?;
                BlockKind::Glue
            }
            // $19 (generalized data) is recognised but never decoded, along
            // with every ID outside the table.
            _ => return Err(DecodeError::UnsupportedBlock { id, offset }),
        };

        let end = self.reader.stream_position()?;
        Ok(TzxBlock {
            offset,
            len: end - offset,
            kind,
        })
    }

    fn u16(&mut self) -> io::Result<u16> {
        self.reader.read_u16::<LittleEndian>()
    }

    /// Describe a payload starting at `offset` and seek past it.
    fn span(&mut self, offset: u64, len: u32, context: &'static str) -> Result<DataSpan, DecodeError> {
        self.skip(offset, u64::from(len), context)?;
        Ok(DataSpan { offset, len })
    }

    fn skip(&mut self, offset: u64, len: u64, context: &'static str) -> Result<(), DecodeError> {
        self.need(offset, len, context)?;
        self.reader.seek(SeekFrom::Start(offset + len))?;
        Ok(())
    }

    /// Read a length-prefixed string of at most 255 bytes.
    fn short_text(&mut self, offset: u64, context: &'static str) -> Result<String, DecodeError> {
        self.need(offset, 1, context)?;
        let len = self.reader.read_u8()?;
        self.need(offset + 1, u64::from(len), context)?;
        let mut buf = vec![0u8; usize::from(len)];
        self.reader.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    }

    fn need(&self, offset: u64, needed: u64, context: &'static str) -> Result<(), DecodeError> {
        if offset + needed > self.len {
            Err(DecodeError::Truncated {
                context,
                offset,
                needed,
                available: self.len.saturating_sub(offset),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Build a minimal TZX file header.
    fn tzx_header() -> Vec<u8> {
        let mut h = MAGIC.to_vec();
        h.push(1); // major
        h.push(20); // minor
        h
    }

    fn read_all(data: Vec<u8>) -> Result<Vec<TzxBlock>, DecodeError> {
        let mut reader = TzxReader::new(Cursor::new(data))?;
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_block()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn single(data: Vec<u8>) -> TzxBlock {
        let mut blocks = read_all(data).expect("valid block");
        assert_eq!(blocks.len(), 1);
        blocks.remove(0)
    }

    #[test]
    fn valid_header_empty() {
        let reader = TzxReader::new(Cursor::new(tzx_header())).expect("valid empty TZX");
        assert_eq!(reader.version(), (1, 20));
        assert!(reader.is_empty());
        assert!(read_all(tzx_header()).expect("no blocks").is_empty());
    }

    #[test]
    fn too_short() {
        assert!(matches!(
            TzxReader::new(Cursor::new(vec![0u8; 9])),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn bad_magic() {
        let mut data = tzx_header();
        data[0] = b'X';
        assert!(matches!(
            TzxReader::new(Cursor::new(data)),
            Err(DecodeError::BadSignature)
        ));
    }

    #[test]
    fn standard_speed_block_is_skipped_not_read() {
        let mut data = tzx_header();
        data.push(0x10);
        data.extend_from_slice(&1000u16.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&[0x00, 0x01, 0x02, 0x03]);

        let block = single(data);
        assert_eq!(block.offset, 10);
        assert_eq!(block.len, 1 + 4 + 4);
        assert_eq!(
            block.kind,
            BlockKind::StandardSpeed {
                pause_ms: 1000,
                data: DataSpan { offset: 15, len: 4 },
            }
        );
    }

    #[test]
    fn turbo_speed_block() {
        let mut data = tzx_header();
        data.push(0x11);
        for v in [2168u16, 667, 735, 855, 1710, 3223] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.push(6); // used_bits
        data.extend_from_slice(&500u16.to_le_bytes());
        data.extend_from_slice(&[2, 0, 0]); // 3-byte LE data length
        data.extend_from_slice(&[0xFF, 0xAA]);

        let block = single(data);
        assert_eq!(block.len, 1 + 18 + 2);
        match block.kind {
            BlockKind::TurboSpeed {
                pilot_pulse,
                sync1,
                sync2,
                zero_pulse,
                one_pulse,
                pilot_count,
                used_bits,
                pause_ms,
                data,
            } => {
                assert_eq!(pilot_pulse, 2168);
                assert_eq!(sync1, 667);
                assert_eq!(sync2, 735);
                assert_eq!(zero_pulse, 855);
                assert_eq!(one_pulse, 1710);
                assert_eq!(pilot_count, 3223);
                assert_eq!(used_bits, 6);
                assert_eq!(pause_ms, 500);
                assert_eq!(data, DataSpan { offset: 29, len: 2 });
            }
            other => panic!("Expected TurboSpeed, got {other:?}"),
        }
    }

    #[test]
    fn pulse_sequence_block() {
        let mut data = tzx_header();
        data.push(0x13);
        data.push(3);
        for v in [100u16, 200, 300] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(
            single(data).kind,
            BlockKind::PulseSequence {
                pulses: vec![100, 200, 300]
            }
        );
    }

    #[test]
    fn direct_recording_block() {
        let mut data = tzx_header();
        data.push(0x15);
        data.extend_from_slice(&79u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.push(3);
        data.extend_from_slice(&[1, 0, 0]);
        data.push(0b1010_0000);

        let block = single(data);
        assert_eq!(block.len, 1 + 8 + 1);
        assert!(matches!(
            block.kind,
            BlockKind::DirectRecording {
                tstates_per_sample: 79,
                used_bits: 3,
                ..
            }
        ));
    }

    #[test]
    fn csw_block_length_covers_header_and_samples() {
        let mut data = tzx_header();
        data.push(0x18);
        data.extend_from_slice(&13u32.to_le_bytes()); // 10 header + 3 samples
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&[0x44, 0xAC, 0x00]); // 44100 Hz
        data.push(1);
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&[10, 20, 30]);

        let block = single(data);
        assert_eq!(block.len, 1 + 4 + 13);
        match block.kind {
            BlockKind::CswRecording {
                sample_rate,
                compression,
                data,
                ..
            } => {
                assert_eq!(sample_rate, 44_100);
                assert_eq!(compression, CswCompression::Rle);
                assert_eq!(data, DataSpan { offset: 25, len: 3 });
            }
            other => panic!("Expected CswRecording, got {other:?}"),
        }
    }

    #[test]
    fn control_flow_blocks() {
        let mut data = tzx_header();
        data.push(0x23);
        data.extend_from_slice(&(-2i16).to_le_bytes());
        data.push(0x24);
        data.extend_from_slice(&5u16.to_le_bytes());
        data.push(0x25);
        data.push(0x26);
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&3i16.to_le_bytes());
        data.extend_from_slice(&(-1i16).to_le_bytes());
        data.push(0x27);

        let kinds: Vec<_> = read_all(data)
            .expect("control flow")
            .into_iter()
            .map(|b| b.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Jump { offset: -2 },
                BlockKind::LoopStart { repetitions: 5 },
                BlockKind::LoopEnd,
                BlockKind::CallSequence {
                    targets: vec![3, -1]
                },
                BlockKind::Return,
            ]
        );
    }

    #[test]
    fn metadata_blocks_are_sized_correctly() {
        let mut data = tzx_header();
        // $21 group start
        data.push(0x21);
        data.push(7);
        data.extend_from_slice(b"Level 1");
        // $22 group end
        data.push(0x22);
        // $28 select block with 3-byte body
        data.push(0x28);
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&[1, 0, 0]);
        // $2A stop if 48K
        data.push(0x2A);
        data.extend_from_slice(&0u32.to_le_bytes());
        // $2B set signal level
        data.push(0x2B);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.push(1);
        // $30 text
        data.push(0x30);
        data.push(4);
        data.extend_from_slice(b"Test");
        // $31 message
        data.push(0x31);
        data.push(5);
        data.push(2);
        data.extend_from_slice(b"Hi");
        // $32 archive info
        data.push(0x32);
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&[1, 0x00, 5, b'H', b'e', b'l', b'l', b'o']);
        // $33 hardware type, 2 entries
        data.push(0x33);
        data.push(2);
        data.extend_from_slice(&[0; 6]);
        // $35 custom info
        data.push(0x35);
        data.extend_from_slice(&[b'x'; 16]);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        // $5A glue
        data.push(0x5A);
        data.extend_from_slice(b"XTape!\x1A\x01\x14");

        let blocks = read_all(data).expect("metadata");
        let ids: Vec<u8> = blocks.iter().map(TzxBlock::id).collect();
        assert_eq!(
            ids,
            vec![0x21, 0x22, 0x28, 0x2A, 0x2B, 0x30, 0x31, 0x32, 0x33, 0x35, 0x5A]
        );
        assert_eq!(
            blocks[0].kind,
            BlockKind::GroupStart {
                name: "Level 1".to_string()
            }
        );
        assert_eq!(blocks[4].kind, BlockKind::SetSignalLevel { level: true });
        assert_eq!(
            blocks[6].kind,
            BlockKind::Message {
                text: "Hi".to_string()
            }
        );
        // Blocks tile the file without gaps.
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset);
        }
    }

    #[test]
    fn generalized_data_is_recognised_but_rejected() {
        let mut data = tzx_header();
        data.push(0x19);
        data.extend_from_slice(&0u32.to_le_bytes());
        assert!(kind_name(0x19).is_some());
        assert!(matches!(
            read_all(data),
            Err(DecodeError::UnsupportedBlock { id: 0x19, offset: 10 })
        ));
    }

    #[test]
    fn unknown_block_is_an_error() {
        let mut data = tzx_header();
        data.push(0x77);
        data.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            read_all(data),
            Err(DecodeError::UnsupportedBlock { id: 0x77, .. })
        ));
    }

    #[test]
    fn payload_one_byte_short_is_truncated() {
        let mut data = tzx_header();
        data.push(0x10);
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3]);

        let mut reader = TzxReader::new(Cursor::new(data)).expect("header");
        assert!(matches!(
            reader.next_block(),
            Err(DecodeError::Truncated { needed: 4, available: 3, .. })
        ));
        assert_eq!(reader.position().expect("position"), HEADER_LEN);
    }
}
