//! TAP tape image reader and writer.
//!
//! TAP is the simplest Spectrum tape format: sequential blocks of data,
//! each preceded by a 2-byte little-endian length word. Each block contains
//! a flag byte, data bytes, and a checksum byte (XOR of flag + data).
//!
//! A typical program consists of two blocks:
//!   1. Header block (flag $00, 17 bytes of metadata)
//!   2. Data block (flag $FF, the actual program/data)
//!
//! The reader never loads block payloads: it reads the length word, the flag
//! and (for headers) the 17 metadata bytes, then seeks past the rest. This
//! keeps random access cheap on files far larger than memory.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Payload length of a standard header block (flag + 17 bytes + checksum).
pub const HEADER_BLOCK_LEN: u16 = 19;

/// Width of the name field in a standard header.
pub const NAME_LEN: usize = 10;

/// Size of the length word preceding every block.
pub const LENGTH_PREFIX: u64 = 2;

/// Errors raised while decoding a TAP stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("I/O error reading TAP: {0}")]
    Io(#[from] io::Error),

    #[error("truncated TAP {context} at offset {offset}: need {needed} bytes, {available} remain")]
    Truncated {
        context: &'static str,
        offset: u64,
        needed: u64,
        available: u64,
    },
}

/// Header type byte of a standard header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderType {
    Program,
    NumberArray,
    CharArray,
    Bytes,
    Other(u8),
}

impl HeaderType {
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Program,
            1 => Self::NumberArray,
            2 => Self::CharArray,
            3 => Self::Bytes,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Program => 0,
            Self::NumberArray => 1,
            Self::CharArray => 2,
            Self::Bytes => 3,
            Self::Other(byte) => byte,
        }
    }
}

/// The 17 metadata bytes of a standard header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapHeader {
    pub header_type: HeaderType,
    /// Space-padded file name as stored on tape.
    pub name: [u8; NAME_LEN],
    pub data_len: u16,
    pub param1: u16,
    pub param2: u16,
}

impl TapHeader {
    /// Decode the 17 bytes that follow the flag byte.
    #[must_use]
    pub fn parse(bytes: &[u8; 17]) -> Self {
        let mut name = [b' '; NAME_LEN];
        name.copy_from_slice(&bytes[1..=NAME_LEN]);
        Self {
            header_type: HeaderType::from_byte(bytes[0]),
            name,
            data_len: u16::from_le_bytes([bytes[11], bytes[12]]),
            param1: u16::from_le_bytes([bytes[13], bytes[14]]),
            param2: u16::from_le_bytes([bytes[15], bytes[16]]),
        }
    }

    /// Encode back into the 17 bytes that follow the flag byte.
    #[must_use]
    pub fn encode(&self) -> [u8; 17] {
        let mut out = [0u8; 17];
        out[0] = self.header_type.to_byte();
        out[1..=NAME_LEN].copy_from_slice(&self.name);
        out[11..13].copy_from_slice(&self.data_len.to_le_bytes());
        out[13..15].copy_from_slice(&self.param1.to_le_bytes());
        out[15..17].copy_from_slice(&self.param2.to_le_bytes());
        out
    }

    /// Encode as a complete 19-byte header payload (flag, metadata, checksum).
    #[must_use]
    pub fn encode_payload(&self, flag: u8) -> [u8; HEADER_BLOCK_LEN as usize] {
        let body = self.encode();
        let mut out = [0u8; HEADER_BLOCK_LEN as usize];
        out[0] = flag;
        out[1..18].copy_from_slice(&body);
        out[18] = checksum(flag, &body);
        out
    }

    /// File name with trailing padding removed.
    #[must_use]
    pub fn name(&self) -> String {
        self.name
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    /// Replace the name, padding with spaces to the field width.
    ///
    /// Returns `true` if the name had to be truncated.
    pub fn set_name(&mut self, name: &str) -> bool {
        let mut field = [b' '; NAME_LEN];
        let mut truncated = false;
        for (i, ch) in name.chars().enumerate() {
            if i >= NAME_LEN {
                truncated = true;
                break;
            }
            field[i] = if ch.is_ascii() && !ch.is_ascii_control() {
                ch as u8
            } else {
                b'?'
            };
        }
        self.name = field;
        truncated
    }
}

/// Structural descriptor of one TAP block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapBlock {
    /// Offset of the block's length word.
    pub offset: u64,
    /// Declared payload length (flag + data + checksum).
    pub len: u16,
    /// Flag byte, absent for zero-length blocks.
    pub flag: Option<u8>,
    /// Parsed metadata when the block is a standard header.
    pub header: Option<TapHeader>,
}

impl TapBlock {
    /// Bytes occupied in the container, including the length word.
    #[must_use]
    pub fn total_len(&self) -> u64 {
        LENGTH_PREFIX + u64::from(self.len)
    }

    /// Offset of the first payload byte (the flag).
    #[must_use]
    pub fn payload_offset(&self) -> u64 {
        self.offset + LENGTH_PREFIX
    }

    /// Offset of the block that follows this one.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.total_len()
    }

    #[must_use]
    pub fn is_header(&self) -> bool {
        self.header.is_some()
    }
}

/// Streaming TAP block reader.
pub struct TapReader<R> {
    reader: R,
    len: u64,
}

impl<R: Read + Seek> TapReader<R> {
    /// Wrap a stream, measuring its length and rewinding to the start.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self { reader, len })
    }

    /// Total stream length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
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
    pub fn next_block(&mut self) -> Result<Option<TapBlock>, DecodeError> {
        let offset = self.reader.stream_position()?;
        match self.decode(offset) {
            Ok(block) => Ok(block),
            Err(e) => {
                self.reader.seek(SeekFrom::Start(offset))?;
                Err(e)
            }
        }
    }

    fn decode(&mut self, offset: u64) -> Result<Option<TapBlock>, DecodeError> {
        if offset >= self.len {
            return Ok(None);
        }
        self.need(offset, LENGTH_PREFIX, "length word")?;
        let len = self.reader.read_u16::<LittleEndian>()?;
        self.need(offset + LENGTH_PREFIX, u64::from(len), "block payload")?;

        let mut flag = None;
        let mut header = None;
        let mut consumed = 0u64;
        if len > 0 {
            let f = self.reader.read_u8()?;
            consumed += 1;
            flag = Some(f);
            if len == HEADER_BLOCK_LEN && f == 0x00 {
                let mut body = [0u8; 17];
                self.reader.read_exact(&mut body)?;
                consumed += 17;
                header = Some(TapHeader::parse(&body));
            }
        }

        let skip = u64::from(len) - consumed;
        self.reader.seek(SeekFrom::Current(skip as i64))?;

        Ok(Some(TapBlock {
            offset,
            len,
            flag,
            header,
        }))
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

/// XOR checksum of flag + data, as the ROM computes it.
#[must_use]
pub fn checksum(flag: u8, data: &[u8]) -> u8 {
    data.iter().fold(flag, |acc, &b| acc ^ b)
}

/// Write a block from flag + data, computing the length word and checksum.
pub fn write_block<W: Write>(writer: &mut W, flag: u8, data: &[u8]) -> io::Result<()> {
    let len = u16::try_from(data.len() + 2)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "TAP block exceeds 65535 bytes"))?;
    writer.write_u16::<LittleEndian>(len)?;
    writer.write_u8(flag)?;
    writer.write_all(data)?;
    writer.write_u8(checksum(flag, data))
}

/// Write a block whose payload (flag, data, checksum) is already assembled.
pub fn write_raw_block<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u16::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "TAP block exceeds 65535 bytes"))?;
    writer.write_u16::<LittleEndian>(len)?;
    writer.write_all(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Build a TAP block from flag + data, computing the length word and checksum.
    fn make_tap_block(flag: u8, data: &[u8]) -> Vec<u8> {
        let mut block = Vec::new();
        write_block(&mut block, flag, data).expect("write to Vec");
        block
    }

    fn program_header(name: &str, data_len: u16) -> [u8; 17] {
        let mut header = TapHeader {
            header_type: HeaderType::Program,
            name: [b' '; NAME_LEN],
            data_len,
            param1: 10,
            param2: data_len,
        };
        header.set_name(name);
        header.encode()
    }

    fn read_all(data: Vec<u8>) -> Result<Vec<TapBlock>, DecodeError> {
        let mut reader = TapReader::new(Cursor::new(data))?;
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_block()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    #[test]
    fn empty_stream_has_no_blocks() {
        let blocks = read_all(Vec::new()).expect("empty stream is valid");
        assert!(blocks.is_empty());
    }

    #[test]
    fn reads_header_and_data_blocks() {
        let mut data = make_tap_block(0x00, &program_header("HELLO", 6912));
        data.extend(make_tap_block(0xFF, &[0xAA; 6912]));

        let blocks = read_all(data).expect("two blocks should parse");
        assert_eq!(blocks.len(), 2);

        let header = blocks[0].header.as_ref().expect("first block is a header");
        assert_eq!(header.header_type, HeaderType::Program);
        assert_eq!(header.name(), "HELLO");
        assert_eq!(header.data_len, 6912);
        assert_eq!(blocks[0].len, 19);

        assert_eq!(blocks[1].offset, 2 + 19);
        assert_eq!(blocks[1].flag, Some(0xFF));
        assert_eq!(blocks[1].len, 6914);
        assert!(!blocks[1].is_header());
    }

    #[test]
    fn reader_leaves_stream_at_next_block() {
        let mut data = make_tap_block(0xFF, &[1, 2, 3]);
        data.extend(make_tap_block(0xFF, &[4]));
        let mut reader = TapReader::new(Cursor::new(data)).expect("cursor");

        let first = reader.next_block().expect("decode").expect("block");
        assert_eq!(reader.position().expect("position"), first.end());
    }

    #[test]
    fn zero_length_block_has_no_flag() {
        let blocks = read_all(vec![0x00, 0x00]).expect("zero-length block");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].flag, None);
        assert_eq!(blocks[0].total_len(), 2);
    }

    #[test]
    fn truncated_length_word() {
        assert!(matches!(
            read_all(vec![0x05]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn payload_one_byte_short_is_truncated() {
        let mut data = make_tap_block(0xFF, &[1, 2, 3]);
        data.pop();
        let mut reader = TapReader::new(Cursor::new(data)).expect("cursor");
        let err = reader.next_block().expect_err("short payload");
        assert!(matches!(err, DecodeError::Truncated { needed: 5, available: 4, .. }));
        // Failed decode leaves the stream where it started.
        assert_eq!(reader.position().expect("position"), 0);
    }

    #[test]
    fn bad_checksum_still_decodes() {
        let mut data = make_tap_block(0x00, &[1, 2, 3]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert_eq!(read_all(data).expect("checksums are not enforced").len(), 1);
    }

    #[test]
    fn header_name_round_trip_and_truncation() {
        let mut header = TapHeader::parse(&program_header("GAME", 100));
        assert_eq!(header.name(), "GAME");
        assert!(!header.set_name("0123456789"));
        assert!(header.set_name("A VERY LONG NAME"));
        assert_eq!(header.name(), "A VERY LON");
    }

    #[test]
    fn header_payload_checksum_matches_rom() {
        let header = TapHeader::parse(&program_header("X", 1));
        let payload = header.encode_payload(0x00);
        let xor = payload[..18].iter().fold(0u8, |acc, &b| acc ^ b);
        assert_eq!(payload[18], xor);
    }

    #[test]
    fn raw_block_keeps_payload_verbatim() {
        let mut out = Vec::new();
        write_raw_block(&mut out, &[0xFF, 0x12, 0x34]).expect("write");
        assert_eq!(out, vec![3, 0, 0xFF, 0x12, 0x34]);
    }
}
