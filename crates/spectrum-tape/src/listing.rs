//! One-line block summaries for tape browsers.

use std::fmt;
use std::io::{Read, Seek};

use format_spectrum_tap::{HEADER_BLOCK_LEN, HeaderType, TapHeader};
use format_tzx::{BlockKind, kind_name};
use serde::Serialize;

use crate::container::{Block, Container};
use crate::error::Result;

/// Display line for one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    /// 0-based ordinal (shown 1-based).
    pub ordinal: usize,
    pub kind: String,
    /// File name from a standard header.
    pub name: Option<String>,
    /// Payload length, or the duration of a pause block.
    pub length: Option<u32>,
}

impl BlockSummary {
    /// Summarise `block`, reading header bytes from the container when a
    /// TZX standard-speed block carries a ROM header.
    pub fn describe<S: Read + Seek>(
        container: &mut Container<S>,
        ordinal: usize,
        block: &Block,
    ) -> Result<Self> {
        let (kind, name, length) = match block {
            Block::Tap(tap) => {
                let kind = tap
                    .header
                    .as_ref()
                    .map_or_else(|| "--".to_string(), |h| header_kind(h.header_type));
                let name = tap.header.as_ref().map(TapHeader::name);
                (kind, name, Some(u32::from(tap.len)))
            }
            Block::Tzx(tzx) => {
                let kind = kind_name(tzx.id()).unwrap_or("Unknown").to_string();
                match &tzx.kind {
                    BlockKind::StandardSpeed { data, .. } => {
                        let name = if data.len == u32::from(HEADER_BLOCK_LEN) {
                            let mut payload = [0u8; HEADER_BLOCK_LEN as usize];
                            container.read_at(data.offset, &mut payload)?;
                            standard_header(&payload).map(|h| h.name())
                        } else {
                            None
                        };
                        (kind, name, Some(data.len))
                    }
                    BlockKind::TurboSpeed { data, .. }
                    | BlockKind::PureData { data, .. }
                    | BlockKind::DirectRecording { data, .. }
                    | BlockKind::CswRecording { data, .. } => (kind, None, Some(data.len)),
                    BlockKind::Pause { duration_ms: 0 } => ("Stop the tape".to_string(), None, None),
                    BlockKind::Pause { duration_ms } => (kind, None, Some(u32::from(*duration_ms))),
                    _ => (kind, None, None),
                }
            }
        };
        Ok(Self {
            ordinal,
            kind,
            name,
            length,
        })
    }
}

/// Parse a 19-byte payload as a ROM header if its flag says so.
pub(crate) fn standard_header(payload: &[u8; HEADER_BLOCK_LEN as usize]) -> Option<TapHeader> {
    if payload[0] != 0x00 {
        return None;
    }
    let mut body = [0u8; 17];
    body.copy_from_slice(&payload[1..18]);
    Some(TapHeader::parse(&body))
}

fn header_kind(header_type: HeaderType) -> String {
    match header_type {
        HeaderType::Program => "Program:".to_string(),
        HeaderType::NumberArray => "Number array:".to_string(),
        HeaderType::CharArray => "Char array:".to_string(),
        HeaderType::Bytes => "Bytes:".to_string(),
        HeaderType::Other(byte) => format!("Type {byte}:"),
    }
}

impl fmt::Display for BlockSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04} ", self.ordinal + 1)?;
        match (&self.name, self.length) {
            (Some(name), Some(length)) => write!(f, "{:<13} {name:<10} {length:>6}", self.kind),
            (Some(name), None) => write!(f, "{:<13} {name}", self.kind),
            (None, Some(length)) => write!(f, "{:<24} {length:>6}", self.kind),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}
