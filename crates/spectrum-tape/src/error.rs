//! Tape deck error type.

use std::io;
use std::path::PathBuf;

/// Errors surfaced by the tape deck.
#[derive(Debug, thiserror::Error)]
pub enum TapeError {
    #[error("tape container not found: {}", path.display())]
    ContainerNotFound { path: PathBuf },

    #[error("tape container is empty or truncated")]
    EmptyOrTruncated,

    #[error("invalid TZX signature")]
    BadSignature,

    #[error("unsupported block kind ${id:02X} at offset {offset}")]
    UnsupportedBlockKind { id: u8, offset: u64 },

    #[error("block index is inconsistent with the container at block {ordinal}")]
    CorruptIndex { ordinal: usize },

    #[error("block {ordinal} out of range (tape has {count} blocks)")]
    BlockOutOfRange { ordinal: usize, count: usize },

    #[error("no blocks selected")]
    NoSelection,

    #[error("tape is read-only")]
    ReadOnly,

    #[error("block {ordinal} carries no file name")]
    NotRenamable { ordinal: usize },

    #[error("no tape inserted")]
    NoTape,

    #[error("compressed CSW recordings are not supported")]
    UnsupportedCompression,

    #[error("unrecognised tape format: {}", path.display())]
    UnknownFormat { path: PathBuf },

    #[error("control flow at block {ordinal} loops without producing a signal")]
    Stalled { ordinal: usize },

    #[error("invalid tape configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<format_spectrum_tap::DecodeError> for TapeError {
    fn from(e: format_spectrum_tap::DecodeError) -> Self {
        match e {
            format_spectrum_tap::DecodeError::Io(e) => Self::Io(e),
            format_spectrum_tap::DecodeError::Truncated { .. } => Self::EmptyOrTruncated,
        }
    }
}

impl From<format_tzx::DecodeError> for TapeError {
    fn from(e: format_tzx::DecodeError) -> Self {
        match e {
            format_tzx::DecodeError::Io(e) => Self::Io(e),
            format_tzx::DecodeError::BadSignature => Self::BadSignature,
            format_tzx::DecodeError::Truncated { .. } => Self::EmptyOrTruncated,
            format_tzx::DecodeError::UnsupportedBlock { id, offset } => {
                Self::UnsupportedBlockKind { id, offset }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TapeError>;
