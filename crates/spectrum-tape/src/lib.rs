//! ZX Spectrum virtual tape deck.
//!
//! Plays TAP and TZX containers as a cycle-counted EAR signal without
//! loading them into memory: a sparse block index locates any block by
//! ordinal, and the player reads payload bytes from the file as it needs
//! them. TZX control-flow blocks (jumps, loops, call sequences and
//! conditional stops) are interpreted during playback. Blocks can be
//! listed, renamed, reordered and removed in place.

mod config;
mod container;
pub mod control;
mod deck;
pub mod editor;
mod error;
mod index;
pub mod listing;
mod player;
pub mod recorder;

pub use config::{PulseTimings, RealTapeMode, SpectrumModel, TapeConfig};
pub use container::{Block, Container, ContainerFormat};
pub use deck::TapeDeck;
pub use editor::{RenameOutcome, Selection};
pub use error::{Result, TapeError};
pub use index::{BlockIndex, INDEX_STRIDE};
pub use listing::BlockSummary;
pub use player::Player;
pub use recorder::PulseRecorder;
