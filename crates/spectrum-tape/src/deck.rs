//! Tape deck session.
//!
//! Owns the inserted container, its block index, the playback cursor, the
//! selection set and the MIC recorder. All state lives here; callers drive
//! it with their own clock.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::info;

use crate::config::{RealTapeMode, TapeConfig};
use crate::container::{Container, ContainerFormat};
use crate::editor::{self, RenameOutcome, Selection};
use crate::error::{Result, TapeError};
use crate::index::BlockIndex;
use crate::listing::BlockSummary;
use crate::player::Player;
use crate::recorder::PulseRecorder;

/// A container that is currently in the deck.
struct InsertedTape {
    path: PathBuf,
    container: Container<File>,
    /// `None` after an edit until the next access rebuilds it.
    index: Option<BlockIndex>,
    player: Player,
    selection: Selection,
    read_only: bool,
}

impl InsertedTape {
    fn open(path: &Path, format: ContainerFormat, config: &TapeConfig) -> Result<Self> {
        let (file, read_only) = open_file(path)?;
        let container = Container::open(file, format)?;
        let player = Player::new(config, container.first_block_offset());
        Ok(Self {
            path: path.to_path_buf(),
            container,
            index: None,
            player,
            selection: Selection::new(),
            read_only,
        })
    }

    /// Run `f` with the index, rebuilding it first if an edit discarded it.
    fn with_index<T>(
        &mut self,
        f: impl FnOnce(&mut Container<File>, &BlockIndex, &mut Player) -> Result<T>,
    ) -> Result<T> {
        let index = match self.index.take() {
            Some(index) => index,
            None => BlockIndex::build(&mut self.container)?,
        };
        let result = f(&mut self.container, &index, &mut self.player);
        self.index = Some(index);
        result
    }

    fn block_count(&mut self) -> Result<usize> {
        self.with_index(|_, index, _| Ok(index.len()))
    }

    /// Reopen after the file was replaced, discarding index, cursor and
    /// selection.
    fn reopen(&mut self, config: &TapeConfig) -> Result<()> {
        let format = self.container.format();
        let (file, read_only) = open_file(&self.path)?;
        self.container = Container::open(file, format)?;
        self.read_only = read_only;
        self.index = None;
        self.player = Player::new(config, self.container.first_block_offset());
        self.selection.clear();
        Ok(())
    }
}

/// Open read-write, falling back to read-only.
fn open_file(path: &Path) -> Result<(File, bool)> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok((file, false)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TapeError::ContainerNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok((File::open(path)?, true)),
        Err(e) => Err(e.into()),
    }
}

/// Virtual tape deck.
pub struct TapeDeck {
    config: TapeConfig,
    tape: Option<InsertedTape>,
    recorder: PulseRecorder,
    recorded: Vec<Vec<u8>>,
}

impl TapeDeck {
    /// Create an empty tape deck (no tape inserted).
    #[must_use]
    pub fn new(config: TapeConfig) -> Self {
        let recorder = PulseRecorder::new(config.timings, config.clock_hz());
        Self {
            config,
            tape: None,
            recorder,
            recorded: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TapeConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Insert / eject
    // -----------------------------------------------------------------------

    /// Insert a container, choosing the format from its extension.
    pub fn insert(&mut self, path: &Path) -> Result<()> {
        let format = ContainerFormat::from_path(path).ok_or_else(|| TapeError::UnknownFormat {
            path: path.to_path_buf(),
        })?;
        self.insert_as(path, format)
    }

    /// Insert a container of a known format and index it.
    ///
    /// On failure the deck is left empty.
    pub fn insert_as(&mut self, path: &Path, format: ContainerFormat) -> Result<()> {
        self.eject();
        let mut tape = InsertedTape::open(path, format, &self.config)?;
        if tape.container.is_empty() {
            return Err(TapeError::EmptyOrTruncated);
        }
        let count = tape.block_count()?;
        info!(
            "inserted {} ({format:?}, {count} blocks{})",
            path.display(),
            if tape.read_only { ", read-only" } else { "" }
        );
        self.tape = Some(tape);
        Ok(())
    }

    /// Remove the tape. Safe at any point, including mid-block.
    pub fn eject(&mut self) {
        if let Some(tape) = self.tape.take() {
            info!("ejected {}", tape.path.display());
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.tape.is_some()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.tape.as_ref().map(|t| t.path.as_path())
    }

    #[must_use]
    pub fn format(&self) -> Option<ContainerFormat> {
        self.tape.as_ref().map(|t| t.container.format())
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.tape.as_ref().is_some_and(|t| t.read_only)
    }

    /// Total number of blocks on the tape.
    pub fn block_count(&mut self) -> Result<usize> {
        self.tape_mut()?.block_count()
    }

    fn tape_mut(&mut self) -> Result<&mut InsertedTape> {
        self.tape.as_mut().ok_or(TapeError::NoTape)
    }

    // -----------------------------------------------------------------------
    // Playback
    // -----------------------------------------------------------------------

    pub fn play(&mut self) -> Result<()> {
        let tape = self.tape_mut()?;
        tape.player.play();
        info!("play from block {}", tape.player.current_block());
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tape) = self.tape.as_mut() {
            tape.player.stop();
        }
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.tape.as_ref().is_some_and(|t| t.player.is_playing())
    }

    /// Whether playback ran off the end and rewound.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tape.as_ref().is_some_and(|t| t.player.reached_end())
    }

    /// Stop and return to block 0.
    pub fn rewind(&mut self) {
        if let Some(tape) = self.tape.as_mut() {
            tape.player.rewind();
        }
    }

    /// Stop and position the cursor at `ordinal`.
    pub fn seek(&mut self, ordinal: usize) -> Result<()> {
        self.tape_mut()?.with_index(|container, index, player| {
            let offset = index.offset_of(container, ordinal)?;
            player.seek(ordinal, offset);
            Ok(())
        })
    }

    /// Ordinal of the block under the cursor.
    #[must_use]
    pub fn current_block(&self) -> usize {
        self.tape.as_ref().map_or(0, |t| t.player.current_block())
    }

    /// Play `ticks` T-states of signal. Returns the T-states actually played.
    ///
    /// A decode error stops the tape and is returned; the cursor stays on
    /// the failing block.
    pub fn advance(&mut self, ticks: u64) -> Result<u64> {
        match self.tape.as_mut() {
            Some(tape) if tape.player.is_playing() => tape.with_index(|container, index, player| {
                player.advance(container, index, ticks)
            }),
            _ => Ok(0),
        }
    }

    /// T-states until the EAR level can next change.
    #[must_use]
    pub fn ticks_until_edge(&self) -> u64 {
        self.tape.as_ref().map_or(0, |t| t.player.ticks_until_edge())
    }

    /// Level of the virtual tape.
    #[must_use]
    pub fn level(&self) -> bool {
        self.tape.as_ref().is_some_and(|t| t.player.level())
    }

    /// EAR level seen by the machine, given the real cassette input if one
    /// is connected.
    #[must_use]
    pub fn ear_level(&self, external: Option<bool>) -> bool {
        let use_external = match self.config.realtape_mode {
            RealTapeMode::ForceLoad => true,
            RealTapeMode::Auto => self.tape.is_none(),
            RealTapeMode::ForceSave => false,
        };
        if use_external {
            external.unwrap_or(false)
        } else {
            self.level()
        }
    }

    /// Byte position of the cursor and the container size.
    #[must_use]
    pub fn progress(&self) -> Option<(u64, u64)> {
        self.tape
            .as_ref()
            .map(|t| (t.player.position(), t.container.len()))
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    fn recording(&self) -> bool {
        match self.config.realtape_mode {
            RealTapeMode::ForceSave => true,
            RealTapeMode::Auto => !self.is_playing(),
            RealTapeMode::ForceLoad => false,
        }
    }

    /// Feed a MIC level change at T-state `tick`.
    pub fn mic_edge(&mut self, level: bool, tick: u64) {
        if !self.recording() {
            return;
        }
        if let Some(block) = self.recorder.edge(level, tick) {
            self.recorded.push(block);
        }
    }

    /// Let the recorder close a block after a silence.
    pub fn poll_recorder(&mut self, tick: u64) {
        if let Some(block) = self.recorder.poll(tick) {
            self.recorded.push(block);
        }
    }

    /// Blocks recorded since the last call.
    pub fn take_recorded(&mut self) -> Vec<Vec<u8>> {
        if let Some(block) = self.recorder.finish() {
            self.recorded.push(block);
        }
        std::mem::take(&mut self.recorded)
    }

    /// Append recorded blocks to the inserted TAP container.
    ///
    /// Returns the number of blocks written. Recorded blocks stay queued
    /// if the tape cannot take them. With nothing recorded the tape is left
    /// untouched.
    pub fn save_recorded(&mut self) -> Result<usize> {
        if let Some(block) = self.recorder.finish() {
            self.recorded.push(block);
        }
        if self.recorded.is_empty() {
            return Ok(0);
        }
        let config = self.config.clone();
        let tape = self.tape.as_mut().ok_or(TapeError::NoTape)?;
        if tape.read_only {
            return Err(TapeError::ReadOnly);
        }
        if tape.container.format() != ContainerFormat::Tap {
            return Err(TapeError::UnknownFormat {
                path: tape.path.clone(),
            });
        }
        tape.player.stop();
        {
            let mut file = OpenOptions::new().append(true).open(&tape.path)?;
            for block in &self.recorded {
                format_spectrum_tap::write_raw_block(&mut file, block)?;
            }
            file.sync_all()?;
        }
        let saved = std::mem::take(&mut self.recorded).len();
        tape.reopen(&config)?;
        info!("saved {saved} blocks to {}", tape.path.display());
        Ok(saved)
    }

    // -----------------------------------------------------------------------
    // Browsing and editing
    // -----------------------------------------------------------------------

    /// Summary line for one block.
    pub fn summary(&mut self, ordinal: usize) -> Result<BlockSummary> {
        self.tape_mut()?.with_index(|container, index, _| {
            let block = index.block_at(container, ordinal)?;
            BlockSummary::describe(container, ordinal, &block)
        })
    }

    /// Summary lines for every block.
    pub fn listing(&mut self) -> Result<Vec<BlockSummary>> {
        self.tape_mut()?.with_index(|container, index, _| {
            container.seek_to(container.first_block_offset())?;
            let mut blocks = Vec::with_capacity(index.len());
            while let Some(block) = container.decode_next()? {
                blocks.push(block);
            }
            blocks
                .iter()
                .enumerate()
                .map(|(ordinal, block)| BlockSummary::describe(container, ordinal, block))
                .collect()
        })
    }

    /// Toggle `ordinal` in the selection. Returns whether it is now selected.
    pub fn toggle_select(&mut self, ordinal: usize) -> Result<bool> {
        let tape = self.tape_mut()?;
        let count = tape.block_count()?;
        if ordinal >= count {
            return Err(TapeError::BlockOutOfRange { ordinal, count });
        }
        Ok(tape.selection.toggle(ordinal))
    }

    #[must_use]
    pub fn selection(&self) -> Option<&Selection> {
        self.tape.as_ref().map(|t| &t.selection)
    }

    /// Rename the header block at `ordinal`.
    pub fn rename(&mut self, ordinal: usize, name: &str) -> Result<RenameOutcome> {
        let tape = self.writable()?;
        let outcome = tape.with_index(|container, index, _| {
            editor::rename(container, index, ordinal, name)
        })?;
        tape.selection.clear();
        Ok(outcome)
    }

    /// Move the selected blocks to sit before `before`.
    pub fn move_selected(&mut self, before: usize) -> Result<()> {
        let config = self.config.clone();
        let tape = self.writable()?;
        let selection = tape.selection.clone();
        let path = tape.path.clone();
        tape.with_index(|container, index, _| {
            let order = editor::plan_move(index.len(), &selection, before)?;
            editor::replace_file(&path, container, index, &order)
        })?;
        tape.reopen(&config)?;
        info!("moved {} blocks before block {before}", selection.len());
        Ok(())
    }

    /// Remove the selected blocks, or the block under the cursor when
    /// nothing is selected. Returns the number of blocks removed.
    pub fn remove_selected(&mut self) -> Result<usize> {
        let config = self.config.clone();
        let tape = self.writable()?;
        let targets = if tape.selection.is_empty() {
            std::iter::once(tape.player.current_block()).collect()
        } else {
            tape.selection.clone()
        };
        let path = tape.path.clone();
        tape.with_index(|container, index, _| {
            let order = editor::plan_remove(index.len(), &targets)?;
            editor::replace_file(&path, container, index, &order)
        })?;
        tape.reopen(&config)?;
        info!("removed {} blocks", targets.len());
        Ok(targets.len())
    }

    /// The inserted tape, stopped, if it may be edited.
    fn writable(&mut self) -> Result<&mut InsertedTape> {
        let tape = self.tape_mut()?;
        if tape.read_only {
            return Err(TapeError::ReadOnly);
        }
        tape.player.stop();
        Ok(tape)
    }
}

impl Default for TapeDeck {
    fn default() -> Self {
        Self::new(TapeConfig::default())
    }
}
