//! Playback state machine: turns blocks into a T-state-accurate EAR signal.
//!
//! The machine is driven by the caller's clock. [`Player::advance`] consumes
//! a number of T-states and applies every level change that falls inside
//! them; [`Player::ticks_until_edge`] reports how long the current level
//! holds. Payload bytes are read from the container one at a time as they
//! are needed.
//!
//! Each data bit consists of **two** equal-length pulses (one complete square
//! wave cycle). Bits are transmitted MSB first within each byte. Every pulse
//! starts with a level toggle.

use std::io::{Read, Seek};

use format_tzx::{BlockKind, CswCompression, DataSpan};
use log::{debug, warn};

use crate::config::{PulseTimings, TapeConfig, ms_to_ticks};
use crate::container::{Block, Container};
use crate::control::{ControlFlow, Flow};
use crate::error::{Result, TapeError};
use crate::index::BlockIndex;

/// Block transitions allowed without any time passing before playback is
/// declared stalled (e.g. two jumps pointing at each other).
const STALL_LIMIT: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Payload readers
// ---------------------------------------------------------------------------

/// MSB-first bit reader over a payload span.
#[derive(Debug, Clone)]
struct BitReader {
    data: DataSpan,
    /// Bits used in the last byte (1-8).
    used_last: u8,
    next_byte: u32,
    byte: u8,
    bits_left: u8,
}

impl BitReader {
    fn new(data: DataSpan, used_bits: u8) -> Self {
        Self {
            data,
            used_last: if used_bits == 0 || used_bits > 8 { 8 } else { used_bits },
            next_byte: 0,
            byte: 0,
            bits_left: 0,
        }
    }

    fn next_bit<S: Read + Seek>(&mut self, tape: &mut Container<S>) -> Result<Option<bool>> {
        if self.bits_left == 0 {
            if self.next_byte >= self.data.len {
                return Ok(None);
            }
            self.byte = tape.read_byte(self.data.offset + u64::from(self.next_byte))?;
            self.next_byte += 1;
            self.bits_left = if self.next_byte == self.data.len {
                self.used_last
            } else {
                8
            };
        }
        let bit = self.byte & 0x80 != 0;
        self.byte <<= 1;
        self.bits_left -= 1;
        Ok(Some(bit))
    }

    fn position(&self) -> u64 {
        self.data.offset + u64::from(self.next_byte)
    }
}

/// Data bits as pulse pairs.
#[derive(Debug, Clone)]
struct DataBits {
    bits: BitReader,
    zero_pulse: u16,
    one_pulse: u16,
    /// Length of the pending second half, if the first half has been sent.
    second_half: Option<u16>,
    pause_ms: u16,
}

impl DataBits {
    fn new(zero_pulse: u16, one_pulse: u16, used_bits: u8, pause_ms: u16, data: DataSpan) -> Self {
        Self {
            bits: BitReader::new(data, used_bits),
            zero_pulse,
            one_pulse,
            second_half: None,
            pause_ms,
        }
    }

    fn standard(timings: &PulseTimings, pause_ms: u16, data: DataSpan) -> Self {
        Self::new(timings.zero_pulse, timings.one_pulse, 8, pause_ms, data)
    }

    fn next_pulse<S: Read + Seek>(&mut self, tape: &mut Container<S>) -> Result<Option<u16>> {
        if let Some(pulse) = self.second_half.take() {
            return Ok(Some(pulse));
        }
        Ok(self.bits.next_bit(tape)?.map(|bit| {
            let pulse = if bit { self.one_pulse } else { self.zero_pulse };
            self.second_half = Some(pulse);
            pulse
        }))
    }
}

/// Run-length CSW sample stream.
#[derive(Debug, Clone)]
struct CswStream {
    data: DataSpan,
    pos: u64,
    sample_rate: u32,
    samples: u64,
    ticks: u64,
    pause_ms: u16,
}

impl CswStream {
    /// Next pulse in T-states. Durations are accumulated so rounding never
    /// drifts across pulses.
    fn next_pulse<S: Read + Seek>(
        &mut self,
        tape: &mut Container<S>,
        clock_hz: u32,
    ) -> Result<Option<u64>> {
        let len = u64::from(self.data.len);
        if self.pos >= len {
            return Ok(None);
        }
        let mut count = u64::from(tape.read_byte(self.data.offset + self.pos)?);
        self.pos += 1;
        if count == 0 {
            if self.pos + 4 > len {
                return Err(TapeError::EmptyOrTruncated);
            }
            let mut wide = [0u8; 4];
            tape.read_at(self.data.offset + self.pos, &mut wide)?;
            self.pos += 4;
            count = u64::from(u32::from_le_bytes(wide));
        }
        self.samples += count;
        let target = u128::from(self.samples) * u128::from(clock_hz) / u128::from(self.sample_rate);
        let target = u64::try_from(target).unwrap_or(u64::MAX);
        let pulse = target.saturating_sub(self.ticks);
        self.ticks = target;
        Ok(Some(pulse))
    }
}

// ---------------------------------------------------------------------------
// Signal phase
// ---------------------------------------------------------------------------

/// What the machine emits next.
#[derive(Debug, Clone)]
enum Phase {
    /// Enter the block under the cursor.
    Idle,
    /// Pilot tone: repeated equal pulses, then the sync pair.
    Pilot {
        pulse: u16,
        left: u16,
        sync1: u16,
        sync2: u16,
        data: DataBits,
    },
    Sync1 {
        sync1: u16,
        sync2: u16,
        data: DataBits,
    },
    Sync2 {
        sync2: u16,
        data: DataBits,
    },
    Data(DataBits),
    Tone {
        pulse: u16,
        left: u16,
    },
    Pulses {
        pulses: Vec<u16>,
        next: usize,
    },
    /// Direct recording: one level per sample.
    Direct {
        bits: BitReader,
        tstates_per_sample: u16,
        pause_ms: u16,
    },
    Csw(CswStream),
    /// Trailing or explicit silence, EAR low.
    Pause(u64),
    /// Current block exhausted; move to the next.
    Done,
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// Playback cursor and signal generator for one inserted tape.
pub struct Player {
    timings: PulseTimings,
    clock_hz: u32,
    tap_pause_ms: u16,
    is_48k: bool,
    first_offset: u64,
    /// Ordinal of the block under the cursor.
    ordinal: usize,
    /// Offset of the block under the cursor.
    offset: u64,
    /// Offset of the block after the cursor.
    next_offset: u64,
    phase: Phase,
    level: bool,
    remaining: u64,
    playing: bool,
    reached_end: bool,
    flow: ControlFlow,
}

impl Player {
    #[must_use]
    pub fn new(config: &TapeConfig, first_offset: u64) -> Self {
        Self {
            timings: config.timings,
            clock_hz: config.clock_hz(),
            tap_pause_ms: config.tap_pause_ms,
            is_48k: config.model.is_48k(),
            first_offset,
            ordinal: 0,
            offset: first_offset,
            next_offset: first_offset,
            phase: Phase::Idle,
            level: false,
            remaining: 0,
            playing: false,
            reached_end: false,
            flow: ControlFlow::new(),
        }
    }

    /// Start playback from the cursor.
    pub fn play(&mut self) {
        self.playing = true;
        self.reached_end = false;
    }

    /// Pause playback. The signal resumes mid-pulse on the next `play`.
    pub fn stop(&mut self) {
        self.playing = false;
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether playback ran off the end of the tape (and rewound).
    #[must_use]
    pub fn reached_end(&self) -> bool {
        self.reached_end
    }

    /// Current EAR level.
    #[must_use]
    pub fn level(&self) -> bool {
        self.level
    }

    /// Ordinal of the block under the cursor.
    #[must_use]
    pub fn current_block(&self) -> usize {
        self.ordinal
    }

    /// T-states until the level can next change.
    #[must_use]
    pub fn ticks_until_edge(&self) -> u64 {
        self.remaining
    }

    /// Byte position of the cursor within the container.
    #[must_use]
    pub fn position(&self) -> u64 {
        match &self.phase {
            Phase::Data(data)
            | Phase::Pilot { data, .. }
            | Phase::Sync1 { data, .. }
            | Phase::Sync2 { data, .. } => data.bits.position(),
            Phase::Direct { bits, .. } => bits.position(),
            Phase::Csw(csw) => csw.data.offset + csw.pos,
            _ => self.offset,
        }
    }

    /// Stop and return to block 0.
    pub fn rewind(&mut self) {
        self.reposition(0, self.first_offset);
        self.playing = false;
    }

    /// Stop and move the cursor to `ordinal`, which starts at `offset`.
    pub fn seek(&mut self, ordinal: usize, offset: u64) {
        self.reposition(ordinal, offset);
        self.playing = false;
    }

    fn reposition(&mut self, ordinal: usize, offset: u64) {
        self.ordinal = ordinal;
        self.offset = offset;
        self.next_offset = offset;
        self.phase = Phase::Idle;
        self.remaining = 0;
        self.flow.reset();
    }

    /// Consume up to `ticks` T-states of signal, applying every edge that
    /// falls within them.
    ///
    /// Returns the T-states actually played, which is less than `ticks` when
    /// the tape stops. A decode error stops the tape.
    pub fn advance<S: Read + Seek>(
        &mut self,
        tape: &mut Container<S>,
        index: &BlockIndex,
        ticks: u64,
    ) -> Result<u64> {
        let mut left = ticks;
        while self.playing {
            if self.remaining > left {
                self.remaining -= left;
                left = 0;
                break;
            }
            left -= self.remaining;
            self.remaining = 0;
            if let Err(e) = self.next_edge(tape, index) {
                warn!("tape stopped at block {}: {e}", self.ordinal);
                self.playing = false;
                return Err(e);
            }
        }
        Ok(ticks - left)
    }

    fn pulse(&mut self, len: u64) {
        self.level = !self.level;
        self.remaining = len;
    }

    /// Start the next pulse, walking through zero-time blocks as needed.
    fn next_edge<S: Read + Seek>(&mut self, tape: &mut Container<S>, index: &BlockIndex) -> Result<()> {
        let mut entered = 0usize;
        while self.playing {
            match std::mem::replace(&mut self.phase, Phase::Idle) {
                Phase::Idle => {
                    entered += 1;
                    if entered > STALL_LIMIT {
                        return Err(TapeError::Stalled {
                            ordinal: self.ordinal,
                        });
                    }
                    self.enter_block(tape, index)?;
                }
                Phase::Pilot {
                    pulse,
                    left,
                    sync1,
                    sync2,
                    data,
                } => {
                    if left > 0 {
                        self.phase = Phase::Pilot {
                            pulse,
                            left: left - 1,
                            sync1,
                            sync2,
                            data,
                        };
                        self.pulse(u64::from(pulse));
                        return Ok(());
                    }
                    self.phase = Phase::Sync1 { sync1, sync2, data };
                }
                Phase::Sync1 { sync1, sync2, data } => {
                    self.phase = Phase::Sync2 { sync2, data };
                    self.pulse(u64::from(sync1));
                    return Ok(());
                }
                Phase::Sync2 { sync2, data } => {
                    self.phase = Phase::Data(data);
                    self.pulse(u64::from(sync2));
                    return Ok(());
                }
                Phase::Data(mut data) => match data.next_pulse(tape)? {
                    Some(len) => {
                        self.phase = Phase::Data(data);
                        self.pulse(u64::from(len));
                        return Ok(());
                    }
                    None => self.phase = self.trailing_pause(data.pause_ms),
                },
                Phase::Tone { pulse, left } => {
                    if left > 0 {
                        self.phase = Phase::Tone {
                            pulse,
                            left: left - 1,
                        };
                        self.pulse(u64::from(pulse));
                        return Ok(());
                    }
                    self.phase = Phase::Done;
                }
                Phase::Pulses { pulses, next } => {
                    if let Some(&len) = pulses.get(next) {
                        self.phase = Phase::Pulses {
                            pulses,
                            next: next + 1,
                        };
                        self.pulse(u64::from(len));
                        return Ok(());
                    }
                    self.phase = Phase::Done;
                }
                Phase::Direct {
                    mut bits,
                    tstates_per_sample,
                    pause_ms,
                } => match bits.next_bit(tape)? {
                    Some(level) => {
                        self.phase = Phase::Direct {
                            bits,
                            tstates_per_sample,
                            pause_ms,
                        };
                        self.level = level;
                        self.remaining = u64::from(tstates_per_sample);
                        return Ok(());
                    }
                    None => self.phase = self.trailing_pause(pause_ms),
                },
                Phase::Csw(mut csw) => match csw.next_pulse(tape, self.clock_hz)? {
                    Some(len) => {
                        self.phase = Phase::Csw(csw);
                        self.pulse(len);
                        return Ok(());
                    }
                    None => self.phase = self.trailing_pause(csw.pause_ms),
                },
                Phase::Pause(ticks) => {
                    self.phase = Phase::Done;
                    if ticks > 0 {
                        self.level = false;
                        self.remaining = ticks;
                        return Ok(());
                    }
                }
                Phase::Done => {
                    self.ordinal += 1;
                    self.offset = self.next_offset;
                }
            }
        }
        Ok(())
    }

    fn trailing_pause(&self, pause_ms: u16) -> Phase {
        if pause_ms == 0 {
            Phase::Done
        } else {
            Phase::Pause(ms_to_ticks(pause_ms, self.clock_hz))
        }
    }

    /// Decode the block under the cursor and set up its first phase.
    fn enter_block<S: Read + Seek>(&mut self, tape: &mut Container<S>, index: &BlockIndex) -> Result<()> {
        if self.ordinal >= index.len() {
            self.end_of_tape();
            return Ok(());
        }
        let block = tape
            .decode_at(self.offset)?
            .ok_or(TapeError::CorruptIndex {
                ordinal: self.ordinal,
            })?;
        self.next_offset = block.end();
        debug!("block {} at offset {}", self.ordinal, self.offset);

        self.phase = match block {
            Block::Tap(tap) => match tap.flag {
                None => Phase::Done,
                Some(flag) => self.standard_phase(
                    flag,
                    self.tap_pause_ms,
                    DataSpan {
                        offset: tap.payload_offset(),
                        len: u32::from(tap.len),
                    },
                ),
            },
            Block::Tzx(tzx) => match tzx.kind {
                BlockKind::StandardSpeed { pause_ms, data } => {
                    if data.is_empty() {
                        self.trailing_pause(pause_ms)
                    } else {
                        let flag = tape.read_byte(data.offset)?;
                        self.standard_phase(flag, pause_ms, data)
                    }
                }
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
                } => Phase::Pilot {
                    pulse: pilot_pulse,
                    left: pilot_count,
                    sync1,
                    sync2,
                    data: DataBits::new(zero_pulse, one_pulse, used_bits, pause_ms, data),
                },
                BlockKind::PureTone { pulse_len, count } => Phase::Tone {
                    pulse: pulse_len,
                    left: count,
                },
                BlockKind::PulseSequence { pulses } => Phase::Pulses { pulses, next: 0 },
                BlockKind::PureData {
                    zero_pulse,
                    one_pulse,
                    used_bits,
                    pause_ms,
                    data,
                } => Phase::Data(DataBits::new(zero_pulse, one_pulse, used_bits, pause_ms, data)),
                BlockKind::DirectRecording {
                    tstates_per_sample,
                    pause_ms,
                    used_bits,
                    data,
                } => Phase::Direct {
                    bits: BitReader::new(data, used_bits),
                    tstates_per_sample,
                    pause_ms,
                },
                BlockKind::CswRecording {
                    pause_ms,
                    sample_rate,
                    compression,
                    data,
                    ..
                } => {
                    if compression != CswCompression::Rle {
                        return Err(TapeError::UnsupportedCompression);
                    }
                    if sample_rate == 0 {
                        self.trailing_pause(pause_ms)
                    } else {
                        Phase::Csw(CswStream {
                            data,
                            pos: 0,
                            sample_rate,
                            samples: 0,
                            ticks: 0,
                            pause_ms,
                        })
                    }
                }
                BlockKind::Pause { duration_ms: 0 } => {
                    debug!("stop the tape at block {}", self.ordinal);
                    self.stop_after_block(index.len());
                    Phase::Idle
                }
                BlockKind::Pause { duration_ms } => {
                    Phase::Pause(ms_to_ticks(duration_ms, self.clock_hz))
                }
                BlockKind::SetSignalLevel { level } => {
                    self.level = level;
                    Phase::Done
                }
                kind => match self.flow.apply(self.ordinal, &kind, index.len(), self.is_48k) {
                    Flow::Next => Phase::Done,
                    Flow::Goto(ordinal) => {
                        self.offset = index.offset_of(tape, ordinal)?;
                        self.ordinal = ordinal;
                        Phase::Idle
                    }
                    Flow::Stop => {
                        debug!("stop (48K) at block {}", self.ordinal);
                        self.stop_after_block(index.len());
                        Phase::Idle
                    }
                    Flow::End => {
                        self.end_of_tape();
                        Phase::Idle
                    }
                },
            },
        };
        Ok(())
    }

    fn standard_phase(&self, flag: u8, pause_ms: u16, data: DataSpan) -> Phase {
        Phase::Pilot {
            pulse: self.timings.pilot_pulse,
            left: self.timings.pilot_count(flag),
            sync1: self.timings.sync1,
            sync2: self.timings.sync2,
            data: DataBits::standard(&self.timings, pause_ms, data),
        }
    }

    /// Halt with the cursor past the current block, wrapping to the start
    /// after the last one.
    fn stop_after_block(&mut self, count: usize) {
        self.playing = false;
        if self.ordinal + 1 < count {
            self.ordinal += 1;
            self.offset = self.next_offset;
        } else {
            self.ordinal = 0;
            self.offset = self.first_offset;
            self.flow.reset();
        }
    }

    fn end_of_tape(&mut self) {
        debug!("end of tape");
        self.reposition(0, self.first_offset);
        self.playing = false;
        self.reached_end = true;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
