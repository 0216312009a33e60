//! Pulse recorder: recognises standard ROM-speed pulses on the MIC line and
//! reassembles the bytes they carry.
//!
//! A block is pilot tone, a sync pair, then one pulse pair per bit. Pulse
//! widths are accepted within ±25% of the configured timings; a data bit is
//! a one when its pulse pair is longer than `zero + one`.

use log::debug;

use crate::config::PulseTimings;

/// Pilot pulses required before a sync pulse is believed.
const MIN_PILOT_PULSES: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pilot(u32),
    /// First sync pulse seen.
    Sync,
    /// Receiving bits; holds the first half of a pending pair.
    Data(Option<u64>),
}

/// Edge-driven decoder for the save direction.
#[derive(Debug, Clone)]
pub struct PulseRecorder {
    timings: PulseTimings,
    /// Silence that closes a block, in T-states.
    silence: u64,
    state: State,
    last_level: bool,
    last_edge: Option<u64>,
    bytes: Vec<u8>,
    byte: u8,
    bits: u8,
}

impl PulseRecorder {
    #[must_use]
    pub fn new(timings: PulseTimings, clock_hz: u32) -> Self {
        let silence = (2 * u64::from(timings.one_pulse)).max(u64::from(clock_hz) / 200);
        Self {
            timings,
            silence,
            state: State::Idle,
            last_level: false,
            last_edge: None,
            bytes: Vec::new(),
            byte: 0,
            bits: 0,
        }
    }

    /// Whether a block is being received.
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        matches!(self.state, State::Data(_)) && !self.bytes.is_empty()
    }

    /// Feed the MIC level at T-state `tick`.
    ///
    /// Returns a completed block (flag, body and checksum as recorded) when
    /// this edge closes one.
    pub fn edge(&mut self, level: bool, tick: u64) -> Option<Vec<u8>> {
        if level == self.last_level {
            return None;
        }
        self.last_level = level;
        let previous = self.last_edge.replace(tick);
        let width = tick.saturating_sub(previous?);
        if width > self.silence {
            let block = self.close();
            self.pulse(width);
            return block;
        }
        self.pulse(width)
    }

    /// Close the current block if the line has been quiet too long.
    pub fn poll(&mut self, tick: u64) -> Option<Vec<u8>> {
        match self.last_edge {
            Some(last) if tick.saturating_sub(last) > self.silence => self.close(),
            _ => None,
        }
    }

    /// Close whatever has been received so far.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.last_edge = None;
        self.close()
    }

    fn pulse(&mut self, width: u64) -> Option<Vec<u8>> {
        let t = self.timings;
        match self.state {
            State::Idle => {
                if near(width, t.pilot_pulse) {
                    self.state = State::Pilot(1);
                }
                None
            }
            State::Pilot(count) => {
                if near(width, t.pilot_pulse) {
                    self.state = State::Pilot(count + 1);
                } else if count >= MIN_PILOT_PULSES && near(width, t.sync1) {
                    self.state = State::Sync;
                } else {
                    self.state = State::Idle;
                }
                None
            }
            State::Sync => {
                if near(width, t.sync2) {
                    debug!("recorder: sync found");
                    self.state = State::Data(None);
                } else {
                    self.state = State::Idle;
                }
                None
            }
            State::Data(None) => {
                if self.is_bit_half(width) {
                    self.state = State::Data(Some(width));
                    None
                } else {
                    self.close()
                }
            }
            State::Data(Some(first)) => {
                if !self.is_bit_half(width) {
                    return self.close();
                }
                let one = first + width > u64::from(t.zero_pulse) + u64::from(t.one_pulse);
                self.push_bit(one);
                self.state = State::Data(None);
                None
            }
        }
    }

    fn is_bit_half(&self, width: u64) -> bool {
        near(width, self.timings.zero_pulse) || near(width, self.timings.one_pulse)
    }

    fn push_bit(&mut self, one: bool) {
        self.byte = (self.byte << 1) | u8::from(one);
        self.bits += 1;
        if self.bits == 8 {
            self.bytes.push(self.byte);
            self.byte = 0;
            self.bits = 0;
        }
    }

    fn close(&mut self) -> Option<Vec<u8>> {
        self.state = State::Idle;
        self.byte = 0;
        self.bits = 0;
        if self.bytes.is_empty() {
            None
        } else {
            debug!("recorder: block of {} bytes", self.bytes.len());
            Some(std::mem::take(&mut self.bytes))
        }
    }
}

/// Within ±25% of `target`.
fn near(width: u64, target: u16) -> bool {
    let target = u64::from(target);
    width * 4 >= target * 3 && width * 4 <= target * 5
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive `rec` with a ROM-speed rendition of `bytes`, returning the
    /// T-state of the last edge.
    fn save(rec: &mut PulseRecorder, bytes: &[u8], start: u64, level: &mut bool) -> u64 {
        let t = PulseTimings::default();
        let mut tick = start;
        let mut pulses = vec![t.pilot_pulse; 300];
        pulses.extend([t.sync1, t.sync2]);
        for &byte in bytes {
            for bit in (0..8).rev() {
                let len = if (byte >> bit) & 1 == 1 { t.one_pulse } else { t.zero_pulse };
                pulses.extend([len, len]);
            }
        }
        for len in pulses {
            *level = !*level;
            assert!(rec.edge(*level, tick).is_none());
            tick += u64::from(len);
        }
        // The edge that ends the final pulse.
        *level = !*level;
        assert!(rec.edge(*level, tick).is_none());
        tick
    }

    #[test]
    fn recognises_a_standard_block() {
        let mut rec = PulseRecorder::new(PulseTimings::default(), 3_500_000);
        let mut level = false;
        let end = save(&mut rec, &[0xFF, 0x12, 0xED], 1000, &mut level);
        assert!(rec.is_receiving());
        assert!(rec.poll(end + 100).is_none());
        assert_eq!(rec.poll(end + 20_000), Some(vec![0xFF, 0x12, 0xED]));
        assert!(!rec.is_receiving());
    }

    #[test]
    fn back_to_back_blocks() {
        let mut rec = PulseRecorder::new(PulseTimings::default(), 3_500_000);
        let mut level = false;
        let end = save(&mut rec, &[0x00, 0x01], 0, &mut level);
        // A long gap, then the next block's pilot closes the first block.
        level = !level;
        assert_eq!(rec.edge(level, end + 1_000_000), Some(vec![0x00, 0x01]));
        let end = save(&mut rec, &[0xFF], end + 1_000_000 + 2168, &mut level);
        assert_eq!(rec.finish(), Some(vec![0xFF]));
        assert!(rec.poll(end + 1_000_000).is_none());
    }

    #[test]
    fn short_pilot_is_ignored() {
        let mut rec = PulseRecorder::new(PulseTimings::default(), 3_500_000);
        let t = PulseTimings::default();
        let mut tick = 0;
        let mut level = false;
        for len in [t.pilot_pulse, t.pilot_pulse, t.sync1, t.sync2, t.zero_pulse, t.zero_pulse] {
            level = !level;
            rec.edge(level, tick);
            tick += u64::from(len);
        }
        assert!(!rec.is_receiving());
        assert!(rec.finish().is_none());
    }

    #[test]
    fn repeated_level_is_not_an_edge() {
        let mut rec = PulseRecorder::new(PulseTimings::default(), 3_500_000);
        assert!(rec.edge(false, 10).is_none());
        assert!(rec.edge(true, 20).is_none());
        assert!(rec.edge(true, 5000).is_none());
        assert!(rec.poll(21).is_none());
    }

    #[test]
    fn tolerance_window() {
        assert!(near(855, 855));
        assert!(near(642, 855));
        assert!(!near(640, 855));
        assert!(near(1068, 855));
        assert!(!near(1070, 855));
    }
}
