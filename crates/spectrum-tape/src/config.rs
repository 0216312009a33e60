//! Tape deck configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Supported Spectrum models.
///
/// Only the 48K/128K distinction and the CPU clock matter to the tape deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpectrumModel {
    // Sinclair
    #[default]
    Spectrum48K,
    Spectrum128K,
    SpectrumPlus2,
    SpectrumPlus3,
    // Russian/Eastern European
    Pentagon128,
}

impl SpectrumModel {
    /// Whether stop-if-48K blocks halt the tape on this model.
    #[must_use]
    pub fn is_48k(self) -> bool {
        matches!(self, Self::Spectrum48K)
    }

    /// CPU clock in T-states per second.
    #[must_use]
    pub fn cpu_clock_hz(self) -> u32 {
        match self {
            Self::Spectrum48K | Self::Pentagon128 => 3_500_000,
            Self::Spectrum128K | Self::SpectrumPlus2 | Self::SpectrumPlus3 => 3_546_900,
        }
    }
}

/// Standard ROM loader timings in T-states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseTimings {
    pub pilot_pulse: u16,
    pub sync1: u16,
    pub sync2: u16,
    pub zero_pulse: u16,
    pub one_pulse: u16,
    /// Pilot pulses before a header block (flag below $80).
    pub header_pilot_count: u16,
    /// Pilot pulses before a data block.
    pub data_pilot_count: u16,
}

impl Default for PulseTimings {
    fn default() -> Self {
        Self {
            pilot_pulse: 2168,
            sync1: 667,
            sync2: 735,
            zero_pulse: 855,
            one_pulse: 1710,
            header_pilot_count: 8063,
            data_pilot_count: 3223,
        }
    }
}

impl PulseTimings {
    /// Pilot length for a block starting with `flag`.
    #[must_use]
    pub fn pilot_count(&self, flag: u8) -> u16 {
        if flag & 0x80 == 0 {
            self.header_pilot_count
        } else {
            self.data_pilot_count
        }
    }
}

/// Arbitration between a real cassette interface and the virtual tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RealTapeMode {
    /// Real input when no virtual tape is inserted; record while not playing.
    #[default]
    Auto,
    /// Always read EAR from the real input.
    ForceLoad,
    /// Always record MIC edges.
    ForceSave,
}

/// Tape deck configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    pub model: SpectrumModel,
    /// Overrides the model's CPU clock.
    pub clock_hz: Option<u32>,
    pub timings: PulseTimings,
    /// Silence after every TAP block.
    pub tap_pause_ms: u16,
    pub realtape_mode: RealTapeMode,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            model: SpectrumModel::default(),
            clock_hz: None,
            timings: PulseTimings::default(),
            tap_pause_ms: 1000,
            realtape_mode: RealTapeMode::default(),
        }
    }
}

impl TapeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Effective CPU clock in T-states per second.
    #[must_use]
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz.unwrap_or_else(|| self.model.cpu_clock_hz())
    }

    /// Convert milliseconds to T-states at this configuration's clock.
    #[must_use]
    pub fn ms_to_ticks(&self, ms: u16) -> u64 {
        ms_to_ticks(ms, self.clock_hz())
    }
}

/// Milliseconds to T-states at `clock_hz`, rounded down.
#[must_use]
pub(crate) fn ms_to_ticks(ms: u16, clock_hz: u32) -> u64 {
    u64::from(ms) * u64::from(clock_hz) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rom_loader() {
        let config = TapeConfig::default();
        assert_eq!(config.clock_hz(), 3_500_000);
        assert_eq!(config.ms_to_ticks(1000), 3_500_000);
        assert_eq!(config.ms_to_ticks(1), 3500);
        assert_eq!(config.timings.pilot_count(0x00), 8063);
        assert_eq!(config.timings.pilot_count(0x7F), 8063);
        assert_eq!(config.timings.pilot_count(0x80), 3223);
        assert_eq!(config.timings.pilot_count(0xFF), 3223);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = TapeConfig::from_json(
            r#"{ "model": "Spectrum128K", "tap_pause_ms": 500, "realtape_mode": "force-load" }"#,
        )
        .expect("valid config");
        assert!(!config.model.is_48k());
        assert_eq!(config.clock_hz(), 3_546_900);
        assert_eq!(config.tap_pause_ms, 500);
        assert_eq!(config.realtape_mode, RealTapeMode::ForceLoad);
        assert_eq!(config.timings, PulseTimings::default());
    }

    #[test]
    fn clock_override() {
        let config = TapeConfig::from_json(r#"{ "clock_hz": 7000000 }"#).expect("valid config");
        assert_eq!(config.ms_to_ticks(2), 14_000);
        assert_eq!(ms_to_ticks(2, 7_000_000), config.ms_to_ticks(2));
        // 128K clock: 3546.9 T-states per ms, rounded down.
        assert_eq!(ms_to_ticks(1, 3_546_900), 3546);
        assert_eq!(ms_to_ticks(u16::MAX, 3_546_900), 232_446_091);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            TapeConfig::from_json("{ nope"),
            Err(crate::error::TapeError::Config(_))
        ));
    }
}
