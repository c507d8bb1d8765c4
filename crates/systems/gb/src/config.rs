//! Engine configuration.
//!
//! Everything a host can tune is carried in [`EngineConfig`], handed to
//! [`crate::GbSystem::with_config`] and kept on the engine for its lifetime.

use chroma_core::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};

/// Classic green-tinted shades, lightest first.
pub const DEFAULT_DMG_PALETTE: [u32; 4] = [0xFFE0_F8D0, 0xFF88_C070, 0xFF34_6856, 0xFF08_1820];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run dual-mode cartridges (header byte 0x80) on color hardware
    pub prefer_color: bool,
    /// Run everything on monochrome hardware
    pub force_monochrome: bool,
    /// When false the sound generator still runs but nothing reaches the sink
    pub audio_enabled: bool,
    /// Host output rate in frames per second
    pub sample_rate: u32,
    /// Stereo frames per sink push
    pub audio_chunk_frames: usize,
    /// ARGB shades for monochrome color indices 0-3
    pub dmg_palette: [u32; 4],
    /// Boot ROM image (256 bytes monochrome, 2304 bytes color)
    pub boot_rom: Option<Vec<u8>>,
    /// Global log level name, e.g. "warn" or "debug"
    pub log_level: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefer_color: true,
            force_monochrome: false,
            audio_enabled: true,
            sample_rate: 44_100,
            audio_chunk_frames: 1024,
            dmg_palette: DEFAULT_DMG_PALETTE,
            boot_rom: None,
            log_level: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Push `log_level` into the logging singleton, if set and valid.
    pub(crate) fn apply_logging(&self) {
        if let Some(level) = self.log_level.as_deref().and_then(LogLevel::from_str) {
            LogConfig::global().set_global_level(level);
        }
    }

    /// Whether a cartridge asking for color hardware gets it.
    pub(crate) fn color_for(&self, wants_color: bool, color_only: bool) -> bool {
        if self.force_monochrome {
            return false;
        }
        wants_color && (color_only || self.prefer_color)
    }

    /// Boot ROM matching the chosen hardware, if one was supplied.
    pub(crate) fn boot_rom_for(&self, color: bool) -> Option<&[u8]> {
        let expected = if color { 0x900 } else { 0x100 };
        self.boot_rom
            .as_deref()
            .filter(|rom| rom.len() == expected)
    }
}
