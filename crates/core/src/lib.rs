//! Core emulator primitives and traits.

pub mod cpu_lr35902;
pub mod logging;
pub mod sink;

pub mod types {
    use serde::{Deserialize, Serialize};

    /// A finished picture in 0xAARRGGBB pixels, row-major.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u32>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }

        /// Fill every pixel with one color
        pub fn fill(&mut self, color: u32) {
            self.pixels.fill(color);
        }

        pub fn pixel(&self, x: u32, y: u32) -> u32 {
            self.pixels[(y * self.width + x) as usize]
        }
    }

    /// One channel of an interleaved stereo stream.
    pub type AudioSample = i16;
}

use serde_json::Value;

/// Description of a mount point (media slot) that a system supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPointInfo {
    /// Unique identifier for this mount point (e.g., "Cartridge")
    pub id: String,
    /// User-friendly name for display (e.g., "Cartridge Slot")
    pub name: String,
    /// File extensions accepted by this mount point (e.g., ["gb", "gbc"])
    pub extensions: Vec<String>,
    /// Whether this mount point is required for the system to function
    pub required: bool,
}

/// A high-level System trait tying components together.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state
    fn reset(&mut self);

    /// Emulate until a frame is produced and return a framebuffer.
    fn step_frame(&mut self) -> Result<types::Frame, Self::Error>;

    /// Return a JSON-serializable save state.
    /// Save states do not include ROM data.
    fn save_state(&self) -> Value;

    /// Load a JSON save state produced by [`System::save_state`].
    /// On error the running state is left untouched.
    fn load_state(&mut self, v: &Value) -> Result<(), Self::Error>;

    /// Check if this system supports save/load state functionality
    fn supports_save_states(&self) -> bool {
        false
    }

    /// Get the list of mount points this system supports
    fn mount_points(&self) -> Vec<MountPointInfo>;

    /// Load media into a specific mount point
    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Unload media from a specific mount point
    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error>;

    /// Check if a mount point has media loaded
    fn is_mounted(&self, mount_point_id: &str) -> bool;
}
