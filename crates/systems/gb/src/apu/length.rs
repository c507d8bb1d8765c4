//! Length counter: silences a channel after a programmed duration.
//!
//! Clocked at 256 Hz (frame sequencer steps 0, 2, 4, 6) while enabled by bit
//! 6 of NRx4. Pulse and noise count from 64, wave from 256.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Length {
    max: u16,
    counter: u16,
    enabled: bool,
}

impl Length {
    pub fn new(max: u16) -> Self {
        Self {
            max,
            counter: 0,
            enabled: false,
        }
    }

    /// NRx1 length data
    pub fn load(&mut self, val: u8) {
        self.counter = self.max - (val as u16 & (self.max - 1));
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn trigger(&mut self) {
        if self.counter == 0 {
            self.counter = self.max;
        }
    }

    /// Returns true when the counter runs out on this clock.
    pub fn clock(&mut self) -> bool {
        if !self.enabled || self.counter == 0 {
            return false;
        }
        self.counter -= 1;
        self.counter == 0
    }
}
