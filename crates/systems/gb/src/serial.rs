//! Serial port (link cable) with nothing plugged in.
//!
//! - `$FF01 (SB)`: shift register
//! - `$FF02 (SC)`: bit 7 start/busy, bit 1 fast clock (color only),
//!   bit 0 clock source (1 = internal)
//!
//! An internally clocked transfer shifts out eight bits and, with no peer
//! on the other end, shifts in 1s. An externally clocked transfer waits for
//! a peer that never comes.

/// Clocks for eight bits at 8192 Hz.
const NORMAL_TRANSFER: u32 = 4096;
/// Clocks for eight bits at 262144 Hz.
const FAST_TRANSFER: u32 = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Serial {
    sb: u8,
    sc: u8,
    /// Clocks left in an internally clocked transfer
    remaining: Option<u32>,
}

impl Serial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_sb(&self) -> u8 {
        self.sb
    }

    pub fn read_sc(&self, color: bool) -> u8 {
        if color {
            self.sc | 0x7C
        } else {
            self.sc | 0x7E
        }
    }

    pub fn write_sb(&mut self, val: u8) {
        self.sb = val;
    }

    pub fn write_sc(&mut self, val: u8, color: bool) {
        self.sc = val & if color { 0x83 } else { 0x81 };
        self.remaining = match self.sc & 0x81 {
            0x81 if self.sc & 0x02 != 0 => Some(FAST_TRANSFER),
            0x81 => Some(NORMAL_TRANSFER),
            _ => None,
        };
    }

    /// Returns true when a transfer completes (serial interrupt).
    pub fn step(&mut self, cycles: u32) -> bool {
        let Some(remaining) = self.remaining else {
            return false;
        };
        if cycles < remaining {
            self.remaining = Some(remaining - cycles);
            return false;
        }
        self.remaining = None;
        self.sb = 0xFF;
        self.sc &= 0x7F;
        true
    }

    pub fn clocks_until_done(&self) -> Option<u32> {
        self.remaining
    }

    pub fn restore(&mut self, sb: u8, sc: u8) {
        self.sb = sb;
        self.sc = sc & 0x83;
        self.remaining = None;
    }

    pub fn set_remaining(&mut self, remaining: Option<u32>) {
        self.remaining = remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_transfer_completes() {
        let mut serial = Serial::new();
        serial.write_sb(0x42);
        serial.write_sc(0x81, false);
        assert_eq!(serial.clocks_until_done(), Some(4096));

        assert!(!serial.step(4000));
        assert!(serial.step(96));
        assert_eq!(serial.read_sb(), 0xFF);
        assert_eq!(serial.read_sc(false) & 0x80, 0);
        assert!(!serial.step(10_000));
    }

    #[test]
    fn fast_clock_only_on_color() {
        let mut serial = Serial::new();
        serial.write_sc(0x83, true);
        assert_eq!(serial.clocks_until_done(), Some(128));

        serial.write_sc(0x83, false);
        assert_eq!(serial.clocks_until_done(), Some(4096));
    }

    #[test]
    fn external_clock_never_finishes() {
        let mut serial = Serial::new();
        serial.write_sc(0x80, false);
        assert!(!serial.step(1_000_000));
        assert_eq!(serial.read_sc(false), 0xFE);
    }
}
