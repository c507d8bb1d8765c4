//! Noise channel (4): a 15-bit LFSR, optionally shortened to 7 bits.
//!
//! | Reg  | Bits      | Meaning                          |
//! |------|-----------|----------------------------------|
//! | NR41 | --LL LLLL | length data                      |
//! | NR42 | VVVV APPP | envelope                         |
//! | NR43 | SSSS WDDD | clock shift, width, divisor code |
//! | NR44 | TL-- ---- | trigger, length enable           |

use super::envelope::Envelope;
use super::length::Length;

const DIVISORS: [u32; 8] = [8, 16, 32, 48, 64, 80, 96, 112];

#[derive(Debug, Clone)]
pub struct Noise {
    enabled: bool,
    lfsr: u16,
    shift: u8,
    narrow: bool,
    divisor: u8,
    timer: u32,
    pub length: Length,
    pub envelope: Envelope,
}

impl Default for Noise {
    fn default() -> Self {
        Self::new()
    }
}

impl Noise {
    pub fn new() -> Self {
        Self {
            enabled: false,
            lfsr: 0x7FFF,
            shift: 0,
            narrow: false,
            divisor: 0,
            timer: 8,
            length: Length::new(64),
            envelope: Envelope::new(),
        }
    }

    fn period(&self) -> u32 {
        DIVISORS[self.divisor as usize] << self.shift
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn write(&mut self, reg: u16, val: u8) {
        match reg {
            1 => self.length.load(val & 0x3F),
            2 => {
                self.envelope.write(val);
                if !self.envelope.dac_enabled() {
                    self.enabled = false;
                }
            }
            3 => {
                self.shift = val >> 4;
                self.narrow = val & 0x08 != 0;
                self.divisor = val & 0x07;
            }
            4 => {
                self.length.set_enabled(val & 0x40 != 0);
                if val & 0x80 != 0 {
                    self.enabled = self.envelope.dac_enabled();
                    self.length.trigger();
                    self.envelope.trigger();
                    self.lfsr = 0x7FFF;
                    self.timer = self.period();
                }
            }
            _ => {}
        }
    }

    pub fn restore(&mut self, regs: &[u8; 5], enabled: bool) {
        self.envelope.write(regs[2]);
        self.envelope.trigger();
        self.write(3, regs[3]);
        self.length.set_enabled(regs[4] & 0x40 != 0);
        self.length.trigger();
        self.lfsr = 0x7FFF;
        self.timer = self.period();
        self.enabled = enabled && self.envelope.dac_enabled();
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    fn shift_lfsr(&mut self) {
        let bit = (self.lfsr ^ (self.lfsr >> 1)) & 1;
        self.lfsr = (self.lfsr >> 1) | (bit << 14);
        if self.narrow {
            self.lfsr = (self.lfsr & !0x40) | (bit << 6);
        }
    }

    pub fn level(&self) -> i32 {
        if !self.enabled {
            return 0;
        }
        let digital = if self.lfsr & 1 == 0 {
            self.envelope.volume()
        } else {
            0
        };
        digital as i32 * 2 - 15
    }

    pub fn advance(&mut self, mut dots: u32) -> i32 {
        let mut area = 0;
        while dots >= self.timer {
            area += self.level() * self.timer as i32;
            dots -= self.timer;
            self.timer = self.period();
            self.shift_lfsr();
        }
        self.timer -= dots;
        area + self.level() * dots as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered(nr43: u8) -> Noise {
        let mut ch = Noise::new();
        ch.write(2, 0xF0);
        ch.write(3, nr43);
        ch.write(4, 0x80);
        ch
    }

    #[test]
    fn lfsr_sequence_from_seed() {
        let mut ch = triggered(0x00);
        ch.shift_lfsr();
        assert_eq!(ch.lfsr, 0x3FFF);
        ch.shift_lfsr();
        assert_eq!(ch.lfsr, 0x1FFF);
    }

    #[test]
    fn narrow_mode_repeats_every_127() {
        let mut ch = triggered(0x08);
        for _ in 0..200 {
            ch.shift_lfsr();
        }
        let start = ch.lfsr & 0x7F;
        for _ in 0..127 {
            ch.shift_lfsr();
        }
        assert_eq!(ch.lfsr & 0x7F, start);
    }

    #[test]
    fn period_scales_with_shift() {
        let ch = triggered(0x21);
        assert_eq!(ch.period(), 16 << 2);
    }

    #[test]
    fn seeded_register_starts_silent() {
        // all ones: output bit high means silent
        let ch = triggered(0x00);
        assert_eq!(ch.level(), -15);
    }

    #[test]
    fn zero_lfsr_bit_plays_volume() {
        let mut ch = triggered(0x00);
        ch.lfsr = 0x7FFE;
        assert_eq!(ch.level(), 15);
    }
}
