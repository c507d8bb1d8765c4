//! Wave channel (3): plays 32 4-bit samples from wave RAM (`$FF30-$FF3F`).
//!
//! | Reg  | Bits      | Meaning                                |
//! |------|-----------|----------------------------------------|
//! | NR30 | E--- ---- | DAC power                              |
//! | NR31 | LLLL LLLL | length data                            |
//! | NR32 | -VV- ---- | output level: mute, 100%, 50%, 25%     |
//! | NR33 | FFFF FFFF | frequency low                          |
//! | NR34 | TL-- -FFF | trigger, length enable, frequency high |

use super::length::Length;

#[derive(Debug, Clone)]
pub struct Wave {
    enabled: bool,
    dac: bool,
    volume_code: u8,
    freq: u16,
    timer: u32,
    position: u8,
    sample: u8,
    pub length: Length,
    ram: [u8; 16],
}

impl Default for Wave {
    fn default() -> Self {
        Self::new()
    }
}

impl Wave {
    pub fn new() -> Self {
        Self {
            enabled: false,
            dac: false,
            volume_code: 0,
            freq: 0,
            timer: 4096,
            position: 0,
            sample: 0,
            length: Length::new(256),
            ram: [0; 16],
        }
    }

    fn period(&self) -> u32 {
        (2048 - self.freq as u32) * 2
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn write(&mut self, reg: u16, val: u8) {
        match reg {
            0 => {
                self.dac = val & 0x80 != 0;
                if !self.dac {
                    self.enabled = false;
                }
            }
            1 => self.length.load(val),
            2 => self.volume_code = (val >> 5) & 0x03,
            3 => self.freq = (self.freq & 0x700) | val as u16,
            4 => {
                self.freq = (self.freq & 0xFF) | ((val as u16 & 0x07) << 8);
                self.length.set_enabled(val & 0x40 != 0);
                if val & 0x80 != 0 {
                    self.enabled = self.dac;
                    self.length.trigger();
                    self.position = 0;
                    // first sample fetch is delayed
                    self.timer = self.period() + 6;
                }
            }
            _ => {}
        }
    }

    pub fn restore(&mut self, regs: &[u8; 5], enabled: bool) {
        self.dac = regs[0] & 0x80 != 0;
        self.volume_code = (regs[2] >> 5) & 0x03;
        self.freq = (regs[3] as u16) | ((regs[4] as u16 & 0x07) << 8);
        self.length.set_enabled(regs[4] & 0x40 != 0);
        self.length.trigger();
        self.timer = self.period();
        self.enabled = enabled && self.dac;
    }

    pub fn read_ram(&self, index: usize) -> u8 {
        self.ram[index & 0x0F]
    }

    pub fn write_ram(&mut self, index: usize, val: u8) {
        self.ram[index & 0x0F] = val;
    }

    pub fn ram(&self) -> &[u8; 16] {
        &self.ram
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    fn fetch(&mut self) {
        let byte = self.ram[(self.position / 2) as usize];
        self.sample = if self.position & 1 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        };
    }

    pub fn level(&self) -> i32 {
        if !self.enabled {
            return 0;
        }
        let digital = match self.volume_code {
            0 => 0,
            code => self.sample >> (code - 1),
        };
        digital as i32 * 2 - 15
    }

    pub fn advance(&mut self, mut dots: u32) -> i32 {
        let mut area = 0;
        while dots >= self.timer {
            area += self.level() * self.timer as i32;
            dots -= self.timer;
            self.timer = self.period();
            self.position = (self.position + 1) & 31;
            self.fetch();
        }
        self.timer -= dots;
        area + self.level() * dots as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(volume: u8) -> Wave {
        let mut ch = Wave::new();
        for i in 0..16 {
            ch.write_ram(i, 0xF0);
        }
        ch.write(0, 0x80);
        ch.write(2, volume << 5);
        ch.write(3, 0xFF);
        ch.write(4, 0x87); // period 2 dots
        ch
    }

    #[test]
    fn plays_wave_ram_nibbles() {
        let mut ch = playing(1);
        ch.advance(8); // past the trigger delay: position 1, low nibble
        assert_eq!(ch.level(), -15);
        ch.advance(2);
        assert_eq!(ch.level(), 15);
    }

    #[test]
    fn volume_code_shifts() {
        let mut ch = playing(3);
        ch.advance(10);
        assert_eq!(ch.level(), (15 >> 2) * 2 - 15);
    }

    #[test]
    fn mute_code_outputs_floor() {
        let mut ch = playing(0);
        ch.advance(10);
        assert_eq!(ch.level(), -15);
    }

    #[test]
    fn dac_off_disables() {
        let mut ch = playing(1);
        assert!(ch.enabled());
        ch.write(0, 0x00);
        assert!(!ch.enabled());
        assert_eq!(ch.level(), 0);
    }

    #[test]
    fn long_length_counter() {
        let mut ch = playing(1);
        ch.write(1, 0);
        ch.write(4, 0x40 | 0x87);
        for _ in 0..255 {
            ch.clock_length();
        }
        assert!(ch.enabled());
        ch.clock_length();
        assert!(!ch.enabled());
    }
}
