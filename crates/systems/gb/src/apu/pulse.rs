//! Pulse channels (1 and 2). Channel 1 adds a frequency sweep.
//!
//! | Reg  | Bits      | Meaning                                  |
//! |------|-----------|------------------------------------------|
//! | NRx0 | -PPP NSSS | sweep period, negate, shift (ch1 only)   |
//! | NRx1 | DDLL LLLL | duty, length data                        |
//! | NRx2 | VVVV APPP | envelope                                 |
//! | NRx3 | FFFF FFFF | frequency low                            |
//! | NRx4 | TL-- -FFF | trigger, length enable, frequency high   |

use super::envelope::Envelope;
use super::length::Length;

const DUTY_TABLE: [u8; 4] = [0b0000_0001, 0b1000_0001, 0b1000_0111, 0b0111_1110];

/// Channel 1 frequency sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

impl Sweep {
    pub fn write(&mut self, val: u8) {
        self.period = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
    }

    fn reload(&mut self) {
        self.timer = if self.period == 0 { 8 } else { self.period };
    }

    fn next(&self, freq: u16) -> u16 {
        let delta = freq >> self.shift;
        if self.negate {
            freq.wrapping_sub(delta)
        } else {
            freq + delta
        }
    }

    /// Returns false if the immediate overflow check faults the channel.
    fn trigger(&mut self, freq: u16) -> bool {
        self.shadow = freq;
        self.reload();
        self.enabled = self.period != 0 || self.shift != 0;
        if self.shift == 0 {
            return true;
        }
        let first = self.next(self.shadow);
        first <= 2047 && self.next(first) <= 2047
    }

    /// Returns the new frequency, or Err(()) if it overflowed.
    fn clock(&mut self) -> Result<Option<u16>, ()> {
        self.timer = self.timer.saturating_sub(1);
        if self.timer > 0 {
            return Ok(None);
        }
        self.reload();
        if !self.enabled || self.period == 0 {
            return Ok(None);
        }
        let freq = self.next(self.shadow);
        if freq > 2047 {
            return Err(());
        }
        if self.shift == 0 {
            return Ok(None);
        }
        self.shadow = freq;
        if self.next(freq) > 2047 {
            return Err(());
        }
        Ok(Some(freq))
    }
}

#[derive(Debug, Clone)]
pub struct Pulse {
    enabled: bool,
    duty: u8,
    phase: u8,
    freq: u16,
    timer: u32,
    pub length: Length,
    pub envelope: Envelope,
    sweep: Option<Sweep>,
}

impl Pulse {
    pub fn new(with_sweep: bool) -> Self {
        Self {
            enabled: false,
            duty: 0,
            phase: 0,
            freq: 0,
            timer: 8192,
            length: Length::new(64),
            envelope: Envelope::new(),
            sweep: with_sweep.then(Sweep::default),
        }
    }

    fn period(&self) -> u32 {
        (2048 - self.freq as u32) * 4
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// `reg` is 0-4 for NRx0-NRx4.
    pub fn write(&mut self, reg: u16, val: u8) {
        match reg {
            0 => {
                if let Some(sweep) = self.sweep.as_mut() {
                    sweep.write(val);
                }
            }
            1 => {
                self.duty = val >> 6;
                self.length.load(val & 0x3F);
            }
            2 => {
                self.envelope.write(val);
                if !self.envelope.dac_enabled() {
                    self.enabled = false;
                }
            }
            3 => self.freq = (self.freq & 0x700) | val as u16,
            4 => {
                self.freq = (self.freq & 0xFF) | ((val as u16 & 0x07) << 8);
                self.length.set_enabled(val & 0x40 != 0);
                if val & 0x80 != 0 {
                    self.trigger();
                }
            }
            _ => {}
        }
    }

    /// Reload channel parameters from a register image without a trigger.
    pub fn restore(&mut self, regs: &[u8; 5], enabled: bool) {
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.write(regs[0]);
            sweep.shadow = (regs[3] as u16) | ((regs[4] as u16 & 0x07) << 8);
        }
        self.duty = regs[1] >> 6;
        self.envelope.write(regs[2]);
        self.envelope.trigger();
        self.freq = (regs[3] as u16) | ((regs[4] as u16 & 0x07) << 8);
        self.length.set_enabled(regs[4] & 0x40 != 0);
        self.length.trigger();
        self.timer = self.period();
        self.enabled = enabled && self.envelope.dac_enabled();
    }

    fn trigger(&mut self) {
        self.enabled = self.envelope.dac_enabled();
        self.length.trigger();
        self.timer = self.period();
        self.envelope.trigger();
        if let Some(sweep) = self.sweep.as_mut() {
            if !sweep.trigger(self.freq) {
                self.enabled = false;
            }
        }
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    pub fn clock_sweep(&mut self) {
        let Some(sweep) = self.sweep.as_mut() else {
            return;
        };
        match sweep.clock() {
            Ok(Some(freq)) => self.freq = freq,
            Ok(None) => {}
            Err(()) => self.enabled = false,
        }
    }

    /// Signed output level: -15..=15, 0 when silent.
    pub fn level(&self) -> i32 {
        if !self.enabled {
            return 0;
        }
        let high = (DUTY_TABLE[self.duty as usize] >> self.phase) & 1;
        let digital = if high != 0 { self.envelope.volume() } else { 0 };
        digital as i32 * 2 - 15
    }

    /// Advance by `dots` clocks, returning the level integrated over them.
    pub fn advance(&mut self, mut dots: u32) -> i32 {
        let mut area = 0;
        while dots >= self.timer {
            area += self.level() * self.timer as i32;
            dots -= self.timer;
            self.timer = self.period();
            self.phase = (self.phase + 1) & 7;
        }
        self.timer -= dots;
        area + self.level() * dots as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered(duty: u8, freq: u16) -> Pulse {
        let mut ch = Pulse::new(false);
        ch.write(1, duty << 6);
        ch.write(2, 0xF0);
        ch.write(3, freq as u8);
        ch.write(4, 0x80 | (freq >> 8) as u8);
        ch
    }

    #[test]
    fn trigger_needs_dac() {
        let mut ch = Pulse::new(false);
        ch.write(4, 0x80);
        assert!(!ch.enabled());
        ch.write(2, 0x10);
        ch.write(4, 0x80);
        assert!(ch.enabled());
        ch.write(2, 0x00);
        assert!(!ch.enabled());
    }

    #[test]
    fn half_duty_averages_to_zero() {
        let mut ch = triggered(2, 2047);
        // period 4 dots, 8 steps per cycle
        let area = ch.advance(32 * 8);
        assert_eq!(area, 0);
    }

    #[test]
    fn eighth_duty_is_mostly_low() {
        let mut ch = triggered(0, 2047);
        let area = ch.advance(32);
        // one of eight steps high
        assert_eq!(area, 4 * 15 - 28 * 15);
    }

    #[test]
    fn length_expiry_silences() {
        let mut ch = triggered(2, 1000);
        ch.write(1, 0x80 | 62);
        ch.write(4, 0x40 | 0x03);
        assert!(ch.enabled());
        ch.clock_length();
        assert!(ch.enabled());
        ch.clock_length();
        assert!(!ch.enabled());
        assert_eq!(ch.level(), 0);
    }

    #[test]
    fn sweep_without_shift_never_faults() {
        let mut ch = Pulse::new(true);
        ch.write(0, 0x00);
        ch.write(2, 0xF0);
        ch.write(3, 0xFF);
        ch.write(4, 0x87);
        assert!(ch.enabled());
        for _ in 0..16 {
            ch.clock_sweep();
        }
        assert!(ch.enabled());
    }

    #[test]
    fn trigger_overflow_check_faults_immediately() {
        let mut ch = Pulse::new(true);
        ch.write(0, 0x11); // period 1, add, shift 1
        ch.write(2, 0xF0);
        // 1400 + 700 > 2047
        ch.write(3, (1400 & 0xFF) as u8);
        ch.write(4, 0x80 | (1400 >> 8) as u8);
        assert!(!ch.enabled());
    }

    #[test]
    fn second_trigger_check_faults() {
        let mut ch = Pulse::new(true);
        ch.write(0, 0x11);
        ch.write(2, 0xF0);
        // 1200 + 600 = 1800 fine, 1800 + 900 overflows
        ch.write(3, (1200 & 0xFF) as u8);
        ch.write(4, 0x80 | (1200 >> 8) as u8);
        assert!(!ch.enabled());
    }

    #[test]
    fn sweep_raises_frequency() {
        let mut ch = Pulse::new(true);
        ch.write(0, 0x12); // period 1, add, shift 2
        ch.write(2, 0xF0);
        ch.write(3, 0x00);
        ch.write(4, 0x82); // freq 512
        assert!(ch.enabled());
        ch.clock_sweep();
        assert_eq!(ch.freq, 640);
    }

    #[test]
    fn negate_sweep_lowers_frequency() {
        let mut ch = Pulse::new(true);
        ch.write(0, 0x19); // period 1, subtract, shift 1
        ch.write(2, 0xF0);
        ch.write(3, 0x00);
        ch.write(4, 0x84); // freq 1024
        ch.clock_sweep();
        assert_eq!(ch.freq, 512);
        assert!(ch.enabled());
    }
}
