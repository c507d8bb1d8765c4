//! MBC3 real-time clock.
//!
//! The clock keeps running while the emulator is closed: it stores the wall
//! clock time of its last update, and is caught up from the host's clock
//! whenever it is resumed.
//!
//! # Registers (selected through the RAM bank register)
//!
//! - 0x08: seconds (0-59)
//! - 0x09: minutes (0-59)
//! - 0x0A: hours (0-23)
//! - 0x0B: day counter, low 8 bits
//! - 0x0C: bit 0 day counter bit 8, bit 6 halt, bit 7 day carry
//!
//! Reads see the latched copy; writes go to the live counters.

use chroma_core::logging::{log, LogCategory, LogLevel};
use std::time::{SystemTime, UNIX_EPOCH};

const DH_DAY_BIT8: u8 = 0x01;
const DH_HALT: u8 = 0x40;
const DH_CARRY: u8 = 0x80;

/// Size of the RTC trailer in a battery blob.
pub const RTC_BLOB_LEN: usize = 48;

/// Wall clock the RTC is caught up from.
pub trait TimeSource: Send {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rtc {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub day_low: u8,
    pub day_high: u8,
    /// seconds, minutes, hours, day low, day high as last latched
    pub latched: [u8; 5],
    /// Milliseconds not yet folded into `seconds`
    sub_second: u64,
    /// Wall clock of the last catch-up, Unix milliseconds
    last_update: u64,
    latch_armed: bool,
}

impl Rtc {
    pub fn new(now_millis: u64) -> Self {
        Self {
            seconds: 0,
            minutes: 0,
            hours: 0,
            day_low: 0,
            day_high: 0,
            latched: [0; 5],
            sub_second: 0,
            last_update: now_millis,
            latch_armed: false,
        }
    }

    pub fn halted(&self) -> bool {
        self.day_high & DH_HALT != 0
    }

    fn days(&self) -> u16 {
        (((self.day_high & DH_DAY_BIT8) as u16) << 8) | self.day_low as u16
    }

    /// Bring the live counters up to `now_millis`.
    pub fn update(&mut self, now_millis: u64) {
        let elapsed = now_millis.saturating_sub(self.last_update);
        self.last_update = now_millis;
        if self.halted() {
            return;
        }
        self.sub_second += elapsed;
        let whole = self.sub_second / 1000;
        self.sub_second %= 1000;
        if whole > 0 {
            self.add_seconds(whole);
        }
    }

    fn add_seconds(&mut self, elapsed: u64) {
        let total = self.seconds as u64 + elapsed;
        self.seconds = (total % 60) as u8;
        let total = self.minutes as u64 + total / 60;
        self.minutes = (total % 60) as u8;
        let total = self.hours as u64 + total / 60;
        self.hours = (total % 24) as u8;
        let mut days = self.days() as u64 + total / 24;
        if days > 511 {
            days %= 512;
            self.day_high |= DH_CARRY;
        }
        self.day_low = days as u8;
        self.day_high = (self.day_high & !DH_DAY_BIT8) | ((days >> 8) as u8 & DH_DAY_BIT8);
    }

    /// Write to 0x6000-0x7FFF: 0 followed by 1 copies the live counters.
    pub fn write_latch(&mut self, val: u8) {
        if self.latch_armed && val == 0x01 {
            self.latched = [
                self.seconds,
                self.minutes,
                self.hours,
                self.day_low,
                self.day_high,
            ];
        }
        self.latch_armed = val == 0x00;
    }

    pub fn read(&self, register: u8) -> u8 {
        match register {
            0x08..=0x0C => self.latched[(register - 0x08) as usize],
            _ => 0xFF,
        }
    }

    /// Returns false (and leaves the counter alone) for out-of-range values.
    pub fn write(&mut self, register: u8, val: u8) -> bool {
        let accepted = match register {
            0x08 if val < 60 => {
                self.seconds = val;
                self.sub_second = 0;
                true
            }
            0x09 if val < 60 => {
                self.minutes = val;
                true
            }
            0x0A if val < 24 => {
                self.hours = val;
                true
            }
            0x0B => {
                self.day_low = val;
                true
            }
            0x0C => {
                self.day_high = val & (DH_DAY_BIT8 | DH_HALT | DH_CARRY);
                true
            }
            _ => false,
        };
        if !accepted {
            log(LogCategory::Cartridge, LogLevel::Warn, || {
                format!("RTC write {:02X} to register {:02X} out of range, ignored", val, register)
            });
        }
        accepted
    }

    /// Battery trailer: twelve little-endian u32 words.
    pub fn to_blob(&self) -> [u8; RTC_BLOB_LEN] {
        let seconds = self.last_update / 1000;
        let words: [u32; 12] = [
            self.seconds as u32,
            self.minutes as u32,
            self.hours as u32,
            self.day_low as u32,
            self.day_high as u32,
            self.latched[0] as u32,
            self.latched[1] as u32,
            self.latched[2] as u32,
            self.latched[3] as u32,
            self.latched[4] as u32,
            seconds as u32,
            (seconds >> 32) as u32,
        ];
        let mut out = [0u8; RTC_BLOB_LEN];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Restore from a battery trailer. The clock is caught up on the next
    /// `update`.
    pub fn load_blob(&mut self, blob: &[u8; RTC_BLOB_LEN]) {
        let mut words = [0u32; 12];
        for (word, chunk) in words.iter_mut().zip(blob.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.seconds = (words[0] % 60) as u8;
        self.minutes = (words[1] % 60) as u8;
        self.hours = (words[2] % 24) as u8;
        self.day_low = words[3] as u8;
        self.day_high = words[4] as u8 & (DH_DAY_BIT8 | DH_HALT | DH_CARRY);
        for (latched, word) in self.latched.iter_mut().zip(&words[5..10]) {
            *latched = *word as u8;
        }
        self.last_update = ((words[11] as u64) << 32 | words[10] as u64) * 1000;
        self.sub_second = 0;
        self.latch_armed = false;
    }

    /// Field order used by the positional save state.
    pub fn to_state(&self) -> Vec<u64> {
        vec![
            self.seconds as u64,
            self.minutes as u64,
            self.hours as u64,
            self.day_low as u64,
            self.day_high as u64,
            self.latched[0] as u64,
            self.latched[1] as u64,
            self.latched[2] as u64,
            self.latched[3] as u64,
            self.latched[4] as u64,
            self.sub_second,
            self.last_update,
            self.latch_armed as u64,
        ]
    }

    pub fn load_state(&mut self, fields: &[u64]) -> bool {
        if fields.len() != 13 {
            return false;
        }
        self.seconds = fields[0] as u8;
        self.minutes = fields[1] as u8;
        self.hours = fields[2] as u8;
        self.day_low = fields[3] as u8;
        self.day_high = fields[4] as u8;
        for (latched, field) in self.latched.iter_mut().zip(&fields[5..10]) {
            *latched = *field as u8;
        }
        self.sub_second = fields[10];
        self.last_update = fields[11];
        self.latch_armed = fields[12] != 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000;

    fn latch(rtc: &mut Rtc) {
        rtc.write_latch(0);
        rtc.write_latch(1);
    }

    #[test]
    fn counts_and_rolls_over() {
        let mut rtc = Rtc::new(T0);
        rtc.update(T0 + 61_500);
        assert_eq!((rtc.seconds, rtc.minutes), (1, 1));
        rtc.update(T0 + 62_000);
        assert_eq!(rtc.seconds, 2);

        rtc.update(T0 + 62_000 + 24 * 3600 * 1000);
        assert_eq!(rtc.day_low, 1);
        assert_eq!(rtc.hours, 0);
    }

    #[test]
    fn day_counter_overflow_sets_carry() {
        let mut rtc = Rtc::new(T0);
        rtc.write(0x0B, 0xFF);
        rtc.write(0x0C, 0x01);
        rtc.write(0x0A, 23);
        rtc.write(0x09, 59);
        rtc.write(0x08, 59);
        rtc.update(T0 + 1000);
        assert_eq!(rtc.day_low, 0);
        assert_eq!(rtc.day_high & DH_DAY_BIT8, 0);
        assert_ne!(rtc.day_high & DH_CARRY, 0);
    }

    #[test]
    fn latch_requires_zero_then_one() {
        let mut rtc = Rtc::new(T0);
        rtc.update(T0 + 5000);
        assert_eq!(rtc.read(0x08), 0);

        rtc.write_latch(1);
        assert_eq!(rtc.read(0x08), 0);

        latch(&mut rtc);
        assert_eq!(rtc.read(0x08), 5);

        rtc.update(T0 + 9000);
        assert_eq!(rtc.read(0x08), 5);
        rtc.write_latch(1);
        assert_eq!(rtc.read(0x08), 5);
        latch(&mut rtc);
        assert_eq!(rtc.read(0x08), 9);
    }

    #[test]
    fn halt_stops_counting() {
        let mut rtc = Rtc::new(T0);
        rtc.write(0x0C, DH_HALT);
        rtc.update(T0 + 10_000);
        assert_eq!(rtc.seconds, 0);
        rtc.write(0x0C, 0);
        rtc.update(T0 + 12_000);
        assert_eq!(rtc.seconds, 2);
    }

    #[test]
    fn out_of_range_writes_are_discarded() {
        let mut rtc = Rtc::new(T0);
        assert!(rtc.write(0x08, 30));
        assert!(!rtc.write(0x08, 60));
        assert!(!rtc.write(0x09, 75));
        assert!(!rtc.write(0x0A, 24));
        assert_eq!((rtc.seconds, rtc.minutes, rtc.hours), (30, 0, 0));
    }

    #[test]
    fn blob_round_trip() {
        let mut rtc = Rtc::new(T0);
        rtc.update(T0 + 3_723_000);
        latch(&mut rtc);
        rtc.update(T0 + 3_800_000);
        let blob = rtc.to_blob();

        let mut restored = Rtc::new(0);
        restored.load_blob(&blob);
        assert_eq!(restored.to_blob(), blob);
        assert_eq!(restored.latched, rtc.latched);
        assert_eq!(restored.hours, 1);
    }
}
