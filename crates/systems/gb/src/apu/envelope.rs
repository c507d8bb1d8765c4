//! Volume envelope (NRx2) shared by the pulse and noise channels.
//!
//! Clocked at 64 Hz by frame sequencer step 7. Each clock counts the period
//! down and, on reaching zero, moves the volume one step up or down.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Volume loaded on trigger (0-15)
    initial: u8,
    increase: bool,
    /// 0 = envelope stopped
    period: u8,
    volume: u8,
    timer: u8,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// NRx2 write: VVVV APPP
    pub fn write(&mut self, val: u8) {
        self.initial = val >> 4;
        self.increase = val & 0x08 != 0;
        self.period = val & 0x07;
    }

    /// The channel DAC is powered unless NRx2's upper five bits are clear.
    pub fn dac_enabled(&self) -> bool {
        self.initial != 0 || self.increase
    }

    pub fn trigger(&mut self) {
        self.volume = self.initial;
        self.timer = self.reload();
    }

    fn reload(&self) -> u8 {
        if self.period == 0 {
            8
        } else {
            self.period
        }
    }

    pub fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer > 0 {
            return;
        }
        self.timer = self.reload();
        if self.increase && self.volume < 15 {
            self.volume += 1;
        } else if !self.increase && self.volume > 0 {
            self.volume -= 1;
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_loads_initial_volume() {
        let mut env = Envelope::new();
        env.write(0xA3);
        env.trigger();
        assert_eq!(env.volume(), 10);
    }

    #[test]
    fn period_paces_the_fade() {
        let mut env = Envelope::new();
        env.write(0xF2); // 15, decrease, period 2
        env.trigger();
        env.clock();
        assert_eq!(env.volume(), 15);
        env.clock();
        assert_eq!(env.volume(), 14);
        for _ in 0..40 {
            env.clock();
        }
        assert_eq!(env.volume(), 0);
    }

    #[test]
    fn increase_saturates_at_15() {
        let mut env = Envelope::new();
        env.write(0xE9); // 14, increase, period 1
        env.trigger();
        env.clock();
        env.clock();
        env.clock();
        assert_eq!(env.volume(), 15);
    }

    #[test]
    fn period_zero_holds_volume() {
        let mut env = Envelope::new();
        env.write(0x70);
        env.trigger();
        for _ in 0..20 {
            env.clock();
        }
        assert_eq!(env.volume(), 7);
    }

    #[test]
    fn dac_follows_upper_bits() {
        let mut env = Envelope::new();
        env.write(0x00);
        assert!(!env.dac_enabled());
        env.write(0x08);
        assert!(env.dac_enabled());
        env.write(0x10);
        assert!(env.dac_enabled());
    }
}
