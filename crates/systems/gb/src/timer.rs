//! DIV / TIMA / TMA / TAC.
//!
//! Everything hangs off one free-running 16-bit divider that advances once
//! per CPU clock; DIV is its upper byte. TIMA counts falling edges of the
//! divider bit selected by TAC, so a bus `clock(n)` call settles any number
//! of ticks at once instead of looping per clock, and a DIV reset or TAC
//! change that drops the selected bit produces the extra tick real hardware
//! shows.

/// Divider bit whose falling edge ticks TIMA, per TAC clock select.
const TAP: [u16; 4] = [1 << 9, 1 << 3, 1 << 5, 1 << 7];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Timer {
    divider: u16,
    tima: u8,
    tma: u8,
    tac: u8,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    fn running(&self) -> bool {
        self.tac & 0x04 != 0
    }

    /// CPU clocks between TIMA ticks.
    fn period(&self) -> u32 {
        u32::from(TAP[(self.tac & 0x03) as usize]) << 1
    }

    /// Level of the edge detector's input.
    fn input(&self) -> bool {
        self.running() && self.divider & TAP[(self.tac & 0x03) as usize] != 0
    }

    /// Advance TIMA by `ticks`, reloading from TMA on each wrap. Returns
    /// true if it wrapped at least once.
    fn tick(&mut self, ticks: u32) -> bool {
        let to_wrap = 0x100 - u32::from(self.tima);
        if ticks < to_wrap {
            self.tima += ticks as u8;
            return false;
        }
        let span = 0x100 - u32::from(self.tma);
        self.tima = self.tma + ((ticks - to_wrap) % span) as u8;
        true
    }

    pub fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.divider >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => 0xF8 | self.tac,
            _ => 0xFF,
        }
    }

    /// Returns true when the write itself overflowed TIMA.
    pub fn write_register(&mut self, addr: u16, val: u8) -> bool {
        let before = self.input();
        match addr {
            0xFF04 => self.divider = 0,
            0xFF05 => self.tima = val,
            0xFF06 => self.tma = val,
            0xFF07 => self.tac = val & 0x07,
            _ => {}
        }
        before && !self.input() && self.tick(1)
    }

    /// Run `cycles` CPU clocks. Returns true if TIMA overflowed.
    pub fn step(&mut self, cycles: u32) -> bool {
        let start = self.divider;
        self.divider = start.wrapping_add(cycles as u16);
        if !self.running() {
            return false;
        }
        // The divider wraps at a multiple of every period, so the edge
        // count only depends on the phase within one period.
        let period = self.period();
        let phase = u32::from(start) & (period - 1);
        let ticks = (u64::from(phase) + u64::from(cycles)) / u64::from(period);
        self.tick(ticks.min(u64::from(u32::MAX)) as u32)
    }

    /// CPU clocks until TIMA next overflows, if the timer is running.
    pub fn clocks_until_overflow(&self) -> Option<u32> {
        if !self.running() {
            return None;
        }
        let period = self.period();
        let phase = u32::from(self.divider) & (period - 1);
        let ticks = 0x100 - u32::from(self.tima);
        Some(ticks * period - phase)
    }

    /// Load register values as seen in a memory image, without edge
    /// effects. The divider's low byte is cleared.
    pub fn restore(&mut self, div: u8, tima: u8, tma: u8, tac: u8) {
        self.divider = u16::from(div) << 8;
        self.tima = tima;
        self.tma = tma;
        self.tac = tac & 0x07;
    }

    /// Clocks into the current DIV step and into the current TIMA period.
    pub fn counters(&self) -> (u32, u32) {
        let divider = u32::from(self.divider);
        (divider & 0xFF, divider & (self.period() - 1))
    }

    /// Restore the divider's low byte. The TIMA phase follows from the
    /// whole divider and needs no separate state.
    pub fn set_counters(&mut self, div_counter: u32) {
        self.divider = (self.divider & 0xFF00) | (div_counter & 0xFF) as u16;
    }
}
