//! MBC3 (Memory Bank Controller 3)
//!
//! Up to 2 MiB ROM, 32 KiB RAM and an optional real-time clock.
//!
//! # Register Map
//!
//! - 0x0000-0x1FFF: RAM and Timer Enable (low nibble 0x0A enables)
//! - 0x2000-0x3FFF: ROM Bank Number (7 bits, 0 selects 1)
//! - 0x4000-0x5FFF: RAM Bank Number (0-3) or RTC Register Select (0x08-0x0C)
//! - 0x6000-0x7FFF: Latch Clock Data (write 0x00 then 0x01)

use super::{ram_offset, rom_byte, BankController, Rtc};

#[derive(Debug)]
pub struct Mbc3 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    ram_rtc_enabled: bool,
    rom_bank: u8,
    /// RAM bank, or RTC register when 0x08-0x0C
    select: u8,
    rtc: Option<Rtc>,
}

impl Mbc3 {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>, rtc: Option<Rtc>) -> Self {
        Self {
            rom,
            ram,
            ram_rtc_enabled: false,
            rom_bank: 1,
            select: 0,
            rtc,
        }
    }
}

impl BankController for Mbc3 {
    fn read_rom(&self, addr: u16) -> u8 {
        let bank = if addr < 0x4000 {
            0
        } else {
            self.rom_bank.max(1) as usize
        };
        rom_byte(&self.rom, bank, addr)
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram_rtc_enabled = (val & 0x0F) == 0x0A,
            0x2000..=0x3FFF => self.rom_bank = val & 0x7F,
            0x4000..=0x5FFF => self.select = val & 0x0F,
            _ => {
                if let Some(rtc) = self.rtc.as_mut() {
                    rtc.write_latch(val);
                }
            }
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_rtc_enabled {
            return 0xFF;
        }
        match (self.select, &self.rtc) {
            (0x00..=0x03, _) => {
                ram_offset(&self.ram, self.select as usize, addr).map_or(0xFF, |i| self.ram[i])
            }
            (0x08..=0x0C, Some(rtc)) => rtc.read(self.select),
            _ => 0xFF,
        }
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if !self.ram_rtc_enabled {
            return;
        }
        match self.select {
            0x00..=0x03 => {
                if let Some(i) = ram_offset(&self.ram, self.select as usize, addr) {
                    self.ram[i] = val;
                }
            }
            0x08..=0x0C => {
                if let Some(rtc) = self.rtc.as_mut() {
                    rtc.write(self.select, val);
                }
            }
            _ => {}
        }
    }

    fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    fn rtc(&self) -> Option<&Rtc> {
        self.rtc.as_ref()
    }

    fn rtc_mut(&mut self) -> Option<&mut Rtc> {
        self.rtc.as_mut()
    }

    fn registers(&self) -> Vec<u8> {
        vec![self.ram_rtc_enabled as u8, self.rom_bank, self.select]
    }

    fn load_registers(&mut self, regs: &[u8]) {
        if let [enabled, rom_bank, select] = *regs {
            self.ram_rtc_enabled = enabled != 0;
            self.rom_bank = rom_bank & 0x7F;
            self.select = select & 0x0F;
        }
    }
}
