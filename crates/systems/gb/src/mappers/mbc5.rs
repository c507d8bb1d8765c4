//! MBC5 (Memory Bank Controller 5)
//!
//! Up to 8 MiB ROM and 128 KiB RAM; the only controller guaranteed to work
//! in double speed mode.
//!
//! # Register Map
//!
//! - 0x0000-0x1FFF: RAM Enable (low nibble 0x0A enables)
//! - 0x2000-0x2FFF: ROM Bank Number (lower 8 bits)
//! - 0x3000-0x3FFF: ROM Bank Number (bit 8)
//! - 0x4000-0x5FFF: RAM Bank Number (4 bits)
//!
//! Bank 0 is selectable at 0x4000. On rumble boards bit 3 of the RAM bank
//! write drives the motor and only bits 0-2 select the bank.

use super::{ram_offset, rom_byte, BankController};

const RUMBLE_BIT: u8 = 0x08;

#[derive(Debug)]
pub struct Mbc5 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    ram_enabled: bool,
    rom_bank: u16, // 9-bit register (0-511)
    ram_bank: u8,  // 4-bit register (0-15)
    has_rumble: bool,
    rumble: bool,
}

impl Mbc5 {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>, has_rumble: bool) -> Self {
        Self {
            rom,
            ram,
            ram_enabled: false,
            rom_bank: 1,
            ram_bank: 0,
            has_rumble,
            rumble: false,
        }
    }
}

impl BankController for Mbc5 {
    fn read_rom(&self, addr: u16) -> u8 {
        let bank = if addr < 0x4000 {
            0
        } else {
            self.rom_bank as usize
        };
        rom_byte(&self.rom, bank, addr)
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram_enabled = (val & 0x0F) == 0x0A,
            0x2000..=0x2FFF => self.rom_bank = (self.rom_bank & 0x100) | val as u16,
            0x3000..=0x3FFF => self.rom_bank = (self.rom_bank & 0x0FF) | ((val as u16 & 0x01) << 8),
            0x4000..=0x5FFF if self.has_rumble => {
                self.rumble = val & RUMBLE_BIT != 0;
                self.ram_bank = val & 0x07;
            }
            0x4000..=0x5FFF => self.ram_bank = val & 0x0F,
            _ => {}
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }
        ram_offset(&self.ram, self.ram_bank as usize, addr).map_or(0xFF, |i| self.ram[i])
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if !self.ram_enabled {
            return;
        }
        if let Some(i) = ram_offset(&self.ram, self.ram_bank as usize, addr) {
            self.ram[i] = val;
        }
    }

    fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    fn rumble_active(&self) -> bool {
        self.rumble
    }

    fn registers(&self) -> Vec<u8> {
        vec![
            self.ram_enabled as u8,
            self.rom_bank as u8,
            (self.rom_bank >> 8) as u8,
            self.ram_bank,
            self.rumble as u8,
        ]
    }

    fn load_registers(&mut self, regs: &[u8]) {
        if let [enabled, bank_lo, bank_hi, ram_bank, rumble] = *regs {
            self.ram_enabled = enabled != 0;
            self.rom_bank = ((bank_hi as u16 & 0x01) << 8) | bank_lo as u16;
            self.ram_bank = ram_bank & 0x0F;
            self.rumble = self.has_rumble && rumble != 0;
        }
    }
}
