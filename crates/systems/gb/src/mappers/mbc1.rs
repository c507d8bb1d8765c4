//! MBC1 (Memory Bank Controller 1)
//!
//! Up to 2 MiB ROM and 32 KiB RAM.
//!
//! # Register Map
//!
//! - 0x0000-0x1FFF: RAM Enable (low nibble 0x0A enables)
//! - 0x2000-0x3FFF: ROM Bank Number (lower 5 bits)
//! - 0x4000-0x5FFF: RAM Bank Number / ROM Bank Number (upper 2 bits)
//! - 0x6000-0x7FFF: Banking Mode Select
//!
//! In mode 1 the upper two bits also select the bank seen at 0x0000 and
//! the RAM bank; in mode 0 both are fixed at 0.
//!
//! The 5-bit register can never hold 0: writing 0 selects 1. Because the
//! check only looks at the low five bits, banks 0x20, 0x40 and 0x60 are
//! unreachable at 0x4000 and map to 0x21, 0x41 and 0x61 instead.

use super::{ram_offset, rom_byte, BankController};

#[derive(Debug)]
pub struct Mbc1 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    ram_enabled: bool,
    rom_bank: u8,     // 5-bit register (0x2000-0x3FFF)
    upper_bits: u8,   // 2-bit register (0x4000-0x5FFF)
    banking_mode: u8, // 0 or 1
}

impl Mbc1 {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>) -> Self {
        Self {
            rom,
            ram,
            ram_enabled: false,
            rom_bank: 1,
            upper_bits: 0,
            banking_mode: 0,
        }
    }

    fn lower_bank(&self) -> usize {
        if self.banking_mode == 1 {
            (self.upper_bits as usize) << 5
        } else {
            0
        }
    }

    fn upper_bank(&self) -> usize {
        let low = match self.rom_bank & 0x1F {
            0 => 1,
            bank => bank,
        };
        ((self.upper_bits as usize) << 5) | low as usize
    }

    fn ram_bank(&self) -> usize {
        if self.banking_mode == 1 {
            self.upper_bits as usize
        } else {
            0
        }
    }
}

impl BankController for Mbc1 {
    fn read_rom(&self, addr: u16) -> u8 {
        let bank = if addr < 0x4000 {
            self.lower_bank()
        } else {
            self.upper_bank()
        };
        rom_byte(&self.rom, bank, addr)
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram_enabled = (val & 0x0F) == 0x0A,
            0x2000..=0x3FFF => self.rom_bank = val & 0x1F,
            0x4000..=0x5FFF => self.upper_bits = val & 0x03,
            _ => self.banking_mode = val & 0x01,
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }
        ram_offset(&self.ram, self.ram_bank(), addr).map_or(0xFF, |i| self.ram[i])
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if !self.ram_enabled {
            return;
        }
        if let Some(i) = ram_offset(&self.ram, self.ram_bank(), addr) {
            self.ram[i] = val;
        }
    }

    fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    fn registers(&self) -> Vec<u8> {
        vec![
            self.ram_enabled as u8,
            self.rom_bank,
            self.upper_bits,
            self.banking_mode,
        ]
    }

    fn load_registers(&mut self, regs: &[u8]) {
        if let [enabled, rom_bank, upper_bits, mode] = *regs {
            self.ram_enabled = enabled != 0;
            self.rom_bank = rom_bank & 0x1F;
            self.upper_bits = upper_bits & 0x03;
            self.banking_mode = mode & 0x01;
        }
    }
}
