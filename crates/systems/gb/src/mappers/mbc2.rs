//! MBC2 (Memory Bank Controller 2)
//!
//! Up to 256 KiB ROM (16 banks) and 512 x 4 bits of RAM on the controller.
//!
//! # Register Map (0x0000-0x3FFF)
//!
//! Address bit 8 picks the register:
//! - bit 8 clear: RAM Enable (low nibble 0x0A enables)
//! - bit 8 set: ROM Bank Select, low 4 bits, 0 selects 1
//!
//! RAM sits at 0xA000-0xA1FF and mirrors through 0xBFFF. Only the low
//! nibble is stored; the upper nibble reads back as 1s.

use super::{rom_byte, BankController};
use crate::cartridge::MBC2_RAM_SIZE;

#[derive(Debug)]
pub struct Mbc2 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    ram_enabled: bool,
    rom_bank: u8,
}

impl Mbc2 {
    pub fn new(rom: Vec<u8>) -> Self {
        Self {
            rom,
            ram: vec![0; MBC2_RAM_SIZE],
            ram_enabled: false,
            rom_bank: 1,
        }
    }
}

impl BankController for Mbc2 {
    fn read_rom(&self, addr: u16) -> u8 {
        let bank = if addr < 0x4000 {
            0
        } else {
            self.rom_bank.max(1) as usize
        };
        rom_byte(&self.rom, bank, addr)
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        if addr >= 0x4000 {
            return;
        }
        if addr & 0x0100 == 0 {
            self.ram_enabled = (val & 0x0F) == 0x0A;
        } else {
            self.rom_bank = val & 0x0F;
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }
        self.ram[(addr & 0x01FF) as usize] | 0xF0
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if self.ram_enabled {
            self.ram[(addr & 0x01FF) as usize] = val & 0x0F;
        }
    }

    fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    fn registers(&self) -> Vec<u8> {
        vec![self.ram_enabled as u8, self.rom_bank]
    }

    fn load_registers(&mut self, regs: &[u8]) {
        if let [enabled, rom_bank] = *regs {
            self.ram_enabled = enabled != 0;
            self.rom_bank = rom_bank & 0x0F;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbc2_address_bit8_selects_register() {
        let mut rom = vec![0; 0x40000];
        rom[3 * 0x4000] = 0x33;
        let mut mbc = Mbc2::new(rom);

        // bit 8 clear: treated as RAM enable, bank unchanged
        mbc.write_control(0x2000, 0x03);
        assert_eq!(mbc.read_rom(0x4000), 0x00);

        mbc.write_control(0x2100, 0x03);
        assert_eq!(mbc.read_rom(0x4000), 0x33);
    }

    #[test]
    fn test_mbc2_bank_zero_selects_one() {
        let mut rom = vec![0; 0x10000];
        rom[0x4000] = 0xAA;
        let mut mbc = Mbc2::new(rom);
        mbc.write_control(0x2100, 0x00);
        assert_eq!(mbc.read_rom(0x4000), 0xAA);
    }

    #[test]
    fn test_mbc2_nibble_ram_mirrors() {
        let mut mbc = Mbc2::new(vec![0; 0x8000]);
        mbc.write_control(0x0000, 0x0A);
        mbc.write_ram(0xA005, 0xAB);
        assert_eq!(mbc.read_ram(0xA005), 0xFB);
        assert_eq!(mbc.read_ram(0xA205), 0xFB);
        assert_eq!(mbc.read_ram(0xBE05), 0xFB);
        assert_eq!(mbc.ram()[5], 0x0B);

        mbc.write_control(0x0000, 0x00);
        assert_eq!(mbc.read_ram(0xA005), 0xFF);
    }
}
