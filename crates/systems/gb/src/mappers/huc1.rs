//! HuC1 (Hudson Soft)
//!
//! MBC1-style banking with an infrared port in place of the banking mode
//! switch. Up to 1 MiB ROM (64 banks) and 32 KiB RAM (4 banks).
//!
//! # Register Map
//!
//! - 0x0000-0x1FFF: RAM Enable (low nibble 0x0A enables)
//! - 0x2000-0x3FFF: ROM Bank Select, 6 bits, 0 selects 1
//! - 0x4000-0x5FFF: RAM Bank Select (2 bits); IR LED in IR mode
//! - 0x6000-0x7FFF: 0 = RAM mode, 1 = IR mode
//!
//! No IR peer is ever connected: in IR mode the RAM window reads 0xC0
//! ("no light").

use super::{ram_offset, rom_byte, BankController};

const IR_DARK: u8 = 0xC0;

#[derive(Debug)]
pub struct Huc1 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    ram_enabled: bool,
    rom_bank: u8,
    ram_bank: u8,
    ir_mode: bool,
    ir_led: u8,
}

impl Huc1 {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>) -> Self {
        Self {
            rom,
            ram,
            ram_enabled: false,
            rom_bank: 1,
            ram_bank: 0,
            ir_mode: false,
            ir_led: 0,
        }
    }
}

impl BankController for Huc1 {
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
            0x2000..=0x3FFF => self.rom_bank = (val & 0x3F).max(1),
            0x4000..=0x5FFF if self.ir_mode => self.ir_led = val & 0x01,
            0x4000..=0x5FFF => self.ram_bank = val & 0x03,
            _ => self.ir_mode = val & 0x01 != 0,
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if self.ir_mode {
            return IR_DARK;
        }
        if !self.ram_enabled {
            return 0xFF;
        }
        ram_offset(&self.ram, self.ram_bank as usize, addr).map_or(0xFF, |i| self.ram[i])
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if self.ir_mode {
            self.ir_led = val & 0x01;
            return;
        }
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

    fn registers(&self) -> Vec<u8> {
        vec![
            self.ram_enabled as u8,
            self.rom_bank,
            self.ram_bank,
            self.ir_mode as u8,
            self.ir_led,
        ]
    }

    fn load_registers(&mut self, regs: &[u8]) {
        if let [enabled, rom_bank, ram_bank, ir_mode, ir_led] = *regs {
            self.ram_enabled = enabled != 0;
            self.rom_bank = (rom_bank & 0x3F).max(1);
            self.ram_bank = ram_bank & 0x03;
            self.ir_mode = ir_mode != 0;
            self.ir_led = ir_led & 0x01;
        }
    }
}
