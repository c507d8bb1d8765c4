//! Boards without a bank controller: 32 KiB of ROM mapped flat, plus an
//! optional always-enabled RAM chip (types 0x08/0x09).

use super::{ram_offset, rom_byte, BankController};

#[derive(Debug)]
pub struct NoMbc {
    rom: Vec<u8>,
    ram: Vec<u8>,
}

impl NoMbc {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>) -> Self {
        Self { rom, ram }
    }
}

impl BankController for NoMbc {
    fn read_rom(&self, addr: u16) -> u8 {
        rom_byte(&self.rom, (addr >> 14) as usize, addr)
    }

    fn write_control(&mut self, _addr: u16, _val: u8) {}

    fn read_ram(&self, addr: u16) -> u8 {
        ram_offset(&self.ram, 0, addr).map_or(0xFF, |i| self.ram[i])
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if let Some(i) = ram_offset(&self.ram, 0, addr) {
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
        Vec::new()
    }

    fn load_registers(&mut self, _regs: &[u8]) {}
}
