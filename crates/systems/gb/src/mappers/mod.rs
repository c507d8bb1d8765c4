//! Game Boy Memory Bank Controllers (MBCs)
//!
//! Every cartridge board is one variant of the closed [`Mapper`] enum. All
//! variants share the [`BankController`] capability set, so the bus only
//! ever talks to the trait.

mod huc1;
mod mbc1;
mod mbc2;
mod mbc3;
mod mbc5;
mod no_mbc;
pub mod rtc;

pub use huc1::Huc1;
pub use mbc1::Mbc1;
pub use mbc2::Mbc2;
pub use mbc3::Mbc3;
pub use mbc5::Mbc5;
pub use no_mbc::NoMbc;
pub use rtc::{Rtc, SystemTimeSource, TimeSource};

use crate::cartridge::{Cartridge, ControllerKind, RAM_BANK_SIZE, ROM_BANK_SIZE};

/// What a cartridge board can do, seen from the bus.
pub trait BankController {
    /// Read from 0x0000-0x7FFF
    fn read_rom(&self, addr: u16) -> u8;

    /// Write to 0x0000-0x7FFF (bank controller registers)
    fn write_control(&mut self, addr: u16, val: u8);

    /// Read from 0xA000-0xBFFF
    fn read_ram(&self, addr: u16) -> u8;

    /// Write to 0xA000-0xBFFF
    fn write_ram(&mut self, addr: u16, val: u8);

    /// Whole external RAM, all banks
    fn ram(&self) -> &[u8];

    fn ram_mut(&mut self) -> &mut [u8];

    fn rtc(&self) -> Option<&Rtc> {
        None
    }

    fn rtc_mut(&mut self) -> Option<&mut Rtc> {
        None
    }

    /// Rumble motor line
    fn rumble_active(&self) -> bool {
        false
    }

    /// Banking registers, for the positional save state.
    fn registers(&self) -> Vec<u8>;

    /// Inverse of `registers`; ignores input of the wrong shape.
    fn load_registers(&mut self, regs: &[u8]);
}

/// Byte `addr` (within a 16 KiB window) of ROM bank `bank`, wrapped to the
/// image's real bank count.
pub(crate) fn rom_byte(rom: &[u8], bank: usize, addr: u16) -> u8 {
    let banks = rom.len().div_ceil(ROM_BANK_SIZE).max(1);
    let offset = (bank % banks) * ROM_BANK_SIZE + (addr as usize & 0x3FFF);
    rom.get(offset).copied().unwrap_or(0xFF)
}

/// Offset of `addr` (0xA000-0xBFFF) inside RAM bank `bank`, if present.
pub(crate) fn ram_offset(ram: &[u8], bank: usize, addr: u16) -> Option<usize> {
    if ram.is_empty() {
        return None;
    }
    let banks = ram.len().div_ceil(RAM_BANK_SIZE).max(1);
    let offset = (bank % banks) * RAM_BANK_SIZE + (addr as usize & 0x1FFF);
    (offset < ram.len()).then_some(offset)
}

/// Unified mapper enum that dispatches to specific implementations
#[derive(Debug)]
pub enum Mapper {
    NoMbc(NoMbc),
    Mbc1(Mbc1),
    Mbc2(Mbc2),
    Mbc3(Mbc3),
    Mbc5(Mbc5),
    Huc1(Huc1),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            Mapper::NoMbc($m) => $body,
            Mapper::Mbc1($m) => $body,
            Mapper::Mbc2($m) => $body,
            Mapper::Mbc3($m) => $body,
            Mapper::Mbc5($m) => $body,
            Mapper::Huc1($m) => $body,
        }
    };
}

impl Mapper {
    /// Build the board described by `cart` around `rom`.
    pub fn new(cart: &Cartridge, rom: Vec<u8>, now_millis: u64) -> Self {
        let ram = vec![0; cart.ram_size];
        let f = &cart.features;
        match f.controller() {
            ControllerKind::None => Mapper::NoMbc(NoMbc::new(rom, ram)),
            ControllerKind::Mbc1 => Mapper::Mbc1(Mbc1::new(rom, ram)),
            ControllerKind::Mbc2 => Mapper::Mbc2(Mbc2::new(rom)),
            ControllerKind::Mbc3 => {
                let rtc = f.has_rtc.then(|| Rtc::new(now_millis));
                Mapper::Mbc3(Mbc3::new(rom, ram, rtc))
            }
            ControllerKind::Mbc5 => Mapper::Mbc5(Mbc5::new(rom, ram, f.has_rumble)),
            ControllerKind::Huc1 => Mapper::Huc1(Huc1::new(rom, ram)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mapper::NoMbc(_) => "ROM",
            Mapper::Mbc1(_) => "MBC1",
            Mapper::Mbc2(_) => "MBC2",
            Mapper::Mbc3(_) => "MBC3",
            Mapper::Mbc5(_) => "MBC5",
            Mapper::Huc1(_) => "HuC1",
        }
    }
}

impl BankController for Mapper {
    fn read_rom(&self, addr: u16) -> u8 {
        dispatch!(self, m => m.read_rom(addr))
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        dispatch!(self, m => m.write_control(addr, val))
    }

    fn read_ram(&self, addr: u16) -> u8 {
        dispatch!(self, m => m.read_ram(addr))
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        dispatch!(self, m => m.write_ram(addr, val))
    }

    fn ram(&self) -> &[u8] {
        dispatch!(self, m => m.ram())
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        dispatch!(self, m => m.ram_mut())
    }

    fn rtc(&self) -> Option<&Rtc> {
        dispatch!(self, m => m.rtc())
    }

    fn rtc_mut(&mut self) -> Option<&mut Rtc> {
        dispatch!(self, m => m.rtc_mut())
    }

    fn rumble_active(&self) -> bool {
        dispatch!(self, m => m.rumble_active())
    }

    fn registers(&self) -> Vec<u8> {
        dispatch!(self, m => m.registers())
    }

    fn load_registers(&mut self, regs: &[u8]) {
        dispatch!(self, m => m.load_registers(regs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::make_rom;

    fn mapper_for(cartridge_type: u8) -> Mapper {
        let rom = make_rom(cartridge_type, 0x01, 0x02, 0x00);
        let cart = Cartridge::parse(&rom).unwrap();
        Mapper::new(&cart, rom, 0)
    }

    #[test]
    fn test_mapper_from_cart_type() {
        assert_eq!(mapper_for(0x00).name(), "ROM");
        assert_eq!(mapper_for(0x01).name(), "MBC1");
        assert_eq!(mapper_for(0x03).name(), "MBC1");
        assert_eq!(mapper_for(0x05).name(), "MBC2");
        assert_eq!(mapper_for(0x0F).name(), "MBC3");
        assert_eq!(mapper_for(0x13).name(), "MBC3");
        assert_eq!(mapper_for(0x19).name(), "MBC5");
        assert_eq!(mapper_for(0xFF).name(), "HuC1");
    }

    #[test]
    fn test_ram_sizes_follow_features() {
        assert!(mapper_for(0x01).ram().is_empty());
        assert_eq!(mapper_for(0x03).ram().len(), 0x2000);
        assert_eq!(mapper_for(0x06).ram().len(), 0x200);
        assert!(mapper_for(0x0F).rtc().is_some());
        assert!(mapper_for(0x13).rtc().is_none());
    }

    #[test]
    fn test_mapper_delegation() {
        let mut rom = make_rom(0x00, 0x00, 0x00, 0x00);
        rom[0] = 0xAA;
        rom[0x4000] = 0xBB;
        let cart = Cartridge::parse(&rom).unwrap();
        let mapper = Mapper::new(&cart, rom, 0);
        assert_eq!(mapper.read_rom(0x0000), 0xAA);
        assert_eq!(mapper.read_rom(0x4000), 0xBB);
        assert_eq!(mapper.read_ram(0xA000), 0xFF);
    }

    #[test]
    fn test_helpers_wrap_bank_index() {
        let mut rom = vec![0; 0x8000];
        rom[0x4000] = 7;
        assert_eq!(rom_byte(&rom, 3, 0x4000), 7);
        assert_eq!(ram_offset(&[], 0, 0xA000), None);
        assert_eq!(ram_offset(&[0; 0x800], 0, 0xA900), None);
        assert_eq!(ram_offset(&[0; 0x4000], 3, 0xA001), Some(0x2001));
    }
}
