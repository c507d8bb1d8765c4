//! Cartridge header parsing.
//!
//! The header lives at 0x0100-0x014F of every ROM image:
//!
//! ```text
//! 0x0134-0x013E  Title (NUL padded ASCII)
//! 0x0143         Color support: 0x80 dual-mode, 0xC0 color only
//! 0x0147         Cartridge type (bank controller + extras)
//! 0x0148         ROM size code
//! 0x0149         RAM size code
//! ```

use thiserror::Error;

pub const HEADER_END: usize = 0x0150;
pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;
/// MBC2 carries 512 four-bit cells on the controller itself.
pub const MBC2_RAM_SIZE: usize = 0x200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    #[error("ROM image is {len} bytes, too short to hold a header")]
    TooShort { len: usize },
    #[error("unknown cartridge type 0x{code:02X}")]
    UnknownType { code: u8 },
    #[error("unsupported cartridge type 0x{code:02X} ({name})")]
    UnsupportedType { code: u8, name: &'static str },
    #[error("invalid ROM size code 0x{code:02X}")]
    InvalidRomSize { code: u8 },
    #[error("invalid RAM size code 0x{code:02X}")]
    InvalidRamSize { code: u8 },
}

/// Bank controller family selected by the type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Huc1,
}

/// What the type code says is on the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CartridgeFeatures {
    pub has_mbc1: bool,
    pub has_mbc2: bool,
    pub has_mbc3: bool,
    pub has_mbc5: bool,
    pub has_huc1: bool,
    pub has_ram: bool,
    pub has_battery: bool,
    pub has_rtc: bool,
    pub has_rumble: bool,
}

impl CartridgeFeatures {
    fn from_type(code: u8) -> Result<Self, CartridgeError> {
        let mut f = CartridgeFeatures::default();
        match code {
            0x00 => {}
            0x08 => f.has_ram = true,
            0x09 => {
                f.has_ram = true;
                f.has_battery = true;
            }
            0x01..=0x03 => {
                f.has_mbc1 = true;
                f.has_ram = code >= 0x02;
                f.has_battery = code == 0x03;
            }
            0x05 | 0x06 => {
                f.has_mbc2 = true;
                f.has_ram = true;
                f.has_battery = code == 0x06;
            }
            0x0F..=0x13 => {
                f.has_mbc3 = true;
                f.has_rtc = code <= 0x10;
                f.has_ram = matches!(code, 0x10 | 0x12 | 0x13);
                f.has_battery = matches!(code, 0x0F | 0x10 | 0x13);
            }
            0x19..=0x1E => {
                f.has_mbc5 = true;
                f.has_rumble = code >= 0x1C;
                f.has_ram = matches!(code, 0x1A | 0x1B | 0x1D | 0x1E);
                f.has_battery = matches!(code, 0x1B | 0x1E);
            }
            0xFF => {
                f.has_huc1 = true;
                f.has_ram = true;
                f.has_battery = true;
            }
            0x0B..=0x0D => return Err(unsupported(code, "MMM01")),
            0x20 => return Err(unsupported(code, "MBC6")),
            0x22 => return Err(unsupported(code, "MBC7")),
            0xFC => return Err(unsupported(code, "Pocket Camera")),
            0xFD => return Err(unsupported(code, "TAMA5")),
            0xFE => return Err(unsupported(code, "HuC3")),
            _ => return Err(CartridgeError::UnknownType { code }),
        }
        Ok(f)
    }

    pub fn controller(&self) -> ControllerKind {
        if self.has_mbc1 {
            ControllerKind::Mbc1
        } else if self.has_mbc2 {
            ControllerKind::Mbc2
        } else if self.has_mbc3 {
            ControllerKind::Mbc3
        } else if self.has_mbc5 {
            ControllerKind::Mbc5
        } else if self.has_huc1 {
            ControllerKind::Huc1
        } else {
            ControllerKind::None
        }
    }
}

fn unsupported(code: u8, name: &'static str) -> CartridgeError {
    CartridgeError::UnsupportedType { code, name }
}

/// Parsed header of an inserted cartridge. The ROM bytes themselves are
/// handed to the bank controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cartridge {
    pub title: String,
    /// Raw byte 0x143
    pub color_support: u8,
    pub cartridge_type: u8,
    /// Declared ROM size in bytes
    pub rom_size: usize,
    /// External RAM size in bytes (0 when the board has none)
    pub ram_size: usize,
    pub features: CartridgeFeatures,
    /// The cartridge asks for color hardware
    pub use_color_mode: bool,
}

impl Cartridge {
    pub fn parse(rom: &[u8]) -> Result<Self, CartridgeError> {
        if rom.len() < HEADER_END {
            return Err(CartridgeError::TooShort { len: rom.len() });
        }

        let cartridge_type = rom[0x147];
        let features = CartridgeFeatures::from_type(cartridge_type)?;
        let rom_size = rom_size(rom[0x148])?;
        let ram_size = if features.has_mbc2 {
            MBC2_RAM_SIZE
        } else if features.has_ram {
            ram_size(rom[0x149])?
        } else {
            0
        };

        let color_support = rom[0x143];
        let title = rom[0x134..=0x13E]
            .iter()
            .take_while(|&&b| b != 0)
            .filter(|b| b.is_ascii_graphic() || **b == b' ')
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end()
            .to_string();

        Ok(Self {
            title,
            color_support,
            cartridge_type,
            rom_size,
            ram_size,
            features,
            use_color_mode: matches!(color_support, 0x80 | 0xC0 | 0x32),
        })
    }

    /// Refuses to run on monochrome hardware.
    pub fn color_only(&self) -> bool {
        matches!(self.color_support, 0xC0 | 0x32)
    }
}

fn rom_size(code: u8) -> Result<usize, CartridgeError> {
    match code {
        0x00..=0x08 => Ok(0x8000 << code),
        0x52 => Ok(72 * ROM_BANK_SIZE),
        0x53 => Ok(80 * ROM_BANK_SIZE),
        0x54 => Ok(96 * ROM_BANK_SIZE),
        _ => Err(CartridgeError::InvalidRomSize { code }),
    }
}

fn ram_size(code: u8) -> Result<usize, CartridgeError> {
    match code {
        0x00 => Ok(0),
        0x01 => Ok(0x800),
        0x02 => Ok(0x2000),
        0x03 => Ok(0x8000),
        0x04 => Ok(0x20000),
        0x05 => Ok(0x10000),
        _ => Err(CartridgeError::InvalidRamSize { code }),
    }
}

#[cfg(test)]
pub(crate) fn make_rom(cartridge_type: u8, rom_code: u8, ram_code: u8, color: u8) -> Vec<u8> {
    let mut rom = vec![0; 0x8000 << rom_code.min(8)];
    rom[0x134..0x13A].copy_from_slice(b"CHROMA");
    rom[0x143] = color;
    rom[0x147] = cartridge_type;
    rom[0x148] = rom_code;
    rom[0x149] = ram_code;
    rom
}
