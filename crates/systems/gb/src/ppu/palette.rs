//! Palette registers and their converted ARGB tables.
//!
//! Monochrome: BGP/OBP0/OBP1 map color indices to four shades.
//! Color: 64 bytes of palette RAM each for background and objects, eight
//! palettes of four little-endian BGR555 colors, reached through the
//! BCPS/BCPD and OCPS/OCPD index/data pairs.

#[derive(Debug, Clone)]
pub struct Palettes {
    pub shades: [u32; 4],
    pub bgp: u8,
    pub obp0: u8,
    pub obp1: u8,
    pub bg_ram: [u8; 64],
    pub obj_ram: [u8; 64],
    pub bcps: u8,
    pub ocps: u8,
    bg_colors: [u32; 32],
    obj_colors: [u32; 32],
}

/// BGR555 to 0xAARRGGBB, stretching 5 bits to 8.
pub fn bgr555_to_argb(lo: u8, hi: u8) -> u32 {
    let c = u16::from_le_bytes([lo, hi]);
    let expand = |v: u16| -> u32 {
        let v = (v & 0x1F) as u32;
        (v << 3) | (v >> 2)
    };
    0xFF00_0000 | (expand(c) << 16) | (expand(c >> 5) << 8) | expand(c >> 10)
}

impl Palettes {
    pub fn new(shades: [u32; 4]) -> Self {
        let mut palettes = Self {
            shades,
            bgp: 0xFC,
            obp0: 0xFF,
            obp1: 0xFF,
            bg_ram: [0xFF; 64],
            obj_ram: [0xFF; 64],
            bcps: 0,
            ocps: 0,
            bg_colors: [0; 32],
            obj_colors: [0; 32],
        };
        palettes.rebuild();
        palettes
    }

    /// Recompute both color tables from palette RAM.
    pub fn rebuild(&mut self) {
        for i in 0..32 {
            self.bg_colors[i] = bgr555_to_argb(self.bg_ram[i * 2], self.bg_ram[i * 2 + 1]);
            self.obj_colors[i] = bgr555_to_argb(self.obj_ram[i * 2], self.obj_ram[i * 2 + 1]);
        }
    }

    pub fn dmg_bg(&self, index: u8) -> u32 {
        self.shades[((self.bgp >> (index * 2)) & 3) as usize]
    }

    pub fn dmg_obj(&self, high_palette: bool, index: u8) -> u32 {
        let reg = if high_palette { self.obp1 } else { self.obp0 };
        self.shades[((reg >> (index * 2)) & 3) as usize]
    }

    pub fn cgb_bg(&self, palette: u8, index: u8) -> u32 {
        self.bg_colors[(palette as usize & 7) * 4 + index as usize]
    }

    pub fn cgb_obj(&self, palette: u8, index: u8) -> u32 {
        self.obj_colors[(palette as usize & 7) * 4 + index as usize]
    }

    pub fn read_bcps(&self) -> u8 {
        self.bcps | 0x40
    }

    pub fn read_ocps(&self) -> u8 {
        self.ocps | 0x40
    }

    pub fn read_bcpd(&self) -> u8 {
        self.bg_ram[(self.bcps & 0x3F) as usize]
    }

    pub fn read_ocpd(&self) -> u8 {
        self.obj_ram[(self.ocps & 0x3F) as usize]
    }

    /// Store through BCPD; `store` is false while the PPU owns palette RAM.
    pub fn write_bcpd(&mut self, val: u8, store: bool) {
        let index = (self.bcps & 0x3F) as usize;
        if store {
            self.bg_ram[index] = val;
            let color = index / 2;
            self.bg_colors[color] =
                bgr555_to_argb(self.bg_ram[color * 2], self.bg_ram[color * 2 + 1]);
        }
        self.bcps = auto_increment(self.bcps);
    }

    pub fn write_ocpd(&mut self, val: u8, store: bool) {
        let index = (self.ocps & 0x3F) as usize;
        if store {
            self.obj_ram[index] = val;
            let color = index / 2;
            self.obj_colors[color] =
                bgr555_to_argb(self.obj_ram[color * 2], self.obj_ram[color * 2 + 1]);
        }
        self.ocps = auto_increment(self.ocps);
    }
}

fn auto_increment(index: u8) -> u8 {
    if index & 0x80 != 0 {
        0x80 | (index.wrapping_add(1) & 0x3F)
    } else {
        index
    }
}
