//! Decoded tile bitmaps.
//!
//! Each 16-byte tile in VRAM decodes to 64 color indices (0-3). On color
//! hardware a decode fills all four flip orientations at once, since any
//! background tile may be flipped through its attribute byte; monochrome
//! hardware only flips sprites, so it keeps one orientation and flips by
//! index math.
//!
//! Entries are regenerated lazily: a VRAM write only marks its tile dirty.

/// Tiles per VRAM bank (0x8000-0x97FF)
pub const TILES_PER_BANK: usize = 384;

pub const FLIP_X: u8 = 0x01;
pub const FLIP_Y: u8 = 0x02;

#[derive(Debug, Clone)]
pub struct TileCache {
    color: bool,
    orientations: usize,
    pixels: Vec<[u8; 64]>,
    dirty: Vec<bool>,
}

impl TileCache {
    pub fn new(color: bool) -> Self {
        let orientations = if color { 4 } else { 1 };
        let slots = TILES_PER_BANK * 2;
        Self {
            color,
            orientations,
            pixels: vec![[0; 64]; slots * orientations],
            dirty: vec![true; slots],
        }
    }

    /// Mark the tile holding VRAM byte `offset` (0x0000-0x17FF) stale.
    pub fn invalidate(&mut self, bank: usize, offset: usize) {
        if offset < TILES_PER_BANK * 16 {
            self.dirty[bank * TILES_PER_BANK + offset / 16] = true;
        }
    }

    pub fn invalidate_all(&mut self) {
        self.dirty.fill(true);
    }

    fn decode(&mut self, vram: &[u8], slot: usize) {
        let bank = slot / TILES_PER_BANK;
        let base = bank * 0x2000 + (slot % TILES_PER_BANK) * 16;
        let first = slot * self.orientations;

        let mut plain = [0u8; 64];
        for row in 0..8 {
            let lo = vram[base + row * 2];
            let hi = vram[base + row * 2 + 1];
            for col in 0..8 {
                let bit = 7 - col;
                plain[row * 8 + col] = (((hi >> bit) & 1) << 1) | ((lo >> bit) & 1);
            }
        }
        self.pixels[first] = plain;

        if self.color {
            for flip in 1..4u8 {
                let mut oriented = [0u8; 64];
                for (i, px) in oriented.iter_mut().enumerate() {
                    *px = plain[flipped_index(i, flip)];
                }
                self.pixels[first + flip as usize] = oriented;
            }
        }
        self.dirty[slot] = false;
    }

    /// Row `y` of a tile, already oriented by `flip` (FLIP_X | FLIP_Y).
    pub fn row(&mut self, vram: &[u8], bank: usize, tile: usize, flip: u8, y: usize) -> [u8; 8] {
        let slot = bank * TILES_PER_BANK + tile;
        if self.dirty[slot] {
            self.decode(vram, slot);
        }

        let mut out = [0u8; 8];
        if self.color {
            let px = &self.pixels[slot * 4 + (flip & 3) as usize];
            out.copy_from_slice(&px[y * 8..y * 8 + 8]);
        } else {
            let px = &self.pixels[slot];
            let src_y = if flip & FLIP_Y != 0 { 7 - y } else { y };
            out.copy_from_slice(&px[src_y * 8..src_y * 8 + 8]);
            if flip & FLIP_X != 0 {
                out.reverse();
            }
        }
        out
    }
}

fn flipped_index(i: usize, flip: u8) -> usize {
    let (mut x, mut y) = (i % 8, i / 8);
    if flip & FLIP_X != 0 {
        x = 7 - x;
    }
    if flip & FLIP_Y != 0 {
        y = 7 - y;
    }
    y * 8 + x
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tile 0: row 0 = colors 3,2,1,0,0,0,0,0; row 7 = all 1
    fn vram_with_tile() -> Vec<u8> {
        let mut vram = vec![0u8; 0x4000];
        vram[0] = 0b1010_0000;
        vram[1] = 0b1100_0000;
        vram[14] = 0xFF;
        vram
    }

    #[test]
    fn decodes_2bpp_rows() {
        for color in [false, true] {
            let vram = vram_with_tile();
            let mut cache = TileCache::new(color);
            assert_eq!(cache.row(&vram, 0, 0, 0, 0), [3, 2, 1, 0, 0, 0, 0, 0]);
            assert_eq!(cache.row(&vram, 0, 0, 0, 7), [1; 8]);
        }
    }

    #[test]
    fn flips_agree_between_modes() {
        let vram = vram_with_tile();
        let mut mono = TileCache::new(false);
        let mut color = TileCache::new(true);
        for flip in 0..4 {
            for y in 0..8 {
                assert_eq!(mono.row(&vram, 0, 0, flip, y), color.row(&vram, 0, 0, flip, y));
            }
        }
        assert_eq!(color.row(&vram, 0, 0, FLIP_X, 0), [0, 0, 0, 0, 0, 1, 2, 3]);
        assert_eq!(color.row(&vram, 0, 0, FLIP_Y, 0), [1; 8]);
    }

    #[test]
    fn stale_until_invalidated() {
        let mut vram = vram_with_tile();
        let mut cache = TileCache::new(true);
        assert_eq!(cache.row(&vram, 0, 0, 0, 0)[0], 3);

        vram[0] = 0;
        vram[1] = 0;
        assert_eq!(cache.row(&vram, 0, 0, 0, 0)[0], 3);
        cache.invalidate(0, 1);
        assert_eq!(cache.row(&vram, 0, 0, 0, 0)[0], 0);
    }

    #[test]
    fn second_bank_is_separate() {
        let mut vram = vec![0u8; 0x4000];
        vram[0x2000 + 16] = 0xFF;
        let mut cache = TileCache::new(true);
        assert_eq!(cache.row(&vram, 1, 1, 0, 0), [1; 8]);
        assert_eq!(cache.row(&vram, 0, 1, 0, 0), [0; 8]);
    }
}
