//! Scanline compositor.
//!
//! The background and window are drawn left to right and may stop part way
//! through a line when a register changes during mode 3; the rest of the
//! line is drawn later with the new value. Sprites go on top once the line
//! is complete.

use super::tile_cache::{FLIP_X, FLIP_Y};
use super::{
    Ppu, LCDC_BG_ENABLE, LCDC_BG_MAP, LCDC_OBJ_ENABLE, LCDC_OBJ_TALL, LCDC_TILE_DATA,
    LCDC_WIN_ENABLE, LCDC_WIN_MAP, MAX_LINE_SPRITES, Mode, SCREEN_WIDTH, VBLANK_LINE,
};

/// Beam position in mode 3 lags the dot counter by this much.
const TRANSFER_LEAD: u32 = 92;

// Attribute bits shared by BG map attributes and OAM
const ATTR_BANK: u8 = 0x08;
const ATTR_DMG_PALETTE: u8 = 0x10;
const ATTR_FLIP_X: u8 = 0x20;
const ATTR_FLIP_Y: u8 = 0x40;
const ATTR_PRIORITY: u8 = 0x80;

/// One sprite's pixel that won its column.
#[derive(Clone, Copy)]
struct SpritePixel {
    index: u8,
    attrs: u8,
}

impl Ppu {
    /// Draw everything that no longer depends on the current registers:
    /// every queued line, plus the current line up to the beam in mode 3.
    pub(crate) fn sync(&mut self) {
        self.flush();
        if self.enabled() && self.mode == Mode::Transfer && self.line < VBLANK_LINE {
            let beam = self.line_ticks.saturating_sub(TRANSFER_LEAD).min(SCREEN_WIDTH as u32);
            self.render_span(self.line as u8, beam as usize);
        }
    }

    /// Draw every queued line.
    pub(crate) fn flush(&mut self) {
        let mut queue = std::mem::take(&mut self.queue);
        for &line in &queue {
            self.finish_line(line);
        }
        queue.clear();
        self.queue = queue;
    }

    fn finish_line(&mut self, line: u8) {
        self.render_span(line, SCREEN_WIDTH);
        self.render_sprites(line);
        if self.window_drawn {
            self.window_line = self.window_line.wrapping_add(1);
            self.window_drawn = false;
        }
        self.partial = None;
    }

    /// Background and window for `line`, from where it stopped up to `to`.
    fn render_span(&mut self, line: u8, to: usize) {
        let from = match self.partial {
            Some((partial_line, x)) if partial_line == line => x,
            _ => {
                self.window_drawn = false;
                0
            }
        };
        self.partial = Some((line, from.max(to)));
        if to <= from {
            return;
        }

        let row = line as usize * SCREEN_WIDTH;
        if !self.color && self.lcdc & LCDC_BG_ENABLE == 0 {
            let blank = self.palettes.shades[0];
            self.frame.pixels[row + from..row + to].fill(blank);
            self.bg_index[from..to].fill(0);
            self.bg_priority[from..to].fill(false);
            return;
        }

        let bg_map = if self.lcdc & LCDC_BG_MAP != 0 { 0x1C00 } else { 0x1800 };
        let win_map = if self.lcdc & LCDC_WIN_MAP != 0 { 0x1C00 } else { 0x1800 };
        let window = self.window_visible(line);
        let wx = self.wx as usize;
        let bg_y = line.wrapping_add(self.scy) as usize;
        let win_y = self.window_line as usize;

        // (map address, tile row, decoded row, attributes) of the last fetch
        let mut fetched: Option<(usize, usize, [u8; 8], u8)> = None;
        for x in from..to {
            let (map, px, py) = if window && x + 7 >= wx {
                self.window_drawn = true;
                (win_map, x + 7 - wx, win_y)
            } else {
                (bg_map, (x + self.scx as usize) & 0xFF, bg_y)
            };
            let map_addr = map + (py / 8) * 32 + px / 8;
            let (pixels, attrs) = match fetched {
                Some((addr, y, pixels, attrs)) if addr == map_addr && y == py & 7 => {
                    (pixels, attrs)
                }
                _ => {
                    let (pixels, attrs) = self.fetch_tile_row(map_addr, py & 7);
                    fetched = Some((map_addr, py & 7, pixels, attrs));
                    (pixels, attrs)
                }
            };

            let index = pixels[px & 7];
            self.bg_index[x] = index;
            self.bg_priority[x] = attrs & ATTR_PRIORITY != 0;
            self.frame.pixels[row + x] = if self.color {
                self.palettes.cgb_bg(attrs & 7, index)
            } else {
                self.palettes.dmg_bg(index)
            };
        }
    }

    fn window_visible(&self, line: u8) -> bool {
        let enabled = self.lcdc & LCDC_WIN_ENABLE != 0
            && (self.color || self.lcdc & LCDC_BG_ENABLE != 0);
        enabled && line >= self.wy && self.wx <= 166
    }

    /// Row `y` of the tile named at tile-map offset `map_addr`, oriented by
    /// its attributes, plus the attribute byte (0 on monochrome).
    fn fetch_tile_row(&mut self, map_addr: usize, y: usize) -> ([u8; 8], u8) {
        let number = self.vram[map_addr];
        let attrs = if self.color {
            self.vram[0x2000 + map_addr]
        } else {
            0
        };
        let tile = if self.lcdc & LCDC_TILE_DATA != 0 {
            number as usize
        } else {
            (256 + number as i8 as isize) as usize
        };
        let bank = usize::from(attrs & ATTR_BANK != 0);
        let mut flip = 0;
        if attrs & ATTR_FLIP_X != 0 {
            flip |= FLIP_X;
        }
        if attrs & ATTR_FLIP_Y != 0 {
            flip |= FLIP_Y;
        }
        (self.tiles.row(&self.vram, bank, tile, flip, y), attrs)
    }

    fn sprite_height(&self) -> i32 {
        if self.lcdc & LCDC_OBJ_TALL != 0 {
            16
        } else {
            8
        }
    }

    /// OAM indices of the sprites on `line`, in OAM order, at most ten.
    pub(super) fn select_sprites(&self, line: u8) -> ([usize; MAX_LINE_SPRITES], usize) {
        let height = self.sprite_height();
        let mut found = [0; MAX_LINE_SPRITES];
        let mut count = 0;
        for i in 0..40 {
            let top = self.oam[i * 4] as i32 - 16;
            if (top..top + height).contains(&(line as i32)) {
                found[count] = i;
                count += 1;
                if count == MAX_LINE_SPRITES {
                    break;
                }
            }
        }
        (found, count)
    }

    fn render_sprites(&mut self, line: u8) {
        if self.lcdc & LCDC_OBJ_ENABLE == 0 {
            return;
        }
        let (mut order, count) = self.select_sprites(line);
        let order = &mut order[..count];
        if !self.color {
            // Lower X wins; OAM index breaks ties.
            order.sort_by_key(|&i| (self.oam[i * 4 + 1], i));
        }

        let height = self.sprite_height();
        let mut winners: [Option<SpritePixel>; SCREEN_WIDTH] = [None; SCREEN_WIDTH];
        for &i in order.iter() {
            let top = self.oam[i * 4] as i32 - 16;
            let left = self.oam[i * 4 + 1] as i32 - 8;
            let mut tile = self.oam[i * 4 + 2] as usize;
            let attrs = self.oam[i * 4 + 3];
            if height == 16 {
                tile &= 0xFE;
            }

            let mut y = line as i32 - top;
            if attrs & ATTR_FLIP_Y != 0 {
                y = height - 1 - y;
            }
            let bank = usize::from(self.color && attrs & ATTR_BANK != 0);
            let flip = if attrs & ATTR_FLIP_X != 0 { FLIP_X } else { 0 };
            let pixels = self.tiles.row(
                &self.vram,
                bank,
                tile + (y / 8) as usize,
                flip,
                (y % 8) as usize,
            );

            for (col, &index) in pixels.iter().enumerate() {
                let x = left + col as i32;
                if index == 0 || !(0..SCREEN_WIDTH as i32).contains(&x) {
                    continue;
                }
                let slot = &mut winners[x as usize];
                if slot.is_none() {
                    *slot = Some(SpritePixel { index, attrs });
                }
            }
        }

        let row = line as usize * SCREEN_WIDTH;
        let master_priority = self.lcdc & LCDC_BG_ENABLE != 0;
        for (x, winner) in winners.iter().enumerate() {
            let Some(px) = winner else { continue };
            let bg_opaque = self.bg_index[x] != 0;
            let hidden = if self.color {
                master_priority
                    && bg_opaque
                    && (self.bg_priority[x] || px.attrs & ATTR_PRIORITY != 0)
            } else {
                bg_opaque && px.attrs & ATTR_PRIORITY != 0
            };
            if hidden {
                continue;
            }
            self.frame.pixels[row + x] = if self.color {
                self.palettes.cgb_obj(px.attrs & 7, px.index)
            } else {
                self.palettes.dmg_obj(px.attrs & ATTR_DMG_PALETTE != 0, px.index)
            };
        }
    }
}
