//! Game Boy PPU (LCD controller)
//!
//! Timing runs in dots (4194304 Hz, not affected by CPU double speed). A
//! line is 456 dots: mode 2 (OAM scan, 80 dots), mode 3 (pixel transfer, 172
//! dots plus 6 per sprite on the line), then mode 0 (H-blank) for the rest.
//! Lines 144-153 are V-blank (mode 1).
//!
//! Pixels are produced lazily. A line is queued when it enters H-blank and
//! drawn just before anything changes what it would look like, or at V-blank
//! at the latest (see `render.rs`).
//!
//! # Registers
//!
//! - `$FF40 (LCDC)`, `$FF41 (STAT)`, `$FF42 (SCY)`, `$FF43 (SCX)`
//! - `$FF44 (LY)` read-only, `$FF45 (LYC)`
//! - `$FF47-$FF49 (BGP, OBP0, OBP1)`, `$FF4A (WY)`, `$FF4B (WX)`
//! - Color only: `$FF4F (VBK)`, `$FF68-$FF6B (BCPS, BCPD, OCPS, OCPD)`

mod palette;
mod render;
mod tile_cache;

pub use palette::Palettes;
use tile_cache::TileCache;

use chroma_core::logging::{log, LogCategory, LogLevel};
use chroma_core::types::Frame;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
pub const DOTS_PER_LINE: u32 = 456;
pub const LINES_PER_FRAME: u32 = 154;
pub const DOTS_PER_FRAME: u32 = DOTS_PER_LINE * LINES_PER_FRAME;

const VBLANK_LINE: u32 = 144;
const OAM_SCAN_DOTS: u32 = 80;
const TRANSFER_DOTS: u32 = 172;
const SPRITE_DOTS: u32 = 6;
const MAX_LINE_SPRITES: usize = 10;
/// Shortest possible mode 2 + mode 3
const EARLIEST_HBLANK: u32 = OAM_SCAN_DOTS + TRANSFER_DOTS;
/// Dots into line 153 at which LY already reads 0
const LINE_153_WRAP: u32 = 8;

// LCDC bits
const LCDC_ENABLE: u8 = 0x80;
const LCDC_WIN_MAP: u8 = 0x40;
const LCDC_WIN_ENABLE: u8 = 0x20;
const LCDC_TILE_DATA: u8 = 0x10;
const LCDC_BG_MAP: u8 = 0x08;
const LCDC_OBJ_TALL: u8 = 0x04;
const LCDC_OBJ_ENABLE: u8 = 0x02;
const LCDC_BG_ENABLE: u8 = 0x01;

// STAT interrupt sources
const STAT_HBLANK: u8 = 0x08;
const STAT_VBLANK: u8 = 0x10;
const STAT_OAM: u8 = 0x20;
const STAT_LYC: u8 = 0x40;
const STAT_SOURCES: u8 = 0x78;
const STAT_COINCIDENCE: u8 = 0x04;

pub const IRQ_VBLANK: u8 = 0x01;
pub const IRQ_STAT: u8 = 0x02;

const WHITE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamScan = 2,
    Transfer = 3,
}

impl Mode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Mode::HBlank,
            1 => Mode::VBlank,
            2 => Mode::OamScan,
            _ => Mode::Transfer,
        }
    }
}

/// PPU timing as stored in the positional save state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpuTiming {
    /// Dots since the start of line 0
    pub frame_dots: u32,
    pub ly: u8,
    pub mode: Mode,
    /// Sprites found on the current line by the OAM scan
    pub line_sprites: u8,
    pub window_line: u8,
}

pub struct Ppu {
    color: bool,
    /// Bank 0 at 0x0000, bank 1 at 0x2000
    vram: Vec<u8>,
    vram_bank: usize,
    oam: [u8; 0xA0],

    pub lcdc: u8,
    /// Interrupt source bits (3-6) only
    stat: u8,
    coincidence: bool,
    pub scy: u8,
    pub scx: u8,
    ly: u8,
    pub lyc: u8,
    pub wy: u8,
    pub wx: u8,
    pub palettes: Palettes,

    tiles: TileCache,

    /// Internal line counter; differs from LY on the second half of line 153
    line: u32,
    line_ticks: u32,
    mode: Mode,
    line_sprites: u8,
    mode3_end: u32,

    /// Lines that reached H-blank but are not drawn yet
    queue: Vec<u8>,
    /// Line whose background is drawn up to this x
    partial: Option<(u8, usize)>,
    bg_index: [u8; SCREEN_WIDTH],
    bg_priority: [bool; SCREEN_WIDTH],
    window_line: u8,
    window_drawn: bool,

    frame: Frame,
    completed: Frame,
    frame_ready: bool,
    /// First frame after the LCD comes on is garbage on hardware
    skip_frame: bool,
    hblanks: u32,
}

impl Ppu {
    pub fn new(color: bool, shades: [u32; 4]) -> Self {
        let palettes = Palettes::new(shades);
        let blank = if color { WHITE } else { shades[0] };
        let mut frame = Frame::new(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
        frame.fill(blank);
        Self {
            color,
            vram: vec![0; 0x4000],
            vram_bank: 0,
            oam: [0; 0xA0],
            lcdc: 0,
            stat: 0,
            coincidence: false,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            wy: 0,
            wx: 0,
            palettes,
            tiles: TileCache::new(color),
            line: 0,
            line_ticks: 0,
            mode: Mode::HBlank,
            line_sprites: 0,
            mode3_end: EARLIEST_HBLANK,
            queue: Vec::with_capacity(SCREEN_HEIGHT),
            partial: None,
            bg_index: [0; SCREEN_WIDTH],
            bg_priority: [false; SCREEN_WIDTH],
            window_line: 0,
            window_drawn: false,
            completed: frame.clone(),
            frame,
            frame_ready: false,
            skip_frame: false,
            hblanks: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.lcdc & LCDC_ENABLE != 0
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    /// Last frame handed out at V-blank
    pub fn frame(&self) -> &Frame {
        &self.completed
    }

    /// True once per completed (or blanked) frame.
    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    /// H-blank entries since the last call
    pub fn take_hblanks(&mut self) -> u32 {
        std::mem::take(&mut self.hblanks)
    }

    fn blank_color(&self) -> u32 {
        if self.color {
            WHITE
        } else {
            self.palettes.shades[0]
        }
    }

    // --- timing -----------------------------------------------------------

    /// Advance by `dots`; returns IF bits to raise.
    pub fn step(&mut self, dots: u32) -> u8 {
        if !self.enabled() {
            return 0;
        }
        let mut irq = 0;
        let mut left = dots;
        while left > 0 {
            let target = self.next_event();
            let run = target.saturating_sub(self.line_ticks).min(left);
            self.line_ticks += run;
            left -= run;
            if self.line_ticks >= target {
                irq |= self.fire_event();
            }
        }
        irq
    }

    fn next_event(&self) -> u32 {
        match self.mode {
            Mode::OamScan => OAM_SCAN_DOTS,
            Mode::Transfer => self.mode3_end,
            Mode::VBlank if self.line == 153 && self.line_ticks < LINE_153_WRAP => LINE_153_WRAP,
            Mode::HBlank | Mode::VBlank => DOTS_PER_LINE,
        }
    }

    fn fire_event(&mut self) -> u8 {
        match self.mode {
            Mode::OamScan => {
                self.mode = Mode::Transfer;
                0
            }
            Mode::Transfer => {
                self.mode = Mode::HBlank;
                self.queue.push(self.line as u8);
                self.hblanks += 1;
                self.stat_irq(STAT_HBLANK)
            }
            Mode::VBlank if self.line_ticks < DOTS_PER_LINE => {
                self.ly = 0;
                self.compare_lyc()
            }
            Mode::HBlank | Mode::VBlank => self.next_line(),
        }
    }

    fn next_line(&mut self) -> u8 {
        self.line_ticks = 0;
        self.line = (self.line + 1) % LINES_PER_FRAME;
        let mut irq = 0;
        if self.line < VBLANK_LINE {
            irq |= self.enter_oam_scan();
        } else if self.line == VBLANK_LINE {
            irq |= self.enter_vblank();
        }
        let ly = self.line as u8;
        if ly != self.ly {
            self.ly = ly;
            irq |= self.compare_lyc();
        }
        irq
    }

    fn enter_oam_scan(&mut self) -> u8 {
        self.mode = Mode::OamScan;
        self.line_sprites = self.select_sprites(self.line as u8).1 as u8;
        self.mode3_end = self.transfer_end();
        self.stat_irq(STAT_OAM)
    }

    fn transfer_end(&self) -> u32 {
        let sprites = if self.lcdc & LCDC_OBJ_ENABLE != 0 {
            (self.line_sprites as u32).min(MAX_LINE_SPRITES as u32)
        } else {
            0
        };
        EARLIEST_HBLANK + SPRITE_DOTS * sprites
    }

    fn enter_vblank(&mut self) -> u8 {
        self.mode = Mode::VBlank;
        self.flush();
        self.window_line = 0;
        if self.skip_frame {
            self.skip_frame = false;
        } else {
            self.completed.pixels.copy_from_slice(&self.frame.pixels);
            self.frame_ready = true;
        }
        IRQ_VBLANK | self.stat_irq(STAT_VBLANK)
    }

    fn compare_lyc(&mut self) -> u8 {
        self.coincidence = self.ly == self.lyc;
        if self.coincidence {
            self.stat_irq(STAT_LYC)
        } else {
            0
        }
    }

    fn stat_irq(&self, source: u8) -> u8 {
        if self.stat & source != 0 {
            IRQ_STAT
        } else {
            0
        }
    }

    fn switch_off(&mut self) {
        self.queue.clear();
        self.partial = None;
        self.ly = 0;
        self.line = 0;
        self.line_ticks = 0;
        self.mode = Mode::HBlank;
        self.window_line = 0;
        let blank = self.blank_color();
        self.completed.fill(blank);
        self.frame_ready = true;
        log(LogCategory::Ppu, LogLevel::Debug, || "LCD off".to_string());
    }

    fn switch_on(&mut self) -> u8 {
        self.line = 0;
        self.line_ticks = 0;
        self.ly = 0;
        self.window_line = 0;
        self.skip_frame = true;
        log(LogCategory::Ppu, LogLevel::Debug, || "LCD on".to_string());
        self.enter_oam_scan() | self.compare_lyc()
    }

    // --- HALT prediction --------------------------------------------------

    /// Dots until the PPU can next raise an interrupt enabled in `ie`, or
    /// `None` if it cannot. Never late; may be early for H-blank, whose
    /// exact start on a future line depends on that line's sprites.
    pub fn wake_distance(&self, ie: u8) -> Option<u32> {
        if !self.enabled() {
            return None;
        }
        let stat = if ie & IRQ_STAT != 0 { self.stat } else { 0 };
        let candidates = [
            (ie & IRQ_VBLANK != 0 || stat & STAT_VBLANK != 0)
                .then(|| self.dots_to_line(VBLANK_LINE)),
            (stat & STAT_HBLANK != 0).then(|| self.dots_to_hblank()),
            (stat & STAT_OAM != 0).then(|| self.dots_to_line(self.next_visible_line())),
            if stat & STAT_LYC != 0 {
                self.dots_to_lyc()
            } else {
                None
            },
        ];
        candidates.into_iter().flatten().min()
    }

    /// Dots until line `target` starts; a full frame if it is the current one.
    fn dots_to_line(&self, target: u32) -> u32 {
        let lines = match (target + LINES_PER_FRAME - self.line) % LINES_PER_FRAME {
            0 => LINES_PER_FRAME,
            n => n,
        };
        lines * DOTS_PER_LINE - self.line_ticks
    }

    fn next_visible_line(&self) -> u32 {
        if self.line + 1 < VBLANK_LINE {
            self.line + 1
        } else {
            0
        }
    }

    fn dots_to_hblank(&self) -> u32 {
        if self.line < VBLANK_LINE && self.line_ticks < self.mode3_end {
            self.mode3_end - self.line_ticks
        } else {
            self.dots_to_line(self.next_visible_line()) + EARLIEST_HBLANK
        }
    }

    fn dots_to_lyc(&self) -> Option<u32> {
        let lyc = self.lyc as u32;
        if lyc == 0 {
            if self.line == 153 && self.line_ticks < LINE_153_WRAP {
                Some(LINE_153_WRAP - self.line_ticks)
            } else {
                Some(self.dots_to_line(153) + LINE_153_WRAP)
            }
        } else if lyc < LINES_PER_FRAME {
            Some(self.dots_to_line(lyc))
        } else {
            None
        }
    }

    // --- memory -------------------------------------------------------------

    fn vram_locked(&self) -> bool {
        self.enabled() && self.mode == Mode::Transfer
    }

    fn oam_locked(&self) -> bool {
        self.enabled() && matches!(self.mode, Mode::OamScan | Mode::Transfer)
    }

    pub fn read_vram(&self, addr: u16) -> u8 {
        if self.vram_locked() {
            return 0xFF;
        }
        self.vram[self.vram_bank * 0x2000 + (addr as usize & 0x1FFF)]
    }

    pub fn write_vram(&mut self, addr: u16, val: u8) {
        if !self.vram_locked() {
            self.store_vram(self.vram_bank, addr as usize & 0x1FFF, val);
        }
    }

    /// VRAM write from the HDMA engine; bypasses the mode check.
    pub fn dma_write_vram(&mut self, addr: u16, val: u8) {
        self.store_vram(self.vram_bank, addr as usize & 0x1FFF, val);
    }

    fn store_vram(&mut self, bank: usize, offset: usize, val: u8) {
        let index = bank * 0x2000 + offset;
        if self.vram[index] == val {
            return;
        }
        self.sync();
        self.vram[index] = val;
        self.tiles.invalidate(bank, offset);
    }

    pub fn read_oam(&self, addr: u16) -> u8 {
        let index = addr as usize & 0xFF;
        if index >= self.oam.len() || self.oam_locked() {
            return 0xFF;
        }
        self.oam[index]
    }

    pub fn write_oam(&mut self, addr: u16, val: u8) {
        let index = addr as usize & 0xFF;
        if index < self.oam.len() && !self.oam_locked() {
            self.sync();
            self.oam[index] = val;
        }
    }

    /// OAM DMA: 160 bytes at once.
    pub fn dma_oam(&mut self, data: &[u8; 0xA0]) {
        self.sync();
        self.oam.copy_from_slice(data);
    }

    /// Raw bank contents, ignoring the mode lock.
    pub fn vram(&self, bank: usize) -> &[u8] {
        &self.vram[bank * 0x2000..(bank + 1) * 0x2000]
    }

    pub fn oam(&self) -> &[u8; 0xA0] {
        &self.oam
    }

    // --- registers ----------------------------------------------------------

    pub fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                let mode = if self.enabled() { self.mode as u8 } else { 0 };
                let coincidence = if self.coincidence { STAT_COINCIDENCE } else { 0 };
                0x80 | self.stat | coincidence | mode
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly,
            0xFF45 => self.lyc,
            0xFF47 => self.palettes.bgp,
            0xFF48 => self.palettes.obp0,
            0xFF49 => self.palettes.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            0xFF4F => 0xFE | self.vram_bank as u8,
            0xFF68 => self.palettes.read_bcps(),
            0xFF69 if self.vram_locked() => 0xFF,
            0xFF69 => self.palettes.read_bcpd(),
            0xFF6A => self.palettes.read_ocps(),
            0xFF6B if self.vram_locked() => 0xFF,
            0xFF6B => self.palettes.read_ocpd(),
            _ => 0xFF,
        }
    }

    /// Write an LCD register; returns IF bits to raise.
    pub fn write_register(&mut self, addr: u16, val: u8) -> u8 {
        match addr {
            0xFF40 => return self.write_lcdc(val),
            0xFF41 => self.stat = val & STAT_SOURCES,
            0xFF42 => self.set_visual(|p| p.scy = val),
            0xFF43 => self.set_visual(|p| p.scx = val),
            0xFF45 => {
                self.lyc = val;
                if self.enabled() {
                    return self.compare_lyc();
                }
            }
            0xFF47 => self.set_visual(|p| p.palettes.bgp = val),
            0xFF48 => self.set_visual(|p| p.palettes.obp0 = val),
            0xFF49 => self.set_visual(|p| p.palettes.obp1 = val),
            0xFF4A => self.set_visual(|p| p.wy = val),
            0xFF4B => self.set_visual(|p| p.wx = val),
            0xFF4F => self.vram_bank = (val & 1) as usize,
            0xFF68 => self.palettes.bcps = val & 0xBF,
            0xFF69 => {
                let store = !self.vram_locked();
                if store {
                    self.sync();
                }
                self.palettes.write_bcpd(val, store);
            }
            0xFF6A => self.palettes.ocps = val & 0xBF,
            0xFF6B => {
                let store = !self.vram_locked();
                if store {
                    self.sync();
                }
                self.palettes.write_ocpd(val, store);
            }
            _ => {}
        }
        0
    }

    /// Draw everything the old value still applies to, then apply it.
    fn set_visual(&mut self, apply: impl FnOnce(&mut Self)) {
        self.sync();
        apply(self);
    }

    fn write_lcdc(&mut self, val: u8) -> u8 {
        let was_on = self.enabled();
        self.sync();
        self.lcdc = val;
        match (was_on, self.enabled()) {
            (true, false) => {
                self.switch_off();
                0
            }
            (false, true) => self.switch_on(),
            _ => 0,
        }
    }

    // --- snapshots ----------------------------------------------------------

    /// Overwrite VRAM bank `bank` and OAM-free state; caches are rebuilt by
    /// [`Ppu::rebuild_caches`].
    pub fn load_vram(&mut self, bank: usize, data: &[u8]) {
        let start = bank * 0x2000;
        let len = data.len().min(0x2000);
        self.vram[start..start + len].copy_from_slice(&data[..len]);
    }

    pub fn load_oam(&mut self, data: &[u8]) {
        let len = data.len().min(self.oam.len());
        self.oam[..len].copy_from_slice(&data[..len]);
    }

    pub fn rebuild_caches(&mut self) {
        self.tiles.invalidate_all();
        self.palettes.rebuild();
    }

    /// Take LCD registers from a raw I/O image (`io[n]` is `$FF00 + n`)
    /// without triggering interrupts, LCD on/off handling or rendering.
    ///
    /// Line and mode come from LY and STAT. When they match where the PPU
    /// already is, the position within the line is kept; otherwise the line
    /// resumes at the start of that mode.
    pub fn restore_io(&mut self, io: &[u8]) {
        self.lcdc = io[0x40];
        self.stat = io[0x41] & STAT_SOURCES;
        self.coincidence = io[0x41] & STAT_COINCIDENCE != 0;
        self.scy = io[0x42];
        self.scx = io[0x43];
        self.lyc = io[0x45];
        self.palettes.bgp = io[0x47];
        self.palettes.obp0 = io[0x48];
        self.palettes.obp1 = io[0x49];
        self.wy = io[0x4A];
        self.wx = io[0x4B];
        if self.color {
            self.vram_bank = (io[0x4F] & 1) as usize;
            self.palettes.bcps = io[0x68] & 0xBF;
            self.palettes.ocps = io[0x6A] & 0xBF;
        }

        self.queue.clear();
        self.partial = None;
        self.frame_ready = false;
        self.skip_frame = false;
        self.hblanks = 0;

        if !self.enabled() {
            self.ly = 0;
            self.line = 0;
            self.line_ticks = 0;
            self.mode = Mode::HBlank;
            return;
        }

        let ly = io[0x44];
        let mode = Mode::from_bits(io[0x41]);
        let line = if ly == 0 && mode == Mode::VBlank {
            153
        } else {
            ly as u32 % LINES_PER_FRAME
        };
        let same_place = self.line == line && self.mode == mode && self.ly == ly;

        self.ly = ly;
        self.line = line;
        self.mode = mode;
        if line < VBLANK_LINE {
            self.line_sprites = self.select_sprites(line as u8).1 as u8;
            self.mode3_end = self.transfer_end();
        }
        if !same_place {
            self.line_ticks = match mode {
                Mode::OamScan => 0,
                Mode::Transfer => OAM_SCAN_DOTS,
                Mode::HBlank => self.mode3_end,
                Mode::VBlank if line == 153 && ly == 0 => LINE_153_WRAP,
                Mode::VBlank => 0,
            };
        }
    }

    pub fn timing(&self) -> PpuTiming {
        PpuTiming {
            frame_dots: self.line * DOTS_PER_LINE + self.line_ticks,
            ly: self.ly,
            mode: self.mode,
            line_sprites: self.line_sprites,
            window_line: self.window_line,
        }
    }

    /// Exact timing from the positional save state; call after `restore_io`.
    pub fn set_timing(&mut self, timing: PpuTiming) {
        let frame_dots = timing.frame_dots % DOTS_PER_FRAME;
        self.line = frame_dots / DOTS_PER_LINE;
        self.line_ticks = frame_dots % DOTS_PER_LINE;
        self.ly = timing.ly;
        self.mode = timing.mode;
        self.line_sprites = timing.line_sprites;
        self.mode3_end = self.transfer_end();
        self.window_line = timing.window_line;
    }
}
