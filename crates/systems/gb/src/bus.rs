//! Game Boy memory bus
//!
//! The bus owns every peripheral and routes CPU accesses to them. It is also
//! the clock fan-out: each time the CPU reports elapsed clocks through
//! [`MemoryLr35902::clock`], the timer, serial port, PPU, HDMA engine and
//! sound generator advance by that amount.
//!
//! # Memory Map
//!
//! ```text
//! $0000-$00FF  Boot ROM overlay (until $FF50 is written)
//! $0000-$3FFF  ROM bank 0
//! $4000-$7FFF  ROM bank 1-N (switchable via the bank controller)
//! $8000-$9FFF  Video RAM (CGB: two banks via VBK)
//! $A000-$BFFF  External RAM / RTC registers
//! $C000-$CFFF  Work RAM bank 0
//! $D000-$DFFF  Work RAM bank 1 (CGB: 1-7 via SVBK)
//! $E000-$FDFF  Echo of $C000-$DDFF
//! $FE00-$FE9F  OAM (40 sprites x 4 bytes)
//! $FEA0-$FEFF  Not usable
//! $FF00-$FF7F  I/O registers
//! $FF80-$FFFE  High RAM
//! $FFFF        Interrupt enable
//! ```
//!
//! # Dispatch
//!
//! Accesses go through two tables of enum-tagged descriptors: one [`Region`]
//! per 256-byte page below $FF00, one [`IoPort`] per address in $FF00-$FFFF.
//! [`GbBus::install_handlers`] rebuilds them whenever the cartridge, color
//! mode or boot ROM overlay changes. Both tables start out `Unmapped`; an
//! access that lands there is an engine bug, logged and (in debug builds)
//! reported to the engine as a dispatch gap.
//!
//! # Color-only registers
//!
//! - `$FF4D (KEY1)`: bit 7 current speed, bit 0 switch armed (STOP switches)
//! - `$FF4F (VBK)`: VRAM bank
//! - `$FF51-$FF55 (HDMA1-5)`: VRAM DMA source, destination, length/mode
//! - `$FF68-$FF6B`: palette index/data pairs
//! - `$FF70 (SVBK)`: WRAM bank (0 selects 1)
//! - `$FF72-$FF75`: undocumented scratch registers

use chroma_core::cpu_lr35902::MemoryLr35902;
use chroma_core::logging::{log, LogCategory, LogLevel};
use chroma_core::sink::{AudioSink, VideoSink};

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::config::EngineConfig;
use crate::joypad::Joypad;
use crate::mappers::{BankController, Mapper};
use crate::ppu::Ppu;
use crate::serial::Serial;
use crate::timer::Timer;

pub const IRQ_TIMER: u8 = 0x04;
pub const IRQ_SERIAL: u8 = 0x08;
pub const IRQ_JOYPAD: u8 = 0x10;

const WRAM_BANK_SIZE: usize = 0x1000;

/// What a 256-byte page below $FF00 is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Unmapped,
    BootRom,
    Rom,
    Vram,
    CartRam,
    /// No cartridge, or a cartridge without RAM: reads 0xFF, drops writes
    Open,
    Wram0,
    WramBank,
    Echo,
    /// OAM plus the unusable tail of page $FE
    Oam,
}

/// What one address in $FF00-$FFFF is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPort {
    Unmapped,
    Joypad,
    Serial,
    Timer,
    InterruptFlag,
    Sound,
    Lcd,
    OamDma,
    Key1,
    BootOff,
    Hdma,
    Svbk,
    Scratch,
    Hram,
    InterruptEnable,
    /// Unused register: reads 0xFF, drops writes
    Open,
}

/// VRAM DMA (HDMA1-HDMA5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Hdma {
    source: u16,
    dest: u16,
    /// 16-byte blocks left in an H-blank transfer
    blocks: u8,
    active: bool,
}

/// A parsed cartridge and its board.
pub struct Slot {
    pub header: Cartridge,
    pub mapper: Mapper,
}

pub struct GbBus {
    color: bool,
    pub(crate) slot: Option<Slot>,
    boot_rom: Option<Vec<u8>>,
    boot_active: bool,

    /// Work RAM, 4 KiB banks (8 on color hardware, 2 otherwise)
    wram: Vec<u8>,
    wram_bank: usize,
    hram: [u8; 0x7F],
    /// Raw value last written to each I/O register
    io: [u8; 0x80],
    ie: u8,
    if_reg: u8,

    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub serial: Serial,
    pub joypad: Joypad,

    double_speed: bool,
    key1_armed: bool,
    hdma: Hdma,
    /// Odd CPU clock left over in double speed
    half_clock: u32,
    /// Normal-speed clocks since the engine last asked
    elapsed: u32,

    regions: [Region; 256],
    ports: [IoPort; 256],
    fault: Option<u16>,

    battery_dirty: bool,
    audio_enabled: bool,
    audio_chunk_frames: usize,
    video: Box<dyn VideoSink>,
    audio: Box<dyn AudioSink>,
}

impl GbBus {
    /// A powered-off bus with an empty slot.
    pub fn new(config: &EngineConfig, video: Box<dyn VideoSink>, audio: Box<dyn AudioSink>) -> Self {
        let sample_rate = audio.sample_rate().unwrap_or(config.sample_rate);
        let mut bus = Self {
            color: false,
            slot: None,
            boot_rom: None,
            boot_active: false,
            wram: vec![0; WRAM_BANK_SIZE * 2],
            wram_bank: 1,
            hram: [0; 0x7F],
            io: [0; 0x80],
            ie: 0,
            if_reg: 0,
            ppu: Ppu::new(false, config.dmg_palette),
            apu: Apu::new(sample_rate),
            timer: Timer::new(),
            serial: Serial::new(),
            joypad: Joypad::new(),
            double_speed: false,
            key1_armed: false,
            hdma: Hdma::default(),
            half_clock: 0,
            elapsed: 0,
            regions: [Region::Unmapped; 256],
            ports: [IoPort::Unmapped; 256],
            fault: None,
            battery_dirty: false,
            audio_enabled: config.audio_enabled,
            audio_chunk_frames: config.audio_chunk_frames,
            video,
            audio,
        };
        bus.install_handlers();
        bus
    }

    /// Power the machine on with `slot` inserted (or nothing). Everything
    /// but the sinks starts fresh. Returns whether a boot ROM is mapped.
    pub fn power_on(&mut self, slot: Option<Slot>, color: bool, config: &EngineConfig) -> bool {
        let sample_rate = self.audio.sample_rate().unwrap_or(config.sample_rate);
        self.color = color;
        self.slot = slot;
        self.boot_rom = config.boot_rom_for(color).map(<[u8]>::to_vec);
        self.boot_active = self.boot_rom.is_some() && self.slot.is_some();
        self.wram = vec![0; WRAM_BANK_SIZE * if color { 8 } else { 2 }];
        self.wram_bank = 1;
        self.hram = [0; 0x7F];
        self.io = [0; 0x80];
        self.ie = 0;
        self.if_reg = 0;
        self.ppu = Ppu::new(color, config.dmg_palette);
        self.apu = Apu::new(sample_rate);
        self.timer = Timer::new();
        self.serial = Serial::new();
        self.joypad = Joypad::new();
        self.double_speed = false;
        self.key1_armed = false;
        self.hdma = Hdma::default();
        self.half_clock = 0;
        self.elapsed = 0;
        self.fault = None;
        self.battery_dirty = false;
        self.audio_enabled = config.audio_enabled;
        self.audio_chunk_frames = config.audio_chunk_frames;
        self.install_handlers();

        if self.slot.is_some() && !self.boot_active {
            self.post_boot_io();
        }
        self.boot_active
    }

    /// I/O state the boot ROM leaves behind.
    fn post_boot_io(&mut self) {
        for (addr, val) in [
            (0xFF26, 0x80),
            (0xFF24, 0x77),
            (0xFF25, 0xF3),
            (0xFF47, 0xFC),
            (0xFF48, 0xFF),
            (0xFF49, 0xFF),
            (0xFF40, 0x91),
            (0xFF50, 0x01),
        ] {
            self.write_io(addr, val);
        }
        self.if_reg = 0x01;
    }

    /// Rebuild both dispatch tables from the current configuration.
    pub fn install_handlers(&mut self) {
        let mut regions = [Region::Unmapped; 256];
        let has_cart = self.slot.is_some();
        let has_ram = self
            .slot
            .as_ref()
            .is_some_and(|s| !s.mapper.ram().is_empty() || s.mapper.rtc().is_some());

        for (page, region) in regions.iter_mut().enumerate().take(0xFF) {
            *region = match page {
                0x00..=0x7F if has_cart => Region::Rom,
                0x00..=0x7F => Region::Open,
                0x80..=0x9F => Region::Vram,
                0xA0..=0xBF if has_ram => Region::CartRam,
                0xA0..=0xBF => Region::Open,
                0xC0..=0xCF => Region::Wram0,
                0xD0..=0xDF => Region::WramBank,
                0xE0..=0xFD => Region::Echo,
                0xFE => Region::Oam,
                _ => Region::Unmapped,
            };
        }
        if self.boot_active {
            regions[0x00] = Region::BootRom;
            if self.color {
                for region in &mut regions[0x02..=0x08] {
                    *region = Region::BootRom;
                }
            }
        }

        let mut ports = [IoPort::Unmapped; 256];
        for (low, port) in ports.iter_mut().enumerate() {
            *port = match low {
                0x00 => IoPort::Joypad,
                0x01 | 0x02 => IoPort::Serial,
                0x04..=0x07 => IoPort::Timer,
                0x0F => IoPort::InterruptFlag,
                0x10..=0x3F => IoPort::Sound,
                0x40..=0x45 | 0x47..=0x4B => IoPort::Lcd,
                0x46 => IoPort::OamDma,
                0x50 => IoPort::BootOff,
                0x4D if self.color => IoPort::Key1,
                0x4F | 0x68..=0x6B if self.color => IoPort::Lcd,
                0x51..=0x55 if self.color => IoPort::Hdma,
                0x70 if self.color => IoPort::Svbk,
                0x72..=0x75 if self.color => IoPort::Scratch,
                0x80..=0xFE => IoPort::Hram,
                0xFF => IoPort::InterruptEnable,
                _ => IoPort::Open,
            };
        }

        self.regions = regions;
        self.ports = ports;
    }

    pub fn color(&self) -> bool {
        self.color
    }

    pub fn double_speed(&self) -> bool {
        self.double_speed
    }

    pub fn mapper(&self) -> Option<&Mapper> {
        self.slot.as_ref().map(|s| &s.mapper)
    }

    pub fn mapper_mut(&mut self) -> Option<&mut Mapper> {
        self.slot.as_mut().map(|s| &mut s.mapper)
    }

    pub fn request_interrupt(&mut self, bits: u8) {
        self.if_reg |= bits & 0x1F;
    }

    /// Normal-speed clocks run since the last call.
    pub fn take_elapsed(&mut self) -> u32 {
        std::mem::take(&mut self.elapsed)
    }

    /// Address of the first dispatch gap hit since the last call.
    pub fn take_fault(&mut self) -> Option<u16> {
        self.fault.take()
    }

    pub fn take_battery_dirty(&mut self) -> bool {
        std::mem::take(&mut self.battery_dirty)
    }

    /// Synthesize pending audio and hand complete chunks to the sink.
    pub fn end_slice(&mut self) {
        self.apu.sync();
        let frames = self.audio_chunk_frames;
        let audio = &mut self.audio;
        self.apu
            .drain(frames, self.audio_enabled, |chunk| audio.push_samples(chunk));
    }

    fn gap(&mut self, addr: u16, write: bool) {
        log(LogCategory::Bus, LogLevel::Error, || {
            let kind = if write { "write" } else { "read" };
            format!("no handler for {} at {:04X}", kind, addr)
        });
        if cfg!(debug_assertions) && self.fault.is_none() {
            self.fault = Some(addr);
        }
    }

    fn wram_index(&self, addr: u16) -> usize {
        let offset = addr as usize & 0x0FFF;
        if addr & 0x1000 == 0 {
            offset
        } else {
            self.wram_bank * WRAM_BANK_SIZE + offset
        }
    }

    fn read_boot_rom(&mut self, addr: u16) -> u8 {
        match self.boot_rom.as_ref().and_then(|rom| rom.get(addr as usize)) {
            Some(&b) => b,
            None => self.mapper().map_or(0xFF, |m| m.read_rom(addr)),
        }
    }

    /// Read through the page table; shared by the CPU and both DMA engines.
    pub(crate) fn read_mem(&mut self, addr: u16) -> u8 {
        if addr >= 0xFF00 {
            return self.read_io(addr);
        }
        match self.regions[(addr >> 8) as usize] {
            Region::BootRom => self.read_boot_rom(addr),
            Region::Rom => self.mapper().map_or(0xFF, |m| m.read_rom(addr)),
            Region::Vram => self.ppu.read_vram(addr),
            Region::CartRam => self.mapper().map_or(0xFF, |m| m.read_ram(addr)),
            Region::Open => 0xFF,
            Region::Wram0 | Region::WramBank => self.wram[self.wram_index(addr)],
            Region::Echo => self.wram[self.wram_index(addr - 0x2000)],
            Region::Oam => self.ppu.read_oam(addr),
            Region::Unmapped => {
                self.gap(addr, false);
                0xFF
            }
        }
    }

    pub(crate) fn write_mem(&mut self, addr: u16, val: u8) {
        if addr >= 0xFF00 {
            self.write_io(addr, val);
            return;
        }
        match self.regions[(addr >> 8) as usize] {
            Region::BootRom | Region::Rom => {
                if let Some(m) = self.mapper_mut() {
                    m.write_control(addr, val);
                }
            }
            Region::Vram => self.ppu.write_vram(addr, val),
            Region::CartRam => {
                if let Some(slot) = self.slot.as_mut() {
                    slot.mapper.write_ram(addr, val);
                    if slot.header.features.has_battery {
                        self.battery_dirty = true;
                    }
                }
            }
            Region::Open => {}
            Region::Wram0 | Region::WramBank => {
                let index = self.wram_index(addr);
                self.wram[index] = val;
            }
            Region::Echo => {
                let index = self.wram_index(addr - 0x2000);
                self.wram[index] = val;
            }
            Region::Oam => self.ppu.write_oam(addr, val),
            Region::Unmapped => self.gap(addr, true),
        }
    }

    fn read_io(&mut self, addr: u16) -> u8 {
        match self.ports[(addr & 0xFF) as usize] {
            IoPort::Joypad => self.joypad.read(),
            IoPort::Serial if addr == 0xFF01 => self.serial.read_sb(),
            IoPort::Serial => self.serial.read_sc(self.color),
            IoPort::Timer => self.timer.read_register(addr),
            IoPort::InterruptFlag => 0xE0 | self.if_reg,
            IoPort::Sound => self.apu.read_register(addr),
            IoPort::Lcd => self.ppu.read_register(addr),
            IoPort::OamDma => self.io[0x46],
            IoPort::Key1 => 0x7E | (self.double_speed as u8) << 7 | self.key1_armed as u8,
            IoPort::BootOff => 0xFF,
            IoPort::Hdma if addr == 0xFF55 => self.hdma_status(),
            IoPort::Hdma => 0xFF,
            IoPort::Svbk => 0xF8 | self.wram_bank as u8,
            IoPort::Scratch if addr == 0xFF75 => 0x8F | self.io[0x75],
            IoPort::Scratch => self.io[(addr & 0x7F) as usize],
            IoPort::Hram => self.hram[(addr - 0xFF80) as usize],
            IoPort::InterruptEnable => self.ie,
            IoPort::Open => 0xFF,
            IoPort::Unmapped => {
                self.gap(addr, false);
                0xFF
            }
        }
    }

    fn write_io(&mut self, addr: u16, val: u8) {
        let port = self.ports[(addr & 0xFF) as usize];
        if addr < 0xFF80 && !matches!(port, IoPort::Unmapped | IoPort::Open) {
            self.io[(addr & 0x7F) as usize] = val;
        }
        match port {
            IoPort::Joypad => self.joypad.write(val),
            IoPort::Serial if addr == 0xFF01 => self.serial.write_sb(val),
            IoPort::Serial => self.serial.write_sc(val, self.color),
            IoPort::Timer => {
                if self.timer.write_register(addr, val) {
                    self.if_reg |= IRQ_TIMER;
                }
            }
            IoPort::InterruptFlag => self.if_reg = val & 0x1F,
            IoPort::Sound => self.apu.write_register(addr, val),
            IoPort::Lcd => {
                let irq = self.ppu.write_register(addr, val);
                self.if_reg |= irq;
            }
            IoPort::OamDma => self.oam_dma(val),
            IoPort::Key1 => self.key1_armed = val & 0x01 != 0,
            IoPort::BootOff => {
                self.io[0x50] = val | 0x01;
                if self.boot_active {
                    self.boot_active = false;
                    self.install_handlers();
                    log(LogCategory::Bus, LogLevel::Debug, || "boot ROM unmapped".to_string());
                }
            }
            IoPort::Hdma => self.write_hdma(addr, val),
            IoPort::Svbk => self.wram_bank = ((val & 0x07) as usize).max(1),
            IoPort::Scratch if addr == 0xFF75 => self.io[0x75] = val & 0x70,
            IoPort::Scratch => {}
            IoPort::Hram => self.hram[(addr - 0xFF80) as usize] = val,
            IoPort::InterruptEnable => self.ie = val,
            IoPort::Open => {}
            IoPort::Unmapped => self.gap(addr, true),
        }
    }

    /// OAM DMA: 160 bytes from `page << 8`, all at once.
    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        let base = if base >= 0xE000 { base - 0x2000 } else { base };
        let mut data = [0u8; 0xA0];
        for (i, b) in data.iter_mut().enumerate() {
            *b = self.read_mem(base + i as u16);
        }
        self.ppu.dma_oam(&data);
    }

    /// Bit 7 clear while an H-blank transfer runs. The low bits hold the
    /// blocks left minus one, and stay readable after a cancel.
    fn hdma_status(&self) -> u8 {
        let left = self.hdma.blocks.wrapping_sub(1) & 0x7F;
        if self.hdma.active {
            left
        } else {
            0x80 | left
        }
    }

    fn write_hdma(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF51 => self.hdma.source = (self.hdma.source & 0x00F0) | (val as u16) << 8,
            0xFF52 => self.hdma.source = (self.hdma.source & 0xFF00) | (val & 0xF0) as u16,
            0xFF53 => self.hdma.dest = (self.hdma.dest & 0x00F0) | ((val & 0x1F) as u16) << 8,
            0xFF54 => self.hdma.dest = (self.hdma.dest & 0x1F00) | (val & 0xF0) as u16,
            _ => {
                if self.hdma.active && val & 0x80 == 0 {
                    self.hdma.active = false;
                    return;
                }
                let blocks = (val & 0x7F) + 1;
                if val & 0x80 != 0 {
                    self.hdma.blocks = blocks;
                    self.hdma.active = true;
                } else {
                    for _ in 0..blocks {
                        self.hdma_block();
                    }
                    self.hdma.blocks = 0;
                }
            }
        }
    }

    /// Copy one 16-byte block into the current VRAM bank.
    fn hdma_block(&mut self) {
        for _ in 0..16 {
            let b = self.read_mem(self.hdma.source);
            self.ppu.dma_write_vram(0x8000 | self.hdma.dest, b);
            self.hdma.source = self.hdma.source.wrapping_add(1);
            self.hdma.dest = (self.hdma.dest + 1) & 0x1FFF;
        }
    }

    // --- snapshot support -----------------------------------------------------

    /// Byte at `addr` as the CPU would see it, minus side effects and locks.
    fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => match self.regions[(addr >> 8) as usize] {
                Region::BootRom => self
                    .boot_rom
                    .as_ref()
                    .and_then(|rom| rom.get(addr as usize))
                    .copied()
                    .unwrap_or(0xFF),
                _ => self.mapper().map_or(0xFF, |m| m.read_rom(addr)),
            },
            0x8000..=0x9FFF => self.ppu.vram(0)[(addr & 0x1FFF) as usize],
            0xA000..=0xBFFF => self.mapper().map_or(0xFF, |m| m.read_ram(addr)),
            0xC000..=0xDFFF => self.wram[self.wram_index(addr)],
            0xE000..=0xFDFF => self.wram[self.wram_index(addr - 0x2000)],
            0xFE00..=0xFE9F => self.ppu.oam()[(addr & 0xFF) as usize],
            _ => 0,
        }
    }

    /// I/O latches with live values where a register has internal state.
    fn io_image(&self) -> [u8; 0x80] {
        let mut io = self.io;
        io[0x00] = self.joypad.read();
        io[0x01] = self.serial.read_sb();
        io[0x02] = self.serial.read_sc(self.color);
        for addr in 0xFF04..=0xFF07u16 {
            io[(addr & 0x7F) as usize] = self.timer.read_register(addr);
        }
        io[0x0F] = 0xE0 | self.if_reg;
        self.apu.io_image(&mut io);
        for addr in (0xFF40..=0xFF45u16).chain(0xFF47..=0xFF4B) {
            io[(addr & 0x7F) as usize] = self.ppu.read_register(addr);
        }
        if self.color {
            io[0x4D] = 0x7E | (self.double_speed as u8) << 7 | self.key1_armed as u8;
            io[0x4F] = self.ppu.read_register(0xFF4F);
            io[0x55] = self.hdma_status();
            io[0x68] = self.ppu.palettes.read_bcps();
            io[0x6A] = self.ppu.palettes.read_ocps();
            io[0x70] = self.wram_bank as u8;
        }
        io
    }

    /// The 64 KiB memory image of the raw snapshot.
    pub fn memory_image(&self) -> Vec<u8> {
        let mut image = vec![0u8; 0x10000];
        for addr in 0x0000..0xFEA0u16 {
            image[addr as usize] = self.peek(addr);
        }
        image[0xFF00..0xFF80].copy_from_slice(&self.io_image());
        image[0xFF80..0xFFFF].copy_from_slice(&self.hram);
        image[0xFFFF] = self.ie;
        image
    }

    /// Restore from a memory image plus VRAM bank 1. ROM and cartridge RAM
    /// bytes in the image are ignored.
    pub fn restore_image(&mut self, image: &[u8], vram1: &[u8]) {
        let io = &image[0xFF00..0xFF80];

        self.ppu.load_vram(0, &image[0x8000..0xA000]);
        if self.color {
            self.ppu.load_vram(1, vram1);
            self.wram_bank = ((io[0x70] & 0x07) as usize).max(1);
        } else {
            self.wram_bank = 1;
        }
        self.wram[..WRAM_BANK_SIZE].copy_from_slice(&image[0xC000..0xD000]);
        let start = self.wram_bank * WRAM_BANK_SIZE;
        self.wram[start..start + WRAM_BANK_SIZE].copy_from_slice(&image[0xD000..0xE000]);
        self.ppu.load_oam(&image[0xFE00..0xFEA0]);
        self.hram.copy_from_slice(&image[0xFF80..0xFFFF]);
        self.ie = image[0xFFFF];

        self.io.copy_from_slice(io);
        self.joypad.write(io[0x00]);
        self.serial.restore(io[0x01], io[0x02]);
        self.timer.restore(io[0x04], io[0x05], io[0x06], io[0x07]);
        self.if_reg = io[0x0F] & 0x1F;
        self.apu.restore_io(io);
        self.ppu.restore_io(io);
        if self.color {
            self.double_speed = io[0x4D] & 0x80 != 0;
            self.key1_armed = io[0x4D] & 0x01 != 0;
            self.hdma = Hdma {
                source: u16::from_be_bytes([io[0x51], io[0x52] & 0xF0]),
                dest: u16::from_be_bytes([io[0x53] & 0x1F, io[0x54] & 0xF0]),
                blocks: (io[0x55] & 0x7F) + 1,
                active: io[0x55] & 0x80 == 0,
            };
        }
        self.boot_active = self.boot_rom.is_some() && io[0x50] == 0;
        self.half_clock = 0;
        self.elapsed = 0;
        self.ppu.rebuild_caches();
        self.install_handlers();
    }

    /// Every WRAM bank, for the positional save state.
    pub fn wram(&self) -> &[u8] {
        &self.wram
    }

    pub fn load_wram(&mut self, data: &[u8]) {
        let len = data.len().min(self.wram.len());
        self.wram[..len].copy_from_slice(&data[..len]);
    }
}

impl MemoryLr35902 for GbBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.read_mem(addr)
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.write_mem(addr, val);
    }

    fn clock(&mut self, cycles: u32) {
        if self.timer.step(cycles) {
            self.if_reg |= IRQ_TIMER;
        }
        if self.serial.step(cycles) {
            self.if_reg |= IRQ_SERIAL;
        }

        let dots = if self.double_speed {
            let total = cycles + self.half_clock;
            self.half_clock = total & 1;
            total / 2
        } else {
            cycles
        };
        self.elapsed += dots;

        self.if_reg |= self.ppu.step(dots);
        if self.ppu.take_frame_ready() {
            self.video.frame_ready(self.ppu.frame());
        }
        for _ in 0..self.ppu.take_hblanks() {
            if !self.hdma.active {
                break;
            }
            self.hdma_block();
            self.hdma.blocks -= 1;
            if self.hdma.blocks == 0 {
                self.hdma.active = false;
            }
        }
        self.apu.accumulate(dots);
    }

    fn pending_interrupts(&self) -> u8 {
        self.ie & self.if_reg & 0x1F
    }

    fn acknowledge_interrupt(&mut self, mask: u8) {
        self.if_reg &= !mask;
    }

    fn halt_wake_distance(&mut self) -> Option<u32> {
        let scale = if self.double_speed { 2 } else { 1 };
        let ppu = self.ppu.wake_distance(self.ie).map(|dots| dots * scale);
        let timer = if self.ie & IRQ_TIMER != 0 {
            self.timer.clocks_until_overflow()
        } else {
            None
        };
        let serial = if self.ie & IRQ_SERIAL != 0 {
            self.serial.clocks_until_done()
        } else {
            None
        };
        [ppu, timer, serial].into_iter().flatten().min()
    }

    fn speed_switch(&mut self) -> bool {
        if !self.color || !self.key1_armed {
            return false;
        }
        self.key1_armed = false;
        self.double_speed = !self.double_speed;
        true
    }

    fn color_mode(&self) -> bool {
        self.color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::make_rom;
    use chroma_core::sink::NullSink;

    fn bus_with(cart_type: u8, ram_code: u8, color: bool) -> GbBus {
        let config = EngineConfig::default();
        let mut bus = GbBus::new(&config, Box::new(NullSink), Box::new(NullSink));
        let rom = make_rom(cart_type, 0x01, ram_code, if color { 0x80 } else { 0x00 });
        let header = Cartridge::parse(&rom).unwrap();
        let mapper = Mapper::new(&header, rom, 0);
        bus.power_on(Some(Slot { header, mapper }), color, &config);
        bus
    }

    #[test]
    fn every_address_dispatches() {
        for color in [false, true] {
            let mut bus = bus_with(0x03, 0x02, color);
            for addr in 0..=0xFFFFu16 {
                bus.read(addr);
            }
            assert_eq!(bus.take_fault(), None);
        }
    }

    #[test]
    fn unmapped_page_is_reported() {
        let mut bus = bus_with(0x00, 0x00, false);
        bus.regions[0xC0] = Region::Unmapped;
        assert_eq!(bus.read(0xC000), 0xFF);
        if cfg!(debug_assertions) {
            assert_eq!(bus.take_fault(), Some(0xC000));
        }
        assert_eq!(bus.take_fault(), None);
    }

    #[test]
    fn wram_and_echo() {
        let mut bus = bus_with(0x00, 0x00, false);
        bus.write(0xC123, 0x42);
        assert_eq!(bus.read(0xE123), 0x42);
        bus.write(0xFDFF, 0x99);
        assert_eq!(bus.read(0xDDFF), 0x99);
    }

    #[test]
    fn svbk_switches_wram_banks() {
        let mut bus = bus_with(0x00, 0x00, true);
        bus.write(0xD000, 0x11);
        bus.write(0xFF70, 0x03);
        assert_eq!(bus.read(0xFF70), 0xFB);
        assert_eq!(bus.read(0xD000), 0x00);
        bus.write(0xD000, 0x33);
        bus.write(0xFF70, 0x00);
        assert_eq!(bus.read(0xD000), 0x11);
        assert_eq!(bus.read(0xFF70), 0xF9);
    }

    #[test]
    fn color_registers_absent_on_monochrome() {
        let mut bus = bus_with(0x00, 0x00, false);
        bus.write(0xFF70, 0x03);
        assert_eq!(bus.read(0xFF70), 0xFF);
        assert_eq!(bus.read(0xFF4D), 0xFF);
        assert_eq!(bus.read(0xFF55), 0xFF);
    }

    #[test]
    fn unused_io_reads_ff() {
        let mut bus = bus_with(0x00, 0x00, false);
        for addr in [0xFF03, 0xFF08, 0xFF4C, 0xFF7F] {
            bus.write(addr, 0x00);
            assert_eq!(bus.read(addr), 0xFF);
        }
        assert_eq!(bus.take_fault(), None);
    }

    #[test]
    fn interrupt_registers() {
        let mut bus = bus_with(0x00, 0x00, false);
        bus.write(0xFF0F, 0xFF);
        assert_eq!(bus.read(0xFF0F), 0xFF);
        bus.write(0xFFFF, 0x05);
        assert_eq!(bus.pending_interrupts(), 0x05);
        bus.acknowledge_interrupt(0x01);
        assert_eq!(bus.pending_interrupts(), 0x04);
        assert_eq!(bus.read(0xFF0F), 0xFE);
    }

    #[test]
    fn cart_ram_marks_battery_dirty() {
        let mut bus = bus_with(0x03, 0x02, false);
        assert!(!bus.take_battery_dirty());
        bus.write(0x0000, 0x0A);
        bus.write(0xA000, 0x5A);
        assert_eq!(bus.read(0xA000), 0x5A);
        assert!(bus.take_battery_dirty());
        assert!(!bus.take_battery_dirty());
    }

    #[test]
    fn ramless_cart_window_is_open() {
        let mut bus = bus_with(0x01, 0x00, false);
        bus.write(0xA000, 0x12);
        assert_eq!(bus.read(0xA000), 0xFF);
        assert!(!bus.take_battery_dirty());
    }

    #[test]
    fn oam_dma_copies_page() {
        let mut bus = bus_with(0x00, 0x00, false);
        bus.write(0xFF40, 0x00); // LCD off so OAM is readable
        for i in 0..0xA0u16 {
            bus.write(0xC100 + i, i as u8);
        }
        bus.write(0xFF46, 0xC1);
        assert_eq!(bus.read(0xFE00), 0x00);
        assert_eq!(bus.read(0xFE9F), 0x9F);
        assert_eq!(bus.read(0xFF46), 0xC1);
    }

    #[test]
    fn general_hdma_copies_immediately() {
        let mut bus = bus_with(0x00, 0x00, true);
        bus.write(0xFF40, 0x00);
        for i in 0..0x20u16 {
            bus.write(0xC000 + i, 0x80 | i as u8);
        }
        bus.write(0xFF51, 0xC0);
        bus.write(0xFF52, 0x00);
        bus.write(0xFF53, 0x01);
        bus.write(0xFF54, 0x00);
        bus.write(0xFF55, 0x01); // two blocks
        assert_eq!(bus.read(0x8100), 0x80);
        assert_eq!(bus.read(0x811F), 0x9F);
        assert_eq!(bus.read(0xFF55), 0xFF);
    }

    #[test]
    fn hblank_hdma_runs_one_block_per_line() {
        let mut bus = bus_with(0x00, 0x00, true);
        for i in 0..0x30u16 {
            bus.write(0xC000 + i, 0x40 + i as u8);
        }
        bus.write(0xFF51, 0xC0);
        bus.write(0xFF52, 0x00);
        bus.write(0xFF53, 0x00);
        bus.write(0xFF54, 0x00);
        bus.write(0xFF55, 0x82); // three blocks, H-blank mode
        assert_eq!(bus.read(0xFF55), 0x02);

        bus.clock(456);
        assert_eq!(bus.read(0xFF55), 0x01);

        // cancel with two blocks left
        bus.write(0xFF55, 0x00);
        assert_eq!(bus.read(0xFF55), 0x81);
        bus.clock(456 * 2);
        assert_eq!(bus.read(0xFF55), 0x81);
        assert_eq!(bus.memory_image()[0xFF55], 0x81);

        bus.write(0xFF40, 0x00);
        assert_eq!(bus.read(0x8000), 0x40);
        assert_eq!(bus.read(0x800F), 0x4F);
        assert_eq!(bus.read(0x8010), 0x00);
    }

    #[test]
    fn key1_arms_speed_switch() {
        let mut bus = bus_with(0x00, 0x00, true);
        assert!(!bus.speed_switch());
        bus.write(0xFF4D, 0x01);
        assert_eq!(bus.read(0xFF4D), 0x7F);
        assert!(bus.speed_switch());
        assert!(bus.double_speed());
        assert_eq!(bus.read(0xFF4D), 0xFE);
    }

    #[test]
    fn double_speed_halves_peripheral_time() {
        let mut bus = bus_with(0x00, 0x00, true);
        bus.write(0xFF4D, 0x01);
        bus.speed_switch();
        bus.take_elapsed();
        bus.clock(8);
        bus.clock(4);
        assert_eq!(bus.take_elapsed(), 6);
    }

    #[test]
    fn timer_and_serial_raise_interrupts() {
        let mut bus = bus_with(0x00, 0x00, false);
        bus.write(0xFF0F, 0x00);
        bus.write(0xFF05, 0xFF);
        bus.write(0xFF07, 0x05); // 16 clocks per tick
        bus.write(0xFF02, 0x81);
        bus.clock(16);
        assert_eq!(bus.read(0xFF0F) & 0x1F, IRQ_TIMER);
        bus.clock(4096);
        assert_eq!(bus.read(0xFF0F) & IRQ_SERIAL, IRQ_SERIAL);
        assert_eq!(bus.read(0xFF01), 0xFF);
        assert_eq!(bus.read(0xFF02) & 0x80, 0);
    }

    #[test]
    fn halt_prediction_picks_nearest_source() {
        let mut bus = bus_with(0x00, 0x00, false);
        bus.write(0xFF40, 0x00);
        assert_eq!(bus.halt_wake_distance(), None);

        bus.write(0xFF05, 0xF0);
        bus.write(0xFF07, 0x05);
        bus.write(0xFFFF, IRQ_TIMER);
        assert_eq!(bus.halt_wake_distance(), Some(16 * 16));

        bus.write(0xFF02, 0x81);
        bus.write(0xFFFF, IRQ_TIMER | IRQ_SERIAL);
        assert_eq!(bus.halt_wake_distance(), Some(16 * 16));
        bus.write(0xFFFF, IRQ_SERIAL);
        assert_eq!(bus.halt_wake_distance(), Some(4096));
    }

    #[test]
    fn post_boot_registers() {
        let mut bus = bus_with(0x00, 0x00, false);
        assert_eq!(bus.read(0xFF40), 0x91);
        assert_eq!(bus.read(0xFF47), 0xFC);
        assert_eq!(bus.read(0xFF26), 0xF0);
        assert_eq!(bus.read(0xFF24), 0x77);
        assert_eq!(bus.read(0xFF25), 0xF3);
    }

    #[test]
    fn boot_rom_overlay_until_ff50() {
        let mut config = EngineConfig::default();
        let mut boot = vec![0u8; 0x100];
        boot[0] = 0x31;
        config.boot_rom = Some(boot);
        let mut bus = GbBus::new(&config, Box::new(NullSink), Box::new(NullSink));
        let rom = make_rom(0x00, 0x01, 0x00, 0x00);
        let header = Cartridge::parse(&rom).unwrap();
        let mapper = Mapper::new(&header, rom, 0);
        assert!(bus.power_on(Some(Slot { header, mapper }), false, &config));

        assert_eq!(bus.read(0x0000), 0x31);
        assert_eq!(bus.read(0x0100), 0x00);
        assert_eq!(bus.read(0xFF40), 0x00);
        bus.write(0xFF50, 0x01);
        assert_ne!(bus.read(0x0000), 0x31);
    }

    #[test]
    fn snapshot_image_round_trip() {
        let mut bus = bus_with(0x1B, 0x03, true);
        bus.write(0xFF40, 0x00);
        bus.write(0x8000, 0xAB);
        bus.write(0xFF4F, 0x01);
        bus.write(0x8000, 0xCD);
        bus.write(0xFF4F, 0x00);
        bus.write(0xC000, 0x01);
        bus.write(0xFF70, 0x05);
        bus.write(0xD000, 0x05);
        bus.write(0xFF80, 0x77);
        bus.write(0xFFFF, 0x1F);
        bus.write(0xFF42, 0x33);

        let image = bus.memory_image();
        let vram1 = bus.ppu.vram(1).to_vec();
        assert_eq!(image[0xFF70], 0x05);
        assert_eq!(image[0x8000], 0xAB);

        let mut other = bus_with(0x1B, 0x03, true);
        other.restore_image(&image, &vram1);
        assert_eq!(other.read(0x8000), 0xAB);
        other.write(0xFF4F, 0x01);
        assert_eq!(other.read(0x8000), 0xCD);
        assert_eq!(other.read(0xC000), 0x01);
        assert_eq!(other.read(0xD000), 0x05);
        assert_eq!(other.read(0xFF70), 0xFD);
        assert_eq!(other.read(0xFF80), 0x77);
        assert_eq!(other.read(0xFFFF), 0x1F);
        assert_eq!(other.read(0xFF42), 0x33);
        assert_eq!(other.take_fault(), None);
    }
}
