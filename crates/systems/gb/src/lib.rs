//! Game Boy / Game Boy Color system
//!
//! [`GbSystem`] is the engine a front-end drives. It owns the CPU, which
//! owns the bus, which owns every peripheral, so a single `&mut self` call
//! reaches the whole machine without shared ownership.
//!
//! Time enters through [`GbSystem::advance`] (wall-clock, scaled by the
//! speed multiplier) or [`GbSystem::advance_cycles`]. Frames and audio
//! leave through the sinks handed to the constructor.

use std::time::Duration;

use chroma_core::{
    cpu_lr35902::CpuLr35902,
    logging::{log, LogCategory, LogLevel},
    sink::{AudioSink, VideoSink},
    types::Frame,
    MountPointInfo, System,
};

mod apu;
mod bus;
pub mod cartridge;
pub mod config;
mod joypad;
pub mod mappers;
pub mod ppu;
mod serial;
mod state;
mod timer;

use bus::{GbBus, Slot, IRQ_JOYPAD};
use mappers::{rtc::RTC_BLOB_LEN, BankController, Mapper};

pub use cartridge::{Cartridge, CartridgeError};
pub use config::{EngineConfig, DEFAULT_DMG_PALETTE};
pub use joypad::Button;
pub use mappers::{SystemTimeSource, TimeSource};
pub use ppu::{DOTS_PER_FRAME, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use state::SNAPSHOT_LEN;

/// Master clock in normal speed
pub const CLOCK_RATE: u32 = 4_194_304;

const MIN_SPEED: f64 = 0.25;
const MAX_SPEED: f64 = 16.0;

/// Longest wall-clock span a single `advance` will catch up on.
const MAX_ADVANCE: Duration = Duration::from_secs(1);

const CARTRIDGE_SLOT: &str = "Cartridge";

pub struct GbSystem {
    cpu: CpuLr35902<GbBus>,
    config: EngineConfig,
    time: Box<dyn TimeSource>,
    /// ROM image of the inserted cartridge, kept for `reset`
    rom: Option<Vec<u8>>,
    speed: f64,
    /// Fractional clocks not yet run
    carry: f64,
    /// Clocks the last slice ran past its budget
    overshoot: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum GbError {
    #[error("No cartridge loaded")]
    NoCartridge,
    #[error("Invalid mount point: {0}")]
    InvalidMountPoint(String),
    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
    #[error("Cartridge has no battery-backed storage")]
    NoBattery,
    #[error("Battery data is {actual} bytes, expected {expected}")]
    BatteryLength { expected: usize, actual: usize },
    #[error("Snapshot is {actual} bytes, expected {expected}")]
    SnapshotLength { expected: usize, actual: usize },
    #[error("Invalid save state: {0}")]
    LegacyState(String),
    #[error("No handler for address {address:#06X}")]
    DispatchGap { address: u16 },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GbSystem {
    pub fn new(video: Box<dyn VideoSink>, audio: Box<dyn AudioSink>) -> Self {
        Self::with_config(EngineConfig::default(), video, audio)
    }

    pub fn with_config(config: EngineConfig, video: Box<dyn VideoSink>, audio: Box<dyn AudioSink>) -> Self {
        Self::with_time_source(config, video, audio, Box::new(SystemTimeSource))
    }

    /// Engine whose real-time clock reads from `time`.
    pub fn with_time_source(
        config: EngineConfig,
        video: Box<dyn VideoSink>,
        audio: Box<dyn AudioSink>,
        time: Box<dyn TimeSource>,
    ) -> Self {
        config.apply_logging();
        let bus = GbBus::new(&config, video, audio);
        let mut cpu = CpuLr35902::new(bus);
        cpu.reset();

        Self {
            cpu,
            config,
            time,
            rom: None,
            speed: 1.0,
            carry: 0.0,
            overshoot: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse `rom`, build its bank controller and power on. A ROM that fails
    /// to parse leaves the current cartridge running.
    pub fn insert_cartridge(&mut self, rom: &[u8]) -> Result<(), GbError> {
        let header = Cartridge::parse(rom).map_err(|e| {
            log(LogCategory::Cartridge, LogLevel::Warn, || format!("rejected cartridge: {}", e));
            e
        })?;
        let color = self.config.color_for(header.use_color_mode, header.color_only());
        let mapper = Mapper::new(&header, rom.to_vec(), self.time.now_millis());

        log(LogCategory::Cartridge, LogLevel::Info, || {
            format!(
                "inserted \"{}\": {} (type {:02X}), {} KiB ROM, {} KiB RAM, {} mode",
                header.title,
                mapper.name(),
                header.cartridge_type,
                header.rom_size / 1024,
                header.ram_size / 1024,
                if color { "color" } else { "monochrome" }
            )
        });

        self.rom = Some(rom.to_vec());
        self.power_on(Some(Slot { header, mapper }), color);
        Ok(())
    }

    pub fn remove_cartridge(&mut self) {
        if self.rom.take().is_some() {
            log(LogCategory::Cartridge, LogLevel::Info, || "cartridge removed".to_string());
        }
        self.power_on(None, false);
    }

    pub fn has_cartridge(&self) -> bool {
        self.cpu.memory.slot.is_some()
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cpu.memory.slot.as_ref().map(|slot| &slot.header)
    }

    /// Whether the running machine is in color mode.
    pub fn color_mode(&self) -> bool {
        self.cpu.memory.color()
    }

    /// Level of the cartridge's rumble motor line. Always false for boards
    /// without a motor.
    pub fn rumble_active(&self) -> bool {
        self.cpu
            .memory
            .slot
            .as_ref()
            .is_some_and(|slot| slot.mapper.rumble_active())
    }

    fn power_on(&mut self, slot: Option<Slot>, color: bool) {
        let inserted = slot.is_some();
        let boot_rom = self.cpu.memory.power_on(slot, color, &self.config);
        if boot_rom || !inserted {
            self.cpu.reset();
        } else {
            self.cpu.reset_post_boot(color);
        }
        self.cpu.memory.apu.set_speed(self.speed);
        self.carry = 0.0;
        self.overshoot = 0;
    }

    fn ensure_cartridge(&self) -> Result<(), GbError> {
        if self.has_cartridge() {
            Ok(())
        } else {
            Err(GbError::NoCartridge)
        }
    }

    fn sync_rtc(&mut self) {
        let now = self.time.now_millis();
        if let Some(rtc) = self.cpu.memory.mapper_mut().and_then(|m| m.rtc_mut()) {
            rtc.update(now);
        }
    }

    /// Run for `elapsed` wall-clock time at the current speed. Returns the
    /// clocks actually run.
    pub fn advance(&mut self, elapsed: Duration) -> Result<u32, GbError> {
        self.ensure_cartridge()?;
        let elapsed = elapsed.min(MAX_ADVANCE);
        let exact = elapsed.as_secs_f64() * CLOCK_RATE as f64 * self.speed + self.carry;
        let budget = (exact as u32) & !3;
        self.carry = exact - budget as f64;
        self.sync_rtc();
        self.run(budget)
    }

    /// Run for a fixed number of normal-speed clocks.
    pub fn advance_cycles(&mut self, cycles: u32) -> Result<u32, GbError> {
        self.ensure_cartridge()?;
        self.sync_rtc();
        self.run(cycles)
    }

    fn run(&mut self, budget: u32) -> Result<u32, GbError> {
        if budget <= self.overshoot {
            self.overshoot -= budget;
            return Ok(0);
        }
        let target = budget - self.overshoot;
        let mut ran = 0;

        while ran < target {
            self.cpu.step(cpu_budget(target - ran, self.cpu.memory.double_speed()));
            ran += self.cpu.memory.take_elapsed();

            if let Some(address) = self.cpu.memory.take_fault() {
                self.overshoot = 0;
                self.cpu.memory.end_slice();
                return Err(GbError::DispatchGap { address });
            }
        }

        self.overshoot = ran - target;
        self.cpu.memory.end_slice();
        Ok(ran)
    }

    /// Press a button. A fresh press requests the joypad interrupt and
    /// wakes the CPU from STOP.
    pub fn button_down(&mut self, button: Button) {
        if self.cpu.memory.joypad.press(button) {
            self.cpu.memory.request_interrupt(IRQ_JOYPAD);
        }
        self.cpu.stopped = false;
    }

    pub fn button_up(&mut self, button: Button) {
        self.cpu.memory.joypad.release(button);
    }

    /// Emulation speed multiplier, clamped to 0.25x-16x.
    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_nan() {
            return;
        }
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.cpu.memory.apu.set_speed(self.speed);
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// The most recently completed frame.
    pub fn frame(&self) -> &Frame {
        self.cpu.memory.ppu.frame()
    }

    /// External RAM followed by the RTC block, or `None` when the cartridge
    /// keeps nothing across power cycles.
    pub fn battery_blob(&self) -> Option<Vec<u8>> {
        let slot = self.cpu.memory.slot.as_ref()?;
        if !slot.header.features.has_battery {
            return None;
        }
        let mut blob = slot.mapper.ram().to_vec();
        if let Some(rtc) = slot.mapper.rtc() {
            blob.extend_from_slice(&rtc.to_blob());
        }
        Some(blob)
    }

    pub fn load_battery_blob(&mut self, data: &[u8]) -> Result<(), GbError> {
        let slot = self.cpu.memory.slot.as_mut().ok_or(GbError::NoCartridge)?;
        if !slot.header.features.has_battery {
            log(LogCategory::Cartridge, LogLevel::Warn, || {
                "battery data offered to a cartridge without a battery".to_string()
            });
            return Err(GbError::NoBattery);
        }

        let ram_len = slot.mapper.ram().len();
        let rtc_len = if slot.mapper.rtc().is_some() { RTC_BLOB_LEN } else { 0 };
        let expected = ram_len + rtc_len;
        if data.len() != expected {
            log(LogCategory::Cartridge, LogLevel::Warn, || {
                format!("battery data is {} bytes, expected {}", data.len(), expected)
            });
            return Err(GbError::BatteryLength {
                expected,
                actual: data.len(),
            });
        }

        slot.mapper.ram_mut().copy_from_slice(&data[..ram_len]);
        if let Some(rtc) = slot.mapper.rtc_mut() {
            let mut block = [0u8; RTC_BLOB_LEN];
            block.copy_from_slice(&data[ram_len..]);
            rtc.load_blob(&block);
        }
        Ok(())
    }

    /// Battery data if anything battery-backed changed since the last call.
    pub fn save_if_dirty(&mut self) -> Option<Vec<u8>> {
        if self.cpu.memory.take_battery_dirty() {
            self.battery_blob()
        } else {
            None
        }
    }
}

/// CPU clocks left in a slice of `remaining` normalized clocks.
fn cpu_budget(remaining: u32, double_speed: bool) -> u32 {
    if double_speed {
        remaining.saturating_mul(2)
    } else {
        remaining
    }
}

impl System for GbSystem {
    type Error = GbError;

    /// Power cycle, keeping the cartridge and its battery-backed contents.
    fn reset(&mut self) {
        let now = self.time.now_millis();
        let slot = self.cpu.memory.slot.take().zip(self.rom.clone()).map(|(old, rom)| {
            let mut mapper = Mapper::new(&old.header, rom, now);
            mapper.ram_mut().copy_from_slice(old.mapper.ram());
            if let (Some(rtc), Some(prev)) = (mapper.rtc_mut(), old.mapper.rtc()) {
                *rtc = prev.clone();
            }
            Slot {
                header: old.header,
                mapper,
            }
        });
        let color = slot.is_some() && self.cpu.memory.color();
        self.power_on(slot, color);
    }

    fn step_frame(&mut self) -> Result<Frame, Self::Error> {
        self.advance_cycles(DOTS_PER_FRAME)?;
        Ok(self.frame().clone())
    }

    fn save_state(&self) -> serde_json::Value {
        self.legacy_state()
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), Self::Error> {
        self.load_legacy_state(state)
    }

    fn supports_save_states(&self) -> bool {
        true
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        vec![MountPointInfo {
            id: CARTRIDGE_SLOT.to_string(),
            name: "Cartridge Slot".to_string(),
            extensions: vec!["gb".to_string(), "gbc".to_string()],
            required: true,
        }]
    }

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error> {
        if mount_point_id != CARTRIDGE_SLOT {
            return Err(GbError::InvalidMountPoint(mount_point_id.to_string()));
        }
        self.insert_cartridge(data)
    }

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error> {
        if mount_point_id != CARTRIDGE_SLOT {
            return Err(GbError::InvalidMountPoint(mount_point_id.to_string()));
        }
        self.remove_cartridge();
        Ok(())
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        mount_point_id == CARTRIDGE_SLOT && self.has_cartridge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::make_rom;
    use chroma_core::sink::NullSink;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn system() -> GbSystem {
        GbSystem::new(Box::new(NullSink), Box::new(NullSink))
    }

    #[test]
    fn test_double_speed_budget_saturates() {
        assert_eq!(cpu_budget(1000, false), 1000);
        assert_eq!(cpu_budget(1000, true), 2000);
        assert_eq!(cpu_budget(1 << 31, true), u32::MAX);
        assert_eq!(cpu_budget(u32::MAX, false), u32::MAX);
    }

    /// `JR -2` at the entry point: a tight loop that touches nothing.
    fn spin_rom(cart_type: u8, ram_code: u8, color: u8) -> Vec<u8> {
        let mut rom = make_rom(cart_type, 0x00, ram_code, color);
        rom[0x100] = 0x18;
        rom[0x101] = 0xFE;
        rom
    }

    #[derive(Clone)]
    struct ManualClock(Arc<AtomicU64>);

    impl TimeSource for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_gb_system_creation() {
        let sys = system();
        assert!(!sys.has_cartridge());
        assert_eq!(sys.frame().width, SCREEN_WIDTH as u32);
        assert_eq!(sys.frame().height, SCREEN_HEIGHT as u32);
    }

    #[test]
    fn test_gb_mount_points() {
        let sys = system();
        let mount_points = sys.mount_points();
        assert_eq!(mount_points.len(), 1);
        assert_eq!(mount_points[0].id, "Cartridge");
        assert_eq!(mount_points[0].name, "Cartridge Slot");
        assert_eq!(mount_points[0].extensions, vec!["gb", "gbc"]);
        assert!(mount_points[0].required);
    }

    #[test]
    fn test_gb_supports_save_states() {
        assert!(system().supports_save_states());
    }

    #[test]
    fn test_gb_step_frame_without_cart() {
        let mut sys = system();
        assert!(matches!(sys.step_frame(), Err(GbError::NoCartridge)));
        assert!(matches!(sys.advance(Duration::from_millis(16)), Err(GbError::NoCartridge)));
    }

    #[test]
    fn test_gb_mount_and_unmount() {
        let mut sys = system();
        sys.mount("Cartridge", &spin_rom(0x00, 0x00, 0x00)).unwrap();
        assert!(sys.is_mounted("Cartridge"));
        assert_eq!(sys.cartridge().unwrap().title, "CHROMA");

        sys.unmount("Cartridge").unwrap();
        assert!(!sys.is_mounted("Cartridge"));
    }

    #[test]
    fn test_gb_invalid_mount_point() {
        let mut sys = system();
        let err = sys.mount("Tape", &spin_rom(0x00, 0x00, 0x00)).unwrap_err();
        assert!(matches!(err, GbError::InvalidMountPoint(ref id) if id == "Tape"));
        assert!(matches!(sys.unmount("Tape"), Err(GbError::InvalidMountPoint(_))));
        assert!(!sys.is_mounted("Tape"));
    }

    #[test]
    fn test_gb_failed_insert_keeps_cartridge() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x00)).unwrap();
        assert!(sys.insert_cartridge(&[0u8; 0x100]).is_err());
        assert!(sys.has_cartridge());
        assert!(sys.step_frame().is_ok());
    }

    #[test]
    fn test_gb_color_mode_selection() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x80)).unwrap();
        assert!(sys.color_mode());
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x00)).unwrap();
        assert!(!sys.color_mode());

        let config = EngineConfig {
            force_monochrome: true,
            ..EngineConfig::default()
        };
        let mut mono = GbSystem::with_config(config, Box::new(NullSink), Box::new(NullSink));
        mono.insert_cartridge(&spin_rom(0x00, 0x00, 0x80)).unwrap();
        assert!(!mono.color_mode());
    }

    #[test]
    fn test_gb_step_frame_runs_one_frame() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x00)).unwrap();
        let frame = sys.step_frame().unwrap();
        assert_eq!(frame.pixels.len(), SCREEN_WIDTH * SCREEN_HEIGHT);
    }

    #[test]
    fn test_gb_advance_carries_fractions() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x00)).unwrap();
        let mut total = 0u64;
        for _ in 0..1000 {
            total += sys.advance(Duration::from_millis(1)).unwrap() as u64;
        }
        // 4194.304 clocks per millisecond; the remainder carries forward
        assert!((total as i64 - 4_194_304).abs() < 64, "ran {}", total);
    }

    #[test]
    fn test_gb_speed_scales_budget() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x00)).unwrap();
        sys.set_speed(2.0);
        let ran = sys.advance(Duration::from_millis(10)).unwrap();
        assert!((ran as i64 - 83_886).abs() < 16, "ran {}", ran);

        sys.set_speed(100.0);
        assert_eq!(sys.speed(), 16.0);
        sys.set_speed(0.0);
        assert_eq!(sys.speed(), 0.25);
    }

    #[test]
    fn test_gb_button_requests_joypad_interrupt() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x00)).unwrap();
        sys.cpu.memory.write_mem(0xFF0F, 0x00);
        sys.button_down(Button::Start);
        assert_eq!(sys.cpu.memory.read_mem(0xFF0F) & IRQ_JOYPAD, IRQ_JOYPAD);

        sys.cpu.memory.write_mem(0xFF0F, 0x00);
        sys.button_down(Button::Start);
        assert_eq!(sys.cpu.memory.read_mem(0xFF0F) & IRQ_JOYPAD, 0);
        sys.button_up(Button::Start);
    }

    #[test]
    fn test_gb_battery_blob_requires_battery() {
        let mut sys = system();
        assert!(matches!(sys.load_battery_blob(&[]), Err(GbError::NoCartridge)));

        // MBC1 + RAM, no battery
        sys.insert_cartridge(&spin_rom(0x02, 0x02, 0x00)).unwrap();
        assert!(sys.battery_blob().is_none());
        assert!(matches!(sys.load_battery_blob(&[0; 0x2000]), Err(GbError::NoBattery)));
    }

    #[test]
    fn test_gb_battery_blob_layout() {
        let clock = ManualClock(Arc::new(AtomicU64::new(1_000_000)));
        let mut sys = GbSystem::with_time_source(
            EngineConfig::default(),
            Box::new(NullSink),
            Box::new(NullSink),
            Box::new(clock.clone()),
        );
        // MBC3 + TIMER + RAM + BATTERY, 8 KiB
        sys.insert_cartridge(&spin_rom(0x10, 0x02, 0x00)).unwrap();
        let blob = sys.battery_blob().unwrap();
        assert_eq!(blob.len(), 0x2000 + RTC_BLOB_LEN);

        let err = sys.load_battery_blob(&blob[..0x2000]).unwrap_err();
        assert!(matches!(err, GbError::BatteryLength { expected, actual: 0x2000 } if expected == 0x2000 + RTC_BLOB_LEN));

        let mut edited = blob.clone();
        edited[0] = 0x5A;
        sys.load_battery_blob(&edited).unwrap();
        assert_eq!(sys.battery_blob().unwrap(), edited);
    }

    #[test]
    fn test_gb_reset_keeps_cartridge_ram() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x03, 0x02, 0x00)).unwrap();
        let mut blob = sys.battery_blob().unwrap();
        blob[0x10] = 0xA5;
        sys.load_battery_blob(&blob).unwrap();

        sys.reset();
        assert!(sys.has_cartridge());
        assert_eq!(sys.battery_blob().unwrap()[0x10], 0xA5);
        assert_eq!(sys.cpu.pc, 0x0100);
    }

    #[test]
    fn test_gb_save_if_dirty() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x03, 0x02, 0x00)).unwrap();
        assert!(sys.save_if_dirty().is_none());

        sys.cpu.memory.write_mem(0x0000, 0x0A);
        sys.cpu.memory.write_mem(0xA000, 0x42);
        let blob = sys.save_if_dirty().unwrap();
        assert_eq!(blob[0], 0x42);
        assert!(sys.save_if_dirty().is_none());
    }

    #[test]
    fn test_gb_legacy_state_round_trip() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x00)).unwrap();
        sys.step_frame().unwrap();
        let state = sys.save_state();

        sys.step_frame().unwrap();
        sys.cpu.memory.write_mem(0xC000, 0x99);
        sys.load_state(&state).unwrap();
        assert_eq!(sys.save_state(), state);
    }

    #[test]
    fn test_gb_snapshot_length_checked() {
        let mut sys = system();
        sys.insert_cartridge(&spin_rom(0x00, 0x00, 0x00)).unwrap();
        let snapshot = sys.state_snapshot().unwrap();
        assert_eq!(snapshot.len(), SNAPSHOT_LEN);
        let err = sys.load_state_snapshot(&snapshot[1..]).unwrap_err();
        assert!(matches!(err, GbError::SnapshotLength { actual, .. } if actual == SNAPSHOT_LEN - 1));
    }
}
