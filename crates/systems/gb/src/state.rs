//! Save states
//!
//! Two formats share the bus's memory image:
//!
//! - the raw snapshot: the 64 KiB image followed by VRAM bank 1, exactly
//!   [`SNAPSHOT_LEN`] bytes. It carries no CPU registers.
//! - the positional JSON array, whose element order is given by [`FIELDS`].
//!   It adds the CPU, every WRAM bank, cartridge RAM, bank controller and
//!   RTC state, PPU timing, palette RAM and the engine's clock carries.

use chroma_core::logging::{log, LogCategory, LogLevel};
use serde_json::{json, Value};

use crate::mappers::BankController;
use crate::ppu::{Mode, PpuTiming};
use crate::{GbError, GbSystem};

const IMAGE_LEN: usize = 0x10000;
const VRAM_BANK_LEN: usize = 0x2000;

/// Memory image plus VRAM bank 1
pub const SNAPSHOT_LEN: usize = IMAGE_LEN + VRAM_BANK_LEN;

const LEGACY_VERSION: u64 = 1;

const FIELDS: [&str; 37] = [
    "version",
    "title",
    "color_mode",
    "a",
    "f",
    "b",
    "c",
    "d",
    "e",
    "h",
    "l",
    "sp",
    "pc",
    "ime",
    "ime_delay",
    "halted",
    "stopped",
    "double_speed",
    "memory_image",
    "vram_bank1",
    "wram",
    "cart_ram",
    "mapper_state",
    "rtc",
    "lcd_ticks",
    "ly",
    "mode",
    "stat_tracker",
    "window_line",
    "bg_palette_ram",
    "obj_palette_ram",
    "div_counter",
    "timer_counter",
    "serial_counter",
    "joypad",
    "speed_carry",
    "budget_overshoot",
];

fn invalid(index: usize, what: &str) -> GbError {
    GbError::LegacyState(format!("field {} ({}): {}", index, FIELDS[index], what))
}

/// Typed access to the positional array, by field index.
struct Fields<'a>(&'a [Value]);

impl Fields<'_> {
    fn uint(&self, index: usize, max: u64) -> Result<u64, GbError> {
        match self.0[index].as_u64() {
            Some(v) if v <= max => Ok(v),
            Some(v) => Err(invalid(index, &format!("{} out of range", v))),
            None => Err(invalid(index, "expected an unsigned integer")),
        }
    }

    fn byte(&self, index: usize) -> Result<u8, GbError> {
        Ok(self.uint(index, u8::MAX as u64)? as u8)
    }

    fn word(&self, index: usize) -> Result<u16, GbError> {
        Ok(self.uint(index, u16::MAX as u64)? as u16)
    }

    fn dword(&self, index: usize) -> Result<u32, GbError> {
        Ok(self.uint(index, u32::MAX as u64)? as u32)
    }

    fn flag(&self, index: usize) -> Result<bool, GbError> {
        self.0[index]
            .as_bool()
            .ok_or_else(|| invalid(index, "expected a boolean"))
    }

    fn float(&self, index: usize) -> Result<f64, GbError> {
        self.0[index]
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| invalid(index, "expected a non-negative number"))
    }

    fn text(&self, index: usize) -> Result<&str, GbError> {
        self.0[index]
            .as_str()
            .ok_or_else(|| invalid(index, "expected a string"))
    }

    fn list(&self, index: usize) -> Result<&[Value], GbError> {
        self.0[index]
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| invalid(index, "expected an array"))
    }

    /// A byte array, of exactly `len` bytes when given.
    fn bytes(&self, index: usize, len: Option<usize>) -> Result<Vec<u8>, GbError> {
        let items = self.list(index)?;
        if let Some(len) = len.filter(|&len| len != items.len()) {
            return Err(invalid(index, &format!("{} entries, expected {}", items.len(), len)));
        }
        items
            .iter()
            .map(|v| {
                v.as_u64()
                    .filter(|&b| b <= u8::MAX as u64)
                    .map(|b| b as u8)
                    .ok_or_else(|| invalid(index, "expected bytes"))
            })
            .collect()
    }

    fn words(&self, index: usize) -> Result<Vec<u64>, GbError> {
        self.list(index)?
            .iter()
            .map(|v| v.as_u64().ok_or_else(|| invalid(index, "expected integers")))
            .collect()
    }
}

impl GbSystem {
    /// Memory image plus VRAM bank 1 (zeroes in monochrome mode).
    pub fn state_snapshot(&mut self) -> Result<Vec<u8>, GbError> {
        self.ensure_cartridge()?;
        let bus = &mut self.cpu.memory;
        bus.ppu.flush();
        bus.apu.sync();
        let mut snapshot = bus.memory_image();
        snapshot.extend_from_slice(bus.ppu.vram(1));
        Ok(snapshot)
    }

    pub fn load_state_snapshot(&mut self, data: &[u8]) -> Result<(), GbError> {
        self.ensure_cartridge()?;
        if data.len() != SNAPSHOT_LEN {
            log(LogCategory::Bus, LogLevel::Warn, || {
                format!("snapshot is {} bytes, expected {}", data.len(), SNAPSHOT_LEN)
            });
            return Err(GbError::SnapshotLength {
                expected: SNAPSHOT_LEN,
                actual: data.len(),
            });
        }
        self.cpu.memory.restore_image(&data[..IMAGE_LEN], &data[IMAGE_LEN..]);
        Ok(())
    }

    /// The positional array, or `null` with no cartridge inserted.
    pub(crate) fn legacy_state(&self) -> Value {
        let cpu = &self.cpu;
        let bus = &cpu.memory;
        let Some(slot) = bus.slot.as_ref() else {
            return Value::Null;
        };
        let timing = bus.ppu.timing();
        let (div_counter, timer_counter) = bus.timer.counters();

        json!([
            LEGACY_VERSION,
            slot.header.title,
            bus.color(),
            cpu.a,
            cpu.f,
            cpu.b,
            cpu.c,
            cpu.d,
            cpu.e,
            cpu.h,
            cpu.l,
            cpu.sp,
            cpu.pc,
            cpu.ime,
            cpu.ime_delay,
            cpu.halted,
            cpu.stopped,
            bus.double_speed(),
            bus.memory_image(),
            bus.ppu.vram(1),
            bus.wram(),
            slot.mapper.ram(),
            slot.mapper.registers(),
            slot.mapper.rtc().map(|rtc| rtc.to_state()),
            timing.frame_dots,
            timing.ly,
            timing.mode as u8,
            timing.line_sprites,
            timing.window_line,
            bus.ppu.palettes.bg_ram.to_vec(),
            bus.ppu.palettes.obj_ram.to_vec(),
            div_counter,
            timer_counter,
            bus.serial.clocks_until_done(),
            bus.joypad.pressed_mask(),
            self.carry,
            self.overshoot,
        ])
    }

    /// Validates every field against the running cartridge before touching
    /// any state; a rejected array leaves the machine as it was.
    pub(crate) fn load_legacy_state(&mut self, state: &Value) -> Result<(), GbError> {
        let slot = self.cpu.memory.slot.as_ref().ok_or(GbError::NoCartridge)?;
        let items = state
            .as_array()
            .ok_or_else(|| GbError::LegacyState("expected an array".to_string()))?;
        if items.len() != FIELDS.len() {
            return Err(GbError::LegacyState(format!(
                "{} fields, expected {}",
                items.len(),
                FIELDS.len()
            )));
        }
        let f = Fields(items);

        let version = f.uint(0, u64::MAX)?;
        if version != LEGACY_VERSION {
            return Err(invalid(0, &format!("unsupported version {}", version)));
        }
        if f.text(1)? != slot.header.title {
            return Err(invalid(1, "saved from a different cartridge"));
        }
        if f.flag(2)? != self.cpu.memory.color() {
            return Err(invalid(2, "hardware mode differs"));
        }

        let regs = [
            f.byte(3)?,
            f.byte(4)?,
            f.byte(5)?,
            f.byte(6)?,
            f.byte(7)?,
            f.byte(8)?,
            f.byte(9)?,
            f.byte(10)?,
        ];
        let sp = f.word(11)?;
        let pc = f.word(12)?;
        let ime = f.flag(13)?;
        let ime_delay = f.byte(14)?;
        let halted = f.flag(15)?;
        let stopped = f.flag(16)?;
        let double_speed = f.flag(17)?;

        let image = f.bytes(18, Some(IMAGE_LEN))?;
        let vram1 = f.bytes(19, Some(VRAM_BANK_LEN))?;
        let wram = f.bytes(20, Some(self.cpu.memory.wram().len()))?;
        let cart_ram = f.bytes(21, Some(slot.mapper.ram().len()))?;
        let mapper_regs = f.bytes(22, Some(slot.mapper.registers().len()))?;
        let rtc = match (&items[23], slot.mapper.rtc()) {
            (Value::Null, None) => None,
            (Value::Null, Some(_)) => return Err(invalid(23, "missing clock state")),
            (_, None) => return Err(invalid(23, "cartridge has no clock")),
            (_, Some(live)) => {
                let words = f.words(23)?;
                if words.len() != live.to_state().len() {
                    return Err(invalid(23, "wrong number of entries"));
                }
                Some(words)
            }
        };

        let timing = PpuTiming {
            frame_dots: f.dword(24)?,
            ly: f.byte(25)?,
            mode: Mode::from_bits(f.byte(26)?),
            line_sprites: f.byte(27)?,
            window_line: f.byte(28)?,
        };
        let bg_ram = f.bytes(29, Some(64))?;
        let obj_ram = f.bytes(30, Some(64))?;
        let div_counter = f.dword(31)?;
        // The TIMA phase is rebuilt from the divider
        f.dword(32)?;
        let serial_counter = match items[33] {
            Value::Null => None,
            _ => Some(f.dword(33)?),
        };
        let joypad = f.byte(34)?;
        let carry = f.float(35)?;
        let overshoot = f.dword(36)?;

        if self.cpu.memory.color() && double_speed != (image[0xFF4D] & 0x80 != 0) {
            return Err(invalid(17, "disagrees with KEY1 in the memory image"));
        }

        let bus = &mut self.cpu.memory;
        bus.restore_image(&image, &vram1);
        bus.load_wram(&wram);
        if let Some(slot) = bus.slot.as_mut() {
            slot.mapper.ram_mut().copy_from_slice(&cart_ram);
            slot.mapper.load_registers(&mapper_regs);
            if let (Some(clock), Some(words)) = (slot.mapper.rtc_mut(), rtc.as_deref()) {
                clock.load_state(words);
            }
        }
        bus.ppu.set_timing(timing);
        bus.ppu.palettes.bg_ram.copy_from_slice(&bg_ram);
        bus.ppu.palettes.obj_ram.copy_from_slice(&obj_ram);
        bus.ppu.palettes.rebuild();
        bus.timer.set_counters(div_counter);
        bus.serial.set_remaining(serial_counter);
        bus.joypad.set_pressed_mask(joypad);

        let cpu = &mut self.cpu;
        [cpu.a, cpu.f, cpu.b, cpu.c, cpu.d, cpu.e, cpu.h, cpu.l] = regs;
        cpu.f &= 0xF0;
        cpu.sp = sp;
        cpu.pc = pc;
        cpu.ime = ime;
        cpu.ime_delay = ime_delay;
        cpu.halted = halted;
        cpu.stopped = stopped;

        self.carry = carry;
        self.overshoot = overshoot;

        log(LogCategory::Bus, LogLevel::Info, || {
            format!("restored save state at PC={:04X}", pc)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::make_rom;
    use chroma_core::sink::NullSink;
    use chroma_core::System;

    fn running(cart_type: u8, ram_code: u8, color: u8) -> GbSystem {
        let mut rom = make_rom(cart_type, 0x00, ram_code, color);
        // JR -2
        rom[0x100] = 0x18;
        rom[0x101] = 0xFE;
        let mut sys = GbSystem::new(Box::new(NullSink), Box::new(NullSink));
        sys.insert_cartridge(&rom).unwrap();
        sys.step_frame().unwrap();
        sys
    }

    #[test]
    fn legacy_array_has_fixed_shape() {
        let sys = running(0x13, 0x03, 0x80);
        let state = sys.save_state();
        let items = state.as_array().unwrap();
        assert_eq!(items.len(), FIELDS.len());
        assert_eq!(items[0], 1);
        assert_eq!(items[1], "CHROMA");
        assert_eq!(items[2], true);
        assert_eq!(items[12], 0x0100);
        assert_eq!(items[18].as_array().unwrap().len(), IMAGE_LEN);
        assert_eq!(items[20].as_array().unwrap().len(), 0x8000);
        assert_eq!(items[21].as_array().unwrap().len(), 0x8000);
        assert!(items[23].is_array());
    }

    #[test]
    fn legacy_restores_registers_and_banks() {
        let mut sys = running(0x13, 0x03, 0x80);
        sys.cpu.memory.write_mem(0xFF70, 0x05);
        sys.cpu.memory.write_mem(0xD123, 0x77);
        sys.cpu.memory.write_mem(0x0000, 0x0A);
        sys.cpu.memory.write_mem(0x4000, 0x02);
        sys.cpu.memory.write_mem(0xA000, 0x31);
        sys.cpu.b = 0x42;
        let state = sys.save_state();

        sys.cpu.memory.write_mem(0xFF70, 0x01);
        sys.cpu.memory.write_mem(0x4000, 0x00);
        sys.cpu.b = 0;
        sys.load_state(&state).unwrap();

        assert_eq!(sys.cpu.b, 0x42);
        assert_eq!(sys.cpu.memory.read_mem(0xFF70), 0xFD);
        assert_eq!(sys.cpu.memory.read_mem(0xD123), 0x77);
        assert_eq!(sys.cpu.memory.read_mem(0xA000), 0x31);
    }

    #[test]
    fn rejected_state_changes_nothing() {
        let mut sys = running(0x00, 0x00, 0x00);
        let before = sys.save_state();

        let mut wrong_title = before.clone();
        wrong_title[1] = json!("OTHER");
        assert!(matches!(sys.load_state(&wrong_title), Err(GbError::LegacyState(_))));

        let mut short_image = before.clone();
        short_image[18] = json!([0, 1, 2]);
        assert!(matches!(sys.load_state(&short_image), Err(GbError::LegacyState(_))));

        let mut bad_pc = before.clone();
        bad_pc[12] = json!(0x10000);
        assert!(matches!(sys.load_state(&bad_pc), Err(GbError::LegacyState(_))));

        assert!(sys.load_state(&json!({"pc": 256})).is_err());
        assert_eq!(sys.save_state(), before);
    }

    #[test]
    fn mode_mismatch_is_rejected() {
        let first = running(0x00, 0x00, 0x80);
        let mut state = first.save_state();
        state[2] = json!(!state[2].as_bool().unwrap());
        let mut sys = running(0x00, 0x00, 0x80);
        assert!(matches!(sys.load_state(&state), Err(GbError::LegacyState(_))));
    }

    #[test]
    fn snapshot_of_monochrome_has_blank_second_bank() {
        let mut sys = running(0x00, 0x00, 0x00);
        let snapshot = sys.state_snapshot().unwrap();
        assert!(snapshot[IMAGE_LEN..].iter().all(|&b| b == 0));
        assert_eq!(snapshot[0xFF40], 0x91);
        assert_eq!(snapshot[0x0100], 0x18);
    }

    #[test]
    fn snapshot_restores_memory() {
        let mut sys = running(0x00, 0x00, 0x00);
        sys.cpu.memory.write_mem(0xC010, 0xAB);
        sys.cpu.memory.write_mem(0xFF80, 0xCD);
        let snapshot = sys.state_snapshot().unwrap();

        sys.cpu.memory.write_mem(0xC010, 0x00);
        sys.cpu.memory.write_mem(0xFF80, 0x00);
        sys.load_state_snapshot(&snapshot).unwrap();
        assert_eq!(sys.cpu.memory.read_mem(0xC010), 0xAB);
        assert_eq!(sys.cpu.memory.read_mem(0xFF80), 0xCD);
    }

    #[test]
    fn no_cartridge() {
        let mut sys = GbSystem::new(Box::new(NullSink), Box::new(NullSink));
        assert_eq!(sys.save_state(), Value::Null);
        assert!(matches!(sys.state_snapshot(), Err(GbError::NoCartridge)));
        assert!(matches!(sys.load_state(&json!([])), Err(GbError::NoCartridge)));
    }
}
