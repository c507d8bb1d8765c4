//! Sharp LR35902 CPU core (Game Boy / Game Boy Color CPU)
//!
//! A Z80-like core with the Game Boy's interrupt model. The CPU is the only
//! clock driver in the machine: after every instruction (or interrupt
//! dispatch, or HALT step) it reports the consumed clocks to the bus through
//! [`MemoryLr35902::clock`], and the bus advances every peripheral by that
//! amount.
//!
//! Memory accesses of an instruction all happen before its clocks are
//! reported, so timing is exact per instruction rather than per M-cycle.

use crate::logging::{log, LogCategory, LogLevel};

/// Bus interface the LR35902 core runs against.
///
/// Only `read`/`write` are required; the remaining hooks default to a bus
/// with no peripherals, which is what the unit tests and benches use.
pub trait MemoryLr35902 {
    /// Read a byte from memory
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to memory
    fn write(&mut self, addr: u16, val: u8);

    /// Advance peripherals by `cycles` CPU clocks.
    fn clock(&mut self, _cycles: u32) {}

    /// Interrupts both requested and enabled (`IE & IF & 0x1F`).
    fn pending_interrupts(&self) -> u8 {
        0
    }

    /// Clear the request bits in `mask` once an interrupt is serviced.
    fn acknowledge_interrupt(&mut self, _mask: u8) {}

    /// CPU clocks until the next event that could end a HALT, or `None` if
    /// no enabled source can fire.
    fn halt_wake_distance(&mut self) -> Option<u32> {
        None
    }

    /// Perform a pending double-speed switch for STOP. Returns true if the
    /// switch happened and the CPU should keep running.
    fn speed_switch(&mut self) -> bool {
        false
    }

    /// Color hardware has no HALT skip bug.
    fn color_mode(&self) -> bool {
        false
    }
}

// Flag bit positions (in F register)
pub const FLAG_Z: u8 = 0b1000_0000; // Zero
pub const FLAG_N: u8 = 0b0100_0000; // Subtract
pub const FLAG_H: u8 = 0b0010_0000; // Half carry
pub const FLAG_C: u8 = 0b0001_0000; // Carry

/// Clocks charged for servicing an interrupt.
pub const INTERRUPT_CYCLES: u32 = 20;

/// Base cost of each opcode in clocks. Conditional branches list the
/// not-taken cost; the taken extra is added by the handler.
#[rustfmt::skip]
const CYCLES: [u8; 256] = [
//  x0  x1  x2  x3  x4  x5  x6  x7  x8  x9  xA  xB  xC  xD  xE  xF
     4, 12,  8,  8,  4,  4,  8,  4, 20,  8,  8,  8,  4,  4,  8,  4, // 0x
     4, 12,  8,  8,  4,  4,  8,  4, 12,  8,  8,  8,  4,  4,  8,  4, // 1x
     8, 12,  8,  8,  4,  4,  8,  4,  8,  8,  8,  8,  4,  4,  8,  4, // 2x
     8, 12,  8,  8, 12, 12, 12,  4,  8,  8,  8,  8,  4,  4,  8,  4, // 3x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 4x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 5x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 6x
     8,  8,  8,  8,  8,  8,  4,  8,  4,  4,  4,  4,  4,  4,  8,  4, // 7x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 8x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 9x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // Ax
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // Bx
     8, 12, 12, 16, 12, 16,  8, 16,  8, 16, 12,  4, 12, 24,  8, 16, // Cx
     8, 12, 12,  4, 12, 16,  8, 16,  8, 16, 12,  4, 12,  4,  8, 16, // Dx
    12, 12,  8,  4,  4, 16,  8, 16, 16,  4, 16,  4,  4,  4,  8, 16, // Ex
    12, 12,  8,  4,  4, 16,  8, 16, 12,  8, 16,  4,  4,  4,  8, 16, // Fx
];

/// Sharp LR35902 CPU state
#[derive(Debug)]
pub struct CpuLr35902<M: MemoryLr35902> {
    /// Accumulator & Flags (combined as AF)
    pub a: u8,
    pub f: u8,
    /// BC register pair
    pub b: u8,
    pub c: u8,
    /// DE register pair
    pub d: u8,
    pub e: u8,
    /// HL register pair
    pub h: u8,
    pub l: u8,
    /// Stack pointer
    pub sp: u16,
    /// Program counter
    pub pc: u16,
    /// Interrupt Master Enable flag
    pub ime: bool,
    /// Steps left before a pending EI sets IME (0 = none pending)
    pub ime_delay: u8,
    /// Halted until an interrupt is requested
    pub halted: bool,
    /// Stopped until a button is pressed
    pub stopped: bool,
    /// Hung after an illegal opcode
    pub locked: bool,
    /// Next fetch does not advance PC (DMG HALT bug)
    pub halt_bug: bool,
    /// Total clocks executed
    pub cycles: u64,
    /// Memory interface
    pub memory: M,
}

impl<M: MemoryLr35902> CpuLr35902<M> {
    /// Create a new LR35902 CPU
    pub fn new(memory: M) -> Self {
        Self {
            a: 0,
            f: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            sp: 0,
            pc: 0,
            ime: false,
            ime_delay: 0,
            halted: false,
            stopped: false,
            locked: false,
            halt_bug: false,
            cycles: 0,
            memory,
        }
    }

    /// Power-on state with a boot ROM mapped at 0x0000.
    pub fn reset(&mut self) {
        self.set_af(0);
        self.set_bc(0);
        self.set_de(0);
        self.set_hl(0);
        self.sp = 0;
        self.pc = 0;
        self.clear_run_state();
    }

    /// Register state the boot ROM leaves behind when it jumps to 0x0100.
    pub fn reset_post_boot(&mut self, color: bool) {
        if color {
            self.set_af(0x1180);
            self.set_bc(0x0000);
            self.set_de(0xFF56);
            self.set_hl(0x000D);
        } else {
            self.set_af(0x01B0);
            self.set_bc(0x0013);
            self.set_de(0x00D8);
            self.set_hl(0x014D);
        }
        self.sp = 0xFFFE;
        self.pc = 0x0100;
        self.clear_run_state();
    }

    fn clear_run_state(&mut self) {
        self.ime = false;
        self.ime_delay = 0;
        self.halted = false;
        self.stopped = false;
        self.locked = false;
        self.halt_bug = false;
        self.cycles = 0;
    }

    /// Execute one unit of work and return the CPU clocks it took.
    ///
    /// A unit is an optional interrupt dispatch followed by one instruction,
    /// or one HALT/STOP wait step. Wait steps never exceed `budget` clocks
    /// (but always take at least 4), so the caller's slice ends on time.
    pub fn step(&mut self, budget: u32) -> u32 {
        if self.locked || self.stopped {
            let idle = budget.max(4);
            return self.tick(idle);
        }

        if self.ime_delay > 0 {
            self.ime_delay -= 1;
            if self.ime_delay == 0 {
                self.ime = true;
            }
        }

        let mut elapsed = 0;
        if self.ime {
            let pending = self.memory.pending_interrupts();
            if pending != 0 {
                elapsed += self.dispatch_interrupt(pending);
            }
        }

        if self.halted {
            if self.memory.pending_interrupts() != 0 {
                self.halted = false;
            } else {
                let distance = self.memory.halt_wake_distance().unwrap_or(budget);
                let wait = distance.min(budget.saturating_sub(elapsed)).max(4);
                return elapsed + self.tick(wait);
            }
        }

        let opcode = self.read_pc();
        if self.halt_bug {
            self.halt_bug = false;
            self.pc = self.pc.wrapping_sub(1);
        }
        let cost = CYCLES[opcode as usize] as u32 + self.execute(opcode);
        elapsed + self.tick(cost)
    }

    fn tick(&mut self, cycles: u32) -> u32 {
        self.memory.clock(cycles);
        self.cycles += cycles as u64;
        cycles
    }

    /// Service the highest-priority pending interrupt (lowest bit first).
    fn dispatch_interrupt(&mut self, pending: u8) -> u32 {
        let bit = pending.trailing_zeros() as u16;
        self.ime = false;
        self.halted = false;
        self.memory.acknowledge_interrupt(1 << bit);
        log(LogCategory::Interrupts, LogLevel::Trace, || {
            format!("dispatch IRQ {} from PC={:04X}", bit, self.pc)
        });
        self.push_u16(self.pc);
        self.pc = 0x0040 | (bit << 3);
        self.tick(INTERRUPT_CYCLES)
    }

    fn read_pc(&mut self) -> u8 {
        let val = self.memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        val
    }

    fn read_pc_u16(&mut self) -> u16 {
        let lo = self.read_pc() as u16;
        let hi = self.read_pc() as u16;
        (hi << 8) | lo
    }

    fn push_u16(&mut self, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.memory.write(self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.memory.write(self.sp, val as u8);
    }

    fn pop_u16(&mut self) -> u16 {
        let lo = self.memory.read(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.memory.read(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    // Register pair accessors
    pub fn bc(&self) -> u16 {
        ((self.b as u16) << 8) | (self.c as u16)
    }

    pub fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn de(&self) -> u16 {
        ((self.d as u16) << 8) | (self.e as u16)
    }

    pub fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn hl(&self) -> u16 {
        ((self.h as u16) << 8) | (self.l as u16)
    }

    pub fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    pub fn af(&self) -> u16 {
        ((self.a as u16) << 8) | (self.f as u16)
    }

    pub fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = val as u8 & 0xF0; // Lower 4 bits always 0
    }

    /// 8-bit operand by its 3-bit encoding: B C D E H L (HL) A
    fn reg(&mut self, idx: u8) -> u8 {
        match idx & 0x07 {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => {
                let addr = self.hl();
                self.memory.read(addr)
            }
            _ => self.a,
        }
    }

    fn set_reg(&mut self, idx: u8, val: u8) {
        match idx & 0x07 {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => {
                let addr = self.hl();
                self.memory.write(addr, val);
            }
            _ => self.a = val,
        }
    }

    // Flag operations
    fn set_flag(&mut self, flag: u8, val: bool) {
        if val {
            self.f |= flag;
        } else {
            self.f &= !flag;
        }
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        (self.f & flag) != 0
    }

    fn update_flags_zn(&mut self, val: u8, subtract: bool) {
        self.set_flag(FLAG_Z, val == 0);
        self.set_flag(FLAG_N, subtract);
    }

    // Arithmetic operations
    fn add(&mut self, val: u8, carry: bool) {
        let c = (carry && self.get_flag(FLAG_C)) as u8;
        let result = self.a as u16 + val as u16 + c as u16;
        self.set_flag(FLAG_H, ((self.a & 0x0F) + (val & 0x0F) + c) > 0x0F);
        self.set_flag(FLAG_C, result > 0xFF);
        self.a = result as u8;
        self.update_flags_zn(self.a, false);
    }

    fn sub(&mut self, val: u8, carry: bool) {
        let c = (carry && self.get_flag(FLAG_C)) as u8;
        let result = self.a as i16 - val as i16 - c as i16;
        self.set_flag(FLAG_H, (self.a & 0x0F) < ((val & 0x0F) + c));
        self.set_flag(FLAG_C, result < 0);
        self.a = result as u8;
        self.update_flags_zn(self.a, true);
    }

    fn and(&mut self, val: u8) {
        self.a &= val;
        self.f = FLAG_H;
        self.update_flags_zn(self.a, false);
    }

    fn xor(&mut self, val: u8) {
        self.a ^= val;
        self.f = 0;
        self.update_flags_zn(self.a, false);
    }

    fn or(&mut self, val: u8) {
        self.a |= val;
        self.f = 0;
        self.update_flags_zn(self.a, false);
    }

    fn cp(&mut self, val: u8) {
        let result = self.a.wrapping_sub(val);
        self.set_flag(FLAG_H, (self.a & 0x0F) < (val & 0x0F));
        self.set_flag(FLAG_C, self.a < val);
        self.update_flags_zn(result, true);
    }

    fn alu(&mut self, op: u8, val: u8) {
        match op & 0x07 {
            0 => self.add(val, false),
            1 => self.add(val, true),
            2 => self.sub(val, false),
            3 => self.sub(val, true),
            4 => self.and(val),
            5 => self.xor(val),
            6 => self.or(val),
            _ => self.cp(val),
        }
    }

    fn inc(&mut self, val: u8) -> u8 {
        let result = val.wrapping_add(1);
        self.set_flag(FLAG_H, (val & 0x0F) == 0x0F);
        self.update_flags_zn(result, false);
        result
    }

    fn dec(&mut self, val: u8) -> u8 {
        let result = val.wrapping_sub(1);
        self.set_flag(FLAG_H, (val & 0x0F) == 0);
        self.update_flags_zn(result, true);
        result
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.hl();
        let result = hl.wrapping_add(val);
        self.set_flag(FLAG_N, false);
        self.set_flag(FLAG_H, ((hl & 0x0FFF) + (val & 0x0FFF)) > 0x0FFF);
        self.set_flag(FLAG_C, result < hl);
        self.set_hl(result);
    }

    /// SP plus a signed immediate; flags come from the unsigned low byte.
    fn sp_offset(&mut self) -> u16 {
        let offset = self.read_pc() as i8 as i16 as u16;
        self.f = 0;
        self.set_flag(FLAG_H, ((self.sp & 0x000F) + (offset & 0x000F)) > 0x000F);
        self.set_flag(FLAG_C, ((self.sp & 0x00FF) + (offset & 0x00FF)) > 0x00FF);
        self.sp.wrapping_add(offset)
    }

    fn daa(&mut self) {
        let mut adjust = 0u8;
        let mut carry = false;
        if self.get_flag(FLAG_H) || (!self.get_flag(FLAG_N) && (self.a & 0x0F) > 9) {
            adjust |= 0x06;
        }
        if self.get_flag(FLAG_C) || (!self.get_flag(FLAG_N) && self.a > 0x99) {
            adjust |= 0x60;
            carry = true;
        }
        self.a = if self.get_flag(FLAG_N) {
            self.a.wrapping_sub(adjust)
        } else {
            self.a.wrapping_add(adjust)
        };
        self.set_flag(FLAG_Z, self.a == 0);
        self.set_flag(FLAG_H, false);
        self.set_flag(FLAG_C, carry);
    }

    fn rotate_shift(&mut self, op: u8, val: u8) -> u8 {
        let carry_in = self.get_flag(FLAG_C);
        let (result, carry) = match op & 0x07 {
            0 => (val.rotate_left(1), val & 0x80 != 0),             // RLC
            1 => (val.rotate_right(1), val & 0x01 != 0),            // RRC
            2 => ((val << 1) | carry_in as u8, val & 0x80 != 0),    // RL
            3 => ((val >> 1) | (carry_in as u8) << 7, val & 0x01 != 0), // RR
            4 => (val << 1, val & 0x80 != 0),                       // SLA
            5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),      // SRA
            6 => (val.rotate_left(4), false),                       // SWAP
            _ => (val >> 1, val & 0x01 != 0),                       // SRL
        };
        self.f = 0;
        self.set_flag(FLAG_C, carry);
        self.set_flag(FLAG_Z, result == 0);
        result
    }

    fn jr_if(&mut self, cond: bool) -> u32 {
        let offset = self.read_pc() as i8;
        if cond {
            self.pc = self.pc.wrapping_add(offset as u16);
            4
        } else {
            0
        }
    }

    fn jp_if(&mut self, cond: bool) -> u32 {
        let addr = self.read_pc_u16();
        if cond {
            self.pc = addr;
            4
        } else {
            0
        }
    }

    fn call_if(&mut self, cond: bool) -> u32 {
        let addr = self.read_pc_u16();
        if cond {
            self.push_u16(self.pc);
            self.pc = addr;
            12
        } else {
            0
        }
    }

    fn ret_if(&mut self, cond: bool) -> u32 {
        if cond {
            self.pc = self.pop_u16();
            12
        } else {
            0
        }
    }

    /// Condition by its 2-bit encoding: NZ Z NC C
    fn condition(&self, opcode: u8) -> bool {
        match (opcode >> 3) & 0x03 {
            0 => !self.get_flag(FLAG_Z),
            1 => self.get_flag(FLAG_Z),
            2 => !self.get_flag(FLAG_C),
            _ => self.get_flag(FLAG_C),
        }
    }

    fn halt(&mut self) -> u32 {
        if self.memory.pending_interrupts() == 0 {
            self.halted = true;
            return 0;
        }
        if self.memory.color_mode() {
            4
        } else {
            self.halt_bug = true;
            0
        }
    }

    fn stop(&mut self) {
        self.read_pc();
        if self.memory.speed_switch() {
            log(LogCategory::Cpu, LogLevel::Debug, || {
                format!("speed switch at PC={:04X}", self.pc)
            });
        } else {
            self.stopped = true;
        }
    }

    /// Runs one opcode and returns clocks beyond its table cost.
    fn execute(&mut self, opcode: u8) -> u32 {
        match opcode {
            0x00 => {}

            // LD rr,d16
            0x01 => { let val = self.read_pc_u16(); self.set_bc(val); }
            0x11 => { let val = self.read_pc_u16(); self.set_de(val); }
            0x21 => { let val = self.read_pc_u16(); self.set_hl(val); }
            0x31 => { self.sp = self.read_pc_u16(); }

            // LD (BC),A / LD (DE),A / LD (HL+),A / LD (HL-),A
            0x02 => { let addr = self.bc(); self.memory.write(addr, self.a); }
            0x12 => { let addr = self.de(); self.memory.write(addr, self.a); }
            0x22 => { let addr = self.hl(); self.memory.write(addr, self.a); self.set_hl(addr.wrapping_add(1)); }
            0x32 => { let addr = self.hl(); self.memory.write(addr, self.a); self.set_hl(addr.wrapping_sub(1)); }

            // INC rr / DEC rr
            0x03 => self.set_bc(self.bc().wrapping_add(1)),
            0x13 => self.set_de(self.de().wrapping_add(1)),
            0x23 => self.set_hl(self.hl().wrapping_add(1)),
            0x33 => self.sp = self.sp.wrapping_add(1),
            0x0B => self.set_bc(self.bc().wrapping_sub(1)),
            0x1B => self.set_de(self.de().wrapping_sub(1)),
            0x2B => self.set_hl(self.hl().wrapping_sub(1)),
            0x3B => self.sp = self.sp.wrapping_sub(1),

            // INC r / DEC r / LD r,d8
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let idx = opcode >> 3;
                let val = self.reg(idx);
                let result = self.inc(val);
                self.set_reg(idx, result);
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let idx = opcode >> 3;
                let val = self.reg(idx);
                let result = self.dec(val);
                self.set_reg(idx, result);
            }
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let val = self.read_pc();
                self.set_reg(opcode >> 3, val);
            }

            // RLCA / RRCA / RLA / RRA never set Z
            0x07 | 0x0F | 0x17 | 0x1F => {
                self.a = self.rotate_shift(opcode >> 3, self.a);
                self.set_flag(FLAG_Z, false);
            }

            // LD (a16),SP
            0x08 => {
                let addr = self.read_pc_u16();
                self.memory.write(addr, self.sp as u8);
                self.memory.write(addr.wrapping_add(1), (self.sp >> 8) as u8);
            }

            // ADD HL,rr
            0x09 => self.add_hl(self.bc()),
            0x19 => self.add_hl(self.de()),
            0x29 => self.add_hl(self.hl()),
            0x39 => self.add_hl(self.sp),

            // LD A,(BC) / LD A,(DE) / LD A,(HL+) / LD A,(HL-)
            0x0A => { let addr = self.bc(); self.a = self.memory.read(addr); }
            0x1A => { let addr = self.de(); self.a = self.memory.read(addr); }
            0x2A => { let addr = self.hl(); self.a = self.memory.read(addr); self.set_hl(addr.wrapping_add(1)); }
            0x3A => { let addr = self.hl(); self.a = self.memory.read(addr); self.set_hl(addr.wrapping_sub(1)); }

            // STOP / JR
            0x10 => self.stop(),
            0x18 => { let offset = self.read_pc() as i8; self.pc = self.pc.wrapping_add(offset as u16); }
            0x20 | 0x28 | 0x30 | 0x38 => return self.jr_if(self.condition(opcode)),

            // DAA / CPL / SCF / CCF
            0x27 => self.daa(),
            0x2F => { self.a = !self.a; self.set_flag(FLAG_N, true); self.set_flag(FLAG_H, true); }
            0x37 => { self.set_flag(FLAG_N, false); self.set_flag(FLAG_H, false); self.set_flag(FLAG_C, true); }
            0x3F => { self.set_flag(FLAG_N, false); self.set_flag(FLAG_H, false); self.set_flag(FLAG_C, !self.get_flag(FLAG_C)); }

            0x76 => return self.halt(),

            // LD r,r
            0x40..=0x7F => {
                let val = self.reg(opcode);
                self.set_reg(opcode >> 3, val);
            }

            // ADD/ADC/SUB/SBC/AND/XOR/OR/CP r
            0x80..=0xBF => {
                let val = self.reg(opcode);
                self.alu(opcode >> 3, val);
            }

            // Conditional RET / JP / CALL
            0xC0 | 0xC8 | 0xD0 | 0xD8 => return self.ret_if(self.condition(opcode)),
            0xC2 | 0xCA | 0xD2 | 0xDA => return self.jp_if(self.condition(opcode)),
            0xC4 | 0xCC | 0xD4 | 0xDC => return self.call_if(self.condition(opcode)),

            // POP / PUSH
            0xC1 => { let val = self.pop_u16(); self.set_bc(val); }
            0xD1 => { let val = self.pop_u16(); self.set_de(val); }
            0xE1 => { let val = self.pop_u16(); self.set_hl(val); }
            0xF1 => { let val = self.pop_u16(); self.set_af(val); }
            0xC5 => self.push_u16(self.bc()),
            0xD5 => self.push_u16(self.de()),
            0xE5 => self.push_u16(self.hl()),
            0xF5 => self.push_u16(self.af()),

            // ALU d8
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.read_pc();
                self.alu(opcode >> 3, val);
            }

            // RST n
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.push_u16(self.pc);
                self.pc = (opcode & 0x38) as u16;
            }

            0xC3 => self.pc = self.read_pc_u16(),
            0xC9 => self.pc = self.pop_u16(),
            0xCD => { let addr = self.read_pc_u16(); self.push_u16(self.pc); self.pc = addr; }
            0xD9 => { self.pc = self.pop_u16(); self.ime = true; self.ime_delay = 0; }
            0xE9 => self.pc = self.hl(),
            0xF9 => self.sp = self.hl(),

            0xCB => {
                let cb_op = self.read_pc();
                return self.execute_cb(cb_op);
            }

            // LDH (a8),A / LDH A,(a8) / LD (C),A / LD A,(C)
            0xE0 => { let offset = self.read_pc() as u16; self.memory.write(0xFF00 | offset, self.a); }
            0xF0 => { let offset = self.read_pc() as u16; self.a = self.memory.read(0xFF00 | offset); }
            0xE2 => { self.memory.write(0xFF00 | self.c as u16, self.a); }
            0xF2 => { self.a = self.memory.read(0xFF00 | self.c as u16); }

            // LD (a16),A / LD A,(a16)
            0xEA => { let addr = self.read_pc_u16(); self.memory.write(addr, self.a); }
            0xFA => { let addr = self.read_pc_u16(); self.a = self.memory.read(addr); }

            // DI / EI (EI lands after the next instruction, or before a HALT)
            0xF3 => { self.ime = false; self.ime_delay = 0; }
            0xFB => {
                let next = self.memory.read(self.pc);
                self.ime_delay = if self.ime_delay == 2 || next == 0x76 { 1 } else { 2 };
            }

            0xE8 => self.sp = self.sp_offset(),
            0xF8 => { let val = self.sp_offset(); self.set_hl(val); }

            // 0xD3 0xDB 0xDD 0xE3 0xE4 0xEB 0xEC 0xED 0xF4 0xFC 0xFD
            _ => {
                self.locked = true;
                log(LogCategory::Cpu, LogLevel::Warn, || {
                    format!(
                        "illegal opcode {:02X} at PC={:04X}, CPU locked",
                        opcode,
                        self.pc.wrapping_sub(1)
                    )
                });
            }
        }
        0
    }

    /// CB-prefixed opcode; returns clocks beyond the prefix's 4.
    fn execute_cb(&mut self, opcode: u8) -> u32 {
        let idx = opcode & 0x07;
        let bit = (opcode >> 3) & 0x07;
        let val = self.reg(idx);

        let result = match opcode >> 6 {
            0 => self.rotate_shift(bit, val),
            1 => {
                self.set_flag(FLAG_Z, val & (1 << bit) == 0);
                self.set_flag(FLAG_N, false);
                self.set_flag(FLAG_H, true);
                return if idx == 6 { 8 } else { 4 };
            }
            2 => val & !(1 << bit),
            _ => val | (1 << bit),
        };

        self.set_reg(idx, result);
        if idx == 6 {
            12
        } else {
            4
        }
    }
}
