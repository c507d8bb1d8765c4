//! Sound generator (`$FF10-$FF3F`).
//!
//! Four channels feed a stereo mixer:
//!
//! | Range         | Channel                     |
//! |---------------|-----------------------------|
//! | `$FF10-$FF14` | 1: pulse with sweep         |
//! | `$FF16-$FF19` | 2: pulse                    |
//! | `$FF1A-$FF1E` | 3: wave                     |
//! | `$FF20-$FF23` | 4: noise                    |
//! | `$FF24-$FF26` | NR50 volume, NR51 pan, NR52 |
//! | `$FF30-$FF3F` | wave RAM                    |
//!
//! The generator runs lazily. The bus hands it elapsed clocks with
//! [`Apu::accumulate`]; they are synthesized on the next register access or
//! [`Apu::sync`]. Synthesis averages channel output over 95-clock windows
//! (about 44150 Hz) and resamples that to the host rate.
//!
//! All timing here is in normal-speed clocks (4194304 Hz); double speed is
//! folded out by the bus.

mod envelope;
mod frame_sequencer;
mod length;
mod mixer;
mod noise;
mod pulse;
mod resampler;
mod wave;

use chroma_core::logging::{log, LogCategory, LogLevel};
use chroma_core::types::AudioSample;

use frame_sequencer::FrameSequencer;
use mixer::Mixer;
use noise::Noise;
use pulse::Pulse;
use resampler::Resampler;
use wave::Wave;

/// Clocks averaged into one emulated sample.
pub const SAMPLE_PERIOD: u32 = 95;
/// Emulated sample rate before resampling.
pub const NATIVE_RATE: f64 = 4_194_304.0 / SAMPLE_PERIOD as f64;

const NR52: u16 = 0xFF26;

/// OR-masks for reads of `$FF10-$FF2F`; unused and write-only bits read 1.
const READ_MASKS: [u8; 0x20] = [
    0x80, 0x3F, 0x00, 0xFF, 0xBF, // NR10-NR14
    0xFF, 0x3F, 0x00, 0xFF, 0xBF, // NR20-NR24
    0x7F, 0xFF, 0x9F, 0xFF, 0xBF, // NR30-NR34
    0xFF, 0xFF, 0x00, 0x00, 0xBF, // NR40-NR44
    0x00, 0x00, 0x70, // NR50-NR52
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

/// Lazy synthesis flushes by itself past this many pending clocks.
const SYNC_THRESHOLD: u32 = 1 << 20;

#[derive(Debug, Clone)]
pub struct Apu {
    power: bool,
    ch1: Pulse,
    ch2: Pulse,
    ch3: Wave,
    ch4: Noise,
    sequencer: FrameSequencer,
    mixer: Mixer,
    resampler: Resampler,
    /// Last written value of `$FF10-$FF25`
    regs: [u8; 0x16],
    pending: u32,
}

impl Apu {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            power: false,
            ch1: Pulse::new(true),
            ch2: Pulse::new(false),
            ch3: Wave::new(),
            ch4: Noise::new(),
            sequencer: FrameSequencer::new(),
            mixer: Mixer::new(),
            resampler: Resampler::new(NATIVE_RATE, sample_rate),
            regs: [0; 0x16],
            pending: 0,
        }
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.resampler.set_speed(speed);
    }

    /// Queue `clocks` of elapsed time for later synthesis.
    pub fn accumulate(&mut self, clocks: u32) {
        self.pending += clocks;
        if self.pending >= SYNC_THRESHOLD {
            self.sync();
        }
    }

    /// Synthesize all pending time.
    pub fn sync(&mut self) {
        let mut left = std::mem::take(&mut self.pending);
        while left > 0 {
            let window = SAMPLE_PERIOD - self.mixer.window_dots();
            let run = left.min(window).min(self.sequencer.until_step());

            let areas = [
                self.ch1.advance(run),
                self.ch2.advance(run),
                self.ch3.advance(run),
                self.ch4.advance(run),
            ];
            self.mixer.accumulate(areas, run);
            if self.mixer.window_dots() == SAMPLE_PERIOD {
                let (l, r) = self.mixer.take_sample();
                self.resampler.push(l, r);
            }

            if self.power {
                if let Some(events) = self.sequencer.advance(run) {
                    self.clock_sequencer(events);
                }
            }
            left -= run;
        }
    }

    fn clock_sequencer(&mut self, events: frame_sequencer::StepEvents) {
        if events.length {
            self.ch1.clock_length();
            self.ch2.clock_length();
            self.ch3.clock_length();
            self.ch4.clock_length();
        }
        if events.sweep {
            self.ch1.clock_sweep();
        }
        if events.envelope {
            self.ch1.envelope.clock();
            self.ch2.envelope.clock();
            self.ch4.envelope.clock();
        }
    }

    /// Deliver buffered output in `frames`-sized chunks, or drop it when
    /// `enabled` is false.
    pub fn drain(&mut self, frames: usize, enabled: bool, deliver: impl FnMut(&[AudioSample])) {
        if enabled {
            self.resampler.drain_chunks(frames, deliver);
        } else {
            self.resampler.clear();
        }
    }

    fn channel_status(&self) -> u8 {
        (self.ch1.enabled() as u8)
            | (self.ch2.enabled() as u8) << 1
            | (self.ch3.enabled() as u8) << 2
            | (self.ch4.enabled() as u8) << 3
    }

    /// NR52 as software sees it.
    pub fn status(&self) -> u8 {
        0x70 | (self.power as u8) << 7 | self.channel_status()
    }

    pub fn read_register(&mut self, addr: u16) -> u8 {
        self.sync();
        match addr {
            NR52 => self.status(),
            0xFF10..=0xFF25 => self.regs[(addr - 0xFF10) as usize] | READ_MASKS[(addr - 0xFF10) as usize],
            0xFF27..=0xFF2F => 0xFF,
            0xFF30..=0xFF3F => self.ch3.read_ram((addr - 0xFF30) as usize),
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, addr: u16, val: u8) {
        self.sync();
        match addr {
            NR52 => self.write_power(val & 0x80 != 0),
            0xFF30..=0xFF3F => self.ch3.write_ram((addr - 0xFF30) as usize, val),
            0xFF10..=0xFF25 if self.power => {
                self.regs[(addr - 0xFF10) as usize] = val;
                self.route(addr, val);
            }
            _ => {}
        }
    }

    fn route(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF10..=0xFF14 => self.ch1.write(addr - 0xFF10, val),
            0xFF15..=0xFF19 => self.ch2.write(addr - 0xFF15, val),
            0xFF1A..=0xFF1E => self.ch3.write(addr - 0xFF1A, val),
            0xFF1F..=0xFF23 => self.ch4.write(addr - 0xFF1F, val),
            0xFF24 => self.mixer.nr50 = val,
            0xFF25 => self.mixer.nr51 = val,
            _ => {}
        }
    }

    fn write_power(&mut self, on: bool) {
        if on == self.power {
            return;
        }
        if on {
            self.sequencer.reset();
            log(LogCategory::Apu, LogLevel::Debug, || "sound powered on".to_string());
        } else {
            let wave = *self.ch3.ram();
            self.ch1 = Pulse::new(true);
            self.ch2 = Pulse::new(false);
            self.ch3 = Wave::new();
            for (i, &b) in wave.iter().enumerate() {
                self.ch3.write_ram(i, b);
            }
            self.ch4 = Noise::new();
            self.regs = [0; 0x16];
            self.mixer.nr50 = 0;
            self.mixer.nr51 = 0;
            log(LogCategory::Apu, LogLevel::Debug, || "sound powered off".to_string());
        }
        self.power = on;
    }

    /// Rebuild channel state from a register image (`io[n]` is `$FF00+n`)
    /// without trigger side effects. NR52's low bits select which channels
    /// come back enabled.
    pub fn restore_io(&mut self, io: &[u8]) {
        self.pending = 0;
        self.power = io[0x26] & 0x80 != 0;
        self.sequencer.reset();
        for i in 0..16 {
            self.ch3.write_ram(i, io[0x30 + i]);
        }
        if self.power {
            self.regs.copy_from_slice(&io[0x10..0x26]);
        } else {
            self.regs = [0; 0x16];
        }
        let status = if self.power { io[0x26] } else { 0 };
        let block = |base: usize| -> [u8; 5] {
            let mut out = [0u8; 5];
            out.copy_from_slice(&self.regs[base..base + 5]);
            out
        };
        let (r1, r2, r3, r4) = (block(0x00), block(0x05), block(0x0A), block(0x0F));
        self.ch1.restore(&r1, status & 0x01 != 0);
        self.ch2.restore(&r2, status & 0x02 != 0);
        self.ch3.restore(&r3, status & 0x04 != 0);
        self.ch4.restore(&r4, status & 0x08 != 0);
        self.mixer.nr50 = self.regs[0x14];
        self.mixer.nr51 = self.regs[0x15];
    }

    /// Register image for `$FF10-$FF3F` as last written, with live NR52.
    pub fn io_image(&self, io: &mut [u8]) {
        io[0x10..0x26].copy_from_slice(&self.regs);
        io[0x26] = self.status();
        io[0x30..0x40].copy_from_slice(self.ch3.ram());
    }
}
