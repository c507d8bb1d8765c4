//! Shared fixtures: a tiny ROM builder, a hand-driven clock and capturing sinks.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chroma_core::sink::{AudioSink, VideoSink};
use chroma_core::types::{AudioSample, Frame};
use chroma_gb::TimeSource;

/// Where `RomBuilder::program` places code; 0x0100 jumps here.
pub const PROGRAM: usize = 0x0150;

pub struct RomBuilder {
    rom: Vec<u8>,
}

impl RomBuilder {
    /// Header for `cartridge_type` with the given size codes and CGB flag.
    pub fn new(cartridge_type: u8, rom_code: u8, ram_code: u8, color: u8) -> Self {
        let mut rom = vec![0u8; 0x8000 << rom_code];
        rom[0x100..0x104].copy_from_slice(&[0x00, 0xC3, 0x50, 0x01]); // NOP; JP 0x0150
        rom[0x134..0x13C].copy_from_slice(b"TESTCART");
        rom[0x143] = color;
        rom[0x147] = cartridge_type;
        rom[0x148] = rom_code;
        rom[0x149] = ram_code;
        Self { rom }
    }

    pub fn program(self, code: &[u8]) -> Self {
        self.at(PROGRAM, code)
    }

    pub fn at(mut self, addr: usize, bytes: &[u8]) -> Self {
        self.rom[addr..addr + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.rom
    }
}

#[derive(Clone)]
pub struct ManualClock(pub Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_millis)))
    }

    pub fn advance_millis(&self, millis: u64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Keeps every frame handed to it.
#[derive(Clone, Default)]
pub struct FrameCapture(pub Arc<Mutex<Vec<Frame>>>);

impl FrameCapture {
    pub fn take(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl VideoSink for FrameCapture {
    fn frame_ready(&mut self, frame: &Frame) {
        self.0.lock().unwrap().push(frame.clone());
    }
}

/// Keeps every sample handed to it.
#[derive(Clone, Default)]
pub struct SampleCapture(pub Arc<Mutex<Vec<AudioSample>>>);

impl SampleCapture {
    pub fn take(&self) -> Vec<AudioSample> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl AudioSink for SampleCapture {
    fn push_samples(&mut self, samples: &[AudioSample]) {
        self.0.lock().unwrap().extend_from_slice(samples);
    }
}
