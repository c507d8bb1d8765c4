use chroma_core::sink::NullSink;
use chroma_core::System;
use chroma_gb::{EngineConfig, GbSystem, DOTS_PER_FRAME};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Busy program: copies WRAM around, rewrites SCX every pass and keeps a
/// square wave running, so CPU, PPU and APU all do real work.
fn busy_rom(color: bool) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x104].copy_from_slice(&[0x00, 0xC3, 0x50, 0x01]);
    rom[0x134..0x139].copy_from_slice(b"BENCH");
    rom[0x143] = if color { 0x80 } else { 0x00 };
    #[rustfmt::skip]
    let program = [
        0x3E, 0xF0, 0xE0, 0x12, // NR12
        0x3E, 0x80, 0xE0, 0x11, // NR11
        0x3E, 0x87, 0xE0, 0x14, // NR14: trigger
        0x21, 0x00, 0xC0,       // LD HL,0xC000
        0x11, 0x00, 0xC8,       // LD DE,0xC800
        0x06, 0x00,             // LD B,0
        0x2A,                   // LD A,(HL+)
        0x12,                   // LD (DE),A
        0x13,                   // INC DE
        0x05,                   // DEC B
        0x20, 0xFA,             // JR NZ,-6
        0xF0, 0x43,             // LDH A,(SCX)
        0x3C,                   // INC A
        0xE0, 0x43,             // LDH (SCX),A
        0xC3, 0x5C, 0x01,       // JP 0x015C
    ];
    rom[0x150..0x150 + program.len()].copy_from_slice(&program);
    rom
}

fn system(color: bool, audio: bool) -> GbSystem {
    let config = EngineConfig {
        audio_enabled: audio,
        ..EngineConfig::default()
    };
    let mut sys = GbSystem::with_config(config, Box::new(NullSink), Box::new(NullSink));
    sys.insert_cartridge(&busy_rom(color)).unwrap();
    sys
}

fn bench_step_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("gb_step_frame");

    for (name, color) in [("monochrome", false), ("color", true)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &color, |b, &color| {
            let mut sys = system(color, true);
            b.iter(|| {
                let frame = sys.step_frame().unwrap();
                black_box(frame.pixels[0]);
            });
        });
    }

    group.finish();
}

fn bench_without_audio(c: &mut Criterion) {
    c.bench_function("gb_frame_audio_disabled", |b| {
        let mut sys = system(false, false);
        b.iter(|| {
            black_box(sys.advance_cycles(DOTS_PER_FRAME).unwrap());
        });
    });
}

fn bench_snapshot(c: &mut Criterion) {
    c.bench_function("gb_state_snapshot", |b| {
        let mut sys = system(true, true);
        sys.advance_cycles(DOTS_PER_FRAME).unwrap();
        b.iter(|| {
            let snapshot = sys.state_snapshot().unwrap();
            sys.load_state_snapshot(black_box(&snapshot)).unwrap();
        });
    });
}

criterion_group!(benches, bench_step_frame, bench_without_audio, bench_snapshot);
criterion_main!(benches);
