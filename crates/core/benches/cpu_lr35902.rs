use chroma_core::cpu_lr35902::{CpuLr35902, MemoryLr35902};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Flat RAM with a small arithmetic loop at 0x0100
struct BenchMemory {
    ram: Vec<u8>,
}

impl BenchMemory {
    fn new() -> Self {
        let mut ram = vec![0; 0x10000];
        let program = [
            0x3E, 0x42, // LD A,0x42
            0x06, 0x10, // LD B,0x10
            0x21, 0x00, 0xC0, // LD HL,0xC000
            0x77, // LD (HL),A
            0x04, // INC B
            0x80, // ADD A,B
            0xCB, 0x37, // SWAP A
            0x05, // DEC B
            0x20, 0xF8, // JR NZ,-8
            0xC3, 0x00, 0x01, // JP 0x0100
        ];
        ram[0x0100..0x0100 + program.len()].copy_from_slice(&program);
        Self { ram }
    }
}

impl MemoryLr35902 for BenchMemory {
    fn read(&mut self, addr: u16) -> u8 {
        self.ram[addr as usize]
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.ram[addr as usize] = val;
    }
}

fn bench_cpu_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_lr35902_step");

    group.bench_function("single_instruction", |b| {
        b.iter(|| {
            let mut cpu = CpuLr35902::new(BenchMemory::new());
            cpu.reset_post_boot(false);
            cpu.step(70_224);
            black_box(cpu.a);
        });
    });

    group.finish();
}

fn bench_cpu_multiple_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_lr35902_multiple_steps");

    for step_count in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(step_count),
            step_count,
            |b, &count| {
                let mut cpu = CpuLr35902::new(BenchMemory::new());
                b.iter(|| {
                    cpu.reset_post_boot(false);
                    for _ in 0..count {
                        cpu.step(70_224);
                    }
                    black_box(cpu.cycles);
                });
            },
        );
    }

    group.finish();
}

fn bench_cpu_frame(c: &mut Criterion) {
    c.bench_function("cpu_lr35902_frame_budget", |b| {
        let mut cpu = CpuLr35902::new(BenchMemory::new());
        cpu.reset_post_boot(true);
        b.iter(|| {
            let mut remaining: i64 = 70_224;
            while remaining > 0 {
                remaining -= cpu.step(remaining as u32) as i64;
            }
            black_box(cpu.pc);
        });
    });
}

criterion_group!(
    benches,
    bench_cpu_step,
    bench_cpu_multiple_steps,
    bench_cpu_frame
);
criterion_main!(benches);
