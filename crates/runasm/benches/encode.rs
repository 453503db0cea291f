//! Encoding benchmarks.
//!
//! Measures single-instruction encode latency and label-heavy unit
//! resolution. Run with `cargo bench`.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use runasm::Register::*;
use runasm::{instruction, label, mem, Arch, AssemblyUnit};

fn bench_single_instruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_instruction");

    group.bench_function("nop", |b| {
        b.iter(|| instruction(black_box("nop"), vec![], Arch::X86_64).unwrap())
    });

    group.bench_function("mov_reg_imm", |b| {
        b.iter(|| {
            instruction(
                black_box("mov"),
                vec![Rax.into(), 0x1234.into()],
                Arch::X86_64,
            )
            .unwrap()
        })
    });

    group.bench_function("add_reg_reg", |b| {
        b.iter(|| {
            instruction(black_box("add"), vec![Rax.into(), Rbx.into()], Arch::X86_64).unwrap()
        })
    });

    group.bench_function("mov_mem_sib", |b| {
        b.iter(|| {
            instruction(
                black_box("mov"),
                vec![mem(Rax).index(Rcx, 8).disp(0x10).into(), Rdx.into()],
                Arch::X86_64,
            )
            .unwrap()
        })
    });

    group.finish();
}

fn bench_unit_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("unit_resolution");

    group.bench_function("labels_100", |b| {
        b.iter(|| {
            let mode = Arch::X86_64;
            let mut unit = AssemblyUnit::new(mode);
            for i in 0..100 {
                unit.label(&format!("l{i}")).unwrap();
                unit.push(instruction("add", vec![Eax.into(), 1.into()], mode).unwrap())
                    .unwrap();
                let target = format!("l{}", i / 2);
                unit.push(instruction("jne", vec![label(&target)], mode).unwrap())
                    .unwrap();
            }
            unit.push(instruction("ret", vec![], mode).unwrap()).unwrap();
            black_box(unit.resolve().unwrap())
        })
    });

    group.bench_function("straight_line_500", |b| {
        b.iter(|| {
            let mode = Arch::X86_64;
            let mut unit = AssemblyUnit::new(mode);
            for _ in 0..100 {
                unit.push(instruction("mov", vec![Rax.into(), Rbx.into()], mode).unwrap())
                    .unwrap();
                unit.push(instruction("add", vec![Rcx.into(), Rdx.into()], mode).unwrap())
                    .unwrap();
                unit.push(instruction("sub", vec![Rsi.into(), Rdi.into()], mode).unwrap())
                    .unwrap();
                unit.push(instruction("test", vec![R8.into(), R9.into()], mode).unwrap())
                    .unwrap();
                unit.push(instruction("nop", vec![], mode).unwrap()).unwrap();
            }
            black_box(unit.resolve().unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_single_instruction, bench_unit_resolution);
criterion_main!(benches);
