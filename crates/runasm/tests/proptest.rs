//! Property-based tests: invariants across randomly generated inputs,
//! complementing the byte-exact unit and cross-validation tests.

use iced_x86::{Decoder, DecoderOptions, Mnemonic};
use proptest::prelude::*;
use runasm::Register::*;
use runasm::{instruction, label, mem, Arch, AssemblyUnit, Instruction, Operand, Register};

fn ins64(mnemonic: &str, ops: Vec<Operand>) -> Instruction {
    instruction(mnemonic, ops, Arch::X86_64).unwrap()
}

/// A pool of valid 64-bit instruction constructors.
fn valid_insn() -> impl Strategy<Value = Instruction> {
    prop::sample::select(vec![
        ins64("nop", vec![]),
        ins64("ret", vec![]),
        ins64("leave", vec![]),
        ins64("int3", vec![]),
        ins64("syscall", vec![]),
        ins64("push", vec![Rbp.into()]),
        ins64("pop", vec![Rbp.into()]),
        ins64("mov", vec![Rax.into(), Rbx.into()]),
        ins64("mov", vec![Eax.into(), 42.into()]),
        ins64("mov", vec![Rax.into(), mem(Rbx).index(Rcx, 4).disp(16).into()]),
        ins64("mov", vec![mem(R13).into(), Edx.into()]),
        ins64("add", vec![Eax.into(), 1.into()]),
        ins64("add", vec![Rax.into(), Rbx.into()]),
        ins64("sub", vec![Rsp.into(), 40.into()]),
        ins64("cmp", vec![Eax.into(), 100.into()]),
        ins64("test", vec![Ecx.into(), Ecx.into()]),
        ins64("inc", vec![Eax.into()]),
        ins64("dec", vec![Rcx.into()]),
        ins64("imul", vec![Eax.into(), Ebx.into()]),
        ins64("idiv", vec![Rcx.into()]),
        ins64("lea", vec![Rax.into(), mem(Rbx).disp(8).into()]),
        ins64("call", vec![Rax.into()]),
        ins64("movsd", vec![Xmm0.into(), Xmm1.into()]),
        ins64("fabs", vec![]),
    ])
}

/// 64-bit general-purpose registers for REX-necessity checks.
fn gp64() -> impl Strategy<Value = Register> {
    prop::sample::select(vec![
        Rax, Rcx, Rdx, Rbx, Rsp, Rbp, Rsi, Rdi, R8, R9, R10, R11, R12, R13, R14, R15,
    ])
}

proptest! {
    /// Construction never panics, whatever the mnemonic string.
    #[test]
    fn no_panic_on_arbitrary_mnemonic(name in "\\PC{0,12}") {
        let _ = instruction(&name, vec![], Arch::X86_64);
        let _ = instruction(&name, vec![Eax.into()], Arch::X86);
    }

    /// Construction never panics for arbitrary immediates.
    #[test]
    fn no_panic_on_arbitrary_immediate(value in any::<i64>()) {
        let _ = instruction("mov", vec![Rax.into(), Operand::Immediate(value)], Arch::X86_64);
        let _ = instruction("push", vec![Operand::Immediate(value)], Arch::X86_64);
        let _ = instruction("add", vec![Eax.into(), Operand::Immediate(value)], Arch::X86);
    }

    /// Arbitrary displacements either encode or fail cleanly.
    #[test]
    fn no_panic_on_arbitrary_displacement(disp in any::<i64>()) {
        let _ = instruction(
            "mov",
            vec![Rax.into(), mem(Rbx).disp(disp).into()],
            Arch::X86_64,
        );
    }

    /// Encoding is deterministic.
    #[test]
    fn deterministic(insn in valid_insn()) {
        let mut a = AssemblyUnit::new(Arch::X86_64);
        a.push(insn.clone()).unwrap();
        let mut b = AssemblyUnit::new(Arch::X86_64);
        b.push(insn).unwrap();
        let a_resolved = a.resolve().unwrap();
        let b_resolved = b.resolve().unwrap();
        prop_assert_eq!(a_resolved.bytes(), b_resolved.bytes());
    }

    /// Every valid instruction stays within the 15-byte x86 limit.
    #[test]
    fn length_bounds(insn in valid_insn()) {
        prop_assert!((1..=15).contains(&insn.len()));
    }

    /// A unit's output length is the sum of its instruction lengths.
    #[test]
    fn lengths_are_additive(insns in prop::collection::vec(valid_insn(), 1..12)) {
        let mut unit = AssemblyUnit::new(Arch::X86_64);
        let mut expected = 0usize;
        for insn in insns {
            expected += insn.len();
            unit.push(insn).unwrap();
        }
        prop_assert_eq!(unit.resolve().unwrap().len(), expected);
    }

    /// Size resolution is stable: resolving twice yields identical output.
    #[test]
    fn size_stability(
        insns in prop::collection::vec(valid_insn(), 0..10),
        pad in 0usize..150,
    ) {
        let mut unit = AssemblyUnit::new(Arch::X86_64);
        unit.label("start").unwrap();
        for insn in insns {
            unit.push(insn).unwrap();
        }
        for _ in 0..pad {
            unit.push(ins64("nop", vec![])).unwrap();
        }
        unit.push(ins64("jmp", vec![label("start")])).unwrap();
        let first = unit.resolve().unwrap();
        let second = unit.resolve().unwrap();
        prop_assert_eq!(first.bytes(), second.bytes());
        prop_assert_eq!(first.labels(), second.labels());
    }

    /// Decoded branch displacements reconstruct the label offset exactly,
    /// across the rel8/rel32 boundary.
    #[test]
    fn displacement_math(pad in 0usize..300) {
        let mode = Arch::X86_64;
        let mut unit = AssemblyUnit::new(mode);
        unit.push(ins64("jmp", vec![label("end")])).unwrap();
        for _ in 0..pad {
            unit.push(ins64("nop", vec![])).unwrap();
        }
        unit.label("end").unwrap();
        unit.push(ins64("ret", vec![])).unwrap();
        let result = unit.resolve().unwrap();
        let end = result.label_offset("end").unwrap();

        let mut decoder = Decoder::with_ip(64, result.bytes(), 0, DecoderOptions::NONE);
        let decoded = decoder.decode();
        prop_assert_eq!(decoded.mnemonic(), Mnemonic::Jmp);
        prop_assert_eq!(decoded.near_branch_target(), end);
        // The short form appears exactly when the distance allows it.
        prop_assert_eq!(decoded.len(), if pad <= 127 { 2 } else { 5 });
    }

    /// A REX prefix appears iff one of W, R, B is needed for a 64-bit
    /// register move.
    #[test]
    fn rex_necessity(dst in gp64(), src in gp64()) {
        let mut unit = AssemblyUnit::new(Arch::X86_64);
        unit.push(ins64("mov", vec![dst.into(), src.into()])).unwrap();
        let bytes = unit.resolve().unwrap().into_bytes();
        // 64-bit operands always need REX.W; R/B mirror the extension
        // bits of the two registers.
        let expected_rex = 0x48u8
            | (u8::from(src.is_extended()) << 2)
            | u8::from(dst.is_extended());
        prop_assert_eq!(bytes[0], expected_rex);
        prop_assert_eq!(bytes.len(), 3);
    }

    /// 32-bit register moves emit REX only for operands that demand it.
    #[test]
    fn no_gratuitous_rex(
        dst in prop::sample::select(vec![Eax, Ecx, Edx, Ebx, Esi, Edi]),
        src in prop::sample::select(vec![Eax, Ecx, Edx, Ebx, Esi, Edi]),
    ) {
        let mut unit = AssemblyUnit::new(Arch::X86_64);
        unit.push(ins64("mov", vec![dst.into(), src.into()])).unwrap();
        let bytes = unit.resolve().unwrap().into_bytes();
        prop_assert_eq!(bytes.len(), 2);
        prop_assert!(bytes[0] & 0xF0 != 0x40);
    }

    /// SIB appears iff ModR/M selects it (r/m = 100, mod != 11), checked
    /// through the independent decoder consuming the whole instruction.
    #[test]
    fn modrm_sib_consistency(
        base in gp64(),
        index in prop::sample::select(vec![Rax, Rcx, Rdx, Rbx, Rbp, Rsi, Rdi, R8, R15]),
        scale in prop::sample::select(vec![1u8, 2, 4, 8]),
        disp in -0x200i64..0x200,
    ) {
        let insn = instruction(
            "mov",
            vec![Rax.into(), mem(base).index(index, scale).disp(disp).into()],
            Arch::X86_64,
        ).unwrap();
        let mut unit = AssemblyUnit::new(Arch::X86_64);
        unit.push(insn).unwrap();
        let bytes = unit.resolve().unwrap().into_bytes();

        let mut decoder = Decoder::with_ip(64, &bytes, 0, DecoderOptions::NONE);
        let decoded = decoder.decode();
        prop_assert_eq!(decoded.mnemonic(), Mnemonic::Mov);
        prop_assert_eq!(decoded.len(), bytes.len());
        prop_assert_eq!(decoded.memory_displacement64() as i64, disp);
        // An indexed form must have gone through a SIB byte: the byte
        // after REX+opcode has r/m = 100.
        let modrm = bytes[2];
        prop_assert_eq!(modrm & 0b111, 0b100);
        prop_assert!(modrm >> 6 != 0b11);
    }
}
