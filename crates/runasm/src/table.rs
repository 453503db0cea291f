//! The instruction encoding table: for each mnemonic, an ordered list of
//! encoding rows transcribed from the Intel reference.
//!
//! Rows are plain const records; adding an instruction is a data entry.
//! Row order matters: under strict-parity selection the first matching
//! row wins, and it breaks ties between equally short encodings
//! otherwise.

use crate::arch::Arch;

/// Operand signature codes, following the Intel reference notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSig {
    /// General-purpose register of exactly 8 bits.
    R8,
    /// General-purpose register of exactly 16 bits.
    R16,
    /// General-purpose register of exactly 32 bits.
    R32,
    /// General-purpose register of exactly 64 bits.
    R64,
    /// 8-bit register or memory.
    Rm8,
    /// 16-bit register or memory.
    Rm16,
    /// 32-bit register or memory.
    Rm32,
    /// 64-bit register or memory.
    Rm64,
    /// Memory of any width (effective-address computations).
    M,
    /// 32-bit memory operand.
    M32,
    /// 64-bit memory operand.
    M64,
    /// 80-bit memory operand.
    M80,
    /// 8-bit immediate.
    Imm8,
    /// 16-bit immediate.
    Imm16,
    /// 32-bit immediate.
    Imm32,
    /// 64-bit immediate.
    Imm64,
    /// 8-bit signed relative displacement.
    Rel8,
    /// 32-bit signed relative displacement.
    Rel32,
    /// XMM register.
    Xmm,
    /// XMM register or 64-bit memory.
    XmmM64,
    /// Any x87 stack register `st(i)`.
    St,
    /// The x87 stack top `st(0)` exactly.
    St0,
}

impl OperandSig {
    /// Intel-reference spelling, used in diagnostics.
    pub fn name(self) -> &'static str {
        use OperandSig::*;
        match self {
            R8 => "r8",
            R16 => "r16",
            R32 => "r32",
            R64 => "r64",
            Rm8 => "r/m8",
            Rm16 => "r/m16",
            Rm32 => "r/m32",
            Rm64 => "r/m64",
            M => "m",
            M32 => "m32",
            M64 => "m64",
            M80 => "m80",
            Imm8 => "imm8",
            Imm16 => "imm16",
            Imm32 => "imm32",
            Imm64 => "imm64",
            Rel8 => "rel8",
            Rel32 => "rel32",
            Xmm => "xmm",
            XmmM64 => "xmm/m64",
            St => "st(i)",
            St0 => "st(0)",
        }
    }
}

/// How operand slots map into encoding fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncTag {
    /// reg ← operand 0, r/m ← operand 1.
    Rm,
    /// r/m ← operand 0, reg ← operand 1.
    Mr,
    /// r/m ← operand 0, immediate ← operand 1.
    Mi,
    /// opcode low 3 bits ← operand 0 register index, immediate ← operand 1.
    Oi,
    /// opcode low 3 bits ← register index of the given operand slot.
    O(u8),
    /// reg ← operand 0, r/m ← operand 1, immediate ← operand 2.
    Rmi,
    /// r/m ← operand 0; reg field holds the `/digit` opcode extension.
    M,
    /// immediate ← operand 0.
    I,
    /// relative displacement ← operand 0.
    D,
    /// no operands in encoding fields.
    Zo,
}

/// One encoding alternative for a mnemonic.
#[derive(Debug, Clone, Copy)]
pub struct InstrForm {
    /// Operand signature, one code per operand.
    pub sig: &'static [OperandSig],
    /// Opcode bytes (escape bytes included, mandatory prefix excluded).
    pub opcode: &'static [u8],
    /// Operand-to-field mapping.
    pub tag: EncTag,
    /// `/digit` opcode extension carried in the ModR/M reg field, or -1.
    pub ext: i8,
    /// Whether the row requires REX.W.
    pub rex_w: bool,
    /// Mandatory prefix emitted before REX (0 = none).
    pub prefix: u8,
    /// Legal in 64-bit mode.
    pub m64: bool,
    /// Legal in 32-bit mode.
    pub m32: bool,
}

impl InstrForm {
    /// Whether the row may be used in `mode`.
    #[inline]
    pub fn legal_in(&self, mode: Arch) -> bool {
        match mode {
            Arch::X86 => self.m32,
            Arch::X86_64 => self.m64,
        }
    }

    /// The row's signature rendered for diagnostics, e.g. `"r/m64, imm8"`.
    pub fn sig_names(&self) -> String {
        self.sig
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

const fn f(
    sig: &'static [OperandSig],
    opcode: &'static [u8],
    tag: EncTag,
    ext: i8,
    rex_w: bool,
    prefix: u8,
    m64: bool,
    m32: bool,
) -> InstrForm {
    InstrForm {
        sig,
        opcode,
        tag,
        ext,
        rex_w,
        prefix,
        m64,
        m32,
    }
}

use OperandSig::*;

// ─── Procedure management ──────────────────────────────────────────────

const PUSH: &[InstrForm] = &[
    f(&[Rm16], &[0xFF], EncTag::M, 6, false, 0, true, true),
    f(&[Rm32], &[0xFF], EncTag::M, 6, false, 0, false, true),
    f(&[Rm64], &[0xFF], EncTag::M, 6, false, 0, true, false),
    f(&[R16], &[0x50], EncTag::O(0), -1, false, 0, true, true),
    f(&[R32], &[0x50], EncTag::O(0), -1, false, 0, false, true),
    f(&[R64], &[0x50], EncTag::O(0), -1, false, 0, true, false),
    f(&[Imm8], &[0x6A], EncTag::I, -1, false, 0, true, true),
    f(&[Imm32], &[0x68], EncTag::I, -1, false, 0, true, true),
];

const POP: &[InstrForm] = &[
    f(&[Rm16], &[0x8F], EncTag::M, 0, false, 0, true, true),
    f(&[Rm32], &[0x8F], EncTag::M, 0, false, 0, false, true),
    f(&[Rm64], &[0x8F], EncTag::M, 0, false, 0, true, false),
    f(&[R16], &[0x58], EncTag::O(0), -1, false, 0, true, true),
    f(&[R32], &[0x58], EncTag::O(0), -1, false, 0, false, true),
    f(&[R64], &[0x58], EncTag::O(0), -1, false, 0, true, false),
];

const RET: &[InstrForm] = &[
    f(&[Imm16], &[0xC2], EncTag::I, -1, false, 0, true, true),
    f(&[], &[0xC3], EncTag::Zo, -1, false, 0, true, true),
];

const LEAVE: &[InstrForm] = &[f(&[], &[0xC9], EncTag::Zo, -1, false, 0, true, true)];

const CALL: &[InstrForm] = &[
    f(&[Rel32], &[0xE8], EncTag::D, -1, false, 0, true, true),
    f(&[Rm16], &[0xFF], EncTag::M, 2, false, 0, false, true),
    f(&[Rm32], &[0xFF], EncTag::M, 2, false, 0, false, true),
    f(&[Rm64], &[0xFF], EncTag::M, 2, false, 0, true, false),
];

// ─── Data movement ─────────────────────────────────────────────────────

const MOV: &[InstrForm] = &[
    f(&[Rm8, R8], &[0x88], EncTag::Mr, -1, false, 0, true, true),
    f(&[Rm16, R16], &[0x89], EncTag::Mr, -1, false, 0, true, true),
    f(&[Rm32, R32], &[0x89], EncTag::Mr, -1, false, 0, true, true),
    f(&[Rm64, R64], &[0x89], EncTag::Mr, -1, true, 0, true, false),
    f(&[R8, Rm8], &[0x8A], EncTag::Rm, -1, false, 0, true, true),
    f(&[R16, Rm16], &[0x8B], EncTag::Rm, -1, false, 0, true, true),
    f(&[R32, Rm32], &[0x8B], EncTag::Rm, -1, false, 0, true, true),
    f(&[R64, Rm64], &[0x8B], EncTag::Rm, -1, true, 0, true, false),
    f(&[R8, Imm8], &[0xB0], EncTag::Oi, -1, false, 0, true, true),
    f(&[R16, Imm16], &[0xB8], EncTag::Oi, -1, false, 0, true, true),
    f(&[R32, Imm32], &[0xB8], EncTag::Oi, -1, false, 0, true, true),
    f(&[R64, Imm64], &[0xB8], EncTag::Oi, -1, true, 0, true, false),
    f(&[Rm8, Imm8], &[0xC6], EncTag::Mi, 0, false, 0, true, true),
    f(&[Rm16, Imm16], &[0xC7], EncTag::Mi, 0, false, 0, true, true),
    f(&[Rm32, Imm32], &[0xC7], EncTag::Mi, 0, false, 0, true, true),
    f(&[Rm64, Imm32], &[0xC7], EncTag::Mi, 0, true, 0, true, false),
];

const MOVSD: &[InstrForm] = &[
    f(&[Xmm, XmmM64], &[0x0F, 0x10], EncTag::Rm, -1, false, 0xF2, true, true),
    f(&[M64, Xmm], &[0x0F, 0x11], EncTag::Mr, -1, false, 0xF2, true, true),
];

const LEA: &[InstrForm] = &[
    f(&[R16, M], &[0x8D], EncTag::Rm, -1, false, 0, true, true),
    f(&[R32, M], &[0x8D], EncTag::Rm, -1, false, 0, true, true),
    f(&[R64, M], &[0x8D], EncTag::Rm, -1, true, 0, true, false),
];

// ─── Arithmetic and logic ──────────────────────────────────────────────

/// The ALU family shares one row shape parameterized by the `/digit`
/// extension and base opcode column.
macro_rules! alu {
    ($ext:expr, $base:expr) => {
        &[
            f(&[Rm8, Imm8], &[0x80], EncTag::Mi, $ext, false, 0, true, true),
            f(&[Rm16, Imm16], &[0x81], EncTag::Mi, $ext, false, 0, true, true),
            f(&[Rm32, Imm32], &[0x81], EncTag::Mi, $ext, false, 0, true, true),
            f(&[Rm64, Imm32], &[0x81], EncTag::Mi, $ext, true, 0, true, false),
            f(&[Rm16, Imm8], &[0x83], EncTag::Mi, $ext, false, 0, true, true),
            f(&[Rm32, Imm8], &[0x83], EncTag::Mi, $ext, false, 0, true, true),
            f(&[Rm64, Imm8], &[0x83], EncTag::Mi, $ext, true, 0, true, false),
            f(&[Rm8, R8], &[$base], EncTag::Mr, -1, false, 0, true, true),
            f(&[Rm16, R16], &[$base + 1], EncTag::Mr, -1, false, 0, true, true),
            f(&[Rm32, R32], &[$base + 1], EncTag::Mr, -1, false, 0, true, true),
            f(&[Rm64, R64], &[$base + 1], EncTag::Mr, -1, true, 0, true, false),
            f(&[R8, Rm8], &[$base + 2], EncTag::Rm, -1, false, 0, true, true),
            f(&[R16, Rm16], &[$base + 3], EncTag::Rm, -1, false, 0, true, true),
            f(&[R32, Rm32], &[$base + 3], EncTag::Rm, -1, false, 0, true, true),
            f(&[R64, Rm64], &[$base + 3], EncTag::Rm, -1, true, 0, true, false),
        ]
    };
}

const ADD: &[InstrForm] = alu!(0, 0x00);
const SUB: &[InstrForm] = alu!(5, 0x28);
const CMP: &[InstrForm] = alu!(7, 0x38);

const TEST: &[InstrForm] = &[
    f(&[Rm8, Imm8], &[0xF6], EncTag::Mi, 0, false, 0, true, true),
    f(&[Rm16, Imm16], &[0xF7], EncTag::Mi, 0, false, 0, true, true),
    f(&[Rm32, Imm32], &[0xF7], EncTag::Mi, 0, false, 0, true, true),
    f(&[Rm64, Imm32], &[0xF7], EncTag::Mi, 0, true, 0, true, false),
    f(&[Rm8, R8], &[0x84], EncTag::Mr, -1, false, 0, true, true),
    f(&[Rm16, R16], &[0x85], EncTag::Mr, -1, false, 0, true, true),
    f(&[Rm32, R32], &[0x85], EncTag::Mr, -1, false, 0, true, true),
    f(&[Rm64, R64], &[0x85], EncTag::Mr, -1, true, 0, true, false),
];

const INC: &[InstrForm] = &[
    f(&[Rm8], &[0xFE], EncTag::M, 0, false, 0, true, true),
    f(&[Rm16], &[0xFF], EncTag::M, 0, false, 0, true, true),
    f(&[Rm32], &[0xFF], EncTag::M, 0, false, 0, true, true),
    f(&[Rm64], &[0xFF], EncTag::M, 0, true, 0, true, false),
    // 40+rd bytes are REX prefixes in long mode
    f(&[R16], &[0x40], EncTag::O(0), -1, false, 0, false, true),
    f(&[R32], &[0x40], EncTag::O(0), -1, false, 0, false, true),
];

const DEC: &[InstrForm] = &[
    f(&[Rm8], &[0xFE], EncTag::M, 1, false, 0, true, true),
    f(&[Rm16], &[0xFF], EncTag::M, 1, false, 0, true, true),
    f(&[Rm32], &[0xFF], EncTag::M, 1, false, 0, true, true),
    f(&[Rm64], &[0xFF], EncTag::M, 1, true, 0, true, false),
    f(&[R16], &[0x48], EncTag::O(0), -1, false, 0, false, true),
    f(&[R32], &[0x48], EncTag::O(0), -1, false, 0, false, true),
];

const IMUL: &[InstrForm] = &[
    f(&[R16, Rm16], &[0x0F, 0xAF], EncTag::Rm, -1, false, 0, true, true),
    f(&[R32, Rm32], &[0x0F, 0xAF], EncTag::Rm, -1, false, 0, true, true),
    f(&[R64, Rm64], &[0x0F, 0xAF], EncTag::Rm, -1, true, 0, true, false),
    f(&[R16, Rm16, Imm8], &[0x6B], EncTag::Rmi, -1, false, 0, true, true),
    f(&[R32, Rm32, Imm8], &[0x6B], EncTag::Rmi, -1, false, 0, true, true),
    f(&[R64, Rm64, Imm8], &[0x6B], EncTag::Rmi, -1, true, 0, true, false),
    f(&[R16, Rm16, Imm16], &[0x69], EncTag::Rmi, -1, false, 0, true, true),
    f(&[R32, Rm32, Imm32], &[0x69], EncTag::Rmi, -1, false, 0, true, true),
    f(&[R64, Rm64, Imm32], &[0x69], EncTag::Rmi, -1, true, 0, true, false),
];

const IDIV: &[InstrForm] = &[
    f(&[Rm8], &[0xF6], EncTag::M, 7, false, 0, true, true),
    f(&[Rm16], &[0xF7], EncTag::M, 7, false, 0, true, true),
    f(&[Rm32], &[0xF7], EncTag::M, 7, false, 0, true, true),
    f(&[Rm64], &[0xF7], EncTag::M, 7, true, 0, true, false),
];

// ─── Branches ──────────────────────────────────────────────────────────

const JMP: &[InstrForm] = &[
    f(&[Rel8], &[0xEB], EncTag::D, -1, false, 0, true, true),
    f(&[Rel32], &[0xE9], EncTag::D, -1, false, 0, true, true),
    f(&[Rm16], &[0xFF], EncTag::M, 4, false, 0, false, true),
    f(&[Rm32], &[0xFF], EncTag::M, 4, false, 0, false, true),
    f(&[Rm64], &[0xFF], EncTag::M, 4, false, 0, true, false),
];

/// Conditional jumps: short form `0x70 | cc`, near form `0F 80 | cc`.
macro_rules! jcc {
    ($long:expr) => {
        &[
            f(
                &[Rel8],
                &[0x70 | ($long & 0x0F)],
                EncTag::D,
                -1,
                false,
                0,
                true,
                true,
            ),
            f(&[Rel32], &[0x0F, $long], EncTag::D, -1, false, 0, true, true),
        ]
    };
}

const JA: &[InstrForm] = jcc!(0x87);
const JAE: &[InstrForm] = jcc!(0x83);
const JB: &[InstrForm] = jcc!(0x82);
const JBE: &[InstrForm] = jcc!(0x86);
const JE: &[InstrForm] = jcc!(0x84);
const JG: &[InstrForm] = jcc!(0x8F);
const JGE: &[InstrForm] = jcc!(0x8D);
const JL: &[InstrForm] = jcc!(0x8C);
const JLE: &[InstrForm] = jcc!(0x8E);
const JNE: &[InstrForm] = jcc!(0x85);
const JNO: &[InstrForm] = jcc!(0x81);
const JNP: &[InstrForm] = jcc!(0x8B);
const JNS: &[InstrForm] = jcc!(0x89);
const JO: &[InstrForm] = jcc!(0x80);
const JP: &[InstrForm] = jcc!(0x8A);
const JS: &[InstrForm] = jcc!(0x88);

// ─── OS interface ──────────────────────────────────────────────────────

const INT: &[InstrForm] = &[f(&[Imm8], &[0xCD], EncTag::I, -1, false, 0, true, true)];
const INT3: &[InstrForm] = &[f(&[], &[0xCC], EncTag::Zo, -1, false, 0, true, true)];
const NOP: &[InstrForm] = &[f(&[], &[0x90], EncTag::Zo, -1, false, 0, true, true)];
const SYSCALL: &[InstrForm] = &[f(&[], &[0x0F, 0x05], EncTag::Zo, -1, false, 0, true, true)];

// ─── x87 floating point ────────────────────────────────────────────────

const FLD: &[InstrForm] = &[
    f(&[M32], &[0xD9], EncTag::M, 0, false, 0, true, true),
    f(&[M64], &[0xDD], EncTag::M, 0, false, 0, true, true),
    f(&[M80], &[0xDB], EncTag::M, 5, false, 0, true, true),
    f(&[St], &[0xD9, 0xC0], EncTag::O(0), -1, false, 0, true, true),
];

const FST: &[InstrForm] = &[
    f(&[M32], &[0xD9], EncTag::M, 2, false, 0, true, true),
    f(&[M64], &[0xDD], EncTag::M, 2, false, 0, true, true),
    f(&[St], &[0xDD, 0xD0], EncTag::O(0), -1, false, 0, true, true),
];

const FSTP: &[InstrForm] = &[
    f(&[M32], &[0xD9], EncTag::M, 3, false, 0, true, true),
    f(&[M64], &[0xDD], EncTag::M, 3, false, 0, true, true),
    f(&[M80], &[0xDB], EncTag::M, 7, false, 0, true, true),
    f(&[St], &[0xDD, 0xD8], EncTag::O(0), -1, false, 0, true, true),
];

/// x87 arithmetic family: memory forms with a `/digit`, the two
/// `st(0)`/`st(i)` register forms, and the no-operand pop form.
macro_rules! farith {
    ($ext:expr, $to_st0:expr, $to_sti:expr, $pop:expr) => {
        &[
            f(&[M32], &[0xD8], EncTag::M, $ext, false, 0, true, true),
            f(&[M64], &[0xDC], EncTag::M, $ext, false, 0, true, true),
            f(&[St0, St], &[0xD8, $to_st0], EncTag::O(1), -1, false, 0, true, true),
            f(&[St, St0], &[0xDC, $to_sti], EncTag::O(0), -1, false, 0, true, true),
            f(&[], &[0xDE, $pop], EncTag::Zo, -1, false, 0, true, true),
        ]
    };
}

const FADD: &[InstrForm] = farith!(0, 0xC0, 0xC0, 0xC1);
const FMUL: &[InstrForm] = farith!(1, 0xC8, 0xC8, 0xC9);
const FSUB: &[InstrForm] = farith!(4, 0xE0, 0xE8, 0xE9);
const FDIV: &[InstrForm] = farith!(6, 0xF0, 0xF8, 0xF9);

const FABS: &[InstrForm] = &[f(&[], &[0xD9, 0xE1], EncTag::Zo, -1, false, 0, true, true)];

// ─── Master table ──────────────────────────────────────────────────────

/// All mnemonics, sorted for binary search.
static TABLE: &[(&str, &[InstrForm])] = &[
    ("add", ADD),
    ("call", CALL),
    ("cmp", CMP),
    ("dec", DEC),
    ("fabs", FABS),
    ("fadd", FADD),
    ("fdiv", FDIV),
    ("fld", FLD),
    ("fmul", FMUL),
    ("fst", FST),
    ("fstp", FSTP),
    ("fsub", FSUB),
    ("idiv", IDIV),
    ("imul", IMUL),
    ("inc", INC),
    ("int", INT),
    ("int3", INT3),
    ("ja", JA),
    ("jae", JAE),
    ("jb", JB),
    ("jbe", JBE),
    ("jc", JB),
    ("je", JE),
    ("jg", JG),
    ("jge", JGE),
    ("jl", JL),
    ("jle", JLE),
    ("jmp", JMP),
    ("jna", JBE),
    ("jnae", JB),
    ("jnb", JAE),
    ("jnbe", JA),
    ("jnc", JAE),
    ("jne", JNE),
    ("jng", JLE),
    ("jnge", JL),
    ("jnl", JGE),
    ("jnle", JG),
    ("jno", JNO),
    ("jnp", JNP),
    ("jns", JNS),
    ("jnz", JNE),
    ("jo", JO),
    ("jp", JP),
    ("jpe", JP),
    ("jpo", JNP),
    ("js", JS),
    ("jz", JE),
    ("lea", LEA),
    ("leave", LEAVE),
    ("mov", MOV),
    ("movsd", MOVSD),
    ("nop", NOP),
    ("pop", POP),
    ("push", PUSH),
    ("ret", RET),
    ("sub", SUB),
    ("syscall", SYSCALL),
    ("test", TEST),
];

/// Look up the encoding rows for a mnemonic (case-insensitive).
///
/// Returns the canonical mnemonic spelling together with its rows.
pub fn forms(mnemonic: &str) -> Option<(&'static str, &'static [InstrForm])> {
    let lower = mnemonic.to_ascii_lowercase();
    TABLE
        .binary_search_by_key(&lower.as_str(), |&(m, _)| m)
        .ok()
        .map(|i| TABLE[i])
}
