//! # runasm — runtime assembler for x86 and x86-64
//!
//! `runasm` turns symbolic instructions into the exact machine-code bytes
//! a system assembler in Intel-mnemonic mode would produce, resolves
//! labels across an assembly unit, and can load the result into
//! executable memory as a native callable.
//!
//! ## Quick Start
//!
//! ```rust
//! use runasm::{assemble, instruction, label, Arch, Entry};
//! use runasm::Register::*;
//!
//! let entries = vec![
//!     Entry::Label("top".into()),
//!     instruction("add", vec![Eax.into(), 1.into()], Arch::X86_64)
//!         .unwrap()
//!         .into(),
//!     instruction("jmp", vec![label("top")], Arch::X86_64)
//!         .unwrap()
//!         .into(),
//! ];
//! let result = assemble(entries, Arch::X86_64).unwrap();
//! assert_eq!(result.bytes(), &[0x83, 0xC0, 0x01, 0xEB, 0xFB]);
//! ```
//!
//! ## Running emitted code
//!
//! ```rust,no_run
//! use runasm::{instruction, Arch, AssemblyUnit, CallConv, CodePage};
//! use runasm::Register::*;
//!
//! let mut unit = AssemblyUnit::new(Arch::X86_64);
//! unit.push(instruction("mov", vec![Eax.into(), 42.into()], Arch::X86_64).unwrap())
//!     .unwrap();
//! unit.push(instruction("ret", vec![], Arch::X86_64).unwrap())
//!     .unwrap();
//! let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
//! let f = unsafe { page.callable::<extern "C" fn() -> i32>(CallConv::host()) };
//! assert_eq!((f.get())(), 42);
//! ```
//!
//! ## Design
//!
//! - **Byte parity** — output matches the reference assembler, with three
//!   deliberate exceptions: undefined labels and oversized displacements
//!   are hard errors instead of silent zeros/truncation, and the shortest
//!   of several legal encodings is chosen (disable the latter with
//!   [`OptLevel::Strict`]).
//! - **Tables as data** — per-mnemonic encoding rows are const records;
//!   adding an instruction is a data entry.
//! - **Explicit mode** — the 32/64-bit context is a value ([`Arch`]),
//!   never process state.

// An assembler performs many deliberate narrowing casts between integer
// widths and uses dense hex literals; these lints fire on that style.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless,
    clippy::unreadable_literal,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

/// Architecture context: mode and encoding-selection policy.
pub mod arch;
/// Executable memory pages and typed callable handles.
pub mod codepage;
/// REX, ModR/M, SIB, displacement, and immediate field primitives.
pub mod encode;
/// Error types.
pub mod error;
/// Instruction objects: row selection and byte emission.
pub mod insn;
/// Operand model: registers, immediates, memory references, labels.
pub mod operand;
/// The register catalog.
pub mod reg;
/// The per-mnemonic instruction encoding table.
pub mod table;
/// Assembly units: label resolution and two-pass sizing.
pub mod unit;

pub use arch::{Arch, OptLevel};
pub use codepage::{Callable, CallConv, CodePage};
pub use encode::InstrBytes;
pub use error::AsmError;
pub use insn::{instruction, Instruction, Prefix};
pub use operand::{
    byte_ptr, dword_ptr, label, mem, mem_abs, mem_index, mem_label, qword_ptr, tword_ptr,
    word_ptr, xmmword_ptr, MemoryOperand, Operand, OperandSize,
};
pub use reg::{Register, RegClass, ARG_FLOAT64, ARG_INT64};
pub use table::{EncTag, InstrForm, OperandSig};
pub use unit::{assemble, AbsPatch, AssemblyResult, AssemblyUnit, Entry};
