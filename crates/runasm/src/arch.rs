//! Architecture context: 32- vs 64-bit mode and the widths it implies.

use core::fmt;

/// Target architecture mode.
///
/// The mode is passed explicitly into operand validation, row selection,
/// and [`AssemblyUnit`](crate::unit::AssemblyUnit) construction; the unit
/// records the mode it was built for and refuses instructions built for
/// another one. There is no process-wide mode state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// 32-bit x86 protected mode.
    X86,
    /// 64-bit x86 long mode.
    X86_64,
}

impl Arch {
    /// Whether this is 64-bit long mode.
    #[inline]
    pub fn is_64(self) -> bool {
        matches!(self, Arch::X86_64)
    }

    /// Pointer width in bits (also the width of absolute label addresses).
    #[inline]
    pub fn ptr_bits(self) -> u8 {
        match self {
            Arch::X86 => 32,
            Arch::X86_64 => 64,
        }
    }

    /// Default address width in bits. Address registers of exactly half
    /// this width select the 0x67 address-size override.
    #[inline]
    pub fn addr_bits(self) -> u8 {
        self.ptr_bits()
    }

    /// Default operand width in bits (32 in both modes; 64-bit operands
    /// require REX.W).
    #[inline]
    pub fn operand_bits(self) -> u8 {
        32
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86 => write!(f, "x86"),
            Arch::X86_64 => write!(f, "x86_64"),
        }
    }
}

/// Encoding-selection policy when more than one row accepts the operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// Prefer the shortest legal encoding; ties broken by table order
    /// (default).
    #[default]
    Size,
    /// Strict reference parity: take the first matching row in table
    /// declaration order, mirroring the reference listing the table was
    /// transcribed from. Used by regression tests that pin byte output.
    Strict,
}
