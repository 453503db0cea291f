//! Error types for assembly and code-page construction.

use core::fmt;

use crate::arch::Arch;

/// Assembly error carrying the offending mnemonic, operand index, or value.
///
/// Every error is fatal to the assembly unit that produced it; nothing is
/// silently recovered. In particular, the two places where a system
/// assembler degrades silently — undefined symbols (emitted as zero) and
/// oversized displacements (truncated) — are hard errors here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// Mnemonic not present in the instruction encoding table.
    UnknownMnemonic {
        /// The mnemonic that was not recognized.
        mnemonic: String,
    },

    /// No encoding row accepts the supplied operand combination.
    NoMatchingForm {
        /// The instruction mnemonic.
        mnemonic: String,
        /// Intel-style rendering of the operands that were supplied.
        supplied: String,
        /// The operand signatures that were tried, in table order.
        tried: Vec<String>,
    },

    /// An operand is structurally illegal for any encoding (e.g. `ah`
    /// together with a REX-requiring register, or `esp` as SIB index).
    OperandMisuse {
        /// The instruction mnemonic.
        mnemonic: String,
        /// Zero-based index of the offending operand.
        operand: usize,
        /// Why the operand cannot be encoded.
        detail: String,
    },

    /// Immediate value does not fit the width the selected row requires.
    ImmediateOutOfRange {
        /// The immediate value that overflowed.
        value: i64,
        /// Minimum allowed value.
        min: i64,
        /// Maximum allowed value.
        max: i64,
    },

    /// A memory or relative displacement exceeds its encodable range.
    DisplacementOutOfRange {
        /// The displacement that overflowed.
        value: i64,
        /// Number of bits available for the encoded field.
        bits: u8,
    },

    /// Reference to a label that was never defined in the unit.
    UndefinedLabel {
        /// The undefined label name.
        label: String,
    },

    /// The same label name was defined twice in one unit.
    DuplicateLabel {
        /// The duplicated label name.
        label: String,
    },

    /// A register or instruction form is illegal in the current mode
    /// (64-bit-only register in 32-bit mode, or vice versa).
    ArchMismatch {
        /// Textual description of the offending item (register name or form).
        what: String,
        /// The mode the unit or instruction was built for.
        mode: Arch,
    },

    /// The operating system refused executable memory.
    PageAllocFailed {
        /// OS-level error description.
        detail: String,
    },
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::UnknownMnemonic { mnemonic } => {
                write!(f, "unknown mnemonic '{mnemonic}'")
            }
            AsmError::NoMatchingForm {
                mnemonic,
                supplied,
                tried,
            } => {
                write!(
                    f,
                    "no form of '{mnemonic}' accepts ({supplied}); tried: {}",
                    tried.join(", ")
                )
            }
            AsmError::OperandMisuse {
                mnemonic,
                operand,
                detail,
            } => {
                write!(f, "'{mnemonic}' operand {operand}: {detail}")
            }
            AsmError::ImmediateOutOfRange { value, min, max } => {
                write!(f, "immediate {value} out of range [{min}..{max}]")
            }
            AsmError::DisplacementOutOfRange { value, bits } => {
                write!(f, "displacement {value} does not fit in {bits} signed bits")
            }
            AsmError::UndefinedLabel { label } => {
                write!(f, "undefined label '{label}'")
            }
            AsmError::DuplicateLabel { label } => {
                write!(f, "duplicate label '{label}'")
            }
            AsmError::ArchMismatch { what, mode } => {
                write!(f, "{what} is not available in {mode} mode")
            }
            AsmError::PageAllocFailed { detail } => {
                write!(f, "executable page allocation failed: {detail}")
            }
        }
    }
}

impl std::error::Error for AsmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mnemonic_display() {
        let err = AsmError::UnknownMnemonic {
            mnemonic: "frobnicate".into(),
        };
        assert_eq!(format!("{err}"), "unknown mnemonic 'frobnicate'");
    }

    #[test]
    fn no_matching_form_display() {
        let err = AsmError::NoMatchingForm {
            mnemonic: "mov".into(),
            supplied: "eax, rbx".into(),
            tried: vec!["r/m32, r32".into(), "r32, r/m32".into()],
        };
        assert_eq!(
            format!("{err}"),
            "no form of 'mov' accepts (eax, rbx); tried: r/m32, r32, r32, r/m32"
        );
    }

    #[test]
    fn immediate_out_of_range_display() {
        let err = AsmError::ImmediateOutOfRange {
            value: 300,
            min: -128,
            max: 255,
        };
        assert_eq!(format!("{err}"), "immediate 300 out of range [-128..255]");
    }

    #[test]
    fn displacement_out_of_range_display() {
        let err = AsmError::DisplacementOutOfRange {
            value: 1 << 40,
            bits: 32,
        };
        assert_eq!(
            format!("{err}"),
            format!("displacement {} does not fit in 32 signed bits", 1u64 << 40)
        );
    }

    #[test]
    fn undefined_label_display() {
        let err = AsmError::UndefinedLabel {
            label: "loop_top".into(),
        };
        assert_eq!(format!("{err}"), "undefined label 'loop_top'");
    }

    #[test]
    fn arch_mismatch_display() {
        let err = AsmError::ArchMismatch {
            what: "register r12".into(),
            mode: Arch::X86,
        };
        assert_eq!(format!("{err}"), "register r12 is not available in x86 mode");
    }
}
