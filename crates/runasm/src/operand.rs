//! The operand model: registers, immediates, memory references, and label
//! references, each carrying its width.

use core::fmt;

use crate::reg::Register;

/// Width tag of a memory operand (`byte ptr`, `qword ptr`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSize {
    /// 8-bit (`byte ptr`).
    Byte,
    /// 16-bit (`word ptr`).
    Word,
    /// 32-bit (`dword ptr`).
    Dword,
    /// 64-bit (`qword ptr`).
    Qword,
    /// 80-bit x87 extended precision (`tword ptr`).
    Tword,
    /// 128-bit (`xmmword ptr`).
    Xmmword,
}

impl OperandSize {
    /// The operand size in bits.
    pub fn bits(self) -> u16 {
        match self {
            OperandSize::Byte => 8,
            OperandSize::Word => 16,
            OperandSize::Dword => 32,
            OperandSize::Qword => 64,
            OperandSize::Tword => 80,
            OperandSize::Xmmword => 128,
        }
    }
}

impl fmt::Display for OperandSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandSize::Byte => write!(f, "byte"),
            OperandSize::Word => write!(f, "word"),
            OperandSize::Dword => write!(f, "dword"),
            OperandSize::Qword => write!(f, "qword"),
            OperandSize::Tword => write!(f, "tword"),
            OperandSize::Xmmword => write!(f, "xmmword"),
        }
    }
}

/// A memory (indirect) operand: `[base + index*scale + disp]`.
///
/// The `size` field describes the operand *at* the address, not the
/// address itself; it is attached by the pointer sizers ([`byte_ptr`],
/// [`qword_ptr`], …) and left `None` when the width can be inferred from
/// the other operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOperand {
    /// Width of the referenced operand, or `None` to infer.
    pub size: Option<OperandSize>,
    /// Base register.
    pub base: Option<Register>,
    /// Index register (scaled); never `rsp`/`esp`.
    pub index: Option<Register>,
    /// Scale factor applied to the index: 1, 2, 4, or 8.
    pub scale: u8,
    /// Signed displacement. Validated to fit 32 bits at instruction
    /// construction.
    pub disp: i64,
    /// A label whose absolute address is added into the displacement slot
    /// once the code page base is known (RIP-relative when `base` is
    /// `rip`).
    pub disp_label: Option<String>,
    /// Segment override (`fs`, `gs`, …).
    pub segment: Option<Register>,
}

impl Default for MemoryOperand {
    fn default() -> Self {
        Self {
            size: None,
            base: None,
            index: None,
            scale: 1,
            disp: 0,
            disp_label: None,
            segment: None,
        }
    }
}

impl MemoryOperand {
    /// Attach an index register with a scale factor.
    #[must_use]
    pub fn index(mut self, index: Register, scale: u8) -> Self {
        self.index = Some(index);
        self.scale = scale;
        self
    }

    /// Add a displacement.
    #[must_use]
    pub fn disp(mut self, disp: i64) -> Self {
        self.disp += disp;
        self
    }

    /// Add a label whose absolute address resolves into the displacement.
    #[must_use]
    pub fn label(mut self, name: &str) -> Self {
        self.disp_label = Some(name.to_owned());
        self
    }

    /// Attach a segment-override register.
    #[must_use]
    pub fn segment(mut self, seg: Register) -> Self {
        self.segment = Some(seg);
        self
    }

    /// Attach an explicit operand width.
    #[must_use]
    pub fn sized(mut self, size: OperandSize) -> Self {
        self.size = Some(size);
        self
    }

    /// Width of the *address* registers in bits, or `None` when the
    /// reference is displacement-only.
    pub fn addr_bits(&self) -> Option<u16> {
        self.base
            .map(Register::size_bits)
            .or_else(|| self.index.map(Register::size_bits))
    }
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(size) = self.size {
            write!(f, "{size} ptr ")?;
        }
        if let Some(seg) = self.segment {
            write!(f, "{seg}:")?;
        }
        write!(f, "[")?;
        let mut sep = "";
        if let Some(base) = self.base {
            write!(f, "{base}")?;
            sep = "+";
        }
        if let Some(index) = self.index {
            write!(f, "{sep}{index}")?;
            if self.scale != 1 {
                write!(f, "*{}", self.scale)?;
            }
            sep = "+";
        }
        if let Some(ref label) = self.disp_label {
            write!(f, "{sep}{label}")?;
            sep = "+";
        }
        if self.disp != 0 || sep.is_empty() {
            if self.disp < 0 {
                write!(f, "-0x{:x}", -(self.disp as i128))?;
            } else {
                write!(f, "{}0x{:x}", sep, self.disp)?;
            }
        }
        write!(f, "]")
    }
}

/// Memory reference based at a register: `mem(rax)` is `[rax]`.
pub fn mem(base: Register) -> MemoryOperand {
    MemoryOperand {
        base: Some(base),
        ..MemoryOperand::default()
    }
}

/// Displacement-only (absolute) memory reference: `mem_abs(0x1000)` is
/// `[0x1000]`.
pub fn mem_abs(disp: i64) -> MemoryOperand {
    MemoryOperand {
        disp,
        ..MemoryOperand::default()
    }
}

/// Memory reference through a label's absolute address.
pub fn mem_label(name: &str) -> MemoryOperand {
    MemoryOperand {
        disp_label: Some(name.to_owned()),
        ..MemoryOperand::default()
    }
}

/// Scaled-index memory reference with no base: `mem_index(rcx, 4)` is
/// `[rcx*4]`.
pub fn mem_index(index: Register, scale: u8) -> MemoryOperand {
    MemoryOperand {
        index: Some(index),
        scale,
        ..MemoryOperand::default()
    }
}

macro_rules! pointer_sizer {
    ($(#[$doc:meta] $name:ident => $size:ident,)*) => {
        $(
            #[$doc]
            #[must_use]
            pub fn $name(ptr: MemoryOperand) -> MemoryOperand {
                ptr.sized(OperandSize::$size)
            }
        )*
    };
}

pointer_sizer! {
    /// Tag a memory reference as `byte ptr […]`.
    byte_ptr => Byte,
    /// Tag a memory reference as `word ptr […]`.
    word_ptr => Word,
    /// Tag a memory reference as `dword ptr […]`.
    dword_ptr => Dword,
    /// Tag a memory reference as `qword ptr […]`.
    qword_ptr => Qword,
    /// Tag a memory reference as `tword ptr […]`.
    tword_ptr => Tword,
    /// Tag a memory reference as `xmmword ptr […]`.
    xmmword_ptr => Xmmword,
}

/// One operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A register.
    Register(Register),
    /// An immediate value; the selected encoding row fixes its width.
    Immediate(i64),
    /// A memory reference.
    Memory(Box<MemoryOperand>),
    /// A label reference: a relative displacement in branch positions, an
    /// absolute address in immediate positions.
    Label(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "{r}"),
            Operand::Immediate(v) => write!(f, "{v}"),
            Operand::Memory(m) => write!(f, "{m}"),
            Operand::Label(l) => write!(f, "{l}"),
        }
    }
}

impl From<Register> for Operand {
    fn from(r: Register) -> Self {
        Operand::Register(r)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Immediate(v)
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Immediate(v.into())
    }
}

impl From<u32> for Operand {
    fn from(v: u32) -> Self {
        Operand::Immediate(v.into())
    }
}

impl From<MemoryOperand> for Operand {
    fn from(m: MemoryOperand) -> Self {
        Operand::Memory(Box::new(m))
    }
}

/// A label-reference operand.
pub fn label(name: &str) -> Operand {
    Operand::Label(name.to_owned())
}
