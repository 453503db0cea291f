//! The assembly unit: an ordered sequence of instructions and label
//! definitions, resolved in two passes.
//!
//! Pass 1 sizes every instruction at its longest legal form, then
//! iteratively shrinks size-variable branches whose resolved displacement
//! fits 8 bits. Shrinking only ever decreases sizes, so the iteration
//! converges; it is bounded by the number of size-variable instructions.
//! Pass 2 emits bytes, patches relative displacements, and records
//! absolute relocations for the code page to apply.

use std::collections::BTreeMap;

use crate::arch::Arch;
use crate::encode::fits_signed;
use crate::error::AsmError;
use crate::insn::{Instruction, RelocKind};

/// One entry of an assembly unit.
#[derive(Debug, Clone)]
pub enum Entry {
    /// An instruction.
    Instr(Instruction),
    /// A label definition anchored at the next instruction's offset.
    Label(String),
}

impl From<Instruction> for Entry {
    fn from(insn: Instruction) -> Self {
        Entry::Instr(insn)
    }
}

/// A pending absolute-address patch: once the code-page base is known,
/// `base + target_offset + addend` is written at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsPatch {
    /// Byte offset of the field in the unit's output.
    pub offset: usize,
    /// Field width in bytes (4 or 8).
    pub size: u8,
    /// Target label.
    pub label: String,
    /// Constant added to the resolved address.
    pub addend: i64,
}

/// Output of [`AssemblyUnit::resolve`]: final bytes, the label table, and
/// any absolute relocations still awaiting a base address.
#[derive(Debug, Clone)]
pub struct AssemblyResult {
    mode: Arch,
    bytes: Vec<u8>,
    labels: BTreeMap<String, u64>,
    relocations: Vec<AbsPatch>,
}

impl AssemblyResult {
    /// The mode the unit was assembled for.
    pub fn mode(&self) -> Arch {
        self.mode
    }

    /// The assembled bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the result, returning the assembled bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the unit produced no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset of a label within the bytes.
    pub fn label_offset(&self, name: &str) -> Option<u64> {
        self.labels.get(name).copied()
    }

    /// The full label → offset table.
    pub fn labels(&self) -> &BTreeMap<String, u64> {
        &self.labels
    }

    /// Absolute relocations to apply at placement.
    pub fn relocations(&self) -> &[AbsPatch] {
        &self.relocations
    }
}

/// An ordered sequence of instructions and labels undergoing resolution.
#[derive(Debug, Clone)]
pub struct AssemblyUnit {
    mode: Arch,
    entries: Vec<Entry>,
    defined: BTreeMap<String, usize>,
}

impl AssemblyUnit {
    /// Create an empty unit for `mode`.
    pub fn new(mode: Arch) -> Self {
        Self {
            mode,
            entries: Vec::new(),
            defined: BTreeMap::new(),
        }
    }

    /// The mode this unit assembles for.
    pub fn mode(&self) -> Arch {
        self.mode
    }

    /// Number of entries (instructions and labels).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the unit has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an instruction.
    ///
    /// # Errors
    ///
    /// [`AsmError::ArchMismatch`] when the instruction was built for a
    /// different mode than the unit.
    pub fn push(&mut self, insn: Instruction) -> Result<(), AsmError> {
        if insn.mode() != self.mode {
            return Err(AsmError::ArchMismatch {
                what: format!(
                    "instruction '{}' built for {} mode",
                    insn.mnemonic(),
                    insn.mode()
                ),
                mode: self.mode,
            });
        }
        self.entries.push(Entry::Instr(insn));
        Ok(())
    }

    /// Define a label at the current position.
    ///
    /// # Errors
    ///
    /// [`AsmError::DuplicateLabel`] when the name was already defined.
    pub fn label(&mut self, name: &str) -> Result<(), AsmError> {
        if self.defined.contains_key(name) {
            return Err(AsmError::DuplicateLabel {
                label: name.to_owned(),
            });
        }
        self.defined.insert(name.to_owned(), self.entries.len());
        self.entries.push(Entry::Label(name.to_owned()));
        Ok(())
    }

    /// Append a pre-built entry.
    ///
    /// # Errors
    ///
    /// Propagates the [`push`](Self::push) and [`label`](Self::label)
    /// checks.
    pub fn add(&mut self, entry: Entry) -> Result<(), AsmError> {
        match entry {
            Entry::Instr(insn) => self.push(insn),
            Entry::Label(name) => self.label(&name),
        }
    }

    /// Current offsets of every entry plus the label table, under the
    /// current size choices.
    fn layout(&self) -> (Vec<u64>, BTreeMap<String, u64>) {
        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut labels = BTreeMap::new();
        let mut off = 0u64;
        for entry in &self.entries {
            offsets.push(off);
            match entry {
                Entry::Label(name) => {
                    labels.insert(name.clone(), off);
                }
                Entry::Instr(insn) => off += insn.len() as u64,
            }
        }
        (offsets, labels)
    }

    /// Resolve sizes and labels, emit bytes, and collect absolute
    /// relocations.
    ///
    /// Resolution is idempotent: running it again on an already-resolved
    /// unit changes nothing.
    ///
    /// # Errors
    ///
    /// [`AsmError::UndefinedLabel`] for references to labels never
    /// defined, [`AsmError::DisplacementOutOfRange`] when a relative
    /// target cannot be reached.
    pub fn resolve(&mut self) -> Result<AssemblyResult, AsmError> {
        // Pass 1: shrink size-variable branches to a fixed point. Each
        // iteration either commits at least one shrink or stops, so the
        // variable-instruction count bounds the loop.
        let variable = self
            .entries
            .iter()
            .filter(|e| matches!(e, Entry::Instr(i) if i.is_size_variable()))
            .count();
        let mut converged = false;
        for _pass in 0..=variable {
            let (offsets, labels) = self.layout();
            let mut shrunk = false;
            for (i, entry) in self.entries.iter_mut().enumerate() {
                let Entry::Instr(insn) = entry else { continue };
                if !insn.is_size_variable() {
                    continue;
                }
                let reloc = insn.encoded().reloc.as_ref().expect("branch has a target");
                let Some(&target) = labels.get(&reloc.label) else {
                    // Undefined so far; pass 2 reports it.
                    continue;
                };
                let off = offsets[i];
                // A forward displacement is measured against the current
                // (long) end so that later shrinks only bring the target
                // closer; a backward one is already exact against the
                // short end.
                let end = if target > off {
                    off + insn.len() as u64
                } else {
                    off + insn.short_len().expect("size-variable") as u64
                };
                let disp = target as i64 - end as i64 + reloc.addend;
                if fits_signed(disp, 8) {
                    insn.shrink();
                    shrunk = true;
                }
            }
            if !shrunk {
                converged = true;
                break;
            }
        }
        debug_assert!(converged, "shrink pass failed to converge");

        // Pass 2: emit and patch.
        let (offsets, labels) = self.layout();
        let mut bytes = Vec::new();
        let mut relocations = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let Entry::Instr(insn) = entry else { continue };
            let enc = insn.encoded();
            let start = bytes.len();
            debug_assert_eq!(start as u64, offsets[i]);
            bytes.extend_from_slice(&enc.bytes);
            if let Some(reloc) = &enc.reloc {
                let Some(&target) = labels.get(&reloc.label) else {
                    return Err(AsmError::UndefinedLabel {
                        label: reloc.label.clone(),
                    });
                };
                match reloc.kind {
                    RelocKind::Relative => {
                        let end = (start + enc.bytes.len()) as i64;
                        let value = target as i64 + reloc.addend - end;
                        if !fits_signed(value, reloc.size * 8) {
                            return Err(AsmError::DisplacementOutOfRange {
                                value,
                                bits: reloc.size * 8,
                            });
                        }
                        let field = &mut bytes[start + reloc.offset..];
                        field[..reloc.size as usize]
                            .copy_from_slice(&value.to_le_bytes()[..reloc.size as usize]);
                    }
                    RelocKind::Absolute => {
                        relocations.push(AbsPatch {
                            offset: start + reloc.offset,
                            size: reloc.size,
                            label: reloc.label.clone(),
                            addend: reloc.addend,
                        });
                    }
                }
            }
        }

        Ok(AssemblyResult {
            mode: self.mode,
            bytes,
            labels,
            relocations,
        })
    }
}

/// Assemble a list of entries in one call.
///
/// # Errors
///
/// Propagates entry and resolution errors; see
/// [`AssemblyUnit::resolve`].
pub fn assemble(entries: Vec<Entry>, mode: Arch) -> Result<AssemblyResult, AsmError> {
    let mut unit = AssemblyUnit::new(mode);
    for entry in entries {
        unit.add(entry)?;
    }
    unit.resolve()
}
