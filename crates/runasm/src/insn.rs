//! The instruction object: binds a mnemonic and concrete operands to an
//! encoding row from the instruction table and produces bytes.
//!
//! Row selection follows the reference listing: candidate rows are those
//! legal in the current mode whose signature every operand satisfies.
//! Under the default policy the shortest encoding wins; under strict
//! parity the first matching row in table order wins. An unresolved label
//! leaves a relocation for the assembly unit to patch.

use core::fmt;

use crate::arch::{Arch, OptLevel};
use crate::encode::{
    self, addr_size_prefix, emit_imm, emit_mem_modrm, fits_signed, mem_rex_xb, min_signed_bits,
    needs_rex, rex, segment_prefix, InstrBytes,
};
use crate::error::AsmError;
use crate::operand::Operand;
use crate::reg::{RegClass, Register};
use crate::table::{self, EncTag, InstrForm, OperandSig};

/// Instruction prefixes that may be requested explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    /// `lock` — atomic read-modify-write.
    Lock,
    /// `rep` / `repe` / `repz`.
    Rep,
    /// `repne` / `repnz`.
    Repne,
}

impl Prefix {
    fn byte(self) -> u8 {
        match self {
            Prefix::Lock => 0xF0,
            Prefix::Rep => 0xF3,
            Prefix::Repne => 0xF2,
        }
    }
}

/// How a relocation target patches into the instruction bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelocKind {
    /// Signed displacement relative to the end of the instruction.
    Relative,
    /// Absolute address, patched once the code-page base is known.
    Absolute,
}

/// A pending label reference inside encoded bytes.
#[derive(Debug, Clone)]
pub(crate) struct Relocation {
    /// Byte offset of the field within the instruction.
    pub offset: usize,
    /// Field width in bytes (1, 4, or 8).
    pub size: u8,
    /// Referenced label name.
    pub label: String,
    /// Patch style.
    pub kind: RelocKind,
    /// Constant added to the resolved target.
    pub addend: i64,
}

/// Result of encoding one instruction.
#[derive(Debug, Clone)]
pub(crate) struct EncodedInstr {
    pub bytes: InstrBytes,
    pub reloc: Option<Relocation>,
}

// ─── Operand/signature matching ────────────────────────────────────────

/// How well an operand satisfies a signature code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchKind {
    /// Usable only when nothing better matches (unsigned immediate
    /// fallback).
    Backup,
    /// Satisfies the code.
    Compat,
    /// The operand's natural signature.
    Exact,
}

/// Whether `op` satisfies signature code `sig` within `form`.
fn operand_matches(op: &Operand, sig: OperandSig, form: &InstrForm) -> Option<MatchKind> {
    use OperandSig::*;
    match (op, sig) {
        (Operand::Register(r), R8 | R16 | R32 | R64) => {
            (r.class() == RegClass::General && r.size_bits() == u16::from(gp_bits(sig)))
                .then_some(MatchKind::Exact)
        }
        (Operand::Register(r), Rm8 | Rm16 | Rm32 | Rm64) => {
            (r.class() == RegClass::General && r.size_bits() == u16::from(gp_bits(sig)))
                .then_some(MatchKind::Compat)
        }
        (Operand::Memory(m), Rm8 | Rm16 | Rm32 | Rm64) => match m.size {
            None => Some(MatchKind::Compat),
            Some(s) => (s.bits() == u16::from(gp_bits(sig))).then_some(MatchKind::Exact),
        },
        (Operand::Memory(_), M) => Some(MatchKind::Compat),
        (Operand::Memory(m), M32 | M64 | M80) => {
            let bits = match sig {
                M32 => 32,
                M64 => 64,
                _ => 80,
            };
            match m.size {
                None => Some(MatchKind::Compat),
                Some(s) => (s.bits() == bits).then_some(MatchKind::Exact),
            }
        }
        (Operand::Immediate(v), Imm8 | Imm16 | Imm32 | Imm64) => {
            let bits = imm_bits(sig);
            if fits_signed(*v, bits) {
                if min_signed_bits(*v) == bits {
                    Some(MatchKind::Exact)
                } else {
                    Some(MatchKind::Compat)
                }
            } else if encode::fits_unsigned(*v, bits) {
                Some(MatchKind::Backup)
            } else {
                None
            }
        }
        // A label in an immediate slot is an absolute address of pointer
        // width; a REX.W row sign-extends its imm32 and cannot hold one.
        (Operand::Label(_), Imm32) => (!form.rex_w).then_some(MatchKind::Compat),
        (Operand::Label(_), Imm64) => Some(MatchKind::Compat),
        // Labels always select the long relative form; the assembly unit
        // shrinks it when the distance allows.
        (Operand::Label(_), Rel32) => Some(MatchKind::Compat),
        (Operand::Label(_), Rel8) => None,
        // A known integer target is a displacement from the instruction
        // start; whether it fits depends on the form's own length.
        (Operand::Immediate(v), Rel8 | Rel32) => {
            let size: usize = if sig == Rel8 { 1 } else { 4 };
            let disp = v - (form.opcode.len() + size) as i64;
            if !fits_signed(disp, size as u8 * 8) {
                None
            } else if sig == Rel8 {
                Some(MatchKind::Exact)
            } else {
                Some(MatchKind::Compat)
            }
        }
        (Operand::Register(r), Xmm) => (r.class() == RegClass::Xmm).then_some(MatchKind::Exact),
        (Operand::Register(r), XmmM64) => {
            (r.class() == RegClass::Xmm).then_some(MatchKind::Compat)
        }
        (Operand::Memory(m), XmmM64) => match m.size {
            None => Some(MatchKind::Compat),
            Some(s) => (s.bits() == 64).then_some(MatchKind::Exact),
        },
        (Operand::Register(r), St) => (r.class() == RegClass::X87).then_some(MatchKind::Exact),
        (Operand::Register(r), St0) => (*r == Register::St0).then_some(MatchKind::Exact),
        _ => None,
    }
}

fn gp_bits(sig: OperandSig) -> u8 {
    use OperandSig::*;
    match sig {
        R8 | Rm8 => 8,
        R16 | Rm16 => 16,
        R32 | Rm32 => 32,
        R64 | Rm64 => 64,
        _ => unreachable!(),
    }
}

fn imm_bits(sig: OperandSig) -> u8 {
    use OperandSig::*;
    match sig {
        Imm8 => 8,
        Imm16 => 16,
        Imm32 => 32,
        Imm64 => 64,
        _ => unreachable!(),
    }
}

// ─── The instruction object ────────────────────────────────────────────

/// A mnemonic bound to concrete operands and a selected encoding row.
///
/// Both the long form and, for label-targeted branches, the short `rel8`
/// form are encoded eagerly; the assembly unit flips to the short form
/// during size resolution when the displacement allows.
#[derive(Debug, Clone)]
pub struct Instruction {
    mnemonic: &'static str,
    operands: Vec<Operand>,
    prefixes: Vec<Prefix>,
    mode: Arch,
    opt: OptLevel,
    form: &'static InstrForm,
    short_form: Option<&'static InstrForm>,
    enc: EncodedInstr,
    short_enc: Option<EncodedInstr>,
    use_short: bool,
}

/// Build an instruction with the default encoding-selection policy.
///
/// # Errors
///
/// Returns [`AsmError`] when the mnemonic is unknown, an operand is
/// structurally illegal, or no encoding row accepts the combination.
pub fn instruction(
    mnemonic: &str,
    operands: Vec<Operand>,
    mode: Arch,
) -> Result<Instruction, AsmError> {
    Instruction::new(mnemonic, operands, mode, OptLevel::default())
}

impl Instruction {
    /// Bind `mnemonic` and `operands` to an encoding row for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmError`] when the mnemonic is unknown, an operand is
    /// structurally illegal, or no encoding row accepts the combination.
    pub fn new(
        mnemonic: &str,
        operands: Vec<Operand>,
        mode: Arch,
        opt: OptLevel,
    ) -> Result<Instruction, AsmError> {
        let Some((key, rows)) = table::forms(mnemonic) else {
            return Err(AsmError::UnknownMnemonic {
                mnemonic: mnemonic.to_owned(),
            });
        };

        let operands = validate_operands(key, operands, mode)?;
        let (form, short_form) = select_form(key, rows, &operands, mode, opt)?;

        let enc = encode_with(key, form, &operands, &[], mode)?;
        let short_enc = match short_form {
            Some(s) => Some(encode_with(key, s, &operands, &[], mode)?),
            None => None,
        };

        Ok(Instruction {
            mnemonic: key,
            operands,
            prefixes: Vec::new(),
            mode,
            opt,
            form,
            short_form,
            enc,
            short_enc,
            use_short: false,
        })
    }

    /// Prepend a `lock` prefix.
    ///
    /// # Errors
    ///
    /// Propagates re-encoding failures.
    pub fn lock(self) -> Result<Self, AsmError> {
        self.with_prefix(Prefix::Lock)
    }

    /// Prepend an explicit prefix.
    ///
    /// # Errors
    ///
    /// Propagates re-encoding failures.
    pub fn with_prefix(mut self, prefix: Prefix) -> Result<Self, AsmError> {
        self.prefixes.push(prefix);
        self.enc = encode_with(
            self.mnemonic,
            self.form,
            &self.operands,
            &self.prefixes,
            self.mode,
        )?;
        self.short_enc = match self.short_form {
            Some(s) => Some(encode_with(
                self.mnemonic,
                s,
                &self.operands,
                &self.prefixes,
                self.mode,
            )?),
            None => None,
        };
        Ok(self)
    }

    /// The canonical mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        self.mnemonic
    }

    /// The bound operands.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// The mode this instruction was built for.
    pub fn mode(&self) -> Arch {
        self.mode
    }

    /// The encoding-selection policy the instruction was built with.
    pub fn opt_level(&self) -> OptLevel {
        self.opt
    }

    /// Current byte length (the long form until size resolution shrinks
    /// it).
    pub fn len(&self) -> usize {
        self.encoded().bytes.len()
    }

    /// An instruction always encodes to at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether the size still depends on an unresolved label distance.
    pub fn is_size_variable(&self) -> bool {
        self.short_enc.is_some() && !self.use_short
    }

    /// The currently selected encoding.
    pub(crate) fn encoded(&self) -> &EncodedInstr {
        if self.use_short {
            self.short_enc.as_ref().expect("short form selected")
        } else {
            &self.enc
        }
    }

    /// Length of the short form, when one exists.
    pub(crate) fn short_len(&self) -> Option<usize> {
        self.short_enc.as_ref().map(|e| e.bytes.len())
    }

    /// Commit to the short form. Called once by size resolution; shrinking
    /// is monotone.
    pub(crate) fn shrink(&mut self) {
        debug_assert!(self.short_enc.is_some());
        self.use_short = true;
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

fn reg_of(op: &Operand) -> Option<Register> {
    match op {
        Operand::Register(r) => Some(*r),
        _ => None,
    }
}

fn imm_sig(form: &InstrForm) -> OperandSig {
    use OperandSig::*;
    *form
        .sig
        .iter()
        .find(|s| matches!(s, Imm8 | Imm16 | Imm32 | Imm64))
        .expect("row has an immediate")
}

fn rel_sig(form: &InstrForm) -> OperandSig {
    use OperandSig::*;
    *form
        .sig
        .iter()
        .find(|s| matches!(s, Rel8 | Rel32))
        .expect("row has a rel field")
}

/// Which operand index feeds each encoding field, per tag.
struct Slots {
    reg: Option<usize>,
    rm: Option<usize>,
    imm: Option<usize>,
    opcode_reg: Option<usize>,
    rel: Option<usize>,
}

impl Slots {
    fn of(tag: EncTag) -> Slots {
        let none = Slots {
            reg: None,
            rm: None,
            imm: None,
            opcode_reg: None,
            rel: None,
        };
        match tag {
            EncTag::Rm => Slots {
                reg: Some(0),
                rm: Some(1),
                ..none
            },
            EncTag::Mr => Slots {
                rm: Some(0),
                reg: Some(1),
                ..none
            },
            EncTag::Mi => Slots {
                rm: Some(0),
                imm: Some(1),
                ..none
            },
            EncTag::Oi => Slots {
                opcode_reg: Some(0),
                imm: Some(1),
                ..none
            },
            EncTag::O(slot) => Slots {
                opcode_reg: Some(slot as usize),
                ..none
            },
            EncTag::Rmi => Slots {
                reg: Some(0),
                rm: Some(1),
                imm: Some(2),
                ..none
            },
            EncTag::M => Slots {
                rm: Some(0),
                ..none
            },
            EncTag::I => Slots {
                imm: Some(0),
                ..none
            },
            EncTag::D => Slots {
                rel: Some(0),
                ..none
            },
            EncTag::Zo => none,
        }
    }
}

// ─── Emission ──────────────────────────────────────────────────────────

/// Encode `operands` with the given row: legacy prefixes, REX, opcode,
/// ModR/M, SIB, displacement, immediate, in that order.
fn encode_with(
    mnemonic: &str,
    form: &'static InstrForm,
    operands: &[Operand],
    prefixes: &[Prefix],
    mode: Arch,
) -> Result<EncodedInstr, AsmError> {
    let mut buf = InstrBytes::new();
    let mut reloc: Option<Relocation> = None;

    let slots = Slots::of(form.tag);
    let reg_op = slots.reg.map(|i| &operands[i]);
    let rm_op = slots.rm.map(|i| &operands[i]);
    let o_op = slots.opcode_reg.map(|i| &operands[i]);

    // Explicit prefixes (lock/rep) first, then the memory operand's
    // segment override and address-size override.
    for p in prefixes {
        buf.push(p.byte());
    }
    let mem = operands.iter().find_map(|op| match op {
        Operand::Memory(m) => Some(&**m),
        _ => None,
    });
    if let Some(m) = mem {
        if let Some(seg) = m.segment {
            buf.push(segment_prefix(seg));
        }
        if let Some(p) = addr_size_prefix(m, mode) {
            buf.push(p);
        }
    }
    // Operand-size override for 16-bit register/memory operands.
    if form
        .sig
        .iter()
        .any(|s| matches!(s, OperandSig::R16 | OperandSig::Rm16))
    {
        buf.push(0x66);
    }
    if form.prefix != 0 {
        buf.push(form.prefix);
    }

    // REX.
    let w = form.rex_w;
    let r = reg_op.map_or(false, |op| reg_of(op).is_some_and(Register::is_extended));
    let (mut x, mut b) = (false, false);
    if let Some(op) = rm_op {
        match op {
            Operand::Register(reg) => b = reg.is_extended(),
            Operand::Memory(m) => (x, b) = mem_rex_xb(m),
            _ => {}
        }
    }
    if let Some(Operand::Register(reg)) = o_op {
        b = reg.is_extended();
    }
    let forced = [reg_op, rm_op, o_op]
        .into_iter()
        .flatten()
        .filter_map(reg_of)
        .any(Register::forces_rex);
    if needs_rex(w, r, x, b) || forced {
        debug_assert!(mode.is_64(), "REX required outside 64-bit mode");
        if let Some((idx, reg)) = operands
            .iter()
            .enumerate()
            .find_map(|(i, op)| reg_of(op).filter(|r| r.is_high_byte()).map(|r| (i, r)))
        {
            return Err(AsmError::OperandMisuse {
                mnemonic: mnemonic.to_owned(),
                operand: idx,
                detail: format!("{reg} cannot be encoded in an instruction requiring REX"),
            });
        }
        buf.push(rex(w, r, x, b));
    }

    // Opcode, with the register index folded into the low bits for O/OI
    // forms.
    if let Some(op) = o_op {
        let reg = reg_of(op).expect("register in opcode slot");
        let (last, rest) = form.opcode.split_last().expect("non-empty opcode");
        buf.extend_from_slice(rest);
        buf.push(last + reg.base_code());
    } else {
        buf.extend_from_slice(form.opcode);
    }

    // ModR/M, SIB, displacement.
    if let Some(op) = rm_op {
        let reg_field = match reg_op {
            Some(op) => reg_of(op).expect("register in reg slot").base_code(),
            None => {
                debug_assert!(form.ext >= 0, "r/m-only row without /digit");
                form.ext.max(0) as u8
            }
        };
        match op {
            Operand::Register(reg) => {
                buf.push(encode::modrm(0b11, reg_field, reg.base_code()));
            }
            Operand::Memory(m) => {
                let slot = emit_mem_modrm(&mut buf, reg_field, m, mode);
                if let Some(ref label) = m.disp_label {
                    let slot = slot.expect("label reference emits a displacement");
                    debug_assert_eq!(slot.size, 4);
                    reloc = Some(Relocation {
                        offset: slot.offset,
                        size: 4,
                        label: label.clone(),
                        kind: if m.base == Some(Register::Rip) {
                            RelocKind::Relative
                        } else {
                            RelocKind::Absolute
                        },
                        addend: m.disp,
                    });
                }
            }
            _ => unreachable!("r/m slot holds register or memory"),
        }
    }

    // Immediate.
    if let Some(i) = slots.imm {
        let bits = imm_bits(imm_sig(form));
        let size = bits / 8;
        match &operands[i] {
            Operand::Immediate(v) => {
                if !fits_signed(*v, bits) && !encode::fits_unsigned(*v, bits) {
                    return Err(AsmError::ImmediateOutOfRange {
                        value: *v,
                        min: -(1i64 << (bits - 1)),
                        max: if bits >= 64 {
                            i64::MAX
                        } else {
                            (1i64 << bits) - 1
                        },
                    });
                }
                emit_imm(&mut buf, *v, size);
            }
            Operand::Label(name) => {
                reloc = Some(Relocation {
                    offset: buf.len(),
                    size,
                    label: name.clone(),
                    kind: RelocKind::Absolute,
                    addend: 0,
                });
                buf.extend_from_slice(&[0u8; 8][..size as usize]);
            }
            _ => unreachable!("immediate slot holds immediate or label"),
        }
    }

    // Relative displacement.
    if let Some(i) = slots.rel {
        let bits: u8 = match rel_sig(form) {
            OperandSig::Rel8 => 8,
            _ => 32,
        };
        let size = bits / 8;
        match &operands[i] {
            Operand::Label(name) => {
                reloc = Some(Relocation {
                    offset: buf.len(),
                    size,
                    label: name.clone(),
                    kind: RelocKind::Relative,
                    addend: 0,
                });
                buf.extend_from_slice(&[0u8; 4][..size as usize]);
            }
            Operand::Immediate(v) => {
                // An integer target is relative to the instruction start;
                // the field encodes distance from the end.
                let disp = v - (buf.len() + size as usize) as i64;
                if !fits_signed(disp, bits) {
                    return Err(AsmError::DisplacementOutOfRange { value: disp, bits });
                }
                emit_imm(&mut buf, disp, size);
            }
            _ => unreachable!("rel slot holds label or immediate"),
        }
    }

    Ok(EncodedInstr { bytes: buf, reloc })
}

// ─── Validation and row selection ──────────────────────────────────────

/// Check register mode legality, normalize memory operands, and enforce
/// the single-label-reference rule.
fn validate_operands(
    mnemonic: &str,
    operands: Vec<Operand>,
    mode: Arch,
) -> Result<Vec<Operand>, AsmError> {
    let mut out = Vec::with_capacity(operands.len());
    let mut label_refs = 0usize;
    for (i, op) in operands.into_iter().enumerate() {
        let op = match op {
            Operand::Register(r) => {
                r.check_arch(mode)?;
                Operand::Register(r)
            }
            Operand::Memory(m) => {
                for reg in [m.base, m.index].into_iter().flatten() {
                    if reg != Register::Rip {
                        reg.check_arch(mode)?;
                    }
                }
                if m.disp_label.is_some() {
                    label_refs += 1;
                }
                let normalized =
                    encode::normalize_mem(&m, mode).map_err(|detail| AsmError::OperandMisuse {
                        mnemonic: mnemonic.to_owned(),
                        operand: i,
                        detail,
                    })?;
                Operand::Memory(Box::new(normalized))
            }
            Operand::Label(name) => {
                label_refs += 1;
                Operand::Label(name)
            }
            Operand::Immediate(v) => Operand::Immediate(v),
        };
        if label_refs > 1 {
            return Err(AsmError::OperandMisuse {
                mnemonic: mnemonic.to_owned(),
                operand: i,
                detail: "at most one label reference per instruction".into(),
            });
        }
        out.push(op);
    }
    Ok(out)
}

/// Select an encoding row (and the short `rel8` alternative for
/// label-targeted branches).
fn select_form(
    mnemonic: &str,
    rows: &'static [InstrForm],
    operands: &[Operand],
    mode: Arch,
    opt: OptLevel,
) -> Result<(&'static InstrForm, Option<&'static InstrForm>), AsmError> {
    let legal: Vec<&'static InstrForm> = rows.iter().filter(|r| r.legal_in(mode)).collect();
    if legal.is_empty() {
        return Err(AsmError::ArchMismatch {
            what: format!("instruction '{mnemonic}'"),
            mode,
        });
    }

    let mut candidates: Vec<(usize, &'static InstrForm, MatchKind)> = Vec::new();
    for (idx, form) in legal.iter().enumerate() {
        if form.sig.len() != operands.len() {
            continue;
        }
        let mut worst = MatchKind::Exact;
        let mut ok = true;
        for (op, &sig) in operands.iter().zip(form.sig) {
            match operand_matches(op, sig, form) {
                Some(kind) => worst = worst.min(kind),
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            candidates.push((idx, form, worst));
        }
    }

    if candidates.is_empty() {
        return Err(AsmError::NoMatchingForm {
            mnemonic: mnemonic.to_owned(),
            supplied: operands
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            tried: legal.iter().map(|f| f.sig_names()).collect(),
        });
    }

    // An unsigned-fallback match is used only when nothing else fits.
    let has_preferred = candidates.iter().any(|&(_, _, k)| k != MatchKind::Backup);
    if has_preferred {
        candidates.retain(|&(_, _, k)| k != MatchKind::Backup);
    }

    let selected = match opt {
        // The first row in transcription order, with the operands' natural
        // signature taking precedence the way the reference's exact-match
        // lookup does.
        OptLevel::Strict => candidates
            .iter()
            .find(|&&(_, _, k)| k == MatchKind::Exact)
            .or_else(|| candidates.first())
            .map(|&(_, form, _)| form)
            .expect("candidates non-empty"),
        // Shortest encoding wins; table order breaks ties. Lengths can be
        // compared before resolution because label fields have fixed
        // placeholder sizes.
        OptLevel::Size => {
            let mut best: Option<(usize, usize, &'static InstrForm)> = None;
            let mut first_err: Option<AsmError> = None;
            for &(idx, form, _) in &candidates {
                match encode_with(mnemonic, form, operands, &[], mode) {
                    Ok(enc) => {
                        let len = enc.bytes.len();
                        let better = match best {
                            None => true,
                            Some((best_len, best_idx, _)) => {
                                len < best_len || (len == best_len && idx < best_idx)
                            }
                        };
                        if better {
                            best = Some((len, idx, form));
                        }
                    }
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
            match best {
                Some((_, _, form)) => form,
                None => return Err(first_err.expect("every candidate failed to encode")),
            }
        }
    };

    // For a label-targeted branch, remember the table's rel8 row so size
    // resolution can shrink to it.
    let short = if matches!(selected.tag, EncTag::D)
        && matches!(operands.first(), Some(Operand::Label(_)))
        && rel_sig(selected) == OperandSig::Rel32
    {
        legal
            .iter()
            .find(|r| {
                matches!(r.tag, EncTag::D) && r.sig.len() == 1 && r.sig[0] == OperandSig::Rel8
            })
            .copied()
    } else {
        None
    };

    Ok((selected, short))
}
