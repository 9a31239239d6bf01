//! The PDP-8 value model: storage classes, the `Expr` symbolic value, and
//! the opcode/micro-instruction bit layout of a PAL-8 instruction word.
//!
//! This is a straight translation of the storage-class lattice described in
//! `struct expr` of the original `pdp8.h`: every operand the compiler ever
//! touches is either an rvalue or the matching lvalue of one of eight
//! classes, plus a handful of `Special` sentinels and a hard `Invalid`
//! marker. Rather than packing class and payload into one 16-bit bitfield
//! the way the C original does, [`Operand`] is a tagged union so illegal
//! states (e.g. an `RStack` payload wider than a scratch slot) are harder
//! to construct by accident.

use std::fmt;

/// Maximum length of the optional debug name carried by an [`Expr`].
/// Purely cosmetic — names are never compared for equality or otherwise
/// semantically significant, only printed into `/ comments`.
pub const MAXNAME: usize = 8;

/// 12-bit PDP-8 word mask.
pub const WORD_MASK: u16 = 0o7777;

/// A numbered global label, minted by [`crate::name::NameTable`].
pub type LabelId = u16;

/// Non-operand sentinels threaded through the same `Expr` channel the
/// parser's semantic actions use for everything else (mirrors `TOKEN`,
/// `EXPIRED`, `NORVAL`, `NOLVAL`, `RANDOM` in the original's `SPECIAL`
/// class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Special {
    /// A raw token as produced by the (out-of-scope) lexer.
    Token,
    /// A stack register that has been popped and must not be reused.
    Expired,
    /// The result of [`Operand::r2lval`] on a value with no rvalue form.
    NorVal,
    /// The result of [`Operand::l2rval`] on a value with no lvalue form.
    NolVal,
    /// AC (or L) holds an expression-accumulator's unknown value.
    Random,
}

/// One of the eight rvalue/lvalue storage-class pairs an operand can live
/// in, or one of the two non-operand markers (`Special`, `Invalid`).
///
/// The payload of every variant is the class-dependent "value" field from
/// `spec.md` §3.1: a literal for the `Const` classes, a label number, a
/// data-area offset, a stack slot, or a frame offset. Constant payloads are
/// masked to 12 bits; slot/offset payloads are masked to 8 bits, matching
/// the invariant in `spec.md` §3.1 ("the payload range for constants is 12
/// bits; for slots/offsets, 8 bits").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// 12-bit literal; its own rvalue.
    RConst(u16),
    /// Absolute memory address. The one class pair where the rvalue
    /// payload (`RConst`) is also directly usable as an `LConst` address.
    LConst(u16),
    /// Zero-page cell whose contents *are* the value.
    RValue(u8),
    /// Zero-page cell that points to the value.
    LValue(u8),
    /// Label number; rvalue is the address the label names.
    RLabel(LabelId),
    /// Label number; lvalue is the word stored at that address.
    LLabel(LabelId),
    /// Offset into the constant data area.
    RData(u16),
    /// Value stored at that data-area offset.
    LData(u16),
    /// Stack-register index; holds an rvalue.
    RStack(u8),
    /// Stack-register index; holds a pointer.
    LStack(u8),
    /// Offset in the automatic-variable area (address).
    RAuto(u8),
    /// Offset in the automatic-variable area (value).
    LAuto(u8),
    /// Offset in the parameter area (address).
    RParam(u8),
    /// Offset in the parameter area (value).
    LParam(u8),
    /// Non-operand sentinel (see [`Special`]).
    Special(Special),
    /// Hard invalid marker — never a legal rvalue or lvalue.
    Invalid,
}

impl Operand {
    /// `RCONST | 0`, the canonical "AC holds a known zero" acstate.
    pub const ZERO: Operand = Operand::RConst(0);

    /// Whether `self` names a real storage location (i.e. is neither
    /// `Special` nor `Invalid`). Mirrors `isvalid()`.
    pub fn is_valid(self) -> bool {
        !matches!(self, Operand::Special(_) | Operand::Invalid)
    }

    /// Whether `self` is an lvalue (mirrors `islval()`).
    pub fn is_lvalue(self) -> bool {
        matches!(
            self,
            Operand::LConst(_)
                | Operand::LValue(_)
                | Operand::LLabel(_)
                | Operand::LData(_)
                | Operand::LStack(_)
                | Operand::LAuto(_)
                | Operand::LParam(_)
        )
    }

    /// Whether `self` is an rvalue (mirrors `isrval()`; `Special`/`Invalid`
    /// are neither).
    pub fn is_rvalue(self) -> bool {
        self.is_valid() && !self.is_lvalue()
    }

    /// Whether `self` is exactly `RConst(_)` (mirrors `isconst()`).
    pub fn is_const(self) -> bool {
        matches!(self, Operand::RConst(_))
    }

    /// Whether `self` is an `RStack`/`LStack` operand (mirrors `onstack()`).
    pub fn on_stack(self) -> bool {
        matches!(self, Operand::RStack(_) | Operand::LStack(_))
    }

    /// The 12-bit constant carried by `RConst`, if any.
    pub fn const_value(self) -> Option<u16> {
        match self {
            Operand::RConst(v) => Some(v & WORD_MASK),
            _ => None,
        }
    }

    /// Reinterpret an rvalue as the lvalue that refers to it (mirrors
    /// `r2lval`). Legal for `RConst, RValue, RLabel, RData, RStack, RAuto,
    /// RParam`; anything else yields `Special(NorVal)`.
    pub fn r2lval(self) -> Operand {
        match self {
            Operand::RConst(v) => Operand::LConst(v & WORD_MASK),
            Operand::RValue(v) => Operand::LValue(v),
            Operand::RLabel(v) => Operand::LLabel(v),
            Operand::RData(v) => Operand::LData(v),
            Operand::RStack(v) => Operand::LStack(v),
            Operand::RAuto(v) => Operand::LAuto(v),
            Operand::RParam(v) => Operand::LParam(v),
            _ => Operand::Special(Special::NorVal),
        }
    }

    /// Reinterpret an lvalue as the rvalue holding its address (mirrors
    /// `l2rval`). Legal for `LConst, LValue, LLabel, LData, LStack, LAuto,
    /// LParam`; anything else yields `Special(NolVal)`.
    pub fn l2rval(self) -> Operand {
        match self {
            Operand::LConst(v) => Operand::RConst(v & WORD_MASK),
            Operand::LValue(v) => Operand::RValue(v),
            Operand::LLabel(v) => Operand::RLabel(v),
            Operand::LData(v) => Operand::RData(v),
            Operand::LStack(v) => Operand::RStack(v),
            Operand::LAuto(v) => Operand::RAuto(v),
            Operand::LParam(v) => Operand::RParam(v),
            _ => Operand::Special(Special::NolVal),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::RConst(v) | Operand::LConst(v) => write!(f, "{v:04o}"),
            Operand::RValue(v) | Operand::LValue(v) => write!(f, "{v:04o}"),
            Operand::RLabel(v) | Operand::LLabel(v) => write!(f, "L{v:04}"),
            Operand::RData(v) | Operand::LData(v) => write!(f, "DATA+{v:04o}"),
            Operand::RStack(v) | Operand::LStack(v) => write!(f, "<stack+{v:03o}>"),
            Operand::RAuto(v) | Operand::LAuto(v) => write!(f, "<auto+{v:03o}>"),
            Operand::RParam(v) | Operand::LParam(v) => write!(f, "<param+{v:03o}>"),
            Operand::Special(s) => write!(f, "<{s:?}>"),
            Operand::Invalid => write!(f, "<invalid>"),
        }
    }
}

/// A symbolic value: a storage-class/payload pair (`Operand`) plus an
/// optional debug name. `name` is never compared or branched on by the
/// code generator; it only ever ends up in a `/ comment`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expr {
    pub operand: Option<Operand>,
    pub name: String,
}

impl Expr {
    pub fn new(operand: Operand) -> Expr {
        Expr {
            operand: Some(operand),
            name: String::new(),
        }
    }

    pub fn named(operand: Operand, name: impl Into<String>) -> Expr {
        let mut name = name.into();
        name.truncate(MAXNAME);
        Expr {
            operand: Some(operand),
            name,
        }
    }

    pub fn invalid() -> Expr {
        Expr::new(Operand::Invalid)
    }

    pub fn random() -> Expr {
        Expr::new(Operand::Special(Special::Random))
    }

    pub fn zero() -> Expr {
        Expr::new(Operand::ZERO)
    }

    pub fn value(&self) -> Operand {
        self.operand.unwrap_or(Operand::Invalid)
    }

    pub fn r2lval(&self) -> Expr {
        Expr {
            operand: Some(self.value().r2lval()),
            name: self.name.clone(),
        }
    }

    pub fn l2rval(&self) -> Expr {
        Expr {
            operand: Some(self.value().l2rval()),
            name: self.name.clone(),
        }
    }
}

impl From<Operand> for Expr {
    fn from(operand: Operand) -> Expr {
        Expr::new(operand)
    }
}

/// Memory-reference opcode field (bits 11-9 of the instruction word),
/// matching the PAL-8 mnemonics the assembler prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mri {
    And,
    Tad,
    Isz,
    Dca,
    Jms,
    Jmp,
}

impl Mri {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Mri::And => "AND",
            Mri::Tad => "TAD",
            Mri::Isz => "ISZ",
            Mri::Dca => "DCA",
            Mri::Jms => "JMS",
            Mri::Jmp => "JMP",
        }
    }
}

// Real PDP-8 opcodes, left shifted into the top 3 bits of a 12-bit word as
// the original's octal constants do (AND = 0000, TAD = 1000, ...).
pub const AND: u16 = 0o0000;
pub const TAD: u16 = 0o1000;
pub const ISZ: u16 = 0o2000;
pub const DCA: u16 = 0o3000;
pub const JMS: u16 = 0o4000;
pub const JMP: u16 = 0o5000;
pub const IOT: u16 = 0o6000;
pub const OPR: u16 = 0o7000;

/// Mask isolating the memory-reference opcode field.
pub const OP_MASK: u16 = 0o7000;

// Pseudo-instructions understood only by `isel` (never emitted literally);
// bit 0o10000 distinguishes them from real 12-bit instruction words.
pub const LDA: u16 = 0o06000;
pub const CUP: u16 = 0o10000;
pub const RST: u16 = 0o11000;
pub const RND: u16 = 0o12000;
pub const LIV: u16 = 0o13000;

/// Mask isolating the pseudo-instruction bit.
pub const PSEUDO_MASK: u16 = 0o10000;

// Group 1 OPR (bit 0o400 clear): arithmetic/rotate micro-instructions.
// These combine freely except RAL and RAR (mutually exclusive).
pub const OPR1: u16 = OPR;
pub const CLA: u16 = OPR1 | 0o0200;
pub const CLL: u16 = OPR1 | 0o0100;
pub const CMA: u16 = OPR1 | 0o0040;
pub const CML: u16 = OPR1 | 0o0020;
pub const RAR: u16 = OPR1 | 0o0010;
pub const RAL: u16 = OPR1 | 0o0004;
pub const BSW: u16 = OPR1 | 0o0002;
pub const IAC: u16 = OPR1 | 0o0001;

pub const NOP: u16 = OPR1;
pub const RTR: u16 = RAR | BSW;
pub const RTL: u16 = RAL | BSW;
pub const STA: u16 = CLA | CMA;
pub const STL: u16 = CLL | CML;
pub const CIA: u16 = CMA | IAC;
pub const GLK: u16 = CLA | RAL;

// Group 2 OPR (bit 0o400 set): skip micro-instructions, plus CLA.
pub const OPR2: u16 = OPR | 0o0400;
pub const SMA: u16 = OPR2 | 0o0100;
pub const SZA: u16 = OPR2 | 0o0040;
pub const SNL: u16 = OPR2 | 0o0020;
pub const SKP: u16 = OPR2 | 0o0010;

pub const SPA: u16 = SKP | SMA;
pub const SNA: u16 = SKP | SZA;
pub const SZL: u16 = SKP | SNL;

// Privileged / group 3 — unsupported per spec.md §1, but named so
// `emitopr`'s fallback path can recognise and reject them by name.
pub const OSR: u16 = OPR2 | 0o0004;
pub const HLT: u16 = OPR2 | 0o0002;
pub const OPR3: u16 = OPR2 | 0o0001;

/// Classify the memory-reference field of an instruction word, returning
/// `None` for `OPR`/`IOT`/pseudo-instructions.
pub fn mri_of(op: u16) -> Option<Mri> {
    match op & OP_MASK {
        AND => Some(Mri::And),
        TAD => Some(Mri::Tad),
        ISZ => Some(Mri::Isz),
        DCA => Some(Mri::Dca),
        JMS => Some(Mri::Jms),
        JMP => Some(Mri::Jmp),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_rvalue_classes() {
        let cases = [
            Operand::RConst(0o17),
            Operand::RValue(5),
            Operand::RLabel(3),
            Operand::RData(9),
            Operand::RStack(1),
            Operand::RAuto(2),
            Operand::RParam(0),
        ];
        for op in cases {
            assert_eq!(op.r2lval().l2rval(), op, "round trip failed for {op:?}");
        }
    }

    #[test]
    fn r2lval_rejects_lvalues() {
        assert_eq!(
            Operand::LValue(1).r2lval(),
            Operand::Special(Special::NorVal)
        );
    }

    #[test]
    fn l2rval_rejects_rvalues() {
        assert_eq!(
            Operand::RValue(1).l2rval(),
            Operand::Special(Special::NolVal)
        );
    }

    #[test]
    fn r2lval_and_l2rval_reject_special_and_invalid() {
        assert_eq!(
            Operand::Invalid.r2lval(),
            Operand::Special(Special::NorVal)
        );
        assert_eq!(
            Operand::Special(Special::Random).l2rval(),
            Operand::Special(Special::NolVal)
        );
    }

    #[test]
    fn rconst_is_its_own_lconst_payload() {
        // The one class pair where the rvalue payload doubles as an address.
        assert_eq!(Operand::RConst(0o123).r2lval(), Operand::LConst(0o123));
    }
}
