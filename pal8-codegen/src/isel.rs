//! The instruction-selection state machine (`spec.md` §3.5/§4.6): a
//! deferred-execution peephole optimiser that simulates L:AC symbolically
//! and only touches the real output stream when the simulation and the
//! machine must be reconciled.
//!
//! Grounded in `original_source/src/isel.c`. The constant-folding
//! reconvergence table (`fold()`/`findseq` in the original) is scoped down
//! here to the three canonical single-`OPR`-word forms `spec.md` §4.6.4
//! names explicitly (`CLA` for 0, `CLA IAC` for +1, `STA` for -1); see
//! `DESIGN.md` for why the exhaustive multi-entry table wasn't ported.

use std::io::Write;

use smallvec::SmallVec;

use crate::codegen::{self, Frame};
use crate::error::{Diagnostics, Fault};
use crate::pdp8::{self, Expr, Mri, Operand};

/// Upper bound on the number of instructions `isel` can hold back before
/// flushing (`spec.md` §3.5).
pub const MAXDEFER: usize = 10;

/// Which bits of an `(L:AC)` pair the simulator currently has a definite
/// answer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Known {
    /// `L` is known exactly.
    pub lknown: bool,
    /// `L` is allowed to be anything (don't-care) — weaker than `lknown`.
    pub lany: bool,
    /// `AC` is known exactly.
    pub acknown: bool,
}

/// A simulated `(L:AC)` pair. `lac` packs `L` into bit 12 and `AC` into
/// bits 11-0, matching the original's `u13` packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ac {
    pub lac: u16,
    pub known: Known,
}

impl Ac {
    pub const ZERO: Ac = Ac {
        lac: 0,
        known: Known {
            lknown: true,
            lany: false,
            acknown: true,
        },
    };

    pub fn l(self) -> bool {
        self.lac & 0o10000 != 0
    }

    pub fn value(self) -> u16 {
        self.lac & pdp8::WORD_MASK
    }
}

/// The skip-sequencing sub-machine (`spec.md` §4.6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipState {
    Normal,
    DoSkip,
    Skipable,
    SkipFwd,
}

#[derive(Debug, Clone)]
struct Deferred {
    op: u16,
    arg: Expr,
}

/// The simulator. Owns `have`/`want`, the deferred instruction buffer, the
/// skip sub-machine, and the AC-contents tracker used for push/load
/// elision (`acstate`, `dirty` — both actually mutated by the op layer in
/// `lib.rs`, which is why they're `pub(crate)`).
pub struct Isel {
    have: Ac,
    want: Ac,
    deferred: SmallVec<[Deferred; MAXDEFER]>,
    skipstate: SkipState,
    pub(crate) acstate: Expr,
    pub(crate) dirty: bool,
}

impl Default for Isel {
    fn default() -> Isel {
        Isel::new()
    }
}

impl Isel {
    pub fn new() -> Isel {
        Isel {
            have: Ac::ZERO,
            want: Ac::ZERO,
            deferred: SmallVec::new(),
            skipstate: SkipState::Normal,
            acstate: Expr::zero(),
            dirty: false,
        }
    }

    pub fn have(&self) -> Ac {
        self.have
    }

    pub fn want(&self) -> Ac {
        self.want
    }

    pub fn skipstate(&self) -> SkipState {
        self.skipstate
    }

    pub fn acstate(&self) -> &Expr {
        &self.acstate
    }

    /// `L` is about to become a don't-care (mirrors `lany`): weakens the
    /// knowledge bits without touching the value itself.
    pub fn lany(&mut self) {
        self.want.known.lknown = false;
        self.want.known.lany = true;
    }

    /// `RST`: drop every deferred instruction and reset the simulated
    /// machine to a known L:AC = 0 (mirrors `iselrst`).
    pub fn reset(&mut self) {
        self.have = Ac::ZERO;
        self.want = Ac::ZERO;
        self.deferred.clear();
        self.skipstate = SkipState::Normal;
        self.acstate = Expr::zero();
        self.dirty = false;
    }

    /// `RND`: AC now holds an unknowable runtime value (mirrors
    /// `iselacrnd`, called by the op layer's `acrandom()` after a
    /// writeback).
    pub fn forget_ac(&mut self) {
        self.want.known.acknown = false;
        self.have.known.acknown = false;
        self.acstate = Expr::random();
    }

    /// Flush the deferred list by emitting each instruction for real, then
    /// collapse `have` into `want` (mirrors `undefer`).
    pub fn undefer<W: Write>(
        &mut self,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        if !self.deferred.is_empty() {
            log::trace!("undefer: flushing {} deferred instruction(s)", self.deferred.len());
        }
        for d in self.deferred.drain(..) {
            codegen::emitisn(asm, frame, diags, d.op, &d.arg)?;
        }
        self.have = self.want;
        Ok(())
    }

    fn defer<W: Write>(
        &mut self,
        op: u16,
        e: &Expr,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        if self.deferred.len() >= MAXDEFER {
            diags.warn(None, "defer list full, flushing early");
            self.undefer(frame, diags, asm)?;
        }
        self.deferred.push(Deferred {
            op,
            arg: e.clone(),
        });
        Ok(())
    }

    /// The main entry point: route to the handler for the current skip
    /// state (mirrors `isel`).
    pub fn isel<W: Write>(
        &mut self,
        op: u16,
        e: &Expr,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        log::debug!("isel({op:04o}, {e:?}) in {:?}", self.skipstate);
        match self.skipstate {
            SkipState::Normal => self.normalsel(op, e, frame, diags, asm),
            SkipState::DoSkip => self.doskip(op, e, frame, diags, asm),
            SkipState::Skipable => self.skipsel(op, e, frame, diags, asm),
            SkipState::SkipFwd => self.skipfwd(op, e, frame, diags, asm),
        }
    }

    fn normalsel<W: Write>(
        &mut self,
        op: u16,
        e: &Expr,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        match op {
            pdp8::CUP => return self.undefer(frame, diags, asm),
            pdp8::RST => {
                self.reset();
                return Ok(());
            }
            pdp8::RND => {
                self.forget_ac();
                return Ok(());
            }
            pdp8::LIV => {
                self.lany();
                return Ok(());
            }
            _ => {}
        }

        if let Some(mri) = pdp8::mri_of(op) {
            return self.normalsel_mri(mri, op, e, frame, diags, asm);
        }

        if op & pdp8::OP_MASK == pdp8::OPR {
            return if op & 0o400 == 0 {
                self.opr_group1(op, frame, diags, asm)
            } else {
                self.opr_group2(op, frame, diags, asm)
            };
        }

        Err(Fault::UnknownPseudo(op))
    }

    fn normalsel_mri<W: Write>(
        &mut self,
        mri: Mri,
        op: u16,
        e: &Expr,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        match mri {
            Mri::And => {
                if let Some(c) = e.value().const_value() {
                    if c == pdp8::WORD_MASK {
                        return Ok(()); // AND 07777 is a no-op.
                    }
                    if c == 0 {
                        return self.opr_group1(pdp8::CLA, frame, diags, asm);
                    }
                    self.want.lac &= 0o10000 | c;
                    self.want.known.acknown = true;
                    self.defer(op, e, frame, diags, asm)?;
                    self.fold(frame, diags, asm)
                } else {
                    self.undefer(frame, diags, asm)?;
                    codegen::emitisn(asm, frame, diags, op, e)?;
                    self.want.known.acknown = false;
                    self.have = self.want;
                    Ok(())
                }
            }
            Mri::Tad => {
                if let Some(c) = e.value().const_value() {
                    if c == 0 {
                        return Ok(()); // TAD 0 is a no-op.
                    }
                    self.want.lac = (self.want.lac.wrapping_add(c)) & 0o17777;
                    self.defer(op, e, frame, diags, asm)?;
                    self.fold(frame, diags, asm)
                } else {
                    self.undefer(frame, diags, asm)?;
                    codegen::emitisn(asm, frame, diags, op, e)?;
                    self.want.known.acknown = false;
                    self.want.known.lknown = false;
                    self.want.known.lany = true;
                    self.have = self.want;
                    Ok(())
                }
            }
            Mri::Isz => {
                self.skipstate = SkipState::Skipable;
                if self.acstate.value().is_valid() && self.acstate.value() == e.value() {
                    self.want.known.acknown = false;
                }
                self.undefer(frame, diags, asm)?;
                codegen::emitisn(asm, frame, diags, op, e)?;
                self.have = self.want;
                Ok(())
            }
            Mri::Dca => {
                self.undefer(frame, diags, asm)?;
                codegen::emitisn(asm, frame, diags, op, e)?;
                self.want.lac &= 0o10000;
                self.want.known.acknown = true;
                self.have = self.want;
                Ok(())
            }
            Mri::Jmp | Mri::Jms => {
                self.undefer(frame, diags, asm)?;
                codegen::emitisn(asm, frame, diags, op, e)
            }
        }
    }

    fn opr_group1<W: Write>(
        &mut self,
        mut op: u16,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        let mut will = self.want;
        let mut must_emit = false;
        let original = op;

        loop {
            let micro = peelopr(&mut op);
            if micro == pdp8::NOP {
                break;
            }
            match micro {
                pdp8::CLA => {
                    will.lac &= 0o10000;
                    will.known.acknown = true;
                }
                pdp8::CLL => {
                    will.lac &= pdp8::WORD_MASK;
                    will.known.lknown = true;
                    will.known.lany = false;
                }
                pdp8::CMA => {
                    if will.known.acknown {
                        will.lac ^= pdp8::WORD_MASK;
                    } else {
                        must_emit = true;
                    }
                }
                pdp8::CML => {
                    if will.known.lknown {
                        will.lac ^= 0o10000;
                    } else if !will.known.lany {
                        must_emit = true;
                    }
                }
                pdp8::IAC => {
                    if will.known.acknown {
                        will.lac = will.lac.wrapping_add(1) & 0o17777;
                    } else {
                        must_emit = true;
                    }
                }
                rotate if rotate & (pdp8::RAR | pdp8::RAL | pdp8::BSW) != 0 => {
                    if !apply_rotate(&mut will, rotate) {
                        must_emit = true;
                    }
                }
                _ => {}
            }
        }

        if must_emit {
            self.undefer(frame, diags, asm)?;
            codegen::emitisn(asm, frame, diags, original, &Expr::invalid())?;
            self.want = will;
            self.have = self.want;
            return Ok(());
        }

        if will == self.want {
            return Ok(()); // Provable no-op under current knowledge.
        }

        self.want = will;
        self.defer(original, &Expr::invalid(), frame, diags, asm)?;
        self.fold(frame, diags, asm)
    }

    fn opr_group2<W: Write>(
        &mut self,
        op: u16,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        let before = self.want;
        let condition_bits = op & (pdp8::SMA | pdp8::SZA | pdp8::SNL | pdp8::SKP);
        let mut any_unknown = false;
        let mut any_true = false;

        if condition_bits & pdp8::SMA != 0 {
            if before.known.acknown {
                any_true |= before.lac & 0o4000 != 0;
            } else {
                any_unknown = true;
            }
        }
        if condition_bits & pdp8::SZA != 0 {
            if before.known.acknown {
                any_true |= before.value() == 0;
            } else {
                any_unknown = true;
            }
        }
        if condition_bits & pdp8::SNL != 0 {
            if before.known.lknown {
                any_true |= before.l();
            } else {
                any_unknown = true;
            }
        }
        if condition_bits & pdp8::SKP != 0 && condition_bits & (pdp8::SMA | pdp8::SZA | pdp8::SNL) == 0 {
            any_true = true; // Unconditional skip.
        }

        let mut new_want = before;
        if op & pdp8::CLA != 0 {
            new_want.lac &= 0o10000;
            new_want.known.acknown = true;
        }

        if any_unknown {
            self.undefer(frame, diags, asm)?;
            codegen::emitisn(asm, frame, diags, op, &Expr::invalid())?;
            self.want = new_want;
            self.have = self.want;
            self.skipstate = SkipState::Skipable;
            return Ok(());
        }

        self.want = new_want;
        self.defer(op, &Expr::invalid(), frame, diags, asm)?;
        if any_true {
            self.skipstate = SkipState::DoSkip;
        }
        Ok(())
    }

    /// `DOSKIP`: the skip is proven to happen. If it (and therefore the
    /// instruction it skips over) is still only deferred, drop both and
    /// return to `NORMAL`; if the skip already reached the output stream,
    /// fall through to `SKIPABLE` treatment for `(op, e)`.
    fn doskip<W: Write>(
        &mut self,
        op: u16,
        e: &Expr,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        if self.deferred.pop().is_some() {
            self.skipstate = SkipState::Normal;
            return Ok(()); // (op, e) is the skipped-over instruction; drop it too.
        }
        self.skipstate = SkipState::Skipable;
        self.skipsel(op, e, frame, diags, asm)
    }

    /// `SKIPABLE`: the next instruction's fate is unknown at compile time,
    /// so emit it verbatim and forget whatever knowledge it could have
    /// invalidated — unless it provably doesn't touch L:AC.
    fn skipsel<W: Write>(
        &mut self,
        op: u16,
        e: &Expr,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        codegen::emitisn(asm, frame, diags, op, e)?;

        let preserves = match op {
            pdp8::NOP => true,
            pdp8::CLA => self.want.known.acknown && self.want.value() == 0,
            pdp8::CLL => self.want.known.lknown && !self.want.l(),
            _ => pdp8::mri_of(op) == Some(Mri::Jmp) || pdp8::mri_of(op) == Some(Mri::Jms),
        };

        if !preserves {
            self.want.known.acknown = false;
            self.want.known.lknown = false;
            self.want.known.lany = true;
            self.acstate = Expr::random();
        }
        self.have = self.want;

        self.skipstate = if op == pdp8::IAC || op == (pdp8::CLA | pdp8::IAC) {
            SkipState::SkipFwd
        } else if op & pdp8::OP_MASK == pdp8::OPR && op & 0o400 != 0 {
            SkipState::Skipable
        } else {
            SkipState::Normal
        };
        Ok(())
    }

    /// `SKIPFWD`: an `IAC`-family instruction is waiting to see whether the
    /// next op is the `SZA|CLA`/`SNA|CLA` pattern that lets it fold into
    /// the skip already on the output stream. Anything else falls back to
    /// `SKIPABLE` treatment.
    fn skipfwd<W: Write>(
        &mut self,
        op: u16,
        e: &Expr,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        let sza_cla = pdp8::SZA | pdp8::CLA;
        let sna_cla = pdp8::SNA | pdp8::CLA;
        if op == sza_cla || op == sna_cla {
            self.skipstate = SkipState::Normal;
            self.want.known.acknown = false;
            self.have = self.want;
            Ok(())
        } else {
            self.skipstate = SkipState::Skipable;
            self.skipsel(op, e, frame, diags, asm)
        }
    }

    /// Collapse the deferred list back down to the canonical one- or
    /// two-instruction `CLA`-based forms named in `spec.md` §4.6.4, when
    /// the fully-known target is reachable that way (mirrors `fold`/
    /// `findseq` in the original). A conservative subset of the original's
    /// table: only the three constants `spec.md` §4.6.4 names explicitly
    /// (0, +1, -1, each one physical `OPR` word) are recognised; anything
    /// outside it is left deferred as plain `AND`/`TAD` instructions
    /// instead, which is always correct, just not always maximally short.
    fn fold<W: Write>(
        &mut self,
        frame: &mut Frame,
        diags: &mut Diagnostics,
        asm: &mut crate::asm::Writer<W>,
    ) -> Result<(), Fault> {
        if let Some(op) = self.reconverge() {
            log::trace!("fold: collapsing {} deferred instruction(s) into {op:04o}", self.deferred.len());
            self.deferred.clear();
            self.defer(op, &Expr::invalid(), frame, diags, asm)?;
        }

        if self.deferred.len() <= 2 {
            return Ok(());
        }
        log::trace!("fold: {} deferred instructions exceed the reconvergence window", self.deferred.len());
        self.undefer(frame, diags, asm)
    }

    /// If at least two deferred instructions are all plain `AND`/`TAD`s or
    /// group-1 `OPR`s (i.e. nothing that's already been forced to the
    /// output stream) and the resulting `want` is a fully known accumulator
    /// value this table covers, return the single `OPR` word that reaches
    /// the same value from a freshly cleared `AC` (`CLA` for 0, `CLA IAC`
    /// for +1, `STA` for -1). Each of these leaves `L` untouched, which only
    /// matches the sequence it replaces when that sequence started from a
    /// known-zero `AC` too small to carry into `L` — exactly the case a
    /// preceding `CLA` (which always deferred-precedes a `load`'s `TAD`)
    /// guarantees.
    fn reconverge(&self) -> Option<u16> {
        if self.deferred.len() < 2 || !self.want.known.acknown {
            return None;
        }
        let reconvergeable = |op: u16| {
            matches!(pdp8::mri_of(op), Some(Mri::And) | Some(Mri::Tad))
                || (op & pdp8::OP_MASK == pdp8::OPR && op & 0o0400 == 0)
        };
        if self.deferred.iter().any(|d| !reconvergeable(d.op)) {
            return None;
        }
        match self.want.value() {
            0 => Some(pdp8::CLA),
            1 => Some(pdp8::CLA | pdp8::IAC),
            pdp8::WORD_MASK => Some(pdp8::STA),
            _ => None,
        }
    }
}

/// Pop the next micro-instruction bit (or bit group, for the mutually
/// exclusive rotate field) off `op`, in the fixed peeling order `spec.md`
/// §4.6.1 specifies. Returns `NOP` once nothing remains.
pub fn peelopr(op: &mut u16) -> u16 {
    if *op & 0o400 == 0 {
        for bit in [pdp8::CLA, pdp8::CLL, pdp8::CMA, pdp8::CML, pdp8::IAC] {
            if *op & bit == bit {
                *op &= !bit;
                return bit;
            }
        }
        let rotate_mask = pdp8::RAR | pdp8::RAL | pdp8::BSW;
        if *op & rotate_mask != 0 {
            let bits = *op & rotate_mask;
            *op &= !rotate_mask;
            return bits;
        }
    } else {
        for bit in [pdp8::SMA, pdp8::SZA, pdp8::SNL, pdp8::SKP, pdp8::CLA] {
            if *op & bit == bit {
                *op &= !bit;
                return bit;
            }
        }
    }
    pdp8::NOP
}

/// Apply a group-1 rotate micro-instruction to a fully-known `Ac`,
/// returning `false` (leaving `will` untouched) if the inputs it needs
/// aren't known. `BSW` alone only permutes `AC`'s two halves and needs no
/// knowledge of `L`; `RAR`/`RAL`/`RTR`/`RTL` all shift `L` into `AC` and so
/// need `L` known exactly.
fn apply_rotate(will: &mut Ac, bits: u16) -> bool {
    let is_swap_only = bits == pdp8::BSW;
    if is_swap_only {
        if !will.known.acknown {
            return false;
        }
        let ac = will.value();
        will.lac = (will.lac & 0o10000) | (((ac & 0o7700) >> 6) | ((ac & 0o0077) << 6));
        return true;
    }

    if !will.known.acknown || !will.known.lknown {
        return false;
    }
    let times = if bits & pdp8::BSW != 0 { 2 } else { 1 };
    for _ in 0..times {
        let l = will.l();
        let ac = will.value();
        if bits & pdp8::RAR != 0 {
            let new_l = ac & 1 != 0;
            let new_ac = (ac >> 1) | ((l as u16) << 11);
            will.lac = ((new_l as u16) << 12) | new_ac;
        } else {
            let new_l = ac & 0o4000 != 0;
            let new_ac = ((ac << 1) | (l as u16)) & pdp8::WORD_MASK;
            will.lac = ((new_l as u16) << 12) | new_ac;
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::name::Definitions;

    fn setup() -> (Isel, Frame, Diagnostics, crate::asm::Writer<Vec<u8>>) {
        let mut defs = Definitions::new();
        (
            Isel::new(),
            Frame::new(&mut defs),
            Diagnostics::new(),
            crate::asm::Writer::buffered(),
        )
    }

    #[test]
    fn starts_with_known_zero_ac() {
        let (isel, ..) = setup();
        assert_eq!(isel.want().value(), 0);
        assert!(isel.want().known.acknown);
        assert!(isel.want().known.lknown);
    }

    #[test]
    fn reset_clears_deferred_and_restores_zero() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        isel.isel(pdp8::TAD, &Expr::new(Operand::RConst(5)), &mut frame, &mut diags, &mut asm)
            .unwrap();
        isel.isel(pdp8::RST, &Expr::invalid(), &mut frame, &mut diags, &mut asm)
            .unwrap();
        assert_eq!(isel.have(), isel.want());
        assert_eq!(isel.want().value(), 0);
        assert!(isel.want().known.acknown);
    }

    #[test]
    fn constant_and_of_zero_becomes_cla() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        isel.isel(
            pdp8::AND,
            &Expr::new(Operand::RConst(0)),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        assert_eq!(isel.want().value(), 0);
        assert!(isel.want().known.acknown);
    }

    #[test]
    fn tad_with_known_zero_ac_accumulates_symbolically() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        isel.isel(
            pdp8::TAD,
            &Expr::new(Operand::RConst(1)),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        isel.isel(
            pdp8::TAD,
            &Expr::new(Operand::RConst(2)),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        assert_eq!(isel.want().value(), 3);
    }

    #[test]
    fn dca_clears_want_and_marks_ac_known() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        isel.isel(
            pdp8::TAD,
            &Expr::new(Operand::RConst(1)),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        isel.isel(
            pdp8::DCA,
            &Expr::new(Operand::RAuto(0)),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        assert_eq!(isel.want().value(), 0);
        assert!(isel.want().known.acknown);
        assert!(asm.column() > 0);
    }

    #[test]
    fn cla_opr_is_deferred_and_leaves_ac_known_zero() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        isel.isel(pdp8::CLA, &Expr::invalid(), &mut frame, &mut diags, &mut asm)
            .unwrap();
        assert_eq!(isel.want().value(), 0);
        assert!(isel.want().known.acknown);
    }

    #[test]
    fn isz_enters_skipable_and_emits_immediately() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        isel.isel(
            pdp8::ISZ,
            &Expr::new(Operand::RAuto(0)),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        assert_eq!(isel.skipstate(), SkipState::Skipable);
        assert!(asm.column() > 0);
    }

    #[test]
    fn doskip_drops_deferred_skip_and_the_instruction_after_it() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        // CLA then SZA|CLA (unconditional-looking skip since AC known zero).
        isel.isel(pdp8::CLA, &Expr::invalid(), &mut frame, &mut diags, &mut asm)
            .unwrap();
        isel.isel(
            pdp8::SZA | pdp8::CLA,
            &Expr::invalid(),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        assert_eq!(isel.skipstate(), SkipState::DoSkip);
        let before = asm.column();
        isel.isel(pdp8::NOP, &Expr::invalid(), &mut frame, &mut diags, &mut asm)
            .unwrap();
        assert_eq!(isel.skipstate(), SkipState::Normal);
        assert_eq!(asm.column(), before); // Nothing was emitted for the dropped instruction.
    }

    /// `spec.md` §8 scenario 2: loading the constant 1 must collapse to a
    /// single `CLA IAC`, not a `CLA` followed by a `TAD` of a spilled
    /// frame-template word.
    #[test]
    fn fold_collapses_cla_then_tad_one_into_a_single_cla_iac() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        // Forget AC first so the CLA that follows is a real, deferred
        // instruction rather than a no-op against an already-known-zero AC
        // (matching `lda`'s real precondition: AC holds something else).
        isel.isel(pdp8::RND, &Expr::invalid(), &mut frame, &mut diags, &mut asm)
            .unwrap();
        isel.isel(pdp8::CLA, &Expr::invalid(), &mut frame, &mut diags, &mut asm)
            .unwrap();
        isel.isel(
            pdp8::TAD,
            &Expr::new(Operand::RConst(1)),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        isel.undefer(&mut frame, &mut diags, &mut asm).unwrap();
        let text = asm.finish();
        assert!(text.contains("CLA IAC"), "expected a collapsed CLA IAC, got: {text}");
        assert!(!text.contains("TAD"), "TAD should have folded away, got: {text}");
    }

    /// Loading -1 the same way collapses to `STA`.
    #[test]
    fn fold_collapses_cla_then_tad_minus_one_into_sta() {
        let (mut isel, mut frame, mut diags, mut asm) = setup();
        isel.isel(pdp8::RND, &Expr::invalid(), &mut frame, &mut diags, &mut asm)
            .unwrap();
        isel.isel(pdp8::CLA, &Expr::invalid(), &mut frame, &mut diags, &mut asm)
            .unwrap();
        isel.isel(
            pdp8::TAD,
            &Expr::new(Operand::RConst(pdp8::WORD_MASK)),
            &mut frame,
            &mut diags,
            &mut asm,
        )
        .unwrap();
        isel.undefer(&mut frame, &mut diags, &mut asm).unwrap();
        let text = asm.finish();
        assert!(text.contains("STA"), "expected a collapsed STA, got: {text}");
        assert!(!text.contains("TAD"), "TAD should have folded away, got: {text}");
    }

    #[test]
    fn peelopr_yields_bits_in_fixed_order_then_nop() {
        let mut op = pdp8::CLA | pdp8::IAC;
        assert_eq!(peelopr(&mut op), pdp8::CLA);
        assert_eq!(peelopr(&mut op), pdp8::IAC);
        assert_eq!(peelopr(&mut op), pdp8::NOP);
    }

    #[test]
    fn bsw_swaps_halves_without_needing_l() {
        let mut ac = Ac {
            lac: 0o0001,
            known: Known {
                lknown: false,
                lany: true,
                acknown: true,
            },
        };
        assert!(apply_rotate(&mut ac, pdp8::BSW));
        assert_eq!(ac.value(), 0o1000);
    }

    #[test]
    fn rar_shifts_l_into_ac_and_ac_bit_into_l() {
        let mut ac = Ac {
            lac: 0o10001,
            known: Known {
                lknown: true,
                lany: false,
                acknown: true,
            },
        };
        assert!(apply_rotate(&mut ac, pdp8::RAR));
        assert!(ac.l());
        assert_eq!(ac.value(), 0o4000);
    }
}
