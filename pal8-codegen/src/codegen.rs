//! The frame/spill manager (`spec.md` §4.4): per-function call-frame
//! bookkeeping, the zero-page scratch spill used to pass non-zero-page
//! operands as MRI arguments, and the micro-instruction mnemonic builders
//! for `OPR`.
//!
//! Grounded directly in `original_source/src/codegen.c`: `spill`, `lstr`,
//! `arg`, `opr1`/`opr2`, and the frame-template bookkeeping in
//! `newframe`/`newparam`/`newauto`/`endframe`.

use std::io::Write;

use crate::asm::Writer;
use crate::data::DataArea;
use crate::error::{Diagnostics, Fault};
use crate::name::Definitions;
use crate::pdp8::{self, Expr, LabelId, Mri, Operand};

/// First zero-page address handed out to scratch spills. Addresses below
/// this are reserved for the fixed runtime layout (`spec.md` §4.4).
pub const MINSCRATCH: u8 = 0o30;
/// One past the last usable zero-page address.
pub const NZEROPAGE: u16 = 0o200;
/// Number of scratch cells available to the frame template.
pub const NSCRATCH: usize = (NZEROPAGE - MINSCRATCH as u16) as usize;

/// Per-function call-frame state: the five frame labels, the parameter/
/// automatic/stack-slot counters, and the scratch-cell spill template.
///
/// `frametmpl[i]` always holds the rvalue-class form of whatever got
/// spilled there (`RConst`/`RLabel`/`RData`/`RAuto`/`RParam`); whether the
/// *caller's* reference was an lvalue or rvalue only affects the class of
/// the `Expr` `spill` hands back, never what's in the template.
#[derive(Debug)]
pub struct Frame {
    pub frame_label: LabelId,
    pub param_label: LabelId,
    pub stack_label: LabelId,
    pub auto_label: LabelId,
    pub return_label: LabelId,
    nparam: u8,
    nauto: u8,
    frame_tmpl: Vec<Operand>,
    /// Current stack depth (next free slot index).
    tos: u8,
    /// High-water mark of `tos`, i.e. how many stack slots this frame needs.
    stacksize: u8,
}

impl Frame {
    /// Open a fresh frame, minting five new labels from `defs`'s counter.
    pub fn new(defs: &mut Definitions) -> Frame {
        Frame {
            frame_label: defs.fresh_label(),
            param_label: defs.fresh_label(),
            stack_label: defs.fresh_label(),
            auto_label: defs.fresh_label(),
            return_label: defs.fresh_label(),
            nparam: 0,
            nauto: 0,
            frame_tmpl: Vec::new(),
            tos: 0,
            stacksize: 0,
        }
    }

    /// Declare the next formal parameter, returning its `LParam` operand —
    /// a parameter is a pointer cell in the param area, so its canonical
    /// declared form is the lvalue; `RParam` (the address of that cell) only
    /// comes from `l2rval`-ing this back.
    pub fn new_param(&mut self) -> Expr {
        let offset = self.nparam;
        self.nparam += 1;
        Expr::new(Operand::LParam(offset))
    }

    /// Declare the next automatic variable, returning its `LAuto` operand
    /// (same reasoning as `new_param`: an automatic is a pointer cell, the
    /// lvalue is the canonical declared form).
    pub fn new_auto(&mut self) -> Expr {
        let offset = self.nauto;
        self.nauto += 1;
        Expr::new(Operand::LAuto(offset))
    }

    /// Allocate the next stack slot (mirrors `emitpush`'s bookkeeping half;
    /// the caller is responsible for emitting the `DCA` that writes it).
    pub fn push_stack(&mut self) -> Result<Expr, Fault> {
        if self.tos as usize >= NSCRATCH {
            return Err(Fault::StackOverflow);
        }
        let slot = self.tos;
        self.tos += 1;
        self.stacksize = self.stacksize.max(self.tos);
        Ok(Expr::new(Operand::RStack(slot)))
    }

    /// Release the top stack slot. Faults if the stack is empty, or if
    /// `slot` isn't actually on top (mirrors `emitpop`'s "can only pop top
    /// of stack" check).
    pub fn pop_stack(&mut self, slot: u8) -> Result<(), Fault> {
        if self.tos == 0 {
            return Err(Fault::StackUnderflow);
        }
        if slot != self.tos - 1 {
            return Err(Fault::StackUnderflow);
        }
        self.tos -= 1;
        Ok(())
    }

    pub fn stacksize(&self) -> u8 {
        self.stacksize
    }

    pub fn nparam(&self) -> u8 {
        self.nparam
    }

    pub fn nauto(&self) -> u8 {
        self.nauto
    }

    /// Total scratch cells this frame's template reserves.
    pub fn nframe(&self) -> usize {
        self.frame_tmpl.len()
    }

    pub fn frame_template(&self) -> &[Operand] {
        &self.frame_tmpl
    }

    /// Rewrite `e` into something usable as an MRI argument: `RValue`,
    /// `LValue`, `RStack` and `LStack` pass through unchanged; a small
    /// `LConst` collapses to a direct `RValue` zero-page reference; anything
    /// else is spilled into a scratch cell of the frame template
    /// (`original_source/src/codegen.c`'s `spill`).
    pub fn spill(&mut self, e: &Expr) -> Result<Expr, Fault> {
        match e.value() {
            v @ (Operand::RValue(_) | Operand::LValue(_) | Operand::RStack(_) | Operand::LStack(_)) => {
                return Ok(Expr { operand: Some(v), name: e.name.clone() });
            }
            Operand::LConst(addr) if addr < NZEROPAGE => {
                return Ok(Expr { operand: Some(Operand::RValue(addr as u8)), name: e.name.clone() });
            }
            _ => {}
        }

        let (key, is_lvalue) = match e.value() {
            Operand::RConst(n) => (Operand::RConst(n), false),
            Operand::LConst(n) => (Operand::RConst(n), true),
            Operand::RLabel(n) => (Operand::RLabel(n), false),
            Operand::LLabel(n) => (Operand::RLabel(n), true),
            Operand::RData(n) => (Operand::RData(n), false),
            Operand::LData(n) => (Operand::RData(n), true),
            Operand::RAuto(n) => (Operand::RAuto(n), false),
            Operand::LAuto(n) => (Operand::RAuto(n), true),
            Operand::RParam(n) => (Operand::RParam(n), false),
            Operand::LParam(n) => (Operand::RParam(n), true),
            other => {
                return Err(Fault::InvalidStorageClass {
                    op: "spill",
                    operand: other.to_string(),
                })
            }
        };

        let index = match self.frame_tmpl.iter().position(|&t| t == key) {
            Some(i) => i,
            None => {
                if self.frame_tmpl.len() >= NSCRATCH {
                    return Err(Fault::FrameOverflow);
                }
                self.frame_tmpl.push(key);
                self.frame_tmpl.len() - 1
            }
        };

        let cell = MINSCRATCH + index as u8;
        let operand = if is_lvalue { Operand::LValue(cell) } else { Operand::RValue(cell) };
        Ok(Expr { operand: Some(operand), name: e.name.clone() })
    }

    /// Render `e` as the address string an MRI argument, frame-template
    /// word, or `emitl` target prints after its mnemonic (mirrors `lstr`).
    /// Only the six classes the original handles are legal here; everything
    /// else (bare `LValue`/`LStack`, `Special`, `Invalid`, or the raw
    /// `RConst`/`RLabel`/`RData`/`RAuto`/`RParam` classes which must be
    /// converted with `r2lval`/`spill` first) is a caller bug.
    pub fn lstr(&self, e: &Expr) -> Result<String, Fault> {
        match e.value() {
            Operand::LConst(v) => Ok(format!("{:04o}", v & pdp8::WORD_MASK)),
            Operand::RValue(v) => Ok(format!("{:04o}", v as u16 & pdp8::WORD_MASK)),
            Operand::LLabel(n) => Ok(format!("L{n:04o}")),
            Operand::LData(n) => Ok(format!("DATA+{n:04o}")),
            Operand::RStack(slot) => Ok(format!("L{:04o}+{:03o}", self.stack_label, slot)),
            Operand::LAuto(off) => Ok(format!("L{:04o}+{:03o}", self.auto_label, off)),
            Operand::LParam(off) => Ok(format!("L{:04o}+{:03o}", self.param_label, off)),
            other => Err(Fault::InvalidStorageClass {
                op: "lstr",
                operand: other.to_string(),
            }),
        }
    }

    /// Build the text of an MRI argument: spill `e`, then print `I <addr>`
    /// if the spilled operand is an lvalue (indirect through the cell that
    /// holds the address) or `<addr>` directly otherwise (mirrors `arg`).
    pub fn arg(&mut self, e: &Expr) -> Result<String, Fault> {
        let spilled = self.spill(e)?;
        if spilled.value().is_lvalue() {
            let direct = spilled.l2rval();
            Ok(format!("I {}", self.lstr(&direct)?))
        } else {
            self.lstr(&spilled)
        }
    }

    /// Render the address `emitl` prints directly after an instruction
    /// (e.g. the frame label following `ENTER`, or a function's own address
    /// after its `LEAVE`). `RConst`/`RLabel`/`RData`/`RAuto`/`RParam` have
    /// no address of their own to print directly, so each is spilled into a
    /// data-area word first — `RConst` as the numeric value itself,
    /// everything else as the symbolic address string its `r2lval` form
    /// would print (`data.literal_symbol`) — and the resulting `DATA+NNNN`
    /// reference is printed instead. Anything already address-shaped
    /// (`LConst`, `RValue`, `LLabel`, `LData`, `RStack`, `LAuto`, `LParam`)
    /// is printed as-is via `lstr`.
    pub fn emitl(&self, data: &mut DataArea, e: &Expr) -> Result<String, Fault> {
        match e.value() {
            Operand::RConst(v) => {
                let spilled = data.literal(v)?;
                self.lstr(&spilled)
            }
            Operand::RLabel(_) | Operand::RData(_) | Operand::RAuto(_) | Operand::RParam(_) => {
                let address = self.lstr(&e.r2lval())?;
                let spilled = data.literal_symbol(address)?;
                self.lstr(&spilled)
            }
            _ => self.lstr(e),
        }
    }

    /// Render the address of a frame-template word (mirrors `emitr`, used
    /// only while dumping the template in `endframe`). Every template entry
    /// is one of the five raw classes `r2lval` accepts, printed directly
    /// with no data-area indirection — the template word itself is the
    /// storage the value lives in.
    pub fn emitr(&self, template_entry: Operand) -> Result<String, Fault> {
        self.lstr(&Expr::new(template_entry).r2lval())
    }
}

/// Decode an `OPR` group-1 (bits clear, arithmetic/rotate) word into its
/// PAL-8 mnemonic sequence, in the canonical CLA-CLL-CMA-CML-IAC-RAR/RAL-BSW
/// emission order. `CLA`+`CMA` collapses to the compound `STA` and
/// `CLL`+`CML` to `STL`, the spellings PAL-8 actually requires for those bit
/// pairs rather than their decomposed micro-ops. Returns `None` for anything
/// that isn't a group-1 word or sets both `RAR` and `RAL` (mutually
/// exclusive on real hardware).
pub fn opr1(op: u16) -> Option<String> {
    if op & pdp8::OP_MASK != pdp8::OPR || op & 0o0400 != 0 {
        return None;
    }
    if op & pdp8::RAR != 0 && op & pdp8::RAL != 0 {
        return None;
    }

    let sta = op & pdp8::STA == pdp8::STA;
    let stl = op & pdp8::STL == pdp8::STL;

    let mut parts = Vec::new();
    if sta {
        parts.push("STA");
    } else if op & pdp8::CLA != 0 {
        parts.push("CLA");
    }
    if stl {
        parts.push("STL");
    } else if op & pdp8::CLL != 0 {
        parts.push("CLL");
    }
    if !sta && op & pdp8::CMA != 0 {
        parts.push("CMA");
    }
    if !stl && op & pdp8::CML != 0 {
        parts.push("CML");
    }
    if op & pdp8::IAC != 0 {
        parts.push("IAC");
    }
    match (op & pdp8::RAR != 0, op & pdp8::BSW != 0) {
        (true, true) => parts.push("RTR"),
        (true, false) => parts.push("RAR"),
        (false, true) if op & pdp8::RAL == 0 => parts.push("BSW"),
        _ => {}
    }
    if op & pdp8::RAL != 0 {
        parts.push(if op & pdp8::BSW != 0 { "RTL" } else { "RAL" });
    }

    if parts.is_empty() {
        Some("NOP".to_string())
    } else {
        Some(parts.join(" "))
    }
}

/// Decode an `OPR` group-2 (bit set, skip) word into its PAL-8 mnemonic
/// sequence. Returns `None` for anything outside the supported
/// `SMA`/`SZA`/`SNL`/`SKP`/`CLA` combination (group-3 and the privileged
/// `OSR`/`HLT` bits are out of scope, `spec.md` §1). The three single-
/// condition-plus-`SKP` pairs collapse to their PAL-8 compound spellings:
/// `SMA SKP` becomes `SPA`, `SZA SKP` becomes `SNA`, `SNL SKP` becomes
/// `SZL`; any other combination (including plain `SKP` alone, or more than
/// one condition bit set alongside `SKP`) is printed decomposed.
pub fn opr2(op: u16) -> Option<String> {
    if op & pdp8::OP_MASK != pdp8::OPR || op & 0o0400 == 0 {
        return None;
    }
    if op & (pdp8::OSR | pdp8::HLT | pdp8::OPR3) != 0 {
        return None;
    }

    let mut parts = Vec::new();
    let condition = op & (pdp8::SMA | pdp8::SZA | pdp8::SNL | pdp8::SKP);
    match condition {
        pdp8::SPA => parts.push("SPA"),
        pdp8::SNA => parts.push("SNA"),
        pdp8::SZL => parts.push("SZL"),
        _ => {
            if op & pdp8::SMA != 0 {
                parts.push("SMA");
            }
            if op & pdp8::SZA != 0 {
                parts.push("SZA");
            }
            if op & pdp8::SNL != 0 {
                parts.push("SNL");
            }
            if op & pdp8::SKP != 0 {
                parts.push("SKP");
            }
        }
    }
    if op & pdp8::CLA != 0 {
        parts.push("CLA");
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Emit one real instruction: an MRI gets its mnemonic and `arg()`-built
/// operand text, an `OPR` word gets decoded via [`opr1`]/[`opr2`] (falling
/// back to a warning and the raw octal word for unsupported bit
/// combinations), and `ISZ`/any skipping `OPR` arranges for the next
/// `instr()` call to be skip-prefixed (`original_source/src/codegen.c`'s
/// `emitisn`). `e.name`, if non-empty, becomes a trailing comment; `OPR`
/// words carry no name and ignore `e` entirely.
pub fn emitisn<W: Write>(
    asm: &mut Writer<W>,
    frame: &mut Frame,
    diags: &mut Diagnostics,
    op: u16,
    e: &Expr,
) -> Result<(), Fault> {
    if let Some(mri) = pdp8::mri_of(op) {
        let argument = frame.arg(e)?;
        asm.instr(&format!("{} {argument}", mri.mnemonic()))
            .map_err(io_fault)?;
        asm.comment_name(&e.name).map_err(io_fault)?;
        if matches!(mri, Mri::Isz) {
            asm.skip();
        }
        return Ok(());
    }

    if op & pdp8::OP_MASK == pdp8::OPR {
        let is_group2 = op & 0o400 != 0;
        let text = if is_group2 { opr2(op) } else { opr1(op) };
        match text {
            Some(mnemonic) => {
                asm.instr(&mnemonic).map_err(io_fault)?;
                if is_group2 {
                    asm.skip();
                }
            }
            None => {
                diags.warn(None, format!("unsupported OPR bit pattern {op:04o}"));
                asm.emitc(op & pdp8::WORD_MASK).map_err(io_fault)?;
                asm.comment("unsupported OPR").map_err(io_fault)?;
            }
        }
        return Ok(());
    }

    Err(Fault::UnknownPseudo(op))
}

fn io_fault(err: std::io::Error) -> Fault {
    Fault::Output(err.to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pdp8::Expr;

    fn frame() -> Frame {
        let mut defs = Definitions::new();
        Frame::new(&mut defs)
    }

    #[test]
    fn spill_passes_through_zero_page_classes() {
        let mut f = frame();
        let e = Expr::new(Operand::RValue(5));
        assert_eq!(f.spill(&e).unwrap().value(), Operand::RValue(5));
    }

    #[test]
    fn emitl_spills_a_forward_label_reference_as_a_data_area_symbol() {
        let f = frame();
        let mut data = DataArea::new();
        let addr = f.emitl(&mut data, &Expr::new(Operand::RLabel(9))).unwrap();
        assert_eq!(addr, "DATA+0000");
        assert_eq!(data.len(), 1);

        // A second forward reference to the same label reuses the word.
        let addr2 = f.emitl(&mut data, &Expr::new(Operand::RLabel(9))).unwrap();
        assert_eq!(addr2, addr);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn emitl_spills_a_constant_directly_into_the_data_area() {
        let f = frame();
        let mut data = DataArea::new();
        let addr = f.emitl(&mut data, &Expr::new(Operand::RConst(0o123))).unwrap();
        assert_eq!(addr, "DATA+0000");
    }

    #[test]
    fn emitl_prints_an_already_defined_label_directly() {
        let f = frame();
        let mut data = DataArea::new();
        let addr = f.emitl(&mut data, &Expr::new(Operand::LLabel(4))).unwrap();
        assert_eq!(addr, "L0004");
        assert!(data.is_empty());
    }

    #[test]
    fn spill_collapses_small_lconst_to_rvalue() {
        let mut f = frame();
        let e = Expr::new(Operand::LConst(0o17));
        assert_eq!(f.spill(&e).unwrap().value(), Operand::RValue(0o17));
    }

    #[test]
    fn spill_dedupes_repeated_rconst_into_one_scratch_cell() {
        let mut f = frame();
        let a = f.spill(&Expr::new(Operand::RConst(5))).unwrap();
        let b = f.spill(&Expr::new(Operand::RConst(5))).unwrap();
        assert_eq!(a, b);
        assert_eq!(f.nframe(), 1);
    }

    #[test]
    fn spill_distinguishes_lvalue_and_rvalue_of_the_same_label() {
        let mut f = frame();
        let r = f.spill(&Expr::new(Operand::RLabel(3))).unwrap();
        let l = f.spill(&Expr::new(Operand::LLabel(3))).unwrap();
        assert_eq!(r.value(), Operand::RValue(MINSCRATCH));
        assert_eq!(l.value(), Operand::LValue(MINSCRATCH));
        // Same template slot, just different class wrapping it.
        assert_eq!(f.nframe(), 1);
    }

    #[test]
    fn arg_indirects_through_spilled_lvalues() {
        let mut f = frame();
        let text = f.arg(&Expr::new(Operand::LLabel(3))).unwrap();
        assert_eq!(text, format!("I {:04o}", MINSCRATCH));
    }

    #[test]
    fn arg_names_rstack_directly() {
        let mut f = frame();
        let text = f.arg(&Expr::new(Operand::RStack(2))).unwrap();
        assert_eq!(text, format!("L{:04o}+002", f.stack_label));
    }

    #[test]
    fn opr1_decodes_common_idioms() {
        assert_eq!(opr1(pdp8::NOP).as_deref(), Some("NOP"));
        assert_eq!(opr1(pdp8::CLA).as_deref(), Some("CLA"));
        assert_eq!(opr1(pdp8::CIA).as_deref(), Some("CMA IAC"));
        assert_eq!(opr1(pdp8::RTR).as_deref(), Some("RTR"));
    }

    #[test]
    fn opr1_collapses_cla_cma_and_cll_cml_to_compound_mnemonics() {
        assert_eq!(opr1(pdp8::STA).as_deref(), Some("STA"));
        assert_eq!(opr1(pdp8::STL).as_deref(), Some("STL"));
        assert_eq!(opr1(pdp8::STA | pdp8::STL).as_deref(), Some("STA STL"));
        // A lone CMA (no CLA) stays decomposed; it isn't the STA pair.
        assert_eq!(opr1(pdp8::CMA).as_deref(), Some("CMA"));
    }

    #[test]
    fn opr1_rejects_ral_and_rar_together() {
        assert_eq!(opr1(pdp8::RAL | pdp8::RAR), None);
    }

    #[test]
    fn opr2_decodes_skips() {
        assert_eq!(opr2(pdp8::SZA).as_deref(), Some("SZA"));
        assert_eq!(opr2(pdp8::SPA).as_deref(), Some("SPA"));
        assert_eq!(opr2(pdp8::SNA).as_deref(), Some("SNA"));
        assert_eq!(opr2(pdp8::SZL).as_deref(), Some("SZL"));
        assert_eq!(opr2(pdp8::SKP).as_deref(), Some("SKP"));
        assert_eq!(opr2(pdp8::SPA | pdp8::CLA).as_deref(), Some("SPA CLA"));
    }

    #[test]
    fn opr2_rejects_unsupported_group3_bits() {
        assert_eq!(opr2(pdp8::HLT), None);
    }

    #[test]
    fn stack_push_pop_round_trips_and_underflows() {
        let mut f = frame();
        let a = f.push_stack().unwrap();
        assert_eq!(a.value(), Operand::RStack(0));
        assert_eq!(f.stacksize(), 1);
        f.pop_stack(0).unwrap();
        assert_eq!(f.pop_stack(0), Err(Fault::StackUnderflow));
    }
}
