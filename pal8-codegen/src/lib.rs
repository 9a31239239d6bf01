//! A PAL-8 code generator for a B-like language targeting the PDP-8: the
//! back half of `clausecker/8bc`, reworked around a single [`Compiler`]
//! context instead of file-scope statics (`spec.md` §9's "Global mutable
//! state → per-compilation context" redesign note).
//!
//! The crate has no front end: nothing here parses source text. Callers
//! drive [`Compiler`] the way a parser's semantic actions would — `define`
//! a function, open a frame, issue a sequence of `and`/`tad`/`isz`/`dca`/
//! `jms`/`jmp`/`lda`/`opr` calls, close the frame, repeat, then `finish()`.
//! `pal8c` (the sibling binary crate) exercises exactly this surface from a
//! tiny textual driver script, standing in for the real grammar.

pub mod asm;
pub mod codegen;
pub mod data;
pub mod error;
pub mod isel;
pub mod name;
pub mod pdp8;
#[cfg(test)]
mod test_helpers;

use std::io::Write;

pub use error::Fault;
pub use pdp8::{Expr, Operand};

use codegen::Frame;
use error::Diagnostics;
use isel::Isel;
use name::{Declarations, Definitions};
use pdp8::LabelId;

/// The four runtime entry points the standard library wires up by name at
/// the end of every compilation (`spec.md` §6, "library-symbol wiring").
const STDLIB_SYMBOLS: [&str; 4] = ["EXIT", "GETCHAR", "PUTCHAR", "SENSE"];

/// A single compilation. Owns every table and piece of simulator state the
/// original threads through file-scope statics: the name tables, the data
/// area, the current function's frame, the `isel` simulator, the assembly
/// writer, and the running diagnostic counters.
pub struct Compiler<W: Write> {
    asm: asm::Writer<W>,
    defs: Definitions,
    decls: Declarations,
    data: data::DataArea,
    frame: Frame,
    isel: Isel,
    diags: Diagnostics,
    main: Option<Expr>,
}

impl<W: Write> Compiler<W> {
    pub fn new(out: W) -> Compiler<W> {
        let mut defs = Definitions::new();
        let frame = Frame::new(&mut defs);
        Compiler {
            asm: asm::Writer::new(out),
            defs,
            decls: Declarations::new(),
            data: data::DataArea::new(),
            frame,
            isel: Isel::new(),
            diags: Diagnostics::new(),
            main: None,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diags
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diags
    }

    // ---- Name tables (spec.md §4.2) ----------------------------------

    /// Look up or mint the global definition for `name`.
    pub fn define(&mut self, name: &str) -> Result<Expr, Fault> {
        self.defs.define(name)
    }

    pub fn declare(&mut self, expr: Expr) -> Result<(), Fault> {
        self.decls.declare(expr)
    }

    pub fn lookup(&self, name: &str) -> Option<&Expr> {
        self.decls.lookup(name)
    }

    pub fn beginscope(&self) -> usize {
        self.decls.beginscope()
    }

    pub fn endscope(&mut self, depth: usize) {
        self.decls.endscope(depth)
    }

    /// `putlabel(expr)`: flush pending instructions, then place an
    /// in-stream label (`L####,`). Fatal if `expr` doesn't carry a label.
    pub fn putlabel(&mut self, expr: &Expr) -> Result<(), Fault> {
        self.catchup()?;
        let n = self.label_number(expr)?;
        self.asm.label(&format!("L{n:04o},")).map_err(io_fault)
    }

    /// `setlabel(expr)`: flush pending instructions, then equate a label to
    /// the current location counter (`L####=`).
    pub fn setlabel(&mut self, expr: &Expr) -> Result<(), Fault> {
        self.catchup()?;
        let n = self.label_number(expr)?;
        self.asm.label(&format!("L{n:04o}=")).map_err(io_fault)
    }

    fn label_number(&self, expr: &Expr) -> Result<LabelId, Fault> {
        match expr.value() {
            Operand::RLabel(n) | Operand::LLabel(n) => Ok(n),
            other => Err(Fault::InvalidStorageClass {
                op: "putlabel/setlabel",
                operand: other.to_string(),
            }),
        }
    }

    // ---- Data area (spec.md §4.3) -------------------------------------

    /// Pack `text` two characters to a word (7-bit ASCII in bits 11-6 and
    /// 5-0, the conventional PDP-8 text packing) and append it to the data
    /// area, deduplicating against an existing occurrence of the whole
    /// string byte-for-byte the way repeated numeric literals dedupe.
    /// Returns the `LData` expr of the first word.
    pub fn string_literal(&mut self, text: &str) -> Result<Expr, Fault> {
        let bytes = text.as_bytes();
        let mut words = Vec::with_capacity(bytes.len().div_ceil(2));
        for pair in bytes.chunks(2) {
            let hi = pair[0] as u16 & 0o177;
            let lo = pair.get(1).copied().unwrap_or(0) as u16 & 0o177;
            words.push((hi << 6) | lo);
        }
        words.push(0); // NUL terminator word, matching a C-string convention.

        let mut first = None;
        for word in words {
            let e = self.data.literal(word)?;
            first.get_or_insert(e);
        }
        Ok(first.unwrap_or_else(Expr::zero))
    }

    // ---- High-level op layer (spec.md §4.5) ----------------------------

    /// Deposit a dirty stacked value from AC into its slot, then reload it
    /// (`original_source/src/pdp8.c`'s `writeback`). A stack slot holds its
    /// value directly, so the deposit targets the *rvalue* `RStack` form —
    /// `LStack` would indirect through the slot's contents instead of
    /// storing into the slot itself. The `DCA` clears AC on real hardware,
    /// so a follow-up `TAD` of the same slot restores it; without that
    /// reload `isel`'s `acstate` would keep claiming AC holds the stacked
    /// value when AC has actually just been cleared.
    fn writeback(&mut self) -> Result<(), Fault> {
        if !self.isel.dirty {
            return Ok(());
        }
        let slot = match self.isel.acstate().value() {
            Operand::RStack(slot) => slot,
            _ => {
                self.isel.dirty = false;
                return Ok(());
            }
        };
        self.isel.dirty = false;
        let target = Expr::new(Operand::RStack(slot));
        self.isel
            .isel(pdp8::DCA, &target, &mut self.frame, &mut self.diags, &mut self.asm)?;
        self.isel
            .isel(pdp8::TAD, &target, &mut self.frame, &mut self.diags, &mut self.asm)
    }

    pub fn and(&mut self, e: &Expr) -> Result<(), Fault> {
        self.writeback()?;
        self.isel.isel(pdp8::AND, e, &mut self.frame, &mut self.diags, &mut self.asm)
    }

    pub fn tad(&mut self, e: &Expr) -> Result<(), Fault> {
        self.writeback()?;
        self.isel.isel(pdp8::TAD, e, &mut self.frame, &mut self.diags, &mut self.asm)
    }

    pub fn isz(&mut self, e: &Expr) -> Result<(), Fault> {
        self.writeback()?;
        self.isel.isel(pdp8::ISZ, e, &mut self.frame, &mut self.diags, &mut self.asm)
    }

    pub fn dca(&mut self, e: &Expr) -> Result<(), Fault> {
        self.writeback()?;
        self.isel.isel(pdp8::DCA, e, &mut self.frame, &mut self.diags, &mut self.asm)
    }

    pub fn jmp(&mut self, e: &Expr) -> Result<(), Fault> {
        self.writeback()?;
        self.isel.isel(pdp8::JMP, e, &mut self.frame, &mut self.diags, &mut self.asm)
    }

    /// A subroutine call may clobber AC arbitrarily, so this forces a full
    /// `catchup()` before the `JMS` and forgets AC afterwards.
    pub fn jms(&mut self, e: &Expr) -> Result<(), Fault> {
        self.catchup()?;
        self.isel.isel(pdp8::JMS, e, &mut self.frame, &mut self.diags, &mut self.asm)?;
        self.isel.forget_ac();
        Ok(())
    }

    pub fn opr(&mut self, op: u16) -> Result<(), Fault> {
        self.writeback()?;
        self.isel
            .isel(op, &Expr::invalid(), &mut self.frame, &mut self.diags, &mut self.asm)
    }

    /// No-op when AC already holds `e`'s value (`acstate == e`); otherwise
    /// `CLA; TAD e`, then marks `L` a don't-care (`spec.md` §4.5).
    pub fn lda(&mut self, e: &Expr) -> Result<(), Fault> {
        if self.isel.acstate().value() == e.value() && e.value().is_valid() {
            return Ok(());
        }
        self.opr(pdp8::CLA)?;
        self.tad(e)?;
        self.isel.lany();
        self.isel.acstate = e.clone();
        Ok(())
    }

    pub fn ldconst(&mut self, c: u16) -> Result<(), Fault> {
        self.lda(&Expr::new(Operand::RConst(c)))
    }

    /// If AC already holds some non-stack expression, pushing is free:
    /// that value stands in for the pushed one. Otherwise allocate a new
    /// stack slot, remember it as what AC now holds, and defer the actual
    /// deposit (`dirty`) until something forces a writeback.
    pub fn push(&mut self, e: &Expr) -> Result<Expr, Fault> {
        let acstate = self.isel.acstate().clone();
        if acstate.value().is_valid() && !acstate.value().on_stack() && acstate.value() == e.value() {
            return Ok(acstate);
        }
        self.writeback()?;
        let slot = self.frame.push_stack()?;
        self.isel.acstate = slot.clone();
        self.isel.dirty = true;
        self.isel.lany();
        Ok(slot)
    }

    /// If `e` is the value currently sitting dirty in AC, the deposit is
    /// elided entirely; otherwise just releases the stack slot (the value
    /// must already have been written back by something else).
    pub fn pop(&mut self, e: &Expr) -> Result<(), Fault> {
        let slot = match e.value() {
            Operand::RStack(s) | Operand::LStack(s) => s,
            other => {
                return Err(Fault::InvalidStorageClass {
                    op: "pop",
                    operand: other.to_string(),
                })
            }
        };
        if self.isel.acstate().value() == e.value() && self.isel.dirty {
            self.isel.dirty = false;
        }
        self.frame.pop_stack(slot)
    }

    pub fn acrandom(&mut self) -> Result<(), Fault> {
        self.writeback()?;
        self.isel.forget_ac();
        Ok(())
    }

    /// Drops all AC/L knowledge and resets the simulator to a known
    /// L:AC = 0, bypassing the skip-state machine entirely — used when the
    /// real machine state is about to diverge from the simulation for
    /// reasons `isel` can't see (entering a fresh frame, recovering from
    /// an error).
    pub fn acclear(&mut self) {
        self.isel.reset();
    }

    pub fn catchup(&mut self) -> Result<(), Fault> {
        self.writeback()?;
        self.isel.undefer(&mut self.frame, &mut self.diags, &mut self.asm)
    }

    // ---- Frame management (spec.md §4.4) -------------------------------

    /// Open a new function: define `name` (marking it `MAIN` for the
    /// library-symbol wiring step if it's literally `"MAIN"`), place its
    /// label, reset the declaration stack and frame, and emit the entry
    /// line (`0`, `ENTER`, `<framelabel>`).
    pub fn newframe(&mut self, name: &str) -> Result<Expr, Fault> {
        let fun = self.defs.define(name)?;
        if name == "MAIN" {
            self.main = Some(fun.clone());
        }
        self.putlabel(&fun)?;

        self.frame = Frame::new(&mut self.defs);
        self.decls.endscope(0);

        self.asm.emitc(0).map_err(io_fault)?;
        self.asm.comment_name(name).map_err(io_fault)?;
        self.asm.instr("ENTER").map_err(io_fault)?;
        self.asm
            .instr(&format!("L{:04o}", self.frame.frame_label))
            .map_err(io_fault)?;

        self.acclear();
        Ok(fun)
    }

    /// Close the current function: emit the `LEAVE`/return sequence, then
    /// the frame metadata (`spec.md` §4.4's prologue/epilogue layout).
    pub fn endframe(&mut self, fun: &Expr) -> Result<(), Fault> {
        self.catchup()?;

        let retlabel = self.frame.return_label;
        self.asm.label(&format!("L{retlabel:04o},")).map_err(io_fault)?;
        self.asm.instr("LEAVE").map_err(io_fault)?;
        let fn_addr = self.frame.emitl(&mut self.data, fun)?;
        self.asm.instr(&fn_addr).map_err(io_fault)?;
        self.asm.blank().map_err(io_fault)?;

        let nframe = self.frame.nframe() as u16;
        let nparam = self.frame.nparam() as u16;
        let nauto = self.frame.nauto() as u16;
        let nsave = nframe + self.frame.stacksize() as u16;

        self.asm
            .label(&format!("L{:04o}=", self.frame.stack_label))
            .map_err(io_fault)?;
        self.asm.emitc(codegen::MINSCRATCH as u16 + nframe).map_err(io_fault)?;

        self.asm
            .label(&format!("L{:04o},", self.frame.frame_label))
            .map_err(io_fault)?;
        self.asm
            .emitc((-(nsave as i16)) as u16)
            .map_err(io_fault)?;
        self.asm.comment(&format!("SAVE {nsave:04o} REGISTERS")).map_err(io_fault)?;
        self.asm.advance(nsave).map_err(io_fault)?;

        self.asm
            .emitc((-(nparam as i16)) as u16)
            .map_err(io_fault)?;
        self.asm.comment(&format!("LOAD {nparam:04o} ARGUMENTS")).map_err(io_fault)?;
        if nparam > 0 {
            self.asm
                .label(&format!("L{:04o},", self.frame.param_label))
                .map_err(io_fault)?;
            self.asm.advance(nparam).map_err(io_fault)?;
        }

        self.asm
            .emitc((-(nframe as i16)) as u16)
            .map_err(io_fault)?;
        self.asm.comment(&format!("LOAD {nframe:04o} TEMPLATES")).map_err(io_fault)?;
        for entry in self.frame.frame_template().to_vec() {
            let text = self.frame.emitr(entry)?;
            self.asm.instr(&text).map_err(io_fault)?;
        }

        if nauto > 0 {
            self.asm
                .label(&format!("L{:04o},", self.frame.auto_label))
                .map_err(io_fault)?;
            self.asm.advance(nauto).map_err(io_fault)?;
        }
        self.asm.blank().map_err(io_fault)
    }

    /// `return`'s codegen: jump to the frame's return label. A thin wrapper
    /// the original always provides even though nothing upstream of
    /// `codegen.c` calls it under any other name.
    pub fn ret(&mut self) -> Result<(), Fault> {
        let retlabel = Expr::new(Operand::LLabel(self.frame.return_label));
        self.jmp(&retlabel)
    }

    pub fn newparam(&mut self) -> Expr {
        self.frame.new_param()
    }

    pub fn newauto(&mut self) -> Expr {
        self.frame.new_auto()
    }

    // ---- End of compilation (spec.md §6) -------------------------------

    /// Dump the data area, wire up the four standard-library runtime
    /// symbols plus `MAIN`, emit `END` and the final `$`, and hand back the
    /// underlying writer. Returns the process exit code per `spec.md` §6.
    pub fn finish(mut self) -> Result<(W, i32), Fault> {
        self.data.dump(&mut self.asm).map_err(io_fault)?;

        if let Some(main) = &self.main {
            let n = self.label_number(main)?;
            self.asm.label("MAIN=").map_err(io_fault)?;
            self.asm.instr(&format!("L{n:04o}")).map_err(io_fault)?;
        }
        for name in STDLIB_SYMBOLS {
            let sym = self.defs.define(name)?;
            let n = self.label_number(&sym)?;
            self.asm.label(&format!("L{n:04o}=")).map_err(io_fault)?;
            self.asm.instr(name).map_err(io_fault)?;
        }

        self.asm.label("END,").map_err(io_fault)?;
        self.asm.instr("$").map_err(io_fault)?;
        self.asm.blank().map_err(io_fault)?;

        let exit_code = self.diags.exit_code();
        Ok((self.asm.into_inner(), exit_code))
    }
}

fn io_fault(err: std::io::Error) -> Fault {
    Fault::Output(err.to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::emit;

    fn compiler() -> Compiler<Vec<u8>> {
        Compiler::new(Vec::new())
    }

    #[test]
    fn empty_main_returning_zero_has_a_clean_frame() {
        let mut c = compiler();
        let fun = c.newframe("MAIN").unwrap();
        c.ldconst(0).unwrap();
        let ret = Expr::new(Operand::LLabel(c.frame.return_label));
        c.jmp(&ret).unwrap();
        c.endframe(&fun).unwrap();
        let (out, code) = c.finish().unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("ENTER"));
        assert!(text.contains("LEAVE"));
        assert!(text.contains("MAIN="));
        assert!(text.contains("END,"));
        assert_eq!(code, 0);
    }

    #[test]
    fn loading_the_same_constant_twice_only_emits_it_once() {
        let mut c = compiler();
        c.ldconst(1).unwrap();
        let after_first = c.isel.want();
        c.ldconst(1).unwrap();
        assert_eq!(c.isel.want(), after_first);
        assert_eq!(c.isel.want().value(), 1);
    }

    #[test]
    fn undefined_extern_gets_a_stable_label_before_and_after_the_call() {
        let mut c = compiler();
        let foo = c.define("FOO").unwrap();
        c.jms(&foo).unwrap();
        assert!(!c.isel.want().known.acknown);
        let foo_again = c.define("FOO").unwrap();
        assert_eq!(foo, foo_again);
    }

    #[test]
    fn string_literal_is_deduplicated() {
        let mut c = compiler();
        let a = c.string_literal("ab").unwrap();
        let b = c.string_literal("ab").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn push_without_an_ac_value_allocates_a_stack_slot_and_marks_dirty() {
        let mut c = compiler();
        c.ldconst(5).unwrap();
        let slot = c.push(&Expr::new(Operand::RConst(5))).unwrap();
        assert!(matches!(slot.value(), Operand::RStack(_) | Operand::RConst(_)));
    }

    #[test]
    fn declare_and_scope_unwind_round_trips() {
        let mut c = compiler();
        let mark = c.beginscope();
        c.declare(Expr::named(Operand::RAuto(0), "X")).unwrap();
        assert!(c.lookup("X").is_some());
        c.endscope(mark);
        assert!(c.lookup("X").is_none());
    }

    /// `spec.md` §8 scenario 1: an empty `main(){return(0);}` has no
    /// parameters, no automatics, no frame-template entries and no stack.
    #[test]
    fn main_returning_zero_has_an_empty_frame() {
        let (text, code) = emit(|c| {
            let fun = c.newframe("MAIN")?;
            c.ldconst(0)?;
            c.ret()?;
            c.endframe(&fun)
        })
        .unwrap();
        assert!(text.contains("ENTER"));
        assert!(text.contains("LEAVE"));
        assert!(text.contains("LOAD 0000 ARGUMENTS"));
        assert!(text.contains("LOAD 0000 TEMPLATES"));
        assert_eq!(code, 0);
    }

    /// `spec.md` §8 scenario 3: `x = 1 + 2` with `x` automatic folds the two
    /// constant loads and deposits the sum into the automatic's cell.
    #[test]
    fn assigning_a_constant_sum_to_an_automatic_computes_three() {
        let mut c = compiler();
        let x = c.newauto();
        c.ldconst(1).unwrap();
        c.tad(&Expr::new(Operand::RConst(2))).unwrap();
        assert_eq!(c.isel.want().value(), 3);
        c.dca(&x).unwrap();
        assert_eq!(c.isel.want().value(), 0);
        assert!(c.isel.want().known.acknown);
    }

    /// `spec.md` §8 scenario 4: `if(a) goto L;` round-trips through
    /// SKIPABLE without disturbing the unconditional jump that follows.
    #[test]
    fn conditional_goto_leaves_the_unconditional_jump_intact() {
        let (text, _) = emit(|c| {
            let fun = c.newframe("MAIN")?;
            let a = c.newauto();
            let l = c.define("L")?;
            c.tad(&a)?;
            c.opr(pdp8::SNA)?;
            let end = c.define("SKIPEND")?;
            c.jmp(&end)?;
            c.jmp(&l)?;
            c.putlabel(&end)?;
            c.ret()?;
            c.endframe(&fun)
        })
        .unwrap();
        assert!(text.contains("SNA"));
        assert!(text.matches("JMP").count() >= 2);
    }

    /// `spec.md` §8 scenario 5: a repeated string literal reuses its data
    /// word and the data area is dumped exactly once.
    #[test]
    fn repeated_string_literal_dumps_one_data_block() {
        let (text, _) = emit(|c| {
            c.string_literal("ab")?;
            c.string_literal("ab")?;
            let fun = c.newframe("MAIN")?;
            c.ldconst(0)?;
            c.ret()?;
            c.endframe(&fun)
        })
        .unwrap();
        assert_eq!(text.matches("DATA,").count(), 1);
    }

    /// `spec.md` §8 scenario 6: calling an undefined extern still gets a
    /// real `JMS` and forgets AC afterwards.
    #[test]
    fn calling_an_undefined_extern_emits_jms_and_forgets_ac() {
        let (text, code) = emit(|c| {
            let fun = c.newframe("MAIN")?;
            let foo = c.define("FOO")?;
            c.jms(&foo)?;
            assert!(!c.isel.want().known.acknown);
            c.ldconst(0)?;
            c.ret()?;
            c.endframe(&fun)
        })
        .unwrap();
        assert!(text.contains("JMS"));
        assert_eq!(code, 0);
    }
}
