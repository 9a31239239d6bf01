//! The PAL-8 pretty printer (`spec.md` §4.1): a three-column writer with
//! fields at character 0 (label), 8 (instruction) and 24 (comment),
//! tab-aligned the way PAL-8 source traditionally is.
//!
//! Translated directly from `original_source/src/asm.c`'s `field()`
//! state machine: everything goes through [`Writer::field`], which starts
//! a new line if the cursor has passed the target column (or sits exactly
//! on it, for label/instruction fields) and otherwise pads with tabs.

use std::io::{self, Write};

const FLABEL: u16 = 0;
const FINSTR: u16 = 8;
const FCOMMENT: u16 = 24;

/// A three-column PAL-8 source writer over any [`io::Write`] sink.
pub struct Writer<W: Write> {
    out: W,
    column: u16,
    pending_skip: bool,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W) -> Writer<W> {
        Writer {
            out,
            column: 0,
            pending_skip: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Advance to `target`, starting a new line first if the cursor is
    /// already past it (or sits exactly on it and `target > 0`), then
    /// padding with tabs from the next multiple of 8.
    fn field(&mut self, target: u16) -> io::Result<()> {
        if self.column > target || (self.column == target && target > 0) {
            writeln!(self.out)?;
            self.column = 0;
        }

        self.column -= self.column % 8;
        while self.column < target {
            write!(self.out, "\t")?;
            self.column += 8;
        }
        Ok(())
    }

    /// Write text into the label column.
    pub fn label(&mut self, text: &str) -> io::Result<()> {
        self.field(FLABEL)?;
        write!(self.out, "{text}")?;
        self.column += text.len() as u16;
        Ok(())
    }

    /// Write text into the instruction column. If [`Writer::skip`] was
    /// called since the last `instr`, a single leading space is emitted
    /// first (marking the instruction as conditionally executed).
    pub fn instr(&mut self, text: &str) -> io::Result<()> {
        self.field(FINSTR)?;
        if self.pending_skip {
            write!(self.out, " ")?;
        }
        write!(self.out, "{text}")?;
        self.column += text.len() as u16 + self.pending_skip as u16;
        self.pending_skip = false;
        Ok(())
    }

    /// Write text into the comment column, prefixed with `/ `.
    pub fn comment(&mut self, text: &str) -> io::Result<()> {
        self.field(FCOMMENT)?;
        write!(self.out, "/ {text}")?;
        self.column += text.len() as u16 + 2;
        Ok(())
    }

    /// Append a comment for `name`, unless it is empty.
    pub fn comment_name(&mut self, name: &str) -> io::Result<()> {
        if !name.is_empty() {
            self.comment(name)?;
        }
        Ok(())
    }

    /// Force a line break, moving the cursor to column 0.
    pub fn endline(&mut self) -> io::Result<()> {
        self.field(FLABEL)
    }

    /// Emit a blank line, unless we are already at the start of one (never
    /// produces two consecutive blank lines).
    pub fn blank(&mut self) -> io::Result<()> {
        if self.column == 0 {
            return Ok(());
        }
        self.field(FLABEL)?;
        writeln!(self.out)
    }

    /// Emit the octal representation of a 12-bit word as an instruction.
    pub fn emitc(&mut self, word: u16) -> io::Result<()> {
        self.instr(&format!("{:04o}", word & 0o7777))
    }

    /// Emit `*.+NNNN` to reserve `n` words, if `n` is nonzero.
    pub fn advance(&mut self, n: u16) -> io::Result<()> {
        if n > 0 {
            self.instr(&format!("*.+{n:04o}"))?;
        }
        Ok(())
    }

    /// Mark the next `instr()` call as conditionally executed.
    pub fn skip(&mut self) {
        self.pending_skip = true;
    }

    pub fn column(&self) -> u16 {
        self.column
    }
}

impl Writer<Vec<u8>> {
    /// Convenience constructor for tests: writes into an in-memory buffer,
    /// retrievable as a `String` via [`Writer::finish`].
    pub fn buffered() -> Writer<Vec<u8>> {
        Writer::new(Vec::new())
    }

    pub fn finish(self) -> String {
        String::from_utf8(self.into_inner()).expect("assembly output is ASCII")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn label_instr_comment_land_in_their_columns() {
        let mut w = Writer::buffered();
        w.label("L0001,").unwrap();
        w.instr("TAD 0012").unwrap();
        w.comment("X").unwrap();
        w.endline().unwrap();
        assert_eq!(w.finish(), "L0001,\tTAD 0012\t/ X\n");
    }

    #[test]
    fn overlong_label_forces_instruction_to_next_line() {
        let mut w = Writer::buffered();
        w.label("VERYLONGLABEL,").unwrap();
        w.instr("CLA").unwrap();
        w.endline().unwrap();
        assert_eq!(w.finish(), "VERYLONGLABEL,\n\tCLA\n");
    }

    #[test]
    fn blank_never_doubles_up() {
        let mut w = Writer::buffered();
        w.blank().unwrap();
        w.blank().unwrap();
        w.instr("CLA").unwrap();
        w.blank().unwrap();
        w.blank().unwrap();
        assert_eq!(w.finish(), "\tCLA\n\n");
    }

    #[test]
    fn skip_prefixes_next_instruction_with_a_space() {
        let mut w = Writer::buffered();
        w.instr("SZA").unwrap();
        w.skip();
        w.instr("JMP L0001").unwrap();
        w.endline().unwrap();
        assert_eq!(w.finish(), "\tSZA\n\t JMP L0001\n");
    }

    #[test]
    fn emitc_pads_to_four_octal_digits() {
        let mut w = Writer::buffered();
        w.emitc(5).unwrap();
        w.endline().unwrap();
        assert_eq!(w.finish(), "\t0005\n");
    }

    #[test]
    fn advance_is_a_noop_for_zero() {
        let mut w = Writer::buffered();
        w.advance(0).unwrap();
        assert_eq!(w.column(), 0);
    }
}
