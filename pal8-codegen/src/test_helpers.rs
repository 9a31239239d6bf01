//! A tiny harness for exercising [`crate::Compiler`] without a real B front
//! end: drive it through a closure, get back the emitted assembly text.
//! Exists so individual tests (and `pal8c`'s action-script driver) read as
//! "emit these ops, assert this text" (`spec.md` §8's worked examples).

use crate::error::Fault;
use crate::Compiler;

/// Run `body` against a fresh [`Compiler`] writing into an in-memory buffer,
/// then hand back the emitted text and the process exit code `finish()`
/// would report.
pub fn emit<F>(body: F) -> Result<(String, i32), Fault>
where
    F: FnOnce(&mut Compiler<Vec<u8>>) -> Result<(), Fault>,
{
    let mut compiler = Compiler::new(Vec::new());
    body(&mut compiler)?;
    let (bytes, code) = compiler.finish()?;
    Ok((String::from_utf8(bytes).expect("assembly output is ASCII"), code))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emit_runs_the_body_against_a_fresh_compiler() {
        let (text, code) = emit(|c| {
            let fun = c.newframe("MAIN")?;
            c.ldconst(0)?;
            c.ret()?;
            c.endframe(&fun)
        })
        .unwrap();
        assert!(text.contains("ENTER"));
        assert_eq!(code, 0);
    }
}
