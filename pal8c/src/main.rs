//! A small textual driver for [`pal8_codegen`]. This is not a B compiler:
//! there is no lexer or grammar here, just a line-oriented *action script*
//! whose verbs map directly onto `Compiler`'s high-level op layer. It exists
//! so the code generator has a runnable end-to-end artifact to exercise from
//! a terminal.
//!
//! Script grammar, one command per line (`#` starts a comment, blank lines
//! are ignored):
//!
//! ```text
//! func NAME            newframe(NAME)
//! endfunc              endframe() for the innermost open func
//! param NAME           declare the next formal parameter as NAME
//! auto NAME            declare the next automatic as NAME
//! extern NAME          register NAME as a global without defining it here
//! string NAME "TEXT"   intern TEXT as a string literal, declare it as NAME
//! const N              ldconst(N), N in C-style octal (0NNN) or decimal
//! load NAME            lda(NAME)
//! and|tad|isz|dca NAME apply the MRI to NAME
//! jmp|jms NAME         jump/call NAME
//! opr WORD             emit a raw OPR word (octal)
//! ret                  return from the current function
//! label NAME           putlabel(NAME)
//! setlabel NAME        setlabel(NAME)
//! ```

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pal8_codegen::{Compiler, Expr, Fault};

#[derive(Parser)]
#[command(author, version, about = "Drive pal8-codegen from a small action script", long_about = None)]
struct Cli {
    /// Action-script path, or `-` for stdin.
    #[arg(default_value = "-")]
    input: String,

    /// Where to write the generated PAL-8 assembly (default stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Raise the log filter; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let script = match read_input(&cli.input) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("pal8c: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut out = Vec::new();
    let code = match run(&script, &mut out) {
        Ok(code) => code,
        Err(fault) => {
            eprintln!("pal8c: {fault}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = write_output(cli.output.as_deref(), &out) {
        eprintln!("pal8c: {err}");
        return ExitCode::FAILURE;
    }

    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn read_input(path: &str) -> io::Result<String> {
    if path == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        fs::read_to_string(path)
    }
}

fn write_output(path: Option<&std::path::Path>, bytes: &[u8]) -> io::Result<()> {
    match path {
        Some(path) => fs::write(path, bytes),
        None => io::stdout().write_all(bytes),
    }
}

/// Interpret `script` against a fresh [`Compiler`], writing assembly into
/// `sink` and returning the process exit code `Compiler::finish` reports.
/// Recoverable errors (undeclared names, bad verbs) go through
/// `diagnostics_mut().error()` the way a real front end's semantic actions
/// would; a `Fault` aborts the whole run.
fn run(script: &str, sink: &mut Vec<u8>) -> Result<i32, Fault> {
    let mut compiler = Compiler::new(Vec::new());
    let mut open_funcs: Vec<Expr> = Vec::new();

    for (lineno, raw) in script.lines().enumerate() {
        compiler.diagnostics_mut().line = lineno as u32 + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut words = line.splitn(2, char::is_whitespace);
        let verb = words.next().unwrap_or("");
        let rest = words.next().unwrap_or("").trim();

        if let Err(err) = dispatch(&mut compiler, &mut open_funcs, verb, rest) {
            compiler.diagnostics_mut().error(None, err)?;
        }
    }

    for fun in open_funcs.into_iter().rev() {
        compiler.endframe(&fun)?;
    }

    let (bytes, code) = compiler.finish()?;
    sink.clear();
    sink.extend_from_slice(&bytes);
    Ok(code)
}

fn dispatch<W: Write>(
    c: &mut Compiler<W>,
    open_funcs: &mut Vec<Expr>,
    verb: &str,
    rest: &str,
) -> Result<(), String> {
    match verb {
        "func" => {
            let fun = c.newframe(rest).map_err(|e| e.to_string())?;
            open_funcs.push(fun);
        }
        "endfunc" => {
            let fun = open_funcs.pop().ok_or("endfunc with no open func")?;
            c.endframe(&fun).map_err(|e| e.to_string())?;
        }
        "param" => {
            let e = c.newparam();
            c.declare(Expr::named(e.value(), rest)).map_err(|e| e.to_string())?;
        }
        "auto" => {
            let e = c.newauto();
            c.declare(Expr::named(e.value(), rest)).map_err(|e| e.to_string())?;
        }
        "extern" => {
            c.define(rest).map_err(|e| e.to_string())?;
        }
        "string" => {
            let (name, text) = rest.split_once(char::is_whitespace).ok_or("string needs NAME \"TEXT\"")?;
            let text = text.trim().trim_matches('"');
            let e = c.string_literal(text).map_err(|e| e.to_string())?;
            c.declare(Expr::named(e.value(), name)).map_err(|e| e.to_string())?;
        }
        "const" => {
            let n = parse_word(rest)?;
            c.ldconst(n).map_err(|e| e.to_string())?;
        }
        "load" => {
            let e = resolve(c, rest)?;
            c.lda(&e).map_err(|e| e.to_string())?;
        }
        "and" => apply(c, pal8_codegen::pdp8::AND, rest)?,
        "tad" => apply(c, pal8_codegen::pdp8::TAD, rest)?,
        "isz" => apply(c, pal8_codegen::pdp8::ISZ, rest)?,
        "dca" => apply(c, pal8_codegen::pdp8::DCA, rest)?,
        "jmp" => {
            let e = c.define(rest).map_err(|e| e.to_string())?;
            c.jmp(&e).map_err(|e| e.to_string())?;
        }
        "jms" => {
            let e = c.define(rest).map_err(|e| e.to_string())?;
            c.jms(&e).map_err(|e| e.to_string())?;
        }
        "opr" => {
            let word = parse_word(rest)?;
            c.opr(word).map_err(|e| e.to_string())?;
        }
        "ret" => c.ret().map_err(|e| e.to_string())?,
        "label" => {
            let e = c.define(rest).map_err(|e| e.to_string())?;
            c.putlabel(&e).map_err(|e| e.to_string())?;
        }
        "setlabel" => {
            let e = c.define(rest).map_err(|e| e.to_string())?;
            c.setlabel(&e).map_err(|e| e.to_string())?;
        }
        other => return Err(format!("unrecognised verb: {other}")),
    }
    Ok(())
}

fn apply<W: Write>(c: &mut Compiler<W>, op: u16, name: &str) -> Result<(), String> {
    let e = resolve(c, name)?;
    match op {
        pal8_codegen::pdp8::AND => c.and(&e),
        pal8_codegen::pdp8::TAD => c.tad(&e),
        pal8_codegen::pdp8::ISZ => c.isz(&e),
        pal8_codegen::pdp8::DCA => c.dca(&e),
        _ => unreachable!("apply only called with MRI opcodes"),
    }
    .map_err(|e| e.to_string())
}

/// Look a name up in the local declaration stack first (parameters,
/// automatics, string literals), falling back to the global definition
/// table (functions, externs) on miss.
fn resolve<W: Write>(c: &mut Compiler<W>, name: &str) -> Result<Expr, String> {
    if let Some(e) = c.lookup(name) {
        return Ok(e.clone());
    }
    c.define(name).map_err(|e| e.to_string())
}

fn parse_word(text: &str) -> Result<u16, String> {
    let text = text.trim();
    let (digits, radix) = match text.strip_prefix('0') {
        Some(rest) if !rest.is_empty() => (rest, 8),
        _ => (text, 10),
    };
    u16::from_str_radix(digits, radix).map_err(|_| format!("not a number: {text}"))
}
