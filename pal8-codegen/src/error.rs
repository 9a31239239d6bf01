//! Diagnostics and internal-invariant failures.
//!
//! `spec.md` §7 distinguishes three severities. `warn`/`error` are
//! recoverable and merely counted (modeled here as [`Diagnostics`]);
//! `fatal` means an internal invariant was violated and the caller cannot
//! produce sensible output, modeled as the [`Fault`] error type returned by
//! the handful of `Compiler` methods that can hit one.

use thiserror::Error;

/// The compiler gives up after this many recoverable errors (`spec.md` §6).
pub const MAX_ERRORS: u32 = 10;

/// An internal invariant violation. These always abort the compilation;
/// there is no recovery path, matching `fatal()` in the original.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Fault {
    #[error("invalid storage class passed to {op}: {operand}")]
    InvalidStorageClass { op: &'static str, operand: String },

    #[error("{table} table exhausted")]
    TableExhausted { table: &'static str },

    #[error("frame overflow")]
    FrameOverflow,

    #[error("data area full")]
    DataAreaFull,

    #[error("can only pop top of stack")]
    StackUnderflow,

    #[error("stack overflow")]
    StackOverflow,

    #[error("unrecognised OPR instruction: {0:04o}")]
    UnrecognisedOpr(u16),

    #[error("unknown pseudo instruction {0:07o}")]
    UnknownPseudo(u16),

    #[error("IOT not supported: {0:04o}")]
    IotUnsupported(u16),

    #[error("too many errors")]
    TooManyErrors,

    #[error("output stream error: {0}")]
    Output(String),
}

/// A single diagnostic line, formatted exactly as `%5d %-8.8s %s\n`
/// (`spec.md` §6's error format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u32,
    pub name: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:5} {:<8.8} {}", self.line, self.name, self.message)
    }
}

/// Running error/warning counts and the current line number, threaded
/// through every `Compiler` the way the original threads its global
/// `errcnt`/`warncnt`/`lineno`.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub line: u32,
    pub warnings: u32,
    pub errors: u32,
    log: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    fn record(&mut self, name: Option<&str>, message: String) -> Diagnostic {
        let diag = Diagnostic {
            line: self.line,
            name: name.unwrap_or("").to_string(),
            message,
        };
        log::debug!("{diag}");
        self.log.push(diag.clone());
        diag
    }

    /// Record a recoverable warning. Counted, never aborts.
    pub fn warn(&mut self, name: Option<&str>, message: impl Into<String>) {
        self.record(name, message.into());
        self.warnings += 1;
    }

    /// Record a recoverable error. Counted; once `MAX_ERRORS` is exceeded
    /// the caller should treat it as a [`Fault::TooManyErrors`].
    pub fn error(&mut self, name: Option<&str>, message: impl Into<String>) -> Result<(), Fault> {
        self.record(name, message.into());
        self.errors += 1;
        if self.errors >= MAX_ERRORS {
            Err(Fault::TooManyErrors)
        } else {
            Ok(())
        }
    }

    /// All diagnostics recorded so far, oldest first.
    pub fn history(&self) -> &[Diagnostic] {
        &self.log
    }

    pub fn exit_code(&self) -> i32 {
        if self.errors > 0 {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_like_the_c_original() {
        let d = Diagnostic {
            line: 42,
            name: "foo".into(),
            message: "undefined symbol".into(),
        };
        assert_eq!(format!("{d}"), "   42 foo      undefined symbol");
    }

    #[test]
    fn too_many_errors_is_fatal() {
        let mut diags = Diagnostics::new();
        for _ in 0..MAX_ERRORS - 1 {
            assert!(diags.error(None, "oops").is_ok());
        }
        assert_eq!(diags.error(None, "oops"), Err(Fault::TooManyErrors));
    }

    #[test]
    fn warnings_never_fail() {
        let mut diags = Diagnostics::new();
        for _ in 0..100 {
            diags.warn(None, "just a warning");
        }
        assert_eq!(diags.warnings, 100);
        assert_eq!(diags.errors, 0);
        assert_eq!(diags.exit_code(), 0);
    }
}
