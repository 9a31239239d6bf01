//! Name tables: the global definition table and the scoped declaration
//! stack described in `spec.md` §3.2/§4.2.

use crate::error::Fault;
use crate::pdp8::{Expr, LabelId, Operand};

/// Minimum capacity of the definition table (`spec.md` §3.2).
pub const DEFNSIZ: usize = 256;
/// Minimum capacity of the declaration table (`spec.md` §3.2).
pub const DECLSIZ: usize = 32;

/// The global, append-only table of names referenced across the whole
/// compilation (`define`'d names). Each entry is stamped with a fresh
/// `RLabel`/`LLabel` on first reference and the label number never
/// changes afterwards — this is what lets a forward reference to an
/// undefined function still get a stable `JMS L####`.
#[derive(Debug, Default)]
pub struct Definitions {
    entries: Vec<Expr>,
    next_label: LabelId,
}

impl Definitions {
    pub fn new() -> Definitions {
        Definitions::default()
    }

    /// Look up `name`, minting a fresh `LLabel` entry on first reference.
    /// Returns the (possibly just-created) entry's current value.
    pub fn define(&mut self, name: &str) -> Result<Expr, Fault> {
        if let Some(existing) = self.entries.iter().find(|e| e.name == name) {
            return Ok(existing.clone());
        }

        if self.entries.len() >= DEFNSIZ {
            return Err(Fault::TableExhausted { table: "definition" });
        }

        let label = self.next_label;
        self.next_label += 1;
        let expr = Expr::named(Operand::LLabel(label), name);
        self.entries.push(expr.clone());
        Ok(expr)
    }

    /// Mint a fresh, anonymous `LLabel` from the same counter `define` uses,
    /// without recording it in the table (mirrors the original's
    /// `newlabel`, used for frame labels that are never looked up by name).
    pub fn fresh_label(&mut self) -> LabelId {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The scoped stack of locally declared names (parameters, automatics,
/// internal labels). `beginscope`/`endscope` give block scoping; lookup
/// scans newest-first so inner scopes shadow outer ones.
///
/// Redeclaration within the same scope is not rejected — this mirrors the
/// original, which has a standing TODO about it (see `DESIGN.md`).
#[derive(Debug, Default)]
pub struct Declarations {
    entries: Vec<Expr>,
}

impl Declarations {
    pub fn new() -> Declarations {
        Declarations::default()
    }

    /// Append a new declaration, without checking for shadowing within the
    /// same scope.
    pub fn declare(&mut self, expr: Expr) -> Result<(), Fault> {
        if self.entries.len() >= DECLSIZ {
            return Err(Fault::TableExhausted {
                table: "declaration",
            });
        }
        self.entries.push(expr);
        Ok(())
    }

    /// Find the innermost declaration named `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<&Expr> {
        self.entries.iter().rev().find(|e| e.name == name)
    }

    /// Current scope depth, to be passed back to [`Declarations::endscope`].
    pub fn beginscope(&self) -> usize {
        self.entries.len()
    }

    /// Discard every declaration made since the matching `beginscope()`.
    pub fn endscope(&mut self, depth: usize) {
        self.entries.truncate(depth);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
