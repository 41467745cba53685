//! Diagnostics for the compiler core.
//!
//! Every fallible codegen operation returns [`DiagnosticResult`]. Two error
//! families flow through it: user-visible compilation failures (for example
//! a by-value use of an opaque type, or a backend capacity limit) and
//! compiler-internal errors, which indicate a defect in an upstream phase
//! and are never triggerable through valid input. Internal errors are
//! constructed through [`Diagnostic::internal_boxed`] so the prefix is
//! uniform and grep-able.

use farro_ir::Span;
use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A single diagnostic message, optionally anchored to a source span.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
    pub notes: Vec<String>,
}

/// Result alias used by every fallible codegen operation.
pub type DiagnosticResult<T> = Result<T, Box<Diagnostic>>;

impl Diagnostic {
    pub fn simple(severity: Severity, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// Boxed form; the error side of [`DiagnosticResult`] is boxed so the
    /// Ok path stays a single word.
    pub fn simple_boxed(severity: Severity, message: impl Into<String>) -> Box<Diagnostic> {
        Box::new(Diagnostic::simple(severity, message))
    }

    pub fn simple_with_span_boxed(
        severity: Severity,
        message: impl Into<String>,
        span: Span,
    ) -> Box<Diagnostic> {
        let mut d = Diagnostic::simple(severity, message);
        d.span = Some(span);
        Box::new(d)
    }

    /// A compiler-internal error. These abort the whole compilation
    /// request; the message names the node or type kind that reached an
    /// arm no valid input can reach.
    pub fn internal_boxed(message: impl Into<String>) -> Box<Diagnostic> {
        Diagnostic::simple_boxed(
            Severity::Error,
            format!("internal compiler error: {}", message.into()),
        )
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Diagnostic {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(span) = &self.span {
            write!(f, " (bytes {}..{})", span.start, span.end)?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {}", note)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}
