//! Parse-time diagnostics: non-fatal by default, returned alongside the
//! `Module` the parser assembles.

use std::fmt;

/// Error vs. warning. A module with errors is still loadable if a `Module`
/// structure could be assembled; callers decide whether to refuse it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    Error,
    Warning,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Error => write!(f, "error"),
            DiagnosticKind::Warning => write!(f, "warning"),
        }
    }
}

/// One parse-time finding: an unrecoverable syntactic failure (`Error`) or
/// a recovered/advisory condition (`Warning` — skipped lines, duplicate
/// tags, unused declarations).
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn error(line: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            kind: DiagnosticKind::Error,
            line,
            message: message.into(),
        }
    }

    pub fn warning(line: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            kind: DiagnosticKind::Warning,
            line,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == DiagnosticKind::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on line {}: {}", self.kind, self.line, self.message)
    }
}

impl std::error::Error for Diagnostic {}
