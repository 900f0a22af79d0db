//! Structured diagnostics for recoverable failures.
//!
//! Nothing in the pipeline formats diagnostics for display; they are handed to a
//! [`DiagnosticSink`] and returned alongside the (possibly partial) document.

use crate::declaration::Span;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A file could not be read or parsed; it is excluded from results
    Parse,
    /// A relation, type or route binding could not be resolved
    Resolution,
    /// Explicit type and documentation tag disagree
    TypeConflict,
    Configuration,
    Export,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub path: Option<PathBuf>,
    pub declaration: Option<String>,
    pub span: Option<Span>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            path: None,
            declaration: None,
            span: None,
            message: message.into(),
        }
    }

    pub fn parse(path: &Path, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Parse, Severity::Error, message).at(path)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Resolution, Severity::Warning, message)
    }

    pub fn type_conflict(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::TypeConflict, Severity::Warning, message)
    }

    pub fn at(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }

    pub fn for_declaration(mut self, name: impl Into<String>) -> Self {
        self.declaration = Some(name.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// External collector of diagnostics
pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);
}

/// Default collector: keeps diagnostics in emission order and logs them
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.items.iter().filter(|d| d.kind == kind).count()
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.emit(diagnostic);
        }
    }
}

impl DiagnosticSink for Diagnostics {
    fn emit(&mut self, diagnostic: Diagnostic) {
        let location = diagnostic
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match diagnostic.severity {
            Severity::Error | Severity::Warning => {
                warn!("[{:?}] {} {}", diagnostic.kind, location, diagnostic.message)
            }
            Severity::Info => debug!("[{:?}] {} {}", diagnostic.kind, location, diagnostic.message),
        }
        self.items.push(diagnostic);
    }
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}
