//! Recoverable parse problems
//!
//! Nothing in here aborts a parse. Each problem is logged when it is
//! reported and kept so callers can inspect what was skipped.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Kind of a recovered problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Unterminated literal or comment, best-effort token emitted
    TokenizeRecovery,
    /// A body reached end of input before its closing brace
    UnbalancedSpan,
    /// A conditional expression could not be parsed, branch not taken
    UnresolvedCondition,
    /// A statement matched no declaration form and was dropped
    AmbiguousDeclaration,
    /// `#endif`, `#else` or `#elif` without an open conditional
    DanglingEndif,
}

/// One recovered problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// 1-based source line, 0 when unknown
    pub line: usize,
    pub message: String,
}

/// Collected diagnostics of one parse
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and record a problem
    pub fn report(&mut self, kind: DiagnosticKind, line: usize, message: impl Into<String>) {
        let message = message.into();
        match kind {
            DiagnosticKind::DanglingEndif => debug!("line {}: {}", line, message),
            _ => warn!("line {}: {:?}: {}", line, kind, message),
        }
        self.items.push(Diagnostic {
            kind,
            line,
            message,
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of diagnostics of one kind
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.items.iter().filter(|d| d.kind == kind).count()
    }
}
