//! Shared deterministic types for the validation core.
//!
//! These types define stable contracts between the pipeline stages. They do
//! not depend on external state or I/O.

use std::fmt;

use thiserror::Error;

/// Source text pulled out of a fenced block in an oracle response.
///
/// Only [`crate::core::extract::extract`] constructs this type, so a value is
/// always non-empty and already trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSource(String);

impl ExtractedSource {
    pub(crate) fn new(code: String) -> Self {
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExtractedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Category of a denylist match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    ForbiddenImport,
    ForbiddenName,
    ForbiddenAttributeAccess,
    ForbiddenCall,
    ForbiddenLiteral,
    BuiltinsAccess,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::ForbiddenImport => "forbidden-import",
            ViolationKind::ForbiddenName => "forbidden-name",
            ViolationKind::ForbiddenAttributeAccess => "forbidden-attribute-access",
            ViolationKind::ForbiddenCall => "forbidden-call",
            ViolationKind::ForbiddenLiteral => "forbidden-literal",
            ViolationKind::BuiltinsAccess => "builtins-access",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First denylist match found in a syntax tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    pub message: String,
}

impl PolicyViolation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Why an artifact was rejected without further repair.
///
/// Every variant is terminal for the current validation request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("no fenced python code block found in oracle response")]
    Extraction,
    #[error("code failed to compile: {details}")]
    Compile { details: String },
    #[error("{0}")]
    Policy(#[from] PolicyViolation),
    #[error("domain contract violated: {0}")]
    DomainContract(String),
    #[error("oracle error: {0}")]
    Oracle(String),
    #[error("lint tool error: {0}")]
    LintTool(String),
    #[error("lint issues remain after {attempts} attempt(s):\n{diagnostics}")]
    MaxAttemptsExceeded { attempts: u32, diagnostics: String },
    #[error("validation deadline exceeded")]
    DeadlineExceeded,
}

/// Structured linter result. `passed` implies `diagnostics` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintDiagnostic {
    passed: bool,
    diagnostics: String,
}

impl LintDiagnostic {
    pub fn pass() -> Self {
        Self {
            passed: true,
            diagnostics: String::new(),
        }
    }

    pub fn fail(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }
}

/// Result of one pass of the validation state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// All checks passed and the linter is clean.
    Accepted { code: ExtractedSource },
    /// Safe and well-formed, but the linter reported findings.
    NeedsRepair {
        code: ExtractedSource,
        diagnostics: String,
    },
    /// Terminal rejection; never repaired.
    FatalRejected(RejectReason),
}

impl ValidationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ValidationOutcome::Accepted { .. } => "accepted",
            ValidationOutcome::NeedsRepair { .. } => "needs_repair",
            ValidationOutcome::FatalRejected(_) => "fatal_rejected",
        }
    }
}
