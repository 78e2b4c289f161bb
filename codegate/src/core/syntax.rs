//! Syntax validation: parsing plus the structural rules of the compiler.

use rustpython_parser::Parse;
use rustpython_parser::ast::{Stmt, Suite};
use tracing::debug;

use crate::core::structure::check_module;
use crate::core::types::RejectReason;

const SOURCE_PATH: &str = "<generated>";

/// Parsed module body. Built for one validation pass and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxTree {
    body: Suite,
}

impl SyntaxTree {
    pub fn statements(&self) -> &[Stmt] {
        &self.body
    }
}

/// Parse `code` as a Python module without evaluating or resolving anything.
///
/// Besides grammar errors this rejects what the compiler would, such as
/// `f() = 1` or a module-level `return`.
pub fn parse(code: &str) -> Result<SyntaxTree, RejectReason> {
    let body = Suite::parse(code, SOURCE_PATH).map_err(|err| RejectReason::Compile {
        details: err.to_string(),
    })?;
    check_module(&body).map_err(|details| RejectReason::Compile { details })?;
    debug!(statements = body.len(), "parsed generated code");
    Ok(SyntaxTree { body })
}
