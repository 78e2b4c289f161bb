//! Validation gate for LLM-generated PySpark jobs.
//!
//! An untrusted oracle produces Python code inside a markdown fence. Every
//! artifact goes through the same fail-fast pipeline: extraction, parsing,
//! an AST safety walk against a denylist, a Spark domain check and finally an
//! external linter. Lint findings are the only recoverable failure; they are
//! fed back to the oracle for a bounded number of repair attempts.
//!
//! - **[`core`]**: Pure, deterministic checks (extraction, parsing, policy,
//!   safety walk, domain contract). No I/O.
//! - **[`io`]**: Side effects (config, child processes, linter, oracle,
//!   prompt rendering).
//!
//! [`pipeline`], [`repair`] and [`generate`] combine the two into the
//! operations exposed by the CLI.

pub mod core;
pub mod exit_codes;
pub mod generate;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
