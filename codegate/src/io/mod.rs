//! Side-effecting adapters: configuration, child processes, linter, oracle and prompts.

pub mod config;
pub mod lint;
pub mod oracle;
pub mod process;
pub mod prompt;
