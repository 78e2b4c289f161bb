//! Deterministic, pure logic of the validation pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and syntax trees and return deterministic outputs suitable for tests.

pub mod budget;
pub mod domain;
pub mod extract;
pub mod policy;
pub mod safety;
mod structure;
pub mod syntax;
pub mod types;
