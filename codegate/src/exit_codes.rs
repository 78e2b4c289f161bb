//! Stable exit codes for codegate CLI commands.

/// The artifact was accepted; its code is on stdout.
pub const OK: i32 = 0;
/// Invalid usage, config or input, or another runtime error.
pub const INVALID: i32 = 1;
/// The artifact was rejected and will not be repaired.
pub const REJECTED: i32 = 2;
/// `codegate check` found lint issues that a repair could fix.
pub const NEEDS_REPAIR: i32 = 3;
